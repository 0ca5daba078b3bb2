//! Manifest store trait definition.
//!
//! This module defines the common interface for manifest storage backends.

use async_trait::async_trait;

use crate::error::{Result, StateError};

use super::lock::LockInfo;
use super::types::{FileManifest, MANIFEST_VERSION, RunHistory, RunHistoryEntry};

/// Key-value persistence for per-target file manifests.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    /// Loads the manifest of `target`.
    ///
    /// Returns `None` if the target was never synced.
    async fn load(&self, target: &str) -> Result<Option<FileManifest>>;

    /// Replaces the stored manifest of `manifest.target`.
    async fn save(&self, manifest: &FileManifest) -> Result<()>;

    /// Deletes the manifest of `target`.
    async fn delete(&self, target: &str) -> Result<()>;

    /// Checks if a manifest exists for `target`.
    async fn exists(&self, target: &str) -> Result<bool>;

    /// Acquires the store lock.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases the store lock if `lock_id` matches.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Removes the store lock regardless of its holder.
    async fn force_unlock(&self) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if a live lock exists.
    async fn is_locked(&self) -> Result<bool> {
        Ok(self
            .get_lock_info()
            .await?
            .is_some_and(|lock| !lock.is_expired()))
    }

    /// Appends a run to the history. Backends without history ignore it.
    async fn record_run(&self, _entry: &RunHistoryEntry) -> Result<()> {
        Ok(())
    }

    /// Loads the run history.
    async fn load_history(&self) -> Result<RunHistory> {
        Ok(RunHistory::default())
    }

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl ManifestStore for Box<dyn ManifestStore> {
    async fn load(&self, target: &str) -> Result<Option<FileManifest>> {
        (**self).load(target).await
    }

    async fn save(&self, manifest: &FileManifest) -> Result<()> {
        (**self).save(manifest).await
    }

    async fn delete(&self, target: &str) -> Result<()> {
        (**self).delete(target).await
    }

    async fn exists(&self, target: &str) -> Result<bool> {
        (**self).exists(target).await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        (**self).acquire_lock(holder).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        (**self).release_lock(lock_id).await
    }

    async fn force_unlock(&self) -> Result<()> {
        (**self).force_unlock().await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).get_lock_info().await
    }

    async fn is_locked(&self) -> Result<bool> {
        (**self).is_locked().await
    }

    async fn record_run(&self, entry: &RunHistoryEntry) -> Result<()> {
        (**self).record_run(entry).await
    }

    async fn load_history(&self) -> Result<RunHistory> {
        (**self).load_history().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}

/// Parses a stored manifest and checks its format version.
pub(crate) fn decode_manifest(content: &str, origin: &str) -> Result<FileManifest> {
    let manifest: FileManifest = serde_json::from_str(content).map_err(|e| StateError::Corrupted {
        message: format!("Failed to parse manifest {origin}: {e}"),
    })?;

    let major = |v: &str| v.split('.').next().map(str::to_string);
    if major(&manifest.version) != major(MANIFEST_VERSION) {
        return Err(StateError::VersionMismatch {
            expected: MANIFEST_VERSION.to_string(),
            found: manifest.version,
        }
        .into());
    }
    Ok(manifest)
}

/// Serializes a manifest for storage.
pub(crate) fn encode_manifest(manifest: &FileManifest) -> Result<String> {
    serde_json::to_string_pretty(manifest)
        .map_err(|e| StateError::serialization(format!("Failed to serialize manifest: {e}")).into())
}

/// Parses a stored lock.
pub(crate) fn decode_lock(content: &str) -> Result<LockInfo> {
    serde_json::from_str(content).map_err(|e| {
        StateError::Corrupted {
            message: format!("Failed to parse lock: {e}"),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rejects_other_major_version() {
        let mut manifest = FileManifest::new("website");
        manifest.version = String::from("2.0");
        let json = serde_json::to_string(&manifest).expect("serializable");

        let err = decode_manifest(&json, "test").expect_err("version mismatch");
        assert!(err.to_string().contains("version mismatch"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_manifest("{not json", "test").is_err());
        assert!(decode_lock("[]").is_err());
    }
}
