//! Local file-based manifest storage backend.
//!
//! Layout under the base directory (`.stackweave` by default):
//!
//! ```text
//! manifests/<target>.json
//! history.json
//! sync.lock
//! ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{Result, StackError, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
use super::store::{ManifestStore, decode_lock, decode_manifest, encode_manifest};
use super::types::{FileManifest, RunHistory, RunHistoryEntry};

/// Default state directory name.
pub const STATE_DIR: &str = ".stackweave";

const MANIFEST_DIR: &str = "manifests";
const HISTORY_FILE: &str = "history.json";
const LOCK_FILE: &str = "sync.lock";

/// Manifest store on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalManifestStore {
    base_dir: PathBuf,
}

impl LocalManifestStore {
    /// Creates a store rooted at `./.stackweave`.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| StackError::internal(format!("Cannot determine current directory: {e}")))?;
        Ok(Self::with_base_dir(cwd.join(STATE_DIR)))
    }

    /// Creates a store rooted at `base_dir`.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// The directory holding all state files.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn manifest_path(&self, target: &str) -> PathBuf {
        self.base_dir.join(MANIFEST_DIR).join(format!("{target}.json"))
    }

    fn lock_path(&self) -> PathBuf {
        self.base_dir.join(LOCK_FILE)
    }

    fn history_path(&self) -> PathBuf {
        self.base_dir.join(HISTORY_FILE)
    }

    async fn read_optional(path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::local(format!("Failed to read {}: {e}", path.display())).into()),
        }
    }

    /// Writes `content` to a temporary sibling and renames it over `path`.
    async fn write_atomic(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                StateError::local(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }

        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            StateError::local(format!("Failed to create {}: {e}", temp_path.display()))
        })?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::local(format!("Failed to write {}: {e}", temp_path.display())))?;
        file.sync_all()
            .await
            .map_err(|e| StateError::local(format!("Failed to sync {}: {e}", temp_path.display())))?;

        fs::rename(&temp_path, path).await.map_err(|e| {
            StateError::local(format!("Failed to rename {}: {e}", temp_path.display()))
        })?;
        Ok(())
    }

    async fn remove_if_present(path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::local(format!("Failed to delete {}: {e}", path.display())).into()),
        }
    }
}

#[async_trait]
impl ManifestStore for LocalManifestStore {
    async fn load(&self, target: &str) -> Result<Option<FileManifest>> {
        let path = self.manifest_path(target);
        let Some(content) = Self::read_optional(&path).await? else {
            debug!("No manifest for '{target}' at {}", path.display());
            return Ok(None);
        };

        let manifest = decode_manifest(&content, &path.display().to_string())?;
        debug!("Loaded manifest for '{target}' ({} files)", manifest.len());
        Ok(Some(manifest))
    }

    async fn save(&self, manifest: &FileManifest) -> Result<()> {
        let path = self.manifest_path(&manifest.target);
        Self::write_atomic(&path, &encode_manifest(manifest)?).await?;
        info!(
            "Saved manifest for '{}' ({} files) to {}",
            manifest.target,
            manifest.len(),
            path.display()
        );
        Ok(())
    }

    async fn delete(&self, target: &str) -> Result<()> {
        info!("Deleting manifest for '{target}'");
        Self::remove_if_present(&self.manifest_path(target)).await
    }

    async fn exists(&self, target: &str) -> Result<bool> {
        Ok(fs::try_exists(self.manifest_path(target))
            .await
            .unwrap_or(false))
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        if let Some(existing) = self.get_lock_info().await? {
            if !existing.is_expired() {
                return Err(existing.contention_error().into());
            }
            debug!("Expired lock held by {} found, taking over", existing.holder);
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let lock = LockInfo::new(&holder_id);

        let content = serde_json::to_string_pretty(&lock)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;
        Self::write_atomic(&self.lock_path(), &content)
            .await
            .map_err(|e| StateError::LockFailed {
                message: e.to_string(),
            })?;

        info!(
            "Acquired manifest lock: {} (expires in {}s)",
            lock.lock_id, LOCK_EXPIRY_SECS
        );
        Ok(lock)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.get_lock_info().await? {
            existing.check_owner(lock_id)?;
            Self::remove_if_present(&self.lock_path()).await?;
            info!("Released manifest lock: {lock_id}");
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<()> {
        Self::remove_if_present(&self.lock_path()).await?;
        info!("Removed manifest lock");
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        Self::read_optional(&self.lock_path())
            .await?
            .map(|content| decode_lock(&content))
            .transpose()
    }

    async fn record_run(&self, entry: &RunHistoryEntry) -> Result<()> {
        let mut history = self.load_history().await?;
        history.push(entry.clone());

        let content = serde_json::to_string_pretty(&history)
            .map_err(|e| StateError::serialization(format!("Failed to serialize history: {e}")))?;
        Self::write_atomic(&self.history_path(), &content).await
    }

    async fn load_history(&self) -> Result<RunHistory> {
        let Some(content) = Self::read_optional(&self.history_path()).await? else {
            return Ok(RunHistory::default());
        };
        serde_json::from_str(&content).map_err(|e| {
            StateError::Corrupted {
                message: format!("Failed to parse history: {e}"),
            }
            .into()
        })
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FileManifestEntry;
    use chrono::Utc;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalManifestStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalManifestStore::with_base_dir(temp_dir.path().join(STATE_DIR));
        (store, temp_dir)
    }

    fn manifest(target: &str, files: &[&str]) -> FileManifest {
        let mut manifest = FileManifest::new(target);
        for file in files {
            manifest.insert(FileManifestEntry {
                relative_path: (*file).to_string(),
                content_hash: String::from("abc123"),
                content_type: None,
            });
        }
        manifest
    }

    #[tokio::test]
    async fn test_save_replaces_whole_manifest() {
        let (store, _temp) = create_test_store();

        store
            .save(&manifest("website", &["a.txt", "b.html"]))
            .await
            .expect("Failed to save manifest");
        store
            .save(&manifest("website", &["b.html", "c.css"]))
            .await
            .expect("Failed to save manifest");

        let loaded = store
            .load("website")
            .await
            .expect("Failed to load manifest")
            .expect("Manifest should exist");

        assert_eq!(
            loaded.entries.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["b.html", "c.css"]
        );
    }

    #[tokio::test]
    async fn test_targets_are_independent() {
        let (store, _temp) = create_test_store();
        store
            .save(&manifest("docs", &["index.html"]))
            .await
            .expect("Failed to save manifest");

        assert!(store.exists("docs").await.expect("exists check failed"));
        assert!(!store.exists("website").await.expect("exists check failed"));
        assert!(store.load("website").await.expect("load failed").is_none());

        store.delete("docs").await.expect("delete failed");
        assert!(!store.exists("docs").await.expect("exists check failed"));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store
            .acquire_lock("test-holder")
            .await
            .expect("Failed to acquire lock");
        assert!(store.is_locked().await.expect("is_locked failed"));

        assert!(store.release_lock("not-the-lock").await.is_err());
        store
            .release_lock(&lock.lock_id)
            .await
            .expect("Failed to release lock");
        assert!(!store.is_locked().await.expect("is_locked failed"));
    }

    #[tokio::test]
    async fn test_lock_conflict_and_force_unlock() {
        let (store, _temp) = create_test_store();

        let _lock = store
            .acquire_lock("holder-1")
            .await
            .expect("Failed to acquire first lock");
        assert!(store.acquire_lock("holder-2").await.is_err());

        store.force_unlock().await.expect("force unlock failed");
        store
            .acquire_lock("holder-2")
            .await
            .expect("lock should be free after force unlock");
    }

    #[tokio::test]
    async fn test_history_appended() {
        let (store, _temp) = create_test_store();
        let entry = RunHistoryEntry {
            timestamp: Utc::now(),
            stack_hash: String::from("deadbeef"),
            applied: 3,
            deleted: 1,
            failed: 0,
            skipped: 0,
            success: true,
        };

        store.record_run(&entry).await.expect("record failed");
        store.record_run(&entry).await.expect("record failed");

        let history = store.load_history().await.expect("load history failed");
        assert_eq!(history.entries.len(), 2);
    }
}
