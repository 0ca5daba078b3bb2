//! S3-based manifest storage backend.
//!
//! Manifests live at `<prefix>manifests/<target>.json`, the lock at
//! `<prefix>sync.lock`. S3 has no compare-and-swap, so the lock is advisory.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info};

use crate::error::{Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
use super::store::{ManifestStore, decode_lock, decode_manifest, encode_manifest};
use super::types::FileManifest;

const LOCK_KEY: &str = "sync.lock";

/// Manifest store in an S3 bucket.
#[derive(Debug, Clone)]
pub struct S3ManifestStore {
    client: Client,
    bucket: String,
    prefix: String,
}

fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .map(|p| format!("{p}/"))
        .unwrap_or_default()
}

impl S3ManifestStore {
    /// Creates a store using credentials and region from the environment.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Self {
        let loader = aws_config::from_env();
        let config = match region {
            Some(region) => loader.region(aws_config::Region::new(region.to_string())).load().await,
            None => loader.load().await,
        };
        Self::with_client(Client::new(&config), bucket, prefix)
    }

    /// Creates a store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    fn manifest_key(&self, target: &str) -> String {
        format!("{}manifests/{target}.json", self.prefix)
    }

    fn lock_key(&self) -> String {
        format!("{}{LOCK_KEY}", self.prefix)
    }

    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let bytes = response
                    .body
                    .collect()
                    .await
                    .map_err(|e| StateError::s3(format!("Failed to read s3://{}/{key}: {e}", self.bucket)))?;
                let content = String::from_utf8(bytes.to_vec()).map_err(|e| StateError::Corrupted {
                    message: format!("Invalid UTF-8 in s3://{}/{key}: {e}", self.bucket),
                })?;
                Ok(Some(content))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(StateError::s3(format!("S3 get error: {service_err}")).into())
                }
            }
        }
    }

    async fn put_object(&self, key: &str, content: String) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(content.into_bytes()))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StateError::s3(format!("S3 put error: {e}")))?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StateError::s3(format!("S3 delete error: {e}")))?;
        Ok(())
    }

    async fn object_exists(&self, key: &str) -> Result<bool> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(StateError::s3(format!("S3 head error: {service_err}")).into())
                }
            }
        }
    }
}

#[async_trait]
impl ManifestStore for S3ManifestStore {
    async fn load(&self, target: &str) -> Result<Option<FileManifest>> {
        let key = self.manifest_key(target);
        debug!("Loading manifest from s3://{}/{key}", self.bucket);

        let Some(content) = self.get_object(&key).await? else {
            debug!("No manifest for '{target}' in S3");
            return Ok(None);
        };
        let origin = format!("s3://{}/{key}", self.bucket);
        decode_manifest(&content, &origin).map(Some)
    }

    async fn save(&self, manifest: &FileManifest) -> Result<()> {
        let key = self.manifest_key(&manifest.target);
        info!(
            "Saving manifest for '{}' ({} files) to s3://{}/{key}",
            manifest.target,
            manifest.len(),
            self.bucket
        );
        self.put_object(&key, encode_manifest(manifest)?).await
    }

    async fn delete(&self, target: &str) -> Result<()> {
        let key = self.manifest_key(target);
        info!("Deleting manifest s3://{}/{key}", self.bucket);
        self.delete_object(&key).await
    }

    async fn exists(&self, target: &str) -> Result<bool> {
        self.object_exists(&self.manifest_key(target)).await
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
        self.put_object(&self.lock_key(), content).await?;

        info!(
            "Acquired manifest lock: {} (expires in {}s)",
            lock.lock_id, LOCK_EXPIRY_SECS
        );
        Ok(lock)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.get_lock_info().await? {
            existing.check_owner(lock_id)?;
            self.delete_object(&self.lock_key()).await?;
            info!("Released manifest lock: {lock_id}");
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<()> {
        self.delete_object(&self.lock_key()).await?;
        info!("Removed manifest lock");
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.get_object(&self.lock_key())
            .await?
            .map(|content| decode_lock(&content))
            .transpose()
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(normalize_prefix(None), "");
        assert_eq!(normalize_prefix(Some("/")), "");
        assert_eq!(normalize_prefix(Some("/team/site/")), "team/site/");
        assert_eq!(normalize_prefix(Some("stack")), "stack/");
    }
}
