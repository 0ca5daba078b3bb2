//! Persisted state for stackweave.
//!
//! This module stores the per-target file manifests that make object sync
//! incremental, the advisory lock serializing runs, and the run history.

mod local;
mod lock;
mod s3;
mod store;
mod types;

pub use local::{LocalManifestStore, STATE_DIR};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use s3::S3ManifestStore;
pub use store::ManifestStore;
pub use types::{
    FileManifest, FileManifestEntry, MANIFEST_VERSION, MAX_HISTORY, RunHistory, RunHistoryEntry,
};
