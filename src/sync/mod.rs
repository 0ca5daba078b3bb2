//! Incremental object sync.
//!
//! This module turns a local directory into object nodes:
//! - Walking and fingerprinting the file tree
//! - Inferring content types from extensions
//! - Diffing against the manifest of the last successful sync

mod diff;
mod engine;
mod mime;
mod walker;

pub use diff::{FileChange, ManifestDiff};
pub use engine::{SyncEngine, SyncPlan, object_node_id};
pub use mime::MimeTable;
pub use walker::{FileWalker, WalkedFile, hash_file};
