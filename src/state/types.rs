//! Persisted state types.
//!
//! A [`FileManifest`] records the files of one sync target as they were at
//! the end of the last successful sync. It is always replaced as a whole.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current version of the manifest format.
pub const MANIFEST_VERSION: &str = "1.0";

/// Maximum number of run history entries kept.
pub const MAX_HISTORY: usize = 100;

/// Fingerprints of every file of one sync target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifest {
    /// Manifest format version.
    pub version: String,
    /// Sync target name.
    pub target: String,
    /// When the manifest was computed.
    pub generated_at: DateTime<Utc>,
    /// Entries keyed by relative path.
    #[serde(default)]
    pub entries: BTreeMap<String, FileManifestEntry>,
}

/// Fingerprint of one tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifestEntry {
    /// Path relative to the sync root, `/`-separated.
    pub relative_path: String,
    /// Hex-encoded SHA-256 of the file contents.
    pub content_hash: String,
    /// Inferred MIME type, if the extension is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// One recorded apply run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Hash of the stack file.
    pub stack_hash: String,
    /// Nodes created or updated.
    pub applied: usize,
    /// Nodes deleted.
    pub deleted: usize,
    /// Nodes that failed.
    pub failed: usize,
    /// Nodes skipped.
    pub skipped: usize,
    /// Whether every node succeeded.
    pub success: bool,
}

/// Bounded list of recent runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunHistory {
    /// Entries, oldest first.
    #[serde(default)]
    pub entries: Vec<RunHistoryEntry>,
}

impl FileManifest {
    /// Creates an empty manifest for `target`.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            target: target.into(),
            generated_at: Utc::now(),
            entries: BTreeMap::new(),
        }
    }

    /// Inserts an entry, keyed by its relative path.
    pub fn insert(&mut self, entry: FileManifestEntry) {
        self.entries.insert(entry.relative_path.clone(), entry);
    }

    /// Looks up an entry.
    #[must_use]
    pub fn get(&self, relative_path: &str) -> Option<&FileManifestEntry> {
        self.entries.get(relative_path)
    }

    /// Number of tracked files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no file is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if both manifests track the same files with the same fingerprints.
    #[must_use]
    pub fn same_entries(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl FileManifestEntry {
    /// Returns true if the stored fingerprint differs from `other`.
    #[must_use]
    pub fn differs_from(&self, other: &Self) -> bool {
        self.content_hash != other.content_hash || self.content_type != other.content_type
    }
}

impl RunHistory {
    /// Appends an entry, dropping the oldest beyond [`MAX_HISTORY`].
    pub fn push(&mut self, entry: RunHistoryEntry) {
        if self.entries.len() >= MAX_HISTORY {
            self.entries.remove(0);
        }
        self.entries.push(entry);
    }

    /// The most recent run.
    #[must_use]
    pub fn last(&self) -> Option<&RunHistoryEntry> {
        self.entries.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, hash: &str) -> FileManifestEntry {
        FileManifestEntry {
            relative_path: path.to_string(),
            content_hash: hash.to_string(),
            content_type: Some(String::from("text/plain")),
        }
    }

    #[test]
    fn test_manifest_roundtrip_ignores_timestamp() {
        let mut manifest = FileManifest::new("website");
        manifest.insert(entry("a.txt", "00ff"));

        let json = serde_json::to_string(&manifest).expect("serializable");
        let mut loaded: FileManifest = serde_json::from_str(&json).expect("deserializable");
        loaded.generated_at = Utc::now();

        assert!(loaded.same_entries(&manifest));
        assert_eq!(loaded.get("a.txt").map(|e| e.content_hash.as_str()), Some("00ff"));
    }

    #[test]
    fn test_content_type_change_is_a_difference() {
        let old = entry("a.txt", "00ff");
        let mut new = old.clone();
        assert!(!old.differs_from(&new));

        new.content_type = None;
        assert!(old.differs_from(&new));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = RunHistory::default();
        for i in 0..(MAX_HISTORY + 5) {
            history.push(RunHistoryEntry {
                timestamp: Utc::now(),
                stack_hash: format!("{i}"),
                applied: i,
                deleted: 0,
                failed: 0,
                skipped: 0,
                success: true,
            });
        }

        assert_eq!(history.entries.len(), MAX_HISTORY);
        assert_eq!(history.entries[0].stack_hash, "5");
        assert_eq!(history.last().map(|e| e.applied), Some(MAX_HISTORY + 4));
    }
}
