//! Manifest diffing.
//!
//! Compares the manifest computed from the current tree with the manifest
//! persisted by the previous successful sync.

use std::collections::BTreeSet;
use tracing::debug;

use crate::graph::DesiredState;
use crate::state::{FileManifest, FileManifestEntry};

/// Change detected for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// Path relative to the sync root.
    pub relative_path: String,
    /// Operation needed to bring the remote copy in line.
    pub action: DesiredState,
    /// Fingerprint before the change.
    pub old: Option<FileManifestEntry>,
    /// Fingerprint after the change.
    pub new: Option<FileManifestEntry>,
}

/// Complete diff between two manifests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDiff {
    /// Changed files, sorted by relative path.
    pub changes: Vec<FileChange>,
    /// Number of new files.
    pub created: usize,
    /// Number of modified files.
    pub updated: usize,
    /// Number of removed files.
    pub deleted: usize,
    /// Number of unchanged files.
    pub unchanged: usize,
}

impl ManifestDiff {
    /// Diffs `current` against `previous`.
    ///
    /// A missing previous manifest behaves like an empty one.
    #[must_use]
    pub fn compute(previous: Option<&FileManifest>, current: &FileManifest) -> Self {
        let mut diff = Self::default();

        let paths: BTreeSet<&String> = current
            .entries
            .keys()
            .chain(previous.into_iter().flat_map(|m| m.entries.keys()))
            .collect();

        for path in paths {
            let old = previous.and_then(|m| m.get(path));
            let new = current.get(path);

            let action = match (old, new) {
                (None, Some(_)) => DesiredState::Create,
                (Some(o), Some(n)) if o.differs_from(n) => DesiredState::Update,
                (Some(_), None) => DesiredState::Delete,
                _ => {
                    diff.unchanged += 1;
                    continue;
                }
            };

            match action {
                DesiredState::Create => diff.created += 1,
                DesiredState::Update => diff.updated += 1,
                DesiredState::Delete => diff.deleted += 1,
            }
            debug!("{action} {path}");
            diff.changes.push(FileChange {
                relative_path: path.clone(),
                action,
                old: old.cloned(),
                new: new.cloned(),
            });
        }

        diff
    }

    /// Returns true if any file changed.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

impl std::fmt::Display for ManifestDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} unchanged",
            self.created, self.updated, self.deleted, self.unchanged
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(files: &[(&str, &str)]) -> FileManifest {
        let mut manifest = FileManifest::new("website");
        for (path, hash) in files {
            manifest.insert(FileManifestEntry {
                relative_path: (*path).to_string(),
                content_hash: (*hash).to_string(),
                content_type: None,
            });
        }
        manifest
    }

    #[test]
    fn test_first_sync_creates_everything() {
        let current = manifest(&[("a.txt", "1"), ("b.html", "2")]);
        let diff = ManifestDiff::compute(None, &current);

        assert_eq!(diff.created, 2);
        assert!(diff.changes.iter().all(|c| c.action == DesiredState::Create));
    }

    #[test]
    fn test_mixed_changes() {
        let previous = manifest(&[("a.txt", "1"), ("b.html", "2"), ("d.js", "4")]);
        let current = manifest(&[("b.html", "2"), ("c.css", "3"), ("d.js", "5")]);

        let diff = ManifestDiff::compute(Some(&previous), &current);

        let actions: Vec<_> = diff
            .changes
            .iter()
            .map(|c| (c.relative_path.as_str(), c.action))
            .collect();
        assert_eq!(
            actions,
            vec![
                ("a.txt", DesiredState::Delete),
                ("c.css", DesiredState::Create),
                ("d.js", DesiredState::Update),
            ]
        );
        assert_eq!(diff.unchanged, 1);
        assert_eq!(diff.to_string(), "1 to create, 1 to update, 1 to delete, 1 unchanged");
    }

    #[test]
    fn test_identical_manifests() {
        let m = manifest(&[("a.txt", "1")]);
        assert!(!ManifestDiff::compute(Some(&m), &m).has_changes());
    }
}
