//! Object sync planning.
//!
//! Mirrors a local directory into a bucket resource. The engine fingerprints
//! the tree, diffs it against the manifest of the last successful sync and
//! emits one object node per changed file. Unchanged files produce no node,
//! so a repeated sync without local changes issues no provider calls.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::SyncTarget;
use crate::error::SyncError;
use crate::graph::{AttributeReference, DesiredState, ResourceId, ResourceNode};
use crate::state::{FileManifest, FileManifestEntry};

use super::diff::{FileChange, ManifestDiff};
use super::mime::MimeTable;
use super::walker::{FileWalker, hash_file};

/// Output attribute of the bucket resource used as the object's bucket.
const BUCKET_OUTPUT: &str = "id";

/// Object nodes and the manifest to persist for one sync target.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    /// Sync target name.
    pub target: String,
    /// Generated object nodes, sorted by id.
    pub nodes: Vec<ResourceNode>,
    /// Manifest of the current tree, saved once every node succeeded.
    pub manifest: FileManifest,
    /// Number of new files.
    pub created: usize,
    /// Number of modified files.
    pub updated: usize,
    /// Number of removed files.
    pub deleted: usize,
    /// Number of unchanged files.
    pub unchanged: usize,
}

/// Plans object sync for stack sync targets.
#[derive(Debug, Clone)]
pub struct SyncEngine {
    base_dir: PathBuf,
}

impl SyncEngine {
    /// Creates an engine resolving relative roots against `base_dir`.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Directory relative sync roots are resolved against.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Fingerprints the target's tree.
    ///
    /// # Errors
    ///
    /// Fails if the root is not a directory or a file cannot be read.
    pub fn scan(&self, target: &SyncTarget) -> Result<FileManifest, SyncError> {
        let root = target.resolve_root(&self.base_dir);
        let mime = target
            .content_types
            .iter()
            .fold(MimeTable::new(), |table, (ext, content_type)| {
                table.with_override(ext, content_type.as_str())
            });

        let mut manifest = FileManifest::new(&target.name);
        for file in FileWalker::new(&root).walk()? {
            manifest.insert(FileManifestEntry {
                content_hash: hash_file(&file.path)?,
                content_type: mime.lookup(&file.path).map(str::to_string),
                relative_path: file.relative_path,
            });
        }

        debug!(
            "Scanned {} files for sync target '{}' under {}",
            manifest.len(),
            target.name,
            root.display()
        );
        Ok(manifest)
    }

    /// Plans the sync of `target` against the manifest of its last sync.
    ///
    /// # Errors
    ///
    /// Fails if the tree cannot be scanned.
    pub fn plan(
        &self,
        target: &SyncTarget,
        previous: Option<&FileManifest>,
    ) -> Result<SyncPlan, SyncError> {
        let manifest = self.scan(target)?;
        let diff = ManifestDiff::compute(previous, &manifest);
        let root = absolute_root(&target.resolve_root(&self.base_dir));

        let nodes = diff
            .changes
            .iter()
            .map(|change| object_node(target, &root, change))
            .collect::<Result<Vec<_>, _>>()?;

        info!("Sync target '{}': {}", target.name, diff);

        Ok(SyncPlan {
            target: target.name.clone(),
            nodes,
            manifest,
            created: diff.created,
            updated: diff.updated,
            deleted: diff.deleted,
            unchanged: diff.unchanged,
        })
    }
}

impl SyncPlan {
    /// Returns true if any object must be touched.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.nodes.is_empty()
    }

    /// Ids of the nodes creating or updating objects.
    #[must_use]
    pub fn upload_ids(&self) -> Vec<ResourceId> {
        self.nodes
            .iter()
            .filter(|node| !node.is_delete())
            .map(|node| node.id.clone())
            .collect()
    }

    /// Returns true if `previous` differs from the manifest of this plan.
    #[must_use]
    pub fn manifest_changed(&self, previous: Option<&FileManifest>) -> bool {
        previous.is_none_or(|p| !p.same_entries(&self.manifest))
    }
}

/// Id of the object node generated for `relative_path`.
#[must_use]
pub fn object_node_id(target: &str, relative_path: &str) -> ResourceId {
    ResourceId::new(format!("{target}/{relative_path}"))
}

fn object_node(
    target: &SyncTarget,
    root: &Path,
    change: &FileChange,
) -> Result<ResourceNode, SyncError> {
    let mut node = ResourceNode::new(
        object_node_id(&target.name, &change.relative_path),
        target.object_kind.as_str(),
    )
    .with_desired_state(change.action)
    .with_attribute(
        "bucket",
        AttributeReference::new(target.bucket.as_str(), BUCKET_OUTPUT),
    )
    .with_attribute("key", format!("{}{}", target.key_prefix, change.relative_path));

    if change.action != DesiredState::Delete {
        let source = root.join(&change.relative_path);
        let source = source
            .to_str()
            .ok_or_else(|| SyncError::InvalidPath {
                path: source.clone(),
            })?
            .to_string();
        node = node.with_attribute("source", source);

        if let Some(content_type) = change.new.as_ref().and_then(|e| e.content_type.clone()) {
            node = node.with_attribute("content_type", content_type);
        }
    }

    for dep in &target.depends_on {
        node = node.depends_on(dep.as_str());
    }

    Ok(node)
}

fn absolute_root(root: &Path) -> PathBuf {
    std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AttributeValue;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    fn target() -> SyncTarget {
        SyncTarget {
            name: String::from("website"),
            root_directory: PathBuf::from("site"),
            bucket: String::from("site-bucket"),
            depends_on: vec![String::from("site-policy")],
            key_prefix: String::new(),
            object_kind: String::from("s3_object"),
            content_types: BTreeMap::new(),
        }
    }

    fn site(files: &[(&str, &str)]) -> TempDir {
        let temp = TempDir::new().expect("temp dir");
        let root = temp.path().join("site");
        fs::create_dir_all(&root).expect("mkdir");
        for (path, content) in files {
            fs::write(root.join(path), content).expect("write");
        }
        temp
    }

    fn actions(plan: &SyncPlan) -> Vec<(String, DesiredState)> {
        plan.nodes
            .iter()
            .map(|n| (n.id.to_string(), n.desired_state))
            .collect()
    }

    #[test]
    fn test_first_sync_creates_every_file() {
        let temp = site(&[("a.txt", "alpha"), ("b.html", "<p>b</p>")]);
        let plan = SyncEngine::new(temp.path())
            .plan(&target(), None)
            .expect("plan");

        assert_eq!(
            actions(&plan),
            vec![
                (String::from("website/a.txt"), DesiredState::Create),
                (String::from("website/b.html"), DesiredState::Create),
            ]
        );
        assert_eq!(plan.manifest.len(), 2);
        assert!(plan.manifest_changed(None));
    }

    #[test]
    fn test_second_sync_only_touches_changes() {
        let temp = site(&[("a.txt", "alpha"), ("b.html", "<p>b</p>")]);
        let engine = SyncEngine::new(temp.path());
        let first = engine.plan(&target(), None).expect("first plan");

        fs::remove_file(temp.path().join("site/a.txt")).expect("remove");
        fs::write(temp.path().join("site/c.css"), "body{}").expect("write");

        let second = engine
            .plan(&target(), Some(&first.manifest))
            .expect("second plan");

        assert_eq!(
            actions(&second),
            vec![
                (String::from("website/a.txt"), DesiredState::Delete),
                (String::from("website/c.css"), DesiredState::Create),
            ]
        );
        assert_eq!(second.unchanged, 1);
    }

    #[test]
    fn test_unchanged_tree_plans_nothing() {
        let temp = site(&[("index.html", "<html/>")]);
        let engine = SyncEngine::new(temp.path());
        let first = engine.plan(&target(), None).expect("first plan");
        let again = engine
            .plan(&target(), Some(&first.manifest))
            .expect("second plan");

        assert!(!again.has_changes());
        assert!(!again.manifest_changed(Some(&first.manifest)));
    }

    #[test]
    fn test_object_node_attributes() {
        let temp = site(&[("index.html", "<html/>"), ("blob.bin", "x")]);
        let mut target = target();
        target.key_prefix = String::from("www/");

        let plan = SyncEngine::new(temp.path())
            .plan(&target, None)
            .expect("plan");
        let index = plan
            .nodes
            .iter()
            .find(|n| n.id.as_str() == "website/index.html")
            .expect("index node");

        assert_eq!(index.kind, "s3_object");
        assert_eq!(
            index.attributes.get("bucket"),
            Some(&AttributeValue::Reference(AttributeReference::new(
                "site-bucket",
                "id"
            )))
        );
        assert_eq!(
            index.attributes.get("key").and_then(AttributeValue::as_str),
            Some("www/index.html")
        );
        assert_eq!(
            index.attributes.get("content_type").and_then(AttributeValue::as_str),
            Some("text/html")
        );
        assert!(index.explicit_deps.contains("site-policy"));

        let blob = plan
            .nodes
            .iter()
            .find(|n| n.id.as_str() == "website/blob.bin")
            .expect("blob node");
        assert!(!blob.attributes.contains_key("content_type"));
    }

    #[test]
    fn test_content_type_override_is_an_update() {
        let temp = site(&[("notes.txt", "n")]);
        let engine = SyncEngine::new(temp.path());
        let first = engine.plan(&target(), None).expect("first plan");

        let mut overridden = target();
        overridden
            .content_types
            .insert(String::from("txt"), String::from("text/plain; charset=utf-8"));

        let second = engine
            .plan(&overridden, Some(&first.manifest))
            .expect("second plan");
        assert_eq!(
            actions(&second),
            vec![(String::from("website/notes.txt"), DesiredState::Update)]
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_names_fail_the_plan() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp = site(&[("index.html", "<html/>")]);
        let root = temp.path().join("site");
        fs::write(root.join(OsStr::from_bytes(b"a\xff.txt")), "one").expect("write");
        fs::write(root.join(OsStr::from_bytes(b"a\xfe.txt")), "two").expect("write");

        let result = SyncEngine::new(temp.path()).plan(&target(), None);
        assert!(matches!(result, Err(SyncError::InvalidPath { .. })));
    }

    #[test]
    fn test_source_points_at_the_file() {
        let temp = site(&[("index.html", "<html/>")]);
        let plan = SyncEngine::new(temp.path())
            .plan(&target(), None)
            .expect("plan");

        let source = plan.nodes[0]
            .attributes
            .get("source")
            .and_then(AttributeValue::as_str)
            .expect("source attribute");
        assert!(Path::new(source).is_file());
    }

    #[test]
    fn test_missing_root() {
        let temp = TempDir::new().expect("temp dir");
        let result = SyncEngine::new(temp.path()).plan(&target(), None);
        assert!(matches!(result, Err(SyncError::InvalidRoot { .. })));
    }
}
