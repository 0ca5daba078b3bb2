//! Stack file specification types.
//!
//! This module defines the structs that map to `stackweave.yaml`. A stack
//! declares resources, object sync targets and how a run executes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::graph::{Attributes, DesiredState, ResourceNode};
use crate::planner::DEFAULT_CONCURRENCY_LIMIT;

/// Default kind of generated object nodes.
pub const DEFAULT_OBJECT_KIND: &str = "s3_object";

/// Kind of the node standing for a whole sync target in the declared ordering.
pub const SYNC_TARGET_KIND: &str = "sync_target";

/// The root of a stack file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// Manifest store configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Execution settings.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Declared resources.
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
    /// Local directories mirrored into buckets.
    #[serde(default)]
    pub sync: Vec<SyncTarget>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Project name.
    pub name: String,
    /// Environment (e.g., "dev", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Preferred provider region.
    #[serde(default)]
    pub region: Option<String>,
}

/// Manifest store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: StateBackend,
    /// State directory (local backend).
    #[serde(default)]
    pub path: Option<String>,
    /// S3 bucket name (required for the s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix.
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region, AWS default if unset.
    #[serde(default)]
    pub region: Option<String>,
}

/// Manifest store backends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Files under `.stackweave/`.
    #[default]
    Local,
    /// Objects in an S3 bucket.
    S3,
}

/// Execution settings of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// Maximum provider calls in flight across all waves.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// Plan only.
    #[serde(default)]
    pub dry_run: bool,
    /// Cancel the run after this many seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// A declared resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceSpec {
    /// Unique identifier.
    pub id: String,
    /// Resource kind.
    pub kind: String,
    /// Desired state.
    #[serde(default)]
    pub action: DesiredState,
    /// Explicit ordering hints.
    ///
    /// Naming a sync target waits for every upload of that target.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Attribute bag; `{"$ref": "<id>.<attr>"}` embeds a reference and
    /// `{"$template": "..${<id>.<attr>}.."}` an interpolated string.
    #[serde(default)]
    pub attributes: Attributes,
}

/// A local directory mirrored into a bucket resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncTarget {
    /// Target name, prefixes generated node ids and keys the manifest.
    pub name: String,
    /// Directory to mirror, relative to the stack file.
    pub root_directory: PathBuf,
    /// Id of the bucket resource objects are uploaded into.
    pub bucket: String,
    /// Extra resources every object waits for.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Prefix prepended to every object key.
    #[serde(default)]
    pub key_prefix: String,
    /// Kind of generated object nodes.
    #[serde(default = "default_object_kind")]
    pub object_kind: String,
    /// Extension to content-type overrides.
    #[serde(default)]
    pub content_types: BTreeMap<String, String>,
}

fn default_environment() -> String {
    String::from("dev")
}

const fn default_concurrency_limit() -> usize {
    DEFAULT_CONCURRENCY_LIMIT
}

fn default_object_kind() -> String {
    String::from(DEFAULT_OBJECT_KIND)
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            dry_run: false,
            timeout_secs: None,
        }
    }
}

impl StackConfig {
    /// Returns the project name qualified with its environment.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.project.name, self.project.environment)
    }

    /// Builds the declared resource nodes.
    #[must_use]
    pub fn resource_nodes(&self) -> Vec<ResourceNode> {
        self.resources.iter().map(ResourceSpec::to_node).collect()
    }

    /// Looks up a sync target by name.
    #[must_use]
    pub fn sync_target(&self, name: &str) -> Option<&SyncTarget> {
        self.sync.iter().find(|t| t.name == name)
    }
}

impl ResourceSpec {
    /// Converts the declaration into a graph node.
    #[must_use]
    pub fn to_node(&self) -> ResourceNode {
        ResourceNode {
            id: self.id.as_str().into(),
            kind: self.kind.clone(),
            attributes: self.attributes.clone(),
            explicit_deps: self.depends_on.iter().map(Into::into).collect(),
            desired_state: self.action,
        }
    }
}

impl SyncTarget {
    /// Node standing for the whole target in the declared ordering.
    ///
    /// It carries the edges every generated object node gets, so ordering
    /// through the target can be checked even when nothing is uploaded.
    #[must_use]
    pub fn to_node(&self) -> ResourceNode {
        self.depends_on.iter().fold(
            ResourceNode::new(self.name.as_str(), SYNC_TARGET_KIND).depends_on(self.bucket.as_str()),
            |node, dep| node.depends_on(dep.as_str()),
        )
    }

    /// Resolves the root directory against `base_dir` unless it is absolute.
    #[must_use]
    pub fn resolve_root(&self, base_dir: &Path) -> PathBuf {
        if self.root_directory.is_absolute() {
            self.root_directory.clone()
        } else {
            base_dir.join(&self.root_directory)
        }
    }
}
