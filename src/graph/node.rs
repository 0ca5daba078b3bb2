//! Resource nodes: typed units of desired state.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;

use super::value::{AttributeReference, AttributeValue, Attributes};

/// Identifier of a resource node, unique within one graph.
///
/// Ordering is lexicographic; it drives every deterministic tie-break in
/// scheduling and output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

/// The state a node should be reconciled to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    /// The resource should be created.
    #[default]
    Create,
    /// The resource exists and should be updated.
    Update,
    /// The resource should be removed.
    Delete,
}

/// Runtime status of a node during one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Not started.
    Pending,
    /// Provider call issued, not yet settled.
    InProgress,
    /// Created or updated successfully.
    Applied,
    /// Deleted successfully.
    Deleted,
    /// The provider call failed.
    Failed,
    /// Never started (dependency failure or cancellation).
    Skipped,
}

/// A typed unit of desired infrastructure state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    /// Unique identifier.
    pub id: ResourceId,
    /// Resource kind understood by the provider (`s3_bucket`, `instance`, ...).
    pub kind: String,
    /// Declared attributes, possibly embedding references.
    #[serde(default)]
    pub attributes: Attributes,
    /// Explicit ordering hints.
    #[serde(default)]
    pub explicit_deps: BTreeSet<ResourceId>,
    /// Desired state for this pass.
    #[serde(default)]
    pub desired_state: DesiredState,
}

impl ResourceId {
    /// Creates a new identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&String> for ResourceId {
    fn from(id: &String) -> Self {
        Self(id.clone())
    }
}

impl Borrow<str> for ResourceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl DesiredState {
    /// Returns true for deletions.
    #[must_use]
    pub const fn is_delete(self) -> bool {
        matches!(self, Self::Delete)
    }
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl NodeStatus {
    /// Returns true once the node will not change status again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Applied | Self::Deleted | Self::Failed | Self::Skipped
        )
    }

    /// Returns true if the node reached its desired state.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Applied | Self::Deleted)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in progress",
            Self::Applied => "applied",
            Self::Deleted => "deleted",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

impl ResourceNode {
    /// Creates a node with no attributes or dependencies, desired state `Create`.
    #[must_use]
    pub fn new(id: impl Into<ResourceId>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            attributes: Attributes::new(),
            explicit_deps: BTreeSet::new(),
            desired_state: DesiredState::Create,
        }
    }

    /// Sets an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Adds an explicit dependency.
    #[must_use]
    pub fn depends_on(mut self, id: impl Into<ResourceId>) -> Self {
        self.explicit_deps.insert(id.into());
        self
    }

    /// Sets the desired state.
    #[must_use]
    pub const fn with_desired_state(mut self, desired_state: DesiredState) -> Self {
        self.desired_state = desired_state;
        self
    }

    /// Returns true if this node is scheduled for deletion.
    #[must_use]
    pub const fn is_delete(&self) -> bool {
        self.desired_state.is_delete()
    }

    /// Returns every attribute reference, paired with its attribute path.
    #[must_use]
    pub fn references(&self) -> Vec<(String, AttributeReference)> {
        let mut out = Vec::new();
        for (key, value) in &self.attributes {
            value.collect_references(key, &mut out);
        }
        out
    }

    /// Returns the first reference not yet substituted.
    #[must_use]
    pub fn first_unresolved(&self) -> Option<&AttributeReference> {
        self.attributes.values().find_map(AttributeValue::first_unresolved)
    }
}

impl fmt::Display for ResourceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.desired_state, self.id, self.kind)
    }
}
