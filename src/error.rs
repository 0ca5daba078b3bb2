//! Error types for the stackweave planner.
//!
//! Errors are split by the phase that raises them. Build-time errors
//! ([`GraphError`], [`ScheduleError`]) abort a planning pass before any side
//! effect. Runtime errors ([`ProviderError`], [`NodeError`]) are attached to a
//! single node and never abort the pass.

use std::path::PathBuf;
use thiserror::Error;

use crate::graph::ResourceId;

/// The main error type for stackweave.
#[derive(Debug, Error)]
pub enum StackError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Dependency graph construction errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Scheduling errors.
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// Manifest store errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Object sync errors.
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The stack file was not found.
    #[error("Stack file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The stack file could not be parsed.
    #[error("Failed to parse stack file: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Stack validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing or malformed.
    #[error("Invalid environment variable {name}: {message}")]
    InvalidEnvVar {
        /// Name of the variable.
        name: String,
        /// What was wrong with it.
        message: String,
    },

    /// An attribute reference marker could not be parsed.
    #[error("Invalid attribute reference '{raw}': expected '<resource>.<attribute>'")]
    InvalidReference {
        /// The raw marker text.
        raw: String,
    },
}

/// Errors raised while assembling the dependency graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// An attribute references a node that is not part of the input set.
    #[error("Resource '{owner}' attribute '{attribute}' references unknown resource '{referenced}'")]
    UnknownReference {
        /// Node owning the attribute.
        owner: ResourceId,
        /// Node that was referenced.
        referenced: ResourceId,
        /// Attribute path where the reference was found.
        attribute: String,
    },

    /// An explicit dependency names a node that is not part of the input set.
    #[error("Resource '{owner}' depends on unknown resource '{dependency}'")]
    UnknownDependency {
        /// Node declaring the dependency.
        owner: ResourceId,
        /// The missing dependency.
        dependency: ResourceId,
    },

    /// Two nodes share the same identifier.
    #[error("Duplicate resource id: {id}")]
    DuplicateResource {
        /// The duplicated identifier.
        id: ResourceId,
    },
}

/// Errors raised while scheduling a dependency graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// The graph contains a cycle.
    #[error("Cyclic dependency: {}", render_cycle(.cycle))]
    CyclicDependency {
        /// Nodes forming the cycle in edge order; the last node depends on the first.
        cycle: Vec<ResourceId>,
    },

    /// A resource that stays present depends on a resource being deleted.
    #[error("Resource '{dependent}' cannot be applied: its dependency '{dependency}' is scheduled for deletion")]
    UnsatisfiableOrdering {
        /// Node that is created or updated.
        dependent: ResourceId,
        /// Node that is deleted.
        dependency: ResourceId,
    },
}

/// Errors returned by a provider collaborator for a single node.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider rejected the declared state.
    #[error("{kind} rejected: {message}")]
    Rejected {
        /// Resource kind.
        kind: String,
        /// Provider message.
        message: String,
    },

    /// The provider has no handler for this kind.
    #[error("Unsupported resource kind: {kind}")]
    Unsupported {
        /// Resource kind.
        kind: String,
    },

    /// A transient failure (throttling, network).
    #[error("Transient provider failure: {message}")]
    Transient {
        /// Provider message.
        message: String,
    },

    /// The remote object does not exist.
    #[error("Remote resource not found: {id}")]
    NotFound {
        /// Identifier of the missing resource.
        id: String,
    },
}

/// Terminal error attached to a node that did not reach its desired state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A node this one depends on did not reach its required state.
    #[error("Dependency '{ancestor}' failed: {error}")]
    DependencyFailed {
        /// The ancestor whose failure caused the skip.
        ancestor: ResourceId,
        /// The ancestor's own error.
        error: Box<NodeError>,
    },

    /// The run was cancelled before this node started.
    #[error("Cancelled before start")]
    Cancelled,

    /// A referenced output attribute was missing after its node applied.
    #[error("Unresolved attribute reference: {reference}")]
    UnresolvedReference {
        /// The reference, rendered as `resource.attribute`.
        reference: String,
    },
}

/// Manifest store errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// Manifest not found.
    #[error("Manifest not found: {path}")]
    NotFound {
        /// Path or key of the missing manifest.
        path: PathBuf,
    },

    /// Stored data is corrupted.
    #[error("Manifest is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Lock acquisition failed.
    #[error("Failed to acquire sync lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// Lock is held by another process.
    #[error("Sync is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Local filesystem backend error.
    #[error("Local manifest backend error: {message}")]
    LocalError {
        /// Description of the error.
        message: String,
    },

    /// S3 backend error.
    #[error("S3 manifest backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("Manifest serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// The stored manifest or the local tree changed after a plan was approved.
    #[error("Sync target '{target}' changed since the plan was made; plan again")]
    StalePlan {
        /// Sync target whose state moved.
        target: String,
    },

    /// Manifest format version mismatch.
    #[error("Manifest version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected version.
        expected: String,
        /// Found version.
        found: String,
    },
}

/// Object sync errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The sync root does not exist or is not a directory.
    #[error("Sync root is not a directory: {path}")]
    InvalidRoot {
        /// The configured root.
        path: PathBuf,
    },

    /// Walking the tree failed.
    #[error("Failed to walk {path}: {message}")]
    Walk {
        /// Path being visited.
        path: PathBuf,
        /// Underlying error.
        message: String,
    },

    /// A file name cannot be used as an object key.
    #[error("Path is not valid UTF-8: {path}")]
    InvalidPath {
        /// Offending path as found on disk.
        path: PathBuf,
    },

    /// Reading a file for hashing failed.
    #[error("Failed to read {path}: {source}")]
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for stackweave operations.
pub type Result<T> = std::result::Result<T, StackError>;

fn render_cycle(cycle: &[ResourceId]) -> String {
    cycle
        .iter()
        .chain(cycle.first())
        .map(ResourceId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl StackError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::State(StateError::LockFailed { .. } | StateError::S3Error { .. })
        )
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        if !self.is_retryable() {
            return None;
        }
        match self {
            Self::State(StateError::LockFailed { .. }) => Some(2),
            _ => Some(5),
        }
    }

    /// Returns true if this error was raised before any side effect.
    #[must_use]
    pub const fn is_build_time(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Graph(_) | Self::Schedule(_))
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a local backend error with the given message.
    #[must_use]
    pub fn local(message: impl Into<String>) -> Self {
        Self::LocalError {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a rejection error.
    #[must_use]
    pub fn rejected(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

impl NodeError {
    /// Wraps this error as the cause of a dependent's skip.
    ///
    /// If this error is itself a dependency failure, the original ancestor is
    /// kept so every skipped node names the node that actually failed.
    #[must_use]
    pub fn propagate_from(&self, id: &ResourceId) -> Self {
        match self {
            Self::DependencyFailed { .. } | Self::Cancelled => self.clone(),
            _ => Self::DependencyFailed {
                ancestor: id.clone(),
                error: Box::new(self.clone()),
            },
        }
    }

    /// Returns the id of the originating ancestor for dependency failures.
    #[must_use]
    pub const fn failed_ancestor(&self) -> Option<&ResourceId> {
        match self {
            Self::DependencyFailed { ancestor, .. } => Some(ancestor),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_rendering() {
        let err = ScheduleError::CyclicDependency {
            cycle: vec![ResourceId::from("a"), ResourceId::from("b")],
        };
        assert_eq!(err.to_string(), "Cyclic dependency: a -> b -> a");
    }

    #[test]
    fn test_propagation_keeps_original_ancestor() {
        let root = NodeError::Provider(ProviderError::rejected("s3_bucket", "denied"));
        let first = root.propagate_from(&ResourceId::from("bucket"));
        let second = first.propagate_from(&ResourceId::from("policy"));

        assert_eq!(second.failed_ancestor(), Some(&ResourceId::from("bucket")));
        assert_eq!(first, second);
    }

    #[test]
    fn test_build_time_classification() {
        let err = StackError::from(GraphError::DuplicateResource {
            id: ResourceId::from("x"),
        });
        assert!(err.is_build_time());
        assert!(!StackError::internal("boom").is_build_time());
    }
}
