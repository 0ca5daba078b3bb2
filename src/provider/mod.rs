//! Provider collaborator interface.
//!
//! The planner never knows what a bucket or an instance is. Every resource
//! kind is handled by a [`Provider`] that reconciles one node at a time and
//! reports the node's output attributes.

mod echo;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::graph::{AppliedAttributes, ResourceNode};

pub use echo::{EchoProvider, ProviderCall};

/// Reconciles single resource nodes against a remote system.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Creates or updates the resource described by `node`.
    ///
    /// All attribute references of `node` are already substituted.
    async fn apply(&self, node: &ResourceNode) -> Result<AppliedAttributes, ProviderError>;

    /// Removes the resource described by `node`.
    async fn delete(&self, node: &ResourceNode) -> Result<(), ProviderError>;

    /// Provider name, for logs.
    fn name(&self) -> &'static str;
}

#[async_trait]
impl Provider for Box<dyn Provider> {
    async fn apply(&self, node: &ResourceNode) -> Result<AppliedAttributes, ProviderError> {
        (**self).apply(node).await
    }

    async fn delete(&self, node: &ResourceNode) -> Result<(), ProviderError> {
        (**self).delete(node).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
