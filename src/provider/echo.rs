//! A provider that performs no remote calls.
//!
//! `EchoProvider` answers every apply with the node's declared attributes
//! plus synthesized `id` and `arn` outputs. It backs the CLI's local mode and
//! the test suites, and can be told to fail selected nodes.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ProviderError;
use crate::graph::{AppliedAttributes, AttributeValue, DesiredState, ResourceId, ResourceNode};

use super::Provider;

/// A recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    /// Node the call was made for.
    pub id: ResourceId,
    /// Operation requested.
    pub action: DesiredState,
}

/// In-memory provider echoing declared attributes back as outputs.
#[derive(Debug, Default)]
pub struct EchoProvider {
    failing: BTreeSet<ResourceId>,
    latency: Option<Duration>,
    calls: Mutex<Vec<ProviderCall>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl EchoProvider {
    /// Creates a provider that succeeds for every node.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call for `id` fail with a rejection.
    #[must_use]
    pub fn failing_on(mut self, id: impl Into<ResourceId>) -> Self {
        self.failing.insert(id.into());
        self
    }

    /// Delays every call by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Calls made so far, in completion order.
    pub async fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().await.clone()
    }

    /// Number of calls made so far.
    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    /// Highest number of simultaneous calls observed.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn record(&self, node: &ResourceNode, action: DesiredState) -> Result<(), ProviderError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.lock().await.push(ProviderCall {
            id: node.id.clone(),
            action,
        });

        if self.failing.contains(&node.id) {
            return Err(ProviderError::rejected(
                &node.kind,
                format!("{action} of '{}' rejected by echo provider", node.id),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for EchoProvider {
    async fn apply(&self, node: &ResourceNode) -> Result<AppliedAttributes, ProviderError> {
        self.record(node, node.desired_state).await?;

        let mut outputs = node.attributes.clone();
        let id = outputs
            .get("id")
            .and_then(AttributeValue::as_str)
            .map_or_else(|| node.id.to_string(), str::to_string);
        outputs.insert(
            String::from("arn"),
            AttributeValue::from(format!("arn:stackweave:{}:::{id}", node.kind)),
        );
        outputs.insert(String::from("id"), AttributeValue::from(id));

        debug!("echo: applied {}", node.id);
        Ok(outputs)
    }

    async fn delete(&self, node: &ResourceNode) -> Result<(), ProviderError> {
        self.record(node, DesiredState::Delete).await?;
        debug!("echo: deleted {}", node.id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_apply_synthesizes_outputs() {
        let provider = EchoProvider::new();
        let node = ResourceNode::new("site-bucket", "s3_bucket").with_attribute("bucket", "my-site");

        let outputs = provider.apply(&node).await.expect("echo apply");

        assert_eq!(outputs.get("bucket").and_then(AttributeValue::as_str), Some("my-site"));
        assert_eq!(outputs.get("id").and_then(AttributeValue::as_str), Some("site-bucket"));
        assert_eq!(
            outputs.get("arn").and_then(AttributeValue::as_str),
            Some("arn:stackweave:s3_bucket:::site-bucket")
        );
        assert_eq!(provider.call_count().await, 1);
    }

    #[tokio::test]
    async fn test_failing_node() {
        let provider = EchoProvider::new().failing_on("broken");
        let node = ResourceNode::new("broken", "instance");

        let err = provider.delete(&node).await.expect_err("configured to fail");
        assert!(matches!(err, ProviderError::Rejected { .. }));
        assert_eq!(
            provider.calls().await,
            vec![ProviderCall {
                id: ResourceId::from("broken"),
                action: DesiredState::Delete,
            }]
        );
    }
}
