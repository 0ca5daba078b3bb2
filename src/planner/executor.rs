//! Plan executor.
//!
//! Waves run strictly in sequence; nodes inside a wave run concurrently,
//! bounded by one semaphore shared across the whole run. After each wave the
//! outputs of applied nodes are substituted into the attribute references of
//! nodes that have not run yet. A failure only affects nodes that depend on
//! the failed node.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ExecutionConfig;
use crate::error::{NodeError, ProviderError};
use crate::graph::{
    AppliedAttributes, DependencyGraph, DesiredState, NodeStatus, ResourceId, ResourceNode,
};
use crate::provider::Provider;

use super::plan::{ApplyPlan, PlanEntry};

/// Default number of simultaneous provider calls.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 4;

/// Options for one execution run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Maximum number of provider calls in flight across all waves.
    pub concurrency_limit: usize,
    /// Plan only; never call the provider.
    pub dry_run: bool,
}

/// Terminal outcome of one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeResult {
    /// Node identifier.
    pub id: ResourceId,
    /// Resource kind.
    pub kind: String,
    /// Operation that was requested.
    pub action: DesiredState,
    /// Terminal status.
    pub status: NodeStatus,
    /// Outputs reported by the provider, for applied nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<AppliedAttributes>,
    /// Originating error, for failed and skipped nodes.
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_error")]
    pub error: Option<NodeError>,
}

/// Result of executing a whole plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionReport {
    /// One result per planned node.
    pub results: BTreeMap<ResourceId, NodeResult>,
    /// Number of nodes created or updated.
    pub applied: usize,
    /// Number of nodes deleted.
    pub deleted: usize,
    /// Number of nodes whose provider call failed.
    pub failed: usize,
    /// Number of nodes never started.
    pub skipped: usize,
    /// Whether the run was cancelled before completing.
    pub cancelled: bool,
}

/// Executes apply plans against a provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanExecutor {
    options: ExecutorOptions,
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<NodeError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            dry_run: false,
        }
    }
}

impl From<&ExecutionConfig> for ExecutorOptions {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            concurrency_limit: config.concurrency_limit,
            dry_run: config.dry_run,
        }
    }
}

impl NodeResult {
    fn new(node: &ResourceNode, status: NodeStatus) -> Self {
        Self {
            id: node.id.clone(),
            kind: node.kind.clone(),
            action: node.desired_state,
            status,
            outputs: None,
            error: None,
        }
    }

    fn failed(node: &ResourceNode, error: NodeError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(node, NodeStatus::Failed)
        }
    }

    fn skipped(node: &ResourceNode, error: NodeError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(node, NodeStatus::Skipped)
        }
    }
}

impl PlanExecutor {
    /// Creates an executor.
    #[must_use]
    pub const fn new(options: ExecutorOptions) -> Self {
        Self { options }
    }

    /// Returns the executor options.
    #[must_use]
    pub const fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Executes `plan`.
    ///
    /// Every node of the plan appears exactly once in the report. Provider
    /// failures never abort the run; they mark the failing node `Failed` and
    /// its dependents `Skipped`. Once `cancel` fires, calls already in flight
    /// finish and every node not yet started is skipped.
    pub async fn execute(
        &self,
        plan: &ApplyPlan,
        graph: &DependencyGraph,
        provider: &dyn Provider,
        cancel: CancellationToken,
    ) -> ExecutionReport {
        if self.options.dry_run {
            info!("Dry run: {} nodes planned, no provider calls issued", plan.len());
            return ExecutionReport::default();
        }

        info!(
            "Executing plan with {} nodes in {} waves (provider: {}, concurrency: {})",
            plan.len(),
            plan.wave_count(),
            provider.name(),
            self.options.concurrency_limit
        );

        let semaphore = Semaphore::new(self.options.concurrency_limit.max(1));
        let mut report = ExecutionReport::default();
        let mut outputs: BTreeMap<ResourceId, AppliedAttributes> = BTreeMap::new();

        let waves = plan.entries();
        let total = waves.len();
        for (index, wave) in waves.into_iter().enumerate() {
            debug!("Starting wave {}/{} ({} nodes)", index + 1, total, wave.len());

            let mut pending = Vec::new();
            for entry in wave {
                let mut node = graph
                    .node(&entry.id)
                    .cloned()
                    .unwrap_or_else(|| node_from_entry(entry));

                if cancel.is_cancelled() {
                    report.record(NodeResult::skipped(&node, NodeError::Cancelled));
                    continue;
                }

                if let Some(cause) = failed_prerequisite(graph, &node, &report) {
                    warn!("Skipping {}: {}", node.id, cause);
                    report.record(NodeResult::skipped(&node, cause));
                    continue;
                }

                for value in node.attributes.values_mut() {
                    value.substitute(&outputs);
                }
                if !node.is_delete()
                    && let Some(reference) = node.first_unresolved()
                {
                    let err = NodeError::UnresolvedReference {
                        reference: reference.to_string(),
                    };
                    error!("Cannot apply {}: {}", node.id, err);
                    report.record(NodeResult::failed(&node, err));
                    continue;
                }

                pending.push(node);
            }

            let settled = join_all(
                pending
                    .into_iter()
                    .map(|node| run_node(node, provider, &semaphore, &cancel)),
            )
            .await;

            for result in settled {
                if let Some(out) = &result.outputs {
                    outputs.insert(result.id.clone(), out.clone());
                }
                report.record(result);
            }
        }

        report.cancelled = cancel.is_cancelled();
        info!("{report}");
        report
    }
}

/// Cancels `token` if `future` has not finished after `timeout`.
///
/// The future itself keeps running; it is expected to observe the token.
pub async fn run_with_timeout<F: Future>(
    token: &CancellationToken,
    timeout: Option<Duration>,
    future: F,
) -> F::Output {
    let Some(timeout) = timeout else {
        return future.await;
    };

    let watchdog = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!("Timed out after {}s, cancelling remaining nodes", timeout.as_secs());
            token.cancel();
        })
    };

    let output = future.await;
    watchdog.abort();
    output
}

async fn run_node(
    node: ResourceNode,
    provider: &dyn Provider,
    semaphore: &Semaphore,
    cancel: &CancellationToken,
) -> NodeResult {
    let permit = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        permit = semaphore.acquire() => permit.ok(),
    };
    let Some(_permit) = permit else {
        return NodeResult::skipped(&node, NodeError::Cancelled);
    };

    debug!("{} {} ({})", node.desired_state, node.id, node.kind);

    if node.is_delete() {
        match provider.delete(&node).await {
            Ok(()) => {
                info!("Deleted {}", node.id);
                NodeResult::new(&node, NodeStatus::Deleted)
            }
            Err(e) => {
                error!("Failed to delete {}: {}{}", node.id, e, transient_note(&e));
                NodeResult::failed(&node, e.into())
            }
        }
    } else {
        match provider.apply(&node).await {
            Ok(out) => {
                info!("Applied {}", node.id);
                NodeResult {
                    outputs: Some(out),
                    ..NodeResult::new(&node, NodeStatus::Applied)
                }
            }
            Err(e) => {
                error!(
                    "Failed to {} {}: {}{}",
                    node.desired_state,
                    node.id,
                    e,
                    transient_note(&e)
                );
                NodeResult::failed(&node, e.into())
            }
        }
    }
}

const fn transient_note(error: &ProviderError) -> &'static str {
    if error.is_retryable() { " (transient)" } else { "" }
}

/// Returns the error to propagate if a prerequisite of `node` did not succeed.
///
/// A node waits for its dependencies. A deleted node additionally waits for
/// the deletion of every node that depended on it.
fn failed_prerequisite(
    graph: &DependencyGraph,
    node: &ResourceNode,
    report: &ExecutionReport,
) -> Option<NodeError> {
    let dependencies = graph.dependencies_of(&node.id).iter().filter(|dep| {
        !node.is_delete() || graph.node(dep).is_some_and(|d| !d.is_delete())
    });
    let dependents = graph
        .dependents_of(&node.id)
        .iter()
        .filter(|_| node.is_delete());

    dependencies
        .chain(dependents)
        .filter_map(|id| report.results.get(id))
        .find(|r| !r.status.is_success())
        .map(|r| {
            r.error
                .as_ref()
                .map_or(NodeError::Cancelled, |e| e.propagate_from(&r.id))
        })
}

fn node_from_entry(entry: &PlanEntry) -> ResourceNode {
    ResourceNode::new(entry.id.clone(), entry.kind.clone()).with_desired_state(entry.action)
}

impl ExecutionReport {
    fn record(&mut self, result: NodeResult) {
        match result.status {
            NodeStatus::Applied => self.applied += 1,
            NodeStatus::Deleted => self.deleted += 1,
            NodeStatus::Failed => self.failed += 1,
            NodeStatus::Skipped => self.skipped += 1,
            NodeStatus::Pending | NodeStatus::InProgress => {}
        }
        self.results.insert(result.id.clone(), result);
    }

    /// Returns true if every node reached its desired state.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// Looks up the result of one node.
    #[must_use]
    pub fn result(&self, id: &ResourceId) -> Option<&NodeResult> {
        self.results.get(id)
    }

    /// Status of one node, if it was part of the plan.
    #[must_use]
    pub fn status_of(&self, id: &ResourceId) -> Option<NodeStatus> {
        self.results.get(id).map(|r| r.status)
    }

    /// Number of nodes in the report.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if no node was executed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl std::fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Executed {} nodes: {} applied, {} deleted, {} failed, {} skipped",
            self.results.len(),
            self.applied,
            self.deleted,
            self.failed,
            self.skipped
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::graph::{AttributeReference, AttributeValue, GraphBuilder};
    use crate::planner::Scheduler;
    use crate::provider::{EchoProvider, MockProvider};

    fn id(s: &str) -> ResourceId {
        ResourceId::from(s)
    }

    fn schedule(nodes: Vec<ResourceNode>) -> (DependencyGraph, ApplyPlan) {
        let mut builder = GraphBuilder::new();
        builder.add_nodes(nodes);
        let graph = builder.build().expect("valid graph");
        let plan = Scheduler::new().schedule(&graph).expect("acyclic");
        (graph, plan)
    }

    #[tokio::test]
    async fn test_failure_is_contained_to_dependents() {
        let (graph, plan) = schedule(vec![
            ResourceNode::new("a", "x"),
            ResourceNode::new("b", "x").depends_on("a"),
            ResourceNode::new("c", "x").depends_on("b"),
            ResourceNode::new("d", "x"),
        ]);
        let provider = EchoProvider::new().failing_on("a");

        let report = PlanExecutor::default()
            .execute(&plan, &graph, &provider, CancellationToken::new())
            .await;

        assert_eq!(report.status_of(&id("a")), Some(NodeStatus::Failed));
        assert_eq!(report.status_of(&id("b")), Some(NodeStatus::Skipped));
        assert_eq!(report.status_of(&id("c")), Some(NodeStatus::Skipped));
        assert_eq!(report.status_of(&id("d")), Some(NodeStatus::Applied));
        assert!(!report.success());

        let c = report.result(&id("c")).expect("c reported");
        assert_eq!(
            c.error.as_ref().and_then(NodeError::failed_ancestor),
            Some(&id("a"))
        );
        // b and c never reached the provider
        assert_eq!(provider.call_count().await, 2);
    }

    #[tokio::test]
    async fn test_outputs_substituted_into_later_waves() {
        let (graph, plan) = schedule(vec![
            ResourceNode::new("vpc", "vpc"),
            ResourceNode::new("subnet", "subnet")
                .with_attribute("vpc_id", AttributeReference::new("vpc", "id")),
        ]);

        let mut mock = MockProvider::new();
        mock.expect_name().return_const("mock");
        mock.expect_apply()
            .withf(|node| node.id.as_str() == "vpc")
            .times(1)
            .returning(|_| {
                let mut out = AppliedAttributes::new();
                out.insert(String::from("id"), AttributeValue::from("vpc-0abc"));
                Ok(out)
            });
        mock.expect_apply()
            .withf(|node| {
                node.id.as_str() == "subnet"
                    && node.attributes.get("vpc_id") == Some(&AttributeValue::from("vpc-0abc"))
            })
            .times(1)
            .returning(|_| Ok(AppliedAttributes::new()));

        let report = PlanExecutor::default()
            .execute(&plan, &graph, &mock, CancellationToken::new())
            .await;

        assert!(report.success());
        assert_eq!(report.applied, 2);
    }

    #[tokio::test]
    async fn test_missing_output_fails_dependent() {
        let (graph, plan) = schedule(vec![
            ResourceNode::new("vpc", "vpc"),
            ResourceNode::new("subnet", "subnet")
                .with_attribute("vpc_id", AttributeReference::new("vpc", "cidr_block")),
        ]);

        let report = PlanExecutor::default()
            .execute(&plan, &graph, &EchoProvider::new(), CancellationToken::new())
            .await;

        let subnet = report.result(&id("subnet")).expect("subnet reported");
        assert_eq!(subnet.status, NodeStatus::Failed);
        assert_eq!(
            subnet.error,
            Some(NodeError::UnresolvedReference {
                reference: String::from("vpc.cidr_block")
            })
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (graph, plan) = schedule(vec![
            ResourceNode::new("a", "x"),
            ResourceNode::new("b", "x").depends_on("a"),
        ]);
        let provider = EchoProvider::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = PlanExecutor::default()
            .execute(&plan, &graph, &provider, cancel)
            .await;

        assert!(report.cancelled);
        assert_eq!(report.skipped, 2);
        assert!(report.results.values().all(|r| r.error == Some(NodeError::Cancelled)));
        assert_eq!(provider.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_timeout_lets_in_flight_calls_finish() {
        let (graph, plan) = schedule(vec![
            ResourceNode::new("slow", "x"),
            ResourceNode::new("after", "x").depends_on("slow"),
        ]);
        let provider = EchoProvider::new().with_latency(Duration::from_millis(200));
        let cancel = CancellationToken::new();
        let executor = PlanExecutor::default();

        let report = run_with_timeout(
            &cancel,
            Some(Duration::from_millis(50)),
            executor.execute(&plan, &graph, &provider, cancel.clone()),
        )
        .await;

        assert_eq!(report.status_of(&id("slow")), Some(NodeStatus::Applied));
        assert_eq!(report.status_of(&id("after")), Some(NodeStatus::Skipped));
        assert!(report.cancelled);
    }

    #[tokio::test]
    async fn test_concurrency_limit_bounds_in_flight_calls() {
        let nodes = (0..8)
            .map(|i| ResourceNode::new(format!("obj-{i}"), "s3_object"))
            .collect();
        let (graph, plan) = schedule(nodes);
        let provider = EchoProvider::new().with_latency(Duration::from_millis(20));

        let executor = PlanExecutor::new(ExecutorOptions {
            concurrency_limit: 3,
            dry_run: false,
        });
        let report = executor
            .execute(&plan, &graph, &provider, CancellationToken::new())
            .await;

        assert_eq!(report.applied, 8);
        assert!(provider.peak_in_flight() <= 3);
        assert!(provider.peak_in_flight() >= 2);
    }

    #[tokio::test]
    async fn test_dry_run_never_calls_provider() {
        let (graph, plan) = schedule(vec![ResourceNode::new("a", "x")]);

        let mut mock = MockProvider::new();
        mock.expect_apply().times(0);
        mock.expect_delete().times(0);

        let executor = PlanExecutor::new(ExecutorOptions {
            concurrency_limit: 1,
            dry_run: true,
        });
        let report = executor
            .execute(&plan, &graph, &mock, CancellationToken::new())
            .await;

        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_its_dependencies() {
        let (graph, plan) = schedule(vec![
            ResourceNode::new("vpc", "vpc").with_desired_state(DesiredState::Delete),
            ResourceNode::new("subnet", "subnet")
                .depends_on("vpc")
                .with_desired_state(DesiredState::Delete),
        ]);

        let mut mock = MockProvider::new();
        mock.expect_name().return_const("mock");
        mock.expect_delete()
            .withf(|node| node.id.as_str() == "subnet")
            .times(1)
            .returning(|_| {
                Err(ProviderError::Transient {
                    message: String::from("throttled"),
                })
            });
        mock.expect_delete()
            .withf(|node| node.id.as_str() == "vpc")
            .times(0);

        let report = PlanExecutor::default()
            .execute(&plan, &graph, &mock, CancellationToken::new())
            .await;

        assert_eq!(report.status_of(&id("subnet")), Some(NodeStatus::Failed));
        assert_eq!(report.status_of(&id("vpc")), Some(NodeStatus::Skipped));
    }
}
