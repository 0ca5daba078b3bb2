//! Planning pass orchestration.
//!
//! A pass builds the declared nodes of a stack, plans object sync for every
//! sync target against its stored manifest, schedules the combined graph and
//! executes it. Manifests are only replaced for targets whose every object
//! node succeeded.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{StackConfig, StackHasher, SyncTarget};
use crate::error::{ConfigError, Result, StateError};
use crate::graph::{DependencyGraph, GraphBuilder, NodeStatus, ResourceId, ResourceNode};
use crate::planner::{
    ApplyPlan, ExecutionReport, ExecutorOptions, PlanExecutor, Scheduler, run_with_timeout,
};
use crate::provider::Provider;
use crate::state::{FileManifest, ManifestStore, RunHistoryEntry, generate_holder_id};
use crate::sync::{SyncEngine, SyncPlan};

/// Orchestrates planning passes over one stack.
pub struct Reconciler<'a> {
    config: &'a StackConfig,
    store: &'a dyn ManifestStore,
    provider: &'a dyn Provider,
    base_dir: PathBuf,
    options: ExecutorOptions,
    timeout: Option<Duration>,
    cancel: CancellationToken,
    hasher: StackHasher,
    scheduler: Scheduler,
}

/// Everything computed by a pass before execution.
#[derive(Debug)]
pub struct PreparedPass {
    /// Combined graph of declared and generated nodes.
    pub graph: DependencyGraph,
    /// Scheduled plan.
    pub plan: ApplyPlan,
    /// One sync plan per sync target, in declaration order.
    pub sync_plans: Vec<SyncPlan>,
    previous: BTreeMap<String, Option<FileManifest>>,
}

/// Result of an apply pass.
#[derive(Debug, Serialize)]
pub struct PassOutcome {
    /// The executed (or, in dry run, proposed) plan.
    pub plan: ApplyPlan,
    /// Execution report; `None` in dry run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ExecutionReport>,
    /// Sync targets whose manifest was replaced.
    pub saved_manifests: Vec<String>,
    /// Sync targets whose previous manifest was kept because a node did not succeed.
    pub kept_manifests: Vec<String>,
    /// Whether the pass ran in dry-run mode.
    pub dry_run: bool,
}

impl<'a> Reconciler<'a> {
    /// Creates a reconciler using the execution settings of `config`.
    #[must_use]
    pub fn new(
        config: &'a StackConfig,
        store: &'a dyn ManifestStore,
        provider: &'a dyn Provider,
    ) -> Self {
        Self {
            config,
            store,
            provider,
            base_dir: PathBuf::from("."),
            options: ExecutorOptions::from(&config.execution),
            timeout: config.execution.timeout_secs.map(Duration::from_secs),
            cancel: CancellationToken::new(),
            hasher: StackHasher::new(),
            scheduler: Scheduler::new(),
        }
    }

    /// Sets the directory sync roots are resolved against.
    #[must_use]
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// Overrides the run timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Uses `token` to cancel the run from outside.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Plans object sync for a single target.
    ///
    /// # Errors
    ///
    /// Returns an error if the target is unknown, its manifest cannot be
    /// loaded or its tree cannot be scanned.
    pub async fn plan_sync(&self, name: &str) -> Result<SyncPlan> {
        let target = self.config.sync_target(name).ok_or_else(|| {
            ConfigError::validation(format!("Unknown sync target: {name}"), "sync")
        })?;

        let previous = self.store.load(&target.name).await?;
        Ok(SyncEngine::new(&self.base_dir).plan(target, previous.as_ref())?)
    }

    /// Builds and schedules the graph of this pass.
    ///
    /// A resource depending on a sync target waits for every upload of that
    /// target. Ordering through sync targets is checked on the declared
    /// stack first, so a cycle is reported whether or not files changed.
    ///
    /// # Errors
    ///
    /// Returns build-time errors (unknown ids, duplicates, cycles,
    /// unsatisfiable ordering) and manifest or sync failures.
    pub async fn prepare(&self) -> Result<PreparedPass> {
        info!(
            "Planning {} ({} resources, {} sync targets)",
            self.config.qualified_name(),
            self.config.resources.len(),
            self.config.sync.len()
        );

        self.check_declared_order()?;

        let engine = SyncEngine::new(&self.base_dir);
        let mut sync_plans = Vec::with_capacity(self.config.sync.len());
        let mut previous = BTreeMap::new();
        for target in &self.config.sync {
            let stored = self.store.load(&target.name).await?;
            let sync_plan = engine.plan(target, stored.as_ref())?;

            previous.insert(target.name.clone(), stored);
            sync_plans.push(sync_plan);
        }

        let uploads: BTreeMap<&str, Vec<ResourceId>> = sync_plans
            .iter()
            .map(|plan| (plan.target.as_str(), plan.upload_ids()))
            .collect();

        let mut builder = GraphBuilder::new();
        builder.add_nodes(
            self.config
                .resource_nodes()
                .into_iter()
                .chain(sync_plans.iter().flat_map(|plan| plan.nodes.iter().cloned()))
                .map(|node| await_uploads(node, &uploads)),
        );

        let graph = builder.build()?;
        let stack_hash = self.hasher.hash_stack(self.config);
        let plan = self.scheduler.schedule(&graph)?.with_stack_hash(stack_hash);

        debug!(
            "Planned {} nodes ({} edges) in {} waves",
            plan.len(),
            graph.edge_count(),
            plan.wave_count()
        );

        Ok(PreparedPass {
            graph,
            plan,
            sync_plans,
            previous,
        })
    }

    /// Schedules the declared stack with one node per sync target.
    fn check_declared_order(&self) -> Result<()> {
        let mut builder = GraphBuilder::new();
        builder.add_nodes(self.config.resource_nodes());
        builder.add_nodes(self.config.sync.iter().map(SyncTarget::to_node));
        self.scheduler.schedule(&builder.build()?)?;
        Ok(())
    }

    /// Runs a full pass.
    ///
    /// In dry run the plan is returned without calling the provider or
    /// touching the store. Otherwise the store lock is held for the whole
    /// pass and released even if the pass fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired or planning fails.
    /// Node failures are reported in the outcome, not as errors.
    pub async fn apply(&self) -> Result<PassOutcome> {
        if self.options.dry_run {
            return Ok(dry_run_outcome(self.prepare().await?));
        }

        let lock = self.store.acquire_lock(&generate_holder_id()).await?;
        let outcome = match self.prepare().await {
            Ok(prepared) => self.execute(prepared).await,
            Err(e) => Err(e),
        };
        self.release(&lock.lock_id).await;
        outcome
    }

    /// Executes a plan prepared (and possibly shown) earlier.
    ///
    /// Once the lock is held, every sync target is checked against the state
    /// the plan was made from: its stored manifest and its local tree must be
    /// unchanged, so the executed plan is exactly the prepared one.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::StalePlan`] if a sync target moved, and the
    /// errors of [`Reconciler::apply`].
    pub async fn apply_prepared(&self, prepared: PreparedPass) -> Result<PassOutcome> {
        if self.options.dry_run {
            return Ok(dry_run_outcome(prepared));
        }

        let lock = self.store.acquire_lock(&generate_holder_id()).await?;
        let outcome = match self.ensure_current(&prepared).await {
            Ok(()) => self.execute(prepared).await,
            Err(e) => Err(e),
        };
        self.release(&lock.lock_id).await;
        outcome
    }

    async fn release(&self, lock_id: &str) {
        if let Err(e) = self.store.release_lock(lock_id).await {
            warn!("Failed to release manifest lock {}: {}", lock_id, e);
        }
    }

    async fn ensure_current(&self, prepared: &PreparedPass) -> Result<()> {
        let engine = SyncEngine::new(&self.base_dir);

        for sync_plan in &prepared.sync_plans {
            let stored = self.store.load(&sync_plan.target).await?;
            let planned_from = prepared
                .previous
                .get(&sync_plan.target)
                .and_then(Option::as_ref);
            let store_moved = match (stored.as_ref(), planned_from) {
                (None, None) => false,
                (Some(now), Some(then)) => !now.same_entries(then),
                _ => true,
            };

            let tree_moved = self
                .config
                .sync_target(&sync_plan.target)
                .map(|target| engine.scan(target))
                .transpose()?
                .is_none_or(|scanned| !scanned.same_entries(&sync_plan.manifest));

            if store_moved || tree_moved {
                return Err(StateError::StalePlan {
                    target: sync_plan.target.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    async fn execute(&self, prepared: PreparedPass) -> Result<PassOutcome> {
        let executor = PlanExecutor::new(self.options);

        let report = run_with_timeout(
            &self.cancel,
            self.timeout,
            executor.execute(
                &prepared.plan,
                &prepared.graph,
                self.provider,
                self.cancel.clone(),
            ),
        )
        .await;

        let mut saved_manifests = Vec::new();
        let mut kept_manifests = Vec::new();
        for sync_plan in &prepared.sync_plans {
            let previous = prepared.previous.get(&sync_plan.target).and_then(Option::as_ref);

            if !target_succeeded(sync_plan, &report) {
                warn!(
                    "Keeping previous manifest of '{}': not every object was synced",
                    sync_plan.target
                );
                kept_manifests.push(sync_plan.target.clone());
            } else if sync_plan.manifest_changed(previous) {
                self.store.save(&sync_plan.manifest).await?;
                info!(
                    "Saved manifest of '{}' ({} files)",
                    sync_plan.target,
                    sync_plan.manifest.len()
                );
                saved_manifests.push(sync_plan.target.clone());
            }
        }

        let entry = RunHistoryEntry {
            timestamp: Utc::now(),
            stack_hash: prepared.plan.stack_hash.clone().unwrap_or_default(),
            applied: report.applied,
            deleted: report.deleted,
            failed: report.failed,
            skipped: report.skipped,
            success: report.success(),
        };
        if let Err(e) = self.store.record_run(&entry).await {
            warn!("Failed to record run history: {}", e);
        }

        Ok(PassOutcome {
            plan: prepared.plan,
            report: Some(report),
            saved_manifests,
            kept_manifests,
            dry_run: false,
        })
    }
}

impl PreparedPass {
    /// Returns true if applying would neither call the provider nor change
    /// any stored manifest.
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.plan.is_empty()
            && self.sync_plans.iter().all(|sync_plan| {
                let previous = self.previous.get(&sync_plan.target).and_then(Option::as_ref);
                !sync_plan.manifest_changed(previous)
            })
    }
}

fn dry_run_outcome(prepared: PreparedPass) -> PassOutcome {
    info!("Dry run: {} nodes planned", prepared.plan.len());
    PassOutcome {
        plan: prepared.plan,
        report: None,
        saved_manifests: Vec::new(),
        kept_manifests: Vec::new(),
        dry_run: true,
    }
}

/// Replaces dependencies on sync targets by the target's pending uploads.
fn await_uploads(mut node: ResourceNode, uploads: &BTreeMap<&str, Vec<ResourceId>>) -> ResourceNode {
    for (target, ids) in uploads {
        if node.explicit_deps.remove(*target) {
            node.explicit_deps.extend(ids.iter().cloned());
        }
    }
    node
}

/// Returns true if every object node of `sync_plan` reached a success state.
fn target_succeeded(sync_plan: &SyncPlan, report: &ExecutionReport) -> bool {
    sync_plan.nodes.iter().all(|node| {
        matches!(
            report.status_of(&node.id),
            Some(NodeStatus::Applied | NodeStatus::Deleted)
        )
    })
}

impl PassOutcome {
    /// Returns true if the pass completed without failed or skipped nodes.
    #[must_use]
    pub fn success(&self) -> bool {
        self.report.as_ref().is_none_or(ExecutionReport::success)
    }
}

impl std::fmt::Display for PassOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.report {
            None => write!(f, "Dry run: {} nodes planned", self.plan.len())?,
            Some(report) => {
                let status = if report.success() { "succeeded" } else { "failed" };
                writeln!(f, "Apply {status}: {report}")?;
                for target in &self.saved_manifests {
                    writeln!(f, "  manifest saved: {target}")?;
                }
                for target in &self.kept_manifests {
                    writeln!(f, "  manifest kept: {target}")?;
                }
            }
        }
        Ok(())
    }
}
