//! Planning module.
//!
//! This module turns a dependency graph into an ordered wave plan and
//! executes that plan against a provider.

mod executor;
mod plan;
mod scheduler;

pub use executor::{
    DEFAULT_CONCURRENCY_LIMIT, ExecutionReport, ExecutorOptions, NodeResult, PlanExecutor,
    run_with_timeout,
};
pub use plan::{ApplyPlan, PlanEntry};
pub use scheduler::Scheduler;
