// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![forbid(unsafe_code)]               // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Stackweave
//!
//! A dependency-aware provisioning planner with incremental object sync.
//!
//! ## Overview
//!
//! Stackweave reads a declarative stack file and turns it into an ordered
//! apply plan:
//!
//! - Resources are typed attribute bags with explicit ordering hints
//! - Attributes may reference outputs of other resources (`{"$ref": "vpc.id"}`)
//! - Local directories are mirrored into bucket resources, uploading only
//!   what changed since the last successful sync
//!
//! ## Architecture
//!
//! 1. **Graph**: declared and generated nodes, with edges from explicit
//!    dependencies and attribute references
//! 2. **Scheduler**: cycle detection and longest-path wave assignment
//! 3. **Executor**: waves in sequence, nodes of a wave concurrently, bounded
//!    by one run-wide concurrency limit
//!
//! ## Modules
//!
//! - [`config`]: Stack file parsing and validation
//! - [`graph`]: Resource nodes and the dependency graph
//! - [`planner`]: Scheduling and plan execution
//! - [`provider`]: The provider collaborator
//! - [`sync`]: Object sync planning
//! - [`state`]: Manifest storage backends (local, S3)
//! - [`reconciler`]: Planning pass orchestration
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: static-site
//!
//! resources:
//!   - id: site-bucket
//!     kind: s3_bucket
//!     attributes:
//!       bucket: my-unique-bucket-name
//!   - id: site-policy
//!     kind: s3_bucket_policy
//!     attributes:
//!       bucket: { "$ref": "site-bucket.id" }
//!
//! sync:
//!   - name: website
//!     root_directory: static-website
//!     bucket: site-bucket
//!     depends_on: [site-policy]
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod state;
pub mod sync;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, StackConfig, StackHasher, SyncTarget};
pub use error::{
    ConfigError, GraphError, NodeError, ProviderError, Result, ScheduleError, StackError,
    StateError, SyncError,
};
pub use graph::{
    AppliedAttributes, AttributeReference, AttributeValue, Attributes, DependencyEdge,
    DependencyGraph, DesiredState, GraphBuilder, NodeStatus, ResourceId, ResourceNode,
};
pub use planner::{
    ApplyPlan, ExecutionReport, ExecutorOptions, NodeResult, PlanEntry, PlanExecutor, Scheduler,
};
pub use provider::{EchoProvider, Provider};
pub use reconciler::{PassOutcome, PreparedPass, Reconciler};
pub use state::{FileManifest, FileManifestEntry, LocalManifestStore, ManifestStore, S3ManifestStore};
pub use sync::{SyncEngine, SyncPlan};
