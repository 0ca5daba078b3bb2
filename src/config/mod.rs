//! Stack configuration.
//!
//! This module handles everything about stack files:
//! - Parsing and deserializing `stackweave.yaml`
//! - Validation of declared resources and sync targets
//! - Fingerprinting stacks for run history

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::StackHasher;
pub use parser::{ConfigParser, DEFAULT_STACK_FILES, find_stack_file};
pub use spec::{
    DEFAULT_OBJECT_KIND, ExecutionConfig, ProjectConfig, ResourceSpec, SYNC_TARGET_KIND,
    StackConfig, StateBackend, StateConfig, SyncTarget,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
