//! Stack validation.
//!
//! Collects every problem of a stack file in one pass. References and
//! dependencies naming unknown resources or sync targets are not checked
//! here; the graph builder reports those when the stack is planned.

use std::collections::BTreeSet;
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::graph::DesiredState;

use super::spec::{ExecutionConfig, ProjectConfig, ResourceSpec, StackConfig, StateBackend, StateConfig, SyncTarget};

/// Concurrency above which a warning is emitted.
const HIGH_CONCURRENCY: usize = 64;

/// Validator for stack configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a stack.
    ///
    /// # Errors
    ///
    /// Returns the first error if validation fails.
    pub fn validate(&self, config: &StackConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if let Some(first) = result.errors.first() {
            return Err(ConfigError::ValidationError {
                message: first.message.clone(),
                field: Some(first.field.clone()),
            }
            .into());
        }

        debug!("Stack validation passed ({} warnings)", result.warnings.len());
        Ok(result)
    }

    /// Runs every check and returns all findings.
    #[must_use]
    pub fn check(&self, config: &StackConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(&config.project, &mut result);
        Self::validate_state(&config.state, &mut result);
        Self::validate_execution(&config.execution, &mut result);
        Self::validate_resources(&config.resources, &mut result);
        Self::validate_sync(config, &mut result);

        result
    }

    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        if project.name.is_empty() {
            result.error("project.name", "Project name cannot be empty");
        } else if !is_valid_name(&project.name) {
            result.error(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            );
        }

        if project.environment.is_empty() {
            result.error("project.environment", "Environment cannot be empty");
        }
    }

    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_ref().is_none_or(String::is_empty) {
                    result.error(
                        "state.bucket",
                        "S3 bucket name is required when using S3 backend",
                    );
                }
            }
            StateBackend::Local => {
                if state.bucket.is_some() {
                    result.warn("state.bucket is ignored with the local backend");
                }
            }
        }
    }

    fn validate_execution(execution: &ExecutionConfig, result: &mut ValidationResult) {
        if execution.concurrency_limit == 0 {
            result.error(
                "execution.concurrency_limit",
                "Concurrency limit must be greater than 0",
            );
        } else if execution.concurrency_limit > HIGH_CONCURRENCY {
            result.warn(format!(
                "execution.concurrency_limit {} is high and may trigger provider throttling",
                execution.concurrency_limit
            ));
        }

        if execution.timeout_secs == Some(0) {
            result.error("execution.timeout_secs", "Timeout must be greater than 0");
        }
    }

    fn validate_resources(resources: &[ResourceSpec], result: &mut ValidationResult) {
        let mut seen = BTreeSet::new();

        for (i, resource) in resources.iter().enumerate() {
            let field = format!("resources[{i}]");

            if resource.id.trim().is_empty() {
                result.error(format!("{field}.id"), "Resource id cannot be empty");
            } else if resource.id.chars().any(char::is_whitespace) {
                result.error(
                    format!("{field}.id"),
                    format!("Resource id '{}' cannot contain whitespace", resource.id),
                );
            } else if !seen.insert(resource.id.as_str()) {
                result.error(
                    format!("{field}.id"),
                    format!("Duplicate resource id: {}", resource.id),
                );
            }

            if resource.kind.trim().is_empty() {
                result.error(
                    format!("{field}.kind"),
                    format!("Resource '{}' has no kind", resource.id),
                );
            }

            let unique: BTreeSet<&String> = resource.depends_on.iter().collect();
            if unique.len() != resource.depends_on.len() {
                result.warn(format!("Resource '{}' lists a dependency twice", resource.id));
            }

            if resource.action == DesiredState::Delete && !resource.attributes.is_empty() {
                result.warn(format!(
                    "Resource '{}' is deleted; its attributes are only passed to the provider",
                    resource.id
                ));
            }
        }
    }

    fn validate_sync(config: &StackConfig, result: &mut ValidationResult) {
        let mut names = BTreeSet::new();

        for (i, target) in config.sync.iter().enumerate() {
            let field = format!("sync[{i}]");

            if !is_valid_name(&target.name) {
                result.error(
                    format!("{field}.name"),
                    format!(
                        "Sync target name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                        target.name
                    ),
                );
            } else if !names.insert(target.name.as_str()) {
                result.error(
                    format!("{field}.name"),
                    format!("Duplicate sync target: {}", target.name),
                );
            } else if config.resources.iter().any(|r| r.id == target.name) {
                result.error(
                    format!("{field}.name"),
                    format!(
                        "Sync target '{}' has the same name as a resource",
                        target.name
                    ),
                );
            }

            Self::validate_sync_target(config, target, &field, result);
        }
    }

    fn validate_sync_target(
        config: &StackConfig,
        target: &SyncTarget,
        field: &str,
        result: &mut ValidationResult,
    ) {
        match config.resources.iter().find(|r| r.id == target.bucket) {
            None => result.error(
                format!("{field}.bucket"),
                format!(
                    "Sync target '{}' uploads into undeclared resource '{}'",
                    target.name, target.bucket
                ),
            ),
            Some(bucket) if bucket.action == DesiredState::Delete => result.error(
                format!("{field}.bucket"),
                format!(
                    "Sync target '{}' uploads into '{}', which is being deleted",
                    target.name, target.bucket
                ),
            ),
            Some(_) => {}
        }

        if target.root_directory.as_os_str().is_empty() {
            result.error(format!("{field}.root_directory"), "Root directory cannot be empty");
        }

        if target.object_kind.trim().is_empty() {
            result.error(format!("{field}.object_kind"), "Object kind cannot be empty");
        }

        if target.key_prefix.starts_with('/') {
            result.warn(format!(
                "Sync target '{}' key_prefix starts with '/'; object keys will too",
                target.name
            ));
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_lowercase() {
        return false;
    }

    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.ends_with('-')
        && !name.contains("--")
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn parse(yaml: &str) -> StackConfig {
        ConfigParser::new().parse_yaml(yaml, None).expect("valid yaml")
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("website"));
        assert!(is_valid_name("static-site-2"));
        assert!(is_valid_name("a"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Website"));
        assert!(!is_valid_name("2site"));
        assert!(!is_valid_name("static_site"));
        assert!(!is_valid_name("site-"));
        assert!(!is_valid_name("static--site"));
    }

    #[test]
    fn test_collects_all_errors() {
        let config = parse(
            r"
project:
  name: Bad_Name
state:
  backend: s3
execution:
  concurrency_limit: 0
resources:
  - id: bucket
    kind: s3_bucket
  - id: bucket
    kind: ''
sync:
  - name: website
    root_directory: site
    bucket: missing-bucket
",
        );

        let result = ConfigValidator::new().check(&config);
        let fields: Vec<_> = result.errors.iter().map(|e| e.field.as_str()).collect();

        assert!(fields.contains(&"project.name"));
        assert!(fields.contains(&"state.bucket"));
        assert!(fields.contains(&"execution.concurrency_limit"));
        assert!(fields.contains(&"resources[1].id"));
        assert!(fields.contains(&"resources[1].kind"));
        assert!(fields.contains(&"sync[0].bucket"));
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_unknown_dependency_left_to_graph_builder() {
        let config = parse(
            r#"
project:
  name: web-server
resources:
  - id: instance
    kind: instance
    depends_on: [missing]
    attributes:
      subnet_id: { "$ref": "subnet.id" }
"#,
        );

        let result = ConfigValidator::new()
            .validate(&config)
            .expect("unknown ids are not a validation error");
        assert!(result.is_valid());
    }

    #[test]
    fn test_sync_target_name_must_not_shadow_resource() {
        let config = parse(
            r"
project:
  name: site
resources:
  - id: site
    kind: s3_bucket
sync:
  - name: site
    root_directory: site
    bucket: site
",
        );

        let result = ConfigValidator::new().check(&config);
        let fields: Vec<_> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["sync[0].name"]);
    }

    #[test]
    fn test_warnings() {
        let config = parse(
            r"
project:
  name: site
state:
  backend: local
  bucket: ignored
execution:
  concurrency_limit: 100
",
        );

        let result = ConfigValidator::new().validate(&config).expect("valid");
        assert_eq!(result.warning_count(), 2);
    }
}
