//! Stack file loading.
//!
//! Stack files are YAML. Selected values can be overridden through
//! `STACKWEAVE_*` environment variables, optionally set from a `.env` file
//! next to the stack file.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ConfigError, Result};

use super::spec::StackConfig;

/// Default stack file names, in search order.
pub const DEFAULT_STACK_FILES: &[&str] = &[
    "stackweave.yaml",
    "stackweave.yml",
    "stack.yaml",
    "stack.yml",
];

/// Loads stack configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the directory `.env` is looked up in.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a stack file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<StackConfig> {
        let path = path.as_ref();
        info!("Loading stack from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a stack from YAML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid or a `$ref` marker is malformed.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<StackConfig> {
        let config: StackConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = match (source, e.location()) {
                (Some(p), Some(loc)) => Some(format!("{}:{}:{}", p.display(), loc.line(), loc.column())),
                (Some(p), None) => Some(p.display().to_string()),
                (None, Some(loc)) => Some(format!("line {}, column {}", loc.line(), loc.column())),
                (None, None) => None,
            };
            ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            }
        })?;

        debug!(
            "Parsed stack '{}': {} resources, {} sync targets",
            config.project.name,
            config.resources.len(),
            config.sync.len()
        );
        Ok(config)
    }

    /// Loads a stack file and applies environment overrides.
    ///
    /// Recognized variables: `STACKWEAVE_PROJECT_NAME`,
    /// `STACKWEAVE_PROJECT_ENVIRONMENT`, `STACKWEAVE_STATE_BUCKET`,
    /// `STACKWEAVE_STATE_PREFIX`, `STACKWEAVE_CONCURRENCY_LIMIT` and
    /// `STACKWEAVE_DRY_RUN`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or an override is malformed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<StackConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Applies overrides read through `lookup`.
    fn apply_env_overrides(
        config: &mut StackConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(name) = lookup("STACKWEAVE_PROJECT_NAME") {
            debug!("Overriding project.name from environment");
            config.project.name = name;
        }

        if let Some(env) = lookup("STACKWEAVE_PROJECT_ENVIRONMENT") {
            debug!("Overriding project.environment from environment");
            config.project.environment = env;
        }

        if let Some(bucket) = lookup("STACKWEAVE_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            config.state.bucket = Some(bucket);
        }

        if let Some(prefix) = lookup("STACKWEAVE_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            config.state.prefix = Some(prefix);
        }

        if let Some(limit) = lookup("STACKWEAVE_CONCURRENCY_LIMIT") {
            config.execution.concurrency_limit =
                limit.trim().parse().map_err(|e| ConfigError::InvalidEnvVar {
                    name: String::from("STACKWEAVE_CONCURRENCY_LIMIT"),
                    message: format!("expected a positive integer: {e}"),
                })?;
        }

        if let Some(dry_run) = lookup("STACKWEAVE_DRY_RUN") {
            config.execution.dry_run = match dry_run.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                other => {
                    return Err(ConfigError::InvalidEnvVar {
                        name: String::from("STACKWEAVE_DRY_RUN"),
                        message: format!("expected a boolean, got '{other}'"),
                    }
                    .into());
                }
            };
        }

        Ok(())
    }

    /// Loads the `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Finds a stack file in `start_dir` or one of its parents.
///
/// # Errors
///
/// Returns an error if no stack file is found.
pub fn find_stack_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = std::path::absolute(start).unwrap_or_else(|_| start.to_path_buf());

    loop {
        for filename in DEFAULT_STACK_FILES {
            let candidate = current.join(filename);
            if candidate.exists() {
                info!("Found stack file: {}", candidate.display());
                return Ok(candidate);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ConfigError::FileNotFound {
        path: start.join(DEFAULT_STACK_FILES[0]),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateBackend;
    use crate::graph::DesiredState;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_parse_minimal_stack() {
        let yaml = r"
project:
  name: test-project
";
        let config = ConfigParser::new()
            .parse_yaml(yaml, None)
            .expect("minimal stack parses");

        assert_eq!(config.project.name, "test-project");
        assert_eq!(config.project.environment, "dev");
        assert_eq!(config.state.backend, StateBackend::Local);
        assert_eq!(config.execution.concurrency_limit, 4);
        assert!(config.resources.is_empty());
    }

    #[test]
    fn test_parse_full_stack() {
        let yaml = r#"
project:
  name: static-site
  environment: prod

state:
  backend: s3
  bucket: stackweave-state
  prefix: static-site/prod

execution:
  concurrency_limit: 8
  timeout_secs: 600

resources:
  - id: site-bucket
    kind: s3_bucket
    attributes:
      bucket: my-unique-bucket-name
  - id: legacy-bucket
    kind: s3_bucket
    action: delete
  - id: site-policy
    kind: s3_bucket_policy
    attributes:
      bucket: { "$ref": "site-bucket.id" }
      statements:
        - effect: Allow
          resources: [ { "$ref": "site-bucket.arn" } ]

sync:
  - name: website
    root_directory: static-website
    bucket: site-bucket
    depends_on: [site-policy]
"#;
        let config = ConfigParser::new()
            .parse_yaml(yaml, None)
            .expect("full stack parses");

        assert_eq!(config.state.backend, StateBackend::S3);
        assert_eq!(config.execution.timeout_secs, Some(600));
        assert_eq!(config.resources[1].action, DesiredState::Delete);
        assert_eq!(config.resources[2].to_node().references().len(), 2);
        assert_eq!(config.sync[0].depends_on, vec!["site-policy"]);
    }

    #[test]
    fn test_malformed_reference_rejected() {
        let yaml = r#"
project:
  name: broken
resources:
  - id: policy
    kind: s3_bucket_policy
    attributes:
      bucket: { "$ref": "no-attribute" }
"#;
        assert!(ConfigParser::new().parse_yaml(yaml, None).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ConfigParser::new()
            .parse_yaml("project:\n  name: base\n", None)
            .expect("parses");

        let vars: BTreeMap<&str, &str> = [
            ("STACKWEAVE_PROJECT_NAME", "override"),
            ("STACKWEAVE_CONCURRENCY_LIMIT", "16"),
            ("STACKWEAVE_DRY_RUN", "true"),
        ]
        .into_iter()
        .collect();

        ConfigParser::apply_env_overrides(&mut config, |name| {
            vars.get(name).map(|v| (*v).to_string())
        })
        .expect("valid overrides");

        assert_eq!(config.project.name, "override");
        assert_eq!(config.execution.concurrency_limit, 16);
        assert!(config.execution.dry_run);
    }

    #[test]
    fn test_invalid_env_override() {
        let mut config = ConfigParser::new()
            .parse_yaml("project:\n  name: base\n", None)
            .expect("parses");

        let result = ConfigParser::apply_env_overrides(&mut config, |name| {
            (name == "STACKWEAVE_CONCURRENCY_LIMIT").then(|| String::from("many"))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_find_stack_file_walks_up() {
        let temp = TempDir::new().expect("temp dir");
        let nested = temp.path().join("a/b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(temp.path().join("stack.yml"), "project: { name: x }").expect("write");

        let found = find_stack_file(&nested).expect("found");
        assert_eq!(found, temp.path().join("stack.yml"));
    }
}
