//! Stack fingerprinting.
//!
//! A stack hash identifies the declared content of a stack. It is recorded
//! with every run so that history entries can be matched to the stack
//! revision that produced them.

use sha2::{Digest, Sha256};

use super::spec::{ResourceSpec, StackConfig, SyncTarget};

/// Hasher for stack fingerprints.
#[derive(Debug, Default)]
pub struct StackHasher;

impl StackHasher {
    /// Creates a new stack hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the fingerprint of a whole stack.
    ///
    /// Declaration order of resources and sync targets does not matter.
    /// Execution settings and the state backend are not part of the hash.
    #[must_use]
    pub fn hash_stack(&self, config: &StackConfig) -> String {
        let mut hasher = Sha256::new();

        update_field(&mut hasher, &config.project.name);
        update_field(&mut hasher, &config.project.environment);
        update_field(&mut hasher, config.project.region.as_deref().unwrap_or_default());

        let mut resources: Vec<_> = config.resources.iter().collect();
        resources.sort_by(|a, b| a.id.cmp(&b.id));
        for resource in resources {
            update_field(&mut hasher, &self.hash_resource(resource));
        }

        let mut targets: Vec<_> = config.sync.iter().collect();
        targets.sort_by(|a, b| a.name.cmp(&b.name));
        for target in targets {
            update_field(&mut hasher, &Self::hash_sync_target(target));
        }

        hex::encode(hasher.finalize())
    }

    /// Computes the fingerprint of a single resource declaration.
    #[must_use]
    pub fn hash_resource(&self, resource: &ResourceSpec) -> String {
        let mut hasher = Sha256::new();

        update_field(&mut hasher, &resource.id);
        update_field(&mut hasher, &resource.kind);
        update_field(&mut hasher, &resource.action.to_string());

        let mut deps: Vec<_> = resource.depends_on.iter().collect();
        deps.sort_unstable();
        deps.dedup();
        for dep in deps {
            update_field(&mut hasher, dep);
        }

        // Attribute maps are ordered, so their JSON rendering is stable.
        for (key, value) in &resource.attributes {
            update_field(&mut hasher, key);
            update_field(&mut hasher, &serde_json::Value::from(value.clone()).to_string());
        }

        hex::encode(hasher.finalize())
    }

    fn hash_sync_target(target: &SyncTarget) -> String {
        let mut hasher = Sha256::new();

        update_field(&mut hasher, &target.name);
        update_field(&mut hasher, &target.root_directory.to_string_lossy());
        update_field(&mut hasher, &target.bucket);
        update_field(&mut hasher, &target.key_prefix);
        update_field(&mut hasher, &target.object_kind);

        let mut deps: Vec<_> = target.depends_on.iter().collect();
        deps.sort_unstable();
        for dep in deps {
            update_field(&mut hasher, dep);
        }

        for (ext, content_type) in &target.content_types {
            update_field(&mut hasher, ext);
            update_field(&mut hasher, content_type);
        }

        hex::encode(hasher.finalize())
    }
}

/// Feeds a length-delimited field so adjacent fields cannot run together.
fn update_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    const STACK: &str = r#"
project:
  name: site
resources:
  - id: bucket
    kind: s3_bucket
    attributes:
      bucket: example-site
  - id: policy
    kind: s3_bucket_policy
    attributes:
      bucket: { "$ref": "bucket.id" }
"#;

    fn parse(yaml: &str) -> StackConfig {
        ConfigParser::new().parse_yaml(yaml, None).expect("valid stack")
    }

    #[test]
    fn test_stack_hash_deterministic() {
        let hasher = StackHasher::new();
        let config = parse(STACK);

        let hash = hasher.hash_stack(&config);
        assert_eq!(hash, hasher.hash_stack(&config));
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn test_stack_hash_ignores_declaration_order() {
        let hasher = StackHasher::new();
        let config = parse(STACK);
        let mut reordered = config.clone();
        reordered.resources.reverse();

        assert_eq!(hasher.hash_stack(&config), hasher.hash_stack(&reordered));
    }

    #[test]
    fn test_stack_hash_changes_with_attributes() {
        let hasher = StackHasher::new();
        let config = parse(STACK);
        let changed = parse(&STACK.replace("example-site", "other-site"));

        assert_ne!(hasher.hash_stack(&config), hasher.hash_stack(&changed));
    }

    #[test]
    fn test_execution_settings_not_hashed() {
        let hasher = StackHasher::new();
        let config = parse(STACK);
        let mut tuned = config.clone();
        tuned.execution.concurrency_limit = 32;

        assert_eq!(hasher.hash_stack(&config), hasher.hash_stack(&tuned));
    }
}
