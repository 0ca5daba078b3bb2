//! Apply plan types.
//!
//! A plan is an ordered list of waves. Every node in a wave may be processed
//! concurrently; a wave starts only after all earlier waves settled.

use serde::{Deserialize, Serialize};

use crate::graph::{DesiredState, ResourceId, ResourceNode};

/// A scheduled apply plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyPlan {
    /// Create and update waves, in execution order.
    pub waves: Vec<Vec<PlanEntry>>,
    /// Delete waves, executed after every apply wave.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete_waves: Vec<Vec<PlanEntry>>,
    /// Hash of the stack file this plan was computed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_hash: Option<String>,
}

/// One `{id, kind, action}` triple of the plan output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    /// Node identifier.
    pub id: ResourceId,
    /// Resource kind.
    pub kind: String,
    /// Operation to perform.
    pub action: DesiredState,
}

#[derive(Serialize)]
struct PlanOutput<'a> {
    waves: Vec<&'a [PlanEntry]>,
}

impl From<&ResourceNode> for PlanEntry {
    fn from(node: &ResourceNode) -> Self {
        Self {
            id: node.id.clone(),
            kind: node.kind.clone(),
            action: node.desired_state,
        }
    }
}

impl ApplyPlan {
    /// Sets the stack hash.
    #[must_use]
    pub fn with_stack_hash(mut self, hash: impl Into<String>) -> Self {
        self.stack_hash = Some(hash.into());
        self
    }

    /// All waves in execution order: apply waves, then delete waves.
    #[must_use]
    pub fn entries(&self) -> Vec<&[PlanEntry]> {
        self.waves
            .iter()
            .chain(&self.delete_waves)
            .map(Vec::as_slice)
            .collect()
    }

    /// Serializes the plan output format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&PlanOutput {
            waves: self.entries(),
        })
    }

    /// Zero-based position of `id` in [`Self::entries`].
    #[must_use]
    pub fn wave_of(&self, id: &ResourceId) -> Option<usize> {
        self.entries()
            .iter()
            .position(|wave| wave.iter().any(|e| &e.id == id))
    }

    /// Total number of scheduled nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waves
            .iter()
            .chain(&self.delete_waves)
            .map(Vec::len)
            .sum()
    }

    /// Returns true if nothing is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of waves across both phases.
    #[must_use]
    pub fn wave_count(&self) -> usize {
        self.waves.len() + self.delete_waves.len()
    }

    fn count(&self, action: DesiredState) -> usize {
        self.entries()
            .iter()
            .flat_map(|wave| wave.iter())
            .filter(|e| e.action == action)
            .count()
    }

    /// Number of create operations.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.count(DesiredState::Create)
    }

    /// Number of update operations.
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.count(DesiredState::Update)
    }

    /// Number of delete operations.
    #[must_use]
    pub fn delete_count(&self) -> usize {
        self.count(DesiredState::Delete)
    }
}

impl std::fmt::Display for PlanEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let marker = match self.action {
            DesiredState::Create => "+",
            DesiredState::Update => "~",
            DesiredState::Delete => "-",
        };
        write!(f, "{marker} {} ({})", self.id, self.kind)
    }
}

impl std::fmt::Display for ApplyPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(
            f,
            "Apply plan ({} nodes, {} waves):",
            self.len(),
            self.wave_count()
        )?;
        for (i, wave) in self.entries().iter().enumerate() {
            writeln!(f, "  wave {}:", i + 1)?;
            for entry in *wave {
                writeln!(f, "    {entry}")?;
            }
        }
        Ok(())
    }
}
