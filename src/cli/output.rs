//! Output formatting for CLI commands.
//!
//! Text output uses tables and colors; JSON output is meant for scripting.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{StackConfig, ValidationResult};
use crate::graph::{DesiredState, NodeStatus};
use crate::planner::{ApplyPlan, ExecutionReport};
use crate::reconciler::PassOutcome;
use crate::state::{FileManifest, RunHistory};
use crate::sync::SyncPlan;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan entry row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "Wave")]
    wave: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
}

/// Node result row for table display.
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Error")]
    error: String,
}

/// Manifest entry row for table display.
#[derive(Tabled)]
struct ManifestRow {
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Content type")]
    content_type: String,
    #[tabled(rename = "Hash")]
    hash: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats an apply plan.
    #[must_use]
    pub fn format_plan(&self, plan: &ApplyPlan) -> String {
        match self.format {
            OutputFormat::Json => plan.to_json().unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    fn format_plan_text(plan: &ApplyPlan) -> String {
        if plan.is_empty() {
            return format!("{} No changes required.\n", "✓".green());
        }

        let mut output = String::from("\nApply plan\n");
        if let Some(hash) = &plan.stack_hash {
            let _ = writeln!(output, "   Stack hash: {}", truncate(hash, 8));
        }
        output.push('\n');

        let rows: Vec<PlanRow> = plan
            .entries()
            .iter()
            .enumerate()
            .flat_map(|(i, wave)| {
                wave.iter().map(move |entry| PlanRow {
                    wave: i + 1,
                    action: format_action(entry.action),
                    resource: entry.id.to_string(),
                    kind: entry.kind.clone(),
                })
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete in {} waves\n",
            plan.create_count().to_string().green(),
            plan.update_count().to_string().yellow(),
            plan.delete_count().to_string().red(),
            plan.wave_count()
        );

        output
    }

    fn format_report_text(report: &ExecutionReport) -> String {
        let mut output = String::new();

        if !report.is_empty() {
            let rows: Vec<ResultRow> = report
                .results
                .values()
                .map(|r| ResultRow {
                    resource: r.id.to_string(),
                    action: format_action(r.action),
                    status: format_status(r.status),
                    error: r
                        .error
                        .as_ref()
                        .map(|e| truncate(&e.to_string(), 60))
                        .unwrap_or_default(),
                })
                .collect();

            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let status = if report.success() {
            format!("{} Apply succeeded", "✓".green())
        } else {
            format!("{} Apply failed", "✗".red())
        };
        let _ = writeln!(
            output,
            "\n{status}: {} applied, {} deleted, {} failed, {} skipped",
            report.applied, report.deleted, report.failed, report.skipped
        );
        if report.cancelled {
            let _ = writeln!(output, "{} Run was cancelled", "⚠".yellow());
        }

        output
    }

    /// Formats the outcome of an apply pass.
    #[must_use]
    pub fn format_outcome(&self, outcome: &PassOutcome) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(outcome).unwrap_or_default(),
            OutputFormat::Text => {
                let Some(report) = &outcome.report else {
                    return Self::format_plan_text(&outcome.plan);
                };

                let mut output = Self::format_report_text(report);
                for target in &outcome.saved_manifests {
                    let _ = writeln!(output, "   Manifest saved: {target}");
                }
                for target in &outcome.kept_manifests {
                    let _ = writeln!(
                        output,
                        "   {} Manifest kept: {target} (will retry on next apply)",
                        "⚠".yellow()
                    );
                }
                output
            }
        }
    }

    /// Formats the object sync plan of one target.
    #[must_use]
    pub fn format_sync_plan(&self, plan: &SyncPlan) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&SyncPlanJson::from(plan)).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = format!("\nSync target: {}\n\n", plan.target);

                if plan.has_changes() {
                    for node in &plan.nodes {
                        let _ = writeln!(output, "   {} {}", format_action(node.desired_state), node.id);
                    }
                } else {
                    let _ = writeln!(output, "   {} Objects are up to date.", "✓".green());
                }

                let _ = write!(
                    output,
                    "\n{} to create, {} to update, {} to delete, {} unchanged\n",
                    plan.created, plan.updated, plan.deleted, plan.unchanged
                );
                output
            }
        }
    }

    /// Formats a stored manifest.
    #[must_use]
    pub fn format_manifest(&self, manifest: &FileManifest) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(manifest).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!("\nManifest: {}\n\n", manifest.target);
                let _ = writeln!(output, "   Version: {}", manifest.version);
                let _ = writeln!(output, "   Generated: {}", manifest.generated_at);
                let _ = writeln!(output, "   Files: {}\n", manifest.len());

                if !manifest.is_empty() {
                    let rows: Vec<ManifestRow> = manifest
                        .entries
                        .values()
                        .map(|e| ManifestRow {
                            path: e.relative_path.clone(),
                            content_type: e.content_type.clone().unwrap_or_else(|| String::from("-")),
                            hash: truncate(&e.content_hash, 12),
                        })
                        .collect();
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }
                output
            }
        }
    }

    /// Formats the most recent `limit` runs.
    #[must_use]
    pub fn format_history(&self, history: &RunHistory, limit: usize) -> String {
        let recent: Vec<_> = history.entries.iter().rev().take(limit).collect();

        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&recent).unwrap_or_default(),
            OutputFormat::Text => {
                if recent.is_empty() {
                    return String::from("No runs recorded.\n");
                }

                let mut output = format!("\nRecent runs ({}):\n", recent.len());
                for entry in recent {
                    let status = if entry.success { "✓".green() } else { "✗".red() };
                    let _ = writeln!(
                        output,
                        "   {status} {} [{}] {} applied, {} deleted, {} failed, {} skipped",
                        entry.timestamp.format("%Y-%m-%d %H:%M"),
                        truncate(&entry.stack_hash, 8),
                        entry.applied,
                        entry.deleted,
                        entry.failed,
                        entry.skipped
                    );
                }
                output
            }
        }
    }

    /// Formats validation findings with a stack summary.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &StackConfig,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "valid": result.is_valid(),
                "project": config.project.name,
                "environment": config.project.environment,
                "resources": config.resources.len(),
                "sync_targets": config.sync.len(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Stack is valid.\n", "✓".green())
                } else {
                    let mut out = format!(
                        "{} Stack is invalid ({} errors):\n",
                        "✗".red(),
                        result.error_count()
                    );
                    for error in &result.errors {
                        let _ = writeln!(out, "   - {error}");
                    }
                    out
                };

                if show_warnings && !result.warnings.is_empty() {
                    let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }

                let _ = writeln!(output, "\nStack summary:");
                let _ = writeln!(output, "   Project: {}", config.project.name);
                let _ = writeln!(output, "   Environment: {}", config.project.environment);
                let _ = writeln!(output, "   Resources: {}", config.resources.len());
                let _ = writeln!(output, "   Sync targets: {}", config.sync.len());
                output
            }
        }
    }
}

/// Formats an action with color.
fn format_action(action: DesiredState) -> String {
    match action {
        DesiredState::Create => "+create".green().to_string(),
        DesiredState::Update => "~update".yellow().to_string(),
        DesiredState::Delete => "-delete".red().to_string(),
    }
}

/// Formats a node status with color.
fn format_status(status: NodeStatus) -> String {
    match status {
        NodeStatus::Applied | NodeStatus::Deleted => status.to_string().green().to_string(),
        NodeStatus::Failed => status.to_string().red().to_string(),
        NodeStatus::Skipped => status.to_string().yellow().to_string(),
        NodeStatus::Pending | NodeStatus::InProgress => status.to_string().dimmed().to_string(),
    }
}

/// Truncates a string to at most `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[derive(Serialize)]
struct SyncPlanJson<'a> {
    target: &'a str,
    created: usize,
    updated: usize,
    deleted: usize,
    unchanged: usize,
    objects: Vec<SyncObjectJson<'a>>,
}

#[derive(Serialize)]
struct SyncObjectJson<'a> {
    id: &'a str,
    action: DesiredState,
}

impl<'a> From<&'a SyncPlan> for SyncPlanJson<'a> {
    fn from(plan: &'a SyncPlan) -> Self {
        Self {
            target: &plan.target,
            created: plan.created,
            updated: plan.updated,
            deleted: plan.deleted,
            unchanged: plan.unchanged,
            objects: plan
                .nodes
                .iter()
                .map(|n| SyncObjectJson {
                    id: n.id.as_str(),
                    action: n.desired_state,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::PlanEntry;

    fn plan() -> ApplyPlan {
        ApplyPlan {
            waves: vec![vec![PlanEntry {
                id: "site-bucket".into(),
                kind: String::from("s3_bucket"),
                action: DesiredState::Create,
            }]],
            delete_waves: vec![vec![PlanEntry {
                id: "website/old.txt".into(),
                kind: String::from("s3_object"),
                action: DesiredState::Delete,
            }]],
            stack_hash: Some(String::from("0123456789abcdef")),
        }
    }

    #[test]
    fn test_plan_text_lists_every_entry() {
        colored::control::set_override(false);
        let text = OutputFormatter::new(OutputFormat::Text).format_plan(&plan());

        assert!(text.contains("site-bucket"));
        assert!(text.contains("website/old.txt"));
        assert!(text.contains("Stack hash: 01234567"));
        assert!(text.contains("1 to create, 0 to update, 1 to delete in 2 waves"));
    }

    #[test]
    fn test_plan_json_is_wave_list() {
        let json = OutputFormatter::new(OutputFormat::Json).format_plan(&plan());
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");

        assert_eq!(value["waves"].as_array().map(Vec::len), Some(2));
        assert_eq!(value["waves"][1][0]["action"], "delete");
    }

    #[test]
    fn test_empty_plan() {
        colored::control::set_override(false);
        let text = OutputFormatter::new(OutputFormat::Text).format_plan(&ApplyPlan::default());
        assert!(text.contains("No changes required"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
        assert_eq!(truncate("ééééééééé", 5), "éé...");
    }
}
