//! Topological scheduling of a dependency graph into waves.
//!
//! Created and updated nodes are placed by their longest-path depth over
//! their dependencies. Deleted nodes are placed independently over the
//! reversed edges, so a resource is only removed once everything that
//! depended on it is gone. The apply phase always runs before the delete
//! phase.

use std::collections::{BTreeMap, BTreeSet, VecDeque, btree_set};
use tracing::debug;

use crate::error::ScheduleError;
use crate::graph::{DependencyGraph, ResourceId};

use super::plan::{ApplyPlan, PlanEntry};

/// Visitation state for cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Grey,
    Black,
}

/// Produces deterministic apply plans.
#[derive(Debug, Default, Clone, Copy)]
pub struct Scheduler;

impl Scheduler {
    /// Creates a scheduler.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Schedules `graph` into waves.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::CyclicDependency`] if the graph has a cycle and
    /// [`ScheduleError::UnsatisfiableOrdering`] if a created or updated node
    /// depends on a node scheduled for deletion. No partial plan is produced.
    pub fn schedule(&self, graph: &DependencyGraph) -> Result<ApplyPlan, ScheduleError> {
        if let Some(cycle) = find_cycle(graph) {
            return Err(ScheduleError::CyclicDependency { cycle });
        }

        for node in graph.nodes().filter(|n| !n.is_delete()) {
            if let Some(dep) = graph
                .dependencies_of(&node.id)
                .iter()
                .find(|dep| graph.node(dep).is_some_and(|d| d.is_delete()))
            {
                return Err(ScheduleError::UnsatisfiableOrdering {
                    dependent: node.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }

        let apply_depths = longest_path_depths(graph, false);
        let delete_depths = longest_path_depths(graph, true);

        let plan = ApplyPlan {
            waves: group_waves(graph, &apply_depths),
            delete_waves: group_waves(graph, &delete_depths),
            stack_hash: None,
        };

        debug!(
            "Scheduled {} nodes into {} apply waves and {} delete waves",
            plan.len(),
            plan.waves.len(),
            plan.delete_waves.len()
        );
        Ok(plan)
    }
}

/// Returns the first cycle found, in edge order.
///
/// Roots and successors are visited in ascending id order, so the reported
/// cycle is the same on every run. The walk keeps its own stack, so chain
/// length is not bounded by the thread stack.
fn find_cycle(graph: &DependencyGraph) -> Option<Vec<ResourceId>> {
    let mut colors: BTreeMap<&ResourceId, Color> = BTreeMap::new();
    // Grey nodes from the root, each with its successors not yet visited.
    let mut path: Vec<(&ResourceId, btree_set::Iter<'_, ResourceId>)> = Vec::new();

    for root in graph.ids() {
        if colors.contains_key(root) {
            continue;
        }
        colors.insert(root, Color::Grey);
        path.push((root, graph.dependents_of(root).iter()));

        while let Some((_, successors)) = path.last_mut() {
            let Some(next) = successors.next() else {
                if let Some((done, _)) = path.pop() {
                    colors.insert(done, Color::Black);
                }
                continue;
            };

            match colors.get(next).copied().unwrap_or(Color::White) {
                Color::Grey => {
                    let start = path.iter().position(|(p, _)| *p == next).unwrap_or(0);
                    return Some(path[start..].iter().map(|(p, _)| (*p).clone()).collect());
                }
                Color::White => {
                    colors.insert(next, Color::Grey);
                    path.push((next, graph.dependents_of(next).iter()));
                }
                Color::Black => {}
            }
        }
    }
    None
}

/// Prerequisites and successors of `id` within one phase's ordering.
///
/// For the apply phase a node's prerequisites are its dependencies; for the
/// delete phase they are its dependents.
fn phase_edges<'g>(
    graph: &'g DependencyGraph,
    id: &ResourceId,
    deletes: bool,
) -> (&'g BTreeSet<ResourceId>, &'g BTreeSet<ResourceId>) {
    if deletes {
        (graph.dependents_of(id), graph.dependencies_of(id))
    } else {
        (graph.dependencies_of(id), graph.dependents_of(id))
    }
}

/// Longest-path depth of every node in one phase.
///
/// Nodes of the other phase are ignored. Depths are relaxed in topological
/// order, so the graph must already be known to be acyclic.
fn longest_path_depths(graph: &DependencyGraph, deletes: bool) -> BTreeMap<ResourceId, usize> {
    let in_phase = |id: &ResourceId| graph.node(id).is_some_and(|n| n.is_delete() == deletes);

    let mut pending: BTreeMap<&ResourceId, usize> = graph
        .nodes()
        .filter(|n| n.is_delete() == deletes)
        .map(|n| {
            let (prerequisites, _) = phase_edges(graph, &n.id, deletes);
            (&n.id, prerequisites.iter().filter(|p| in_phase(p)).count())
        })
        .collect();

    let mut depths: BTreeMap<ResourceId, usize> =
        pending.keys().map(|id| ((*id).clone(), 0)).collect();
    let mut ready: VecDeque<&ResourceId> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();

    while let Some(id) = ready.pop_front() {
        let depth = depths.get(id).copied().unwrap_or_default();
        let (_, successors) = phase_edges(graph, id, deletes);

        for next in successors.iter().filter(|s| in_phase(s)) {
            if let Some(next_depth) = depths.get_mut(next) {
                *next_depth = (*next_depth).max(depth + 1);
            }
            if let Some(count) = pending.get_mut(next) {
                *count -= 1;
                if *count == 0 {
                    ready.push_back(next);
                }
            }
        }
    }
    depths
}

/// Groups nodes by depth; ids inside a wave stay in ascending order.
fn group_waves(graph: &DependencyGraph, depths: &BTreeMap<ResourceId, usize>) -> Vec<Vec<PlanEntry>> {
    let wave_count = depths.values().max().map_or(0, |max| max + 1);
    let mut waves = vec![Vec::new(); wave_count];

    for (id, depth) in depths {
        if let Some(node) = graph.node(id) {
            waves[*depth].push(PlanEntry::from(node));
        }
    }
    waves
}
