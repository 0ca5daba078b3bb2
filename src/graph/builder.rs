//! Dependency graph construction.
//!
//! The builder is an explicit, per-pass object: each planning pass creates
//! one, feeds it nodes, and consumes it into an immutable [`DependencyGraph`].
//! Edges come from explicit dependencies and from attribute references found
//! anywhere in a node's attribute tree.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

use crate::error::GraphError;

use super::node::{ResourceId, ResourceNode};

static NO_EDGES: BTreeSet<ResourceId> = BTreeSet::new();

/// A derived dependency relation: `from` must settle before `to` is processed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyEdge {
    /// The prerequisite node.
    pub from: ResourceId,
    /// The dependent node.
    pub to: ResourceId,
}

/// Collects nodes for a single planning pass.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<ResourceNode>,
}

/// An immutable directed graph with one vertex per resource node.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: BTreeMap<ResourceId, ResourceNode>,
    /// Incoming edges: node -> nodes it depends on.
    dependencies: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
    /// Outgoing edges: node -> nodes depending on it.
    dependents: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
}

impl GraphBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub const fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Adds a node.
    pub fn add_node(&mut self, node: ResourceNode) -> &mut Self {
        self.nodes.push(node);
        self
    }

    /// Adds several nodes.
    pub fn add_nodes(&mut self, nodes: impl IntoIterator<Item = ResourceNode>) -> &mut Self {
        for node in nodes {
            self.add_node(node);
        }
        self
    }

    /// Adds a node, builder style.
    #[must_use]
    pub fn with_node(mut self, node: ResourceNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Number of nodes collected so far.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no nodes were added.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Builds the graph.
    ///
    /// # Errors
    ///
    /// Fails on duplicate ids, on explicit dependencies naming unknown nodes,
    /// and on attribute references to unknown nodes.
    pub fn build(self) -> Result<DependencyGraph, GraphError> {
        let mut nodes = BTreeMap::new();
        for node in self.nodes {
            if nodes.contains_key(&node.id) {
                return Err(GraphError::DuplicateResource { id: node.id });
            }
            nodes.insert(node.id.clone(), node);
        }

        let mut edges = BTreeSet::new();
        for node in nodes.values() {
            for dep in &node.explicit_deps {
                if !nodes.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        owner: node.id.clone(),
                        dependency: dep.clone(),
                    });
                }
                edges.insert(DependencyEdge {
                    from: dep.clone(),
                    to: node.id.clone(),
                });
            }

            for (path, reference) in node.references() {
                if !nodes.contains_key(&reference.resource) {
                    return Err(GraphError::UnknownReference {
                        owner: node.id.clone(),
                        referenced: reference.resource,
                        attribute: path,
                    });
                }
                edges.insert(DependencyEdge {
                    from: reference.resource,
                    to: node.id.clone(),
                });
            }
        }

        let mut dependencies: BTreeMap<ResourceId, BTreeSet<ResourceId>> =
            nodes.keys().map(|id| (id.clone(), BTreeSet::new())).collect();
        let mut dependents = dependencies.clone();

        for edge in edges {
            if let Some(set) = dependencies.get_mut(&edge.to) {
                set.insert(edge.from.clone());
            }
            if let Some(set) = dependents.get_mut(&edge.from) {
                set.insert(edge.to);
            }
        }

        let graph = DependencyGraph {
            nodes,
            dependencies,
            dependents,
        };
        debug!(
            "Built dependency graph: {} nodes, {} edges",
            graph.len(),
            graph.edge_count()
        );
        Ok(graph)
    }
}

impl DependencyGraph {
    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if a node with this id exists.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Looks up a node.
    #[must_use]
    pub fn node(&self, id: &ResourceId) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    /// Iterates nodes in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    /// Iterates node ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.nodes.keys()
    }

    /// Nodes that `id` depends on.
    #[must_use]
    pub fn dependencies_of(&self, id: &ResourceId) -> &BTreeSet<ResourceId> {
        self.dependencies.get(id).unwrap_or(&NO_EDGES)
    }

    /// Nodes that depend on `id`.
    #[must_use]
    pub fn dependents_of(&self, id: &ResourceId) -> &BTreeSet<ResourceId> {
        self.dependents.get(id).unwrap_or(&NO_EDGES)
    }

    /// All edges, sorted and deduplicated.
    #[must_use]
    pub fn edges(&self) -> Vec<DependencyEdge> {
        self.dependents
            .iter()
            .flat_map(|(from, tos)| {
                tos.iter().map(move |to| DependencyEdge {
                    from: from.clone(),
                    to: to.clone(),
                })
            })
            .collect()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.dependents.values().map(BTreeSet::len).sum()
    }

    /// Every node reachable from `id` along outgoing edges, excluding `id`
    /// unless it lies on a cycle.
    #[must_use]
    pub fn transitive_dependents(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&ResourceId> = self.dependents_of(id).iter().collect();

        while let Some(current) = queue.pop_front() {
            if seen.insert(current.clone()) {
                queue.extend(self.dependents_of(current).iter());
            }
        }

        seen
    }
}
