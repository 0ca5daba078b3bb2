//! Resource graph module.
//!
//! This module holds the data model of a planning pass:
//! - Resource nodes with attribute bags and ordering hints
//! - Deferred attribute references resolved after apply
//! - The dependency graph builder

mod builder;
mod node;
mod value;

pub use builder::{DependencyEdge, DependencyGraph, GraphBuilder};
pub use node::{DesiredState, NodeStatus, ResourceId, ResourceNode};
pub use value::{
    AppliedAttributes, AttributeReference, AttributeValue, Attributes, REFERENCE_KEY,
    TEMPLATE_KEY, TemplatePart,
};
