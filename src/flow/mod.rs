//! The data flow: nodes, the graph that evaluates them and the builder that
//! turns definitions into a graph.

pub mod builder;
pub mod graph;
pub mod node;

pub use builder::{parse_definitions, GraphBuilder};
pub use graph::{ArrayInfo, DataFlow, Request};
pub use node::{FlowNode, NodeId, Operand};
