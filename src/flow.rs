//! Dataflow engine: graph, nodes, bindings and the run loop around them.

pub mod bindings;
pub mod graph;
pub mod manager;
pub mod nodes;
pub mod pipeline;

use thiserror::Error;

use graph::NodeId;

pub use graph::FlowContext;
pub use manager::FlowManager;
pub use pipeline::Pipeline;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlowError {
    #[error("landmark source reached end of stream")]
    SourceEnded,
    #[error("flow is already running")]
    AlreadyRunning,
    #[error("flow is not running")]
    NotRunning,
    #[error("flow did not stop within {0} ms")]
    StopTimeout(u64),
    #[error("node {0:?} produced no output within {1} ms")]
    OutputTimeout(NodeId, u64),
}
