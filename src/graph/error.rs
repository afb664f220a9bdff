//! Errors raised while building or validating a DAG, before it reaches [`crate::compile`].

use thiserror::Error;

/// Failure building or validating a graph, prior to topological compilation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A node was referenced (as a predecessor, output, or alias target) that was never added.
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// An edge named a port beyond the producing node's `num_outputs()`.
    #[error("node {node} has no output port {port} (num_outputs = {num_outputs})")]
    PortOutOfRange {
        node: String,
        port: u32,
        num_outputs: usize,
    },

    /// The graph declares more than one node with zero predecessors.
    #[error("graph has multiple root nodes: {0} and {1}")]
    MultipleRoots(String, String),

    /// The graph has no node with zero predecessors (every node depends on something).
    #[error("graph has no root node")]
    NoRoot,

    /// The graph declares more than one auxiliary/parameter-root node.
    #[error("graph has multiple auxiliary nodes: {0} and {1}")]
    MultipleAux(String, String),

    /// An auxiliary node's predecessor referenced a node other than the root.
    #[error("auxiliary node predecessor {0} is not the root (the auxiliary node may only consume root outputs)")]
    InvalidAuxEdge(String),

    /// A regular edge or output referenced the auxiliary node as its producer.
    #[error("node {0} is the auxiliary node and cannot be used as a producer")]
    AuxUsedAsProducer(String),

    /// A parameter-routing target was invalid (unknown, or the auxiliary node itself).
    #[error("invalid parameter routing target: {0}")]
    InvalidParamTarget(String),

    /// The auxiliary node's declared output width is too small to hold every routed target's
    /// parameter sub-vector.
    #[error("auxiliary node's param record has {available} columns, but {required} are routed")]
    ParamRecordTooSmall { available: usize, required: usize },

    /// Kahn's algorithm produced fewer nodes than the graph contains: a cycle exists among the
    /// node ids listed here.
    #[error("graph contains a cycle touching nodes: {0:?}")]
    Cycle(Vec<String>),

    /// A compiled DAG was requested with zero groups.
    #[error("executor requires at least one group")]
    ZeroGroups,

    /// A name was registered twice.
    #[error("duplicate node name: {0}")]
    DuplicateName(String),

    /// An edge descriptor like `"sum.2"` failed to parse its port suffix.
    #[error("invalid edge descriptor: {0}")]
    InvalidEdgeDescriptor(String),

    /// A port alias collided with another alias or a node name.
    #[error("duplicate port alias: {0}")]
    DuplicateAlias(String),

    /// An edge index passed to `remove_edge`/`replace_edge` was out of range for that node's
    /// predecessor list.
    #[error("node {node} has no predecessor edge at index {index} (len = {len})")]
    EdgeIndexOutOfRange { node: String, index: usize, len: usize },
}
