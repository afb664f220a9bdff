//! DAG construction surfaces: [`handle::Graph`] (opaque node handles) and [`named::NamedGraph`]
//! (string names with dotted port descriptors and root port aliases). Both produce the same
//! handle-keyed [`handle::Graph`] that [`crate::compile`] consumes.

pub mod error;
pub mod handle;
pub mod named;

pub use error::GraphError;
pub use handle::{Edge, Graph, NodeId};
pub use named::NamedGraph;
