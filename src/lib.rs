//! A multi-group DAG executor for streaming computation over time-ordered event streams.
//!
//! A [`graph::handle::Graph`] (or the string-keyed [`graph::NamedGraph`]) describes a directed
//! acyclic graph of stateful [`operator::Operator`]s. [`compile::compile`] topologically sorts
//! it into a [`compile::CompiledDag`]: group-replicated, arena-resident operator state plus a
//! flat record layout. One of the three executors in [`exec`] then drives that `CompiledDag`
//! one event at a time, independently per group:
//!
//! - [`exec::op_exec::OpExec`] — cumulative or windowed nodes, backed by a per-group history
//!   ring buffer.
//! - [`exec::fn_exec::FnExec`] — stateless nodes, no history retained across steps.
//! - [`exec::tumble_exec::TumbleExec`] — nodes reset whenever a [`exec::tumble_exec::TumblePredicate`]
//!   signals a tumbling window close.
//!
//! [`pipeline::Pipeline`] chains any mix of these into one multi-stage computation.

pub mod arena;
pub mod cache_pad;
pub mod compile;
pub mod exec;
pub mod flat_multivec;
pub mod graph;
pub mod operator;
pub mod pipeline;
pub mod ring_buffer;

pub use compile::{compile, CompiledDag, ParamRoute};
pub use exec::{EmitSpec, FnExec, GroupBarrier, OpExec, TumbleExec, TumblePredicate};
pub use graph::{Graph, GraphError, NamedGraph, NodeId};
pub use operator::{Operator, WindowDomain, WindowMode};
pub use pipeline::{Pipeline, PipelineError, Stage};
