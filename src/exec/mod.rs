//! Executors that drive a [`crate::compile::CompiledDag`] across groups: [`op_exec::OpExec`]
//! (windowed, history-backed), [`fn_exec::FnExec`] (stateless, no history), and
//! [`tumble_exec::TumbleExec`] (predicate-gated tumbling windows).

pub mod barrier;
pub mod fn_exec;
pub mod op_exec;
pub mod tumble_exec;

pub use barrier::GroupBarrier;
pub use fn_exec::FnExec;
pub use op_exec::OpExec;
pub use tumble_exec::{EmitSpec, TumbleExec, TumblePredicate};
