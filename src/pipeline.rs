//! Composition of heterogeneous executor stages into one multi-stage pipeline.
//!
//! A [`Pipeline`] chains [`crate::exec::op_exec::OpExec`], [`crate::exec::fn_exec::FnExec`], and
//! [`crate::exec::tumble_exec::TumbleExec`] stages, feeding each stage's output record as the
//! next stage's input row. A stage that gates emission (a tumbling stage with no window close
//! this step) short-circuits the remaining stages for this call, but every stage already
//! visited has still advanced its own state.

use thiserror::Error;

use crate::cache_pad::GroupMatrix;
use crate::exec::fn_exec::FnExec;
use crate::exec::op_exec::OpExec;
use crate::exec::tumble_exec::{TumbleExec, TumblePredicate};

/// Errors produced while assembling a [`Pipeline`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// A stage was built for a different number of groups than the pipeline.
    #[error("stage group count mismatch: pipeline has {expected} groups, stage has {found}")]
    GroupMismatch {
        /// Number of groups the pipeline was built for.
        expected: usize,
        /// Number of groups the stage reports.
        found: usize,
    },
    /// A stage's input width doesn't match the previous stage's output width.
    #[error("stage shape mismatch: previous stage emits {expected} columns, stage expects {found}")]
    ShapeMismatch {
        /// Previous stage's output width.
        expected: usize,
        /// This stage's input width.
        found: usize,
    },
}

/// One pipeline stage: advances a single group by one step, optionally gating emission.
pub trait Stage<T> {
    /// Advances group `igrp`. Returns `Some(timestamp)` and writes `out` when this stage
    /// emits on this step; returns `None` and leaves `out` untouched otherwise.
    fn on_data(&mut self, timestamp: T, inputs: &[T], out: &mut [T], igrp: usize) -> Option<T>;
    /// Number of input columns this stage expects.
    fn num_inputs(&self) -> usize;
    /// Number of output columns this stage produces.
    fn num_outputs(&self) -> usize;
    /// Number of groups this stage was built for.
    fn num_groups(&self) -> usize;
}

impl<T> Stage<T> for OpExec<T>
where
    T: Copy + Default + PartialOrd + std::ops::Sub<Output = T> + 'static,
{
    fn on_data(&mut self, timestamp: T, inputs: &[T], out: &mut [T], igrp: usize) -> Option<T> {
        OpExec::on_data(self, timestamp, inputs, igrp);
        OpExec::value(self, out, igrp);
        Some(timestamp)
    }
    fn num_inputs(&self) -> usize {
        OpExec::num_inputs(self)
    }
    fn num_outputs(&self) -> usize {
        OpExec::num_outputs(self)
    }
    fn num_groups(&self) -> usize {
        OpExec::num_groups(self)
    }
}

impl<T: Copy + Default + 'static> Stage<T> for FnExec<T> {
    fn on_data(&mut self, timestamp: T, inputs: &[T], out: &mut [T], igrp: usize) -> Option<T> {
        FnExec::on_data(self, inputs, out, igrp);
        Some(timestamp)
    }
    fn num_inputs(&self) -> usize {
        FnExec::num_inputs(self)
    }
    fn num_outputs(&self) -> usize {
        FnExec::num_outputs(self)
    }
    fn num_groups(&self) -> usize {
        FnExec::num_groups(self)
    }
}

impl<T, W> Stage<T> for TumbleExec<T, W>
where
    T: Copy + Default + 'static,
    W: TumblePredicate<T> + Clone,
{
    fn on_data(&mut self, timestamp: T, inputs: &[T], out: &mut [T], igrp: usize) -> Option<T> {
        TumbleExec::on_data(self, timestamp, inputs, out, igrp)
    }
    fn num_inputs(&self) -> usize {
        TumbleExec::num_inputs(self)
    }
    fn num_outputs(&self) -> usize {
        TumbleExec::num_outputs(self)
    }
    fn num_groups(&self) -> usize {
        TumbleExec::num_groups(self)
    }
}

/// A sequence of [`Stage`]s chained so each stage's output feeds the next stage's input.
pub struct Pipeline<'a, T> {
    stages: Vec<&'a mut dyn Stage<T>>,
    buffers: Vec<GroupMatrix<T>>,
    num_groups: usize,
}

impl<'a, T: Copy + Default> Pipeline<'a, T> {
    /// Builds an empty pipeline over `num_groups` groups.
    pub fn new(num_groups: usize) -> Self {
        Self {
            stages: Vec::new(),
            buffers: Vec::new(),
            num_groups,
        }
    }

    /// Appends `stage`, validating its group count and, if this isn't the first stage, that its
    /// input width matches the previous stage's output width.
    pub fn add_stage(&mut self, stage: &'a mut dyn Stage<T>) -> Result<(), PipelineError> {
        if stage.num_groups() != self.num_groups {
            return Err(PipelineError::GroupMismatch {
                expected: self.num_groups,
                found: stage.num_groups(),
            });
        }
        if let Some(prev) = self.stages.last() {
            let prev_outputs = prev.num_outputs();
            if prev_outputs != stage.num_inputs() {
                return Err(PipelineError::ShapeMismatch {
                    expected: prev_outputs,
                    found: stage.num_inputs(),
                });
            }
            self.buffers
                .push(GroupMatrix::new(prev_outputs.max(1), self.num_groups));
        }
        self.stages.push(stage);
        Ok(())
    }

    /// Advances group `igrp` through every stage. Returns `Some(timestamp)` and writes `out`
    /// only if every stage emitted on this step; the first stage that withholds emission stops
    /// the chain, but stages visited before it have already updated their state.
    pub fn on_data(&mut self, timestamp: T, inputs: &[T], out: &mut [T], igrp: usize) -> Option<T> {
        let n = self.stages.len();
        let mut result = None;
        for i in 0..n {
            let (before, after) = self.buffers.split_at_mut(i);
            let input_row: &[T] = if i == 0 {
                inputs
            } else {
                before[i - 1].row(igrp)
            };

            let emitted = if i + 1 == n {
                self.stages[i].on_data(timestamp, input_row, out, igrp)
            } else {
                let target = after[0].row_mut(igrp);
                self.stages[i].on_data(timestamp, input_row, target, igrp)
            };

            match emitted {
                Some(ts) => result = Some(ts),
                None => return None,
            }
        }
        result
    }

    /// Number of stages currently in the pipeline.
    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// Number of groups this pipeline drives.
    pub fn num_groups(&self) -> usize {
        self.num_groups
    }
}
