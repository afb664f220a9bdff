//! Tumbling-window executor, predicate-gated variant.
//!
//! A [`TumblePredicate`] decides, independently per group, when the current window closes.
//! Non-root nodes are reset between windows; [`TumbleExec::on_data`] only returns a timestamp
//! on the step that closes a window, matching how a caller would decide whether to forward an
//! emission downstream.

use crate::arena::ArenaBox;
use crate::cache_pad::GroupMatrix;
use crate::compile::CompiledDag;
use crate::flat_multivec::FlatMultiVec;
use crate::operator::Operator;

/// Decides when a group's tumbling window closes and how the closing row is flushed.
pub trait TumblePredicate<T>: 'static {
    /// Feeds one `(timestamp, input-row)` step; returns whether the window closes here.
    fn on_data(&mut self, timestamp: T, inputs: &[T]) -> bool;

    /// Describes how to close the window that just triggered. Only called immediately after
    /// an `on_data` call that returned `true`.
    fn emit(&mut self) -> EmitSpec<T>;
}

/// How a closing window should be flushed.
#[derive(Debug, Clone, Copy)]
pub struct EmitSpec<T> {
    /// If `true`, the triggering row is folded into the emitted aggregate before flushing
    /// (update → flush → reset). If `false`, the aggregate is flushed as it stood before this
    /// row, nodes are reset, and the triggering row starts the next window (flush → reset →
    /// update).
    pub include: bool,
    /// Timestamp reported to the caller for this emission.
    pub timestamp: T,
}

/// Drives a compiled DAG across `num_groups` groups, resetting non-root node state whenever
/// `W` signals a window close.
pub struct TumbleExec<T, W> {
    dag: CompiledDag<T>,
    windows: Vec<W>,
    record: GroupMatrix<T>,
    tmp_args: GroupMatrix<T>,

    record_offset: Vec<u32>,
    input_offset: FlatMultiVec<u32>,
    output_offset: Vec<u32>,
    num_groups: usize,
}

impl<T, W> TumbleExec<T, W>
where
    T: Copy + Default + 'static,
    W: TumblePredicate<T> + Clone,
{
    /// Builds an executor for `dag`, cloning `window_template` once per group.
    pub fn new(dag: CompiledDag<T>, window_template: W) -> Self {
        let num_groups = dag.num_groups();
        let num_nodes = dag.num_nodes();
        let record_offset = dag.record_offset.clone();
        let input_offset = dag.input_offset.clone();
        let output_offset = dag.output_offset.clone();
        let record_width = dag.record_size;

        let mut max_args = 0usize;
        for i in 0..num_nodes {
            max_args = max_args.max(input_offset.row_len(i));
        }

        let windows = (0..num_groups).map(|_| window_template.clone()).collect();

        Self {
            dag,
            windows,
            record: GroupMatrix::new(record_width.max(1), num_groups),
            tmp_args: GroupMatrix::new(max_args.max(1), num_groups),
            record_offset,
            input_offset,
            output_offset,
            num_groups,
        }
    }

    /// Advances group `igrp`. Returns `Some(timestamp)` and writes `out` on a step that closes
    /// the window; returns `None` and leaves `out` untouched otherwise.
    pub fn on_data(&mut self, timestamp: T, inputs: &[T], out: &mut [T], igrp: usize) -> Option<T> {
        let Self {
            dag,
            windows,
            record,
            tmp_args,
            record_offset,
            input_offset,
            output_offset,
            ..
        } = self;

        let nodes = dag.group_mut(igrp);
        let row = record.row_mut(igrp);

        nodes[0].on_data(inputs);
        let off0 = record_offset[0] as usize;
        let n_out0 = nodes[0].num_outputs();
        nodes[0].value(&mut row[off0..off0 + n_out0]);

        let should_emit = windows[igrp].on_data(timestamp, inputs);
        if !should_emit {
            for i in 1..nodes.len() {
                step_node(nodes, row, record_offset, input_offset, tmp_args, igrp, i);
            }
            return None;
        }

        let spec = windows[igrp].emit();
        if spec.include {
            for i in 1..nodes.len() {
                step_node(nodes, row, record_offset, input_offset, tmp_args, igrp, i);
                nodes[i].reset();
            }
            flush(row, output_offset, out);
        } else {
            flush(row, output_offset, out);
            for i in 1..nodes.len() {
                nodes[i].reset();
                step_node(nodes, row, record_offset, input_offset, tmp_args, igrp, i);
            }
        }
        Some(spec.timestamp)
    }

    /// Dispatches an out-of-band parameter update through group `igrp`'s auxiliary/parameter
    /// root. The aux operator is driven once more from the most recently computed record row,
    /// then fed `params`; its resulting output is split per the compiled routing table and
    /// each sub-vector is forwarded to its registered target's own `on_param`. A no-op if the
    /// compiled DAG declares no auxiliary node.
    pub fn on_param(&mut self, params: &[T], igrp: usize) {
        let Self { dag, record, .. } = self;
        if !dag.has_aux() {
            return;
        }
        let row = record.row(igrp);
        let gathered: Vec<T> = dag.aux_input_offset.iter().map(|&off| row[off as usize]).collect();

        let param_record: Vec<T> = {
            let aux = dag.aux_mut(igrp).expect("has_aux checked above");
            aux.on_data(&gathered);
            aux.on_param(params);
            let mut param_record = vec![T::default(); aux.num_outputs()];
            aux.value(&mut param_record);
            param_record
        };

        let routes = dag.param_offset.clone();
        for route in &routes {
            dag.group_mut(igrp)[route.target_index]
                .on_param(&param_record[route.offset..route.offset + route.len]);
        }
    }

    /// Number of input columns the root node expects.
    pub fn num_inputs(&self) -> usize {
        self.dag.group(0)[0].num_inputs()
    }

    /// Number of declared output columns.
    pub fn num_outputs(&self) -> usize {
        self.output_offset.len()
    }

    /// Number of groups this executor drives.
    pub fn num_groups(&self) -> usize {
        self.num_groups
    }
}

#[allow(clippy::too_many_arguments)]
fn step_node<T: Copy + Default>(
    nodes: &mut [ArenaBox<dyn Operator<T>>],
    row: &mut [T],
    record_offset: &[u32],
    input_offset: &FlatMultiVec<u32>,
    tmp_args: &mut GroupMatrix<T>,
    igrp: usize,
    i: usize,
) {
    let offsets = input_offset.row(i);
    {
        let tmp = tmp_args.row_mut(igrp);
        for (k, &off) in offsets.iter().enumerate() {
            tmp[k] = row[off as usize];
        }
    }
    nodes[i].on_data(&tmp_args.row(igrp)[..offsets.len()]);
    let n_out = nodes[i].num_outputs();
    let off = record_offset[i] as usize;
    nodes[i].value(&mut row[off..off + n_out]);
}

fn flush<T: Copy>(row: &[T], output_offset: &[u32], out: &mut [T]) {
    for (k, &idx) in output_offset.iter().enumerate() {
        out[k] = row[idx as usize];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;
    use crate::graph::handle::Graph;

    #[derive(Clone, Default)]
    struct Passthrough(f64);
    impl Operator<f64> for Passthrough {
        fn on_data(&mut self, inputs: &[f64]) {
            self.0 = inputs[0];
        }
        fn value(&self, out: &mut [f64]) {
            out[0] = self.0;
        }
        fn reset(&mut self) {
            self.0 = 0.0;
        }
        fn num_inputs(&self) -> usize {
            1
        }
        fn num_outputs(&self) -> usize {
            1
        }
    }

    #[derive(Clone, Default)]
    struct SumAll(f64);
    impl Operator<f64> for SumAll {
        fn on_data(&mut self, inputs: &[f64]) {
            self.0 += inputs[0];
        }
        fn value(&self, out: &mut [f64]) {
            out[0] = self.0;
        }
        fn reset(&mut self) {
            self.0 = 0.0;
        }
        fn num_inputs(&self) -> usize {
            1
        }
        fn num_outputs(&self) -> usize {
            1
        }
    }

    #[derive(Clone)]
    struct EveryThree {
        count: usize,
        include: bool,
    }
    impl TumblePredicate<f64> for EveryThree {
        fn on_data(&mut self, _timestamp: f64, _inputs: &[f64]) -> bool {
            self.count += 1;
            self.count == 3
        }
        fn emit(&mut self) -> EmitSpec<f64> {
            self.count = 0;
            EmitSpec {
                include: self.include,
                timestamp: 0.0,
            }
        }
    }

    #[derive(Clone, Default)]
    struct ParamTarget(f64);
    impl Operator<f64> for ParamTarget {
        fn on_data(&mut self, _: &[f64]) {}
        fn value(&self, out: &mut [f64]) {
            out[0] = self.0;
        }
        fn reset(&mut self) {
            self.0 = 0.0;
        }
        fn num_inputs(&self) -> usize {
            1
        }
        fn num_outputs(&self) -> usize {
            1
        }
        fn on_param(&mut self, params: &[f64]) {
            self.0 = params[0];
        }
        fn num_param(&self) -> usize {
            1
        }
    }

    #[derive(Clone, Default)]
    struct AuxEcho(f64);
    impl Operator<f64> for AuxEcho {
        fn on_data(&mut self, _: &[f64]) {}
        fn value(&self, out: &mut [f64]) {
            out[0] = self.0;
        }
        fn reset(&mut self) {
            self.0 = 0.0;
        }
        fn num_inputs(&self) -> usize {
            1
        }
        fn num_outputs(&self) -> usize {
            1
        }
        fn on_param(&mut self, params: &[f64]) {
            self.0 = params[0];
        }
        fn num_param(&self) -> usize {
            1
        }
    }

    #[test]
    fn on_param_dispatches_through_aux_routing_table() {
        let mut g = Graph::<f64>::new();
        let root = g.add_root(Passthrough::default()).unwrap();
        let sink = g.add_node(ParamTarget::default(), [root]);
        g.add_aux(AuxEcho::default(), [root]).unwrap();
        g.route_param(sink).unwrap();
        g.set_output([sink]);

        let dag = compile(&g, 1).unwrap();
        let mut exec = TumbleExec::new(
            dag,
            EveryThree {
                count: 0,
                include: true,
            },
        );
        let mut out = [0.0];
        exec.on_data(1.0, &[1.0], &mut out, 0);

        exec.on_param(&[7.0], 0);
        exec.on_data(2.0, &[1.0], &mut out, 0);
        exec.on_data(3.0, &[1.0], &mut out, 0);

        assert_eq!(out[0], 7.0);
    }

    #[test]
    fn tumble_with_include_folds_triggering_row_before_reset() {
        let mut g = Graph::<f64>::new();
        let root = g.add_root(Passthrough::default()).unwrap();
        let sum = g.add_node(SumAll::default(), [root]);
        g.set_output([sum]);
        let dag = compile(&g, 1).unwrap();
        let mut exec = TumbleExec::new(
            dag,
            EveryThree {
                count: 0,
                include: true,
            },
        );

        let mut out = [0.0];
        assert!(exec.on_data(1.0, &[1.0], &mut out, 0).is_none());
        assert!(exec.on_data(2.0, &[2.0], &mut out, 0).is_none());
        let ts = exec.on_data(3.0, &[3.0], &mut out, 0);
        assert!(ts.is_some());
        assert_eq!(out[0], 6.0); // 1+2+3, folded in before flush
    }

    #[test]
    fn tumble_without_include_flushes_before_triggering_row_starts_next_window() {
        let mut g = Graph::<f64>::new();
        let root = g.add_root(Passthrough::default()).unwrap();
        let sum = g.add_node(SumAll::default(), [root]);
        g.set_output([sum]);
        let dag = compile(&g, 1).unwrap();
        let mut exec = TumbleExec::new(
            dag,
            EveryThree {
                count: 0,
                include: false,
            },
        );

        let mut out = [0.0];
        exec.on_data(1.0, &[1.0], &mut out, 0);
        exec.on_data(2.0, &[2.0], &mut out, 0);
        let ts = exec.on_data(3.0, &[3.0], &mut out, 0);
        assert!(ts.is_some());
        assert_eq!(out[0], 3.0); // 1+2, the triggering row (3) is not folded in yet

        // Row 3 already started the next window via reset -> update (acc = 3 going in).
        let mut out2 = [0.0];
        assert!(exec.on_data(4.0, &[4.0], &mut out2, 0).is_none());
        assert!(exec.on_data(5.0, &[5.0], &mut out2, 0).is_none());
        let ts2 = exec.on_data(6.0, &[6.0], &mut out2, 0);
        assert!(ts2.is_some());
        assert_eq!(out2[0], 3.0 + 4.0 + 5.0); // row 6 itself isn't folded in yet
    }
}
