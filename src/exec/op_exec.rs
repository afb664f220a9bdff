//! Multi-group stateful DAG executor.
//!
//! [`OpExec`] drives a [`CompiledDag`] through successive `(timestamp, input-row)` pairs per
//! group, retaining bounded history per node so that windowed operators can evict expired
//! rows without rescanning the whole stream.

use crate::cache_pad::GroupMatrix;
use crate::compile::CompiledDag;
use crate::flat_multivec::FlatMultiVec;
use crate::operator::{Operator, WindowMode};
use crate::ring_buffer::HistoryRingBuffer;

#[derive(Clone, Copy)]
struct WinDesc<T> {
    mode: WindowMode,
    win_event: usize,
    win_time: T,
}

/// Drives a compiled DAG across `num_groups` independent, identically-shaped state machines.
///
/// Each step's output row is staged in a per-group scratch row rather than written directly
/// into the history ring buffer, so eviction can freely read older rows of the same group's
/// history while the current step is still being computed.
pub struct OpExec<T> {
    dag: CompiledDag<T>,
    history: Vec<HistoryRingBuffer<T, T>>,
    win_desc: Vec<WinDesc<T>>,
    step_count: GroupMatrix<usize>,
    tmp_args: GroupMatrix<T>,
    scratch: GroupMatrix<T>,
    all_cumulative: bool,

    record_offset: Vec<u32>,
    input_offset: FlatMultiVec<u32>,
    output_offset: Vec<u32>,
    num_groups: usize,
    num_nodes: usize,
}

impl<T> OpExec<T>
where
    T: Copy + Default + PartialOrd + std::ops::Sub<Output = T> + 'static,
{
    /// Builds an executor for `dag`, with every group's history ring buffer pre-sized to
    /// `history_size_hint` rows (rounded up to a power of two).
    pub fn new(dag: CompiledDag<T>, history_size_hint: usize) -> Self {
        let hints = vec![history_size_hint; dag.num_groups()];
        Self::with_hints(dag, &hints)
    }

    /// Builds an executor with a per-group history size hint.
    ///
    /// # Panics
    ///
    /// Panics if `hints.len() != dag.num_groups()`.
    pub fn with_hints(dag: CompiledDag<T>, hints: &[usize]) -> Self {
        assert_eq!(hints.len(), dag.num_groups(), "one history hint required per group");

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

        let mut win_desc = Vec::with_capacity(num_nodes);
        let mut step_count = GroupMatrix::<usize>::new(num_nodes, num_groups);
        let mut n_cumulative = 0;
        {
            let nodes0 = dag.group(0);
            for (i, mode) in dag.window_mode.iter().enumerate() {
                let desc = match mode {
                    WindowMode::Cumulative => {
                        for g in 0..num_groups {
                            step_count.row_mut(g)[i] = 1;
                        }
                        n_cumulative += 1;
                        WinDesc {
                            mode: *mode,
                            win_event: 0,
                            win_time: T::default(),
                        }
                    }
                    WindowMode::Event | WindowMode::DynEvent => WinDesc {
                        mode: *mode,
                        win_event: nodes0[i].window_size_event(),
                        win_time: T::default(),
                    },
                    WindowMode::Time | WindowMode::DynTime => WinDesc {
                        mode: *mode,
                        win_event: 0,
                        win_time: nodes0[i].window_size_time(),
                    },
                };
                win_desc.push(desc);
            }
        }

        let history = hints
            .iter()
            .map(|&hint| HistoryRingBuffer::<T, T>::new(record_width, hint.max(1)))
            .collect();

        Self {
            dag,
            history,
            win_desc,
            step_count,
            tmp_args: GroupMatrix::new(max_args.max(1), num_groups),
            scratch: GroupMatrix::new(record_width.max(1), num_groups),
            all_cumulative: n_cumulative == num_nodes,
            record_offset,
            input_offset,
            output_offset,
            num_groups,
            num_nodes,
        }
    }

    /// Advances group `igrp` by one `(timestamp, input-row)` step.
    pub fn on_data(&mut self, timestamp: T, inputs: &[T], igrp: usize) {
        let Self {
            dag,
            history,
            win_desc,
            step_count,
            tmp_args,
            scratch,
            all_cumulative,
            record_offset,
            input_offset,
            ..
        } = self;
        let all_cumulative = *all_cumulative;

        let nodes = dag.group_mut(igrp);
        let row = scratch.row_mut(igrp);

        nodes[0].on_data(inputs);
        let off0 = record_offset[0] as usize;
        let n_out0 = nodes[0].num_outputs();
        nodes[0].value(&mut row[off0..off0 + n_out0]);

        for i in 1..nodes.len() {
            let offsets = input_offset.row(i);
            {
                let tmp = tmp_args.row_mut(igrp);
                for (k, &off) in offsets.iter().enumerate() {
                    tmp[k] = row[off as usize];
                }
            }
            nodes[i].on_data(&tmp_args.row(igrp)[..offsets.len()]);

            match win_desc[i].mode {
                WindowMode::Cumulative => {}
                WindowMode::DynEvent => {
                    win_desc[i].win_event = nodes[i].window_size_event();
                    step_count.row_mut(igrp)[i] += 1;
                    evict_event(
                        &win_desc[i],
                        step_count,
                        &history[igrp],
                        input_offset,
                        tmp_args,
                        nodes,
                        i,
                        igrp,
                    );
                }
                WindowMode::Event => {
                    step_count.row_mut(igrp)[i] += 1;
                    evict_event(
                        &win_desc[i],
                        step_count,
                        &history[igrp],
                        input_offset,
                        tmp_args,
                        nodes,
                        i,
                        igrp,
                    );
                }
                WindowMode::DynTime => {
                    win_desc[i].win_time = nodes[i].window_size_time();
                    step_count.row_mut(igrp)[i] += 1;
                    evict_time(
                        &win_desc[i],
                        timestamp,
                        step_count,
                        &history[igrp],
                        input_offset,
                        tmp_args,
                        nodes,
                        i,
                        igrp,
                    );
                }
                WindowMode::Time => {
                    step_count.row_mut(igrp)[i] += 1;
                    evict_time(
                        &win_desc[i],
                        timestamp,
                        step_count,
                        &history[igrp],
                        input_offset,
                        tmp_args,
                        nodes,
                        i,
                        igrp,
                    );
                }
            }

            let n_out = nodes[i].num_outputs();
            let off = record_offset[i] as usize;
            nodes[i].value(&mut row[off..off + n_out]);
        }

        history[igrp].push(timestamp, row);
        cleanup_history(history, step_count, win_desc.len(), igrp, all_cumulative);
    }

    /// Writes the DAG's current output row for group `igrp` to `out`.
    pub fn value(&self, out: &mut [T], igrp: usize) {
        let (_, row) = self.history[igrp].back();
        for (k, &idx) in self.output_offset.iter().enumerate() {
            out[k] = row[idx as usize];
        }
    }

    /// Dispatches an out-of-band parameter update through group `igrp`'s auxiliary/parameter
    /// root. The aux operator is driven once more from the most recently computed record row,
    /// then fed `params`; its resulting output is split per the compiled routing table and
    /// each sub-vector is forwarded to its registered target's own `on_param`. A no-op if the
    /// compiled DAG declares no auxiliary node.
    pub fn on_param(&mut self, params: &[T], igrp: usize) {
        let Self { dag, history, .. } = self;
        if !dag.has_aux() {
            return;
        }
        let (_, row) = history[igrp].back();
        let gathered: Vec<T> = dag.aux_input_offset.iter().map(|&off| row[off as usize]).collect();

        let record: Vec<T> = {
            let aux = dag.aux_mut(igrp).expect("has_aux checked above");
            aux.on_data(&gathered);
            aux.on_param(params);
            let mut record = vec![T::default(); aux.num_outputs()];
            aux.value(&mut record);
            record
        };

        let routes = dag.param_offset.clone();
        for route in &routes {
            dag.group_mut(igrp)[route.target_index]
                .on_param(&record[route.offset..route.offset + route.len]);
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
fn evict_event<T>(
    desc: &WinDesc<T>,
    step_count: &mut GroupMatrix<usize>,
    history: &HistoryRingBuffer<T, T>,
    input_offset: &FlatMultiVec<u32>,
    tmp_args: &mut GroupMatrix<T>,
    nodes: &mut [crate::arena::ArenaBox<dyn crate::operator::Operator<T>>],
    id: usize,
    igrp: usize,
) where
    T: Copy,
{
    let win_size = desc.win_event;
    let step_cnt = step_count.row(igrp)[id];
    if step_cnt <= win_size {
        return;
    }
    let total_len = history.len() + 1;
    let k = total_len - step_cnt;
    let kp = total_len - win_size;

    let offsets = input_offset.row(id);
    for pos in k..kp {
        let (_, mem) = history.get(pos);
        let tmp = tmp_args.row_mut(igrp);
        for (slot, &off) in offsets.iter().enumerate() {
            tmp[slot] = mem[off as usize];
        }
        nodes[id].on_evict(&tmp[..offsets.len()]);
        step_count.row_mut(igrp)[id] -= 1;
    }
}

#[allow(clippy::too_many_arguments)]
fn evict_time<T>(
    desc: &WinDesc<T>,
    timestamp: T,
    step_count: &mut GroupMatrix<usize>,
    history: &HistoryRingBuffer<T, T>,
    input_offset: &FlatMultiVec<u32>,
    tmp_args: &mut GroupMatrix<T>,
    nodes: &mut [crate::arena::ArenaBox<dyn crate::operator::Operator<T>>],
    id: usize,
    igrp: usize,
) where
    T: Copy + PartialOrd + std::ops::Sub<Output = T>,
{
    let win_start = timestamp - desc.win_time;
    let step_cnt = step_count.row(igrp)[id];
    let total_len = history.len() + 1;
    let k = total_len - step_cnt;

    let offsets = input_offset.row(id);
    let mut pos = k;
    while pos < history.len() {
        let (t, mem) = history.get(pos);
        if t > win_start {
            break;
        }
        let tmp = tmp_args.row_mut(igrp);
        for (slot, &off) in offsets.iter().enumerate() {
            tmp[slot] = mem[off as usize];
        }
        nodes[id].on_evict(&tmp[..offsets.len()]);
        step_count.row_mut(igrp)[id] -= 1;
        pos += 1;
    }
}

fn cleanup_history<T>(
    history: &mut [HistoryRingBuffer<T, T>],
    step_count: &GroupMatrix<usize>,
    num_nodes: usize,
    igrp: usize,
    all_cumulative: bool,
) where
    T: Copy + Default,
{
    let keep = if all_cumulative {
        1
    } else {
        (0..num_nodes).map(|i| step_count.row(igrp)[i]).max().unwrap_or(1).max(1)
    };
    while history[igrp].len() > keep {
        history[igrp].pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;
    use crate::graph::handle::Graph;
    use crate::operator::WindowDomain;

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

    #[derive(Clone, Default)]
    struct EventWindowSum {
        acc: f64,
    }
    impl Operator<f64> for EventWindowSum {
        fn on_data(&mut self, inputs: &[f64]) {
            self.acc += inputs[0];
        }
        fn on_evict(&mut self, inputs: &[f64]) {
            self.acc -= inputs[0];
        }
        fn value(&self, out: &mut [f64]) {
            out[0] = self.acc;
        }
        fn reset(&mut self) {
            self.acc = 0.0;
        }
        fn num_inputs(&self) -> usize {
            1
        }
        fn num_outputs(&self) -> usize {
            1
        }
        fn is_cumulative(&self) -> bool {
            false
        }
        fn domain(&self) -> WindowDomain {
            WindowDomain::Event
        }
        fn window_size_event(&self) -> usize {
            3
        }
    }

    #[test]
    fn cumulative_chain_accumulates_across_groups_independently() {
        let mut g = Graph::<f64>::new();
        let root = g.add_root(Passthrough::default()).unwrap();
        let sum = g.add_node(SumAll::default(), [root]);
        g.set_output([sum]);
        let dag = compile(&g, 2).unwrap();
        let mut exec = OpExec::new(dag, 8);

        exec.on_data(1.0, &[1.0], 0);
        exec.on_data(2.0, &[2.0], 0);
        exec.on_data(1.0, &[10.0], 1);

        let mut out = [0.0];
        exec.value(&mut out, 0);
        assert_eq!(out[0], 3.0);
        exec.value(&mut out, 1);
        assert_eq!(out[0], 10.0);
    }

    #[test]
    fn event_window_evicts_beyond_window_size() {
        let mut g = Graph::<f64>::new();
        let root = g.add_root(Passthrough::default()).unwrap();
        let win = g.add_node(EventWindowSum::default(), [root]);
        g.set_output([win]);
        let dag = compile(&g, 1).unwrap();
        let mut exec = OpExec::new(dag, 8);

        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            exec.on_data(v, &[v], 0);
        }
        let mut out = [0.0];
        exec.value(&mut out, 0);
        // window of 3: last values 3+4+5
        assert_eq!(out[0], 12.0);
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
        let mut exec = OpExec::new(dag, 8);
        exec.on_data(1.0, &[1.0], 0);

        exec.on_param(&[42.0], 0);
        exec.on_data(2.0, &[1.0], 0);

        let mut out = [0.0];
        exec.value(&mut out, 0);
        assert_eq!(out[0], 42.0);
    }

    #[test]
    fn diamond_shape_combines_both_branches() {
        #[derive(Clone, Default)]
        struct Double(f64);
        impl Operator<f64> for Double {
            fn on_data(&mut self, inputs: &[f64]) {
                self.0 = inputs[0] * 2.0;
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
        struct Triple(f64);
        impl Operator<f64> for Triple {
            fn on_data(&mut self, inputs: &[f64]) {
                self.0 = inputs[0] * 3.0;
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

        let mut g = Graph::<f64>::new();
        let root = g.add_root(Passthrough::default()).unwrap();
        let double = g.add_node(Double::default(), [root]);
        let triple = g.add_node(Triple::default(), [root]);
        let sum = g.add_node(SumAll::default(), [double]);
        let _ = triple;
        g.set_output([sum]);
        let dag = compile(&g, 1).unwrap();
        let mut exec = OpExec::new(dag, 8);
        exec.on_data(1.0, &[5.0], 0);
        let mut out = [0.0];
        exec.value(&mut out, 0);
        assert_eq!(out[0], 10.0);
    }
}
