//! Stateless DAG executor, no-history variant.
//!
//! [`FnExec`] drives the same record/offset data flow as
//! [`crate::exec::op_exec::OpExec`] but keeps only the current step's record row per group —
//! no ring buffer, no windowing. Fits nodes whose state needs no retention across resets, or
//! pipeline stages that only ever see the latest value.

use crate::cache_pad::GroupMatrix;
use crate::compile::CompiledDag;
use crate::flat_multivec::FlatMultiVec;
use crate::operator::Operator;

/// Drives a compiled DAG across `num_groups` groups with a single reused record row each.
pub struct FnExec<T> {
    dag: CompiledDag<T>,
    record: GroupMatrix<T>,
    tmp_args: GroupMatrix<T>,

    record_offset: Vec<u32>,
    input_offset: FlatMultiVec<u32>,
    output_offset: Vec<u32>,
    num_groups: usize,
}

impl<T: Copy + Default + 'static> FnExec<T> {
    /// Builds an executor for `dag`.
    pub fn new(dag: CompiledDag<T>) -> Self {
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

        Self {
            dag,
            record: GroupMatrix::new(record_width.max(1), num_groups),
            tmp_args: GroupMatrix::new(max_args.max(1), num_groups),
            record_offset,
            input_offset,
            output_offset,
            num_groups,
        }
    }

    /// Advances group `igrp` by one input row, writing [`FnExec::num_outputs`] values to `out`.
    pub fn on_data(&mut self, inputs: &[T], out: &mut [T], igrp: usize) {
        let Self {
            dag,
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

        for i in 1..nodes.len() {
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

        for (k, &idx) in output_offset.iter().enumerate() {
            out[k] = row[idx as usize];
        }
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
