//! Topological compilation of a [`crate::graph::handle::Graph`] into a [`CompiledDag`]: a
//! flat, cache-friendly layout ready for [`crate::exec::op_exec::OpExec`] to drive.
//!
//! Compilation does four things, in order: (1) topologically sorts the main node set with
//! Kahn's algorithm, rejecting cycles, and separately places the auxiliary/parameter-root node
//! (if any) outside that order, since it only ever consumes root outputs; (2) lays out each
//! main node's output columns in one flat "record" row and records every node's input column
//! offsets into that row, plus the auxiliary node's own gathered input offsets and its
//! parameter-routing table; (3) sizes one cache-line-padded arena block per group for the main
//! nodes, and a second one for the auxiliary node if present; (4) clones each node's operator
//! template into every group's block.

use rustc_hash::FxHashMap;
use tracing::{debug, instrument};

use crate::arena::{aligned_size, Arena, ArenaBox};
use crate::cache_pad::CACHELINE_SIZE;
use crate::flat_multivec::FlatMultiVec;
use crate::graph::handle::{Graph, NodeId};
use crate::graph::GraphError;
use crate::operator::{resolve_window_mode, Operator, WindowMode};

/// Where one parameter-routing target's sub-vector lives within the auxiliary node's output
/// record, and which compiled node index it is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamRoute {
    /// Index of the target within [`CompiledDag::group`]'s node slice.
    pub target_index: usize,
    /// Offset of this target's sub-vector within the auxiliary node's `value()` output.
    pub offset: usize,
    /// Width of this target's sub-vector (the target's `num_param()`).
    pub len: usize,
}

/// A graph compiled into group-replicated, arena-resident operator state plus the flat
/// record layout describing how nodes' outputs and inputs map onto one row.
///
/// Field order matters: `nodes` and `aux` must drop before `arena`, since every `ArenaBox` in
/// either points into `arena`'s backing storage.
pub struct CompiledDag<T> {
    nodes: Vec<ArenaBox<dyn Operator<T>>>,
    aux: Vec<ArenaBox<dyn Operator<T>>>,
    arena: Arena,

    num_nodes: usize,
    num_groups: usize,

    /// i-th node's offset into the flat per-step output record.
    pub record_offset: Vec<u32>,
    /// Total width of the flat per-step output record.
    pub record_size: usize,
    /// i-th node's input column offsets into the flat record (row `i`, one column per input).
    pub input_offset: FlatMultiVec<u32>,
    /// Graph output ports' offsets into the flat record, in declared order.
    pub output_offset: Vec<u32>,
    /// i-th node's resolved window mode, shared across every group (decided once from the
    /// template instance, matching the original's "test only group 0" shortcut).
    pub window_mode: Vec<WindowMode>,

    /// The auxiliary node's gathered input column offsets into the flat record, empty if the
    /// graph declares no auxiliary node.
    pub aux_input_offset: Vec<u32>,
    /// The auxiliary node's parameter-routing table, in registration order.
    pub param_offset: Vec<ParamRoute>,
}

impl<T: 'static> CompiledDag<T> {
    /// Borrows group `igrp`'s nodes in topological order.
    pub fn group(&self, igrp: usize) -> &[ArenaBox<dyn Operator<T>>] {
        let start = igrp * self.num_nodes;
        &self.nodes[start..start + self.num_nodes]
    }

    /// Mutably borrows group `igrp`'s nodes in topological order.
    pub fn group_mut(&mut self, igrp: usize) -> &mut [ArenaBox<dyn Operator<T>>] {
        let start = igrp * self.num_nodes;
        &mut self.nodes[start..start + self.num_nodes]
    }

    /// Borrows group `igrp`'s auxiliary node, if the graph declared one.
    pub fn aux(&self, igrp: usize) -> Option<&ArenaBox<dyn Operator<T>>> {
        self.aux.get(igrp)
    }

    /// Mutably borrows group `igrp`'s auxiliary node, if the graph declared one.
    pub fn aux_mut(&mut self, igrp: usize) -> Option<&mut ArenaBox<dyn Operator<T>>> {
        self.aux.get_mut(igrp)
    }

    /// True if the graph declared an auxiliary/parameter-root node.
    pub fn has_aux(&self) -> bool {
        !self.aux.is_empty()
    }

    /// Number of nodes per group (excluding the auxiliary node).
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Number of groups the DAG was compiled for.
    pub fn num_groups(&self) -> usize {
        self.num_groups
    }
}

/// Kahn's-algorithm topological sort of `graph`'s main node set (the auxiliary node, if any, is
/// excluded — it never participates in the main ordering, since it only ever consumes root
/// outputs and is compiled as a separate per-group singleton).
///
/// # Errors
///
/// Returns [`GraphError::Cycle`] naming the nodes that never reached zero in-degree, if fewer
/// than `|V|` nodes (minus the auxiliary node) emerge from the sort.
pub fn topo_sort<T: 'static>(graph: &Graph<T>) -> Result<Vec<NodeId>, GraphError> {
    let aux = graph.aux();
    let mut in_degree: FxHashMap<NodeId, usize> = FxHashMap::default();
    let mut ready: Vec<NodeId> = Vec::new();

    for id in graph.node_ids() {
        if Some(id) == aux {
            continue;
        }
        let deg = graph.preds_of(id).len();
        in_degree.insert(id, deg);
        if deg == 0 {
            ready.push(id);
        }
    }

    let total = in_degree.len();
    let mut order = Vec::with_capacity(total);
    let mut head = 0;
    while head < ready.len() {
        let current = ready[head];
        head += 1;
        order.push(current);
        for &succ in graph.succs_of(current) {
            if Some(succ) == aux {
                continue;
            }
            let deg = in_degree.get_mut(&succ).expect("successor must be tracked");
            *deg -= 1;
            if *deg == 0 {
                ready.push(succ);
            }
        }
    }

    if order.len() != total {
        let ordered: std::collections::HashSet<NodeId> = order.iter().copied().collect();
        let unresolved: Vec<String> = in_degree
            .keys()
            .filter(|id| !ordered.contains(id))
            .map(|id| format!("{id:?}"))
            .collect();
        return Err(GraphError::Cycle(unresolved));
    }
    Ok(order)
}

/// Compiles `graph` into group-replicated arena storage, with `history_size_hint` forwarded
/// to whatever executor later wraps this `CompiledDag` (compilation itself does not allocate
/// history).
///
/// # Errors
///
/// Propagates [`Graph::validate`]'s errors, a cycle detection error from [`topo_sort`], a
/// [`GraphError::ZeroGroups`] if `num_groups` is zero, and a
/// [`GraphError::ParamRecordTooSmall`] if the auxiliary node's declared output width is
/// narrower than the sum of its routed targets' `num_param()`.
#[instrument(skip(graph))]
pub fn compile<T: 'static>(graph: &Graph<T>, num_groups: usize) -> Result<CompiledDag<T>, GraphError> {
    graph.validate()?;
    if num_groups == 0 {
        return Err(GraphError::ZeroGroups);
    }
    let order = topo_sort(graph)?;
    let num_nodes = order.len();

    let mut index_of: FxHashMap<NodeId, usize> = FxHashMap::default();
    for (i, &id) in order.iter().enumerate() {
        index_of.insert(id, i);
    }

    let mut record_offset = Vec::with_capacity(num_nodes);
    let mut record_size: u32 = 0;
    for &id in &order {
        record_offset.push(record_size);
        let node = graph.node(id).expect("topo-sorted id must exist");
        record_size += node.num_outputs() as u32;
    }

    let mut input_offset = FlatMultiVec::new();
    input_offset.reserve(num_nodes, num_nodes * 2);
    for &id in &order {
        let edges = graph.preds_of(id);
        let offsets: Vec<u32> = edges
            .iter()
            .map(|e| record_offset[index_of[&e.node]] + e.port)
            .collect();
        input_offset.push_row(offsets);
    }

    let output_offset: Vec<u32> = graph
        .output()
        .iter()
        .map(|e| record_offset[index_of[&e.node]] + e.port)
        .collect();

    let window_mode: Vec<WindowMode> = order
        .iter()
        .map(|&id| resolve_window_mode(graph.node(id).expect("topo-sorted id must exist")))
        .collect();

    let aux_input_offset: Vec<u32> = match graph.aux() {
        Some(aux_id) => graph
            .preds_of(aux_id)
            .iter()
            .map(|e| record_offset[index_of[&e.node]] + e.port)
            .collect(),
        None => Vec::new(),
    };

    let aux_width = graph.aux().map(|id| graph.node(id).expect("aux must exist").num_outputs()).unwrap_or(0);
    let mut param_offset = Vec::with_capacity(graph.param_targets().len());
    let mut packed = 0usize;
    for &target in graph.param_targets() {
        let len = graph.node(target).expect("param target must exist").num_param();
        let target_index = index_of[&target];
        param_offset.push(ParamRoute {
            target_index,
            offset: packed,
            len,
        });
        packed += len;
    }
    if packed > aux_width {
        return Err(GraphError::ParamRecordTooSmall {
            available: aux_width,
            required: packed,
        });
    }

    let mut max_align = CACHELINE_SIZE;
    let mut node_block_size = 0usize;
    for &id in &order {
        let op = graph.node(id).expect("topo-sorted id must exist");
        let layout = op.arena_layout();
        max_align = max_align.max(layout.align());
        node_block_size += aligned_size(layout.size(), layout.align());
    }
    let group_stride = aligned_size(node_block_size, CACHELINE_SIZE);

    let aux_block_size = graph
        .aux()
        .map(|id| {
            let layout = graph.node(id).expect("aux must exist").arena_layout();
            max_align = max_align.max(layout.align());
            aligned_size(layout.size(), layout.align())
        })
        .unwrap_or(0);
    let aux_stride = aligned_size(aux_block_size, CACHELINE_SIZE);

    let capacity = (group_stride + aux_stride) * num_groups + max_align;

    debug!(num_nodes, num_groups, record_size, capacity, has_aux = graph.aux().is_some(), "compiling dag");
    let mut arena = Arena::with_capacity(capacity);
    let mut nodes = Vec::with_capacity(num_nodes * num_groups);
    let mut aux = Vec::with_capacity(if graph.aux().is_some() { num_groups } else { 0 });
    for _ in 0..num_groups {
        for &id in &order {
            let op = graph.node(id).expect("topo-sorted id must exist");
            nodes.push(op.clone_into_arena(&mut arena));
        }
        if let Some(aux_id) = graph.aux() {
            let op = graph.node(aux_id).expect("aux must exist");
            aux.push(op.clone_into_arena(&mut arena));
        }
    }

    Ok(CompiledDag {
        nodes,
        aux,
        arena,
        num_nodes,
        num_groups,
        record_offset,
        record_size: record_size as usize,
        input_offset,
        output_offset,
        window_mode,
        aux_input_offset,
        param_offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::handle::Graph;

    #[derive(Clone)]
    struct Root;
    impl Operator<f64> for Root {
        fn on_data(&mut self, _: &[f64]) {}
        fn value(&self, out: &mut [f64]) {
            out[0] = 1.0;
        }
        fn reset(&mut self) {}
        fn num_inputs(&self) -> usize {
            1
        }
        fn num_outputs(&self) -> usize {
            1
        }
    }

    #[derive(Clone, Default)]
    struct Sum2(f64);
    impl Operator<f64> for Sum2 {
        fn on_data(&mut self, inputs: &[f64]) {
            self.0 = inputs.iter().sum();
        }
        fn value(&self, out: &mut [f64]) {
            out[0] = self.0;
        }
        fn reset(&mut self) {
            self.0 = 0.0;
        }
        fn num_inputs(&self) -> usize {
            2
        }
        fn num_outputs(&self) -> usize {
            1
        }
    }

    #[derive(Clone, Default)]
    struct ParamTarget {
        last: f64,
    }
    impl Operator<f64> for ParamTarget {
        fn on_data(&mut self, _: &[f64]) {}
        fn value(&self, out: &mut [f64]) {
            out[0] = self.last;
        }
        fn reset(&mut self) {
            self.last = 0.0;
        }
        fn num_inputs(&self) -> usize {
            1
        }
        fn num_outputs(&self) -> usize {
            1
        }
        fn on_param(&mut self, params: &[f64]) {
            self.last = params[0];
        }
        fn num_param(&self) -> usize {
            1
        }
    }

    #[derive(Clone, Default)]
    struct AuxEcho;
    impl Operator<f64> for AuxEcho {
        fn on_data(&mut self, _: &[f64]) {}
        fn value(&self, out: &mut [f64]) {
            out[0] = 0.0;
        }
        fn reset(&mut self) {}
        fn num_inputs(&self) -> usize {
            1
        }
        fn num_outputs(&self) -> usize {
            1
        }
    }

    #[test]
    fn compile_linear_chain_builds_expected_offsets() {
        let mut g = Graph::<f64>::new();
        let root = g.add_root(Root).unwrap();
        let mid = g.add_node(Sum2::default(), [(root, 0u32), (root, 0u32)]);
        g.set_output([mid]);

        let dag = compile(&g, 3).unwrap();
        assert_eq!(dag.num_nodes(), 2);
        assert_eq!(dag.num_groups(), 3);
        assert_eq!(dag.record_size, 2);
        assert_eq!(dag.output_offset, vec![1]);
        assert_eq!(dag.input_offset.row(1), &[0, 0]);
        assert_eq!(dag.input_offset.row(0), &[] as &[u32]);
        assert!(!dag.has_aux());

        for grp in 0..3 {
            assert_eq!(dag.group(grp).len(), 2);
        }
    }

    #[test]
    fn cyclic_graph_rejected() {
        let mut g = Graph::<f64>::new();
        let root = g.add_root(Root).unwrap();
        let a = g.add_node(Sum2::default(), [(root, 0u32), (root, 0u32)]);
        g.add_edge(root, a).unwrap();
        assert!(matches!(compile(&g, 1), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn zero_groups_rejected() {
        let mut g = Graph::<f64>::new();
        g.add_root(Root).unwrap();
        assert!(matches!(compile(&g, 0), Err(GraphError::ZeroGroups)));
    }

    #[test]
    fn aux_compiles_separately_with_param_routing_table() {
        let mut g = Graph::<f64>::new();
        let root = g.add_root(Root).unwrap();
        let sink = g.add_node(ParamTarget::default(), [root]);
        let aux = g.add_aux(AuxEcho, [root]).unwrap();
        g.route_param(sink).unwrap();
        g.set_output([sink]);

        let dag = compile(&g, 2).unwrap();
        assert!(dag.has_aux());
        assert_eq!(dag.aux_input_offset, vec![0]);
        assert_eq!(dag.param_offset.len(), 1);
        assert_eq!(dag.param_offset[0].offset, 0);
        assert_eq!(dag.param_offset[0].len, 1);
        assert!(dag.aux(0).is_some());
        assert!(dag.aux(1).is_some());
        let _ = aux;
    }

    #[test]
    fn param_record_too_small_rejected() {
        #[derive(Clone, Default)]
        struct TinyAux;
        impl Operator<f64> for TinyAux {
            fn on_data(&mut self, _: &[f64]) {}
            fn value(&self, _: &mut [f64]) {}
            fn reset(&mut self) {}
            fn num_inputs(&self) -> usize {
                1
            }
            fn num_outputs(&self) -> usize {
                0
            }
        }
        let mut g = Graph::<f64>::new();
        let root = g.add_root(Root).unwrap();
        let sink = g.add_node(ParamTarget::default(), [root]);
        g.add_aux(TinyAux, [root]).unwrap();
        g.route_param(sink).unwrap();
        g.set_output([sink]);

        assert!(matches!(compile(&g, 1), Err(GraphError::ParamRecordTooSmall { .. })));
    }
}
