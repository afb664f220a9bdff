//! Handle-keyed DAG builder.
//!
//! Nodes are referenced by an opaque [`NodeId`] returned from [`Graph::add_node`], rather than
//! by string name (see [`crate::graph::named`] for the string-keyed surface). Edges carry a
//! `(predecessor, output_port)` pair so a multi-output operator can fan its ports out to
//! distinct consumers.

use rustc_hash::FxHashMap;
use slotmap::{new_key_type, SlotMap};

use super::error::GraphError;
use crate::operator::{CloneIntoArena, Operator};

new_key_type! {
    /// Opaque identity of a node added to a [`Graph`].
    pub struct NodeId;
}

/// A blanket trait object bound combining [`Operator`] and [`CloneIntoArena`], so the graph can
/// store one boxed template per node and the compiler can later replicate it per group.
pub trait GraphOperator<T>: Operator<T> + CloneIntoArena<T> {}
impl<T, O: Operator<T> + CloneIntoArena<T>> GraphOperator<T> for O {}

/// A predecessor reference: node `node`'s output port `port`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub node: NodeId,
    pub port: u32,
}

impl From<NodeId> for Edge {
    fn from(node: NodeId) -> Self {
        Edge { node, port: 0 }
    }
}

impl From<(NodeId, u32)> for Edge {
    fn from((node, port): (NodeId, u32)) -> Self {
        Edge { node, port }
    }
}

/// A handle-keyed directed graph of operators, built incrementally then handed to
/// [`crate::compile::compile`].
pub struct Graph<T> {
    pub(crate) nodes: SlotMap<NodeId, Box<dyn GraphOperator<T>>>,
    pub(crate) preds: FxHashMap<NodeId, Vec<Edge>>,
    pub(crate) succs: FxHashMap<NodeId, Vec<NodeId>>,
    pub(crate) output: Vec<Edge>,
    root: Option<NodeId>,
    aux: Option<NodeId>,
    param_targets: Vec<NodeId>,
}

impl<T: 'static> Default for Graph<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Graph<T> {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            preds: FxHashMap::default(),
            succs: FxHashMap::default(),
            output: Vec::new(),
            root: None,
            aux: None,
            param_targets: Vec::new(),
        }
    }

    /// Adds the distinguished root node, the entry point external input rows are fed into.
    /// A graph may have exactly one root.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::MultipleRoots`] if a root already exists.
    pub fn add_root<O>(&mut self, op: O) -> Result<NodeId, GraphError>
    where
        O: Operator<T> + Clone,
    {
        if let Some(existing) = self.root {
            return Err(GraphError::MultipleRoots(
                format!("{existing:?}"),
                "<new root>".to_string(),
            ));
        }
        let id = self.nodes.insert(Box::new(op));
        self.preds.insert(id, Vec::new());
        self.succs.insert(id, Vec::new());
        self.root = Some(id);
        Ok(id)
    }

    /// Adds the auxiliary/parameter-root node: the target of [`Graph::compile`][crate::compile]'s
    /// per-group parameter routing. Its predecessors must all reference the root (consuming
    /// only root outputs); a graph may have at most one. Requires the root to already exist.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::MultipleAux`] if an auxiliary node already exists,
    /// [`GraphError::NoRoot`] if no root has been added yet, or [`GraphError::InvalidAuxEdge`]
    /// if a predecessor doesn't reference the root.
    pub fn add_aux<O, I, E>(&mut self, op: O, preds: I) -> Result<NodeId, GraphError>
    where
        O: Operator<T> + Clone,
        I: IntoIterator<Item = E>,
        E: Into<Edge>,
    {
        if let Some(existing) = self.aux {
            return Err(GraphError::MultipleAux(format!("{existing:?}"), "<new aux>".to_string()));
        }
        let root = self.root.ok_or(GraphError::NoRoot)?;
        let edges: Vec<Edge> = preds.into_iter().map(Into::into).collect();
        for e in &edges {
            if e.node != root {
                return Err(GraphError::InvalidAuxEdge(format!("{:?}", e.node)));
            }
        }
        let id = self.nodes.insert(Box::new(op));
        for e in &edges {
            self.succs.entry(e.node).or_default().push(id);
        }
        self.preds.insert(id, edges);
        self.succs.entry(id).or_default();
        self.aux = Some(id);
        Ok(id)
    }

    /// Adds a node depending on `preds`, each an `impl Into<Edge>` (a bare [`NodeId`] defaults
    /// to port 0, or a `(NodeId, u32)` pair names an explicit port).
    pub fn add_node<O, I, E>(&mut self, op: O, preds: I) -> NodeId
    where
        O: Operator<T> + Clone,
        I: IntoIterator<Item = E>,
        E: Into<Edge>,
    {
        let id = self.nodes.insert(Box::new(op));
        let edges: Vec<Edge> = preds.into_iter().map(Into::into).collect();
        for e in &edges {
            self.succs.entry(e.node).or_default().push(id);
        }
        self.preds.insert(id, edges);
        self.succs.entry(id).or_default();
        id
    }

    /// Removes `node` and every edge referencing it (as a predecessor, successor, output, or
    /// parameter-routing target). Clears [`Graph::root`]/[`Graph::aux`] if `node` held either
    /// role.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] if `node` was never added.
    pub fn remove(&mut self, node: NodeId) -> Result<(), GraphError> {
        if self.nodes.remove(node).is_none() {
            return Err(GraphError::UnknownNode(format!("{node:?}")));
        }
        self.preds.remove(&node);
        self.succs.remove(&node);
        for preds in self.preds.values_mut() {
            preds.retain(|e| e.node != node);
        }
        for succs in self.succs.values_mut() {
            succs.retain(|&n| n != node);
        }
        self.output.retain(|e| e.node != node);
        self.param_targets.retain(|&n| n != node);
        if self.root == Some(node) {
            self.root = None;
        }
        if self.aux == Some(node) {
            self.aux = None;
        }
        Ok(())
    }

    /// Replaces the operator stored at `node` in place, keeping its edges, root/aux role, and
    /// `NodeId` unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] if `node` was never added.
    pub fn replace_node<O>(&mut self, node: NodeId, op: O) -> Result<(), GraphError>
    where
        O: Operator<T> + Clone,
    {
        let slot = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| GraphError::UnknownNode(format!("{node:?}")))?;
        *slot = Box::new(op);
        Ok(())
    }

    /// Appends one more predecessor edge to `to`'s argument list.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] if `to` was never added.
    pub fn add_edge<E: Into<Edge>>(&mut self, to: NodeId, edge: E) -> Result<(), GraphError> {
        if !self.nodes.contains_key(to) {
            return Err(GraphError::UnknownNode(format!("{to:?}")));
        }
        let edge = edge.into();
        self.succs.entry(edge.node).or_default().push(to);
        self.preds.entry(to).or_default().push(edge);
        Ok(())
    }

    /// Removes `to`'s predecessor edge at `index`, preserving the order of the rest.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] if `to` was never added, or
    /// [`GraphError::EdgeIndexOutOfRange`] if `index` is out of range.
    pub fn remove_edge(&mut self, to: NodeId, index: usize) -> Result<(), GraphError> {
        let preds = self
            .preds
            .get_mut(&to)
            .ok_or_else(|| GraphError::UnknownNode(format!("{to:?}")))?;
        if index >= preds.len() {
            return Err(GraphError::EdgeIndexOutOfRange {
                node: format!("{to:?}"),
                index,
                len: preds.len(),
            });
        }
        let removed = preds.remove(index);
        if let Some(succs) = self.succs.get_mut(&removed.node) {
            if let Some(pos) = succs.iter().position(|&n| n == to) {
                succs.remove(pos);
            }
        }
        Ok(())
    }

    /// Replaces `to`'s predecessor edge at `index` in place, preserving argument order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] if `to` was never added, or
    /// [`GraphError::EdgeIndexOutOfRange`] if `index` is out of range.
    pub fn replace_edge<E: Into<Edge>>(&mut self, to: NodeId, index: usize, edge: E) -> Result<(), GraphError> {
        let edge = edge.into();
        let preds = self
            .preds
            .get_mut(&to)
            .ok_or_else(|| GraphError::UnknownNode(format!("{to:?}")))?;
        if index >= preds.len() {
            return Err(GraphError::EdgeIndexOutOfRange {
                node: format!("{to:?}"),
                index,
                len: preds.len(),
            });
        }
        let old = preds[index];
        preds[index] = edge;
        if let Some(succs) = self.succs.get_mut(&old.node) {
            if let Some(pos) = succs.iter().position(|&n| n == to) {
                succs.remove(pos);
            }
        }
        self.succs.entry(edge.node).or_default().push(to);
        Ok(())
    }

    /// Merges `other` into `self`, moving every node, edge, output, and parameter route across.
    /// `self` takes precedence on a root/auxiliary conflict: if `self` already has a root (or
    /// auxiliary node), `other`'s is merged in as a plain node rather than overwriting `self`'s.
    /// Returns the map from `other`'s old [`NodeId`]s to their new ids in `self`.
    pub fn merge(&mut self, mut other: Graph<T>) -> FxHashMap<NodeId, NodeId> {
        let mut remap: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        let other_ids: Vec<NodeId> = other.nodes.keys().collect();

        for &old_id in &other_ids {
            let op = other.nodes.remove(old_id).expect("collected key must exist");
            let new_id = self.nodes.insert(op);
            remap.insert(old_id, new_id);
        }

        for &old_id in &other_ids {
            let new_id = remap[&old_id];
            let old_preds = other.preds.remove(&old_id).unwrap_or_default();
            let new_preds: Vec<Edge> = old_preds
                .into_iter()
                .map(|e| Edge {
                    node: remap[&e.node],
                    port: e.port,
                })
                .collect();
            for e in &new_preds {
                self.succs.entry(e.node).or_default().push(new_id);
            }
            self.preds.insert(new_id, new_preds);
            self.succs.entry(new_id).or_default();
        }

        for edge in &other.output {
            self.output.push(Edge {
                node: remap[&edge.node],
                port: edge.port,
            });
        }

        if self.root.is_none() {
            if let Some(old_root) = other.root {
                self.root = Some(remap[&old_root]);
            }
        }
        if self.aux.is_none() {
            if let Some(old_aux) = other.aux {
                self.aux = Some(remap[&old_aux]);
            }
        }
        for target in &other.param_targets {
            self.param_targets.push(remap[target]);
        }

        remap
    }

    /// Declares the graph's output ports, in order.
    pub fn set_output<I, E>(&mut self, outputs: I)
    where
        I: IntoIterator<Item = E>,
        E: Into<Edge>,
    {
        self.output = outputs.into_iter().map(Into::into).collect();
    }

    /// Appends one more declared output port.
    pub fn add_output<E: Into<Edge>>(&mut self, edge: E) {
        self.output.push(edge.into());
    }

    /// Registers `target` to receive a sub-vector of the auxiliary node's output on every
    /// parameter-update call, in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] if `target` was never added.
    pub fn route_param(&mut self, target: NodeId) -> Result<(), GraphError> {
        if !self.nodes.contains_key(target) {
            return Err(GraphError::UnknownNode(format!("{target:?}")));
        }
        self.param_targets.push(target);
        Ok(())
    }

    /// The ordered list of nodes registered via [`Graph::route_param`].
    pub fn param_targets(&self) -> &[NodeId] {
        &self.param_targets
    }

    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The root node, if one has been added.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// The auxiliary/parameter-root node, if one has been added.
    pub fn aux(&self) -> Option<NodeId> {
        self.aux
    }

    /// Predecessor edges of `node`.
    pub fn preds_of(&self, node: NodeId) -> &[Edge] {
        self.preds.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Successor node ids of `node`.
    pub fn succs_of(&self, node: NodeId) -> &[NodeId] {
        self.succs.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The declared output edges.
    pub fn output(&self) -> &[Edge] {
        &self.output
    }

    /// Iterates every node id currently in the graph.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys()
    }

    /// Borrows the operator template stored at `node`.
    pub fn node(&self, node: NodeId) -> Option<&dyn GraphOperator<T>> {
        self.nodes.get(node).map(|b| b.as_ref())
    }

    /// Checks structural invariants: every edge and output port must reference a node that
    /// exists and a port within that node's `num_outputs()`; there must be exactly one root (a
    /// node with no predecessors, the auxiliary node exempted); the auxiliary node (if any) may
    /// only depend on the root; no node outside the auxiliary node's own predecessor list may
    /// reference the auxiliary node as a producer; every parameter-routing target must exist
    /// and must not be the auxiliary node itself.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut root_free: Option<NodeId> = None;
        for id in self.node_ids() {
            let preds = self.preds_of(id);
            if Some(id) == self.aux {
                let root = self.root.ok_or(GraphError::NoRoot)?;
                for edge in preds {
                    if edge.node != root {
                        return Err(GraphError::InvalidAuxEdge(format!("{:?}", edge.node)));
                    }
                    self.check_edge(*edge)?;
                }
                continue;
            }
            if preds.is_empty() {
                if let Some(first) = root_free {
                    return Err(GraphError::MultipleRoots(format!("{first:?}"), format!("{id:?}")));
                }
                root_free = Some(id);
            }
            for edge in preds {
                if Some(edge.node) == self.aux {
                    return Err(GraphError::AuxUsedAsProducer(format!("{:?}", edge.node)));
                }
                self.check_edge(*edge)?;
            }
        }
        if root_free.is_none() {
            return Err(GraphError::NoRoot);
        }
        for edge in &self.output {
            if Some(edge.node) == self.aux {
                return Err(GraphError::AuxUsedAsProducer(format!("{:?}", edge.node)));
            }
            self.check_edge(*edge)?;
        }
        for &target in &self.param_targets {
            if !self.nodes.contains_key(target) {
                return Err(GraphError::InvalidParamTarget(format!("{target:?}")));
            }
            if Some(target) == self.aux {
                return Err(GraphError::InvalidParamTarget(format!("{target:?}")));
            }
        }
        Ok(())
    }

    fn check_edge(&self, edge: Edge) -> Result<(), GraphError> {
        let op = self
            .nodes
            .get(edge.node)
            .ok_or_else(|| GraphError::UnknownNode(format!("{:?}", edge.node)))?;
        let num_outputs = op.num_outputs();
        if edge.port as usize >= num_outputs {
            return Err(GraphError::PortOutOfRange {
                node: format!("{:?}", edge.node),
                port: edge.port,
                num_outputs,
            });
        }
        Ok(())
    }
}
