//! String-keyed DAG builder layered over [`crate::graph::handle::Graph`].
//!
//! Edges are written as `"name"` (port 0) or `"name.port"` strings, matching the dotted
//! descriptor convention operators are commonly wired up with in configuration-driven
//! pipelines. [`NamedGraph::compile`] (via [`crate::compile`]) only ever sees the underlying
//! handle-keyed graph; names exist purely for the builder surface.

use rustc_hash::FxHashMap;

use super::error::GraphError;
use super::handle::{Edge, Graph, NodeId};
use crate::operator::Operator;

/// A named edge descriptor, as parsed from `"name"` or `"name.port"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedEdge {
    pub name: String,
    pub port: u32,
}

impl NamedEdge {
    /// Parses `desc`, splitting on the last `.` into a name and a numeric port suffix. A
    /// descriptor with no `.` defaults to port 0.
    pub fn parse(desc: &str) -> Result<Self, GraphError> {
        match desc.rsplit_once('.') {
            None => Ok(NamedEdge {
                name: desc.to_string(),
                port: 0,
            }),
            Some((name, port_str)) => {
                let port: u32 = port_str
                    .parse()
                    .map_err(|_| GraphError::InvalidEdgeDescriptor(desc.to_string()))?;
                Ok(NamedEdge {
                    name: name.to_string(),
                    port,
                })
            }
        }
    }
}

impl From<&str> for NamedEdge {
    fn from(s: &str) -> Self {
        NamedEdge::parse(s).expect("invalid edge descriptor")
    }
}

/// A DAG builder addressed by string names instead of opaque handles.
pub struct NamedGraph<T> {
    graph: Graph<T>,
    names: FxHashMap<String, NodeId>,
    root_aliases: FxHashMap<String, u32>,
    aux_aliases: FxHashMap<String, u32>,
}

impl<T: 'static> Default for NamedGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> NamedGraph<T> {
    /// Creates an empty named graph.
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
            names: FxHashMap::default(),
            root_aliases: FxHashMap::default(),
            aux_aliases: FxHashMap::default(),
        }
    }

    /// Adds the root node under `name`.
    pub fn add_root<O>(&mut self, name: &str, op: O) -> Result<(), GraphError>
    where
        O: Operator<T> + Clone,
    {
        self.check_name_free(name)?;
        let id = self.graph.add_root(op)?;
        self.names.insert(name.to_string(), id);
        Ok(())
    }

    /// Registers port aliases for the root node, so downstream edges may reference
    /// `"price"` instead of `"root.0"`.
    pub fn alias_root_ports<'a, I>(&mut self, aliases: I) -> Result<(), GraphError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for (port, alias) in aliases.into_iter().enumerate() {
            self.check_alias_free(alias)?;
            self.root_aliases.insert(alias.to_string(), port as u32);
        }
        Ok(())
    }

    /// Adds the auxiliary/parameter-root node under `name`, depending on the edges parsed
    /// from `preds` (which must all resolve to the root).
    pub fn add_aux<O>(&mut self, name: &str, op: O, preds: &[&str]) -> Result<(), GraphError>
    where
        O: Operator<T> + Clone,
    {
        self.check_name_free(name)?;
        let mut resolved = Vec::with_capacity(preds.len());
        for desc in preds {
            resolved.push(self.resolve(desc)?);
        }
        let id = self.graph.add_aux(op, resolved)?;
        self.names.insert(name.to_string(), id);
        Ok(())
    }

    /// Registers port aliases for the auxiliary node.
    pub fn alias_aux_ports<'a, I>(&mut self, aliases: I) -> Result<(), GraphError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for (port, alias) in aliases.into_iter().enumerate() {
            self.check_alias_free(alias)?;
            self.aux_aliases.insert(alias.to_string(), port as u32);
        }
        Ok(())
    }

    /// Adds a node named `name`, depending on the edges parsed from `preds` (each `"name"` or
    /// `"name.port"`, resolving root/auxiliary port aliases first).
    pub fn add_node<O>(&mut self, name: &str, op: O, preds: &[&str]) -> Result<(), GraphError>
    where
        O: Operator<T> + Clone,
    {
        self.check_name_free(name)?;
        let mut resolved = Vec::with_capacity(preds.len());
        for desc in preds {
            resolved.push(self.resolve(desc)?);
        }
        let id = self.graph.add_node(op, resolved);
        self.names.insert(name.to_string(), id);
        Ok(())
    }

    /// Removes the node named `name`, along with every edge referencing it.
    pub fn remove(&mut self, name: &str) -> Result<(), GraphError> {
        let id = self
            .names
            .remove(name)
            .ok_or_else(|| GraphError::UnknownNode(name.to_string()))?;
        self.graph.remove(id)
    }

    /// Renames the node currently known as `old` to `new`, without touching its edges.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), GraphError> {
        self.check_name_free(new)?;
        let id = self
            .names
            .remove(old)
            .ok_or_else(|| GraphError::UnknownNode(old.to_string()))?;
        self.names.insert(new.to_string(), id);
        Ok(())
    }

    /// Replaces the operator stored at `name`, keeping its edges and name.
    pub fn replace_node<O>(&mut self, name: &str, op: O) -> Result<(), GraphError>
    where
        O: Operator<T> + Clone,
    {
        let id = self
            .names
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode(name.to_string()))?;
        self.graph.replace_node(id, op)
    }

    /// Appends one more predecessor edge to `to`'s argument list.
    pub fn add_edge(&mut self, to: &str, edge: &str) -> Result<(), GraphError> {
        let to_id = self
            .names
            .get(to)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode(to.to_string()))?;
        let resolved = self.resolve(edge)?;
        self.graph.add_edge(to_id, resolved)
    }

    /// Removes `to`'s predecessor edge at `index`.
    pub fn remove_edge(&mut self, to: &str, index: usize) -> Result<(), GraphError> {
        let to_id = self
            .names
            .get(to)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode(to.to_string()))?;
        self.graph.remove_edge(to_id, index)
    }

    /// Replaces `to`'s predecessor edge at `index` in place.
    pub fn replace_edge(&mut self, to: &str, index: usize, edge: &str) -> Result<(), GraphError> {
        let to_id = self
            .names
            .get(to)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode(to.to_string()))?;
        let resolved = self.resolve(edge)?;
        self.graph.replace_edge(to_id, index, resolved)
    }

    /// Declares the graph's output edges from name descriptors.
    pub fn set_output(&mut self, outputs: &[&str]) -> Result<(), GraphError> {
        let mut resolved = Vec::with_capacity(outputs.len());
        for desc in outputs {
            resolved.push(self.resolve(desc)?);
        }
        self.graph.set_output(resolved);
        Ok(())
    }

    /// Appends one more declared output port.
    pub fn add_output(&mut self, output: &str) -> Result<(), GraphError> {
        let resolved = self.resolve(output)?;
        self.graph.add_output(resolved);
        Ok(())
    }

    /// Registers `target` to receive a sub-vector of the auxiliary node's output on every
    /// parameter-update call.
    pub fn route_param(&mut self, target: &str) -> Result<(), GraphError> {
        let id = self
            .names
            .get(target)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode(target.to_string()))?;
        self.graph.route_param(id)
    }

    /// Merges `other` into `self`. `self` takes precedence on a root/auxiliary conflict, and
    /// on a name collision `other`'s conflicting node keeps only its handle (not its name) in
    /// the merged graph. Root/auxiliary port aliases from `other` are imported only when
    /// `self` had no root/auxiliary node of its own before the merge, since otherwise they
    /// would resolve against the wrong node.
    pub fn merge(&mut self, other: NamedGraph<T>) -> FxHashMap<NodeId, NodeId> {
        let had_root = self.graph.root().is_some();
        let had_aux = self.graph.aux().is_some();

        let NamedGraph {
            graph: other_graph,
            names: other_names,
            root_aliases: other_root_aliases,
            aux_aliases: other_aux_aliases,
        } = other;

        let remap = self.graph.merge(other_graph);

        for (name, old_id) in other_names {
            let new_id = remap[&old_id];
            if !self.names.contains_key(&name) {
                self.names.insert(name, new_id);
            }
        }

        if !had_root {
            for (alias, port) in other_root_aliases {
                self.root_aliases.entry(alias).or_insert(port);
            }
        }
        if !had_aux {
            for (alias, port) in other_aux_aliases {
                self.aux_aliases.entry(alias).or_insert(port);
            }
        }

        remap
    }

    /// Looks up a previously added node's handle by name.
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    /// Validates the underlying handle graph.
    pub fn validate(&self) -> Result<(), GraphError> {
        self.graph.validate()
    }

    /// Consumes this builder, yielding the underlying handle-keyed [`Graph`] for compilation.
    pub fn into_graph(self) -> Graph<T> {
        self.graph
    }

    /// Borrows the underlying handle-keyed [`Graph`].
    pub fn graph(&self) -> &Graph<T> {
        &self.graph
    }

    fn resolve(&self, desc: &str) -> Result<Edge, GraphError> {
        let parsed = NamedEdge::parse(desc)?;
        if let Some(&port) = self.root_aliases.get(&parsed.name) {
            let root = self.graph.root().ok_or_else(|| GraphError::UnknownNode(parsed.name.clone()))?;
            return Ok(Edge { node: root, port });
        }
        if let Some(&port) = self.aux_aliases.get(&parsed.name) {
            let aux = self.graph.aux().ok_or_else(|| GraphError::UnknownNode(parsed.name.clone()))?;
            return Ok(Edge { node: aux, port });
        }
        let node = self
            .names
            .get(&parsed.name)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode(parsed.name.clone()))?;
        Ok(Edge {
            node,
            port: parsed.port,
        })
    }

    fn check_name_free(&self, name: &str) -> Result<(), GraphError> {
        if name.is_empty() {
            return Err(GraphError::InvalidEdgeDescriptor("<empty name>".to_string()));
        }
        if self.names.contains_key(name) || self.root_aliases.contains_key(name) || self.aux_aliases.contains_key(name) {
            return Err(GraphError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    fn check_alias_free(&self, alias: &str) -> Result<(), GraphError> {
        if self.names.contains_key(alias) || self.root_aliases.contains_key(alias) || self.aux_aliases.contains_key(alias) {
            return Err(GraphError::DuplicateAlias(alias.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Sum2;
    impl Operator<f64> for Sum2 {
        fn on_data(&mut self, _: &[f64]) {}
        fn value(&self, out: &mut [f64]) {
            out[0] = 0.0;
        }
        fn reset(&mut self) {}
        fn num_inputs(&self) -> usize {
            2
        }
        fn num_outputs(&self) -> usize {
            1
        }
    }

    #[derive(Clone)]
    struct ParamSink;
    impl Operator<f64> for ParamSink {
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
        fn num_param(&self) -> usize {
            1
        }
    }

    #[test]
    fn parse_splits_on_last_dot() {
        let e = NamedEdge::parse("book.3").unwrap();
        assert_eq!(e.name, "book");
        assert_eq!(e.port, 3);

        let e = NamedEdge::parse("book").unwrap();
        assert_eq!(e.name, "book");
        assert_eq!(e.port, 0);
    }

    #[test]
    fn named_graph_resolves_root_aliases() {
        let mut g = NamedGraph::<f64>::new();
        g.add_root("root", Sum2).unwrap();
        g.alias_root_ports(["bid", "ask"]).unwrap();
        g.add_node("spread", Sum2, &["bid", "ask"]).unwrap();
        g.set_output(&["spread"]).unwrap();
        assert!(g.validate().is_ok());
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut g = NamedGraph::<f64>::new();
        g.add_root("root", Sum2).unwrap();
        assert!(matches!(
            g.add_root("root", Sum2),
            Err(GraphError::DuplicateName(_))
        ));
    }

    #[test]
    fn add_output_and_remove_by_name() {
        let mut g = NamedGraph::<f64>::new();
        g.add_root("root", Sum2).unwrap();
        g.add_node("mid", Sum2, &["root", "root"]).unwrap();
        g.add_output("mid").unwrap();
        assert_eq!(g.graph().output().len(), 1);

        g.remove("mid").unwrap();
        assert!(g.graph().output().is_empty());
        assert!(g.node_id("mid").is_none());
    }

    #[test]
    fn rename_keeps_handle_and_edges() {
        let mut g = NamedGraph::<f64>::new();
        g.add_root("root", Sum2).unwrap();
        g.add_node("mid", Sum2, &["root", "root"]).unwrap();
        let id_before = g.node_id("mid").unwrap();
        g.rename("mid", "renamed").unwrap();
        assert_eq!(g.node_id("renamed"), Some(id_before));
        assert!(g.node_id("mid").is_none());
    }

    #[test]
    fn replace_node_and_edge_edits_by_name() {
        let mut g = NamedGraph::<f64>::new();
        g.add_root("root", Sum2).unwrap();
        g.add_node("other", Sum2, &[] as &[&str]).unwrap();
        g.add_node("mid", Sum2, &["root"]).unwrap();

        g.replace_node("mid", Sum2).unwrap();
        g.add_edge("mid", "other").unwrap();
        g.replace_edge("mid", 0, "root.0").unwrap();
        g.remove_edge("mid", 1).unwrap();
        g.set_output(&["mid"]).unwrap();
        assert!(g.validate().is_ok());
    }

    #[test]
    fn aux_alias_and_param_routing() {
        let mut g = NamedGraph::<f64>::new();
        g.add_root("root", Sum2).unwrap();
        g.add_node("sink", ParamSink, &["root"]).unwrap();
        g.add_aux("aux", Sum2, &["root"]).unwrap();
        g.alias_aux_ports(["status"]).unwrap();
        g.route_param("sink").unwrap();
        g.set_output(&["sink"]).unwrap();
        assert!(g.validate().is_ok());
        assert_eq!(g.node_id("aux"), Some(g.graph().aux().unwrap()));
    }

    #[test]
    fn merge_keeps_self_root_and_aliases_when_self_had_none() {
        let mut a = NamedGraph::<f64>::new();
        a.add_node("standalone", Sum2, &[] as &[&str]).unwrap();

        let mut b = NamedGraph::<f64>::new();
        b.add_root("root", Sum2).unwrap();
        b.alias_root_ports(["bid", "ask"]).unwrap();
        b.add_node("spread", Sum2, &["bid", "ask"]).unwrap();

        a.merge(b);
        assert!(a.graph().root().is_some());
        a.add_edge("standalone", "bid").unwrap();
        assert_eq!(a.node_id("spread").is_some(), true);
    }
}
