//! Arena of JSON nodes for dereferenced output.
//!
//! Dereferencing can produce cyclic and shared structure, which
//! `serde_json::Value` cannot express. Nodes live in a [`Graph`] and refer to
//! their children by [`NodeId`]; substituting a `$ref` replaces a handle, a
//! cycle is a handle cycle, and two call sites share a value exactly when
//! they hold the same handle.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Number, Value};

use crate::pointer;

/// Handle to a node in a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A JSON value whose children are handles.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<NodeId>),
    /// Entries in insertion order.
    Object(Vec<(String, NodeId)>),
}

impl Node {
    pub fn is_container(&self) -> bool {
        matches!(self, Node::Array(_) | Node::Object(_))
    }
}

/// Node storage.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn view(&self, id: NodeId) -> NodeRef<'_> {
        NodeRef { graph: self, id }
    }

    pub(crate) fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Copy a value into the arena, returning the handle of its root.
    pub fn import(&mut self, value: &Value) -> NodeId {
        let node = match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(*b),
            Value::Number(n) => Node::Number(n.clone()),
            Value::String(s) => Node::String(s.clone()),
            Value::Array(items) => {
                Node::Array(items.iter().map(|item| self.import(item)).collect())
            }
            Value::Object(map) => Node::Object(
                map.iter()
                    .map(|(key, item)| (key.clone(), self.import(item)))
                    .collect(),
            ),
        };
        self.push(node)
    }

    /// Child under an object key or array index.
    pub fn get(&self, id: NodeId, key: &str) -> Option<NodeId> {
        match self.node(id) {
            Node::Object(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| *v),
            Node::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i).copied()),
            _ => None,
        }
    }

    /// Follow pointer tokens literally.
    pub fn walk(&self, id: NodeId, tokens: &[String]) -> Option<NodeId> {
        tokens
            .iter()
            .try_fold(id, |current, token| self.get(current, token))
    }

    /// Snapshot of a container's children as `(key, child)` pairs.
    pub(crate) fn children(&self, id: NodeId) -> Vec<(String, NodeId)> {
        match self.node(id) {
            Node::Object(entries) => entries.clone(),
            Node::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, child)| (i.to_string(), *child))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Replace the child handle under `key`.
    pub(crate) fn set_child(&mut self, id: NodeId, key: &str, child: NodeId) {
        match &mut self.nodes[id.0] {
            Node::Object(entries) => {
                if let Some(slot) = entries.iter_mut().find(|(k, _)| k == key) {
                    slot.1 = child;
                } else {
                    entries.push((key.to_string(), child));
                }
            }
            Node::Array(items) => {
                if let Some(slot) = key.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                    *slot = child;
                }
            }
            _ => {}
        }
    }

    /// The `$ref` string of a `$ref` node.
    pub fn ref_target(&self, id: NodeId) -> Option<&str> {
        let target = self.get(id, "$ref")?;
        match self.node(target) {
            Node::String(reference) if !reference.is_empty() => Some(reference),
            _ => None,
        }
    }

    /// Point a `$ref` node somewhere else.
    pub(crate) fn set_ref_target(&mut self, id: NodeId, reference: String) {
        let target = self.push(Node::String(reference));
        self.set_child(id, "$ref", target);
    }

    /// Object entries other than `$ref`.
    pub(crate) fn ref_siblings(&self, id: NodeId) -> Vec<(String, NodeId)> {
        match self.node(id) {
            Node::Object(entries) => entries
                .iter()
                .filter(|(key, _)| key != "$ref")
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }

    /// New object holding the entries of `target` overlaid with `entries`.
    ///
    /// Children stay shared with `target`.
    pub(crate) fn overlay(&mut self, target: NodeId, entries: Vec<(String, NodeId)>) -> NodeId {
        let Node::Object(base) = self.node(target) else {
            return target;
        };
        let mut merged = base.clone();
        for (key, child) in entries {
            match merged.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = child,
                None => merged.push((key, child)),
            }
        }
        self.push(Node::Object(merged))
    }

    /// Copy everything reachable from `id`, preserving sharing and cycles
    /// within the copy.
    pub fn deep_clone(&mut self, id: NodeId) -> NodeId {
        let mut copies = HashMap::new();
        self.deep_clone_inner(id, &mut copies)
    }

    fn deep_clone_inner(&mut self, id: NodeId, copies: &mut HashMap<NodeId, NodeId>) -> NodeId {
        if let Some(&copy) = copies.get(&id) {
            return copy;
        }
        let copy = self.push(Node::Null);
        copies.insert(id, copy);
        let node = match self.node(id).clone() {
            Node::Array(items) => Node::Array(
                items
                    .into_iter()
                    .map(|child| self.deep_clone_inner(child, copies))
                    .collect(),
            ),
            Node::Object(entries) => Node::Object(
                entries
                    .into_iter()
                    .map(|(key, child)| (key, self.deep_clone_inner(child, copies)))
                    .collect(),
            ),
            scalar => scalar,
        };
        self.nodes[copy.0] = node;
        copy
    }

    /// Whether a cycle is reachable from `id`.
    pub fn is_cyclic(&self, id: NodeId) -> bool {
        fn visit(
            graph: &Graph,
            id: NodeId,
            path: &mut HashSet<NodeId>,
            done: &mut HashSet<NodeId>,
        ) -> bool {
            if path.contains(&id) {
                return true;
            }
            if !done.insert(id) {
                return false;
            }
            path.insert(id);
            let cyclic = graph
                .children(id)
                .into_iter()
                .any(|(_, child)| visit(graph, child, path, done));
            path.remove(&id);
            cyclic
        }
        visit(self, id, &mut HashSet::new(), &mut HashSet::new())
    }

    /// Materialize a tree as a `serde_json::Value`.
    ///
    /// A node met again while it is still open on the current path is
    /// written as `{"$ref": "#/<path where it was first opened>"}`. Shared
    /// acyclic nodes are written out in full at every occurrence, so output
    /// size grows with the number of paths through the graph, not its nodes.
    pub fn to_value(&self, id: NodeId) -> Value {
        let mut open = HashMap::new();
        let mut path = Vec::new();
        self.to_value_inner(id, &mut open, &mut path)
    }

    fn to_value_inner(
        &self,
        id: NodeId,
        open: &mut HashMap<NodeId, String>,
        path: &mut Vec<String>,
    ) -> Value {
        if let Some(first) = open.get(&id) {
            let mut map = Map::new();
            map.insert("$ref".to_string(), Value::String(first.clone()));
            return Value::Object(map);
        }
        match self.node(id) {
            Node::Null => Value::Null,
            Node::Bool(b) => Value::Bool(*b),
            Node::Number(n) => Value::Number(n.clone()),
            Node::String(s) => Value::String(s.clone()),
            Node::Array(items) => {
                open.insert(id, pointer::fragment(path));
                let values = items
                    .iter()
                    .enumerate()
                    .map(|(i, child)| {
                        path.push(i.to_string());
                        let value = self.to_value_inner(*child, open, path);
                        path.pop();
                        value
                    })
                    .collect();
                open.remove(&id);
                Value::Array(values)
            }
            Node::Object(entries) => {
                open.insert(id, pointer::fragment(path));
                let mut map = Map::new();
                for (key, child) in entries {
                    path.push(key.clone());
                    let value = self.to_value_inner(*child, open, path);
                    path.pop();
                    map.insert(key.clone(), value);
                }
                open.remove(&id);
                Value::Object(map)
            }
        }
    }
}

/// Borrowed view of one node, for navigating dereferenced output.
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'g> {
    graph: &'g Graph,
    id: NodeId,
}

impl<'g> NodeRef<'g> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn node(&self) -> &'g Node {
        self.graph.node(self.id)
    }

    /// Child under an object key or array index.
    pub fn get(&self, key: &str) -> Option<NodeRef<'g>> {
        self.graph.get(self.id, key).map(|id| self.graph.view(id))
    }

    /// Node at a JSON Pointer (`/a/b` or `#/a/b`) below this one.
    pub fn pointer(&self, pointer: &str) -> Option<NodeRef<'g>> {
        let tokens = pointer::parse(pointer).ok()?;
        self.graph.walk(self.id, &tokens).map(|id| self.graph.view(id))
    }

    /// Same underlying node, not merely equal content.
    pub fn same_node(&self, other: &NodeRef<'_>) -> bool {
        self.id == other.id
    }

    pub fn as_str(&self) -> Option<&'g str> {
        match self.node() {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self.node(), Node::Object(_))
    }

    /// Object keys in insertion order; empty for anything else.
    pub fn keys(&self) -> Vec<&'g str> {
        match self.node() {
            Node::Object(entries) => entries.iter().map(|(k, _)| k.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// The `$ref` string, if this is an unexpanded `$ref` node.
    pub fn ref_target(&self) -> Option<&'g str> {
        self.graph.ref_target(self.id)
    }

    pub fn to_value(&self) -> Value {
        self.graph.to_value(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn import_round_trips() {
        let value = json!({"b": [1, "two", null, {"c": true}], "a": 1.5});
        let mut graph = Graph::new();
        let root = graph.import(&value);
        assert_eq!(graph.to_value(root), value);
        // Insertion order survives
        assert_eq!(graph.view(root).keys(), vec!["b", "a"]);
    }

    #[test]
    fn walk_and_get() {
        let mut graph = Graph::new();
        let root = graph.import(&json!({"a": [{"b": "x"}]}));
        let tokens = vec!["a".to_string(), "0".to_string(), "b".to_string()];
        let leaf = graph.walk(root, &tokens).unwrap();
        assert_eq!(graph.view(leaf).as_str(), Some("x"));
        assert!(graph.get(root, "missing").is_none());
        assert_eq!(
            graph.view(root).pointer("#/a/0/b").unwrap().id(),
            leaf
        );
    }

    #[test]
    fn set_child_creates_cycle() {
        let mut graph = Graph::new();
        let root = graph.import(&json!({"a": {"b": {"$ref": "#/a"}}}));
        let a = graph.get(root, "a").unwrap();
        graph.set_child(a, "b", a);

        assert!(graph.is_cyclic(root));
        let view = graph.view(root);
        assert!(view.pointer("/a/b/b/b").unwrap().same_node(&view.get("a").unwrap()));
        assert_eq!(
            graph.to_value(root),
            json!({"a": {"b": {"$ref": "#/a"}}})
        );
    }

    #[test]
    fn shared_nodes_are_not_cycles() {
        let mut graph = Graph::new();
        let root = graph.import(&json!({"a": {"type": "string"}, "b": null}));
        let a = graph.get(root, "a").unwrap();
        graph.set_child(root, "b", a);

        assert!(!graph.is_cyclic(root));
        assert_eq!(
            graph.to_value(root),
            json!({"a": {"type": "string"}, "b": {"type": "string"}})
        );
    }

    #[test]
    fn overlay_keeps_children_shared() {
        let mut graph = Graph::new();
        let root = graph.import(&json!({
            "target": {"type": "object", "properties": {}},
            "desc": "d"
        }));
        let target = graph.get(root, "target").unwrap();
        let desc = graph.get(root, "desc").unwrap();

        let merged = graph.overlay(target, vec![("description".to_string(), desc)]);
        assert_ne!(merged, target);
        assert_eq!(
            graph.get(merged, "properties"),
            graph.get(target, "properties")
        );
        assert_eq!(graph.view(merged).keys(), vec!["type", "properties", "description"]);
    }

    #[test]
    fn deep_clone_preserves_internal_cycles() {
        let mut graph = Graph::new();
        let root = graph.import(&json!({"a": {"b": null}}));
        let a = graph.get(root, "a").unwrap();
        graph.set_child(a, "b", a);

        let copy = graph.deep_clone(a);
        assert_ne!(copy, a);
        assert_eq!(graph.get(copy, "b"), Some(copy));
    }

    #[test]
    fn ref_target_and_siblings() {
        let mut graph = Graph::new();
        let node = graph.import(&json!({"$ref": "#/x", "description": "d"}));
        assert_eq!(graph.ref_target(node), Some("#/x"));
        assert_eq!(graph.ref_siblings(node).len(), 1);

        graph.set_ref_target(node, "#/y".to_string());
        assert_eq!(graph.ref_target(node), Some("#/y"));

        let empty = graph.import(&json!({"$ref": ""}));
        assert_eq!(graph.ref_target(empty), None);
    }
}
