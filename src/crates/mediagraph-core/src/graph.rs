//! The graph model: a DAG of nodes connected by typed port edges.
//!
//! A [`Graph`] upholds three invariants at every mutation:
//!
//! - every edge references existing nodes and ports;
//! - the edge set forms no directed cycle;
//! - every edge connects an output port to a compatible input port.
//!
//! Content-affecting mutations (adding/removing an incoming edge, editing
//! params or label) mark the touched node and everything transitively
//! downstream of it stale, so the executor re-runs them instead of serving
//! cached results.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::node::Node;
use crate::port::Connection;

/// A directional connection from one node's output port to another's input
/// port. Identity is derived deterministically from the four endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    #[serde(flatten)]
    pub connection: Connection,
}

impl Edge {
    /// Build an edge whose id encodes its endpoints.
    pub fn from_ports(
        from_node_id: impl Into<String>,
        from_port_id: impl Into<String>,
        to_node_id: impl Into<String>,
        to_port_id: impl Into<String>,
    ) -> Self {
        let connection = Connection {
            from_node_id: from_node_id.into(),
            from_port_id: from_port_id.into(),
            to_node_id: to_node_id.into(),
            to_port_id: to_port_id.into(),
        };
        Self {
            id: connection.id(),
            connection,
        }
    }
}

/// A DAG of nodes and edges; the executable artifact.
///
/// Nodes are kept in insertion order so topological tie-breaking between
/// equally-ready nodes is stable across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    pub id: String,
    pub name: String,
    /// Free-form contextual prompt text prepended to every node's prompt
    /// during this graph's runs.
    #[serde(default)]
    pub canvas_memory: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<Edge>,
}

impl Graph {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: id.into(),
            name: name.into(),
            canvas_memory: String::new(),
            created_at: now,
            updated_at: now,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn get_node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn get_node_mut(&mut self, node_id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == node_id)
    }

    /// Insert a node. Replaces any node with the same id.
    pub fn add_node(&mut self, node: Node) {
        if let Some(existing) = self.nodes.iter_mut().find(|n| n.id == node.id) {
            *existing = node;
        } else {
            self.nodes.push(node);
        }
    }

    /// Remove a node and every edge incident to it, marking each former
    /// downstream node stale.
    pub fn remove_node(&mut self, node_id: &str) {
        let downstream = self.get_downstream(node_id);
        self.nodes.retain(|n| n.id != node_id);
        self.edges.retain(|e| {
            e.connection.from_node_id != node_id && e.connection.to_node_id != node_id
        });
        for id in downstream {
            self.mark_stale(&id);
        }
    }

    /// Validate and append an edge, then mark the target node stale
    /// (adding an input is a content-affecting change).
    ///
    /// Fails with [`EngineError::NodeNotFound`]/[`EngineError::PortNotFound`]
    /// when an endpoint is absent, [`EngineError::DuplicateEdge`] when an
    /// identical edge already exists, [`EngineError::PortIncompatible`] when
    /// the ports cannot carry the same data, and
    /// [`EngineError::CycleDetected`] when insertion would close a cycle.
    pub fn add_edge(&mut self, edge: Edge) -> Result<()> {
        let conn = &edge.connection;
        let from_node = self
            .get_node(&conn.from_node_id)
            .ok_or_else(|| EngineError::NodeNotFound(conn.from_node_id.clone()))?;
        let to_node = self
            .get_node(&conn.to_node_id)
            .ok_or_else(|| EngineError::NodeNotFound(conn.to_node_id.clone()))?;

        let from_port = from_node
            .get_output_port(&conn.from_port_id)
            .ok_or_else(|| EngineError::PortNotFound(conn.from_port_id.clone()))?;
        let to_port = to_node
            .get_input_port(&conn.to_port_id)
            .ok_or_else(|| EngineError::PortNotFound(conn.to_port_id.clone()))?;

        if self.edges.iter().any(|e| e.id == edge.id) {
            return Err(EngineError::DuplicateEdge(edge.id.clone()));
        }

        if !from_port.is_compatible_with(to_port) {
            return Err(EngineError::PortIncompatible {
                from: from_port.port_type.as_str().to_string(),
                to: to_port.port_type.as_str().to_string(),
            });
        }

        if self.would_create_cycle(conn) {
            return Err(EngineError::CycleDetected);
        }

        let target = edge.connection.to_node_id.clone();
        self.edges.push(edge);
        self.mark_stale(&target);
        Ok(())
    }

    /// Remove an edge by id, marking the former target node stale.
    pub fn remove_edge(&mut self, edge_id: &str) {
        let target = self
            .edges
            .iter()
            .find(|e| e.id == edge_id)
            .map(|e| e.connection.to_node_id.clone());
        self.edges.retain(|e| e.id != edge_id);
        if let Some(target) = target {
            self.mark_stale(&target);
        }
    }

    /// Edges whose target is the given node.
    pub fn incoming_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.connection.to_node_id == node_id)
    }

    /// Ids of the nodes the given node directly depends on.
    pub fn get_dependencies(&self, node_id: &str) -> Vec<String> {
        self.incoming_edges(node_id)
            .map(|e| e.connection.from_node_id.clone())
            .collect()
    }

    /// All node ids reachable downstream of the given node (forward BFS),
    /// excluding the node itself.
    pub fn get_downstream(&self, node_id: &str) -> Vec<String> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(node_id);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.to_string()) {
                continue;
            }
            for edge in &self.edges {
                if edge.connection.from_node_id == current {
                    queue.push_back(&edge.connection.to_node_id);
                }
            }
        }
        visited.remove(node_id);
        // Insertion order keeps the result deterministic for callers.
        self.nodes
            .iter()
            .filter(|n| visited.contains(&n.id))
            .map(|n| n.id.clone())
            .collect()
    }

    /// Mark the node and every transitively downstream node stale.
    pub fn mark_stale(&mut self, node_id: &str) {
        let downstream = self.get_downstream(node_id);
        if let Some(node) = self.get_node_mut(node_id) {
            node.stale = true;
        }
        for id in downstream {
            if let Some(node) = self.get_node_mut(&id) {
                node.stale = true;
            }
        }
    }

    /// DFS over a virtual adjacency list that includes the prospective edge.
    fn would_create_cycle(&self, new_conn: &Connection) -> bool {
        let mut adj: Vec<(&str, Vec<&str>)> = self
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), Vec::new()))
            .collect();
        let index_of = |id: &str, adj: &[(&str, Vec<&str>)]| adj.iter().position(|(n, _)| *n == id);

        for edge in &self.edges {
            if let Some(i) = index_of(&edge.connection.from_node_id, &adj) {
                adj[i].1.push(edge.connection.to_node_id.as_str());
            }
        }
        if let Some(i) = index_of(&new_conn.from_node_id, &adj) {
            adj[i].1.push(new_conn.to_node_id.as_str());
        }

        fn visit<'a>(
            node: &'a str,
            adj: &[(&'a str, Vec<&'a str>)],
            visited: &mut HashSet<&'a str>,
            stack: &mut HashSet<&'a str>,
        ) -> bool {
            visited.insert(node);
            stack.insert(node);
            if let Some((_, next)) = adj.iter().find(|(n, _)| *n == node) {
                for &neighbor in next {
                    if !visited.contains(neighbor) {
                        if visit(neighbor, adj, visited, stack) {
                            return true;
                        }
                    } else if stack.contains(neighbor) {
                        return true;
                    }
                }
            }
            stack.remove(node);
            false
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: HashSet<&str> = HashSet::new();
        let ids: Vec<&str> = adj.iter().map(|(n, _)| *n).collect();
        for id in ids {
            if !visited.contains(id) && visit(id, &adj, &mut visited, &mut stack) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeType, Position};
    use serde_json::Map;

    fn graph_with(types: &[(&str, NodeType)]) -> Graph {
        let mut graph = Graph::new("g1", "test");
        for (id, node_type) in types {
            graph.add_node(Node::new(
                *id,
                *node_type,
                *id,
                Map::new(),
                Position::default(),
            ));
        }
        graph
    }

    fn connect(graph: &mut Graph, from: &str, from_port: &str, to: &str) -> Result<()> {
        graph.add_edge(Edge::from_ports(
            from,
            format!("{from}_output_{from_port}"),
            to,
            format!("{to}_input_in"),
        ))
    }

    #[test]
    fn add_edge_rejects_missing_node() {
        let mut graph = graph_with(&[("a", NodeType::GenerateText)]);
        let err = connect(&mut graph, "a", "text", "ghost").unwrap_err();
        assert!(matches!(err, EngineError::NodeNotFound(_)));
    }

    #[test]
    fn add_edge_rejects_missing_port() {
        let mut graph = graph_with(&[("a", NodeType::GenerateText), ("b", NodeType::GenerateImage)]);
        let err = graph
            .add_edge(Edge::from_ports("a", "a_output_nope", "b", "b_input_in"))
            .unwrap_err();
        assert!(matches!(err, EngineError::PortNotFound(_)));
    }

    #[test]
    fn add_edge_rejects_duplicate() {
        let mut graph = graph_with(&[("a", NodeType::GenerateText), ("b", NodeType::GenerateImage)]);
        connect(&mut graph, "a", "text", "b").unwrap();
        let err = connect(&mut graph, "a", "text", "b").unwrap_err();
        assert!(matches!(err, EngineError::DuplicateEdge(_)));
        assert_eq!(graph.edges().len(), 1);
    }

    #[test]
    fn add_edge_rejects_cycle() {
        let mut graph = graph_with(&[
            ("a", NodeType::GenerateText),
            ("b", NodeType::GenerateText),
            ("c", NodeType::GenerateText),
        ]);
        connect(&mut graph, "a", "text", "b").unwrap();
        connect(&mut graph, "b", "text", "c").unwrap();
        let err = connect(&mut graph, "c", "text", "a").unwrap_err();
        assert!(matches!(err, EngineError::CycleDetected));
    }

    #[test]
    fn add_edge_marks_target_stale() {
        let mut graph = graph_with(&[
            ("a", NodeType::GenerateText),
            ("b", NodeType::GenerateImage),
            ("c", NodeType::GenerateVideo),
        ]);
        connect(&mut graph, "b", "image", "c").unwrap();
        graph.get_node_mut("b").unwrap().stale = false;
        graph.get_node_mut("c").unwrap().stale = false;

        connect(&mut graph, "a", "text", "b").unwrap();
        assert!(graph.get_node("b").unwrap().stale);
        assert!(graph.get_node("c").unwrap().stale, "staleness propagates downstream");
        assert!(!graph.get_node("a").unwrap().stale);
    }

    #[test]
    fn remove_node_drops_incident_edges_and_marks_downstream_stale() {
        let mut graph = graph_with(&[
            ("a", NodeType::GenerateText),
            ("b", NodeType::GenerateImage),
            ("c", NodeType::GenerateVideo),
        ]);
        connect(&mut graph, "a", "text", "b").unwrap();
        connect(&mut graph, "b", "image", "c").unwrap();
        graph.get_node_mut("c").unwrap().stale = false;

        graph.remove_node("b");
        assert!(graph.get_node("b").is_none());
        assert!(graph.edges().is_empty());
        assert!(graph.get_node("c").unwrap().stale);
    }

    #[test]
    fn downstream_walk_is_transitive() {
        let mut graph = graph_with(&[
            ("a", NodeType::GenerateText),
            ("b", NodeType::GenerateImage),
            ("c", NodeType::GenerateVideo),
        ]);
        connect(&mut graph, "a", "text", "b").unwrap();
        connect(&mut graph, "b", "image", "c").unwrap();
        assert_eq!(graph.get_downstream("a"), vec!["b".to_string(), "c".to_string()]);
        assert!(graph.get_downstream("c").is_empty());
    }

    #[test]
    fn graph_round_trips_through_json() {
        let mut graph = graph_with(&[("a", NodeType::GenerateText), ("b", NodeType::GenerateImage)]);
        connect(&mut graph, "a", "text", "b").unwrap();
        let json = serde_json::to_string(&graph).unwrap();
        let back: Graph = serde_json::from_str(&json).unwrap();
        assert_eq!(back.node_count(), 2);
        assert_eq!(back.edges().len(), 1);
        assert_eq!(back.edges()[0].id, graph.edges()[0].id);
        // Insertion order survives persistence.
        let ids: Vec<&str> = back.node_ids().collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
