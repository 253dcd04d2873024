//! Topology utilities: execution order, reverse reachability, and
//! level partitioning of the sub-DAG rooted at the requested outputs.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::graph::Graph;

/// Node ids in execution order (Kahn's algorithm).
///
/// Ties between equally-ready nodes are broken by insertion order, which
/// keeps the result stable across runs of the same graph.
pub fn topo_order(graph: &Graph) -> Vec<String> {
    let ids: Vec<&str> = graph.node_ids().collect();
    let mut in_degree: HashMap<&str, usize> = ids.iter().map(|id| (*id, 0)).collect();
    let mut adj: HashMap<&str, Vec<&str>> = ids.iter().map(|id| (*id, Vec::new())).collect();

    for edge in graph.edges() {
        let src = edge.connection.from_node_id.as_str();
        let dst = edge.connection.to_node_id.as_str();
        if let (Some(next), Some(deg)) = (adj.get_mut(src), in_degree.get_mut(dst)) {
            next.push(dst);
            *deg += 1;
        }
    }

    let mut queue: VecDeque<&str> = ids
        .iter()
        .filter(|id| in_degree.get(*id) == Some(&0))
        .copied()
        .collect();
    let mut order = Vec::with_capacity(ids.len());

    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        if let Some(next) = adj.get(id) {
            for &neighbor in next {
                let deg = in_degree.get_mut(neighbor).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(neighbor);
                }
            }
        }
    }

    order
}

/// The minimal set of nodes whose execution is needed to produce the
/// requested outputs: reverse reachability over dependency edges.
pub fn required_nodes(graph: &Graph, output_node_ids: &[String]) -> HashSet<String> {
    let mut required: HashSet<String> = HashSet::new();
    let mut stack: Vec<String> = output_node_ids.to_vec();

    while let Some(id) = stack.pop() {
        if !required.insert(id.clone()) {
            continue;
        }
        stack.extend(graph.get_dependencies(&id));
    }

    required
}

/// Partition the restricted sub-DAG into levels, roots first.
///
/// `level(n) = 1 + max(level(p))` over predecessors of `n` within the
/// restricted node set; nodes with no in-set predecessor sit at level 0.
/// `node_ids` must already be topologically ordered.
pub fn levels(graph: &Graph, node_ids: &[String]) -> Vec<Vec<String>> {
    let node_set: HashSet<&str> = node_ids.iter().map(String::as_str).collect();
    let mut preds: HashMap<&str, Vec<&str>> =
        node_ids.iter().map(|id| (id.as_str(), Vec::new())).collect();

    for edge in graph.edges() {
        let src = edge.connection.from_node_id.as_str();
        let dst = edge.connection.to_node_id.as_str();
        if node_set.contains(src) && node_set.contains(dst) {
            preds.get_mut(dst).unwrap().push(src);
        }
    }

    let mut level_of: HashMap<&str, usize> = HashMap::new();
    for id in node_ids {
        let level = preds[id.as_str()]
            .iter()
            .map(|p| level_of.get(p).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        level_of.insert(id.as_str(), level);
    }

    let depth = level_of.values().max().map_or(0, |max| max + 1);
    let mut grouped: Vec<Vec<String>> = vec![Vec::new(); depth];
    for id in node_ids {
        grouped[level_of[id.as_str()]].push(id.clone());
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Edge;
    use crate::node::{Node, NodeType, Position};
    use serde_json::Map;

    fn diamond() -> Graph {
        // a -> b -> d, a -> c -> d
        let mut graph = Graph::new("g", "diamond");
        for id in ["a", "b", "c", "d"] {
            graph.add_node(Node::new(
                id,
                NodeType::GenerateText,
                id,
                Map::new(),
                Position::default(),
            ));
        }
        for (from, to) in [("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")] {
            graph
                .add_edge(Edge::from_ports(
                    from,
                    format!("{from}_output_text"),
                    to,
                    format!("{to}_input_in"),
                ))
                .unwrap();
        }
        graph
    }

    #[test]
    fn topo_order_respects_dependencies() {
        let graph = diamond();
        let order = topo_order(&graph);
        let pos = |id: &str| order.iter().position(|n| n == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn topo_order_breaks_ties_by_insertion_order() {
        let graph = diamond();
        let order = topo_order(&graph);
        // b was inserted before c; both become ready together.
        let pos = |id: &str| order.iter().position(|n| n == id).unwrap();
        assert!(pos("b") < pos("c"));
    }

    #[test]
    fn required_walks_dependencies_backwards() {
        let graph = diamond();
        let required = required_nodes(&graph, &["b".to_string()]);
        assert_eq!(
            required,
            ["a", "b"].iter().map(|s| s.to_string()).collect()
        );
        let all = required_nodes(&graph, &["d".to_string()]);
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn levels_partition_by_longest_path() {
        let graph = diamond();
        let order = topo_order(&graph);
        let levels = levels(&graph, &order);
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], vec!["a".to_string()]);
        assert_eq!(levels[1], vec!["b".to_string(), "c".to_string()]);
        assert_eq!(levels[2], vec!["d".to_string()]);
    }

    #[test]
    fn levels_restricted_to_subset() {
        let graph = diamond();
        // Only the a -> b chain is required.
        let subset = vec!["a".to_string(), "b".to_string()];
        let levels = levels(&graph, &subset);
        assert_eq!(levels, vec![vec!["a".to_string()], vec!["b".to_string()]]);
    }
}
