// Dependency graph over named nodes. DFS with an explicit recursion
// stack finds cycles and reconstructs the offending chain; Kahn's
// algorithm produces the execution order with insertion-order tie
// breaking.

use std::collections::HashMap;

/// A directed dependency graph keyed by node id, preserving insertion
/// order. An edge `a -> b` means "a depends on b".
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Node ids in insertion order.
    nodes: Vec<String>,
    /// node id → ids it depends on.
    deps: HashMap<String, Vec<String>>,
}

/// Result of cycle detection: the chain, closed (first == last).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    pub chain: Vec<String>,
}

impl std::fmt::Display for Cycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.chain.join(" -> "))
    }
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: impl Into<String>) {
        let id = id.into();
        if !self.nodes.contains(&id) {
            self.nodes.push(id);
        }
    }

    /// Record that `id` depends on `on`.
    pub fn add_dependency(&mut self, id: &str, on: &str) {
        self.deps
            .entry(id.to_string())
            .or_default()
            .push(on.to_string());
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Dependencies recorded for a node, or empty.
    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.deps.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Dependency targets that are not nodes of this graph.
    pub fn unknown_targets(&self) -> Vec<(String, String)> {
        let mut missing = Vec::new();
        for id in &self.nodes {
            for dep in self.dependencies_of(id) {
                if !self.nodes.contains(dep) {
                    missing.push((id.clone(), dep.clone()));
                }
            }
        }
        missing
    }

    /// Nodes that depend on themselves.
    pub fn self_loops(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|id| self.dependencies_of(id).iter().any(|d| d == *id))
            .cloned()
            .collect()
    }

    /// DFS cycle detection with a recursion stack. On discovery the
    /// cycle is reconstructed by slicing the path from the re-entry
    /// point; the returned chain is closed (`a -> c -> b -> a`).
    pub fn find_cycle(&self) -> Option<Cycle> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InStack,
            Done,
        }

        let mut marks: HashMap<&str, Mark> = self
            .nodes
            .iter()
            .map(|n| (n.as_str(), Mark::Unvisited))
            .collect();

        fn visit<'a>(
            graph: &'a DependencyGraph,
            node: &'a str,
            marks: &mut HashMap<&'a str, Mark>,
            stack: &mut Vec<&'a str>,
        ) -> Option<Cycle> {
            marks.insert(node, Mark::InStack);
            stack.push(node);

            for dep in graph.dependencies_of(node) {
                match marks.get(dep.as_str()).copied() {
                    Some(Mark::InStack) => {
                        let start = stack
                            .iter()
                            .position(|n| *n == dep.as_str())
                            .unwrap_or(0);
                        let mut chain: Vec<String> =
                            stack[start..].iter().map(|s| s.to_string()).collect();
                        chain.push(dep.clone());
                        return Some(Cycle { chain });
                    }
                    Some(Mark::Unvisited) => {
                        if let Some(cycle) = visit(graph, dep.as_str(), marks, stack) {
                            return Some(cycle);
                        }
                    }
                    // Done nodes and unknown targets cannot close a cycle.
                    _ => {}
                }
            }

            stack.pop();
            marks.insert(node, Mark::Done);
            None
        }

        let mut stack = Vec::new();
        for node in &self.nodes {
            if marks.get(node.as_str()) == Some(&Mark::Unvisited) {
                if let Some(cycle) = visit(self, node.as_str(), &mut marks, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    /// Kahn's algorithm. Zero in-degree nodes first; ties broken by
    /// insertion order. Fails with the discovered cycle when the graph
    /// is not a DAG. Unknown dependency targets are ignored here;
    /// `unknown_targets` reports them separately.
    pub fn execution_order(&self) -> Result<Vec<String>, Cycle> {
        let mut remaining_deps: HashMap<&str, Vec<&str>> = HashMap::new();
        for id in &self.nodes {
            let deps: Vec<&str> = self
                .dependencies_of(id)
                .iter()
                .map(String::as_str)
                .filter(|d| self.nodes.iter().any(|n| n == *d))
                .collect();
            remaining_deps.insert(id.as_str(), deps);
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut placed: Vec<&str> = Vec::new();

        while order.len() < self.nodes.len() {
            // Scan in insertion order for the next satisfiable node.
            let next = self.nodes.iter().find(|id| {
                !placed.contains(&id.as_str())
                    && remaining_deps[id.as_str()]
                        .iter()
                        .all(|d| placed.contains(d))
            });

            match next {
                Some(id) => {
                    placed.push(id.as_str());
                    order.push(id.clone());
                }
                None => {
                    let cycle = self.find_cycle().unwrap_or(Cycle {
                        chain: self
                            .nodes
                            .iter()
                            .filter(|n| !placed.contains(&n.as_str()))
                            .cloned()
                            .collect(),
                    });
                    return Err(cycle);
                }
            }
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for n in nodes {
            g.add_node(*n);
        }
        for (from, to) in edges {
            g.add_dependency(from, to);
        }
        g
    }

    #[test]
    fn test_linear_order() {
        let g = graph(&["a", "b", "c"], &[("b", "a"), ("c", "b")]);
        assert_eq!(g.execution_order().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_independent_nodes_keep_insertion_order() {
        let g = graph(&["z", "m", "a"], &[]);
        assert_eq!(g.execution_order().unwrap(), vec!["z", "m", "a"]);
    }

    #[test]
    fn test_tie_break_by_insertion_order() {
        // Both b and c only need a; b was declared first.
        let g = graph(&["b", "c", "a"], &[("b", "a"), ("c", "a")]);
        assert_eq!(g.execution_order().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cycle_detected_and_named() {
        let g = graph(&["a", "b", "c"], &[("a", "c"), ("b", "a"), ("c", "b")]);
        let cycle = g.find_cycle().expect("cycle");
        // Chain is closed and contains all three nodes.
        assert_eq!(cycle.chain.first(), cycle.chain.last());
        assert_eq!(cycle.chain.len(), 4);
        let rendered = cycle.to_string();
        for node in ["a", "b", "c"] {
            assert!(rendered.contains(node));
        }
        assert!(g.execution_order().is_err());
    }

    #[test]
    fn test_self_loop() {
        let g = graph(&["a"], &[("a", "a")]);
        assert_eq!(g.self_loops(), vec!["a"]);
        let cycle = g.find_cycle().expect("cycle");
        assert_eq!(cycle.chain, vec!["a", "a"]);
    }

    #[test]
    fn test_unknown_targets_reported_not_fatal() {
        let g = graph(&["a", "b"], &[("b", "a"), ("b", "ghost")]);
        assert_eq!(
            g.unknown_targets(),
            vec![("b".to_string(), "ghost".to_string())]
        );
        // Order still computes, ignoring the unknown edge.
        assert_eq!(g.execution_order().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_diamond() {
        let g = graph(
            &["d", "b", "c", "a"],
            &[("b", "a"), ("c", "a"), ("d", "b"), ("d", "c")],
        );
        let order = g.execution_order().unwrap();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }
}
