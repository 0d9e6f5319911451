//! Structural quality analysis of a graph snapshot.
//!
//! The analyzer is a pure function over a node/edge set. Edges whose
//! endpoints are not both present among the nodes are ignored.
//!
//! ## Cycle search
//!
//! Depth-first traversal from every unvisited node (in id order), over
//! neighbours in id order, with an explicit frame stack so depth is bounded
//! by heap rather than call stack. When a neighbour is already on the active
//! path, the cycle is the path suffix starting at that neighbour, closed by
//! repeating it: `n1 -> n2 -> n1` yields `[n1, n2, n1]`, a self-loop on `a`
//! yields `[a, a]`. Cycles are reported in discovery order; rotations of the
//! same cycle found from different back-edges are not merged.

use std::collections::{btree_set, BTreeMap, BTreeSet, HashMap, HashSet};

use crate::types::{Edge, Node, QualityReport, TrustSummary};

type Adjacency<'a> = BTreeMap<&'a str, BTreeSet<&'a str>>;

/// Computes quality reports. Holds no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityAnalyzer;

impl QualityAnalyzer {
    /// Create an analyzer.
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a snapshot.
    pub fn evaluate(&self, nodes: &[Node], edges: &[Edge]) -> QualityReport {
        let node_index: BTreeMap<&str, &Node> =
            nodes.iter().map(|node| (node.id.as_str(), node)).collect();

        let mut forward: Adjacency<'_> = node_index.keys().map(|id| (*id, BTreeSet::new())).collect();
        let mut reverse: Adjacency<'_> = forward.clone();

        for edge in edges {
            let (source, target) = (edge.source.as_str(), edge.target.as_str());
            if !node_index.contains_key(source) || !node_index.contains_key(target) {
                continue;
            }
            forward.entry(source).or_default().insert(target);
            reverse.entry(target).or_default().insert(source);
        }

        let ambiguous_nodes = node_index
            .iter()
            .filter(|(_, node)| node.ambiguous)
            .map(|(id, _)| id.to_string())
            .collect();

        let isolated_nodes = node_index
            .keys()
            .filter(|id| {
                forward.get(*id).map_or(true, BTreeSet::is_empty)
                    && reverse.get(*id).map_or(true, BTreeSet::is_empty)
            })
            .map(|id| id.to_string())
            .collect();

        QualityReport {
            ambiguous_nodes,
            isolated_nodes,
            cycles: detect_cycles(&forward),
            trust_summary: TrustSummary::from_values(node_index.values().map(|node| node.trust)),
        }
    }
}

struct Frame<'a> {
    node: &'a str,
    neighbours: btree_set::Iter<'a, &'a str>,
}

fn detect_cycles(adjacency: &Adjacency<'_>) -> Vec<Vec<String>> {
    let mut visited: HashSet<&str> = HashSet::new();
    // Node -> its position in `path` while it is on the active path.
    let mut on_path: HashMap<&str, usize> = HashMap::new();
    let mut path: Vec<&str> = Vec::new();
    let mut stack: Vec<Frame<'_>> = Vec::new();
    let mut cycles = Vec::new();

    for (&root, root_neighbours) in adjacency {
        if visited.contains(root) {
            continue;
        }

        visited.insert(root);
        on_path.insert(root, path.len());
        path.push(root);
        stack.push(Frame {
            node: root,
            neighbours: root_neighbours.iter(),
        });

        while let Some(frame) = stack.last_mut() {
            let current = frame.node;
            match frame.neighbours.next().copied() {
                Some(next) if !visited.contains(next) => {
                    visited.insert(next);
                    on_path.insert(next, path.len());
                    path.push(next);
                    stack.push(Frame {
                        node: next,
                        neighbours: adjacency[next].iter(),
                    });
                }
                Some(next) => {
                    if let Some(&start) = on_path.get(next) {
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|id| id.to_string()).collect();
                        cycle.push(next.to_string());
                        cycles.push(cycle);
                    }
                }
                None => {
                    stack.pop();
                    on_path.remove(current);
                    path.pop();
                }
            }
        }
    }

    cycles
}
