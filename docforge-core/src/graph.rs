//! Cycle Detection
//!
//! Two detectors over two different graphs. The document graph is the
//! editor's visual flow (`document.edges`, block ids). The snippet graph is
//! "head body transcludes" between snippets. They share no state.

use std::collections::{BTreeMap, BTreeSet};

use crate::index::SnippetIndex;
use crate::model::Edge;
use crate::text::scan_transclusions;

/// A back edge found during traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    /// Node revisited while still being visited.
    pub node: String,
    /// Traversal path from the cycle entry back to `node`.
    pub path: Vec<String>,
}

/// Depth-first search with a visiting set. Nodes and successors are walked
/// in sorted order so the reported cycles are stable.
fn find_cycles(adjacency: &BTreeMap<String, BTreeSet<String>>) -> Vec<Cycle> {
    fn visit(
        node: &str,
        adjacency: &BTreeMap<String, BTreeSet<String>>,
        visited: &mut BTreeSet<String>,
        stack: &mut Vec<String>,
        cycles: &mut Vec<Cycle>,
    ) {
        visited.insert(node.to_string());
        stack.push(node.to_string());

        if let Some(successors) = adjacency.get(node) {
            for next in successors {
                if let Some(pos) = stack.iter().position(|n| n == next) {
                    let mut path = stack[pos..].to_vec();
                    path.push(next.clone());
                    cycles.push(Cycle { node: next.clone(), path });
                } else if !visited.contains(next) {
                    visit(next, adjacency, visited, stack, cycles);
                }
            }
        }

        stack.pop();
    }

    let mut visited = BTreeSet::new();
    let mut stack = Vec::new();
    let mut cycles = Vec::new();

    for node in adjacency.keys() {
        if !visited.contains(node) {
            visit(node, adjacency, &mut visited, &mut stack, &mut cycles);
        }
    }
    cycles
}

/// Cycles in the document's visual flow graph.
pub fn document_cycles(edges: &[Edge]) -> Vec<Cycle> {
    let mut adjacency: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for edge in edges {
        adjacency
            .entry(edge.source.clone())
            .or_default()
            .insert(edge.target.clone());
        adjacency.entry(edge.target.clone()).or_default();
    }
    find_cycles(&adjacency)
}

/// Transclusion dependencies between snippets, built from head bodies.
#[derive(Debug, Clone, Default)]
pub struct SnippetGraph {
    pub adjacency: BTreeMap<String, BTreeSet<String>>,
    /// `(snippet id, reference)` for tokens whose target does not resolve.
    pub missing: Vec<(String, String)>,
}

impl SnippetGraph {
    pub fn build(index: &SnippetIndex) -> Self {
        let mut graph = Self::default();
        for entry in index.entries() {
            let id = entry.snippet.id.clone();
            let successors = graph.adjacency.entry(id.clone()).or_default();
            for token in scan_transclusions(&entry.head.body) {
                match index.resolve_token(&token) {
                    Some(target) => {
                        successors.insert(target.id().to_string());
                    }
                    None => graph.missing.push((id.clone(), token.reference())),
                }
            }
        }
        graph.missing.sort();
        graph.missing.dedup();
        graph
    }

    pub fn cycles(&self) -> Vec<Cycle> {
        find_cycles(&self.adjacency)
    }
}
