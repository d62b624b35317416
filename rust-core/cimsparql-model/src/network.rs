// SPDX-License-Identifier: PMPL-1.0-or-later
//! Connected components of a node-to-node edge list.

use std::collections::HashMap;
use std::hash::Hash;

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;

/// Islands of a network given as undirected edges.
///
/// Nodes keep the order in which they first appear in the edge list; each
/// node's reference is the first node of its component in that order.
#[derive(Debug, Clone)]
pub struct Islands<N> {
    graph: UnGraph<N, ()>,
    groups: Vec<Vec<NodeIndex>>,
}

impl<N> Islands<N>
where
    N: Clone + Eq + Hash,
{
    pub fn new<I>(edges: I) -> Self
    where
        I: IntoIterator<Item = (N, N)>,
    {
        let mut graph = UnGraph::<N, ()>::new_undirected();
        let mut ids: HashMap<N, NodeIndex> = HashMap::new();
        let mut node = |graph: &mut UnGraph<N, ()>, n: N| {
            *ids.entry(n.clone()).or_insert_with(|| graph.add_node(n))
        };
        for (a, b) in edges {
            let a = node(&mut graph, a);
            let b = node(&mut graph, b);
            graph.add_edge(a, b, ());
        }

        let mut components = UnionFind::<usize>::new(graph.node_count());
        for edge in graph.edge_references() {
            components.union(edge.source().index(), edge.target().index());
        }
        let mut groups: Vec<Vec<NodeIndex>> = Vec::new();
        let mut slot: HashMap<usize, usize> = HashMap::new();
        for idx in graph.node_indices() {
            let root = components.find(idx.index());
            let next = groups.len();
            let group = *slot.entry(root).or_insert(next);
            if group == next {
                groups.push(Vec::new());
            }
            groups[group].push(idx);
        }

        Self { graph, groups }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Components in order of their first node.
    pub fn groups(&self) -> Vec<Vec<N>> {
        self.groups
            .iter()
            .map(|group| group.iter().map(|&idx| self.graph[idx].clone()).collect())
            .collect()
    }

    /// `(node, reference node)` for every node, grouped by component.
    pub fn reference_nodes(&self) -> Vec<(N, N)> {
        self.groups
            .iter()
            .flat_map(|group| {
                let reference = &self.graph[group[0]];
                group
                    .iter()
                    .map(move |&idx| (self.graph[idx].clone(), reference.clone()))
            })
            .collect()
    }
}
