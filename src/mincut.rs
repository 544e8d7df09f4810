/*
 * This file is part of chunkedgraph-core.
 *
 * chunkedgraph-core is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
*/

//! # Mincut engine (spec.md §4.5)
//!
//! Converts source/sink supervoxel annotations into a concrete set of
//! atomic edges to remove. Ported algorithmically from
//! `original_source/pychunkedgraph/backend/cutting.py` (`merge_cross_chunk_edges`,
//! `mincut`): coalesce cross-chunk (`+∞`) edges into representatives,
//! fuse multi-terminal sources/sinks, then run Edmonds–Karp between a
//! nominated source and sink.

use crate::{
    error::{Error, ErrorKind, GraphResult},
    ids::NodeId,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// An edge list paired with per-edge affinities, as produced by the local
/// graph builder.
pub struct LocalGraph {
    pub edges: Vec<(NodeId, NodeId)>,
    pub affinities: Vec<f32>,
}

/// Mapping from an original node to its cross-chunk representative (the
/// minimum node ID in its `+∞`-connected component). Nodes absent from any
/// cross-chunk component map to themselves.
fn coalesce_cross_chunk(graph: &LocalGraph) -> HashMap<NodeId, NodeId> {
    let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut all_nodes: HashSet<NodeId> = HashSet::new();
    for (i, &(u, v)) in graph.edges.iter().enumerate() {
        all_nodes.insert(u);
        all_nodes.insert(v);
        if !graph.affinities[i].is_finite() {
            adjacency.entry(u).or_default().push(v);
            adjacency.entry(v).or_default().push(u);
        }
    }

    let mut mapping = HashMap::new();
    let mut visited = HashSet::new();
    for &start in adjacency.keys() {
        if visited.contains(&start) {
            continue;
        }
        let mut component = Vec::new();
        let mut queue = VecDeque::from([start]);
        visited.insert(start);
        while let Some(node) = queue.pop_front() {
            component.push(node);
            for &next in adjacency.get(&node).into_iter().flatten() {
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        let rep = *component.iter().min().unwrap();
        for node in component {
            mapping.insert(node, rep);
        }
    }
    for node in all_nodes {
        mapping.entry(node).or_insert(node);
    }
    mapping
}

fn remap(mapping: &HashMap<NodeId, NodeId>, node: NodeId) -> NodeId {
    *mapping.get(&node).unwrap_or(&node)
}

/// Undirected capacity graph for Edmonds-Karp, stored as directed arcs with
/// equal forward/backward capacity (the standard reduction for undirected
/// max-flow).
#[derive(Default)]
struct Residual {
    arcs: HashMap<NodeId, BTreeMap<NodeId, f64>>,
}

impl Residual {
    fn add_capacity(&mut self, u: NodeId, v: NodeId, cap: f64) {
        *self.arcs.entry(u).or_default().entry(v).or_insert(0.0) += cap;
        *self.arcs.entry(v).or_default().entry(u).or_insert(0.0) += cap;
    }

    fn neighbors(&self, node: NodeId) -> impl Iterator<Item = (NodeId, f64)> + '_ {
        self.arcs
            .get(&node)
            .into_iter()
            .flat_map(|m| m.iter().map(|(&n, &c)| (n, c)))
    }

    /// BFS augmenting path. Iterates neighbors in ascending node-ID order
    /// (via the `BTreeMap` adjacency) so that among equal-length paths the
    /// lexicographically least one (by successive `(min, max)` edge) is
    /// always chosen (spec.md §4.5 step 5 tie-break).
    fn find_augmenting_path(&self, source: NodeId, sink: NodeId) -> Option<Vec<NodeId>> {
        let mut prev: HashMap<NodeId, NodeId> = HashMap::new();
        let mut visited = HashSet::new();
        visited.insert(source);
        let mut queue = VecDeque::from([source]);
        while let Some(node) = queue.pop_front() {
            if node == sink {
                let mut path = vec![sink];
                let mut cur = sink;
                while cur != source {
                    cur = prev[&cur];
                    path.push(cur);
                }
                path.reverse();
                return Some(path);
            }
            for (next, cap) in self.neighbors(node) {
                if cap > 0.0 && visited.insert(next) {
                    prev.insert(next, node);
                    queue.push_back(next);
                }
            }
        }
        None
    }

    fn augment(&mut self, path: &[NodeId]) -> f64 {
        let bottleneck = path
            .windows(2)
            .map(|w| self.arcs[&w[0]][&w[1]])
            .fold(f64::INFINITY, f64::min);
        for w in path.windows(2) {
            *self.arcs.get_mut(&w[0]).unwrap().get_mut(&w[1]).unwrap() -= bottleneck;
            *self.arcs.get_mut(&w[1]).unwrap().get_mut(&w[0]).unwrap() += bottleneck;
        }
        bottleneck
    }

    /// Nodes reachable from `source` over strictly-positive residual
    /// capacity — the source side of the min cut.
    fn reachable_from(&self, source: NodeId) -> HashSet<NodeId> {
        let mut visited = HashSet::new();
        visited.insert(source);
        let mut queue = VecDeque::from([source]);
        while let Some(node) = queue.pop_front() {
            for (next, cap) in self.neighbors(node) {
                if cap > 0.0 && visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        visited
    }
}

/// Computes the min cut on a local graph (spec.md §4.5). Returns the
/// concrete atomic edges to remove, in the original (un-coalesced) ID
/// space.
pub fn mincut(
    graph: &LocalGraph,
    sources: &[NodeId],
    sinks: &[NodeId],
) -> GraphResult<Vec<(NodeId, NodeId)>> {
    if graph.edges.is_empty() {
        return Ok(Vec::new());
    }
    let source_set: HashSet<NodeId> = sources.iter().copied().collect();
    let sink_set: HashSet<NodeId> = sinks.iter().copied().collect();
    if !source_set.is_disjoint(&sink_set) {
        return Err(Error::bad_request(
            "a node cannot be both a source and a sink",
        ));
    }

    let mapping = coalesce_cross_chunk(graph);
    let rep_sources: Vec<NodeId> = sources.iter().map(|&s| remap(&mapping, s)).collect();
    let rep_sinks: Vec<NodeId> = sinks.iter().map(|&s| remap(&mapping, s)).collect();
    let unique_sources: HashSet<NodeId> = rep_sources.iter().copied().collect();
    let unique_sinks: HashSet<NodeId> = rep_sinks.iter().copied().collect();

    // build the working graph: remapped weighted edges (parallel edges sum
    // their capacity), plus +inf fusion edges among all source reps and
    // among all sink reps.
    let mut residual = Residual::default();
    let mut working_edges: Vec<(NodeId, NodeId, f64)> = Vec::new();
    let mut summed: HashMap<(NodeId, NodeId), f64> = HashMap::new();
    for (i, &(u, v)) in graph.edges.iter().enumerate() {
        if !graph.affinities[i].is_finite() {
            continue; // cross-chunk edges are fully absorbed by coalescing
        }
        let (ru, rv) = (remap(&mapping, u), remap(&mapping, v));
        if ru == rv {
            continue; // coalesced to the same representative
        }
        let key = (ru.min(rv), ru.max(rv));
        *summed.entry(key).or_insert(0.0) += graph.affinities[i] as f64;
    }
    for (&(u, v), &cap) in &summed {
        residual.add_capacity(u, v, cap);
        working_edges.push((u, v, cap));
    }
    for &a in &unique_sources {
        for &b in &unique_sources {
            if a != b {
                residual.add_capacity(a, b, f64::INFINITY);
                working_edges.push((a.min(b), a.max(b), f64::INFINITY));
            }
        }
    }
    for &a in &unique_sinks {
        for &b in &unique_sinks {
            if a != b {
                residual.add_capacity(a, b, f64::INFINITY);
                working_edges.push((a.min(b), a.max(b), f64::INFINITY));
            }
        }
    }

    // connectivity check: every component must contain either none of the
    // terminals, or all sources and all sinks.
    check_connectivity(&working_edges, &unique_sources, &unique_sinks)?;

    let nominated_source = *rep_sources.first().ok_or_else(|| {
        Error::bad_request("at least one source supervoxel is required")
    })?;
    let nominated_sink = *rep_sinks.first().ok_or_else(|| {
        Error::bad_request("at least one sink supervoxel is required")
    })?;

    // a source and a sink joined purely by `+inf` identity edges coalesce to
    // the same representative (spec.md §4.5 step 4): there is no finite cut
    // to find, and max-flow on a zero-length source-sink pair would loop
    // forever. Report no cut so the caller raises an illegal split.
    if nominated_source == nominated_sink {
        return Ok(Vec::new());
    }

    while let Some(path) = residual.find_augmenting_path(nominated_source, nominated_sink) {
        residual.augment(&path);
    }
    let source_side = residual.reachable_from(nominated_source);

    let mut rep_cut = Vec::new();
    for &(u, v, _) in &working_edges {
        if source_side.contains(&u) != source_side.contains(&v) {
            rep_cut.push((u, v));
        }
    }
    if rep_cut.is_empty() {
        return Ok(Vec::new());
    }

    uncoalesce(&mapping, &rep_cut, &graph.edges)
}

fn check_connectivity(
    working_edges: &[(NodeId, NodeId, f64)],
    sources: &HashSet<NodeId>,
    sinks: &HashSet<NodeId>,
) -> GraphResult<()> {
    let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut nodes: HashSet<NodeId> = HashSet::new();
    for &(u, v, _) in working_edges {
        adjacency.entry(u).or_default().push(v);
        adjacency.entry(v).or_default().push(u);
        nodes.insert(u);
        nodes.insert(v);
    }
    nodes.extend(sources.iter().copied());
    nodes.extend(sinks.iter().copied());

    let mut visited = HashSet::new();
    for &start in &nodes {
        if visited.contains(&start) {
            continue;
        }
        let mut component = HashSet::new();
        let mut queue = VecDeque::from([start]);
        visited.insert(start);
        while let Some(node) = queue.pop_front() {
            component.insert(node);
            for &next in adjacency.get(&node).into_iter().flatten() {
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        let has_source = component.iter().any(|n| sources.contains(n));
        let has_sink = component.iter().any(|n| sinks.contains(n));
        if !has_source && !has_sink {
            continue; // unrelated component, discard
        }
        let all_sources = sources.iter().all(|s| component.contains(s));
        let all_sinks = sinks.iter().all(|s| component.contains(s));
        if !(all_sources && all_sinks) {
            return Err(Error::bad_request(
                "sources and sinks are in different connected components",
            ));
        }
    }
    Ok(())
}

/// Expand a cut in representative space back to the original ID space: the
/// Cartesian product (both orderings) of the original members mapped to
/// each representative, intersected with the original edge set.
fn uncoalesce(
    mapping: &HashMap<NodeId, NodeId>,
    rep_cut: &[(NodeId, NodeId)],
    original_edges: &[(NodeId, NodeId)],
) -> GraphResult<Vec<(NodeId, NodeId)>> {
    let mut members: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for (&node, &rep) in mapping {
        members.entry(rep).or_default().push(node);
    }
    let original_set: HashSet<(NodeId, NodeId)> = original_edges
        .iter()
        .map(|&(a, b)| (a.min(b), a.max(b)))
        .collect();

    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for &(u_rep, v_rep) in rep_cut {
        let us = members.get(&u_rep).cloned().unwrap_or_else(|| vec![u_rep]);
        let vs = members.get(&v_rep).cloned().unwrap_or_else(|| vec![v_rep]);
        for &u in &us {
            for &v in &vs {
                let key = (u.min(v), u.max(v));
                if original_set.contains(&key) && seen.insert(key) {
                    out.push(key);
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(NodeId, NodeId)], affs: &[f32]) -> LocalGraph {
        LocalGraph {
            edges: edges.to_vec(),
            affinities: affs.to_vec(),
        }
    }

    /// S2: weighted chain, cut the weakest link.
    #[test]
    fn mincut_over_weighted_chain() {
        let g = graph(&[(1, 2), (2, 3), (3, 4)], &[10.0, 1.0, 10.0]);
        let cut = mincut(&g, &[1], &[4]).unwrap();
        assert_eq!(cut, vec![(2, 3)]);
    }

    /// S3: cross-chunk coalescing.
    #[test]
    fn mincut_respects_cross_chunk_coalescing() {
        let g = graph(&[(1, 2), (2, 3), (3, 4)], &[f32::INFINITY, 5.0, f32::INFINITY]);
        let cut = mincut(&g, &[1], &[4]).unwrap();
        assert_eq!(cut, vec![(2, 3)]);
    }

    /// S6: disconnected terminals.
    #[test]
    fn mincut_fails_on_disconnected_terminals() {
        let g = graph(&[(1, 2)], &[1.0]);
        let err = mincut(&g, &[1], &[99]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::BadRequest(_)));
    }

    #[test]
    fn mincut_empty_edges_short_circuits() {
        let g = graph(&[], &[]);
        assert_eq!(mincut(&g, &[1], &[2]).unwrap(), Vec::new());
    }

    #[test]
    fn mincut_rejects_node_in_both_terminal_sets() {
        let g = graph(&[(1, 2)], &[1.0]);
        let err = mincut(&g, &[1], &[1]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::BadRequest(_)));
    }

    /// Soundness property (spec.md §8 #4): no path remains between any
    /// original source and sink after applying the cut.
    #[test]
    fn cut_disconnects_all_sources_from_all_sinks() {
        let g = graph(
            &[(1, 2), (2, 3), (1, 4), (4, 3), (3, 5)],
            &[3.0, 3.0, 2.0, 2.0, 4.0],
        );
        let cut = mincut(&g, &[1], &[5]).unwrap();
        let cut_set: HashSet<(NodeId, NodeId)> = cut.into_iter().collect();
        let remaining: Vec<(NodeId, NodeId)> = g
            .edges
            .iter()
            .map(|&(a, b)| (a.min(b), a.max(b)))
            .filter(|e| !cut_set.contains(e))
            .collect();
        let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for (u, v) in remaining {
            adjacency.entry(u).or_default().push(v);
            adjacency.entry(v).or_default().push(u);
        }
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([1u64]);
        visited.insert(1u64);
        while let Some(n) = queue.pop_front() {
            for &next in adjacency.get(&n).into_iter().flatten() {
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        assert!(!visited.contains(&5));
    }

    /// Regression test: a source and sink joined purely by a `+inf`
    /// identity edge coalesce to the same representative. Must return an
    /// empty cut rather than looping forever on a zero-length augmenting
    /// path (spec.md §4.5 step 4).
    #[test]
    fn mincut_rejects_source_and_sink_fused_by_infinite_edge() {
        let g = graph(&[(1, 2), (2, 3)], &[f32::INFINITY, 1.0]);
        let cut = mincut(&g, &[1], &[2]).unwrap();
        assert!(cut.is_empty());
    }

    #[test]
    fn multi_terminal_sources_are_fused() {
        // 1 and 2 are both sources; 5 is the sink. The cut must separate
        // the fused {1,2} side from 5.
        let g = graph(
            &[(1, 3), (2, 3), (3, 4), (4, 5)],
            &[5.0, 5.0, 1.0, 5.0],
        );
        let cut = mincut(&g, &[1, 2], &[5]).unwrap();
        assert_eq!(cut, vec![(3, 4)]);
    }
}
