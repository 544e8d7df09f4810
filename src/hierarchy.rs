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

//! # Hierarchy reader (spec.md §4.3)
//!
//! Pure, lock-free reads against the snapshot implied by a timestamp
//! parameter (spec.md §5: "Reads ... execute without locks").

use crate::{
    bbox::BBox,
    error::{Error, ErrorKind, GraphResult},
    ids::{self, ChunkCoord, Layer, NodeId},
    store::{Cell, CellValue, Column, VersionedStore},
};
use std::collections::HashMap;

/// Either a flat array (single layer requested) or a per-layer mapping,
/// matching spec.md §4.3 `subgraph_nodes`.
#[derive(Debug, Clone, PartialEq)]
pub enum SubgraphNodes {
    Flat(Vec<NodeId>),
    ByLayer(HashMap<Layer, Vec<NodeId>>),
}

pub struct HierarchyReader<'s, S: VersionedStore + ?Sized> {
    store: &'s S,
    num_layers: Layer,
}

impl<'s, S: VersionedStore + ?Sized> HierarchyReader<'s, S> {
    pub fn new(store: &'s S, num_layers: Layer) -> Self {
        Self { store, num_layers }
    }

    fn parent_at(&self, node: NodeId, at_time: u64) -> Option<NodeId> {
        let rows = self.store.read_row(node, &[Column::Parent], at_time);
        rows.into_iter()
            .flat_map(|(_, cells)| cells)
            .max_by_key(|c| c.ts)
            .and_then(|cell| match cell.value {
                CellValue::Parent(p) => Some(p),
                _ => None,
            })
    }

    /// Walk the parent chain of `node` until `layer == stop_layer`
    /// (default: `num_layers`, i.e. the root).
    pub fn root_of(
        &self,
        node: NodeId,
        at_time: u64,
        stop_layer: Option<Layer>,
    ) -> GraphResult<NodeId> {
        let target = stop_layer.unwrap_or(self.num_layers);
        let mut current = node;
        // a layer's worth of hops is always sufficient; guards against a
        // cyclic parent relation caused by a store bug rather than looping
        // forever.
        for _ in 0..=self.num_layers {
            if ids::layer_of(current) == target {
                return Ok(current);
            }
            match self.parent_at(current, at_time) {
                Some(parent) => current = parent,
                None => return Err(Error::new(ErrorKind::NotFound)),
            }
        }
        Err(Error::new(ErrorKind::NotFound))
    }

    /// The immediate parent of `node` at `at_time`, if any. Used by the
    /// edit engine to walk one layer up when re-minting ancestors.
    pub fn parent_of(&self, node: NodeId, at_time: u64) -> Option<NodeId> {
        self.parent_at(node, at_time)
    }

    /// Batched `root_of`. If `assert_roots`, fails with `Internal` unless
    /// every resolved ancestor is actually at `num_layers`.
    pub fn roots_of(
        &self,
        nodes: &[NodeId],
        at_time: u64,
        assert_roots: bool,
    ) -> GraphResult<Vec<NodeId>> {
        let mut out = Vec::with_capacity(nodes.len());
        for &node in nodes {
            let root = self.root_of(node, at_time, None)?;
            if assert_roots && ids::layer_of(root) != self.num_layers {
                return Err(Error::new(ErrorKind::Internal(
                    "resolved ancestor is not a root at the requested time".into(),
                )));
            }
            out.push(root);
        }
        Ok(out)
    }

    /// Direct children of `node` at its own timestamp. Empty at layer 1.
    pub fn children_of(&self, node: NodeId, at_time: u64) -> Vec<NodeId> {
        if ids::layer_of(node) == 1 {
            return Vec::new();
        }
        let rows = self.store.read_row(node, &[Column::Child], at_time);
        rows.into_iter()
            .flat_map(|(_, cells)| cells)
            .max_by_key(|c| c.ts)
            .map(|cell| match cell.value {
                CellValue::Children(c) => c,
                _ => Vec::new(),
            })
            .unwrap_or_default()
    }

    /// Descend from `root`, pruning subtrees whose chunk does not intersect
    /// `bbox` (when given). `return_layers = None` returns a single flat
    /// array of leaves (layer 1); `Some(layers)` returns a per-layer map
    /// restricted to those layers.
    pub fn subgraph_nodes(
        &self,
        root: NodeId,
        at_time: u64,
        bbox: Option<BBox>,
        return_layers: Option<&[Layer]>,
    ) -> SubgraphNodes {
        let mut by_layer: HashMap<Layer, Vec<NodeId>> = HashMap::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if let Some(bbox) = bbox {
                if !bbox.contains(ids::chunk_coord(node)) {
                    continue;
                }
            }
            by_layer.entry(ids::layer_of(node)).or_default().push(node);
            for child in self.children_of(node, at_time) {
                stack.push(child);
            }
        }
        match return_layers {
            None => SubgraphNodes::Flat(by_layer.remove(&1).unwrap_or_default()),
            Some(layers) => {
                by_layer.retain(|l, _| layers.contains(l));
                SubgraphNodes::ByLayer(by_layer)
            }
        }
    }

    /// Atomic edges whose endpoints both reside in `root`'s subgraph,
    /// optionally restricted to `bbox`.
    pub fn subgraph_edges(
        &self,
        root: NodeId,
        at_time: u64,
        bbox: Option<BBox>,
    ) -> Vec<(NodeId, NodeId, f32)> {
        let SubgraphNodes::Flat(leaves) = self.subgraph_nodes(root, at_time, bbox, None) else {
            unreachable!("subgraph_nodes(None) always returns Flat")
        };
        let leaf_set: std::collections::HashSet<NodeId> = leaves.iter().copied().collect();
        let chunks: std::collections::HashSet<ChunkCoord> =
            leaves.iter().map(|&l| ids::chunk_coord(l)).collect();
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for chunk in chunks {
            for (node, cell) in self.store.range_read_chunk(1, chunk, Column::AtomicEdge, u64::MAX)
            {
                if !leaf_set.contains(&node) {
                    continue;
                }
                if let CellValue::Edge { peer, affinity } = cell.value {
                    if leaf_set.contains(&peer) {
                        let key = (node.min(peer), node.max(peer));
                        if seen.insert(key) {
                            out.push((key.0, key.1, affinity));
                        }
                    }
                }
            }
        }
        out
    }

    pub fn num_layers(&self) -> Layer {
        self.num_layers
    }

    /// Every layer-2 node within `chunk`, paired with its current children
    /// (spec.md §6 `l2_chunk_children`).
    pub fn l2_chunk_children(
        &self,
        chunk: ChunkCoord,
        at_time: u64,
    ) -> HashMap<NodeId, Vec<NodeId>> {
        let mut latest: HashMap<NodeId, (u64, Vec<NodeId>)> = HashMap::new();
        for (node, cell) in self.store.range_read_chunk(2, chunk, Column::Child, at_time) {
            if let CellValue::Children(children) = cell.value {
                let slot = latest.entry(node).or_insert((0, Vec::new()));
                if cell.ts >= slot.0 {
                    *slot = (cell.ts, children);
                }
            }
        }
        latest.into_iter().map(|(node, (_, children))| (node, children)).collect()
    }

    /// Shortest path (by hop count) between two leaves of the same root,
    /// over atomic edges within the root's subgraph (spec.md §6
    /// `find_path`). Only the exact, leaf-level search is implemented: the
    /// original's approximate/precomputed `precision_mode` depends on mesh
    /// skeleton data, which is out of scope (spec.md §1 "mesh centroid
    /// computation ... out of scope").
    pub fn find_path(&self, a: NodeId, b: NodeId, at_time: u64) -> GraphResult<Vec<NodeId>> {
        let root_a = self.root_of(a, at_time, None)?;
        let root_b = self.root_of(b, at_time, None)?;
        if root_a != root_b {
            return Err(Error::bad_request(
                "source and sink do not share a root at the requested time",
            ));
        }
        let SubgraphNodes::Flat(leaves) = self.subgraph_nodes(root_a, at_time, None, None) else {
            unreachable!("subgraph_nodes(None) always returns Flat")
        };
        let leaf_set: std::collections::HashSet<NodeId> = leaves.into_iter().collect();
        let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for &leaf in &leaf_set {
            for cell in raw_edges_of(self.store, leaf) {
                if let CellValue::Edge { peer, .. } = cell.value {
                    if leaf_set.contains(&peer) {
                        adjacency.entry(leaf).or_default().push(peer);
                    }
                }
            }
        }

        let mut prev: HashMap<NodeId, NodeId> = HashMap::new();
        let mut visited = std::collections::HashSet::new();
        visited.insert(a);
        let mut queue = std::collections::VecDeque::from([a]);
        while let Some(node) = queue.pop_front() {
            if node == b {
                break;
            }
            for &next in adjacency.get(&node).into_iter().flatten() {
                if visited.insert(next) {
                    prev.insert(next, node);
                    queue.push_back(next);
                }
            }
        }
        if !visited.contains(&b) {
            return Err(Error::new(ErrorKind::NotFound));
        }
        let mut path = vec![b];
        let mut cur = b;
        while cur != a {
            cur = prev[&cur];
            path.push(cur);
        }
        path.reverse();
        Ok(path)
    }

    /// The layer-2-to-layer-2 adjacency graph under `node`'s root (spec.md
    /// §6 `layer2_graph`): an edge `(p, q)` means some atomic edge connects
    /// a leaf under layer-2 parent `p` to a leaf under layer-2 parent `q`.
    pub fn layer2_graph(&self, node: NodeId, at_time: u64) -> GraphResult<Vec<(NodeId, NodeId)>> {
        let root = self.root_of(node, at_time, None)?;
        let SubgraphNodes::Flat(leaves) = self.subgraph_nodes(root, at_time, None, None) else {
            unreachable!("subgraph_nodes(None) always returns Flat")
        };
        let leaf_set: std::collections::HashSet<NodeId> = leaves.iter().copied().collect();
        let mut leaf_to_l2: HashMap<NodeId, NodeId> = HashMap::new();
        for &leaf in &leaves {
            if let Ok(l2) = self.root_of(leaf, at_time, Some(2)) {
                leaf_to_l2.insert(leaf, l2);
            }
        }

        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for &leaf in &leaves {
            let Some(&l2a) = leaf_to_l2.get(&leaf) else { continue };
            for cell in raw_edges_of(self.store, leaf) {
                if let CellValue::Edge { peer, .. } = cell.value {
                    if !leaf_set.contains(&peer) {
                        continue;
                    }
                    let Some(&l2b) = leaf_to_l2.get(&peer) else { continue };
                    if l2a == l2b {
                        continue;
                    }
                    let key = (l2a.min(l2b), l2a.max(l2b));
                    if seen.insert(key) {
                        out.push(key);
                    }
                }
            }
        }
        Ok(out)
    }
}

/// All raw adjacency cells at a node (used by the local graph builder,
/// which needs both endpoints and weights rather than deduplicated edges).
pub(crate) fn raw_edges_of<S: VersionedStore + ?Sized>(store: &S, node: NodeId) -> Vec<Cell> {
    store
        .read_row(node, &[Column::AtomicEdge], u64::MAX)
        .into_iter()
        .flat_map(|(_, cells)| cells)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ids::{mint, ChunkCoord},
        store::{memstore::MemStore, WriteRow},
    };

    fn link(store: &MemStore, child: NodeId, parent: NodeId, ts: u64) {
        store
            .write_rows(vec![WriteRow::new(child, Column::Parent, CellValue::Parent(parent), ts)], 0)
            .unwrap();
        let mut children = store
            .read_row(parent, &[Column::Child], ts)
            .remove(0)
            .1
            .into_iter()
            .next()
            .map(|c| match c.value {
                CellValue::Children(v) => v,
                _ => Vec::new(),
            })
            .unwrap_or_default();
        children.push(child);
        store
            .write_rows(
                vec![WriteRow::new(parent, Column::Child, CellValue::Children(children), ts)],
                ts,
            )
            .unwrap();
    }

    #[test]
    fn root_of_walks_to_top_layer() {
        let store = MemStore::new();
        let chunk = ChunkCoord::new(0, 0, 0);
        let sv = mint(1, chunk, 1).unwrap();
        let l2 = mint(2, chunk, 1).unwrap();
        let root = mint(3, chunk, 1).unwrap();
        link(&store, sv, l2, 1);
        link(&store, l2, root, 1);

        let reader = HierarchyReader::new(&store, 3);
        assert_eq!(reader.root_of(sv, 1, None).unwrap(), root);
        assert_eq!(reader.root_of(sv, 1, Some(2)).unwrap(), l2);
    }

    #[test]
    fn root_of_missing_node_is_not_found() {
        let store = MemStore::new();
        let reader = HierarchyReader::new(&store, 3);
        let sv = mint(1, ChunkCoord::new(0, 0, 0), 1).unwrap();
        assert!(matches!(
            reader.root_of(sv, 1, None).unwrap_err().kind(),
            ErrorKind::NotFound
        ));
    }

    #[test]
    fn children_of_layer1_is_always_empty() {
        let store = MemStore::new();
        let reader = HierarchyReader::new(&store, 3);
        let sv = mint(1, ChunkCoord::new(0, 0, 0), 1).unwrap();
        assert!(reader.children_of(sv, 1).is_empty());
    }

    #[test]
    fn subgraph_nodes_prunes_outside_bbox() {
        let store = MemStore::new();
        let near = mint(2, ChunkCoord::new(0, 0, 0), 1).unwrap();
        let far = mint(2, ChunkCoord::new(100, 100, 100), 1).unwrap();
        let root = mint(3, ChunkCoord::new(0, 0, 0), 1).unwrap();
        link(&store, near, root, 1);
        link(&store, far, root, 1);

        let reader = HierarchyReader::new(&store, 3);
        let bbox = BBox::new(0, 10, 0, 10, 0, 10);
        let SubgraphNodes::ByLayer(map) =
            reader.subgraph_nodes(root, 1, Some(bbox), Some(&[2]))
        else {
            panic!("expected ByLayer");
        };
        assert_eq!(map.get(&2), Some(&vec![near]));
    }

    fn edge(store: &MemStore, a: NodeId, b: NodeId) {
        store
            .write_rows(
                vec![
                    WriteRow::new(a, Column::AtomicEdge, CellValue::Edge { peer: b, affinity: 1.0 }, 0),
                    WriteRow::new(b, Column::AtomicEdge, CellValue::Edge { peer: a, affinity: 1.0 }, 0),
                ],
                0,
            )
            .unwrap();
    }

    #[test]
    fn l2_chunk_children_groups_by_l2_parent() {
        let store = MemStore::new();
        let chunk = ChunkCoord::new(0, 0, 0);
        let root = mint(3, chunk, 1).unwrap();
        let l2a = mint(2, chunk, 1).unwrap();
        let l2b = mint(2, chunk, 2).unwrap();
        let sv_a = mint(1, chunk, 1).unwrap();
        let sv_b = mint(1, chunk, 2).unwrap();
        link(&store, sv_a, l2a, 1);
        link(&store, sv_b, l2b, 1);
        link(&store, l2a, root, 1);
        link(&store, l2b, root, 1);

        let reader = HierarchyReader::new(&store, 3);
        let map = reader.l2_chunk_children(chunk, 1);
        assert_eq!(map.len(), 2);
        assert_eq!(map[&l2a], vec![sv_a]);
        assert_eq!(map[&l2b], vec![sv_b]);
    }

    #[test]
    fn find_path_returns_shortest_hop_chain() {
        let store = MemStore::new();
        let chunk = ChunkCoord::new(0, 0, 0);
        let root = mint(3, chunk, 1).unwrap();
        let l2 = mint(2, chunk, 1).unwrap();
        let a = mint(1, chunk, 1).unwrap();
        let b = mint(1, chunk, 2).unwrap();
        let c = mint(1, chunk, 3).unwrap();
        link(&store, a, l2, 1);
        link(&store, b, l2, 1);
        link(&store, c, l2, 1);
        link(&store, l2, root, 1);
        edge(&store, a, b);
        edge(&store, b, c);

        let reader = HierarchyReader::new(&store, 3);
        assert_eq!(reader.find_path(a, c, 1).unwrap(), vec![a, b, c]);
    }

    #[test]
    fn find_path_errs_when_endpoints_share_no_root() {
        let store = MemStore::new();
        let root_a = mint(3, ChunkCoord::new(0, 0, 0), 1).unwrap();
        let l2_a = mint(2, ChunkCoord::new(0, 0, 0), 1).unwrap();
        let a = mint(1, ChunkCoord::new(0, 0, 0), 1).unwrap();
        link(&store, a, l2_a, 1);
        link(&store, l2_a, root_a, 1);

        let root_b = mint(3, ChunkCoord::new(9, 9, 9), 1).unwrap();
        let l2_b = mint(2, ChunkCoord::new(9, 9, 9), 1).unwrap();
        let b = mint(1, ChunkCoord::new(9, 9, 9), 1).unwrap();
        link(&store, b, l2_b, 1);
        link(&store, l2_b, root_b, 1);

        let reader = HierarchyReader::new(&store, 3);
        assert!(reader.find_path(a, b, 1).is_err());
    }

    #[test]
    fn layer2_graph_links_l2_parents_of_connected_leaves() {
        let store = MemStore::new();
        let chunk_a = ChunkCoord::new(0, 0, 0);
        let chunk_b = ChunkCoord::new(1, 0, 0);
        let root = mint(3, chunk_a, 1).unwrap();
        let l2a = mint(2, chunk_a, 1).unwrap();
        let l2b = mint(2, chunk_b, 1).unwrap();
        let a = mint(1, chunk_a, 1).unwrap();
        let b = mint(1, chunk_b, 1).unwrap();
        link(&store, a, l2a, 1);
        link(&store, b, l2b, 1);
        link(&store, l2a, root, 1);
        link(&store, l2b, root, 1);
        edge(&store, a, b);

        let reader = HierarchyReader::new(&store, 3);
        let edges = reader.layer2_graph(root, 1).unwrap();
        assert_eq!(edges, vec![(l2a.min(l2b), l2a.max(l2b))]);
    }
}
