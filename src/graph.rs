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

//! # Local graph builder (spec.md §4.4)
//!
//! For a root at a timestamp, materializes a weighted atomic edge list
//! within a bounding box. Cross-chunk edges are present with `+∞` weight.

use crate::{
    bbox::BBox,
    hierarchy::{self, HierarchyReader, SubgraphNodes},
    ids::{Layer, NodeId},
    store::{CellValue, VersionedStore},
};
use std::collections::HashSet;

/// Safety margin added around the caller-supplied bbox before collecting
/// edges, so that edges crossing just outside the requested region are not
/// silently dropped.
pub const DEFAULT_SAFETY_MARGIN: (u32, u32, u32) = (1, 1, 1);

pub struct LocalGraphBuilder<'s, S: VersionedStore + ?Sized> {
    store: &'s S,
    num_layers: Layer,
}

impl<'s, S: VersionedStore + ?Sized> LocalGraphBuilder<'s, S> {
    pub fn new(store: &'s S, num_layers: Layer) -> Self {
        Self { store, num_layers }
    }

    /// Collect `(edges, affinities)` for every atomic edge with at least
    /// one endpoint inside `bbox` (expanded by `margin`) and reachable from
    /// `root`.
    pub fn build(
        &self,
        root: NodeId,
        at_time: u64,
        bbox: BBox,
        margin: (u32, u32, u32),
    ) -> (Vec<(NodeId, NodeId)>, Vec<f32>) {
        let reader = HierarchyReader::new(self.store, self.num_layers);
        let expanded = bbox.expand(margin);
        let SubgraphNodes::Flat(leaves) = reader.subgraph_nodes(root, at_time, Some(expanded), None)
        else {
            unreachable!("subgraph_nodes(None) always returns Flat")
        };

        let mut seen: HashSet<(NodeId, NodeId)> = HashSet::new();
        let mut edges = Vec::new();
        let mut affs = Vec::new();
        for leaf in leaves {
            for cell in hierarchy::raw_edges_of(self.store, leaf) {
                if let CellValue::Edge { peer, affinity } = cell.value {
                    let key = (leaf.min(peer), leaf.max(peer));
                    if seen.insert(key) {
                        edges.push(key);
                        affs.push(affinity);
                    }
                }
            }
        }
        (edges, affs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ids::{mint, ChunkCoord},
        store::{memstore::MemStore, Column, WriteRow},
    };

    fn atomic_edge(store: &MemStore, a: NodeId, b: NodeId, affinity: f32) {
        store
            .write_rows(
                vec![
                    WriteRow::new(a, Column::AtomicEdge, CellValue::Edge { peer: b, affinity }, 0),
                    WriteRow::new(b, Column::AtomicEdge, CellValue::Edge { peer: a, affinity }, 0),
                ],
                0,
            )
            .unwrap();
    }

    fn link(store: &MemStore, child: NodeId, parent: NodeId) {
        store
            .write_rows(vec![WriteRow::new(child, Column::Parent, CellValue::Parent(parent), 1)], 0)
            .unwrap();
        store
            .write_rows(
                vec![WriteRow::new(parent, Column::Child, CellValue::Children(vec![child]), 1)],
                1,
            )
            .unwrap();
    }

    #[test]
    fn build_collects_edges_within_bbox() {
        let store = MemStore::new();
        let chunk = ChunkCoord::new(0, 0, 0);
        let a = mint(1, chunk, 1).unwrap();
        let b = mint(1, chunk, 2).unwrap();
        let root = mint(2, chunk, 1).unwrap();
        link(&store, a, root);
        link(&store, b, root);
        atomic_edge(&store, a, b, 5.0);

        let builder = LocalGraphBuilder::new(&store, 2);
        let bbox = BBox::new(0, 5, 0, 5, 0, 5);
        let (edges, affs) = builder.build(root, 1, bbox, (0, 0, 0));
        assert_eq!(edges, vec![(a.min(b), a.max(b))]);
        assert_eq!(affs, vec![5.0]);
    }

    #[test]
    fn build_marks_cross_chunk_edges_as_infinite() {
        let store = MemStore::new();
        let chunk_a = ChunkCoord::new(0, 0, 0);
        let chunk_b = ChunkCoord::new(1, 0, 0);
        let a = mint(1, chunk_a, 1).unwrap();
        let b = mint(1, chunk_b, 1).unwrap();
        let root = mint(2, chunk_a, 1).unwrap();
        link(&store, a, root);
        link(&store, b, root);
        atomic_edge(&store, a, b, f32::INFINITY);

        let builder = LocalGraphBuilder::new(&store, 2);
        let bbox = BBox::new(0, 5, 0, 5, 0, 5);
        let (edges, affs) = builder.build(root, 1, bbox, (0, 0, 0));
        assert_eq!(edges.len(), 1);
        assert!(affs[0].is_infinite());
    }
}
