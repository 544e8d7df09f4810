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

//! # `ChunkedGraph` facade (spec.md §4.9 / §6)
//!
//! The single entry point an embedder reaches for: every operation named in
//! spec.md §6 as a typed method, delegating to [`EditEngine`],
//! [`HierarchyReader`] and [`HistoryReader`]. Grounded in `Corestore`, the
//! top-level facade wrapping `Memstore` behind the engine's actual
//! read/write paths rather than re-implementing them.
//!
//! No HTTP framing, wire serialization, or auth: those are named as external
//! interfaces in spec.md §1/§6 and stay out of this crate.

use crate::{
    bbox::BBox,
    config::Config,
    edit::{EditEngine, EditResult, SplitPreviewResult},
    error::GraphResult,
    history::{ChangelogRow, DeltaRoots, HistoryReader, LineageEdge, PastFutureMapping},
    hierarchy::{HierarchyReader, SubgraphNodes},
    ids::{ChunkCoord, Layer, NodeId},
    oplog::OperationLogEntry,
    remesh::RemeshHandle,
    store::VersionedStore,
};
use std::collections::HashMap;

/// API versions this facade speaks (spec.md §6 `info`).
pub const API_VERSIONS: [u8; 2] = [0, 1];

#[derive(Debug, Clone, PartialEq)]
pub struct GraphInfo {
    pub table_id: String,
    pub num_layers: Layer,
    pub api_versions: Vec<u8>,
}

/// `l2_chunk_children`'s result shape: either a flat array of layer-1 IDs
/// (`as_array = true`) or the per-layer-2-parent mapping (spec.md §6
/// `l2_chunk_children(table, chunk_id, as_array?)`).
#[derive(Debug, Clone, PartialEq)]
pub enum L2ChunkChildren {
    Flat(Vec<NodeId>),
    ByParent(HashMap<NodeId, Vec<NodeId>>),
}

/// One decoded attribute of `operation_details` (spec.md §9 "Reflection/
/// attribute decoding"): either an ID array or a scalar passthrough.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationAttr {
    Ids(Vec<NodeId>),
    Text(String),
    Number(u64),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OperationDetails {
    pub operation_id: u64,
    pub attrs: HashMap<String, OperationAttr>,
}

fn flatten_pairs(pairs: &[(NodeId, NodeId)]) -> Vec<NodeId> {
    pairs.iter().flat_map(|&(a, b)| [a, b]).collect()
}

/// Column-family decode table for `operation_details`, grounded on
/// `original_source/.../common.py::operation_details::parse_attr`: a fixed
/// `(name, decoder)` pair per attribute, ID-bearing columns decoded to
/// `Vec<NodeId>`, everything else passed through as a scalar.
const OPERATION_DETAIL_COLUMNS: &[(&str, fn(&OperationLogEntry) -> OperationAttr)] = &[
    ("added_edges", |e| OperationAttr::Ids(flatten_pairs(&e.inputs.added_edges))),
    ("removed_edges", |e| OperationAttr::Ids(flatten_pairs(&e.inputs.removed_edges))),
    ("roots", |e| {
        OperationAttr::Ids(
            e.outputs
                .old_root_ids
                .iter()
                .chain(e.outputs.new_root_ids.iter())
                .copied()
                .collect(),
        )
    }),
    ("new_lvl2_ids", |e| OperationAttr::Ids(e.outputs.new_lvl2_ids.clone())),
    ("user", |e| OperationAttr::Text(e.user_id.clone())),
    ("timestamp", |e| OperationAttr::Number(e.timestamp)),
];

/// The top-level facade over one table's worth of graph state (spec.md
/// §4.9). Cheap to construct: everything it owns is either a reference or a
/// clone of small, `Clone` configuration.
pub struct ChunkedGraph<'s, S: VersionedStore + ?Sized> {
    store: &'s S,
    num_layers: Layer,
    table_id: String,
    edit: EditEngine<'s, S>,
}

impl<'s, S: VersionedStore + ?Sized> ChunkedGraph<'s, S> {
    pub fn new(
        store: &'s S,
        num_layers: Layer,
        config: Config,
        table_id: impl Into<String>,
        remesh: Option<RemeshHandle>,
    ) -> Self {
        let table_id = table_id.into();
        let edit = EditEngine::new(store, num_layers, config, table_id.clone(), remesh);
        Self { store, num_layers, table_id, edit }
    }

    fn hierarchy(&self) -> HierarchyReader<'_, S> {
        HierarchyReader::new(self.store, self.num_layers)
    }

    fn history(&self) -> HistoryReader<'_, S> {
        HistoryReader::new(self.store)
    }

    // ---- dataset metadata ----------------------------------------------

    pub fn info(&self) -> GraphInfo {
        GraphInfo {
            table_id: self.table_id.clone(),
            num_layers: self.num_layers,
            api_versions: API_VERSIONS.to_vec(),
        }
    }

    // ---- edits (spec.md §4.6, delegated to the edit engine) ------------

    pub async fn merge(
        &self,
        user: &str,
        atomic_edges: &[(NodeId, NodeId)],
        priority: bool,
    ) -> GraphResult<EditResult> {
        self.edit.add_edges(user, atomic_edges, priority).await
    }

    pub async fn split(
        &self,
        user: &str,
        sources: &[NodeId],
        sinks: &[NodeId],
        use_mincut: bool,
        explicit_edges: Option<&[(NodeId, NodeId)]>,
        priority: bool,
    ) -> GraphResult<EditResult> {
        self.edit
            .remove_edges(user, sources, sinks, use_mincut, explicit_edges, priority)
            .await
    }

    pub fn split_preview(
        &self,
        root: NodeId,
        sources: &[NodeId],
        sinks: &[NodeId],
    ) -> GraphResult<SplitPreviewResult> {
        self.edit.split_preview(root, sources, sinks)
    }

    pub async fn undo(&self, user: &str, operation_id: u64) -> GraphResult<EditResult> {
        self.edit.undo(user, operation_id).await
    }

    pub async fn redo(&self, user: &str, operation_id: u64) -> GraphResult<EditResult> {
        self.edit.redo(user, operation_id).await
    }

    pub async fn rollback_user(
        &self,
        actor: &str,
        target_user: &str,
        start_time: u64,
    ) -> Vec<GraphResult<EditResult>> {
        self.edit.rollback_user(actor, target_user, start_time).await
    }

    // ---- hierarchy reads (spec.md §4.3, delegated) ---------------------

    pub fn get_root(
        &self,
        node: NodeId,
        at_time: Option<u64>,
        stop_layer: Option<Layer>,
    ) -> GraphResult<NodeId> {
        let at_time = at_time.unwrap_or_else(|| self.store.now());
        self.hierarchy().root_of(node, at_time, stop_layer)
    }

    pub fn get_roots(
        &self,
        nodes: &[NodeId],
        at_time: Option<u64>,
        assert_roots: bool,
    ) -> GraphResult<Vec<NodeId>> {
        let at_time = at_time.unwrap_or_else(|| self.store.now());
        self.hierarchy().roots_of(nodes, at_time, assert_roots)
    }

    pub fn children_of(&self, node: NodeId, at_time: Option<u64>) -> Vec<NodeId> {
        let at_time = at_time.unwrap_or_else(|| self.store.now());
        self.hierarchy().children_of(node, at_time)
    }

    /// Layer-1 leaves under `root`, optionally pruned to `bbox`.
    pub fn leaves(&self, root: NodeId, at_time: Option<u64>, bbox: Option<BBox>) -> Vec<NodeId> {
        let at_time = at_time.unwrap_or_else(|| self.store.now());
        match self.hierarchy().subgraph_nodes(root, at_time, bbox, None) {
            SubgraphNodes::Flat(leaves) => leaves,
            SubgraphNodes::ByLayer(_) => unreachable!("subgraph_nodes(None) always returns Flat"),
        }
    }

    pub fn subgraph_nodes(
        &self,
        root: NodeId,
        at_time: Option<u64>,
        bbox: Option<BBox>,
        return_layers: Option<&[Layer]>,
    ) -> SubgraphNodes {
        let at_time = at_time.unwrap_or_else(|| self.store.now());
        self.hierarchy().subgraph_nodes(root, at_time, bbox, return_layers)
    }

    pub fn subgraph_edges(
        &self,
        root: NodeId,
        at_time: Option<u64>,
        bbox: Option<BBox>,
    ) -> Vec<(NodeId, NodeId, f32)> {
        let at_time = at_time.unwrap_or_else(|| self.store.now());
        self.hierarchy().subgraph_edges(root, at_time, bbox)
    }

    /// Batched `leaves` (spec.md §6 `leaves_many`).
    pub fn leaves_many(
        &self,
        roots: &[NodeId],
        at_time: Option<u64>,
        bbox: Option<BBox>,
    ) -> HashMap<NodeId, Vec<NodeId>> {
        let at_time = at_time.unwrap_or_else(|| self.store.now());
        roots
            .iter()
            .map(|&root| (root, self.leaves(root, Some(at_time), bbox)))
            .collect()
    }

    /// Every leaf sharing a root with `leaf` (spec.md §6
    /// `leaves_from_leaf`).
    pub fn leaves_from_leaf(
        &self,
        leaf: NodeId,
        at_time: Option<u64>,
        bbox: Option<BBox>,
    ) -> GraphResult<Vec<NodeId>> {
        let at_time = at_time.unwrap_or_else(|| self.store.now());
        let root = self.hierarchy().root_of(leaf, at_time, None)?;
        Ok(self.leaves(root, Some(at_time), bbox))
    }

    /// Every layer-2 node in `chunk`, either flattened to their layer-1
    /// children or grouped by layer-2 parent (spec.md §6
    /// `l2_chunk_children`).
    pub fn l2_chunk_children(
        &self,
        chunk: ChunkCoord,
        at_time: Option<u64>,
        as_array: bool,
    ) -> L2ChunkChildren {
        let at_time = at_time.unwrap_or_else(|| self.store.now());
        let by_parent = self.hierarchy().l2_chunk_children(chunk, at_time);
        if as_array {
            L2ChunkChildren::Flat(by_parent.into_values().flatten().collect())
        } else {
            L2ChunkChildren::ByParent(by_parent)
        }
    }

    /// Shortest path between two supervoxels of the same root over atomic
    /// edges (spec.md §6 `find_path`). `precision_mode` is accepted for
    /// interface compatibility; only the exact leaf-level search is
    /// implemented (see [`HierarchyReader::find_path`]).
    pub fn find_path(
        &self,
        source: NodeId,
        sink: NodeId,
        at_time: Option<u64>,
        _precision_mode: bool,
    ) -> GraphResult<Vec<NodeId>> {
        let at_time = at_time.unwrap_or_else(|| self.store.now());
        self.hierarchy().find_path(source, sink, at_time)
    }

    /// The layer-2-level adjacency graph under `node`'s root (spec.md §6
    /// `layer2_graph`).
    pub fn layer2_graph(
        &self,
        node: NodeId,
        at_time: Option<u64>,
    ) -> GraphResult<Vec<(NodeId, NodeId)>> {
        let at_time = at_time.unwrap_or_else(|| self.store.now());
        self.hierarchy().layer2_graph(node, at_time)
    }

    // ---- history & lineage (spec.md §4.7, delegated) -------------------

    pub fn change_log(&self, start_time: Option<u64>, operation_ids: Option<Vec<u64>>) -> Vec<OperationLogEntry> {
        self.history().read_log_rows(start_time, operation_ids)
    }

    pub fn tabular_changelogs(&self, roots: &[NodeId], filtered: bool) -> HashMap<NodeId, Vec<ChangelogRow>> {
        self.history().tabular_changelogs(roots, filtered)
    }

    pub fn lineage_graph(&self, roots: &[NodeId], past_t: u64, future_t: u64) -> Vec<LineageEdge> {
        self.history().lineage_graph(roots, past_t, future_t)
    }

    pub fn past_future_id_mapping(
        &self,
        roots: &[NodeId],
        past_t: u64,
        future_t: u64,
    ) -> HashMap<NodeId, PastFutureMapping> {
        self.history().past_future_id_mapping(roots, past_t, future_t)
    }

    pub fn last_edit_timestamp(&self, root: NodeId) -> Option<u64> {
        self.history().last_edit_timestamp(root)
    }

    pub fn is_latest_roots(&self, ids: &[NodeId], at_time: u64) -> Vec<bool> {
        self.history().is_latest_roots(ids, at_time)
    }

    pub fn merge_log(&self, root: Option<NodeId>, filtered: bool) -> Vec<OperationLogEntry> {
        self.history().merge_log(root, filtered)
    }

    pub fn tabular_changelogs_recent(
        &self,
        roots: &[NodeId],
        filtered: bool,
        since: u64,
    ) -> HashMap<NodeId, Vec<ChangelogRow>> {
        self.history().tabular_changelogs_recent(roots, filtered, since)
    }

    pub fn oldest_timestamp(&self) -> Option<u64> {
        self.history().oldest_timestamp()
    }

    pub fn root_timestamps(&self, ids: &[NodeId]) -> Vec<Option<u64>> {
        self.history().root_timestamps(ids)
    }

    pub fn delta_roots(&self, root: NodeId, past_t: u64, future_t: u64) -> DeltaRoots {
        self.history().delta_roots(root, past_t, future_t)
    }

    /// Decode the log entries for `operation_ids` into the fixed attribute
    /// schema of spec.md §9. Unknown operation IDs are simply absent from
    /// the result, matching a reflective lookup over rows that don't exist.
    pub fn operation_details(&self, operation_ids: &[u64]) -> Vec<OperationDetails> {
        let entries = self.history().read_log_rows(None, Some(operation_ids.to_vec()));
        entries
            .iter()
            .map(|entry| OperationDetails {
                operation_id: entry.operation_id,
                attrs: OPERATION_DETAIL_COLUMNS
                    .iter()
                    .map(|&(name, decode)| (name.to_owned(), decode(entry)))
                    .collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ids::{mint, ChunkCoord},
        store::{memstore::MemStore, CellValue, Column, WriteRow},
    };

    fn link(store: &MemStore, child: NodeId, parent: NodeId, ts: u64) {
        store
            .write_rows(vec![WriteRow::new(child, Column::Parent, CellValue::Parent(parent), ts)], ts)
            .unwrap();
        store
            .write_rows(
                vec![WriteRow::new(parent, Column::Child, CellValue::Children(vec![child]), ts)],
                ts,
            )
            .unwrap();
    }

    fn fixture() -> (MemStore, NodeId, NodeId) {
        let store = MemStore::new();
        let chunk = ChunkCoord::new(0, 0, 0);
        let sv = mint(1, chunk, 1).unwrap();
        let l2 = mint(2, chunk, 1).unwrap();
        let root = mint(3, chunk, 1).unwrap();
        link(&store, sv, l2, 0);
        link(&store, l2, root, 0);
        (store, sv, root)
    }

    #[test]
    fn info_reports_configured_table_and_api_versions() {
        let store = MemStore::new();
        let graph = ChunkedGraph::new(&store, 3, Config::default(), "segmentation", None);
        let info = graph.info();
        assert_eq!(info.table_id, "segmentation");
        assert_eq!(info.num_layers, 3);
        assert_eq!(info.api_versions, vec![0, 1]);
    }

    #[test]
    fn get_root_delegates_to_hierarchy_reader() {
        let (store, sv, root) = fixture();
        let graph = ChunkedGraph::new(&store, 3, Config::default(), "segmentation", None);
        assert_eq!(graph.get_root(sv, Some(0), None).unwrap(), root);
    }

    #[test]
    fn leaves_returns_layer1_descendants() {
        let (store, sv, root) = fixture();
        let graph = ChunkedGraph::new(&store, 3, Config::default(), "segmentation", None);
        assert_eq!(graph.leaves(root, Some(0), None), vec![sv]);
    }

    #[tokio::test]
    async fn merge_then_operation_details_decodes_edge_and_root_columns() {
        let store = MemStore::new();
        let chunk_a = ChunkCoord::new(0, 0, 0);
        let chunk_b = ChunkCoord::new(1, 0, 0);
        let a = mint(1, chunk_a, 1).unwrap();
        let b = mint(1, chunk_b, 1).unwrap();
        let l2a = mint(2, chunk_a, 1).unwrap();
        let l2b = mint(2, chunk_b, 1).unwrap();
        let root_a = mint(3, chunk_a, 1).unwrap();
        let root_b = mint(3, chunk_b, 1).unwrap();
        link(&store, a, l2a, 0);
        link(&store, l2a, root_a, 0);
        link(&store, b, l2b, 0);
        link(&store, l2b, root_b, 0);

        let graph = ChunkedGraph::new(&store, 3, Config::default(), "segmentation", None);
        let result = graph.merge("alice", &[(a, b)], false).await.unwrap();

        let details = graph.operation_details(&[result.operation_id]);
        assert_eq!(details.len(), 1);
        let attrs = &details[0].attrs;
        assert_eq!(attrs["added_edges"], OperationAttr::Ids(vec![a, b]));
        assert_eq!(attrs["user"], OperationAttr::Text("alice".to_owned()));
        match &attrs["roots"] {
            OperationAttr::Ids(ids) => {
                assert!(ids.contains(&root_a));
                assert!(ids.contains(&root_b));
                assert!(ids.contains(&result.new_root_ids[0]));
            }
            other => panic!("expected Ids, got {other:?}"),
        }
    }

    #[test]
    fn leaves_many_batches_leaves_per_root() {
        let (store, sv, root) = fixture();
        let graph = ChunkedGraph::new(&store, 3, Config::default(), "segmentation", None);
        let out = graph.leaves_many(&[root], Some(0), None);
        assert_eq!(out[&root], vec![sv]);
    }

    #[test]
    fn leaves_from_leaf_resolves_via_root() {
        let (store, sv, _root) = fixture();
        let graph = ChunkedGraph::new(&store, 3, Config::default(), "segmentation", None);
        assert_eq!(graph.leaves_from_leaf(sv, Some(0), None).unwrap(), vec![sv]);
    }

    /// Two single-supervoxel chunks merged into one root, set up the same
    /// way as [`merge_then_operation_details_decodes_edge_and_root_columns`],
    /// for exercising the facade methods that read across a merge.
    fn two_chunk_store() -> (MemStore, NodeId, NodeId, ChunkCoord) {
        let store = MemStore::new();
        let chunk_a = ChunkCoord::new(0, 0, 0);
        let chunk_b = ChunkCoord::new(1, 0, 0);
        let a = mint(1, chunk_a, 1).unwrap();
        let b = mint(1, chunk_b, 1).unwrap();
        let l2a = mint(2, chunk_a, 1).unwrap();
        let l2b = mint(2, chunk_b, 1).unwrap();
        let root_a = mint(3, chunk_a, 1).unwrap();
        let root_b = mint(3, chunk_b, 1).unwrap();
        link(&store, a, l2a, 0);
        link(&store, l2a, root_a, 0);
        link(&store, b, l2b, 0);
        link(&store, l2b, root_b, 0);
        (store, a, b, chunk_a)
    }

    #[tokio::test]
    async fn l2_chunk_children_flattens_or_groups_by_parent() {
        let (store, a, b, chunk_a) = two_chunk_store();
        let graph = ChunkedGraph::new(&store, 3, Config::default(), "segmentation", None);
        graph.merge("alice", &[(a, b)], false).await.unwrap();

        let grouped = graph.l2_chunk_children(chunk_a, None, false);
        match grouped {
            L2ChunkChildren::ByParent(map) => assert_eq!(map.len(), 1),
            other => panic!("expected ByParent, got {other:?}"),
        }
        let flat = graph.l2_chunk_children(chunk_a, None, true);
        match flat {
            L2ChunkChildren::Flat(ids) => assert_eq!(ids, vec![a]),
            other => panic!("expected Flat, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn find_path_connects_merged_leaves() {
        let (store, a, b, _chunk_a) = two_chunk_store();
        let graph = ChunkedGraph::new(&store, 3, Config::default(), "segmentation", None);
        graph.merge("alice", &[(a, b)], false).await.unwrap();
        let path = graph.find_path(a, b, None, false).unwrap();
        assert_eq!(path, vec![a, b]);
    }

    #[test]
    fn find_path_rejects_leaves_without_a_shared_root() {
        let (store, sv, _root) = fixture();
        let other_chunk = ChunkCoord::new(5, 5, 5);
        let other_sv = mint(1, other_chunk, 1).unwrap();
        let other_l2 = mint(2, other_chunk, 1).unwrap();
        let other_root = mint(3, other_chunk, 1).unwrap();
        link(&store, other_sv, other_l2, 0);
        link(&store, other_l2, other_root, 0);
        let graph = ChunkedGraph::new(&store, 3, Config::default(), "segmentation", None);
        assert!(graph.find_path(sv, other_sv, Some(0), false).is_err());
    }

    #[tokio::test]
    async fn layer2_graph_reports_edge_between_distinct_l2_parents() {
        let (store, a, b, _chunk_a) = two_chunk_store();
        let graph = ChunkedGraph::new(&store, 3, Config::default(), "segmentation", None);
        let result = graph.merge("alice", &[(a, b)], false).await.unwrap();
        let root = result.new_root_ids[0];
        let l2a = graph.get_root(a, None, Some(2)).unwrap();
        let l2b = graph.get_root(b, None, Some(2)).unwrap();

        let edges = graph.layer2_graph(root, None).unwrap();
        assert_eq!(edges.len(), 1);
        let (p, q) = edges[0];
        assert_eq!((p.min(q), p.max(q)), (l2a.min(l2b), l2a.max(l2b)));
    }

    #[tokio::test]
    async fn merge_log_and_history_batch_reads_after_a_merge() {
        let (store, a, b, _chunk_a) = two_chunk_store();
        let graph = ChunkedGraph::new(&store, 3, Config::default(), "segmentation", None);
        let result = graph.merge("alice", &[(a, b)], false).await.unwrap();
        let root = result.new_root_ids[0];

        let merges = graph.merge_log(Some(root), false);
        assert_eq!(merges.len(), 1);

        assert!(graph.oldest_timestamp().is_some());

        let ts = graph.root_timestamps(&[root]);
        assert_eq!(ts.len(), 1);
        assert!(ts[0].is_some());

        let recent = graph.tabular_changelogs_recent(&[root], false, 0);
        assert_eq!(recent[&root].len(), 1);

        let delta = graph.delta_roots(root, 0, u64::MAX);
        assert!(delta.added_roots.contains(&root));
    }
}
