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

//! # Edit engine (spec.md §4.6)
//!
//! `add_edges`/`remove_edges`/`undo`/`redo`/`rollback_user`, each driving
//! the `Idle → Resolve → LockAcquire → Mutate → Persist → Emit` state
//! machine. Grounded in `corestore::create_table`'s explicit phase handling
//! (acquire global lock, mutate, release), generalized here to per-root
//! leases plus a `Conflict` retry budget.

use crate::{
    bbox::BBox,
    config::Config,
    error::{Error, ErrorKind, GraphResult},
    graph::{self, LocalGraphBuilder},
    hierarchy::{self, HierarchyReader},
    ids::{self, ChunkCoord, Layer, NodeId},
    mincut::{self, LocalGraph},
    oplog::{self, OperationInputs, OperationKind, OperationLogEntry, OperationOutputs, UndoRedoLink},
    remesh::{RemeshHandle, RemeshPayload, RemeshPriority},
    store::{CellValue, Column, Lease, LogFilter, VersionedStore, WriteRow},
};
use std::collections::{HashMap, HashSet, VecDeque};

/// Internal phases of a single edit attempt (spec.md §4.6 state diagram).
/// Tracked only for `log::debug!` tracing; a failed attempt always leaves
/// the store untouched past whichever phase it aborted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditState {
    Resolve,
    LockAcquire,
    Mutate,
    Persist,
    Emit,
}

fn trace(op: &str, state: EditState) {
    log::debug!("{op}: entering {state:?}");
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditResult {
    pub operation_id: u64,
    pub old_root_ids: Vec<NodeId>,
    pub new_root_ids: Vec<NodeId>,
    pub new_lvl2_ids: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitPreviewResult {
    pub components: Vec<Vec<NodeId>>,
    pub illegal_split: bool,
}

pub struct EditEngine<'s, S: VersionedStore + ?Sized> {
    store: &'s S,
    num_layers: Layer,
    config: Config,
    table_id: String,
    /// Identifies this engine instance as a lock holder, distinct from
    /// `table_id`: several engine instances (workers, processes) may serve
    /// the same table concurrently, and a lease's `holder` should name the
    /// instance that took it, not the table it acts on.
    holder_id: String,
    remesh: Option<RemeshHandle>,
}

impl<'s, S: VersionedStore + ?Sized> EditEngine<'s, S> {
    pub fn new(
        store: &'s S,
        num_layers: Layer,
        config: Config,
        table_id: impl Into<String>,
        remesh: Option<RemeshHandle>,
    ) -> Self {
        let table_id = table_id.into();
        let holder_id = format!("{table_id}:{}", uuid::Uuid::new_v4());
        Self {
            store,
            num_layers,
            config,
            table_id,
            holder_id,
            remesh,
        }
    }

    // ---- public operations --------------------------------------------

    /// Merge: asserts a new identity-fusion edge between two supervoxels
    /// (spec.md §4.6 `add_edges`).
    pub async fn add_edges(
        &self,
        user: &str,
        edges: &[(NodeId, NodeId)],
        priority: bool,
    ) -> GraphResult<EditResult> {
        if edges.is_empty() {
            return Err(Error::bad_request("add_edges requires at least one atomic edge"));
        }
        for &(a, b) in edges {
            if a == b {
                return Err(Error::bad_request("cannot merge a supervoxel with itself"));
            }
            let da = ids::chunk_coord(a);
            let db = ids::chunk_coord(b);
            if da.chebyshev_distance(&db) > 3 {
                return Err(Error::bad_request(
                    "merge endpoints exceed the Chebyshev distance limit of 3",
                ));
            }
        }
        self.with_retry(|| self.try_add_edges(user, edges, priority)).await
    }

    /// Split: removes atomic edges, either supplied directly or computed by
    /// the mincut engine from `sources`/`sinks` (spec.md §4.6
    /// `remove_edges`).
    pub async fn remove_edges(
        &self,
        user: &str,
        sources: &[NodeId],
        sinks: &[NodeId],
        use_mincut: bool,
        explicit_edges: Option<&[(NodeId, NodeId)]>,
        priority: bool,
    ) -> GraphResult<EditResult> {
        if sources.is_empty() || sinks.is_empty() {
            return Err(Error::bad_request(
                "remove_edges requires at least one source and one sink",
            ));
        }
        if sources.iter().any(|s| sinks.contains(s)) {
            return Err(Error::bad_request(
                "a supervoxel cannot be both a source and a sink",
            ));
        }
        self.with_retry(|| {
            self.try_remove_edges(user, sources, sinks, use_mincut, explicit_edges, priority)
        })
        .await
    }

    /// Read-only preview of a split: no locks, no log entry, no mutation.
    pub fn split_preview(
        &self,
        root: NodeId,
        sources: &[NodeId],
        sinks: &[NodeId],
    ) -> GraphResult<SplitPreviewResult> {
        let at_time = self.store.now();
        let bbox = BBox::around(ids::chunk_coord(root), crate::bbox::SPLIT_PREVIEW_MARGIN);
        let builder = LocalGraphBuilder::new(self.store, self.num_layers);
        let (edges, affinities) = builder.build(root, at_time, bbox, graph::DEFAULT_SAFETY_MARGIN);
        let local = LocalGraph { edges, affinities };

        match mincut::mincut(&local, sources, sinks) {
            Ok(cut) if !cut.is_empty() => {
                let universe: HashSet<NodeId> = local
                    .edges
                    .iter()
                    .flat_map(|&(a, b)| [a, b])
                    .chain(sources.iter().copied())
                    .chain(sinks.iter().copied())
                    .collect();
                let cut_set: HashSet<(NodeId, NodeId)> = cut.into_iter().collect();
                let components = connected_components(&universe, &local.edges, &cut_set);
                Ok(SplitPreviewResult {
                    components,
                    illegal_split: false,
                })
            }
            Ok(_) => Ok(SplitPreviewResult {
                components: Vec::new(),
                illegal_split: true,
            }),
            Err(e) if matches!(e.kind(), ErrorKind::BadRequest(_) | ErrorKind::PreconditionError(_)) => {
                Ok(SplitPreviewResult {
                    components: Vec::new(),
                    illegal_split: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn undo(&self, user: &str, operation_id: u64) -> GraphResult<EditResult> {
        if self.config.is_undo_redo_denied(&self.table_id) {
            return Err(Error::bad_request(format!(
                "undo/redo is disabled for table `{}`",
                self.table_id
            )));
        }
        self.with_retry(|| self.try_undo_redo(user, operation_id, false))
            .await
    }

    pub async fn redo(&self, user: &str, operation_id: u64) -> GraphResult<EditResult> {
        if self.config.is_undo_redo_denied(&self.table_id) {
            return Err(Error::bad_request(format!(
                "undo/redo is disabled for table `{}`",
                self.table_id
            )));
        }
        self.with_retry(|| self.try_undo_redo(user, operation_id, true))
            .await
    }

    /// Undo every operation by `target_user` since `start_time`, most
    /// recent first. An individual failure is recorded but does not abort
    /// the remaining rollbacks (spec.md §4.6).
    pub async fn rollback_user(
        &self,
        actor: &str,
        target_user: &str,
        start_time: u64,
    ) -> Vec<GraphResult<EditResult>> {
        if self.config.is_undo_redo_denied(&self.table_id) {
            return vec![Err(Error::bad_request(format!(
                "undo/redo is disabled for table `{}`",
                self.table_id
            )))];
        }
        let mut entries = self.store.read_log_rows(LogFilter {
            start_time: Some(start_time),
            operation_ids: None,
            user_id: Some(target_user.to_owned()),
        });
        entries.sort_by_key(|e| std::cmp::Reverse(e.timestamp));

        let all_entries = self.store.read_log_rows(LogFilter::default());
        let mut results = Vec::new();
        for entry in entries {
            if matches!(entry.kind, OperationKind::Undo | OperationKind::Redo) {
                continue;
            }
            if oplog::is_undone(&all_entries, entry.operation_id) {
                continue;
            }
            results.push(
                self.with_retry(|| self.try_undo_redo(actor, entry.operation_id, false))
                    .await,
            );
        }
        results
    }

    // ---- attempt bodies (one full Resolve..Persist pass) ---------------

    fn try_add_edges(
        &self,
        user: &str,
        edges: &[(NodeId, NodeId)],
        priority: bool,
    ) -> GraphResult<EditResult> {
        trace("add_edges", EditState::Resolve);
        let at_time = self.store.now();
        let reader = HierarchyReader::new(self.store, self.num_layers);
        let touched: Vec<NodeId> = edges.iter().flat_map(|&(a, b)| [a, b]).collect();
        let mut old_roots = reader.roots_of(&touched, at_time, true)?;
        old_roots.sort_unstable();
        old_roots.dedup();

        trace("add_edges", EditState::LockAcquire);
        let leases = self.acquire_locks(&old_roots)?;

        trace("add_edges", EditState::Mutate);
        let outcome = (|| -> GraphResult<EditResult> {
            let (group_members, retired_seed) = self.carry_forward_members(&reader, &touched, at_time)?;

            trace("add_edges", EditState::Persist);
            let operation_id = self.store.alloc_operation_id();
            let mut new_lvl2_ids = Vec::new();
            let new_root =
                self.remint_chain(vec![group_members], retired_seed, at_time, &mut new_lvl2_ids)?[0];

            self.write_atomic_edges(edges, at_time)?;
            let outputs = OperationOutputs {
                old_root_ids: old_roots.clone(),
                new_root_ids: vec![new_root],
                new_lvl2_ids,
            };
            if outputs.new_root_ids.is_empty() {
                return Err(Error::new(ErrorKind::Postcondition));
            }
            let entry = OperationLogEntry {
                operation_id,
                user_id: user.to_owned(),
                timestamp: at_time,
                kind: OperationKind::Merge,
                inputs: OperationInputs {
                    added_edges: edges.to_vec(),
                    removed_edges: Vec::new(),
                    sources: Vec::new(),
                    sinks: Vec::new(),
                    used_mincut: false,
                },
                outputs: outputs.clone(),
                linkage: None,
            };
            self.write_log_entry(entry)?;
            Ok(EditResult {
                operation_id,
                old_root_ids: outputs.old_root_ids,
                new_root_ids: outputs.new_root_ids,
                new_lvl2_ids: outputs.new_lvl2_ids,
            })
        })();

        self.release_locks(leases);
        let result = outcome?;
        trace("add_edges", EditState::Emit);
        self.emit(&result, user, priority);
        Ok(result)
    }

    fn try_remove_edges(
        &self,
        user: &str,
        sources: &[NodeId],
        sinks: &[NodeId],
        use_mincut: bool,
        explicit_edges: Option<&[(NodeId, NodeId)]>,
        priority: bool,
    ) -> GraphResult<EditResult> {
        trace("remove_edges", EditState::Resolve);
        let at_time = self.store.now();
        let reader = HierarchyReader::new(self.store, self.num_layers);
        let touched: Vec<NodeId> = sources.iter().chain(sinks).copied().collect();
        let mut old_roots = reader.roots_of(&touched, at_time, true)?;
        old_roots.sort_unstable();
        old_roots.dedup();
        if old_roots.len() != 1 {
            return Err(Error::bad_request(
                "sources and sinks must resolve to the same root",
            ));
        }
        let root = old_roots[0];

        let removed_edges = if use_mincut {
            let bbox = BBox::around(ids::chunk_coord(root), crate::bbox::SPLIT_PREVIEW_MARGIN);
            let builder = LocalGraphBuilder::new(self.store, self.num_layers);
            let (edges, affinities) = builder.build(root, at_time, bbox, graph::DEFAULT_SAFETY_MARGIN);
            let local = LocalGraph { edges, affinities };
            let cut = mincut::mincut(&local, sources, sinks)?;
            if cut.is_empty() {
                return Err(Error::precondition("mincut produced an empty cut (illegal split)"));
            }
            cut
        } else {
            let edges = explicit_edges.ok_or_else(|| {
                Error::bad_request("remove_edges without mincut requires explicit edges")
            })?;
            if edges.is_empty() {
                return Err(Error::bad_request("no edges supplied to remove"));
            }
            edges.to_vec()
        };

        trace("remove_edges", EditState::LockAcquire);
        let leases = self.acquire_locks(&old_roots)?;

        trace("remove_edges", EditState::Mutate);
        let outcome = (|| -> GraphResult<EditResult> {
            let (groups, retired_seed) = self.split_members(&reader, &removed_edges, at_time)?;
            if groups.len() < 2 {
                return Err(Error::precondition(
                    "removing these edges did not disconnect any component",
                ));
            }

            trace("remove_edges", EditState::Persist);
            let operation_id = self.store.alloc_operation_id();
            let mut new_lvl2_ids = Vec::new();
            let new_roots = self.remint_chain(groups, retired_seed, at_time, &mut new_lvl2_ids)?;

            let outputs = OperationOutputs {
                old_root_ids: old_roots.clone(),
                new_root_ids: new_roots,
                new_lvl2_ids,
            };
            if outputs.new_root_ids.is_empty() {
                return Err(Error::new(ErrorKind::Postcondition));
            }
            let entry = OperationLogEntry {
                operation_id,
                user_id: user.to_owned(),
                timestamp: at_time,
                kind: OperationKind::Split,
                inputs: OperationInputs {
                    added_edges: Vec::new(),
                    removed_edges: removed_edges.clone(),
                    sources: sources.to_vec(),
                    sinks: sinks.to_vec(),
                    used_mincut: use_mincut,
                },
                outputs: outputs.clone(),
                linkage: None,
            };
            self.write_log_entry(entry)?;
            Ok(EditResult {
                operation_id,
                old_root_ids: outputs.old_root_ids,
                new_root_ids: outputs.new_root_ids,
                new_lvl2_ids: outputs.new_lvl2_ids,
            })
        })();

        self.release_locks(leases);
        let result = outcome?;
        trace("remove_edges", EditState::Emit);
        self.emit(&result, user, priority);
        Ok(result)
    }

    fn try_undo_redo(&self, user: &str, operation_id: u64, is_redo: bool) -> GraphResult<EditResult> {
        let entries = self.store.read_log_rows(LogFilter::default());
        let target = entries
            .iter()
            .find(|e| e.operation_id == operation_id)
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::NotFound))?;

        let already_undone = oplog::is_undone(&entries, operation_id);
        if !is_redo && already_undone {
            return Err(Error::bad_request("operation has already been undone"));
        }
        if is_redo && !already_undone {
            return Err(Error::bad_request("operation has not been undone, nothing to redo"));
        }

        let base_kind = match target.kind {
            OperationKind::Merge | OperationKind::Split => target.kind,
            OperationKind::Undo | OperationKind::Redo => {
                return self.try_undo_redo(
                    user,
                    target
                        .linkage
                        .ok_or_else(|| {
                            Error::new(ErrorKind::Internal("undo/redo entry missing linkage".into()))
                        })?
                        .target_operation_id,
                    !is_redo,
                );
            }
        };

        let result = match (base_kind, is_redo) {
            (OperationKind::Merge, false) => self.try_remove_edges(
                user,
                &[target.inputs.added_edges[0].0],
                &[target.inputs.added_edges[0].1],
                false,
                Some(&target.inputs.added_edges),
                false,
            ),
            (OperationKind::Merge, true) => {
                self.try_add_edges(user, &target.inputs.added_edges, false)
            }
            (OperationKind::Split, false) => {
                self.try_add_edges(user, &target.inputs.removed_edges, false)
            }
            (OperationKind::Split, true) => self.try_remove_edges(
                user,
                &target.inputs.sources,
                &target.inputs.sinks,
                false,
                Some(&target.inputs.removed_edges),
                false,
            ),
            _ => unreachable!("base_kind is always Merge or Split"),
        }?;

        let linked_id = self.store.alloc_operation_id();
        let linked_entry = OperationLogEntry {
            operation_id: linked_id,
            user_id: user.to_owned(),
            timestamp: self.store.now(),
            kind: if is_redo { OperationKind::Redo } else { OperationKind::Undo },
            inputs: OperationInputs::default(),
            outputs: OperationOutputs {
                old_root_ids: result.old_root_ids.clone(),
                new_root_ids: result.new_root_ids.clone(),
                new_lvl2_ids: result.new_lvl2_ids.clone(),
            },
            linkage: Some(UndoRedoLink {
                target_operation_id: operation_id,
            }),
        };
        self.write_log_entry(linked_entry)?;
        Ok(EditResult {
            operation_id: linked_id,
            ..result
        })
    }

    // ---- mutation helpers -----------------------------------------------

    /// Layer-2 membership for a merge: the union of the existing children
    /// of every distinct old layer-2 ancestor of the touched nodes, plus
    /// that set of retired ancestors itself. A merge never removes
    /// anything, so taking the whole union is always correct (spec.md
    /// §4.6 "mint new ... IDs bottom-up to reflect fusion").
    fn carry_forward_members(
        &self,
        reader: &HierarchyReader<'_, S>,
        touched: &[NodeId],
        at_time: u64,
    ) -> GraphResult<(Vec<NodeId>, Vec<NodeId>)> {
        let mut old_layer2_ids: Vec<NodeId> = touched
            .iter()
            .map(|&n| reader.root_of(n, at_time, Some(2)))
            .collect::<GraphResult<Vec<_>>>()?;
        old_layer2_ids.sort_unstable();
        old_layer2_ids.dedup();
        let mut members: HashSet<NodeId> = touched.iter().copied().collect();
        for &l2 in &old_layer2_ids {
            members.extend(reader.children_of(l2, at_time));
        }
        Ok((members.into_iter().collect(), old_layer2_ids))
    }

    /// Layer-2 membership for a split: the exact connected components of
    /// the union of every touched old layer-2 ancestor's children, minus
    /// `removed_edges`, plus that set of retired ancestors.
    fn split_members(
        &self,
        reader: &HierarchyReader<'_, S>,
        removed_edges: &[(NodeId, NodeId)],
        at_time: u64,
    ) -> GraphResult<(Vec<Vec<NodeId>>, Vec<NodeId>)> {
        let touched: Vec<NodeId> = removed_edges.iter().flat_map(|&(a, b)| [a, b]).collect();
        let mut old_layer2_ids: Vec<NodeId> = touched
            .iter()
            .map(|&n| reader.root_of(n, at_time, Some(2)))
            .collect::<GraphResult<Vec<_>>>()?;
        old_layer2_ids.sort_unstable();
        old_layer2_ids.dedup();

        let mut universe: HashSet<NodeId> = HashSet::new();
        for &l2 in &old_layer2_ids {
            universe.extend(reader.children_of(l2, at_time));
        }
        let mut edges: Vec<(NodeId, NodeId)> = Vec::new();
        for &node in &universe {
            for cell in hierarchy::raw_edges_of(self.store, node) {
                if let CellValue::Edge { peer, affinity: _ } = cell.value {
                    if universe.contains(&peer) {
                        edges.push((node.min(peer), node.max(peer)));
                    }
                }
            }
        }
        let excluded: HashSet<(NodeId, NodeId)> = removed_edges
            .iter()
            .map(|&(a, b)| (a.min(b), a.max(b)))
            .collect();
        Ok((connected_components(&universe, &edges, &excluded), old_layer2_ids))
    }

    /// Bottom-up mint from layer 2 through `num_layers`, one chain per
    /// `groups[i]`. Group 0 is the carrier of any untouched siblings at
    /// every layer above 2 (spec.md §9 resolved Open Question: a split's
    /// unrelated/untouched subtrees stay attached to exactly one resulting
    /// chain rather than being duplicated).
    fn remint_chain(
        &self,
        groups: Vec<Vec<NodeId>>,
        retired_seed: Vec<NodeId>,
        at_time: u64,
        new_lvl2_ids: &mut Vec<NodeId>,
    ) -> GraphResult<Vec<NodeId>> {
        let reader = HierarchyReader::new(self.store, self.num_layers);
        let mut current_ids: Vec<NodeId> = Vec::with_capacity(groups.len());
        // old layer-2 ancestors retired by this edit, at the layer below
        // the one about to be minted. The entire set is handed to group 0
        // (the sibling carrier); every other group starts with nothing to
        // retire of its own, since a split only ever divides group 0's old
        // ancestors rather than owning a distinct one per branch.
        let mut retired_per_group: Vec<Vec<NodeId>> = groups
            .iter()
            .enumerate()
            .map(|(i, _)| if i == 0 { retired_seed.clone() } else { Vec::new() })
            .collect();

        for members in &groups {
            let chunk = ids::chunk_coord(members[0]);
            let seq = self.store.alloc_seq(2, chunk);
            let new_id = ids::mint(2, chunk, seq)
                .map_err(|e| Error::new(ErrorKind::Internal(e.to_string())))?;
            self.write_parent_and_children(members, new_id, at_time)?;
            current_ids.push(new_id);
            new_lvl2_ids.push(new_id);
        }

        for layer in 3..=self.num_layers {
            let all_retired_prev: HashSet<NodeId> =
                retired_per_group.iter().flatten().copied().collect();
            let mut next_retired = Vec::with_capacity(groups.len());
            let mut next_ids = Vec::with_capacity(groups.len());
            for (i, &current) in current_ids.iter().enumerate() {
                let mut old_parents_i: Vec<NodeId> = retired_per_group[i]
                    .iter()
                    .filter_map(|&old| reader.parent_of(old, at_time))
                    .collect();
                old_parents_i.sort_unstable();
                old_parents_i.dedup();

                let mut members = vec![current];
                if i == 0 {
                    for &parent in &old_parents_i {
                        for child in reader.children_of(parent, at_time) {
                            if !all_retired_prev.contains(&child) {
                                members.push(child);
                            }
                        }
                    }
                }
                members.sort_unstable();
                members.dedup();

                let chunk = ids::chunk_coord(current);
                let seq = self.store.alloc_seq(layer, chunk);
                let new_id = ids::mint(layer, chunk, seq)
                    .map_err(|e| Error::new(ErrorKind::Internal(e.to_string())))?;
                self.write_parent_and_children(&members, new_id, at_time)?;
                next_ids.push(new_id);
                next_retired.push(old_parents_i);
            }
            current_ids = next_ids;
            retired_per_group = next_retired;
        }

        Ok(current_ids)
    }

    fn write_parent_and_children(&self, members: &[NodeId], new_id: NodeId, at_time: u64) -> GraphResult<()> {
        let mut batch = Vec::with_capacity(members.len() + 1);
        batch.push(WriteRow::new(
            new_id,
            Column::Child,
            CellValue::Children(members.to_vec()),
            at_time,
        ));
        for &member in members {
            batch.push(WriteRow::new(member, Column::Parent, CellValue::Parent(new_id), at_time));
        }
        // precondition = the snapshot time everything above was resolved
        // against, so a write only fails if something raced ahead of us.
        self.store.write_rows(batch, at_time).map_err(Error::from)
    }

    fn write_atomic_edges(&self, edges: &[(NodeId, NodeId)], at_time: u64) -> GraphResult<()> {
        let mut batch = Vec::with_capacity(edges.len() * 2);
        for &(a, b) in edges {
            batch.push(WriteRow::new(
                a,
                Column::AtomicEdge,
                CellValue::Edge { peer: b, affinity: f32::INFINITY },
                0,
            ));
            batch.push(WriteRow::new(
                b,
                Column::AtomicEdge,
                CellValue::Edge { peer: a, affinity: f32::INFINITY },
                0,
            ));
        }
        self.store.write_rows(batch, at_time).map_err(Error::from)
    }

    fn write_log_entry(&self, entry: OperationLogEntry) -> GraphResult<()> {
        self.store
            .write_rows(
                vec![WriteRow::new(0, Column::OperationLog, CellValue::LogEntry(entry), 0)],
                0,
            )
            .map_err(Error::from)
    }

    fn acquire_locks(&self, roots: &[NodeId]) -> GraphResult<Vec<Lease>> {
        let mut acquired = Vec::with_capacity(roots.len());
        for &root in roots {
            match self.store.lock_root(root, &self.holder_id, self.config.lock_ttl) {
                Ok(lease) => acquired.push(lease),
                Err(e) => {
                    for lease in acquired {
                        let _ = self.store.release(lease);
                    }
                    return Err(Error::from(e));
                }
            }
        }
        Ok(acquired)
    }

    fn release_locks(&self, leases: Vec<Lease>) {
        for lease in leases {
            if let Err(e) = self.store.release(lease) {
                log::warn!("failed to release root lock: {e:?}");
            }
        }
    }

    fn emit(&self, result: &EditResult, user: &str, priority: bool) {
        if let Some(handle) = &self.remesh {
            handle.notify(RemeshPayload {
                operation_id: result.operation_id,
                new_lvl2_ids: result.new_lvl2_ids.clone(),
                new_root_ids: result.new_root_ids.clone(),
                table_id: self.table_id.clone(),
                user_id: user.to_owned(),
                remesh_priority: if priority { RemeshPriority::True } else { RemeshPriority::False },
            });
        }
    }

    async fn with_retry<T>(&self, mut attempt: impl FnMut() -> GraphResult<T>) -> GraphResult<T> {
        let budget = self.config.retry_backoff.len() + 1;
        let mut last_err = None;
        for i in 0..budget {
            match attempt() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_conflict() && i + 1 < budget => {
                    log::debug!("store conflict, retrying (attempt {} of {budget})", i + 1);
                    tokio::time::sleep(self.config.retry_backoff[i]).await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::new(ErrorKind::Conflict)))
    }
}

/// Connected components of `universe` under `edges`, excluding `excluded`.
fn connected_components(
    universe: &HashSet<NodeId>,
    edges: &[(NodeId, NodeId)],
    excluded: &HashSet<(NodeId, NodeId)>,
) -> Vec<Vec<NodeId>> {
    let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for &(a, b) in edges {
        let key = (a.min(b), a.max(b));
        if excluded.contains(&key) {
            continue;
        }
        if universe.contains(&a) && universe.contains(&b) {
            adjacency.entry(a).or_default().push(b);
            adjacency.entry(b).or_default().push(a);
        }
    }
    let mut visited = HashSet::new();
    let mut components = Vec::new();
    let mut sorted_universe: Vec<NodeId> = universe.iter().copied().collect();
    sorted_universe.sort_unstable();
    for &start in &sorted_universe {
        if !visited.insert(start) {
            continue;
        }
        let mut component = vec![start];
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for &next in adjacency.get(&node).into_iter().flatten() {
                if visited.insert(next) {
                    component.push(next);
                    queue.push_back(next);
                }
            }
        }
        component.sort_unstable();
        components.push(component);
    }
    components
}
