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

//! # History & lineage (spec.md §4.7)
//!
//! Read-only queries over the operation log. Grounded in
//! `original_source/.../common.py`'s `change_log`, `tabular_change_logs`,
//! `handle_lineage_graph`, `handle_past_id_mapping`.

use crate::{
    ids::NodeId,
    oplog::{self, OperationKind, OperationLogEntry},
    store::{LogFilter, VersionedStore},
};
use std::collections::{HashMap, HashSet, VecDeque};

pub struct HistoryReader<'s, S: VersionedStore + ?Sized> {
    store: &'s S,
}

/// One row of `tabular_changelogs`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangelogRow {
    pub operation_id: u64,
    pub timestamp: u64,
    pub user_id: String,
    pub kind: OperationKind,
}

/// An edge of `lineage_graph`: root `from` produced root `to` via
/// `operation_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineageEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub operation_id: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PastFutureMapping {
    pub past: HashSet<NodeId>,
    pub future: HashSet<NodeId>,
}

/// Roots gained and lost across a lineage window (spec.md §6
/// `delta_roots`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaRoots {
    pub added_roots: Vec<NodeId>,
    pub removed_roots: Vec<NodeId>,
}

impl<'s, S: VersionedStore + ?Sized> HistoryReader<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// All log entries, ordered by `operation_id` (spec.md §4.7).
    pub fn read_log_rows(
        &self,
        start_time: Option<u64>,
        operation_ids: Option<Vec<u64>>,
    ) -> Vec<OperationLogEntry> {
        self.store.read_log_rows(LogFilter {
            start_time,
            operation_ids,
            user_id: None,
        })
    }

    /// Per-root table of `(operation_id, timestamp, user_id, kind)`.
    pub fn tabular_changelogs(
        &self,
        roots: &[NodeId],
        filtered: bool,
    ) -> HashMap<NodeId, Vec<ChangelogRow>> {
        let entries = self.read_log_rows(None, None);
        let mut out: HashMap<NodeId, Vec<ChangelogRow>> =
            roots.iter().map(|&r| (r, Vec::new())).collect();
        for entry in &entries {
            if filtered && oplog::is_undone(&entries, entry.operation_id) {
                continue;
            }
            for &root in roots {
                if entry.touches_root(root) {
                    out.get_mut(&root).unwrap().push(ChangelogRow {
                        operation_id: entry.operation_id,
                        timestamp: entry.timestamp,
                        user_id: entry.user_id.clone(),
                        kind: entry.kind,
                    });
                }
            }
        }
        out
    }

    /// Max timestamp among operations touching `root`; `None` if `root`
    /// never appears in the log.
    pub fn last_edit_timestamp(&self, root: NodeId) -> Option<u64> {
        self.read_log_rows(None, None)
            .into_iter()
            .filter(|e| e.touches_root(root))
            .map(|e| e.timestamp)
            .max()
    }

    /// A root is "latest" at `at_time` iff no logged operation produced it
    /// as an old root after `at_time` (i.e. it was never superseded).
    pub fn is_latest_roots(&self, ids: &[NodeId], at_time: u64) -> Vec<bool> {
        let entries = self.read_log_rows(None, None);
        ids.iter()
            .map(|&id| {
                !entries.iter().any(|e| {
                    e.timestamp > at_time && e.outputs.old_root_ids.contains(&id)
                })
            })
            .collect()
    }

    /// DAG of root-to-root supersession between `past_t` and `future_t`:
    /// an edge `(A -> B, op)` means operation `op` retired root `A` in
    /// favor of new root `B`.
    pub fn lineage_graph(
        &self,
        roots: &[NodeId],
        past_t: u64,
        future_t: u64,
    ) -> Vec<LineageEdge> {
        let entries = self.read_log_rows(Some(past_t), None);
        let root_set: HashSet<NodeId> = roots.iter().copied().collect();
        let mut edges = Vec::new();
        let mut frontier: HashSet<NodeId> = root_set.clone();
        loop {
            let mut grew = false;
            for entry in &entries {
                if entry.timestamp > future_t {
                    continue;
                }
                let touches_frontier = entry
                    .outputs
                    .old_root_ids
                    .iter()
                    .any(|r| frontier.contains(r));
                if !touches_frontier {
                    continue;
                }
                for &old in &entry.outputs.old_root_ids {
                    if !frontier.contains(&old) {
                        continue;
                    }
                    for &new in &entry.outputs.new_root_ids {
                        let edge = LineageEdge {
                            from: old,
                            to: new,
                            operation_id: entry.operation_id,
                        };
                        if !edges.contains(&edge) {
                            edges.push(edge);
                            if frontier.insert(new) {
                                grew = true;
                            }
                        }
                    }
                }
            }
            if !grew {
                break;
            }
        }
        edges
    }

    /// For each input root, its set of past ancestors (reachable by
    /// walking lineage edges backward) and future descendants (forward),
    /// bounded by `past_t`/`future_t`.
    pub fn past_future_id_mapping(
        &self,
        roots: &[NodeId],
        past_t: u64,
        future_t: u64,
    ) -> HashMap<NodeId, PastFutureMapping> {
        let entries = self.read_log_rows(Some(past_t), None);
        let mut forward: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut backward: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for entry in &entries {
            if entry.timestamp > future_t {
                continue;
            }
            for &old in &entry.outputs.old_root_ids {
                for &new in &entry.outputs.new_root_ids {
                    forward.entry(old).or_default().push(new);
                    backward.entry(new).or_default().push(old);
                }
            }
        }

        let walk = |start: NodeId, adjacency: &HashMap<NodeId, Vec<NodeId>>| -> HashSet<NodeId> {
            let mut visited = HashSet::new();
            let mut queue = VecDeque::from([start]);
            while let Some(node) = queue.pop_front() {
                for &next in adjacency.get(&node).into_iter().flatten() {
                    if visited.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
            visited
        };

        roots
            .iter()
            .map(|&root| {
                (
                    root,
                    PastFutureMapping {
                        past: walk(root, &backward),
                        future: walk(root, &forward),
                    },
                )
            })
            .collect()
    }

    /// `change_log` restricted to merges, optionally to a single root
    /// (spec.md §6 `merge_log(table, root?, filtered?)`).
    pub fn merge_log(&self, root: Option<NodeId>, filtered: bool) -> Vec<OperationLogEntry> {
        let entries = self.read_log_rows(None, None);
        entries
            .iter()
            .filter(|e| matches!(e.kind, OperationKind::Merge))
            .filter(|e| root.map_or(true, |r| e.touches_root(r)))
            .filter(|e| !filtered || !oplog::is_undone(&entries, e.operation_id))
            .cloned()
            .collect()
    }

    /// `tabular_changelogs` restricted to rows at or after `since` (spec.md
    /// §6 `tabular_change_log_recent`).
    pub fn tabular_changelogs_recent(
        &self,
        roots: &[NodeId],
        filtered: bool,
        since: u64,
    ) -> HashMap<NodeId, Vec<ChangelogRow>> {
        let mut table = self.tabular_changelogs(roots, filtered);
        for rows in table.values_mut() {
            rows.retain(|row| row.timestamp >= since);
        }
        table
    }

    /// Earliest timestamp in the whole operation log, or `None` if the
    /// table has never been edited (spec.md §6 `oldest_timestamp`).
    pub fn oldest_timestamp(&self) -> Option<u64> {
        self.read_log_rows(None, None)
            .into_iter()
            .map(|e| e.timestamp)
            .min()
    }

    /// The timestamp each root was minted at: the timestamp of the
    /// operation whose `new_root_ids` contains it. `None` for a root that
    /// was never produced by a logged operation — e.g. the initial
    /// segmentation's roots, minted outside this crate's edit log (spec.md
    /// §6 `root_timestamps`).
    pub fn root_timestamps(&self, ids: &[NodeId]) -> Vec<Option<u64>> {
        let entries = self.read_log_rows(None, None);
        ids.iter()
            .map(|&id| {
                entries
                    .iter()
                    .find(|e| e.outputs.new_root_ids.contains(&id))
                    .map(|e| e.timestamp)
            })
            .collect()
    }

    /// Roots gained and lost along `root`'s lineage between `past_t` and
    /// `future_t` (spec.md §6 `delta_roots`): every root introduced as a
    /// `new_root_ids` entry by an operation touching the lineage (added),
    /// and every root retired as an `old_root_ids` entry (removed).
    pub fn delta_roots(&self, root: NodeId, past_t: u64, future_t: u64) -> DeltaRoots {
        let lineage = &self.past_future_id_mapping(&[root], past_t, future_t)[&root];
        let mut in_scope: HashSet<NodeId> = lineage.past.iter().copied().collect();
        in_scope.extend(lineage.future.iter().copied());
        in_scope.insert(root);

        let entries = self.read_log_rows(Some(past_t), None);
        let mut added = HashSet::new();
        let mut removed = HashSet::new();
        for entry in &entries {
            if entry.timestamp > future_t {
                continue;
            }
            let touches = entry
                .outputs
                .old_root_ids
                .iter()
                .chain(entry.outputs.new_root_ids.iter())
                .any(|r| in_scope.contains(r));
            if !touches {
                continue;
            }
            removed.extend(entry.outputs.old_root_ids.iter().copied());
            added.extend(entry.outputs.new_root_ids.iter().copied());
        }
        // a root both added and later removed within the window is neither
        // a net addition nor a net removal.
        let net_added: Vec<NodeId> = added.difference(&removed).copied().collect();
        let net_removed: Vec<NodeId> = removed.difference(&added).copied().collect();
        DeltaRoots {
            added_roots: net_added,
            removed_roots: net_removed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        oplog::{OperationInputs, OperationOutputs},
        store::memstore::MemStore,
        store::{CellValue, Column, WriteRow},
    };

    fn log_entry(op: u64, ts: u64, old: Vec<NodeId>, new: Vec<NodeId>) -> OperationLogEntry {
        OperationLogEntry {
            operation_id: op,
            user_id: "alice".to_owned(),
            timestamp: ts,
            kind: OperationKind::Merge,
            inputs: OperationInputs::default(),
            outputs: OperationOutputs {
                old_root_ids: old,
                new_root_ids: new,
                new_lvl2_ids: vec![],
            },
            linkage: None,
        }
    }

    fn seed(store: &MemStore, entries: Vec<OperationLogEntry>) {
        for e in entries {
            store
                .write_rows(vec![WriteRow::new(0, Column::OperationLog, CellValue::LogEntry(e), 0)], 0)
                .unwrap();
        }
    }

    #[test]
    fn tabular_changelogs_groups_by_root() {
        let store = MemStore::new();
        seed(&store, vec![log_entry(1, 10, vec![100], vec![200])]);
        let reader = HistoryReader::new(&store);
        let table = reader.tabular_changelogs(&[200], false);
        assert_eq!(table[&200].len(), 1);
        assert_eq!(table[&200][0].operation_id, 1);
    }

    #[test]
    fn last_edit_timestamp_is_max_touching_operation() {
        let store = MemStore::new();
        seed(
            &store,
            vec![
                log_entry(1, 10, vec![100], vec![200]),
                log_entry(2, 20, vec![200], vec![300]),
            ],
        );
        let reader = HistoryReader::new(&store);
        assert_eq!(reader.last_edit_timestamp(200), Some(20));
        assert_eq!(reader.last_edit_timestamp(999), None);
    }

    /// Lineage closure (spec.md §8): every root reachable via chained
    /// supersession appears in the lineage graph.
    #[test]
    fn lineage_graph_follows_chained_supersession() {
        let store = MemStore::new();
        seed(
            &store,
            vec![
                log_entry(1, 10, vec![100], vec![200]),
                log_entry(2, 20, vec![200], vec![300]),
            ],
        );
        let reader = HistoryReader::new(&store);
        let edges = reader.lineage_graph(&[100], 0, u64::MAX);
        assert_eq!(edges.len(), 2);
        assert!(edges.contains(&LineageEdge { from: 100, to: 200, operation_id: 1 }));
        assert!(edges.contains(&LineageEdge { from: 200, to: 300, operation_id: 2 }));
    }

    #[test]
    fn past_future_id_mapping_walks_both_directions() {
        let store = MemStore::new();
        seed(
            &store,
            vec![
                log_entry(1, 10, vec![100], vec![200]),
                log_entry(2, 20, vec![200], vec![300]),
            ],
        );
        let reader = HistoryReader::new(&store);
        let mapping = reader.past_future_id_mapping(&[200], 0, u64::MAX);
        assert_eq!(mapping[&200].past, HashSet::from([100]));
        assert_eq!(mapping[&200].future, HashSet::from([300]));
    }

    #[test]
    fn is_latest_roots_detects_superseded_root() {
        let store = MemStore::new();
        seed(&store, vec![log_entry(1, 10, vec![100], vec![200])]);
        let reader = HistoryReader::new(&store);
        assert_eq!(reader.is_latest_roots(&[100, 200], 20), vec![false, true]);
    }

    fn split_entry(op: u64, ts: u64, old: Vec<NodeId>, new: Vec<NodeId>) -> OperationLogEntry {
        let mut e = log_entry(op, ts, old, new);
        e.kind = OperationKind::Split;
        e
    }

    #[test]
    fn merge_log_excludes_splits() {
        let store = MemStore::new();
        seed(
            &store,
            vec![
                log_entry(1, 10, vec![100], vec![200]),
                split_entry(2, 20, vec![200], vec![300, 301]),
            ],
        );
        let reader = HistoryReader::new(&store);
        let merges = reader.merge_log(None, false);
        assert_eq!(merges.len(), 1);
        assert_eq!(merges[0].operation_id, 1);
    }

    #[test]
    fn oldest_timestamp_is_minimum_over_the_log() {
        let store = MemStore::new();
        seed(
            &store,
            vec![
                log_entry(1, 50, vec![100], vec![200]),
                log_entry(2, 10, vec![200], vec![300]),
            ],
        );
        let reader = HistoryReader::new(&store);
        assert_eq!(reader.oldest_timestamp(), Some(10));
    }

    #[test]
    fn root_timestamps_reports_mint_time_or_none() {
        let store = MemStore::new();
        seed(&store, vec![log_entry(1, 10, vec![100], vec![200])]);
        let reader = HistoryReader::new(&store);
        assert_eq!(reader.root_timestamps(&[200, 999]), vec![Some(10), None]);
    }

    #[test]
    fn delta_roots_reports_net_additions_and_removals() {
        let store = MemStore::new();
        seed(
            &store,
            vec![
                log_entry(1, 10, vec![100], vec![200]),
                log_entry(2, 20, vec![200], vec![300]),
            ],
        );
        let reader = HistoryReader::new(&store);
        let delta = reader.delta_roots(100, 0, u64::MAX);
        assert_eq!(delta.added_roots, vec![300]);
        assert_eq!(delta.removed_roots, vec![100]);
    }
}
