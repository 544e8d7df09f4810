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

//! The operation log entry (spec.md §3 "Operation log entry").

use crate::ids::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Merge,
    Split,
    Undo,
    Redo,
}

/// Inputs recorded for an operation: the caller-supplied edges/terminals
/// that drove it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationInputs {
    pub added_edges: Vec<(NodeId, NodeId)>,
    pub removed_edges: Vec<(NodeId, NodeId)>,
    pub sources: Vec<NodeId>,
    pub sinks: Vec<NodeId>,
    pub used_mincut: bool,
}

/// Outputs of an operation: what it produced, used to answer lineage and
/// remesh queries without replaying the edit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationOutputs {
    pub old_root_ids: Vec<NodeId>,
    pub new_root_ids: Vec<NodeId>,
    pub new_lvl2_ids: Vec<NodeId>,
}

/// Linkage to another operation: what an undo/redo refers back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoRedoLink {
    pub target_operation_id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationLogEntry {
    pub operation_id: u64,
    pub user_id: String,
    pub timestamp: u64,
    pub kind: OperationKind,
    pub inputs: OperationInputs,
    pub outputs: OperationOutputs,
    pub linkage: Option<UndoRedoLink>,
}

impl OperationLogEntry {
    /// Every root this operation's output or input ever touched, used by
    /// lineage queries (spec.md §8 "Lineage closure").
    pub fn touches_root(&self, root: NodeId) -> bool {
        self.outputs.old_root_ids.contains(&root) || self.outputs.new_root_ids.contains(&root)
    }
}

/// Whether `operation_id` is currently undone, derived from the log rather
/// than tracked as mutable state: the store is append-only, so this is
/// whichever of `operation_id`'s `Undo`/`Redo` entries was logged most
/// recently (by operation_id, which is globally monotonic — spec.md §8.7).
/// A `redo` after an `undo` flips this back to `false`, so a later `undo`
/// is legal again and a further `redo` is not (spec.md §8.3 round-trip).
pub fn is_undone(entries: &[OperationLogEntry], operation_id: u64) -> bool {
    entries
        .iter()
        .filter(|e| {
            matches!(e.kind, OperationKind::Undo | OperationKind::Redo)
                && e.linkage
                    .map_or(false, |l| l.target_operation_id == operation_id)
        })
        .max_by_key(|e| e.operation_id)
        .map_or(false, |e| matches!(e.kind, OperationKind::Undo))
}
