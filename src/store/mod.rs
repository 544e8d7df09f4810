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

//! # Versioned column store (contract)
//!
//! An append-only column store keyed by node ID and column, with per-cell
//! timestamps enabling historical reads (spec.md §4.2). This module defines
//! the contract as a trait so the hierarchy reader and edit engine are
//! generic over the backend; [`memstore::MemStore`] is the in-process
//! reference implementation used by tests and as the default backend.

pub mod memstore;

use crate::{
    error::StoreError,
    ids::{ChunkCoord, Layer, NodeId},
    oplog::OperationLogEntry,
};
use std::time::Duration;

/// Column families, matching spec.md §6 "Persisted state":
/// `Hierarchy.{Child,Parent,FormerParent}`, `Connectivity.{AtomicEdge}`,
/// `OperationLogs.*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Parent,
    Child,
    FormerParent,
    AtomicEdge,
    OperationLog,
}

/// A single versioned cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub ts: u64,
    pub value: CellValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// `Column::Parent` value at a node.
    Parent(NodeId),
    /// `Column::Child` value at a node: the full child set as of `ts`.
    Children(Vec<NodeId>),
    /// `Column::FormerParent` value: a retired parent, kept for lineage.
    FormerParent(NodeId),
    /// `Column::AtomicEdge` value: one adjacency entry. Atomic edges are
    /// immutable facts of the underlying segmentation (spec.md §3
    /// "Lifecycles"), so these cells are always written at `ts = 0`.
    Edge { peer: NodeId, affinity: f32 },
    /// `Column::OperationLog` value, keyed by `operation_id`.
    LogEntry(OperationLogEntry),
}

#[derive(Debug, Clone)]
pub struct WriteRow {
    pub key: NodeId,
    pub column: Column,
    pub value: CellValue,
    pub ts: u64,
}

impl WriteRow {
    pub fn new(key: NodeId, column: Column, value: CellValue, ts: u64) -> Self {
        Self {
            key,
            column,
            value,
            ts,
        }
    }
}

/// A cooperative lease on a root, acquired via [`VersionedStore::lock_root`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub root: NodeId,
    pub token: u64,
}

/// Filter for [`VersionedStore::read_log_rows`].
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub start_time: Option<u64>,
    pub operation_ids: Option<Vec<u64>>,
    pub user_id: Option<String>,
}

/// The versioned store contract (spec.md §4.2).
///
/// Implementations must be safe to share across worker tasks: the edit
/// engine holds only a shared reference while mutating.
pub trait VersionedStore: Send + Sync {
    /// Latest-first cells for each requested column, restricted to
    /// `ts <= at_time`.
    fn read_row(&self, key: NodeId, columns: &[Column], at_time: u64) -> Vec<(Column, Vec<Cell>)>;

    /// Rows of `column` whose key lies in `chunk` at `layer`, restricted to
    /// `ts <= at_time`.
    fn range_read_chunk(
        &self,
        layer: Layer,
        chunk: ChunkCoord,
        column: Column,
        at_time: u64,
    ) -> Vec<(NodeId, Cell)>;

    /// Write a batch atomically, rejecting the whole batch with
    /// [`StoreError::Conflict`] if any row's latest cell is newer than
    /// `precondition_time` (optimistic concurrency).
    ///
    /// Writes to `Column::OperationLog` are idempotent: re-writing the same
    /// `operation_id` with identical content is a no-op success rather than
    /// a conflict, so replaying an edit under its original `operation_id`
    /// never fails (spec.md §8 "Idempotence of edits").
    fn write_rows(&self, batch: Vec<WriteRow>, precondition_time: u64) -> Result<(), StoreError>;

    fn lock_root(&self, root: NodeId, holder: &str, ttl: Duration) -> Result<Lease, StoreError>;
    fn release(&self, lease: Lease) -> Result<(), StoreError>;
    fn renew(&self, lease: &Lease, ttl: Duration) -> Result<(), StoreError>;

    /// Monotonic, never-reused operation ID allocator.
    fn alloc_operation_id(&self) -> u64;

    /// Persisted per-(layer, chunk) sequence counter used by the ID
    /// builder to mint new IDs (spec.md §4.1).
    fn alloc_seq(&self, layer: Layer, chunk: ChunkCoord) -> u32;

    fn read_log_rows(&self, filter: LogFilter) -> Vec<OperationLogEntry>;

    /// Current wall-clock time in Unix seconds, used for `timestamp = now`
    /// defaults (spec.md §6).
    fn now(&self) -> u64;
}
