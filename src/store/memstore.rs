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

//! In-process reference implementation of [`super::VersionedStore`], backed
//! by `parking_lot::RwLock`-guarded maps. Grounded in `corestore::Corestore`'s
//! pattern of wrapping shared state in `Arc<RwLock<_>>` and a single
//! cooperative flush lock (`registry::lock_flush_state`), generalized here
//! to a per-root lease table.

use super::{Cell, CellValue, Column, Lease, LogFilter, VersionedStore, WriteRow};
use crate::{
    error::StoreError,
    ids::{ChunkCoord, Layer, NodeId},
    oplog::OperationLogEntry,
};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

struct LockState {
    token: u64,
    holder: String,
    expires_at: Instant,
}

#[derive(Default)]
pub struct MemStore {
    rows: RwLock<HashMap<(NodeId, Column), Vec<Cell>>>,
    op_log: RwLock<Vec<OperationLogEntry>>,
    op_id_counter: AtomicU64,
    lock_token_counter: AtomicU64,
    locks: RwLock<HashMap<NodeId, LockState>>,
    seq_counters: RwLock<HashMap<(Layer, ChunkCoord), u32>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_cell(&self, key: NodeId, column: Column, cell: Cell) {
        let mut rows = self.rows.write();
        let entry = rows.entry((key, column)).or_default();
        entry.push(cell);
        // keep latest-first
        entry.sort_by(|a, b| b.ts.cmp(&a.ts));
    }

    fn latest_ts(&self, key: NodeId, column: Column) -> Option<u64> {
        self.rows
            .read()
            .get(&(key, column))
            .and_then(|cells| cells.iter().map(|c| c.ts).max())
    }
}

impl VersionedStore for MemStore {
    fn read_row(&self, key: NodeId, columns: &[Column], at_time: u64) -> Vec<(Column, Vec<Cell>)> {
        let rows = self.rows.read();
        columns
            .iter()
            .map(|&col| {
                let cells = rows
                    .get(&(key, col))
                    .map(|cells| {
                        cells
                            .iter()
                            .filter(|c| c.ts <= at_time)
                            .cloned()
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                (col, cells)
            })
            .collect()
    }

    fn range_read_chunk(
        &self,
        layer: Layer,
        chunk: ChunkCoord,
        column: Column,
        at_time: u64,
    ) -> Vec<(NodeId, Cell)> {
        let rows = self.rows.read();
        let mut out = Vec::new();
        for (&(key, col), cells) in rows.iter() {
            if col != column {
                continue;
            }
            if crate::ids::layer_of(key) != layer || crate::ids::chunk_coord(key) != chunk {
                continue;
            }
            // every cell at or before `at_time` is returned, not just the
            // latest: unlike `Parent`/`Child`, `AtomicEdge` cells are
            // independent facts (one per adjacent peer) rather than
            // successive versions of a single fact.
            out.extend(
                cells
                    .iter()
                    .filter(|c| c.ts <= at_time)
                    .map(|c| (key, c.clone())),
            );
        }
        out
    }

    fn write_rows(&self, batch: Vec<WriteRow>, precondition_time: u64) -> Result<(), StoreError> {
        // idempotence: a batch that is purely re-writing an already-present
        // operation log entry with identical content is always accepted.
        if let [WriteRow { column: Column::OperationLog, value: CellValue::LogEntry(entry), .. }] =
            batch.as_slice()
        {
            let already_logged = self
                .op_log
                .read()
                .iter()
                .any(|e| e.operation_id == entry.operation_id && e == entry);
            if already_logged {
                return Ok(());
            }
        }

        for row in &batch {
            if row.column == Column::OperationLog {
                // the operation log is append-only and keyed by a freshly
                // allocated id; it never has a prior version to conflict with
                continue;
            }
            if let Some(existing) = self.latest_ts(row.key, row.column) {
                if existing > precondition_time {
                    return Err(StoreError::Conflict);
                }
            }
        }

        for row in batch {
            match row.column {
                Column::OperationLog => {
                    let CellValue::LogEntry(entry) = row.value else {
                        return Err(StoreError::Unavailable);
                    };
                    self.op_log.write().push(entry);
                }
                other => self.insert_cell(row.key, other, Cell { ts: row.ts, value: row.value }),
            }
        }
        Ok(())
    }

    fn lock_root(&self, root: NodeId, holder: &str, ttl: Duration) -> Result<Lease, StoreError> {
        let mut locks = self.locks.write();
        let now = Instant::now();
        if let Some(existing) = locks.get(&root) {
            if existing.expires_at > now {
                return Err(StoreError::LockBusy);
            }
        }
        let token = self.lock_token_counter.fetch_add(1, Ordering::SeqCst);
        locks.insert(
            root,
            LockState {
                token,
                holder: holder.to_owned(),
                expires_at: now + ttl,
            },
        );
        Ok(Lease { root, token })
    }

    fn release(&self, lease: Lease) -> Result<(), StoreError> {
        let mut locks = self.locks.write();
        match locks.get(&lease.root) {
            Some(state) if state.token == lease.token => {
                locks.remove(&lease.root);
                Ok(())
            }
            Some(_) => Err(StoreError::Conflict),
            None => Ok(()),
        }
    }

    fn renew(&self, lease: &Lease, ttl: Duration) -> Result<(), StoreError> {
        let mut locks = self.locks.write();
        match locks.get_mut(&lease.root) {
            Some(state) if state.token == lease.token => {
                state.expires_at = Instant::now() + ttl;
                Ok(())
            }
            Some(_) => Err(StoreError::Conflict),
            None => Err(StoreError::NotFound),
        }
    }

    fn alloc_operation_id(&self) -> u64 {
        // operation ids start at 1 so 0 can mean "no prior operation"
        self.op_id_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn alloc_seq(&self, layer: Layer, chunk: ChunkCoord) -> u32 {
        let mut counters = self.seq_counters.write();
        let seq = counters.entry((layer, chunk)).or_insert(0);
        let next = *seq;
        *seq += 1;
        next
    }

    fn read_log_rows(&self, filter: LogFilter) -> Vec<OperationLogEntry> {
        let mut entries: Vec<_> = self
            .op_log
            .read()
            .iter()
            .filter(|e| filter.start_time.map_or(true, |t| e.timestamp >= t))
            .filter(|e| {
                filter
                    .operation_ids
                    .as_ref()
                    .map_or(true, |ids| ids.contains(&e.operation_id))
            })
            .filter(|e| {
                filter
                    .user_id
                    .as_ref()
                    .map_or(true, |u| &e.user_id == u)
            })
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.operation_id);
        entries
    }

    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}
