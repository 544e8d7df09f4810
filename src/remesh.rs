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

//! # Remesh notifier (spec.md §4.8)
//!
//! Fire-and-forget publication of `{operation_id, new_lvl2_ids,
//! new_root_ids}` to a named exchange. Grounded in
//! `engine::fractal::mgr::FractalMgr`'s background dispatcher: an unbounded
//! `mpsc` channel feeds a task that owns the publisher and never blocks the
//! caller.

use crate::ids::NodeId;
use tokio::sync::mpsc;

/// `remesh_priority` is carried as the string the wire format uses
/// (`"true"`/`"false"`), not a bool, to mirror the attribute's encoding in
/// spec.md §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemeshPriority {
    True,
    False,
}

impl RemeshPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::True => "true",
            Self::False => "false",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemeshPayload {
    pub operation_id: u64,
    pub new_lvl2_ids: Vec<NodeId>,
    pub new_root_ids: Vec<NodeId>,
    pub table_id: String,
    pub user_id: String,
    pub remesh_priority: RemeshPriority,
}

/// The downstream publish step. Implementations may fail (transport down,
/// exchange unreachable); the dispatcher logs and swallows such failures.
pub trait Publisher: Send + Sync + 'static {
    fn publish(&self, exchange: &str, payload: &RemeshPayload) -> Result<(), String>;
}

/// A `Publisher` that drops everything, for tests and for deployments that
/// run without a messaging transport.
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn publish(&self, _exchange: &str, _payload: &RemeshPayload) -> Result<(), String> {
        Ok(())
    }
}

/// Handle held by the edit engine. Cloning is cheap (an `mpsc::Sender`);
/// every clone feeds the same background dispatcher task.
#[derive(Clone)]
pub struct RemeshHandle {
    tx: mpsc::UnboundedSender<RemeshPayload>,
}

impl RemeshHandle {
    /// Fire-and-forget: queues `payload` for the background dispatcher.
    /// Never blocks; a full process exit before the dispatcher drains the
    /// queue simply drops the pending payloads, matching spec.md §4.8's
    /// "no delivery guarantees beyond at-least-once from the transport".
    pub fn notify(&self, payload: RemeshPayload) {
        if self.tx.send(payload).is_err() {
            log::warn!("remesh dispatcher task is gone, dropping payload");
        }
    }
}

/// Spawns the background dispatcher task and returns a handle to it. The
/// task runs until every `RemeshHandle` clone is dropped.
pub fn spawn_dispatcher(
    exchange: String,
    publisher: impl Publisher,
) -> RemeshHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<RemeshPayload>();
    tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if let Err(e) = publisher.publish(&exchange, &payload) {
                log::warn!(
                    "remesh publish failed for operation {}: {e}",
                    payload.operation_id
                );
            }
        }
        log::debug!("remesh dispatcher task exiting, all handles dropped");
    });
    RemeshHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct RecordingPublisher {
        seen: Arc<Mutex<Vec<u64>>>,
    }

    impl Publisher for RecordingPublisher {
        fn publish(&self, _exchange: &str, payload: &RemeshPayload) -> Result<(), String> {
            self.seen.lock().push(payload.operation_id);
            Ok(())
        }
    }

    fn payload(operation_id: u64) -> RemeshPayload {
        RemeshPayload {
            operation_id,
            new_lvl2_ids: vec![1],
            new_root_ids: vec![2],
            table_id: "test".to_owned(),
            user_id: "alice".to_owned(),
            remesh_priority: RemeshPriority::False,
        }
    }

    #[tokio::test]
    async fn dispatcher_delivers_queued_payloads() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handle = spawn_dispatcher(
            "pychunkedgraph".to_owned(),
            RecordingPublisher { seen: seen.clone() },
        );
        handle.notify(payload(1));
        handle.notify(payload(2));
        drop(handle);
        // yield so the spawned task can drain the channel before we assert.
        for _ in 0..100 {
            tokio::task::yield_now().await;
            if seen.lock().len() == 2 {
                break;
            }
        }
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn publish_failure_is_swallowed() {
        struct FailingPublisher;
        impl Publisher for FailingPublisher {
            fn publish(&self, _exchange: &str, _payload: &RemeshPayload) -> Result<(), String> {
                Err("exchange unreachable".to_owned())
            }
        }
        let handle = spawn_dispatcher("pychunkedgraph".to_owned(), FailingPublisher);
        handle.notify(payload(1));
        drop(handle);
        tokio::task::yield_now().await;
        // reaching here without a panic is the assertion: the dispatcher
        // task must not propagate the publish error anywhere.
    }
}
