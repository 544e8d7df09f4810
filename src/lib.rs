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

//! `chunkedgraph-core`: a versioned, hierarchical supervoxel partitioning
//! graph with a concurrency-safe edit engine and a local mincut splitting
//! algorithm.
//!
//! The crate is a library, not a service: an embedder supplies a
//! [`store::VersionedStore`] implementation (the in-process
//! [`store::memstore::MemStore`] is provided for tests and small
//! deployments) and drives everything through the [`chunkedgraph::ChunkedGraph`]
//! facade. HTTP framing, wire serialization, authentication and the
//! messaging transport itself are out of scope; only the logic behind them
//! lives here.

pub mod bbox;
pub mod chunkedgraph;
pub mod config;
pub mod edit;
pub mod error;
pub mod graph;
pub mod hierarchy;
pub mod history;
pub mod ids;
pub mod mincut;
pub mod oplog;
pub mod remesh;
pub mod store;

pub use chunkedgraph::ChunkedGraph;
pub use config::Config;
pub use error::{Error, ErrorKind, GraphResult};
pub use ids::{ChunkCoord, Layer, NodeId};
