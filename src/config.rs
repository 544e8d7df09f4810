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

//! Environment-driven configuration (spec.md §6 "Environment variables").

use core::fmt;
use std::time::Duration;

const ENV_REMESH_EXCHANGE: &str = "PYCHUNKEDGRAPH_EDITS_EXCHANGE";
const ENV_LOCK_TTL_MS: &str = "CHUNKEDGRAPH_LOCK_TTL_MS";
const ENV_RETRY_ATTEMPTS: &str = "CHUNKEDGRAPH_RETRY_ATTEMPTS";
const ENV_UNDO_DENYLIST: &str = "CHUNKEDGRAPH_UNDO_DENYLIST";

const DEFAULT_REMESH_EXCHANGE: &str = "pychunkedgraph";
const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60);
/// spec.md §6 "Deny list": these two tables reject undo/redo/rollback by
/// default, overridable via `CHUNKEDGRAPH_UNDO_DENYLIST`.
const DEFAULT_UNDO_DENYLIST: [&str; 2] = ["fly_v26", "fly_v31"];
/// 50ms, 200ms, 800ms: spec.md §4.6 retry policy.
const DEFAULT_BACKOFF: [Duration; 3] = [
    Duration::from_millis(50),
    Duration::from_millis(200),
    Duration::from_millis(800),
];

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    BadInt {
        var: &'static str,
        value: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadInt { var, value } => {
                write!(f, "environment variable `{var}` has non-integer value `{value}`")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Exchange name the remesh notifier publishes to.
    pub remesh_exchange: String,
    /// Lease TTL for root locks.
    pub lock_ttl: Duration,
    /// Backoff schedule for retrying a `Conflict` from the store. The
    /// length of this vec is the retry budget (spec.md §4.6: 3 attempts).
    pub retry_backoff: Vec<Duration>,
    /// Tables on which `undo`/`redo`/`rollback_user` are refused
    /// (spec.md §4.6 "Forbidden on specified tables").
    pub undo_redo_deny_list: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remesh_exchange: DEFAULT_REMESH_EXCHANGE.to_owned(),
            lock_ttl: DEFAULT_LOCK_TTL,
            retry_backoff: DEFAULT_BACKOFF.to_vec(),
            undo_redo_deny_list: DEFAULT_UNDO_DENYLIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Config {
    /// Read configuration from the process environment, falling back to
    /// the defaults above for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Ok(exchange) = std::env::var(ENV_REMESH_EXCHANGE) {
            if !exchange.is_empty() {
                cfg.remesh_exchange = exchange;
            }
        }
        if let Ok(raw) = std::env::var(ENV_LOCK_TTL_MS) {
            let ms: u64 = raw.parse().map_err(|_| ConfigError::BadInt {
                var: ENV_LOCK_TTL_MS,
                value: raw,
            })?;
            cfg.lock_ttl = Duration::from_millis(ms);
        }
        if let Ok(raw) = std::env::var(ENV_RETRY_ATTEMPTS) {
            let n: usize = raw.parse().map_err(|_| ConfigError::BadInt {
                var: ENV_RETRY_ATTEMPTS,
                value: raw,
            })?;
            cfg.retry_backoff = DEFAULT_BACKOFF
                .iter()
                .cycle()
                .take(n)
                .copied()
                .collect();
        }
        if let Ok(raw) = std::env::var(ENV_UNDO_DENYLIST) {
            cfg.undo_redo_deny_list = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
        }
        Ok(cfg)
    }

    pub fn is_undo_redo_denied(&self, table: &str) -> bool {
        self.undo_redo_deny_list.iter().any(|t| t == table)
    }
}
