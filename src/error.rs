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

//! Crate-wide error type.
//!
//! Mirrors the error kinds of spec.md §7. Kept as a flat enum with a thin
//! `Error` wrapper rather than a full context-tracing stack: this crate has
//! one call path per operation (no request router to annotate).

use core::fmt;

pub type GraphResult<T> = Result<T, Error>;

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    /// Malformed input, unknown table, endpoints too far apart, terminals
    /// identical, disconnected terminals, unsupported op for this table.
    BadRequest(String),
    /// Graph state forbids the edit (illegal split, invariant violation).
    PreconditionError(String),
    /// An edit produced no new roots.
    Postcondition,
    /// A root lock could not be acquired within the retry budget.
    LockingError,
    /// The store rejected a write via optimistic concurrency, and the retry
    /// budget was exhausted.
    Conflict,
    /// Node or operation unknown at the requested time.
    NotFound,
    /// The store or messaging transport is unavailable.
    Unavailable(String),
    /// Unexpected internal condition.
    Internal(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest(msg) => write!(f, "bad request: {msg}"),
            Self::PreconditionError(msg) => write!(f, "precondition failed: {msg}"),
            Self::Postcondition => write!(f, "edit produced no new roots"),
            Self::LockingError => write!(f, "root lock busy past retry budget"),
            Self::Conflict => write!(f, "store conflict"),
            Self::NotFound => write!(f, "node or operation not found at the requested time"),
            Self::Unavailable(msg) => write!(f, "unavailable: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    kind: ErrorKind,
    /// optional static context describing which component raised this
    context: Option<&'static str>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }
    pub fn with_context(kind: ErrorKind, context: &'static str) -> Self {
        Self {
            kind,
            context: Some(context),
        }
    }
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest(msg.into()))
    }
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::PreconditionError(msg.into()))
    }
    pub fn is_conflict(&self) -> bool {
        matches!(self.kind, ErrorKind::Conflict)
    }
    pub fn is_locking(&self) -> bool {
        matches!(self.kind, ErrorKind::LockingError)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.context {
            Some(ctx) => write!(f, "[{ctx}] {}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Failure modes of the versioned store contract (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    Conflict,
    LockBusy,
    NotFound,
    Unavailable,
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict => ErrorKind::Conflict.into(),
            StoreError::LockBusy => ErrorKind::LockingError.into(),
            StoreError::NotFound => ErrorKind::NotFound.into(),
            StoreError::Unavailable => ErrorKind::Unavailable("store unreachable".into()).into(),
        }
    }
}
