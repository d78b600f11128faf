// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unified error type shared across every kernel component and, at the
//! transport boundary, serialized back to the external client.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Every observable error kind a façade operation can surface.
///
/// Per-target failures in batch operations are carried inside the result
/// list (never raised); only whole-operation errors use this type as a
/// top-level `Err`. Both cases share the same enum so transports have one
/// thing to serialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum KernelError {
    NotFound { what: String, key: String },
    NameConflict { name: String },
    InvalidArgument { field: String, reason: String },
    LockedBy { owner: String },
    NotOwner,
    ResolutionError { descriptor: String, reason: String },
    CycleError { path: Vec<String> },
    Timeout { operation: String },
    Cancelled { operation: String },
    DriverError { kind: String },
    PersistenceError { path: String, kind: String },
    InternalError { code: String },
}

impl KernelError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::NameConflict { .. } => "NAME_CONFLICT",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::LockedBy { .. } => "LOCKED_BY",
            Self::NotOwner => "NOT_OWNER",
            Self::ResolutionError { .. } => "RESOLUTION_ERROR",
            Self::CycleError { .. } => "CYCLE_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Cancelled { .. } => "CANCELLED",
            Self::DriverError { .. } => "DRIVER_ERROR",
            Self::PersistenceError { .. } => "PERSISTENCE_ERROR",
            Self::InternalError { .. } => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the `crates/cli` transport maps this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::NameConflict { .. } => 409,
            Self::InvalidArgument { .. } => 400,
            Self::LockedBy { .. } => 423,
            Self::NotOwner => 403,
            Self::ResolutionError { .. } => 422,
            Self::CycleError { .. } => 422,
            Self::Timeout { .. } => 504,
            Self::Cancelled { .. } => 499,
            Self::DriverError { .. } => 502,
            Self::PersistenceError { .. } => 500,
            Self::InternalError { .. } => 500,
        }
    }

    pub fn not_found(what: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound { what: what.into(), key: key.into() }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument { field: field.into(), reason: reason.into() }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { what, key } => write!(f, "{what} not found: {key}"),
            Self::NameConflict { name } => write!(f, "name already in use: {name}"),
            Self::InvalidArgument { field, reason } => write!(f, "invalid {field}: {reason}"),
            Self::LockedBy { owner } => write!(f, "locked by {owner}"),
            Self::NotOwner => write!(f, "caller is not the lock owner"),
            Self::ResolutionError { descriptor, reason } => {
                write!(f, "could not resolve {descriptor}: {reason}")
            }
            Self::CycleError { path } => write!(f, "dependency cycle: {}", path.join(" -> ")),
            Self::Timeout { operation } => write!(f, "{operation} timed out"),
            Self::Cancelled { operation } => write!(f, "{operation} cancelled"),
            Self::DriverError { kind } => write!(f, "driver error: {kind}"),
            Self::PersistenceError { path, kind } => write!(f, "persistence error at {path}: {kind}"),
            Self::InternalError { code } => write!(f, "internal error: {code}"),
        }
    }
}

impl std::error::Error for KernelError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_covers_lock_conflict() {
        let err = KernelError::LockedBy { owner: "alice".into() };
        assert_eq!(err.http_status(), 423);
        assert_eq!(err.as_str(), "LOCKED_BY");
    }

    #[test]
    fn display_is_human_readable() {
        let err = KernelError::CycleError { path: vec!["a".into(), "b".into(), "a".into()] };
        assert_eq!(err.to_string(), "dependency cycle: a -> b -> a");
    }
}
