/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Shared error taxonomy.
//!
//! Every component in the daemon returns [`Error`]; the variants match the
//! error kinds and propagation policy described for the system as a whole,
//! not any single component, so that the Request Pipeline can match on them
//! uniformly when deciding what to surface to a caller versus what to log
//! and recover from.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Configuration failed validation; carries the first offending path.
    #[error("configuration rejected at '{path}': {reason}")]
    ConfigRejected { path: String, reason: String },

    /// A policy refused an allocation or release as infeasible.
    #[error("policy rejected request: {0}")]
    PolicyRejected(String),

    /// An internal invariant was violated. Fatal: the caller should abort
    /// the daemon after a best-effort persist.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// A controller failed to enforce an allocation during a hook phase.
    #[error("enforcement hook failed: {0}")]
    HookFailed(String),

    /// The downstream container runtime returned an error; the message is
    /// forwarded verbatim from the runtime so clients see the same text.
    #[error("runtime failed: {0}")]
    RuntimeFailed(String),

    /// A lookup found nothing. Usually downgraded to a pass-through by the
    /// caller rather than surfaced.
    #[error("not found: {0}")]
    NotFound(String),

    /// A best-effort persistence operation failed; logged, never surfaced.
    #[error("persist failed: {0}")]
    PersistFailed(String),

    /// Rollback of a failed update itself failed, leaving the tree in the
    /// pre-update state but unable to confirm fragments were restored.
    #[error("rollback degraded: {0}")]
    RollbackDegraded(String),

    /// Several independent failures occurred in the same operation (e.g. a
    /// policy rolling back a partially-applied allocation across several
    /// containers). Each entry keeps its own kind for the caller to inspect.
    #[error("{} errors occurred: {}", .0.len(), join_messages(.0))]
    Multi(Vec<Error>),
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    pub fn config_rejected(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ConfigRejected {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that a rebalance or best-effort reconciliation loop
    /// should log and retry next cycle rather than propagate.
    pub fn is_recoverable_in_background(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::PersistFailed(_) | Error::HookFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_error_message_joins_each_variant() {
        let err = Error::Multi(vec![
            Error::NotFound("c1".into()),
            Error::HookFailed("cache controller".into()),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("2 errors"));
        assert!(msg.contains("c1"));
        assert!(msg.contains("cache controller"));
    }

    #[test]
    fn background_recoverable_classification() {
        assert!(Error::NotFound("x".into()).is_recoverable_in_background());
        assert!(!Error::InvariantViolation("x".into()).is_recoverable_in_background());
    }
}
