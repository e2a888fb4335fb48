//! Synchronization against the remote store.
//!
//! This module owns the two mutation surfaces of the engine: the optimistic
//! create/update/delete path with reconciliation and rollback, and the
//! cross-project batch copy orchestrator.

mod batch;
mod mutation;

pub use batch::{BatchCopyOutcome, BatchCopyRequest};
pub use mutation::SyncEngine;

use thiserror::Error;

use crate::models::LogicalKind;
use crate::transport::TransportError;

/// Errors surfaced by the synchronization engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Precondition failed before any cache write; the transport was never
    /// reached.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The transport call failed. Optimistic state has been rolled back to
    /// the exact pre-mutation snapshot before this is returned.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server response could not be matched to any cached entity. The
    /// cache is left untouched by the failed reconciliation.
    #[error("reconciliation conflict: server response matched no cached {kind} (id {id:?})")]
    ReconciliationConflict { kind: LogicalKind, id: Option<i64> },

    /// A success response whose body could not be understood.
    #[error("invalid response from server: {0}")]
    InvalidResponse(String),

    /// A batch copy chunk failed; no further chunks were attempted.
    #[error("batch copy aborted at chunk {chunk}: {source}")]
    BatchAbort {
        chunk: usize,
        #[source]
        source: TransportError,
    },
}
