//! Broker error taxonomy.
//!
//! Note what is *not* here: a failed claim. Losing a claim race is the
//! expected outcome for all but one of the racing workers, so `claim`
//! returns `bool` instead of an error. Payload execution failures are
//! data (they become response rows), so they live with the handler API
//! as `ProcessingError`, not in this enum.

use thiserror::Error;

use super::ids::{RequestId, WorkerId};
use super::status::RequestStatus;
use super::topic::Topic;

#[derive(Debug, Error)]
pub enum CourierError {
    /// Malformed submission, rejected before anything is persisted.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Reference to a request that does not exist.
    #[error("request not found: {0}")]
    NotFound(RequestId),

    /// A finalize/renew arrived from a worker that no longer holds the
    /// claim. The store is left untouched.
    #[error("stale claim: {id} is not held by worker {worker}")]
    StaleClaim { id: RequestId, worker: WorkerId },

    /// A status change outside the transition table.
    #[error("illegal status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    /// The store could not be reached; no request state is assumed to
    /// have changed. Callers retry with backoff.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("no handler registered for topic {0}")]
    HandlerNotFound(Topic),

    #[error("duplicate handler for topic {0}")]
    DuplicateHandler(Topic),
}
