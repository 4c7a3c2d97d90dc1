//! Store ports: the persisted request and response tables.
//!
//! The store is the only shared mutable resource between workers, which
//! may be separate processes. All cross-worker coordination therefore
//! goes through `compare_and_set_status`, the store's single atomic
//! conditional-update primitive, never through in-process locks. A
//! relational implementation maps it onto a conditional `UPDATE`; the
//! in-memory implementation applies it under one mutex.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    CourierError, NewResponse, Request, RequestId, RequestStatus, Response, ResponseId, Topic,
    WorkerId,
};
use crate::observability::StatusCounts;

/// Condition a conditional update must observe before applying.
#[derive(Debug, Clone)]
pub struct StatusGuard {
    /// The row's current status must equal this.
    pub status: RequestStatus,

    /// When set, the row's current claim holder must equal this worker.
    pub holder: Option<WorkerId>,

    /// When set, the row's lease must have expired at or before this
    /// instant. Lets the reaper lose gracefully to a concurrent renewal.
    pub lease_lapsed_before: Option<DateTime<Utc>>,
}

impl StatusGuard {
    pub fn status(status: RequestStatus) -> Self {
        Self {
            status,
            holder: None,
            lease_lapsed_before: None,
        }
    }

    pub fn held_by(status: RequestStatus, worker: WorkerId) -> Self {
        Self {
            status,
            holder: Some(worker),
            lease_lapsed_before: None,
        }
    }
}

/// The new claim state written when a conditional update applies.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: RequestStatus,
    pub holder: Option<WorkerId>,
    pub lease_expires_at: Option<DateTime<Utc>>,

    /// Increment the attempt counter (set when a claim is taken).
    pub count_attempt: bool,
}

/// Durable table of submitted requests.
///
/// Contract for `compare_and_set_status`: implementations apply guard
/// check and update as one atomic, linearizable step, reject status
/// changes outside the transition table with `InvalidTransition`, and
/// return `Ok(false)`, without modifying anything, when the guard does
/// not hold. Guard misses are expected contention, not errors.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Persist a new request with status Pending; returns its id.
    async fn submit(
        &self,
        topic: Topic,
        payload: serde_json::Value,
    ) -> Result<RequestId, CourierError>;

    /// Fetch one request.
    async fn get(&self, id: RequestId) -> Result<Request, CourierError>;

    /// Pending requests for a topic, oldest first, at most `limit`.
    ///
    /// A read-only snapshot: it may be stale by the time the caller
    /// acts on it, and that is fine: races are resolved by the claim
    /// CAS returning false.
    async fn list_claimable(
        &self,
        topic: &Topic,
        limit: usize,
    ) -> Result<Vec<Request>, CourierError>;

    /// The atomic conditional update. See the trait docs.
    async fn compare_and_set_status(
        &self,
        id: RequestId,
        guard: StatusGuard,
        update: StatusUpdate,
    ) -> Result<bool, CourierError>;

    /// Claimed requests whose lease expired at or before `now`, oldest
    /// first. A scan, not a mutation; the reaper releases each hit
    /// through the CAS.
    async fn expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<RequestId>, CourierError>;

    /// Request counts by status.
    async fn status_counts(&self) -> Result<StatusCounts, CourierError>;

    /// Validate and submit a raw submission: non-empty topic, parsable
    /// payload document. Rejected before anything is persisted.
    async fn submit_raw(&self, topic: &str, payload: &str) -> Result<RequestId, CourierError> {
        let topic = Topic::new(topic)?;
        let payload: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| CourierError::Validation(format!("unparsable payload: {e}")))?;
        self.submit(topic, payload).await
    }
}

/// Durable, append-only table of outcomes.
#[async_trait]
pub trait ResponseStore: Send + Sync {
    /// Record one processing outcome. Fails with `NotFound` if the
    /// referenced request does not exist.
    async fn append(&self, new: NewResponse) -> Result<ResponseId, CourierError>;

    /// All responses for a request, in insertion order.
    async fn list_for_request(&self, id: RequestId) -> Result<Vec<Response>, CourierError>;

    /// The authoritative result: the most recent successful response.
    async fn latest_success(&self, id: RequestId) -> Result<Option<Response>, CourierError>;
}
