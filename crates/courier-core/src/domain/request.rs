//! Request record: the persisted unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{RequestId, WorkerId};
use super::status::RequestStatus;
use super::topic::Topic;

/// A submitted request.
///
/// This is the single source of truth for a unit of work: the store owns
/// the only mutable copy, and every status change goes through the store's
/// atomic conditional update. `topic` and `payload` are immutable after
/// creation.
///
/// Invariant: at most one worker holds a non-null `claimed_by` at any
/// time, and only while `status` is `Claimed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "request_id")]
    pub id: RequestId,

    pub topic: Topic,

    /// Opaque structured document supplied by the producer.
    pub payload: serde_json::Value,

    pub status: RequestStatus,

    /// Worker currently holding the claim, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<WorkerId>,

    /// Deadline after which the claim may be reaped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,

    /// Number of claims taken on this request so far.
    #[serde(default)]
    pub attempts: u32,

    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Request {
    pub fn new(id: RequestId, topic: Topic, payload: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            id,
            topic,
            payload,
            status: RequestStatus::Pending,
            claimed_by: None,
            lease_expires_at: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
