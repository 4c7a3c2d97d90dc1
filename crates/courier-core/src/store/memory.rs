//! In-memory store implementation.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{RequestStore, ResponseStore, StatusGuard, StatusUpdate};
use crate::clock::{Clock, SystemClock};
use crate::domain::{
    CourierError, NewResponse, Request, RequestId, RequestStatus, Response, ResponseId, Topic,
    check_transition,
};
use crate::observability::StatusCounts;

/// In-memory store state.
///
/// One mutex guards the whole block, so every conditional update runs
/// as a single atomic step, the same guarantee a relational backend
/// gets from a conditional UPDATE. `BTreeMap` keyed by the monotonic id
/// gives oldest-first iteration for free.
struct MemoryState {
    requests: BTreeMap<RequestId, Request>,
    responses: BTreeMap<ResponseId, Response>,

    /// Response ids per request, in insertion order.
    by_request: BTreeMap<RequestId, Vec<ResponseId>>,

    next_request_id: u64,
    next_response_id: u64,
}

impl MemoryState {
    fn new() -> Self {
        Self {
            requests: BTreeMap::new(),
            responses: BTreeMap::new(),
            by_request: BTreeMap::new(),
            next_request_id: 1,
            next_response_id: 1,
        }
    }

    fn allocate_request_id(&mut self) -> RequestId {
        let id = RequestId::new(self.next_request_id);
        self.next_request_id += 1;
        id
    }

    fn allocate_response_id(&mut self) -> ResponseId {
        let id = ResponseId::new(self.next_response_id);
        self.next_response_id += 1;
        id
    }

    fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for request in self.requests.values() {
            match request.status {
                RequestStatus::Pending => counts.pending += 1,
                RequestStatus::Claimed => counts.claimed += 1,
                RequestStatus::Completed => counts.completed += 1,
                RequestStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

fn guard_holds(request: &Request, guard: &StatusGuard) -> bool {
    if request.status != guard.status {
        return false;
    }
    if let Some(expected) = &guard.holder
        && request.claimed_by.as_ref() != Some(expected)
    {
        return false;
    }
    if let Some(deadline) = guard.lease_lapsed_before {
        match request.lease_expires_at {
            Some(expiry) if expiry <= deadline => {}
            _ => return false,
        }
    }
    true
}

/// In-memory implementation of both store ports.
///
/// Used by tests and the demo binary, and as the reference semantics
/// for an external implementation of the same ports.
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState::new()),
            clock,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn submit(
        &self,
        topic: Topic,
        payload: serde_json::Value,
    ) -> Result<RequestId, CourierError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let id = state.allocate_request_id();
        state.requests.insert(id, Request::new(id, topic, payload, now));
        Ok(id)
    }

    async fn get(&self, id: RequestId) -> Result<Request, CourierError> {
        let state = self.state.lock().await;
        state
            .requests
            .get(&id)
            .cloned()
            .ok_or(CourierError::NotFound(id))
    }

    async fn list_claimable(
        &self,
        topic: &Topic,
        limit: usize,
    ) -> Result<Vec<Request>, CourierError> {
        let state = self.state.lock().await;
        Ok(state
            .requests
            .values()
            .filter(|r| r.status.is_claimable() && &r.topic == topic)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn compare_and_set_status(
        &self,
        id: RequestId,
        guard: StatusGuard,
        update: StatusUpdate,
    ) -> Result<bool, CourierError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let request = state.requests.get_mut(&id).ok_or(CourierError::NotFound(id))?;

        if !guard_holds(request, &guard) {
            return Ok(false);
        }
        // Same-status updates (lease renewal) are not transitions.
        if update.status != request.status {
            check_transition(request.status, update.status)?;
        }

        request.status = update.status;
        request.claimed_by = update.holder;
        request.lease_expires_at = update.lease_expires_at;
        if update.count_attempt {
            request.attempts += 1;
        }
        request.updated_at = now;
        Ok(true)
    }

    async fn expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<RequestId>, CourierError> {
        let state = self.state.lock().await;
        Ok(state
            .requests
            .values()
            .filter(|r| {
                r.status == RequestStatus::Claimed
                    && r.lease_expires_at.is_some_and(|expiry| expiry <= now)
            })
            .map(|r| r.id)
            .collect())
    }

    async fn status_counts(&self) -> Result<StatusCounts, CourierError> {
        let state = self.state.lock().await;
        Ok(state.counts())
    }
}

#[async_trait]
impl ResponseStore for MemoryStore {
    async fn append(&self, new: NewResponse) -> Result<ResponseId, CourierError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        if !state.requests.contains_key(&new.request_id) {
            return Err(CourierError::NotFound(new.request_id));
        }

        let id = state.allocate_response_id();
        let response = Response {
            id,
            request_id: new.request_id,
            body: new.body,
            status_code: new.status_code,
            created_at: now,
        };
        state.responses.insert(id, response);
        state.by_request.entry(new.request_id).or_default().push(id);
        Ok(id)
    }

    async fn list_for_request(&self, id: RequestId) -> Result<Vec<Response>, CourierError> {
        let state = self.state.lock().await;
        if !state.requests.contains_key(&id) {
            return Err(CourierError::NotFound(id));
        }
        Ok(state
            .by_request
            .get(&id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|rid| state.responses.get(rid).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest_success(&self, id: RequestId) -> Result<Option<Response>, CourierError> {
        let responses = self.list_for_request(id).await?;
        Ok(responses.into_iter().rev().find(Response::is_success))
    }
}
