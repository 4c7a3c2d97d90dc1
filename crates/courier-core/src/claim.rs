//! Claim manager: exclusive, lease-bounded ownership of requests.
//!
//! Every operation here is one `compare_and_set_status` call against the
//! store. There is no in-process locking: workers may be separate
//! processes, and the store's conditional update is the only
//! coordination point that exists for all of them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::clock::Clock;
use crate::domain::{CourierError, RequestId, RequestStatus, WorkerId};
use crate::store::{RequestStore, StatusGuard, StatusUpdate};

pub struct ClaimManager {
    store: Arc<dyn RequestStore>,
    clock: Arc<dyn Clock>,
    lease_ttl: chrono::Duration,
}

impl ClaimManager {
    pub fn new(store: Arc<dyn RequestStore>, clock: Arc<dyn Clock>, lease_ttl: Duration) -> Self {
        let lease_ttl =
            chrono::Duration::from_std(lease_ttl).unwrap_or_else(|_| chrono::Duration::seconds(30));
        Self {
            store,
            clock,
            lease_ttl,
        }
    }

    fn lease_deadline(&self) -> DateTime<Utc> {
        self.clock.now() + self.lease_ttl
    }

    /// Try to take the claim on a Pending request.
    ///
    /// Returns true for exactly one of any number of racing callers;
    /// the losers observe false and move on to the next candidate.
    pub async fn claim(&self, id: RequestId, worker: &WorkerId) -> Result<bool, CourierError> {
        let won = self
            .store
            .compare_and_set_status(
                id,
                StatusGuard::status(RequestStatus::Pending),
                StatusUpdate {
                    status: RequestStatus::Claimed,
                    holder: Some(worker.clone()),
                    lease_expires_at: Some(self.lease_deadline()),
                    count_attempt: true,
                },
            )
            .await?;
        if won {
            debug!(%id, %worker, "claim taken");
        }
        Ok(won)
    }

    /// Heartbeat: push the lease deadline forward.
    ///
    /// Returns false if the claim is no longer held by `worker`: the
    /// lease lapsed and someone else owns the request now.
    pub async fn renew(&self, id: RequestId, worker: &WorkerId) -> Result<bool, CourierError> {
        self.store
            .compare_and_set_status(
                id,
                StatusGuard::held_by(RequestStatus::Claimed, worker.clone()),
                StatusUpdate {
                    status: RequestStatus::Claimed,
                    holder: Some(worker.clone()),
                    lease_expires_at: Some(self.lease_deadline()),
                    count_attempt: false,
                },
            )
            .await
    }

    /// Voluntarily give the claim back, returning the request to the
    /// claimable pool (the retry path for transient failures).
    ///
    /// Holder-guarded: a worker can only release its own claim, never a
    /// newer claim taken after its lease lapsed.
    pub async fn release(&self, id: RequestId, worker: &WorkerId) -> Result<bool, CourierError> {
        let released = self
            .store
            .compare_and_set_status(
                id,
                StatusGuard::held_by(RequestStatus::Claimed, worker.clone()),
                StatusUpdate {
                    status: RequestStatus::Pending,
                    holder: None,
                    lease_expires_at: None,
                    count_attempt: false,
                },
            )
            .await?;
        if released {
            debug!(%id, %worker, "claim released");
        }
        Ok(released)
    }

    /// Finalize a held claim to a terminal status.
    ///
    /// Only the current claim holder may finalize; a stale caller gets
    /// `StaleClaim` and the store is left exactly as it was. The claim
    /// holder is kept on Completed rows as provenance and cleared on
    /// Failed ones.
    pub async fn finalize(
        &self,
        id: RequestId,
        worker: &WorkerId,
        terminal: RequestStatus,
    ) -> Result<(), CourierError> {
        if !terminal.is_terminal() {
            return Err(CourierError::InvalidTransition {
                from: RequestStatus::Claimed,
                to: terminal,
            });
        }
        let holder = match terminal {
            RequestStatus::Completed => Some(worker.clone()),
            _ => None,
        };
        let applied = self
            .store
            .compare_and_set_status(
                id,
                StatusGuard::held_by(RequestStatus::Claimed, worker.clone()),
                StatusUpdate {
                    status: terminal,
                    holder,
                    lease_expires_at: None,
                    count_attempt: false,
                },
            )
            .await?;
        if applied {
            Ok(())
        } else {
            Err(CourierError::StaleClaim {
                id,
                worker: worker.clone(),
            })
        }
    }

    /// Release every claim whose lease lapsed at or before `now`.
    ///
    /// The lease deadline is re-checked inside each conditional update,
    /// so a heartbeat that lands between the scan and the release wins
    /// and the claim survives. Returns the ids actually released.
    pub async fn reap_expired(&self, now: DateTime<Utc>) -> Result<Vec<RequestId>, CourierError> {
        let mut released = Vec::new();
        for id in self.store.expired_leases(now).await? {
            let guard = StatusGuard {
                status: RequestStatus::Claimed,
                holder: None,
                lease_lapsed_before: Some(now),
            };
            let update = StatusUpdate {
                status: RequestStatus::Pending,
                holder: None,
                lease_expires_at: None,
                count_attempt: false,
            };
            if self.store.compare_and_set_status(id, guard, update).await? {
                debug!(%id, "lapsed lease reaped");
                released.push(id);
            }
        }
        Ok(released)
    }
}
