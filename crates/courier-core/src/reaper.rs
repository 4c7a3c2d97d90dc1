//! Lease reaper: returns crashed workers' requests to the pool.
//!
//! Workers heartbeat while they hold a claim; a worker that dies stops
//! renewing, and once its lease lapses the reaper releases the claim so
//! another worker can pick the request up. This bounds the damage of a
//! crash to one lease TTL, with no coordination beyond the store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::claim::ClaimManager;
use crate::clock::Clock;

pub struct LeaseReaper {
    claims: Arc<ClaimManager>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl LeaseReaper {
    pub fn new(claims: Arc<ClaimManager>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            claims,
            clock,
            interval,
        }
    }

    /// Run one sweep, releasing every lapsed claim.
    pub async fn sweep(&self) {
        match self.claims.reap_expired(self.clock.now()).await {
            Ok(released) if !released.is_empty() => {
                info!(count = released.len(), "reaped lapsed leases");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "lease sweep failed"),
        }
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.interval) => self.sweep().await,
            }
        }
    }
}

/// Handle to a spawned reaper task.
pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReaperHandle {
    /// Spawn the reaper loop.
    pub fn spawn(reaper: LeaseReaper) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            reaper.run(shutdown_rx).await;
        });
        Self { shutdown_tx, join }
    }

    pub async fn shutdown_and_join(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}
