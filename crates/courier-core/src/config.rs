//! Broker configuration.

use std::time::Duration;

/// Tunables for claim leases, retries, and polling.
///
/// The lease TTL and retry limit are configuration, not persisted
/// policy: the store only records the resulting deadlines and attempt
/// counts.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// How long a claim stays valid without a renewal. A crashed worker
    /// loses its claim this long after its last heartbeat.
    pub lease_ttl: Duration,

    /// Number of transient failures after which a request is finalized
    /// as Failed instead of being released for another attempt.
    pub retry_limit: u32,

    /// Upper bound on candidates fetched per claimable-list poll.
    pub claim_batch: usize,

    /// Base delay between polls when the topic is idle; backoff grows
    /// from here.
    pub poll_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(30),
            retry_limit: 3,
            claim_batch: 16,
            poll_interval: Duration::from_millis(200),
        }
    }
}
