//! Worker loop: poll, claim, execute, record, finalize.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::claim::ClaimManager;
use crate::config::BrokerConfig;
use crate::domain::{
    CourierError, NewResponse, Request, RequestId, RequestStatus, Topic, WorkerId,
};
use crate::handler::{FailureKind, ProcessingError, TopicHandler};
use crate::store::{RequestStore, ResponseStore};

/// Shared dependencies handed to every worker in a group.
#[derive(Clone)]
pub struct WorkerContext {
    pub requests: Arc<dyn RequestStore>,
    pub responses: Arc<dyn ResponseStore>,
    pub claims: Arc<ClaimManager>,
    pub config: BrokerConfig,
    pub backoff: BackoffPolicy,
}

/// Outcome of one supervised execution.
enum Execution {
    Finished(Result<serde_json::Value, ProcessingError>),
    /// The lease could not be renewed; another worker owns the request
    /// now and this attempt must not write anything.
    LeaseLost,
}

/// One worker: claims requests for a single topic and processes them.
pub struct Worker {
    id: WorkerId,
    topic: Topic,
    handler: Arc<dyn TopicHandler>,
    ctx: WorkerContext,
}

impl Worker {
    pub fn new(topic: Topic, handler: Arc<dyn TopicHandler>, ctx: WorkerContext) -> Self {
        Self::with_id(WorkerId::generate(), topic, handler, ctx)
    }

    pub fn with_id(
        id: WorkerId,
        topic: Topic,
        handler: Arc<dyn TopicHandler>,
        ctx: WorkerContext,
    ) -> Self {
        Self {
            id,
            topic,
            handler,
            ctx,
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Run until shutdown is signalled.
    ///
    /// Processing failures are recorded, never propagated: nothing a
    /// handler does can take the loop down.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(worker = %self.id, topic = %self.topic, "worker started");
        let mut idle_polls: u32 = 0;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let claimed = match self.claim_next().await {
                Ok(claimed) => claimed,
                Err(CourierError::StoreUnavailable(msg)) => {
                    // Nothing is assumed to have changed; retry later.
                    warn!(worker = %self.id, %msg, "store unavailable, backing off");
                    idle_polls += 1;
                    self.pause(idle_polls, &mut shutdown_rx).await;
                    continue;
                }
                Err(e) => {
                    warn!(worker = %self.id, error = %e, "poll failed");
                    idle_polls += 1;
                    self.pause(idle_polls, &mut shutdown_rx).await;
                    continue;
                }
            };

            let Some(id) = claimed else {
                idle_polls += 1;
                self.pause(idle_polls, &mut shutdown_rx).await;
                continue;
            };

            idle_polls = 0;
            self.process(id).await;
        }
        info!(worker = %self.id, "worker stopped");
    }

    /// List claimable requests and race for them in listed order.
    ///
    /// Losing a claim is expected: another worker saw the same
    /// snapshot. The loop simply moves to the next candidate.
    async fn claim_next(&self) -> Result<Option<RequestId>, CourierError> {
        let batch = self
            .ctx
            .requests
            .list_claimable(&self.topic, self.ctx.config.claim_batch)
            .await?;

        for candidate in batch {
            if self.ctx.claims.claim(candidate.id, &self.id).await? {
                return Ok(Some(candidate.id));
            }
            debug!(worker = %self.id, id = %candidate.id, "lost claim race");
        }
        Ok(None)
    }

    /// Execute one claimed request end to end.
    async fn process(&self, id: RequestId) {
        // Re-read after the claim: the attempt counter the retry
        // decision depends on was just incremented by the claim itself.
        let request = match self.ctx.requests.get(id).await {
            Ok(r) => r,
            Err(e) => {
                warn!(worker = %self.id, %id, error = %e, "claimed request unreadable");
                return;
            }
        };

        match self.execute_with_renewal(&request).await {
            Execution::LeaseLost => {
                // The attempt is void: whoever holds the claim now owns
                // the outcome, so this worker records nothing.
                warn!(worker = %self.id, %id, "lease lost mid-execution, abandoning attempt");
            }
            Execution::Finished(Ok(result)) => {
                if self
                    .record(NewResponse::success(id, result))
                    .await
                {
                    self.finalize(id, RequestStatus::Completed).await;
                }
            }
            Execution::Finished(Err(error)) => {
                debug!(worker = %self.id, %id, %error, "processing failed");
                if !self
                    .record(NewResponse::failure(id, error.message.clone(), error.status_code()))
                    .await
                {
                    return;
                }

                let retry = error.kind == FailureKind::Transient
                    && request.attempts <= self.ctx.config.retry_limit;
                if retry {
                    match self.ctx.claims.release(id, &self.id).await {
                        Ok(true) => {
                            debug!(worker = %self.id, %id, attempt = request.attempts, "released for retry")
                        }
                        Ok(false) => {
                            warn!(worker = %self.id, %id, "claim already gone, release skipped")
                        }
                        Err(e) => warn!(worker = %self.id, %id, error = %e, "release failed"),
                    }
                } else {
                    self.finalize(id, RequestStatus::Failed).await;
                }
            }
        }
    }

    /// Run the handler while periodically renewing the lease.
    ///
    /// Renewal failures other than a lost claim are tolerated: the next
    /// tick retries, and the lease only lapses if the outage outlives
    /// the TTL.
    async fn execute_with_renewal(&self, request: &Request) -> Execution {
        let renew_every = (self.ctx.config.lease_ttl / 3).max(std::time::Duration::from_millis(10));
        let mut ticker = tokio::time::interval(renew_every);
        ticker.tick().await; // the first tick completes immediately

        let fut = self.handler.handle(&request.payload);
        tokio::pin!(fut);

        loop {
            tokio::select! {
                outcome = &mut fut => return Execution::Finished(outcome),
                _ = ticker.tick() => {
                    match self.ctx.claims.renew(request.id, &self.id).await {
                        Ok(true) => {}
                        Ok(false) => return Execution::LeaseLost,
                        Err(e) => {
                            warn!(worker = %self.id, id = %request.id, error = %e, "lease renewal failed")
                        }
                    }
                }
            }
        }
    }

    /// Append one response row; false means the attempt could not be
    /// recorded (the claim will lapse and the request gets retried).
    async fn record(&self, response: NewResponse) -> bool {
        let id = response.request_id;
        match self.ctx.responses.append(response).await {
            Ok(_) => true,
            Err(e) => {
                warn!(worker = %self.id, %id, error = %e, "recording response failed");
                false
            }
        }
    }

    async fn finalize(&self, id: RequestId, terminal: RequestStatus) {
        match self.ctx.claims.finalize(id, &self.id, terminal).await {
            Ok(()) => debug!(worker = %self.id, %id, ?terminal, "finalized"),
            Err(CourierError::StaleClaim { .. }) => {
                // Expected after a lease lapse: the new holder's outcome
                // stands and ours is ignored.
                warn!(worker = %self.id, %id, "finalize from stale claim ignored")
            }
            Err(e) => warn!(worker = %self.id, %id, error = %e, "finalize failed"),
        }
    }

    async fn pause(&self, idle_polls: u32, shutdown_rx: &mut watch::Receiver<bool>) {
        let delay = self
            .ctx
            .backoff
            .next_delay(idle_polls)
            .max(self.ctx.config.poll_interval);
        tokio::select! {
            _ = shutdown_rx.changed() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Handle to a group of workers on one topic.
///
/// Shutdown stops taking new claims; in-flight executions finish and
/// report before the task exits.
#[derive(Debug)]
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers for `topic`.
    pub fn spawn(
        n: usize,
        topic: Topic,
        handler: Arc<dyn TopicHandler>,
        ctx: WorkerContext,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for _ in 0..n {
            let worker = Worker::new(topic.clone(), Arc::clone(&handler), ctx.clone());
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                worker.run(rx).await;
            }));
        }

        Self { shutdown_tx, joins }
    }

    /// Request shutdown for all workers in the group.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::clock::SystemClock;
    use crate::domain::StatusCode;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        ctx: WorkerContext,
        topic: Topic,
    }

    fn fixture(retry_limit: u32) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let config = BrokerConfig {
            lease_ttl: Duration::from_secs(5),
            retry_limit,
            claim_batch: 8,
            poll_interval: Duration::from_millis(5),
        };
        let backoff = BackoffPolicy {
            base_delay: Duration::from_millis(5),
            multiplier: 1.0,
            max_delay: Duration::from_millis(5),
            jitter: 0.0,
        };
        let claims = Arc::new(ClaimManager::new(
            store.clone(),
            Arc::new(SystemClock),
            config.lease_ttl,
        ));
        let ctx = WorkerContext {
            requests: store.clone(),
            responses: store.clone(),
            claims,
            config,
            backoff,
        };
        Fixture {
            store,
            ctx,
            topic: Topic::new("t1").unwrap(),
        }
    }

    async fn wait_terminal(store: &MemoryStore, id: RequestId) -> RequestStatus {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let status = store.get(id).await.unwrap().status;
                if status.is_terminal() {
                    return status;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("request did not reach a terminal status")
    }

    /// Succeeds after a configured number of leading transient failures.
    struct FlakyHandler {
        remaining_failures: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakyHandler {
        fn new(failures: u32) -> Self {
            Self {
                remaining_failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl TopicHandler for FlakyHandler {
        async fn handle(
            &self,
            payload: &serde_json::Value,
        ) -> Result<serde_json::Value, ProcessingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let left = self.remaining_failures.load(Ordering::SeqCst);
            if left > 0 {
                self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ProcessingError::transient(format!("flake {call}")));
            }
            let x = payload["x"].as_i64().unwrap_or(0);
            Ok(serde_json::json!({"y": x + 1}))
        }
    }

    struct RejectingHandler;

    #[async_trait]
    impl TopicHandler for RejectingHandler {
        async fn handle(
            &self,
            payload: &serde_json::Value,
        ) -> Result<serde_json::Value, ProcessingError> {
            if payload.get("x").is_none() {
                return Err(ProcessingError::permanent("missing field x"));
            }
            Ok(serde_json::json!({"ok": true}))
        }
    }

    #[tokio::test]
    async fn submitted_request_is_claimed_executed_and_completed() {
        let f = fixture(2);
        let id = f
            .store
            .submit(f.topic.clone(), serde_json::json!({"x": 1}))
            .await
            .unwrap();

        let group = WorkerGroup::spawn(
            2,
            f.topic.clone(),
            Arc::new(FlakyHandler::new(0)),
            f.ctx.clone(),
        );

        assert_eq!(wait_terminal(&f.store, id).await, RequestStatus::Completed);
        group.shutdown_and_join().await;

        // Exactly one response row, and it is the authoritative success.
        let responses = f.store.list_for_request(id).await.unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status_code, StatusCode::Success);
        assert_eq!(responses[0].result(), Some(&serde_json::json!({"y": 2})));

        let request = f.store.get(id).await.unwrap();
        assert_eq!(request.attempts, 1);
        assert!(request.claimed_by.is_some()); // provenance of the completed attempt
    }

    #[tokio::test]
    async fn transient_failures_release_then_succeed() {
        let f = fixture(2);
        let id = f
            .store
            .submit(f.topic.clone(), serde_json::json!({"x": 41}))
            .await
            .unwrap();

        let group = WorkerGroup::spawn(
            1,
            f.topic.clone(),
            Arc::new(FlakyHandler::new(2)),
            f.ctx.clone(),
        );

        assert_eq!(wait_terminal(&f.store, id).await, RequestStatus::Completed);
        group.shutdown_and_join().await;

        // Two failed attempts plus the final success, all recorded.
        let responses = f.store.list_for_request(id).await.unwrap();
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0].status_code, StatusCode::TransientFailure);
        assert_eq!(responses[1].status_code, StatusCode::TransientFailure);
        assert_eq!(responses[2].result(), Some(&serde_json::json!({"y": 42})));

        let authoritative = f.store.latest_success(id).await.unwrap().unwrap();
        assert_eq!(authoritative.id, responses[2].id);
        assert_eq!(f.store.get(id).await.unwrap().attempts, 3);
    }

    #[tokio::test]
    async fn exhausting_the_retry_budget_finalizes_failed() {
        let f = fixture(2);
        let id = f
            .store
            .submit(f.topic.clone(), serde_json::json!({"x": 1}))
            .await
            .unwrap();

        // Always-transient handler: attempts 1 and 2 release, attempt 3
        // exceeds the budget and finalizes.
        let group = WorkerGroup::spawn(
            1,
            f.topic.clone(),
            Arc::new(FlakyHandler::new(u32::MAX)),
            f.ctx.clone(),
        );

        assert_eq!(wait_terminal(&f.store, id).await, RequestStatus::Failed);
        group.shutdown_and_join().await;

        let responses = f.store.list_for_request(id).await.unwrap();
        assert_eq!(responses.len(), 3);
        assert!(responses.iter().all(|r| !r.is_success()));
        // The last row carries the terminal error.
        assert_eq!(responses[2].error(), Some("flake 3"));
        assert!(f.store.latest_success(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn permanent_failure_skips_retries() {
        let f = fixture(5);
        let id = f
            .store
            .submit(f.topic.clone(), serde_json::json!({"wrong": true}))
            .await
            .unwrap();

        let group = WorkerGroup::spawn(1, f.topic.clone(), Arc::new(RejectingHandler), f.ctx.clone());

        assert_eq!(wait_terminal(&f.store, id).await, RequestStatus::Failed);
        group.shutdown_and_join().await;

        let responses = f.store.list_for_request(id).await.unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status_code, StatusCode::PermanentFailure);
        assert_eq!(responses[0].error(), Some("missing field x"));
    }

    #[tokio::test]
    async fn a_failing_request_does_not_block_the_next_one() {
        let f = fixture(0);
        let bad = f
            .store
            .submit(f.topic.clone(), serde_json::json!({"wrong": true}))
            .await
            .unwrap();
        let good = f
            .store
            .submit(f.topic.clone(), serde_json::json!({"x": 7}))
            .await
            .unwrap();

        let group = WorkerGroup::spawn(1, f.topic.clone(), Arc::new(RejectingHandler), f.ctx.clone());

        assert_eq!(wait_terminal(&f.store, bad).await, RequestStatus::Failed);
        assert_eq!(wait_terminal(&f.store, good).await, RequestStatus::Completed);
        group.shutdown_and_join().await;

        let counts = f.store.status_counts().await.unwrap();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.completed, 1);
    }

    #[tokio::test]
    async fn workers_on_another_topic_leave_requests_alone() {
        let f = fixture(2);
        let other = Topic::new("t2").unwrap();
        let id = f
            .store
            .submit(other, serde_json::json!({"x": 1}))
            .await
            .unwrap();

        let group = WorkerGroup::spawn(
            2,
            f.topic.clone(),
            Arc::new(FlakyHandler::new(0)),
            f.ctx.clone(),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        group.shutdown_and_join().await;

        assert_eq!(f.store.get(id).await.unwrap().status, RequestStatus::Pending);
    }
}
