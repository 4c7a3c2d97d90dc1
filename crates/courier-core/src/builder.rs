//! Broker construction and wiring.

use std::sync::Arc;

use crate::backoff::BackoffPolicy;
use crate::claim::ClaimManager;
use crate::clock::{Clock, SystemClock};
use crate::config::BrokerConfig;
use crate::domain::{CourierError, Request, RequestId, Response, Topic};
use crate::handler::{HandlerRegistry, TopicHandler};
use crate::observability::StatusCounts;
use crate::reaper::{LeaseReaper, ReaperHandle};
use crate::store::{MemoryStore, RequestStore, ResponseStore};
use crate::worker::{WorkerContext, WorkerGroup};

/// Builds a [`Broker`].
///
/// # Fail-fast design
/// `expect_topics()` declares the topics the deployment is supposed to
/// serve; `build*()` checks the expected set is covered by registered
/// handlers and fails with a clear error instead of letting requests
/// sit unclaimed at runtime.
///
/// # Example
/// ```ignore
/// let broker = BrokerBuilder::new()
///     .register("reports", Arc::new(ReportHandler))?
///     .expect_topics(&["reports"])?
///     .build_in_memory()?;
/// ```
pub struct BrokerBuilder {
    registry: HandlerRegistry,
    expected_topics: Option<Vec<Topic>>,
    config: BrokerConfig,
    backoff: BackoffPolicy,
    clock: Arc<dyn Clock>,
}

/// Broker construction error.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing handlers for expected topics: {0:?}")]
    MissingTopics(Vec<String>),

    #[error(transparent)]
    Courier(#[from] CourierError),
}

impl BrokerBuilder {
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            expected_topics: None,
            config: BrokerConfig::default(),
            backoff: BackoffPolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Register a handler for a topic.
    pub fn register(
        mut self,
        topic: &str,
        handler: Arc<dyn TopicHandler>,
    ) -> Result<Self, CourierError> {
        self.registry.register(Topic::new(topic)?, handler)?;
        Ok(self)
    }

    /// Declare the topics this deployment must be able to serve.
    pub fn expect_topics(mut self, topics: &[&str]) -> Result<Self, CourierError> {
        let mut expected = Vec::with_capacity(topics.len());
        for &topic in topics {
            expected.push(Topic::new(topic)?);
        }
        self.expected_topics = Some(expected);
        Ok(self)
    }

    pub fn config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build against an in-memory store (tests, demos).
    pub fn build_in_memory(self) -> Result<Broker, BuildError> {
        let store = Arc::new(MemoryStore::with_clock(self.clock.clone()));
        self.build_with(store.clone(), store)
    }

    /// Build against externally-provided stores.
    pub fn build_with(
        self,
        requests: Arc<dyn RequestStore>,
        responses: Arc<dyn ResponseStore>,
    ) -> Result<Broker, BuildError> {
        if let Some(expected) = &self.expected_topics {
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| self.registry.get(t).is_none())
                .map(|t| t.as_str().to_string())
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTopics(missing));
            }
        }

        let claims = Arc::new(ClaimManager::new(
            requests.clone(),
            self.clock.clone(),
            self.config.lease_ttl,
        ));
        Ok(Broker {
            requests,
            responses,
            claims,
            registry: Arc::new(self.registry),
            config: self.config,
            backoff: self.backoff,
            clock: self.clock,
        })
    }
}

impl Default for BrokerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A wired broker: stores, claim manager, and handler registry.
///
/// Producers talk to `submit`/`get`/`responses`; operators spawn worker
/// groups and the reaper from here.
pub struct Broker {
    requests: Arc<dyn RequestStore>,
    responses: Arc<dyn ResponseStore>,
    claims: Arc<ClaimManager>,
    registry: Arc<HandlerRegistry>,
    config: BrokerConfig,
    backoff: BackoffPolicy,
    clock: Arc<dyn Clock>,
}

impl Broker {
    /// Submit a request; returns its id.
    pub async fn submit(
        &self,
        topic: &str,
        payload: serde_json::Value,
    ) -> Result<RequestId, CourierError> {
        self.requests.submit(Topic::new(topic)?, payload).await
    }

    /// Submit from raw text, validating topic and payload first.
    pub async fn submit_raw(&self, topic: &str, payload: &str) -> Result<RequestId, CourierError> {
        self.requests.submit_raw(topic, payload).await
    }

    pub async fn get(&self, id: RequestId) -> Result<Request, CourierError> {
        self.requests.get(id).await
    }

    pub async fn responses(&self, id: RequestId) -> Result<Vec<Response>, CourierError> {
        self.responses.list_for_request(id).await
    }

    /// The authoritative (most recent successful) response.
    pub async fn latest_success(&self, id: RequestId) -> Result<Option<Response>, CourierError> {
        self.responses.latest_success(id).await
    }

    pub async fn status_counts(&self) -> Result<StatusCounts, CourierError> {
        self.requests.status_counts().await
    }

    /// Spawn `n` workers for a registered topic.
    pub fn spawn_workers(&self, topic: &str, n: usize) -> Result<WorkerGroup, CourierError> {
        let topic = Topic::new(topic)?;
        let handler = self
            .registry
            .get(&topic)
            .cloned()
            .ok_or_else(|| CourierError::HandlerNotFound(topic.clone()))?;
        Ok(WorkerGroup::spawn(n, topic, handler, self.worker_context()))
    }

    /// Spawn the lease reaper, sweeping at the given interval.
    pub fn spawn_reaper(&self, interval: std::time::Duration) -> ReaperHandle {
        ReaperHandle::spawn(LeaseReaper::new(
            self.claims.clone(),
            self.clock.clone(),
            interval,
        ))
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            requests: self.requests.clone(),
            responses: self.responses.clone(),
            claims: self.claims.clone(),
            config: self.config.clone(),
            backoff: self.backoff.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ProcessingError;
    use async_trait::async_trait;

    struct EchoHandler;

    #[async_trait]
    impl TopicHandler for EchoHandler {
        async fn handle(
            &self,
            payload: &serde_json::Value,
        ) -> Result<serde_json::Value, ProcessingError> {
            Ok(payload.clone())
        }
    }

    #[test]
    fn build_succeeds_when_expected_topics_are_covered() {
        let broker = BrokerBuilder::new()
            .register("reports", Arc::new(EchoHandler))
            .unwrap()
            .expect_topics(&["reports"])
            .unwrap()
            .build_in_memory();
        assert!(broker.is_ok());
    }

    #[test]
    fn build_fails_on_missing_expected_topic() {
        let result = BrokerBuilder::new()
            .register("reports", Arc::new(EchoHandler))
            .unwrap()
            .expect_topics(&["reports", "exports"])
            .unwrap()
            .build_in_memory();
        assert!(matches!(
            result,
            Err(BuildError::MissingTopics(missing)) if missing == vec!["exports".to_string()]
        ));
    }

    #[test]
    fn build_without_expectations_is_fine() {
        let broker = BrokerBuilder::new()
            .register("reports", Arc::new(EchoHandler))
            .unwrap()
            .build_in_memory();
        assert!(broker.is_ok());
    }

    #[tokio::test]
    async fn spawning_workers_for_an_unregistered_topic_fails() {
        let broker = BrokerBuilder::new().build_in_memory().unwrap();
        let err = broker.spawn_workers("nowhere", 1).unwrap_err();
        assert!(matches!(err, CourierError::HandlerNotFound(_)));
    }

    #[tokio::test]
    async fn broker_round_trip_through_workers() {
        let broker = BrokerBuilder::new()
            .register("echo", Arc::new(EchoHandler))
            .unwrap()
            .build_in_memory()
            .unwrap();

        let id = broker
            .submit("echo", serde_json::json!({"x": 1}))
            .await
            .unwrap();
        let group = broker.spawn_workers("echo", 1).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if broker.get(id).await.unwrap().status.is_terminal() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        group.shutdown_and_join().await;

        let authoritative = broker.latest_success(id).await.unwrap().unwrap();
        assert_eq!(authoritative.result(), Some(&serde_json::json!({"x": 1})));
        assert_eq!(broker.status_counts().await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn submit_validates_topic_and_payload() {
        let broker = BrokerBuilder::new().build_in_memory().unwrap();

        let err = broker.submit("", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, CourierError::Validation(_)));

        let err = broker.submit_raw("t", "{not json").await.unwrap_err();
        assert!(matches!(err, CourierError::Validation(_)));
    }
}
