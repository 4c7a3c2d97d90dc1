//! End-to-end demo: in-memory broker, one flaky topic handler, two
//! workers and a lease reaper racing over a handful of requests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use courier_core::builder::BrokerBuilder;
use courier_core::config::BrokerConfig;
use courier_core::handler::{ProcessingError, TopicHandler};

#[derive(Debug, Deserialize)]
struct ReportPayload {
    x: i64,
}

/// Fails transiently a configured number of times, then succeeds.
struct ReportHandler {
    remaining_failures: AtomicU32,
}

impl ReportHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl TopicHandler for ReportHandler {
    async fn handle(
        &self,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, ProcessingError> {
        let p: ReportPayload = serde_json::from_value(payload.clone())
            .map_err(|e| ProcessingError::permanent(format!("payload decode: {e}")))?;

        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(ProcessingError::transient(format!(
                "intentional failure (left={left})"
            )));
        }

        Ok(serde_json::json!({ "y": p.x + 1 }))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // (A) Wire the broker: short leases and a tight poll so the demo
    // finishes quickly.
    let broker = BrokerBuilder::new()
        .register("reports", Arc::new(ReportHandler::new(2)))?
        .expect_topics(&["reports"])?
        .config(BrokerConfig {
            lease_ttl: Duration::from_secs(2),
            retry_limit: 3,
            claim_batch: 8,
            poll_interval: Duration::from_millis(50),
        })
        .build_in_memory()?;

    // (B) Two workers race for the topic; the reaper covers crashes.
    let workers = broker.spawn_workers("reports", 2)?;
    let reaper = broker.spawn_reaper(Duration::from_millis(500));

    // (C) Submit a few requests, one of them from raw text.
    let mut ids = Vec::new();
    for x in 1..=3 {
        ids.push(broker.submit("reports", serde_json::json!({ "x": x })).await?);
    }
    ids.push(broker.submit_raw("reports", r#"{"x": 40}"#).await?);
    tracing::info!(count = ids.len(), "requests submitted");

    // (D) Poll until every request reaches a terminal status.
    for id in &ids {
        loop {
            let request = broker.get(*id).await?;
            if request.status.is_terminal() {
                let result = broker
                    .latest_success(*id)
                    .await?
                    .and_then(|r| r.result().cloned());
                println!(
                    "{id}: status={:?} attempts={} result={result:?}",
                    request.status, request.attempts
                );
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
    }

    println!("counts: {:?}", broker.status_counts().await?);

    workers.shutdown_and_join().await;
    reaper.shutdown_and_join().await;
    Ok(())
}
