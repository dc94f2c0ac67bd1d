use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::event::EventEnvelope;
use crate::error::AppError;

/// Remote publisher port (spec §4.5). Intentionally has no subscribe/unsubscribe: subscriptions
/// are an infrastructure concern managed outside the process.
#[async_trait]
pub trait RemotePublisherPort: Send + Sync {
    /// Publishes `envelopes`, batching internally at up to the implementation's configured
    /// maximum per request and retrying retryable failures with exponential backoff.
    async fn publish_batch(&self, envelopes: Vec<EventEnvelope>) -> Result<(), AppError>;
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

/// HTTP adapter (spec §4.5 "Adapter (ADDED)"). No EventBridge SDK crate exists anywhere in the
/// examples corpus (every `Cargo.toml` under `examples/` was checked); posts each batch as a
/// JSON array of wire envelopes to a configured webhook endpoint via `reqwest::Client`, batched
/// at `batch_max` per request and retried on retryable failures with the same
/// `initial_delay_ms` -> double -> min-cap structure as
/// `websocket/retry_timeout.rs`'s `RetryTimeoutManager::execute_with_retry`.
pub struct HttpRemotePublisher {
    client: reqwest::Client,
    endpoint: String,
    batch_max: usize,
    retry_max: u32,
    backoff_initial: Duration,
}

impl HttpRemotePublisher {
    pub fn new(endpoint: String, batch_max: usize, retry_max: u32, backoff_initial: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            batch_max,
            retry_max,
            backoff_initial,
        }
    }

    async fn publish_chunk(&self, chunk: &[EventEnvelope]) -> Result<(), AppError> {
        let mut delay = self.backoff_initial;

        for attempt in 0..=self.retry_max {
            let response = self.client.post(&self.endpoint).json(chunk).send().await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    if attempt > 0 {
                        info!(attempt, "remote publish succeeded after retry");
                    }
                    return Ok(());
                }
                Ok(resp) if is_retryable_status(resp.status()) => {
                    warn!(status = %resp.status(), attempt, "remote publish retryable failure");
                }
                Ok(resp) => {
                    return Err(AppError::PublishFatal(format!(
                        "remote bus rejected batch with status {}",
                        resp.status()
                    )));
                }
                Err(err) if err.is_timeout() || err.is_connect() => {
                    warn!(error = %err, attempt, "remote publish transport failure, retrying");
                }
                Err(err) => {
                    return Err(AppError::PublishFatal(format!(
                        "remote publish failed: {err}"
                    )));
                }
            }

            if attempt < self.retry_max {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(AppError::PublishFatal(format!(
            "remote publish exhausted {} retries",
            self.retry_max
        )))
    }
}

#[async_trait]
impl RemotePublisherPort for HttpRemotePublisher {
    async fn publish_batch(&self, envelopes: Vec<EventEnvelope>) -> Result<(), AppError> {
        for chunk in envelopes.chunks(self.batch_max) {
            self.publish_chunk(chunk).await?;
        }
        Ok(())
    }
}

/// No-op in-memory adapter backing tests: captures published batches and can be told to fail
/// the next N attempts (spec §8 scenario 4: "remote bus flakes then succeeds").
#[derive(Default)]
pub struct InMemoryRemotePublisher {
    batches: Mutex<Vec<Vec<EventEnvelope>>>,
    fail_next: AtomicUsize,
}

impl InMemoryRemotePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_n_attempts(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn published_batches(&self) -> Vec<Vec<EventEnvelope>> {
        self.batches.lock().unwrap().clone()
    }

}

#[async_trait]
impl RemotePublisherPort for InMemoryRemotePublisher {
    async fn publish_batch(&self, envelopes: Vec<EventEnvelope>) -> Result<(), AppError> {
        if self.fail_next.load(Ordering::SeqCst) > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            return Err(AppError::PublishRetryable("simulated transient failure".to_string()));
        }
        self.batches.lock().unwrap().push(envelopes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::EventDetail;
    use chrono::Utc;
    use uuid::Uuid;

    fn envelope() -> EventEnvelope {
        EventEnvelope {
            source: "knowledge-graph.core".to_string(),
            detail_type: "NodeCreated".to_string(),
            resources: vec![Uuid::new_v4().to_string()],
            detail: EventDetail {
                event_id: Uuid::new_v4(),
                aggregate_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                event_type: "NodeCreated".to_string(),
                occurred_at: Utc::now(),
                version: 1,
                payload: serde_json::json!({}),
            },
        }
    }

    #[tokio::test]
    async fn in_memory_publisher_records_published_batches() {
        let publisher = InMemoryRemotePublisher::new();
        publisher.publish_batch(vec![envelope()]).await.unwrap();
        assert_eq!(publisher.published_batches().len(), 1);
    }

    #[tokio::test]
    async fn in_memory_publisher_flakes_then_succeeds() {
        let publisher = InMemoryRemotePublisher::new();
        publisher.fail_next_n_attempts(1);

        let first = publisher.publish_batch(vec![envelope()]).await;
        assert!(first.is_err());

        let second = publisher.publish_batch(vec![envelope()]).await;
        assert!(second.is_ok());
        assert_eq!(publisher.published_batches().len(), 1);
    }
}
