use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::warn;

use crate::domain::DomainEvent;
use crate::error::AppError;

use super::checkpoint_store::{CheckpointStorePort, ProjectionCheckpoint};
use super::handler::EventHandler;
use super::registry::HandlerRegistry;

/// Hook every projection implements in addition to `EventHandler`: a stable name the registry
/// keys checkpoints/stats on, and a reset hook `ResetProjection` calls before zeroing state.
/// Kept as a standalone trait (rather than a supertrait of `EventHandler`) so registration can
/// build two independent trait-object `Arc`s from one concrete type without relying on trait
/// upcasting.
#[async_trait]
pub trait Projection: Send + Sync {
    /// Must match the same projection's `EventHandler::name()`.
    fn projection_name(&self) -> &'static str;

    /// Called by `ResetProjection` before its checkpoint is deleted and stats zeroed. A
    /// projection that caches nothing beyond the checkpoint can leave this a no-op.
    async fn reset(&self) -> Result<(), AppError>;
}

/// Events processed, error count, moving-average latency, and last event timestamp for one
/// projection. The moving-average technique mirrors
/// `websocket/events/types.rs`'s `EventMetrics::record_success`.
#[derive(Debug, Default, Clone)]
pub struct ProjectionStats {
    pub events_processed: u64,
    pub error_count: u64,
    pub average_latency_ms: f64,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl ProjectionStats {
    fn record(&mut self, latency_ms: u64, succeeded: bool, at: DateTime<Utc>) {
        self.events_processed += 1;
        if !succeeded {
            self.error_count += 1;
        }
        if self.events_processed == 1 {
            self.average_latency_ms = latency_ms as f64;
        } else {
            self.average_latency_ms = (self.average_latency_ms * (self.events_processed - 1) as f64
                + latency_ms as f64)
                / self.events_processed as f64;
        }
        self.last_event_at = Some(at);
    }
}

/// Specialization of `HandlerRegistry` (spec §4.3): wraps the same priority-ordered dispatch but
/// additionally tracks per-projection stats and, when a checkpoint store is configured, persists
/// `(projection_name, last_event_id, now)` after each projection handler succeeds. Checkpoint
/// write failures are logged and never fail dispatch.
pub struct ProjectionRegistry {
    inner: HandlerRegistry,
    projections: RwLock<HashMap<String, Arc<dyn Projection>>>,
    stats: RwLock<HashMap<String, ProjectionStats>>,
    checkpoint_store: Option<Arc<dyn CheckpointStorePort>>,
    handler_timeout: Duration,
}

impl ProjectionRegistry {
    pub fn new(checkpoint_store: Option<Arc<dyn CheckpointStorePort>>) -> Self {
        Self {
            inner: HandlerRegistry::new(),
            projections: RwLock::new(HashMap::new()),
            stats: RwLock::new(HashMap::new()),
            checkpoint_store,
            handler_timeout: super::registry::DEFAULT_HANDLER_TIMEOUT,
        }
    }

    /// Same as `new`, but with the process-wide per-handler deadline set from
    /// `EventingConfig.handler_timeout` (spec §6 `handler.timeout`) instead of the hardcoded
    /// default.
    pub fn with_handler_timeout(
        checkpoint_store: Option<Arc<dyn CheckpointStorePort>>,
        handler_timeout: Duration,
    ) -> Self {
        Self {
            inner: HandlerRegistry::with_handler_timeout(handler_timeout),
            projections: RwLock::new(HashMap::new()),
            stats: RwLock::new(HashMap::new()),
            checkpoint_store,
            handler_timeout,
        }
    }

    pub async fn register<H>(&self, event_types: &[&str], handler: Arc<H>) -> Result<(), AppError>
    where
        H: EventHandler + Projection + 'static,
    {
        let as_handler: Arc<dyn EventHandler> = handler.clone();
        self.inner.register(event_types, as_handler).await?;

        let name = handler.projection_name().to_string();
        let as_projection: Arc<dyn Projection> = handler;
        self.projections.write().await.insert(name.clone(), as_projection);
        self.stats.write().await.entry(name).or_default();
        Ok(())
    }

    pub async fn dispatch(&self, event: &dyn DomainEvent) -> Result<(), AppError> {
        let event_type = event.event_type();
        let handlers = self.inner.snapshot(event_type).await;

        if handlers.is_empty() {
            return Ok(());
        }

        let mut successes = 0usize;
        let mut last_error: Option<AppError> = None;

        for handler in &handlers {
            let started = Instant::now();
            let outcome = tokio::time::timeout(self.handler_timeout, handler.handle(event)).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let now = Utc::now();

            let succeeded = matches!(outcome, Ok(Ok(())));
            if succeeded {
                successes += 1;
            } else {
                last_error = Some(match &outcome {
                    Ok(Err(err)) => AppError::HandlerFailure {
                        handler: handler.name().to_string(),
                        message: err.to_string(),
                    },
                    _ => AppError::Timeout {
                        operation: format!("projection:{}", handler.name()),
                        elapsed_ms,
                    },
                });
                warn!(
                    handler = handler.name(),
                    event_type,
                    elapsed_ms,
                    "projection handler failed"
                );
            }

            if let Some(projection) = self.projections.read().await.get(handler.name()).cloned() {
                {
                    let mut stats = self.stats.write().await;
                    stats
                        .entry(projection.projection_name().to_string())
                        .or_default()
                        .record(elapsed_ms, succeeded, now);
                }

                if succeeded {
                    if let Some(store) = &self.checkpoint_store {
                        let checkpoint = ProjectionCheckpoint {
                            projection_name: projection.projection_name().to_string(),
                            last_event_id: event.event_id(),
                            updated_at: now,
                        };
                        if let Err(err) = store.save_position(checkpoint).await {
                            warn!(
                                projection = projection.projection_name(),
                                error = %err,
                                "checkpoint write failed"
                            );
                        }
                    }
                }
            }
        }

        if successes > 0 {
            return Ok(());
        }

        Err(AppError::DispatchAggregateFailure {
            event_type: event_type.to_string(),
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no handlers produced a result".to_string()),
        })
    }

    pub async fn stats(&self, projection_name: &str) -> Option<ProjectionStats> {
        self.stats.read().await.get(projection_name).cloned()
    }

    /// Calls the projection's reset hook, deletes its checkpoint, and zeroes its stats.
    pub async fn reset_projection(&self, projection_name: &str) -> Result<(), AppError> {
        let projection = self
            .projections
            .read()
            .await
            .get(projection_name)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("projection {projection_name}")))?;

        projection.reset().await?;

        if let Some(store) = &self.checkpoint_store {
            store.delete_position(projection_name).await?;
        }

        self.stats
            .write()
            .await
            .insert(projection_name.to_string(), ProjectionStats::default());
        Ok(())
    }
}
