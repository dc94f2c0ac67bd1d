use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::AppError;

use super::behavior::{Behavior, Next, RequestContext, RequestKind};

/// First in the fixed pipeline order (spec §4.7): if `ctx.validation_error` was already
/// populated by `Mediator::send`/`query` before the chain started, refuses to call `next` at
/// all, so no logging/metrics/performance accounting and no terminal handler ever see an
/// invalid request.
pub struct ValidationBehavior;

#[async_trait]
impl Behavior for ValidationBehavior {
    async fn handle(&self, ctx: Arc<RequestContext>, next: Next) -> Result<JsonValue, AppError> {
        if let Some(message) = &ctx.validation_error {
            return Err(AppError::validation(message.clone()));
        }
        next().await
    }
}

/// Second in the pipeline. Grounded on `websocket/events/middleware.rs`'s `LoggingMiddleware`:
/// logs before dispatch and again on completion, with failure logged at `warn` rather than
/// propagated (logging must never change the outcome of a request).
pub struct LoggingBehavior;

#[async_trait]
impl Behavior for LoggingBehavior {
    async fn handle(&self, ctx: Arc<RequestContext>, next: Next) -> Result<JsonValue, AppError> {
        info!(
            correlation_id = %ctx.correlation_id,
            request_type = ctx.request_type,
            kind = ?ctx.kind,
            "dispatching request"
        );

        let result = next().await;

        match &result {
            Ok(_) => info!(
                correlation_id = %ctx.correlation_id,
                request_type = ctx.request_type,
                elapsed_ms = ctx.started_at.elapsed().as_millis() as u64,
                "request completed"
            ),
            Err(err) => warn!(
                correlation_id = %ctx.correlation_id,
                request_type = ctx.request_type,
                elapsed_ms = ctx.started_at.elapsed().as_millis() as u64,
                error = %err,
                "request failed"
            ),
        }

        result
    }
}

/// Running per-request-type counters, third in the pipeline. The moving-average technique
/// mirrors `websocket/events/types.rs`'s `EventMetrics::update_processing_time`.
#[derive(Debug, Default, Clone)]
pub struct RequestTypeMetrics {
    pub total: u64,
    pub failed: u64,
    pub average_latency_ms: f64,
}

#[derive(Default)]
pub struct MetricsBehavior {
    counters: RwLock<HashMap<&'static str, RequestTypeMetrics>>,
}

impl MetricsBehavior {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self, request_type: &str) -> Option<RequestTypeMetrics> {
        self.counters.read().await.get(request_type).cloned()
    }
}

#[async_trait]
impl Behavior for MetricsBehavior {
    async fn handle(&self, ctx: Arc<RequestContext>, next: Next) -> Result<JsonValue, AppError> {
        let result = next().await;
        let elapsed_ms = ctx.started_at.elapsed().as_millis() as u64;

        let mut counters = self.counters.write().await;
        let entry = counters.entry(ctx.request_type).or_default();
        entry.total += 1;
        if result.is_err() {
            entry.failed += 1;
        }
        entry.average_latency_ms = if entry.total == 1 {
            elapsed_ms as f64
        } else {
            (entry.average_latency_ms * (entry.total - 1) as f64 + elapsed_ms as f64) / entry.total as f64
        };

        result
    }
}

/// Last in the pipeline, wrapping the terminal handler most tightly. Grounded on
/// `websocket/events/middleware.rs`'s `PerformanceMiddleware`: warns once per request that
/// crosses its kind's threshold (spec §4.7: 500 ms for commands, 200 ms for queries), distinct
/// from `MetricsBehavior`'s per-type running average.
pub struct PerformanceBehavior {
    command_threshold_ms: u64,
    query_threshold_ms: u64,
}

impl PerformanceBehavior {
    pub fn new(command_threshold_ms: u64, query_threshold_ms: u64) -> Self {
        Self {
            command_threshold_ms,
            query_threshold_ms,
        }
    }

    fn threshold_for(&self, kind: RequestKind) -> u64 {
        match kind {
            RequestKind::Command => self.command_threshold_ms,
            RequestKind::Query => self.query_threshold_ms,
        }
    }
}

#[async_trait]
impl Behavior for PerformanceBehavior {
    async fn handle(&self, ctx: Arc<RequestContext>, next: Next) -> Result<JsonValue, AppError> {
        let result = next().await;
        let elapsed_ms = ctx.started_at.elapsed().as_millis() as u64;
        let threshold_ms = self.threshold_for(ctx.kind);

        if elapsed_ms > threshold_ms {
            warn!(
                correlation_id = %ctx.correlation_id,
                request_type = ctx.request_type,
                kind = ?ctx.kind,
                elapsed_ms,
                threshold_ms,
                "slow request"
            );
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use uuid::Uuid;

    fn ctx(validation_error: Option<String>) -> Arc<RequestContext> {
        Arc::new(RequestContext {
            correlation_id: Uuid::new_v4(),
            request_type: "CreateNode",
            kind: super::super::behavior::RequestKind::Command,
            started_at: Instant::now(),
            validation_error,
        })
    }

    fn ok_next() -> Next {
        Box::new(|| Box::pin(async { Ok(serde_json::json!({"ok": true})) }))
    }

    #[tokio::test]
    async fn validation_behavior_short_circuits_on_error() {
        let behavior = ValidationBehavior;
        let result = behavior.handle(ctx(Some("title required".to_string())), ok_next()).await;
        assert!(matches!(result, Err(AppError::Validation { .. })));
    }

    #[tokio::test]
    async fn validation_behavior_passes_through_when_clean() {
        let behavior = ValidationBehavior;
        let result = behavior.handle(ctx(None), ok_next()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn metrics_behavior_tracks_count_and_failures() {
        let behavior = MetricsBehavior::new();
        behavior.handle(ctx(None), ok_next()).await.unwrap();
        let failing_next: Next = Box::new(|| Box::pin(async { Err(AppError::internal("boom")) }));
        let _ = behavior.handle(ctx(None), failing_next).await;

        let stats = behavior.snapshot("CreateNode").await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn performance_behavior_passes_result_through_unchanged() {
        let behavior = PerformanceBehavior::new(10_000, 10_000);
        let result = behavior.handle(ctx(None), ok_next()).await.unwrap();
        assert_eq!(result["ok"], true);
    }

    fn query_ctx() -> Arc<RequestContext> {
        Arc::new(RequestContext {
            correlation_id: Uuid::new_v4(),
            request_type: "GetGraphStats",
            kind: RequestKind::Query,
            started_at: Instant::now() - std::time::Duration::from_millis(300),
            validation_error: None,
        })
    }

    #[tokio::test]
    async fn performance_behavior_uses_query_threshold_for_queries() {
        let behavior = PerformanceBehavior::new(500, 200);
        // 300ms elapsed exceeds the 200ms query threshold but not the 500ms command threshold;
        // the behavior itself doesn't control elapsed time, so this only checks threshold
        // selection doesn't panic and still returns the inner result.
        let result = behavior.handle(query_ctx(), ok_next()).await.unwrap();
        assert_eq!(result["ok"], true);
    }
}
