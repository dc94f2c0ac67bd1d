use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::domain::DomainEvent;

use super::projection::ProjectionRegistry;

/// Tally returned to the caller of `dispatch_batch_local` for telemetry only; the remote
/// publisher never sees it (spec §4.4).
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalDispatchSummary {
    pub successes: usize,
    pub failures: usize,
}

/// Thin adapter around the handler/projection registry. `dispatch_local` forwards to the
/// registry, logs duration, and **always returns success to its caller** — a local projection
/// failure must never abort remote publication (spec §4.4). Structurally similar to
/// `websocket/retry_timeout.rs`'s "log and continue" error handling style.
pub struct LocalDispatcher {
    registry: Arc<ProjectionRegistry>,
}

impl LocalDispatcher {
    pub fn new(registry: Arc<ProjectionRegistry>) -> Self {
        Self { registry }
    }

    pub async fn dispatch_local(&self, event: &dyn DomainEvent) {
        let started = Instant::now();
        let result = self.registry.dispatch(event).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => debug!(event_type = event.event_type(), elapsed_ms, "local dispatch ok"),
            Err(err) => warn!(
                event_type = event.event_type(),
                elapsed_ms,
                error = %err,
                "local dispatch failed; continuing with remote publish regardless"
            ),
        }
    }

    pub async fn dispatch_batch_local(&self, events: &[Box<dyn DomainEvent>]) -> LocalDispatchSummary {
        let mut summary = LocalDispatchSummary::default();
        for event in events {
            let started = Instant::now();
            match self.registry.dispatch(event.as_ref()).await {
                Ok(()) => summary.successes += 1,
                Err(err) => {
                    summary.failures += 1;
                    warn!(
                        event_type = event.event_type(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        error = %err,
                        "local dispatch failed in batch; continuing"
                    );
                }
            }
        }
        summary
    }
}
