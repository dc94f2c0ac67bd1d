//! Mediator and fixed behavior pipeline (spec §4.7): every command or query dispatch runs
//! through `ValidationBehavior -> LoggingBehavior -> MetricsBehavior -> PerformanceBehavior`
//! before reaching its terminal handler. The order is fixed, not configurable priority, unlike
//! `websocket/events/middleware.rs`'s `MiddlewareChain::add` which sorts by priority on insert.

pub mod behavior;
pub mod behaviors;

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::AppError;

pub use behavior::{Behavior, Next, RequestContext, RequestKind};
pub use behaviors::{LoggingBehavior, MetricsBehavior, PerformanceBehavior, ValidationBehavior};

/// A command mutates an aggregate and, through its handler, ends at `execute_command`, which
/// produces domain events. `validate` runs synchronously before the behavior chain even starts
/// so `ValidationBehavior` can fail fast with no side effect at all (spec §4.7, §8).
pub trait Command: Send + 'static {
    type Response: Serialize + DeserializeOwned + Send + 'static;

    const REQUEST_TYPE: &'static str;

    fn validate(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// A query never produces events; it only reads.
pub trait Query: Send + 'static {
    type Response: Serialize + DeserializeOwned + Send + 'static;

    const REQUEST_TYPE: &'static str;

    fn validate(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[async_trait::async_trait]
pub trait CommandHandler<C: Command>: Send + Sync {
    async fn handle(&self, command: C) -> Result<C::Response, AppError>;
}

#[async_trait::async_trait]
pub trait QueryHandler<Q: Query>: Send + Sync {
    async fn handle(&self, query: Q) -> Result<Q::Response, AppError>;
}

/// Owns the fixed behavior chain and wraps every `send`/`query` call in it. Behaviors are
/// stored as `Arc<dyn Behavior>` built once at startup (spec §4.7 "registered once, in fixed
/// order"); `Mediator` itself holds no per-request-type state, the behaviors do.
pub struct Mediator {
    behaviors: Vec<Arc<dyn Behavior>>,
}

impl Mediator {
    /// Builds the pipeline in the spec's fixed order. Callers do not choose the order; they
    /// only supply the configured instances (e.g. a `PerformanceBehavior` with a tuned
    /// threshold).
    pub fn new(
        validation: Arc<ValidationBehavior>,
        logging: Arc<LoggingBehavior>,
        metrics: Arc<MetricsBehavior>,
        performance: Arc<PerformanceBehavior>,
    ) -> Self {
        Self {
            behaviors: vec![validation, logging, metrics, performance],
        }
    }

    fn build_chain(&self, ctx: Arc<RequestContext>, terminal: Next) -> Next {
        let mut chain = terminal;
        for behavior in self.behaviors.iter().rev() {
            let behavior = behavior.clone();
            let ctx = ctx.clone();
            let inner = chain;
            chain = Box::new(move || Box::pin(async move { behavior.handle(ctx, inner).await }));
        }
        chain
    }

    pub async fn send<C>(&self, command: C, handler: Arc<dyn CommandHandler<C>>) -> Result<C::Response, AppError>
    where
        C: Command,
    {
        let validation_error = command.validate().err().map(|e| e.to_string());
        let ctx = Arc::new(RequestContext {
            correlation_id: Uuid::new_v4(),
            request_type: C::REQUEST_TYPE,
            kind: RequestKind::Command,
            started_at: Instant::now(),
            validation_error,
        });

        let terminal: Next = Box::new(move || {
            Box::pin(async move {
                let response = handler.handle(command).await?;
                serde_json::to_value(response).map_err(|e| AppError::internal(e.to_string()))
            })
        });

        let value = self.build_chain(ctx, terminal)().await?;
        serde_json::from_value(value).map_err(|e| AppError::internal(e.to_string()))
    }

    pub async fn query<Q>(&self, query: Q, handler: Arc<dyn QueryHandler<Q>>) -> Result<Q::Response, AppError>
    where
        Q: Query,
    {
        let validation_error = query.validate().err().map(|e| e.to_string());
        let ctx = Arc::new(RequestContext {
            correlation_id: Uuid::new_v4(),
            request_type: Q::REQUEST_TYPE,
            kind: RequestKind::Query,
            started_at: Instant::now(),
            validation_error,
        });

        let terminal: Next = Box::new(move || {
            Box::pin(async move {
                let response = handler.handle(query).await?;
                serde_json::to_value(response).map_err(|e| AppError::internal(e.to_string()))
            })
        });

        let value = self.build_chain(ctx, terminal)().await?;
        serde_json::from_value(value).map_err(|e| AppError::internal(e.to_string()))
    }
}
