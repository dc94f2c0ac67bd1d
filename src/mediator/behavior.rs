use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::AppError;

/// Which side of the mediator a request came in on. Commands are expected to mutate an
/// aggregate and produce events; queries never do (spec §4.7) — the distinction is advisory
/// here, enforced by which terminal handler the caller wires in, not by the pipeline itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Command,
    Query,
}

/// Per-call metadata threaded through the behavior chain. `validation_error` is populated by
/// `Mediator::send`/`Mediator::query` before the chain runs (it already has the concrete,
/// typed request in hand) so `ValidationBehavior` can fail fast without itself needing to know
/// the request's concrete type.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: Uuid,
    pub request_type: &'static str,
    pub kind: RequestKind,
    pub started_at: Instant,
    pub validation_error: Option<String>,
}

/// The remainder of the pipeline, captured as a one-shot continuation. Behaviors call it at
/// most once; calling it zero times short-circuits the chain (used by `ValidationBehavior`).
pub type Next = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Result<JsonValue, AppError>> + Send>> + Send>;

/// Cross-cutting wrapper around a command or query dispatch (spec §4.7 "Behavior trait shape
/// (ADDED)"). Collapsed from `websocket/events/middleware.rs`'s separate `EventMiddleware`
/// before/after/on_error hooks into a single around-style method, because `ValidationBehavior`
/// must be able to refuse to call `next` at all — a before-hook that merely returns an error
/// code can't prevent a then-unconditional after-hook from firing.
#[async_trait]
pub trait Behavior: Send + Sync {
    async fn handle(&self, ctx: Arc<RequestContext>, next: Next) -> Result<JsonValue, AppError>;
}
