use async_trait::async_trait;

use crate::domain::DomainEvent;
use crate::error::AppError;

/// An in-process event handler (spec §4.2). Handler descriptors are fixed at registration:
/// `name`, `priority`, and `supported_types` don't change for the handler's lifetime. The
/// per-handler execution deadline is not part of this descriptor: it's a single process-wide
/// value (`handler.timeout`, spec §6) the registry applies uniformly, so it lives on
/// `HandlerRegistry`/`ProjectionRegistry` instead of being duplicated per handler here.
///
/// Grounded on `websocket/events/handlers.rs`'s `EventHandler<E>` trait shape (method names,
/// default `priority()`/`max_execution_time()`), generalized to `domain::DomainEvent` objects
/// and given `async_trait` instead of a hand-rolled boxed future, matching the idiom
/// `websocket/events/middleware.rs`'s `EventMiddleware` already uses elsewhere in this tree.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &dyn DomainEvent) -> Result<(), AppError>;

    fn name(&self) -> &'static str;

    /// Event types this handler wants dispatched to it. The special type `"*"` matches every
    /// event (spec §4.2 wildcard).
    fn supported_types(&self) -> &'static [&'static str];

    /// Lower runs earlier. Ties are broken by registration order.
    fn priority(&self) -> i32 {
        100
    }

    fn supports(&self, event_type: &str) -> bool {
        self.supported_types()
            .iter()
            .any(|t| *t == "*" || *t == event_type)
    }
}
