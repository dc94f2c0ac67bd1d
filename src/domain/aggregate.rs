use uuid::Uuid;

use super::event::DomainEvent;

/// Consistency boundary around one or more entities; the unit of event-sourced append.
///
/// Implementors accumulate uncommitted events as commands mutate them; `take_uncommitted`
/// drains that list once the unit of work has durably appended the events, advancing `version`
/// by the number of events committed.
pub trait Aggregate: Send + Sync {
    fn id(&self) -> Uuid;
    fn user_id(&self) -> Uuid;
    /// Version of the last event durably appended for this aggregate (0 if none yet).
    fn version(&self) -> i64;
    /// Drains and returns events produced by commands since the last commit, advancing
    /// `version` to reflect them.
    fn take_uncommitted(&mut self) -> Vec<Box<dyn DomainEvent>>;
}
