use crate::error::AppError;
use crate::eventing::BridgedPublisher;

use super::aggregate::Aggregate;
use super::event_store::{EventStorePort, StoredEvent};

/// The event-sourced write path (spec §4.11, §2 item 11): applies a command to an
/// already-loaded aggregate, appends its uncommitted events through the event-store port at the
/// aggregate's pre-mutation version, and on success hands the same events to the Bridged
/// Publisher. This is the terminal handler the Mediator's behavior pipeline ultimately calls
/// for every command.
///
/// Loading the aggregate itself is the caller's responsibility (the repository backing it is
/// out of scope per SPEC_FULL.md §1); this function owns only the append-then-publish sequencing.
pub async fn execute_command<A, F, R>(
    store: &dyn EventStorePort,
    publisher: &BridgedPublisher,
    mut aggregate: A,
    apply: F,
) -> Result<R, AppError>
where
    A: Aggregate,
    F: FnOnce(&mut A) -> Result<R, AppError>,
{
    let expected_version = aggregate.version();
    let result = apply(&mut aggregate)?;
    let events = aggregate.take_uncommitted();

    if events.is_empty() {
        return Ok(result);
    }

    let aggregate_id = aggregate.id();
    let stored: Vec<StoredEvent> = events
        .iter()
        .map(|e| StoredEvent {
            event_id: e.event_id(),
            aggregate_id: e.aggregate_id(),
            user_id: e.user_id(),
            event_type: e.event_type().to_string(),
            occurred_at: e.occurred_at(),
            version: e.version(),
            payload: e.payload(),
        })
        .collect();

    store.append(aggregate_id, expected_version, stored).await?;
    publisher.publish(&events).await?;

    Ok(result)
}

/// Convenience alias used by callers that only need the aggregate id back (e.g. `CreateNode`
/// returning the new node's id from inside the closure).
pub type CommandResult<R> = Result<R, AppError>;
