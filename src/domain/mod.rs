//! Domain events, the aggregate contract, and the event store port (event-propagation core §4.1).

pub mod aggregate;
pub mod event;
pub mod event_store;
pub mod graph;
pub mod graph_stats;
pub mod unit_of_work;

pub use aggregate::Aggregate;
pub use event::{DomainEvent, EventEnvelope};
pub use event_store::{DieselEventStore, EventStorePort, InMemoryEventStore, StoredEvent};
pub use graph_stats::{GraphStats, GraphStatsProjection};
pub use unit_of_work::execute_command;
