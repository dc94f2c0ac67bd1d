//! Operation Store & Listener (spec §4.8): tracks long-running commands and updates their
//! status from completion events.

pub mod listener;
pub mod store;

pub use listener::OperationListener;
pub use store::{DieselOperationStore, InMemoryOperationStore, OperationRecord, OperationStatus, OperationStorePort};
