//! Handler registry, projection registry, and the local/remote/bridged publisher chain
//! (event-propagation core §4.2-§4.6).

pub mod bridged_publisher;
pub mod checkpoint_store;
pub mod handler;
pub mod local_dispatcher;
pub mod projection;
pub mod registry;
pub mod remote_publisher;

pub use bridged_publisher::BridgedPublisher;
pub use checkpoint_store::{CheckpointStorePort, DieselCheckpointStore, InMemoryCheckpointStore, ProjectionCheckpoint};
pub use handler::EventHandler;
pub use local_dispatcher::{LocalDispatchSummary, LocalDispatcher};
pub use projection::{Projection, ProjectionRegistry, ProjectionStats};
pub use registry::HandlerRegistry;
pub use remote_publisher::{HttpRemotePublisher, InMemoryRemotePublisher, RemotePublisherPort};
