//! Topology module - graph model, routing algorithms and failure handling

pub mod bus;
pub mod coordinator;
pub mod engine;
pub mod graph;
pub mod heartbeat;
pub mod paths;
pub mod service;
pub mod store;

pub use bus::EventBus;
pub use coordinator::FailureCoordinator;
pub use engine::PathEngine;
pub use graph::{TopologyGraph, TopologySnapshot};
pub use heartbeat::HeartbeatProcessor;
pub use paths::PathStore;
pub use service::TopologyService;
pub use store::TopologyStore;
