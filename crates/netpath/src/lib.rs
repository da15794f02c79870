//! # netpath - live network topology and routing core
//!
//! Maintains a model of a simulated network (nodes, directed links, health) and
//! continuously derives ranked, loopless routing paths between node pairs.
//!
//! ## Components
//!
//! - **Topology Graph Store**: canonical nodes/edges and their health
//! - **Heartbeat Processor**: diffs periodic status reports against the store
//! - **Path Computation Engine**: K-shortest loopless paths (Yen over Dijkstra)
//! - **Path Store**: last computed path set per source/destination pair
//! - **Failure Propagation Coordinator**: invalidates and recomputes affected paths

pub mod config;
pub mod topology;

pub use config::NetpathConfig;
pub use topology::{
    bus::{topics, BusMessage, EventBus},
    coordinator::{FailureCoordinator, SnapshotSource},
    engine::{edge_weight, PathEngine},
    graph::{
        Edge, EdgeKey, EdgeSpec, Health, Node, NodeSpec, PairKey, TopologyGraph, TopologyInit,
        TopologySnapshot,
    },
    heartbeat::{
        FailureEvent, Heartbeat, HeartbeatProcessor, InMemoryLatencyLog, LatencyLog,
        LatencyRecord, NodeReport,
    },
    paths::{PathCandidate, PathSet, PathStore, PathType, WeightConfig},
    service::TopologyService,
    store::{TopologyHealth, TopologyStore},
};

/// Main error type for netpath operations
#[derive(Debug, thiserror::Error)]
pub enum NetpathError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NetpathError>;
