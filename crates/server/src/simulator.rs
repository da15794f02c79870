//! Heartbeat simulator - the producer side of the network.
//!
//! Owns the simulated ground truth (which nodes and links are up, what they
//! report) and periodically turns it into a heartbeat for the topology core.
//! Node-level changes reach the core only through heartbeats; structural
//! edits, edge metrics and edge restores are mirrored directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use indexmap::{IndexMap, IndexSet};
use netpath::{
    Edge, EdgeKey, EdgeSpec, Health, Heartbeat, Node, NodeReport, NodeSpec, TopologyInit,
    TopologyService,
};
use rand::Rng;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use ts_rs::TS;

use crate::error::ApiError;

#[derive(Debug, Clone)]
struct SimNode {
    cpu: i64,
    latency: i64,
    failed: bool,
}

#[derive(Debug, Clone)]
struct SimEdge {
    latency: i64,
}

#[derive(Debug, Default)]
struct SimState {
    nodes: IndexMap<String, SimNode>,
    edges: IndexMap<EdgeKey, SimEdge>,
    failed_edges: IndexSet<EdgeKey>,
}

impl SimState {
    fn node_mut(&mut self, node_id: &str) -> Result<&mut SimNode, ApiError> {
        self.nodes
            .get_mut(node_id)
            .ok_or_else(|| ApiError::NotFound(format!("Node {} not found", node_id)))
    }

    fn require_edge(&self, key: &EdgeKey) -> Result<(), ApiError> {
        if self.edges.contains_key(key) {
            Ok(())
        } else {
            Err(ApiError::NotFound(format!("Edge {} not found", key)))
        }
    }
}

/// Summary of the simulator returned by the status endpoint
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorStatus {
    pub running: bool,
    pub node_count: usize,
    pub edge_count: usize,
    pub failed_nodes: Vec<String>,
    pub failed_edges: Vec<String>,
}

pub struct NetworkSimulator {
    topology: TopologyService,
    state: Mutex<SimState>,
    running: AtomicBool,
    latency_jitter_ms: i64,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkSimulator {
    pub fn new(topology: TopologyService, latency_jitter_ms: i64) -> Self {
        Self {
            topology,
            state: Mutex::new(SimState::default()),
            running: AtomicBool::new(false),
            latency_jitter_ms: latency_jitter_ms.max(0),
            ticker: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Load a new network, keeping the first of any duplicate node or edge,
    /// and start emitting heartbeats for it.
    pub async fn initialize(&self, init: TopologyInit) -> Result<(), ApiError> {
        let mut state = SimState::default();
        let mut nodes: Vec<NodeSpec> = Vec::new();
        let mut edges: Vec<EdgeSpec> = Vec::new();

        for spec in init.nodes {
            if state.nodes.contains_key(&spec.id) {
                continue;
            }
            let failed = !Health::from_status(spec.status.as_deref()).is_active();
            state.nodes.insert(
                spec.id.clone(),
                SimNode {
                    cpu: spec.cpu,
                    latency: spec.latency,
                    failed,
                },
            );
            nodes.push(spec);
        }

        for spec in init.edges {
            let key = spec.key();
            if state.edges.contains_key(&key) {
                continue;
            }
            if !Health::from_status(spec.status.as_deref()).is_active() {
                state.failed_edges.insert(key.clone());
            }
            state.edges.insert(key, SimEdge { latency: spec.latency });
            edges.push(spec);
        }

        self.topology
            .initialize(TopologyInit {
                nodes,
                edges,
                timestamp: init.timestamp.or_else(|| Some(Utc::now())),
            })
            .await?;

        tracing::info!(
            "Simulator loaded {} nodes and {} edges",
            state.nodes.len(),
            state.edges.len()
        );
        *self.state.lock().await = state;
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stop emitting heartbeats until the next initialize
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Simulator stopped");
    }

    pub async fn update_node(
        &self,
        node_id: &str,
        cpu: i64,
        latency: i64,
        status: Option<&str>,
    ) -> Result<(), ApiError> {
        if cpu < 1 || latency < 0 {
            return Err(ApiError::BadRequest(
                "cpu must be >= 1 and latency >= 0".to_string(),
            ));
        }
        {
            let mut state = self.state.lock().await;
            let node = state.node_mut(node_id)?;
            node.cpu = cpu;
            node.latency = latency;
            if let Some(status) = status {
                node.failed = !Health::from_status(Some(status)).is_active();
            }
        }
        self.emit_heartbeat().await
    }

    pub async fn node_down(&self, node_id: &str) -> Result<(), ApiError> {
        self.state.lock().await.node_mut(node_id)?.failed = true;
        tracing::info!("Simulated failure of node {}", node_id);
        self.emit_heartbeat().await
    }

    /// Bring a node back with the restore defaults, not its old metrics
    pub async fn restore_node(&self, node_id: &str) -> Result<(), ApiError> {
        let (cpu, latency) = {
            let config = self.topology.config();
            (config.restore_cpu, config.restore_latency)
        };
        {
            let mut state = self.state.lock().await;
            let node = state.node_mut(node_id)?;
            node.failed = false;
            node.cpu = cpu;
            node.latency = latency;
        }
        tracing::info!("Simulated recovery of node {}", node_id);
        self.emit_heartbeat().await
    }

    pub async fn update_edge(
        &self,
        key: &EdgeKey,
        status: Option<&str>,
        latency: Option<i64>,
    ) -> Result<(), ApiError> {
        let (health, latency) = {
            let mut state = self.state.lock().await;
            state.require_edge(key)?;
            let health = match status {
                Some(status) => Health::from_status(Some(status)),
                None if state.failed_edges.contains(key) => Health::Failed,
                None => Health::Active,
            };
            let edge = state
                .edges
                .get_mut(key)
                .ok_or_else(|| ApiError::NotFound(format!("Edge {} not found", key)))?;
            if let Some(latency) = latency {
                edge.latency = latency;
            }
            let latency = edge.latency;
            if health.is_active() {
                state.failed_edges.shift_remove(key);
            } else {
                state.failed_edges.insert(key.clone());
            }
            (health, latency)
        };
        self.topology.update_edge(key, health, latency).await?;
        Ok(())
    }

    pub async fn edge_down(&self, key: &EdgeKey) -> Result<(), ApiError> {
        {
            let mut state = self.state.lock().await;
            state.require_edge(key)?;
            state.failed_edges.insert(key.clone());
        }
        tracing::info!("Simulated failure of edge {}", key);
        self.emit_heartbeat().await
    }

    /// Edges only come back through an explicit restore, mirrored into the core
    pub async fn edge_restore(&self, key: &EdgeKey) -> Result<(), ApiError> {
        {
            let mut state = self.state.lock().await;
            state.require_edge(key)?;
            state.failed_edges.shift_remove(key);
        }
        self.topology.restore_edge(key).await?;
        tracing::info!("Simulated recovery of edge {}", key);
        Ok(())
    }

    pub async fn add_node(&self, node_id: &str, cpu: i64, latency: i64) -> Result<(), ApiError> {
        self.topology.add_node(Node::new(node_id, cpu, latency)).await?;
        self.state.lock().await.nodes.insert(
            node_id.to_string(),
            SimNode {
                cpu,
                latency,
                failed: false,
            },
        );
        Ok(())
    }

    pub async fn delete_node(&self, node_id: &str) -> Result<(), ApiError> {
        self.topology.delete_node(node_id).await?;
        let mut state = self.state.lock().await;
        state.nodes.shift_remove(node_id);
        state.edges.retain(|key, _| !key.touches(node_id));
        state.failed_edges.retain(|key| !key.touches(node_id));
        Ok(())
    }

    pub async fn add_edge(&self, key: &EdgeKey, latency: i64) -> Result<(), ApiError> {
        self.topology
            .add_edge(Edge::new(key.source.clone(), key.target.clone(), latency))
            .await?;
        self.state
            .lock()
            .await
            .edges
            .insert(key.clone(), SimEdge { latency });
        Ok(())
    }

    pub async fn delete_edge(&self, key: &EdgeKey) -> Result<(), ApiError> {
        self.topology.delete_edge(key).await?;
        let mut state = self.state.lock().await;
        state.edges.shift_remove(key);
        state.failed_edges.shift_remove(key);
        Ok(())
    }

    pub async fn status(&self) -> SimulatorStatus {
        let state = self.state.lock().await;
        SimulatorStatus {
            running: self.is_running(),
            node_count: state.nodes.len(),
            edge_count: state.edges.len(),
            failed_nodes: state
                .nodes
                .iter()
                .filter(|(_, node)| node.failed)
                .map(|(id, _)| id.clone())
                .collect(),
            failed_edges: state.failed_edges.iter().map(EdgeKey::to_string).collect(),
        }
    }

    /// Build the heartbeat describing the current ground truth
    pub async fn build_heartbeat(&self) -> Heartbeat {
        let state = self.state.lock().await;
        let mut rng = rand::thread_rng();

        let node_statuses = state
            .nodes
            .iter()
            .map(|(id, node)| {
                let live = |key: &&EdgeKey| !state.failed_edges.contains(*key);
                let outgoing_connections = state
                    .edges
                    .keys()
                    .filter(|key| key.source == *id)
                    .filter(live)
                    .map(|key| key.target.clone())
                    .collect();
                let incoming_connections = state
                    .edges
                    .keys()
                    .filter(|key| key.target == *id)
                    .filter(live)
                    .map(|key| key.source.clone())
                    .collect();

                let jitter = if self.latency_jitter_ms > 0 {
                    rng.gen_range(-self.latency_jitter_ms..=self.latency_jitter_ms)
                } else {
                    0
                };
                let health = if node.failed { Health::Failed } else { Health::Active };

                let report = NodeReport {
                    status: Some(health.as_status().to_string()),
                    cpu: node.cpu,
                    latency: node.latency.saturating_add(jitter).max(0),
                    outgoing_connections,
                    incoming_connections,
                };
                (id.clone(), report)
            })
            .collect();

        Heartbeat {
            node_statuses,
            failed_edges: state.failed_edges.iter().cloned().collect(),
            timestamp: Utc::now(),
        }
    }

    /// Send one heartbeat into the core ingest queue now
    pub async fn emit_heartbeat(&self) -> Result<(), ApiError> {
        let heartbeat = self.build_heartbeat().await;
        let payload = serde_json::to_value(&heartbeat).map_err(netpath::NetpathError::from)?;
        self.topology.submit_heartbeat(payload).await?;
        Ok(())
    }

    /// Start the timer task emitting a heartbeat per interval while running
    pub async fn spawn_ticker(self: &Arc<Self>, interval: Duration) {
        let simulator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if !simulator.is_running() {
                    continue;
                }
                if let Err(e) = simulator.emit_heartbeat().await {
                    tracing::warn!("Failed to emit heartbeat: {}", e);
                }
            }
        });

        if let Some(previous) = self.ticker.lock().await.replace(handle) {
            previous.abort();
        }
        tracing::info!("Heartbeat ticker running every {:?}", interval);
    }

    /// Stop emitting and tear down the ticker task
    pub async fn shutdown(&self) {
        self.stop();
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpath::NetpathConfig;

    fn node(id: &str, cpu: i64, latency: i64) -> NodeSpec {
        NodeSpec {
            id: id.to_string(),
            cpu,
            latency,
            status: None,
        }
    }

    fn edge(source: &str, target: &str) -> EdgeSpec {
        EdgeSpec {
            id: None,
            source: source.to_string(),
            target: target.to_string(),
            status: None,
            latency: 5,
        }
    }

    async fn create_simulator() -> (TopologyService, NetworkSimulator) {
        let topology = TopologyService::start(NetpathConfig::default());
        let simulator = NetworkSimulator::new(topology.clone(), 0);
        simulator
            .initialize(TopologyInit {
                nodes: vec![node("A", 4, 10), node("B", 4, 20), node("A", 99, 99), node("C", 8, 30)],
                edges: vec![edge("A", "B"), edge("B", "C"), edge("A", "B")],
                timestamp: None,
            })
            .await
            .unwrap();
        (topology, simulator)
    }

    #[tokio::test]
    async fn test_initialize_dedupes_and_starts() {
        let (topology, simulator) = create_simulator().await;
        let status = simulator.status().await;
        assert!(status.running);
        assert_eq!(status.node_count, 3);
        assert_eq!(status.edge_count, 2);
        assert_eq!(topology.snapshot().await.nodes.len(), 3);

        simulator.stop();
        assert!(!simulator.is_running());
    }

    #[tokio::test]
    async fn test_heartbeat_reflects_failures_and_connections() {
        let (_topology, simulator) = create_simulator().await;
        simulator.node_down("C").await.unwrap();
        simulator.edge_down(&EdgeKey::new("A", "B")).await.unwrap();

        let heartbeat = simulator.build_heartbeat().await;
        assert_eq!(heartbeat.node_statuses["C"].health(), Health::Failed);
        assert_eq!(heartbeat.node_statuses["A"].health(), Health::Active);
        assert!(heartbeat.node_statuses["A"].outgoing_connections.is_empty());
        assert_eq!(heartbeat.node_statuses["C"].incoming_connections, vec!["B"]);
        assert_eq!(heartbeat.failed_edges, vec![EdgeKey::new("A", "B")]);
    }

    #[tokio::test]
    async fn test_node_down_and_restore_flow_through_heartbeats() {
        let (topology, simulator) = create_simulator().await;

        simulator.node_down("B").await.unwrap();
        topology.flush().await.unwrap();
        assert_eq!(topology.failed_nodes().await[0].id, "B");

        simulator.restore_node("B").await.unwrap();
        topology.flush().await.unwrap();
        let node = topology.store().node("B").await.unwrap();
        assert!(node.is_active());
        assert_eq!((node.cpu_capacity, node.base_latency), (4, 50));
    }

    #[tokio::test]
    async fn test_edge_restore_is_mirrored() {
        let (topology, simulator) = create_simulator().await;
        let key = EdgeKey::new("B", "C");

        simulator.edge_down(&key).await.unwrap();
        topology.flush().await.unwrap();
        assert_eq!(topology.failed_edges().await, vec![key.clone()]);

        simulator.edge_restore(&key).await.unwrap();
        simulator.emit_heartbeat().await.unwrap();
        topology.flush().await.unwrap();
        assert!(topology.failed_edges().await.is_empty());
    }

    #[tokio::test]
    async fn test_edge_reactivated_by_update_can_fail_again() {
        let (topology, simulator) = create_simulator().await;
        let key = EdgeKey::new("A", "B");

        simulator.edge_down(&key).await.unwrap();
        topology.flush().await.unwrap();
        simulator.update_edge(&key, Some("active"), None).await.unwrap();
        topology.flush().await.unwrap();
        assert!(topology.failed_edges().await.is_empty());

        let before = topology.compute_paths("A", "C", None).await.unwrap();
        assert_eq!(before.primary().unwrap().path, vec!["A", "B", "C"]);

        simulator.edge_down(&key).await.unwrap();
        topology.flush().await.unwrap();
        assert_eq!(topology.failed_edges().await, vec![key]);
        assert!(topology.active_paths("A", "C").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_entities_are_not_found() {
        let (_topology, simulator) = create_simulator().await;
        assert!(matches!(
            simulator.node_down("Z").await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            simulator.edge_down(&EdgeKey::new("C", "A")).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_node_cascades_in_both_views() {
        let (topology, simulator) = create_simulator().await;
        simulator.delete_node("B").await.unwrap();
        assert_eq!(simulator.status().await.edge_count, 0);
        assert!(topology.snapshot().await.edges.is_empty());
    }
}
