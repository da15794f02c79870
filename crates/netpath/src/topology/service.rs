//! Topology service - wires the store, processor, coordinator and bus into
//! two workers and exposes the operator and query surface.
//!
//! The ingest worker is the only heartbeat-driven mutator. It hands failure
//! events to the coordinator worker through a bounded queue so a slow
//! recomputation never blocks ingestion.

use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::{mpsc, oneshot, Mutex};

use super::bus::EventBus;
use super::coordinator::FailureCoordinator;
use super::engine::PathEngine;
use super::graph::{Edge, EdgeKey, Health, Node, PairKey, TopologyInit, TopologySnapshot};
use super::heartbeat::{
    FailureEvent, Heartbeat, HeartbeatProcessor, InMemoryLatencyLog, LatencyLog, LatencyRecord,
};
use super::paths::{PathCandidate, PathSet, PathStore, WeightConfig};
use super::store::{TopologyHealth, TopologyStore};
use crate::config::NetpathConfig;
use crate::{NetpathError, Result};

enum IngestCommand {
    Initialize {
        init: TopologyInit,
        reply: oneshot::Sender<Result<()>>,
    },
    Heartbeat(serde_json::Value),
    Flush(oneshot::Sender<()>),
}

enum FailureCommand {
    Propagate(FailureEvent),
    Flush(oneshot::Sender<()>),
}

/// Handle to the running topology core
#[derive(Clone)]
pub struct TopologyService {
    config: NetpathConfig,
    store: TopologyStore,
    paths: PathStore,
    bus: EventBus,
    processor: Arc<Mutex<HeartbeatProcessor>>,
    coordinator: Arc<FailureCoordinator>,
    latency_log: Arc<InMemoryLatencyLog>,
    ingest_tx: mpsc::Sender<IngestCommand>,
    failure_tx: mpsc::Sender<FailureCommand>,
}

impl TopologyService {
    /// Build the core and spawn its workers on the current runtime
    pub fn start(config: NetpathConfig) -> Self {
        let store = TopologyStore::new(&config);
        let paths = PathStore::new();
        let bus = EventBus::new(config.bus_capacity);
        let latency_log = Arc::new(InMemoryLatencyLog::new(config.latency_log_capacity));
        let processor = Arc::new(Mutex::new(HeartbeatProcessor::new(
            config.restore_cpu,
            config.restore_latency,
            latency_log.clone() as Arc<dyn LatencyLog>,
        )));
        let coordinator = Arc::new(FailureCoordinator::new(
            Arc::new(store.clone()),
            paths.clone(),
            PathEngine::new(config.max_paths),
            bus.clone(),
        ));

        let (ingest_tx, ingest_rx) = mpsc::channel(config.ingest_queue_capacity.max(1));
        let (failure_tx, failure_rx) = mpsc::channel(config.failure_queue_capacity.max(1));

        tokio::spawn(run_coordinator(coordinator.clone(), failure_rx));
        tokio::spawn(run_ingest(
            IngestWorker {
                store: store.clone(),
                paths: paths.clone(),
                bus: bus.clone(),
                processor: processor.clone(),
                failure_tx: failure_tx.clone(),
            },
            ingest_rx,
        ));

        tracing::info!("Topology service started (K = {})", config.max_paths);

        Self {
            config,
            store,
            paths,
            bus,
            processor,
            coordinator,
            latency_log,
            ingest_tx,
            failure_tx,
        }
    }

    pub fn config(&self) -> &NetpathConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &TopologyStore {
        &self.store
    }

    pub fn paths(&self) -> &PathStore {
        &self.paths
    }

    // ---- ingestion ----

    /// Replace the topology. Runs on the ingest worker, in order with heartbeats.
    pub async fn initialize(&self, init: TopologyInit) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.ingest_tx
            .send(IngestCommand::Initialize { init, reply })
            .await
            .map_err(|_| NetpathError::ChannelClosed("ingest queue".to_string()))?;
        rx.await
            .map_err(|_| NetpathError::ChannelClosed("ingest worker".to_string()))?
    }

    /// Validate an untyped `topology-init` payload and apply it
    pub async fn submit_topology_init(&self, payload: serde_json::Value) -> Result<()> {
        let init = TopologyInit::from_value(payload)?;
        self.initialize(init).await
    }

    /// Queue a heartbeat. Malformed payloads are dropped by the worker.
    pub async fn submit_heartbeat(&self, payload: serde_json::Value) -> Result<()> {
        self.ingest_tx
            .send(IngestCommand::Heartbeat(payload))
            .await
            .map_err(|_| NetpathError::ChannelClosed("ingest queue".to_string()))
    }

    /// Wait until everything queued so far has been ingested and propagated
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.ingest_tx
            .send(IngestCommand::Flush(tx))
            .await
            .map_err(|_| NetpathError::ChannelClosed("ingest queue".to_string()))?;
        rx.await
            .map_err(|_| NetpathError::ChannelClosed("ingest worker".to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.failure_tx
            .send(FailureCommand::Flush(tx))
            .await
            .map_err(|_| NetpathError::ChannelClosed("failure queue".to_string()))?;
        rx.await
            .map_err(|_| NetpathError::ChannelClosed("coordinator worker".to_string()))
    }

    async fn propagate(&self, event: FailureEvent) -> Result<()> {
        self.failure_tx
            .send(FailureCommand::Propagate(event))
            .await
            .map_err(|_| NetpathError::ChannelClosed("failure queue".to_string()))
    }

    /// Publish an operator-triggered failure and hand it to the coordinator
    async fn report_failure(&self, event: FailureEvent) -> Result<()> {
        self.bus.node_failure(event.clone());
        self.propagate(event).await
    }

    // ---- operator mutations ----

    pub async fn update_node(
        &self,
        node_id: &str,
        cpu: i64,
        latency: i64,
        health: Health,
    ) -> Result<()> {
        let previous = self.store.update_node(node_id, cpu, latency, health).await?;
        if previous.is_active() && !health.is_active() {
            self.report_failure(FailureEvent::new(vec![node_id.to_string()], vec![]))
                .await?;
        }
        Ok(())
    }

    /// Explicit operator failure. Emits an event only on an actual transition.
    pub async fn mark_node_failed(&self, node_id: &str) -> Result<bool> {
        let transitioned = self.store.mark_node_failed(node_id).await?;
        if transitioned {
            tracing::info!("Node {} marked failed by operator", node_id);
            self.report_failure(FailureEvent::new(vec![node_id.to_string()], vec![]))
                .await?;
        }
        Ok(transitioned)
    }

    pub async fn restore_node(&self, node_id: &str) -> Result<bool> {
        let transitioned = self.store.restore_node(node_id).await?;
        if transitioned {
            tracing::info!("Node {} restored by operator", node_id);
        }
        Ok(transitioned)
    }

    pub async fn add_node(&self, node: Node) -> Result<()> {
        let node_id = node.id.clone();
        self.store.add_node(node).await?;
        tracing::info!("Node {} added", node_id);
        Ok(())
    }

    /// Remove a node and its incident edges, then recompute sets routed through it
    pub async fn delete_node(&self, node_id: &str) -> Result<Node> {
        let node = self.store.delete_node(node_id).await?;
        tracing::info!("Node {} deleted", node_id);
        self.propagate(FailureEvent::new(vec![node_id.to_string()], vec![]))
            .await?;
        Ok(node)
    }

    /// Edge changes lock the processor before the store, matching a heartbeat cycle
    pub async fn update_edge(&self, key: &EdgeKey, health: Health, latency: i64) -> Result<()> {
        let previous = {
            let mut processor = self.processor.lock().await;
            let previous = self.store.update_edge(key, health, latency).await?;
            if health.is_active() {
                processor.forget_edge(key);
            } else {
                processor.note_failed_edge(key.clone());
            }
            previous
        };
        if previous.is_active() && !health.is_active() {
            self.report_failure(FailureEvent::new(vec![], vec![key.clone()]))
                .await?;
        }
        Ok(())
    }

    pub async fn mark_edge_failed(&self, key: &EdgeKey) -> Result<bool> {
        let transitioned = {
            let mut processor = self.processor.lock().await;
            let transitioned = self.store.mark_edge_failed(key).await?;
            processor.note_failed_edge(key.clone());
            transitioned
        };
        if transitioned {
            tracing::info!("Edge {} marked failed by operator", key);
            self.report_failure(FailureEvent::new(vec![], vec![key.clone()]))
                .await?;
        }
        Ok(transitioned)
    }

    pub async fn restore_edge(&self, key: &EdgeKey) -> Result<bool> {
        let transitioned = {
            let mut processor = self.processor.lock().await;
            let transitioned = self.store.restore_edge(key).await?;
            processor.forget_edge(key);
            transitioned
        };
        if transitioned {
            tracing::info!("Edge {} restored by operator", key);
        }
        Ok(transitioned)
    }

    pub async fn add_edge(&self, edge: Edge) -> Result<()> {
        let key = edge.key();
        self.store.add_edge(edge).await?;
        tracing::info!("Edge {} added", key);
        Ok(())
    }

    pub async fn delete_edge(&self, key: &EdgeKey) -> Result<Edge> {
        let edge = self.store.delete_edge(key).await?;
        tracing::info!("Edge {} deleted", key);
        self.propagate(FailureEvent::new(vec![], vec![key.clone()]))
            .await?;
        Ok(edge)
    }

    // ---- queries ----

    pub async fn snapshot(&self) -> TopologySnapshot {
        self.store.snapshot().await
    }

    pub async fn active_nodes(&self) -> Vec<Node> {
        self.store.active_nodes().await
    }

    pub async fn failed_nodes(&self) -> Vec<Node> {
        self.store.failed_nodes().await
    }

    pub async fn failed_edges(&self) -> Vec<EdgeKey> {
        self.store.failed_edges().await
    }

    pub async fn health(&self) -> TopologyHealth {
        self.store.health().await
    }

    pub fn recent_latencies(&self, limit: usize) -> Vec<LatencyRecord> {
        self.latency_log.recent(limit)
    }

    /// Compute, store and publish the ranked set for one pair
    pub async fn compute_paths(
        &self,
        source: &str,
        destination: &str,
        weights: Option<WeightConfig>,
    ) -> Result<PathSet> {
        let weights = weights.unwrap_or(self.config.default_weights);
        self.coordinator
            .compute_pair(source, destination, &weights)
            .await
    }

    /// Compute many pairs against one snapshot
    pub async fn compute_batch(
        &self,
        pairs: &IndexMap<String, Vec<String>>,
        weights: Option<WeightConfig>,
    ) -> Result<Vec<PathSet>> {
        let weights = weights.unwrap_or(self.config.default_weights);
        self.coordinator.recompute_batch(pairs, &weights).await
    }

    /// Stored set for the pair, only while it is active
    pub async fn active_paths(&self, source: &str, destination: &str) -> Option<PathSet> {
        self.paths.active(&PairKey::new(source, destination)).await
    }

    pub async fn all_active_paths(&self) -> Vec<PathSet> {
        self.paths.all_active().await
    }

    pub async fn primary_paths(&self) -> Vec<PathCandidate> {
        self.paths
            .all_active()
            .await
            .into_iter()
            .filter_map(|set| set.primary().cloned())
            .collect()
    }

    pub async fn backup_paths(&self) -> Vec<PathCandidate> {
        self.paths
            .all_active()
            .await
            .into_iter()
            .flat_map(|set| set.backups().to_vec())
            .collect()
    }
}

struct IngestWorker {
    store: TopologyStore,
    paths: PathStore,
    bus: EventBus,
    processor: Arc<Mutex<HeartbeatProcessor>>,
    failure_tx: mpsc::Sender<FailureCommand>,
}

impl IngestWorker {
    async fn initialize(&self, init: TopologyInit) -> Result<()> {
        self.store.initialize(&init).await?;
        self.paths.clear().await;
        let seed = self.store.failed_edges().await;
        self.processor.lock().await.reset(seed);
        self.bus.topology_init(init);
        Ok(())
    }

    async fn heartbeat(&self, payload: serde_json::Value) {
        let heartbeat = match Heartbeat::from_value(payload) {
            Ok(heartbeat) => heartbeat,
            Err(e) => {
                tracing::warn!("Dropping heartbeat: {}", e);
                return;
            }
        };

        self.bus.heartbeat(heartbeat.clone());
        let event = self
            .processor
            .lock()
            .await
            .process(&self.store, &heartbeat)
            .await;

        if let Some(event) = event {
            self.bus.node_failure(event.clone());
            if self
                .failure_tx
                .send(FailureCommand::Propagate(event))
                .await
                .is_err()
            {
                tracing::error!("Failure queue closed, dropping failure event");
            }
        }
    }
}

async fn run_ingest(worker: IngestWorker, mut rx: mpsc::Receiver<IngestCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            IngestCommand::Initialize { init, reply } => {
                let result = worker.initialize(init).await;
                if let Err(e) = &result {
                    tracing::warn!("Rejected topology-init: {}", e);
                }
                let _ = reply.send(result);
            }
            IngestCommand::Heartbeat(payload) => worker.heartbeat(payload).await,
            IngestCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Ingest worker stopped");
}

async fn run_coordinator(
    coordinator: Arc<FailureCoordinator>,
    mut rx: mpsc::Receiver<FailureCommand>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            FailureCommand::Propagate(event) => {
                if let Err(e) = coordinator.on_failure_event(&event).await {
                    tracing::error!("Failure propagation aborted: {}", e);
                }
            }
            FailureCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Coordinator worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::bus::BusMessage;
    use serde_json::json;

    fn init_payload() -> serde_json::Value {
        json!({
            "nodes": [
                { "id": "A", "cpu": 4, "latency": 10 },
                { "id": "B", "cpu": 4, "latency": 10 },
                { "id": "C", "cpu": 4, "latency": 10 },
                { "id": "D", "cpu": 4, "latency": 200 }
            ],
            "edges": [
                { "source": "A", "target": "B", "latency": 1 },
                { "source": "B", "target": "C", "latency": 1 },
                { "source": "A", "target": "D", "latency": 1 },
                { "source": "D", "target": "C", "latency": 1 }
            ]
        })
    }

    fn heartbeat(failed: &[&str], failed_edges: &[&str]) -> serde_json::Value {
        let statuses: serde_json::Map<String, serde_json::Value> = ["A", "B", "C", "D"]
            .iter()
            .map(|id| {
                let status = if failed.contains(id) { "failed" } else { "active" };
                let latency = if *id == "D" { 200 } else { 10 };
                (
                    id.to_string(),
                    json!({ "status": status, "cpu": 4, "latency": latency }),
                )
            })
            .collect();
        json!({ "nodeStatuses": statuses, "failedEdges": failed_edges })
    }

    async fn started() -> TopologyService {
        let service = TopologyService::start(NetpathConfig::default());
        service.submit_topology_init(init_payload()).await.unwrap();
        service
    }

    fn latency_only() -> Option<WeightConfig> {
        Some(WeightConfig::new(0.0, 0.0, 1.0))
    }

    #[tokio::test]
    async fn test_init_rejects_malformed_payload() {
        let service = TopologyService::start(NetpathConfig::default());
        let result = service.submit_topology_init(json!({ "edges": [] })).await;
        assert!(matches!(result, Err(NetpathError::Validation(_))));
        let result = service.submit_topology_init(json!({ "nodes": [] })).await;
        assert!(matches!(result, Err(NetpathError::Validation(_))));
    }

    #[tokio::test]
    async fn test_operator_failure_then_heartbeat_emits_one_event() {
        let service = started().await;
        let mut rx = service.bus().subscribe();

        let before = service.compute_paths("A", "C", latency_only()).await.unwrap();
        assert!(before.primary().unwrap().visits("B"));

        assert!(service.mark_node_failed("B").await.unwrap());
        service.submit_heartbeat(heartbeat(&["B"], &[])).await.unwrap();
        service.flush().await.unwrap();

        let mut failures = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let BusMessage::NodeFailure(event) = message {
                failures.push(event);
            }
        }
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].failed_node_ids, vec!["B".to_string()]);

        let after = service.active_paths("A", "C").await.unwrap();
        assert_eq!(after.primary().unwrap().path, vec!["A", "D", "C"]);
        assert!(after.candidates.iter().all(|c| !c.visits("B")));
    }

    #[tokio::test]
    async fn test_heartbeat_failure_drives_recomputation() {
        let service = started().await;
        service.compute_paths("A", "C", latency_only()).await.unwrap();

        service.submit_heartbeat(heartbeat(&["B"], &[])).await.unwrap();
        service.flush().await.unwrap();

        assert_eq!(service.failed_nodes().await.len(), 1);
        let after = service.active_paths("A", "C").await.unwrap();
        assert_eq!(after.primary().unwrap().path, vec!["A", "D", "C"]);

        // Recovery comes back through the heartbeat with restore defaults
        service.submit_heartbeat(heartbeat(&[], &[])).await.unwrap();
        service.flush().await.unwrap();
        assert!(service.failed_nodes().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_heartbeat_does_not_stop_ingestion() {
        let service = started().await;
        service
            .submit_heartbeat(json!({ "failedEdges": ["A->B"] }))
            .await
            .unwrap();
        service.submit_heartbeat(heartbeat(&["C"], &[])).await.unwrap();
        service.flush().await.unwrap();

        assert!(service.failed_edges().await.is_empty());
        assert_eq!(service.failed_nodes().await[0].id, "C");
        assert_eq!(service.recent_latencies(10).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_edges_stay_failed_until_restored() {
        let service = started().await;
        let key = EdgeKey::new("A", "B");

        service.submit_heartbeat(heartbeat(&[], &["A->B"])).await.unwrap();
        service.submit_heartbeat(heartbeat(&[], &[])).await.unwrap();
        service.flush().await.unwrap();
        assert_eq!(service.failed_edges().await, vec![key.clone()]);

        assert!(service.restore_edge(&key).await.unwrap());
        assert!(service.failed_edges().await.is_empty());
    }

    #[tokio::test]
    async fn test_reinitialize_clears_paths() {
        let service = started().await;
        service.compute_paths("A", "C", None).await.unwrap();
        assert_eq!(service.all_active_paths().await.len(), 1);

        service.submit_topology_init(init_payload()).await.unwrap();
        assert!(service.all_active_paths().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_node_recomputes_to_empty() {
        let service = started().await;
        service.compute_paths("A", "C", None).await.unwrap();

        service.delete_node("C").await.unwrap();
        service.flush().await.unwrap();

        let snapshot = service.snapshot().await;
        assert!(snapshot.edges.iter().all(|e| e.source != "C" && e.target != "C"));
        assert!(service.active_paths("A", "C").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_primary_and_backup_views() {
        let service = started().await;
        service.compute_paths("A", "C", latency_only()).await.unwrap();

        let primaries = service.primary_paths().await;
        let backups = service.backup_paths().await;
        assert_eq!(primaries.len(), 1);
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].path, vec!["A", "D", "C"]);
    }

    fn drain_failures(rx: &mut tokio::sync::broadcast::Receiver<BusMessage>) -> Vec<FailureEvent> {
        let mut failures = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let BusMessage::NodeFailure(event) = message {
                failures.push(event);
            }
        }
        failures
    }

    #[tokio::test]
    async fn test_edge_reactivated_by_update_fails_again_on_heartbeat() {
        let service = started().await;
        let key = EdgeKey::new("A", "B");

        service.update_edge(&key, Health::Failed, 1).await.unwrap();
        service.update_edge(&key, Health::Active, 1).await.unwrap();
        service.flush().await.unwrap();
        assert!(service.failed_edges().await.is_empty());

        let before = service.compute_paths("A", "C", latency_only()).await.unwrap();
        assert_eq!(before.primary().unwrap().path, vec!["A", "B", "C"]);

        let mut rx = service.bus().subscribe();
        service.submit_heartbeat(heartbeat(&[], &["A->B"])).await.unwrap();
        service.flush().await.unwrap();

        let failures = drain_failures(&mut rx);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].failed_edge_keys, vec![key.clone()]);
        assert_eq!(service.failed_edges().await, vec![key]);

        let after = service.active_paths("A", "C").await.unwrap();
        assert_eq!(after.primary().unwrap().path, vec!["A", "D", "C"]);
        assert!(after.candidates.iter().all(|c| !c.visits("B")));
    }

    #[tokio::test]
    async fn test_restored_edge_fails_again_on_heartbeat() {
        let service = started().await;
        let key = EdgeKey::new("A", "B");

        service.submit_heartbeat(heartbeat(&[], &["A->B"])).await.unwrap();
        service.flush().await.unwrap();
        assert!(service.restore_edge(&key).await.unwrap());

        let before = service.compute_paths("A", "C", latency_only()).await.unwrap();
        assert_eq!(before.primary().unwrap().path, vec!["A", "B", "C"]);

        let mut rx = service.bus().subscribe();
        service.submit_heartbeat(heartbeat(&[], &["A->B"])).await.unwrap();
        service.flush().await.unwrap();

        let failures = drain_failures(&mut rx);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].failed_edge_keys, vec![key]);

        let after = service.active_paths("A", "C").await.unwrap();
        assert_eq!(after.primary().unwrap().path, vec!["A", "D", "C"]);
    }

    #[tokio::test]
    async fn test_reinitialize_discards_in_flight_recomputation() {
        let service = started().await;
        service.compute_paths("A", "C", latency_only()).await.unwrap();

        service.submit_heartbeat(heartbeat(&["B"], &[])).await.unwrap();
        service.submit_topology_init(init_payload()).await.unwrap();
        service.flush().await.unwrap();

        assert!(service.all_active_paths().await.is_empty());
    }
}
