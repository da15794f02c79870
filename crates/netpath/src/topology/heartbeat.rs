//! Heartbeat processing - diffs periodic status reports against the topology store

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::graph::{EdgeKey, Health, TopologyGraph};
use super::store::TopologyStore;
use crate::{NetpathError, Result};

/// Per-node entry of a heartbeat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct NodeReport {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub cpu: i64,
    #[serde(default)]
    pub latency: i64,
    #[serde(default)]
    pub outgoing_connections: Vec<String>,
    #[serde(default)]
    pub incoming_connections: Vec<String>,
}

impl NodeReport {
    pub fn health(&self) -> Health {
        Health::from_status(self.status.as_deref())
    }
}

/// One status report covering the whole simulated network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    #[ts(type = "Record<string, NodeReport>")]
    pub node_statuses: IndexMap<String, NodeReport>,
    #[serde(default)]
    #[ts(type = "Array<string>")]
    pub failed_edges: Vec<EdgeKey>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Heartbeat {
    /// Validate an untyped payload. The node-status map is required.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        if !matches!(value.get("nodeStatuses"), Some(statuses) if statuses.is_object()) {
            return Err(NetpathError::Validation(
                "heartbeat is missing the nodeStatuses map".to_string(),
            ));
        }
        serde_json::from_value(value)
            .map_err(|e| NetpathError::Validation(format!("malformed heartbeat: {}", e)))
    }
}

/// Failures detected in one heartbeat cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct FailureEvent {
    pub failed_node_ids: Vec<String>,
    #[ts(type = "Array<string>")]
    pub failed_edge_keys: Vec<EdgeKey>,
    pub timestamp: DateTime<Utc>,
}

impl FailureEvent {
    pub fn new(failed_node_ids: Vec<String>, failed_edge_keys: Vec<EdgeKey>) -> Self {
        Self {
            failed_node_ids,
            failed_edge_keys,
            timestamp: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.failed_node_ids.is_empty() && self.failed_edge_keys.is_empty()
    }
}

/// Latency reported for every node in one cycle. Failed nodes map to `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct LatencyRecord {
    pub timestamp: DateTime<Utc>,
    #[ts(type = "Record<string, number | null>")]
    pub latencies: IndexMap<String, Option<i64>>,
}

impl LatencyRecord {
    pub fn from_heartbeat(heartbeat: &Heartbeat) -> Self {
        let latencies = heartbeat
            .node_statuses
            .iter()
            .map(|(id, report)| {
                let latency = report.health().is_active().then_some(report.latency);
                (id.clone(), latency)
            })
            .collect();
        Self {
            timestamp: heartbeat.timestamp,
            latencies,
        }
    }
}

/// Append-only sink for per-cycle latency records
pub trait LatencyLog: Send + Sync {
    fn append(&self, record: LatencyRecord);

    /// Most recent records, newest last
    fn recent(&self, limit: usize) -> Vec<LatencyRecord>;
}

/// Latency log kept in memory, dropping the oldest record once full
#[derive(Debug)]
pub struct InMemoryLatencyLog {
    capacity: usize,
    records: Mutex<VecDeque<LatencyRecord>>,
}

impl InMemoryLatencyLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LatencyLog for InMemoryLatencyLog {
    fn append(&self, record: LatencyRecord) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    fn recent(&self, limit: usize) -> Vec<LatencyRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let skip = records.len().saturating_sub(limit);
        records.iter().skip(skip).cloned().collect()
    }
}

/// Applies heartbeats to the topology and decides when a failure event is due.
///
/// Node recovery follows the heartbeat; edge recovery does not. The running
/// failed-edge set only grows here and shrinks through [`forget_edge`].
///
/// [`forget_edge`]: HeartbeatProcessor::forget_edge
pub struct HeartbeatProcessor {
    failed_edges: IndexSet<EdgeKey>,
    restore_cpu: i64,
    restore_latency: i64,
    latency_log: Arc<dyn LatencyLog>,
}

impl HeartbeatProcessor {
    pub fn new(restore_cpu: i64, restore_latency: i64, latency_log: Arc<dyn LatencyLog>) -> Self {
        Self {
            failed_edges: IndexSet::new(),
            restore_cpu,
            restore_latency,
            latency_log,
        }
    }

    pub fn failed_edges(&self) -> impl Iterator<Item = &EdgeKey> {
        self.failed_edges.iter()
    }

    pub fn is_edge_failed(&self, key: &EdgeKey) -> bool {
        self.failed_edges.contains(key)
    }

    /// Add a key failed by an operator so a later heartbeat naming it is not growth
    pub fn note_failed_edge(&mut self, key: EdgeKey) -> bool {
        self.failed_edges.insert(key)
    }

    /// Drop a key from the running set when an operator reactivates the edge
    pub fn forget_edge(&mut self, key: &EdgeKey) -> bool {
        self.failed_edges.shift_remove(key)
    }

    /// Re-seed the running set after the topology is re-initialised
    pub fn reset(&mut self, seed: impl IntoIterator<Item = EdgeKey>) {
        self.failed_edges = seed.into_iter().collect();
    }

    pub fn latency_log(&self) -> &Arc<dyn LatencyLog> {
        &self.latency_log
    }

    /// Apply one heartbeat cycle atomically against the store
    pub async fn process(
        &mut self,
        store: &TopologyStore,
        heartbeat: &Heartbeat,
    ) -> Option<FailureEvent> {
        let event = store.apply(|graph| self.apply(graph, heartbeat)).await;
        self.latency_log
            .append(LatencyRecord::from_heartbeat(heartbeat));
        event
    }

    /// Diff the heartbeat against the graph, mutating health and metrics.
    ///
    /// Returns an event only when a node went ACTIVE -> FAILED or the failed
    /// edge set grew during this cycle.
    pub fn apply(&mut self, graph: &mut TopologyGraph, heartbeat: &Heartbeat) -> Option<FailureEvent> {
        let mut failed_nodes = Vec::new();

        for (node_id, report) in &heartbeat.node_statuses {
            let Some(stored) = graph.node(node_id).map(|n| n.health) else {
                tracing::debug!("Heartbeat reports unknown node {}, skipping", node_id);
                continue;
            };
            let reported = report.health();

            let outcome = match (stored, reported) {
                (Health::Active, Health::Failed) => graph.mark_node_failed(node_id).map(|_| {
                    tracing::info!("Node {} failed", node_id);
                    failed_nodes.push(node_id.clone());
                }),
                (Health::Failed, Health::Active) => graph
                    .restore_node(node_id, self.restore_cpu, self.restore_latency)
                    .map(|_| tracing::info!("Node {} recovered", node_id)),
                _ => Ok(()),
            };

            let outcome = outcome.and_then(|_| {
                if reported.is_active() {
                    graph.record_metrics(node_id, report.cpu, report.latency, heartbeat.timestamp)
                } else {
                    graph.touch(node_id, heartbeat.timestamp)
                }
            });
            if let Err(e) = outcome {
                tracing::warn!("Failed to apply heartbeat for node {}: {}", node_id, e);
            }
        }

        let mut new_edges = Vec::new();
        for key in &heartbeat.failed_edges {
            if self.failed_edges.insert(key.clone()) {
                tracing::info!("Edge {} failed", key);
                new_edges.push(key.clone());
            }
            if graph.mark_edge_failed(key).is_err() {
                tracing::debug!("Failed edge {} is not in the topology", key);
            }
        }

        if failed_nodes.is_empty() && new_edges.is_empty() {
            return None;
        }

        Some(FailureEvent {
            failed_node_ids: failed_nodes,
            failed_edge_keys: new_edges,
            timestamp: heartbeat.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::graph::{EdgeSpec, NodeSpec, TopologyInit};
    use serde_json::json;

    fn create_test_graph() -> TopologyGraph {
        let init = TopologyInit {
            nodes: ["A", "B", "C"]
                .iter()
                .map(|id| NodeSpec {
                    id: id.to_string(),
                    cpu: 8,
                    latency: 20,
                    status: None,
                })
                .collect(),
            edges: [("A", "B"), ("B", "C"), ("A", "C")]
                .iter()
                .map(|(s, t)| EdgeSpec {
                    id: None,
                    source: s.to_string(),
                    target: t.to_string(),
                    status: None,
                    latency: 10,
                })
                .collect(),
            timestamp: None,
        };
        TopologyGraph::from_init(&init).unwrap()
    }

    fn processor() -> HeartbeatProcessor {
        HeartbeatProcessor::new(4, 50, Arc::new(InMemoryLatencyLog::new(16)))
    }

    fn report(status: &str, cpu: i64, latency: i64) -> NodeReport {
        NodeReport {
            status: Some(status.to_string()),
            cpu,
            latency,
            outgoing_connections: vec![],
            incoming_connections: vec![],
        }
    }

    fn heartbeat(statuses: &[(&str, &str)], failed_edges: &[(&str, &str)]) -> Heartbeat {
        Heartbeat {
            node_statuses: statuses
                .iter()
                .map(|(id, status)| (id.to_string(), report(status, 6, 15)))
                .collect(),
            failed_edges: failed_edges.iter().map(|(s, t)| EdgeKey::new(*s, *t)).collect(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_from_value_requires_node_statuses() {
        let missing = json!({ "failedEdges": ["A->B"] });
        assert!(matches!(
            Heartbeat::from_value(missing),
            Err(NetpathError::Validation(_))
        ));

        let valid = json!({
            "nodeStatuses": { "A": { "status": "active", "cpu": 4, "latency": 10 } },
            "failedEdges": ["A->B"],
        });
        let hb = Heartbeat::from_value(valid).unwrap();
        assert_eq!(hb.failed_edges, vec![EdgeKey::new("A", "B")]);
        assert_eq!(hb.node_statuses["A"].health(), Health::Active);
    }

    #[test]
    fn test_node_failure_emits_single_event() {
        let mut graph = create_test_graph();
        let mut processor = processor();

        let hb = heartbeat(&[("A", "active"), ("B", "failed"), ("C", "active")], &[]);
        let event = processor.apply(&mut graph, &hb).unwrap();
        assert_eq!(event.failed_node_ids, vec!["B".to_string()]);
        assert_eq!(graph.node("B").unwrap().health, Health::Failed);

        // Same report again: no transition, no event
        assert!(processor.apply(&mut graph, &hb).is_none());
    }

    #[test]
    fn test_recovery_restores_defaults_then_records_metrics_without_event() {
        let mut graph = create_test_graph();
        graph.mark_node_failed("C").unwrap();
        let mut processor = processor();

        let hb = heartbeat(&[("C", "active")], &[]);
        assert!(processor.apply(&mut graph, &hb).is_none());
        let node = graph.node("C").unwrap();
        assert_eq!(node.health, Health::Active);
        assert_eq!(node.cpu_capacity, 6);
        assert_eq!(node.base_latency, 15);
    }

    #[test]
    fn test_failed_edge_set_only_grows() {
        let mut graph = create_test_graph();
        let mut processor = processor();

        let first = heartbeat(&[], &[("A", "B")]);
        let event = processor.apply(&mut graph, &first).unwrap();
        assert_eq!(event.failed_edge_keys, vec![EdgeKey::new("A", "B")]);
        assert!(event.failed_node_ids.is_empty());

        // Repeating never emits or shrinks
        assert!(processor.apply(&mut graph, &first).is_none());
        // Omitting the edge does not restore it
        assert!(processor.apply(&mut graph, &heartbeat(&[], &[])).is_none());
        assert!(processor.is_edge_failed(&EdgeKey::new("A", "B")));
        assert!(!graph.edge(&EdgeKey::new("A", "B")).unwrap().is_active());

        let second = heartbeat(&[], &[("A", "B"), ("B", "C")]);
        let event = processor.apply(&mut graph, &second).unwrap();
        assert_eq!(event.failed_edge_keys, vec![EdgeKey::new("B", "C")]);
        assert_eq!(processor.failed_edges().count(), 2);
    }

    #[test]
    fn test_unknown_edges_and_nodes_are_tolerated() {
        let mut graph = create_test_graph();
        let mut processor = processor();

        let hb = heartbeat(&[("Z", "failed")], &[("X", "Y")]);
        let event = processor.apply(&mut graph, &hb).unwrap();
        assert!(event.failed_node_ids.is_empty());
        assert!(processor.is_edge_failed(&EdgeKey::new("X", "Y")));
    }

    #[test]
    fn test_forget_and_reset() {
        let mut graph = create_test_graph();
        let mut processor = processor();
        processor.apply(&mut graph, &heartbeat(&[], &[("A", "B")]));

        assert!(processor.forget_edge(&EdgeKey::new("A", "B")));
        assert!(!processor.forget_edge(&EdgeKey::new("A", "B")));
        // A later heartbeat naming it again counts as growth
        assert!(processor.apply(&mut graph, &heartbeat(&[], &[("A", "B")])).is_some());

        processor.reset(vec![EdgeKey::new("B", "C")]);
        assert_eq!(
            processor.failed_edges().cloned().collect::<Vec<_>>(),
            vec![EdgeKey::new("B", "C")]
        );
    }

    #[test]
    fn test_latency_log_is_bounded() {
        let log = InMemoryLatencyLog::new(2);
        let mut hb = heartbeat(&[("A", "active"), ("B", "failed")], &[]);
        for latency in [1, 2, 3] {
            hb.node_statuses.get_mut("A").unwrap().latency = latency;
            log.append(LatencyRecord::from_heartbeat(&hb));
        }
        assert_eq!(log.len(), 2);
        let recent = log.recent(10);
        assert_eq!(recent[0].latencies["A"], Some(2));
        assert_eq!(recent[1].latencies["A"], Some(3));
        assert_eq!(recent[1].latencies["B"], None);
        assert_eq!(log.recent(1).len(), 1);
    }
}
