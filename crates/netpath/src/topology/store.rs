//! Topology graph store - the single piece of mutable shared state

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use ts_rs::TS;

use super::graph::{Edge, EdgeKey, Health, Node, TopologyGraph, TopologyInit, TopologySnapshot};
use crate::config::NetpathConfig;
use crate::Result;

/// Node and edge counts by health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct TopologyHealth {
    pub total_nodes: usize,
    pub active_nodes: usize,
    pub failed_nodes: usize,
    pub total_edges: usize,
    pub failed_edges: usize,
}

/// Shared handle to the canonical topology.
///
/// Every read and write goes through one `RwLock`, so a snapshot is always a
/// consistent point-in-time copy.
#[derive(Debug, Clone)]
pub struct TopologyStore {
    graph: Arc<RwLock<TopologyGraph>>,
    restore_cpu: i64,
    restore_latency: i64,
}

impl Default for TopologyStore {
    fn default() -> Self {
        Self::new(&NetpathConfig::default())
    }
}

impl TopologyStore {
    pub fn new(config: &NetpathConfig) -> Self {
        Self {
            graph: Arc::new(RwLock::new(TopologyGraph::new())),
            restore_cpu: config.restore_cpu,
            restore_latency: config.restore_latency,
        }
    }

    /// Replace the whole topology. The previous graph survives a failed init.
    pub async fn initialize(&self, init: &TopologyInit) -> Result<()> {
        let graph = TopologyGraph::from_init(init)?;
        tracing::info!(
            "Topology initialized: {} nodes, {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        *self.graph.write().await = graph;
        Ok(())
    }

    /// Run several mutations under a single write lock
    pub async fn apply<R>(&self, f: impl FnOnce(&mut TopologyGraph) -> R) -> R {
        let mut graph = self.graph.write().await;
        f(&mut graph)
    }

    pub async fn read<R>(&self, f: impl FnOnce(&TopologyGraph) -> R) -> R {
        let graph = self.graph.read().await;
        f(&graph)
    }

    pub async fn update_node(
        &self,
        node_id: &str,
        cpu: i64,
        latency: i64,
        health: Health,
    ) -> Result<Health> {
        self.graph
            .write()
            .await
            .update_node(node_id, cpu, latency, health)
    }

    pub async fn update_edge(&self, key: &EdgeKey, health: Health, latency: i64) -> Result<Health> {
        self.graph.write().await.update_edge(key, health, latency)
    }

    pub async fn mark_node_failed(&self, node_id: &str) -> Result<bool> {
        self.graph.write().await.mark_node_failed(node_id)
    }

    /// Restore with the configured default cpu and latency
    pub async fn restore_node(&self, node_id: &str) -> Result<bool> {
        self.graph
            .write()
            .await
            .restore_node(node_id, self.restore_cpu, self.restore_latency)
    }

    pub async fn mark_edge_failed(&self, key: &EdgeKey) -> Result<bool> {
        self.graph.write().await.mark_edge_failed(key)
    }

    pub async fn restore_edge(&self, key: &EdgeKey) -> Result<bool> {
        self.graph.write().await.restore_edge(key)
    }

    pub async fn add_node(&self, node: Node) -> Result<()> {
        self.graph.write().await.add_node(node)
    }

    pub async fn delete_node(&self, node_id: &str) -> Result<Node> {
        self.graph.write().await.delete_node(node_id)
    }

    pub async fn add_edge(&self, edge: Edge) -> Result<()> {
        self.graph.write().await.add_edge(edge)
    }

    pub async fn delete_edge(&self, key: &EdgeKey) -> Result<Edge> {
        self.graph.write().await.delete_edge(key)
    }

    pub async fn snapshot(&self) -> TopologySnapshot {
        self.graph.read().await.snapshot()
    }

    /// Health-filtered snapshot for path computation
    pub async fn live_snapshot(&self) -> TopologySnapshot {
        self.graph.read().await.live_snapshot()
    }

    pub async fn node(&self, node_id: &str) -> Option<Node> {
        self.graph.read().await.node(node_id).cloned()
    }

    pub async fn active_nodes(&self) -> Vec<Node> {
        self.graph.read().await.active_nodes()
    }

    pub async fn failed_nodes(&self) -> Vec<Node> {
        self.graph.read().await.failed_nodes()
    }

    pub async fn failed_edges(&self) -> Vec<EdgeKey> {
        self.graph.read().await.failed_edges()
    }

    pub async fn health(&self) -> TopologyHealth {
        let graph = self.graph.read().await;
        let failed_nodes = graph.nodes().filter(|n| !n.is_active()).count();
        TopologyHealth {
            total_nodes: graph.node_count(),
            active_nodes: graph.node_count() - failed_nodes,
            failed_nodes,
            total_edges: graph.edge_count(),
            failed_edges: graph.edges().filter(|e| !e.is_active()).count(),
        }
    }

    pub async fn is_initialized(&self) -> bool {
        !self.graph.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::graph::{EdgeSpec, NodeSpec};
    use crate::NetpathError;

    fn init(nodes: &[&str], edges: &[(&str, &str)]) -> TopologyInit {
        TopologyInit {
            nodes: nodes
                .iter()
                .map(|id| NodeSpec {
                    id: id.to_string(),
                    cpu: 8,
                    latency: 20,
                    status: None,
                })
                .collect(),
            edges: edges
                .iter()
                .map(|(s, t)| EdgeSpec {
                    id: None,
                    source: s.to_string(),
                    target: t.to_string(),
                    status: None,
                    latency: 5,
                })
                .collect(),
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn test_initialize_replaces_graph_and_keeps_old_on_error() {
        let store = TopologyStore::default();
        assert!(!store.is_initialized().await);

        store.initialize(&init(&["A", "B"], &[("A", "B")])).await.unwrap();
        store.initialize(&init(&["X"], &[])).await.unwrap();
        assert!(store.node("A").await.is_none());
        assert!(store.node("X").await.is_some());

        let err = store.initialize(&init(&[], &[])).await;
        assert!(matches!(err, Err(NetpathError::Validation(_))));
        assert!(store.node("X").await.is_some());
    }

    #[tokio::test]
    async fn test_restore_uses_configured_defaults() {
        let store = TopologyStore::default();
        store.initialize(&init(&["A"], &[])).await.unwrap();
        store.mark_node_failed("A").await.unwrap();
        assert!(store.restore_node("A").await.unwrap());

        let node = store.node("A").await.unwrap();
        assert_eq!((node.cpu_capacity, node.base_latency), (4, 50));
        assert!(matches!(
            store.restore_node("Z").await,
            Err(NetpathError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_apply_and_health_summary() {
        let store = TopologyStore::default();
        store
            .initialize(&init(&["A", "B", "C"], &[("A", "B"), ("B", "C")]))
            .await
            .unwrap();

        store
            .apply(|graph| -> crate::Result<bool> {
                graph.mark_node_failed("C")?;
                graph.mark_edge_failed(&EdgeKey::new("A", "B"))
            })
            .await
            .unwrap();

        let health = store.health().await;
        assert_eq!(health.total_nodes, 3);
        assert_eq!(health.active_nodes, 2);
        assert_eq!(health.failed_nodes, 1);
        assert_eq!(health.failed_edges, 1);

        let live = store.live_snapshot().await;
        assert_eq!(live.nodes.len(), 2);
        assert!(live.edges.is_empty());
        assert_eq!(store.snapshot().await.edges.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_node_cascades_through_store() {
        let store = TopologyStore::default();
        store
            .initialize(&init(&["A", "B", "C"], &[("A", "B"), ("B", "C"), ("C", "A")]))
            .await
            .unwrap();
        store.delete_node("B").await.unwrap();
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.edges.len(), 1);
        assert!(snapshot.has_edge("C", "A"));
    }
}
