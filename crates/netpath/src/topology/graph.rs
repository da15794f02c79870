//! Graph model for the network topology

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{NetpathError, Result};

/// Health state of a node or a directed edge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    #[default]
    Active,
    Failed,
}

impl Health {
    /// Interpret a free-form status field: `"failed"` (any case) is FAILED,
    /// anything else, including a missing field, is ACTIVE.
    pub fn from_status(status: Option<&str>) -> Self {
        match status {
            Some(s) if s.eq_ignore_ascii_case("failed") => Health::Failed,
            _ => Health::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Health::Active)
    }

    pub fn as_status(&self) -> &'static str {
        match self {
            Health::Active => "active",
            Health::Failed => "failed",
        }
    }
}

/// Ordered `(source, target)` pair identifying a directed edge.
///
/// Renders as `source->target`, which is also the natural key of a path set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EdgeKey {
    pub source: String,
    pub target: String,
}

/// Path sets are keyed by the same ordered pair form as edges.
pub type PairKey = EdgeKey;

impl EdgeKey {
    pub const SEPARATOR: &'static str = "->";

    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.source == node_id || self.target == node_id
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.source, Self::SEPARATOR, self.target)
    }
}

impl FromStr for EdgeKey {
    type Err = NetpathError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(Self::SEPARATOR) {
            Some((source, target)) if !source.is_empty() && !target.is_empty() => {
                Ok(EdgeKey::new(source, target))
            }
            _ => Err(NetpathError::Validation(format!(
                "edge key must look like 'source->target', got '{}'",
                s
            ))),
        }
    }
}

impl TryFrom<String> for EdgeKey {
    type Error = NetpathError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<EdgeKey> for String {
    fn from(key: EdgeKey) -> Self {
        key.to_string()
    }
}

/// A node in the topology graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub cpu_capacity: i64,
    pub base_latency: i64,
    pub health: Health,
    pub last_seen: DateTime<Utc>,
}

impl Node {
    pub fn new(id: impl Into<String>, cpu_capacity: i64, base_latency: i64) -> Self {
        Self {
            id: id.into(),
            cpu_capacity,
            base_latency,
            health: Health::Active,
            last_seen: Utc::now(),
        }
    }

    pub fn with_health(mut self, health: Health) -> Self {
        self.health = health;
        self
    }

    pub fn is_active(&self) -> bool {
        self.health.is_active()
    }
}

/// A directed edge in the topology graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub status: Health,
    pub latency: i64,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>, latency: i64) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            status: Health::Active,
            latency,
        }
    }

    pub fn with_status(mut self, status: Health) -> Self {
        self.status = status;
        self
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.source.clone(), self.target.clone())
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Node entry of a `topology-init` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub id: String,
    pub cpu: i64,
    pub latency: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Edge entry of a `topology-init` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct EdgeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub latency: i64,
}

impl EdgeSpec {
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.source.clone(), self.target.clone())
    }
}

/// Full graph payload carried on the `topology-init` topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct TopologyInit {
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TopologyInit {
    /// Parse an untyped payload, rejecting anything without the required fields
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| NetpathError::Validation(format!("malformed topology-init payload: {}", e)))
    }
}

fn validate_metrics(id: &str, cpu: i64, latency: i64) -> Result<()> {
    if cpu < 1 {
        return Err(NetpathError::Validation(format!(
            "node {} must have cpu >= 1, got {}",
            id, cpu
        )));
    }
    if latency < 0 {
        return Err(NetpathError::Validation(format!(
            "node {} must have latency >= 0, got {}",
            id, latency
        )));
    }
    Ok(())
}

/// Immutable point-in-time copy of the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct TopologySnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub taken_at: DateTime<Utc>,
}

impl TopologySnapshot {
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn contains_node(&self, node_id: &str) -> bool {
        self.node(node_id).is_some()
    }

    pub fn has_edge(&self, source: &str, target: &str) -> bool {
        self.edges
            .iter()
            .any(|e| e.source == source && e.target == target)
    }
}

/// The topology graph: nodes keyed by id, directed edges keyed by `(source, target)`
#[derive(Debug, Clone, Default)]
pub struct TopologyGraph {
    nodes: IndexMap<String, Node>,
    edges: IndexMap<EdgeKey, Edge>,
}

impl TopologyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from an init payload.
    ///
    /// Duplicate node ids and duplicate `(source, target)` pairs keep the first
    /// occurrence. Edges referencing unknown nodes are dropped.
    pub fn from_init(init: &TopologyInit) -> Result<Self> {
        let mut graph = Self::new();
        let now = Utc::now();

        for spec in &init.nodes {
            if graph.nodes.contains_key(&spec.id) {
                tracing::debug!("Ignoring duplicate node {}", spec.id);
                continue;
            }
            validate_metrics(&spec.id, spec.cpu, spec.latency)?;
            let mut node = Node::new(spec.id.clone(), spec.cpu, spec.latency)
                .with_health(Health::from_status(spec.status.as_deref()));
            node.last_seen = now;
            graph.nodes.insert(spec.id.clone(), node);
        }

        if graph.nodes.is_empty() {
            return Err(NetpathError::Validation(
                "topology must contain at least one node".to_string(),
            ));
        }

        for spec in &init.edges {
            let key = spec.key();
            if graph.edges.contains_key(&key) {
                tracing::debug!("Ignoring duplicate edge {}", key);
                continue;
            }
            if !graph.nodes.contains_key(&spec.source) || !graph.nodes.contains_key(&spec.target) {
                tracing::warn!("Dropping edge {} with unknown endpoint", key);
                continue;
            }
            let edge = Edge::new(spec.source.clone(), spec.target.clone(), spec.latency)
                .with_status(Health::from_status(spec.status.as_deref()));
            graph.edges.insert(key, edge);
        }

        Ok(graph)
    }

    fn node_mut(&mut self, node_id: &str) -> Result<&mut Node> {
        self.nodes
            .get_mut(node_id)
            .ok_or_else(|| NetpathError::NotFound(format!("node {}", node_id)))
    }

    fn edge_mut(&mut self, key: &EdgeKey) -> Result<&mut Edge> {
        self.edges
            .get_mut(key)
            .ok_or_else(|| NetpathError::NotFound(format!("edge {}", key)))
    }

    /// Update a node's attributes and health, returning the previous health
    pub fn update_node(
        &mut self,
        node_id: &str,
        cpu: i64,
        latency: i64,
        health: Health,
    ) -> Result<Health> {
        validate_metrics(node_id, cpu, latency)?;
        let node = self.node_mut(node_id)?;
        let previous = node.health;
        node.cpu_capacity = cpu;
        node.base_latency = latency;
        node.health = health;
        node.last_seen = Utc::now();
        Ok(previous)
    }

    /// Update an edge's latency and health, returning the previous health
    pub fn update_edge(&mut self, key: &EdgeKey, health: Health, latency: i64) -> Result<Health> {
        let edge = self.edge_mut(key)?;
        let previous = edge.status;
        edge.status = health;
        edge.latency = latency;
        Ok(previous)
    }

    /// ACTIVE -> FAILED. Returns whether the node actually transitioned.
    pub fn mark_node_failed(&mut self, node_id: &str) -> Result<bool> {
        let node = self.node_mut(node_id)?;
        let transitioned = node.is_active();
        node.health = Health::Failed;
        Ok(transitioned)
    }

    /// FAILED -> ACTIVE. Always resets cpu and latency to the supplied
    /// defaults, discarding whatever the node reported before failing.
    pub fn restore_node(&mut self, node_id: &str, cpu: i64, latency: i64) -> Result<bool> {
        let node = self.node_mut(node_id)?;
        let transitioned = !node.is_active();
        node.health = Health::Active;
        node.cpu_capacity = cpu;
        node.base_latency = latency;
        Ok(transitioned)
    }

    pub fn mark_edge_failed(&mut self, key: &EdgeKey) -> Result<bool> {
        let edge = self.edge_mut(key)?;
        let transitioned = edge.is_active();
        edge.status = Health::Failed;
        Ok(transitioned)
    }

    pub fn restore_edge(&mut self, key: &EdgeKey) -> Result<bool> {
        let edge = self.edge_mut(key)?;
        let transitioned = !edge.is_active();
        edge.status = Health::Active;
        Ok(transitioned)
    }

    /// Record metrics reported by a heartbeat
    pub fn record_metrics(
        &mut self,
        node_id: &str,
        cpu: i64,
        latency: i64,
        seen_at: DateTime<Utc>,
    ) -> Result<()> {
        let node = self.node_mut(node_id)?;
        node.cpu_capacity = cpu.max(1);
        node.base_latency = latency.max(0);
        node.last_seen = seen_at;
        Ok(())
    }

    pub fn touch(&mut self, node_id: &str, seen_at: DateTime<Utc>) -> Result<()> {
        self.node_mut(node_id)?.last_seen = seen_at;
        Ok(())
    }

    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(NetpathError::Validation(format!(
                "node {} already exists",
                node.id
            )));
        }
        validate_metrics(&node.id, node.cpu_capacity, node.base_latency)?;
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Remove a node and every edge where it is source or target
    pub fn delete_node(&mut self, node_id: &str) -> Result<Node> {
        let node = self
            .nodes
            .shift_remove(node_id)
            .ok_or_else(|| NetpathError::NotFound(format!("node {}", node_id)))?;
        self.edges.retain(|key, _| !key.touches(node_id));
        Ok(node)
    }

    pub fn add_edge(&mut self, edge: Edge) -> Result<()> {
        let key = edge.key();
        if self.edges.contains_key(&key) {
            return Err(NetpathError::Validation(format!("edge {} already exists", key)));
        }
        for endpoint in [&edge.source, &edge.target] {
            if !self.nodes.contains_key(endpoint) {
                return Err(NetpathError::NotFound(format!("node {}", endpoint)));
            }
        }
        self.edges.insert(key, edge);
        Ok(())
    }

    pub fn delete_edge(&mut self, key: &EdgeKey) -> Result<Edge> {
        self.edges
            .shift_remove(key)
            .ok_or_else(|| NetpathError::NotFound(format!("edge {}", key)))
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn edge(&self, key: &EdgeKey) -> Option<&Edge> {
        self.edges.get(key)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Outgoing edges of a node, in insertion order
    pub fn edges_from<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.values().filter(move |e| e.source == node_id)
    }

    pub fn active_nodes(&self) -> Vec<Node> {
        self.nodes.values().filter(|n| n.is_active()).cloned().collect()
    }

    pub fn failed_nodes(&self) -> Vec<Node> {
        self.nodes.values().filter(|n| !n.is_active()).cloned().collect()
    }

    pub fn failed_edges(&self) -> Vec<EdgeKey> {
        self.edges
            .values()
            .filter(|e| !e.is_active())
            .map(Edge::key)
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Copy of the full graph, failed entities included
    pub fn snapshot(&self) -> TopologySnapshot {
        TopologySnapshot {
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.values().cloned().collect(),
            taken_at: Utc::now(),
        }
    }

    /// Copy restricted to ACTIVE nodes and ACTIVE edges between ACTIVE nodes.
    ///
    /// This is the view handed to path computation, which does no liveness
    /// filtering of its own.
    pub fn live_snapshot(&self) -> TopologySnapshot {
        let nodes: Vec<Node> = self.active_nodes();
        let edges = self
            .edges
            .values()
            .filter(|e| {
                e.is_active()
                    && self.nodes.get(&e.source).is_some_and(Node::is_active)
                    && self.nodes.get(&e.target).is_some_and(Node::is_active)
            })
            .cloned()
            .collect();
        TopologySnapshot {
            nodes,
            edges,
            taken_at: Utc::now(),
        }
    }
}
