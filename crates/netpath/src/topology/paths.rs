//! Path sets and the store holding the last computation per pair

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use ts_rs::TS;

use super::graph::{EdgeKey, PairKey};
use super::heartbeat::FailureEvent;

/// Relative importance of hop count, cpu capacity and latency in the edge cost
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct WeightConfig {
    #[serde(default, alias = "hops")]
    pub hop: f64,
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub latency: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            hop: 0.5,
            cpu: 0.25,
            latency: 0.25,
        }
    }
}

impl WeightConfig {
    pub fn new(hop: f64, cpu: f64, latency: f64) -> Self {
        Self { hop, cpu, latency }
    }

    /// Scale the weights to sum to 1. Negative components count as zero; a
    /// non-positive (or non-finite) total falls back to the default weights.
    pub fn normalized(&self) -> Self {
        let clamp = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
        let (hop, cpu, latency) = (clamp(self.hop), clamp(self.cpu), clamp(self.latency));
        let total = hop + cpu + latency;
        if total <= 0.0 {
            return Self::default();
        }
        Self {
            hop: hop / total,
            cpu: cpu / total,
            latency: latency / total,
        }
    }
}

/// Rank label of a candidate within its set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PathType {
    Primary,
    Backup,
}

/// One loopless route, source..destination inclusive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct PathCandidate {
    pub path: Vec<String>,
    pub path_type: PathType,
    pub weight: f64,
    pub hop_count: usize,
    pub total_latency: i64,
}

impl PathCandidate {
    /// Whether the route visits the node
    pub fn visits(&self, node_id: &str) -> bool {
        self.path.iter().any(|n| n == node_id)
    }

    /// Whether the route traverses the directed edge
    pub fn traverses(&self, key: &EdgeKey) -> bool {
        self.path
            .windows(2)
            .any(|hop| hop[0] == key.source && hop[1] == key.target)
    }
}

/// Ranked candidates for one `(source, destination)` pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct PathSet {
    pub source: String,
    pub destination: String,
    pub candidates: Vec<PathCandidate>,
    pub weights: WeightConfig,
    pub active: bool,
    pub computed_at: DateTime<Utc>,
}

impl PathSet {
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        candidates: Vec<PathCandidate>,
        weights: WeightConfig,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            candidates,
            weights,
            active: true,
            computed_at: Utc::now(),
        }
    }

    pub fn empty(
        source: impl Into<String>,
        destination: impl Into<String>,
        weights: WeightConfig,
    ) -> Self {
        Self::new(source, destination, Vec::new(), weights)
    }

    pub fn key(&self) -> PairKey {
        PairKey::new(self.source.clone(), self.destination.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn primary(&self) -> Option<&PathCandidate> {
        self.candidates.first()
    }

    pub fn backups(&self) -> &[PathCandidate] {
        self.candidates.get(1..).unwrap_or(&[])
    }

    /// Whether any candidate touches a node or edge named by the event
    pub fn is_affected_by(&self, event: &FailureEvent) -> bool {
        self.candidates.iter().any(|candidate| {
            event.failed_node_ids.iter().any(|n| candidate.visits(n))
                || event.failed_edge_keys.iter().any(|k| candidate.traverses(k))
        })
    }
}

#[derive(Debug, Default)]
struct PathTable {
    /// Bumped whenever the table is cleared for a new topology
    generation: u64,
    sets: IndexMap<PairKey, PathSet>,
}

impl PathTable {
    fn put(&mut self, set: PathSet) {
        let key = set.key();
        self.sets.shift_remove(&key);
        self.sets.insert(key, set);
    }
}

/// Last computed path set per pair. Sets are replaced wholesale, never patched.
#[derive(Debug, Clone, Default)]
pub struct PathStore {
    table: Arc<RwLock<PathTable>>,
}

impl PathStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Topology generation the stored sets belong to
    pub async fn generation(&self) -> u64 {
        self.table.read().await.generation
    }

    /// Delete-then-reinsert the set for its pair
    pub async fn replace(&self, set: PathSet) {
        self.table.write().await.put(set);
    }

    /// Replace several sets only if the store has not been cleared since
    /// `generation` was read. Returns false when the batch was dropped.
    pub async fn replace_all_if_current(
        &self,
        generation: u64,
        batch: impl IntoIterator<Item = PathSet>,
    ) -> bool {
        let mut table = self.table.write().await;
        if table.generation != generation {
            return false;
        }
        for set in batch {
            table.put(set);
        }
        true
    }

    /// Mark a set stale. Returns false when the pair is unknown.
    pub async fn deactivate(&self, key: &PairKey) -> bool {
        let mut table = self.table.write().await;
        match table.sets.get_mut(key) {
            Some(set) => {
                set.active = false;
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, key: &PairKey) -> Option<PathSet> {
        self.table.read().await.sets.get(key).cloned()
    }

    /// The stored set for the pair, only while it is active
    pub async fn active(&self, key: &PairKey) -> Option<PathSet> {
        self.get(key).await.filter(|set| set.active)
    }

    pub async fn all(&self) -> Vec<PathSet> {
        self.table.read().await.sets.values().cloned().collect()
    }

    pub async fn all_active(&self) -> Vec<PathSet> {
        self.table
            .read()
            .await
            .sets
            .values()
            .filter(|set| set.active)
            .cloned()
            .collect()
    }

    /// Pairs whose stored candidates touch anything named by the event
    pub async fn pairs_touching(&self, event: &FailureEvent) -> Vec<PairKey> {
        self.table
            .read()
            .await
            .sets
            .iter()
            .filter(|(_, set)| set.is_affected_by(event))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.sets.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.table.read().await.sets.is_empty()
    }

    /// Drop every set and start a new generation
    pub async fn clear(&self) {
        let mut table = self.table.write().await;
        table.sets.clear();
        table.generation += 1;
    }
}
