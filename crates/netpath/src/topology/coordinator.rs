//! Failure propagation - invalidates affected path sets and drives recomputation

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use indexmap::IndexMap;

use super::bus::EventBus;
use super::engine::PathEngine;
use super::graph::{PairKey, TopologySnapshot};
use super::heartbeat::FailureEvent;
use super::paths::{PathSet, PathStore, WeightConfig};
use super::store::TopologyStore;
use crate::{NetpathError, Result};

/// Provider of health-filtered topology snapshots
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<TopologySnapshot>;
}

#[async_trait]
impl SnapshotSource for TopologyStore {
    async fn fetch_snapshot(&self) -> Result<TopologySnapshot> {
        Ok(self.live_snapshot().await)
    }
}

/// One pair to compute, with the weights to compute it under
struct PairJob {
    source: String,
    destination: String,
    weights: WeightConfig,
}

pub struct FailureCoordinator {
    snapshots: Arc<dyn SnapshotSource>,
    paths: PathStore,
    engine: PathEngine,
    bus: EventBus,
}

impl FailureCoordinator {
    pub fn new(
        snapshots: Arc<dyn SnapshotSource>,
        paths: PathStore,
        engine: PathEngine,
        bus: EventBus,
    ) -> Self {
        Self {
            snapshots,
            paths,
            engine,
            bus,
        }
    }

    pub fn paths(&self) -> &PathStore {
        &self.paths
    }

    async fn fetch_snapshot(&self) -> Result<Arc<TopologySnapshot>> {
        self.snapshots
            .fetch_snapshot()
            .await
            .map(Arc::new)
            .map_err(|e| match e {
                NetpathError::UpstreamUnavailable(_) => e,
                other => NetpathError::UpstreamUnavailable(other.to_string()),
            })
    }

    /// Mark every set touching the event stale, then recompute each pair from
    /// one snapshot with the weights it was last computed with.
    pub async fn on_failure_event(&self, event: &FailureEvent) -> Result<Vec<PathSet>> {
        let generation = self.paths.generation().await;
        let affected = self.paths.pairs_touching(event).await;
        if affected.is_empty() {
            tracing::debug!("Failure event touches no stored path sets");
            return Ok(Vec::new());
        }

        tracing::info!(
            "Failure of {} nodes and {} edges invalidates {} path sets",
            event.failed_node_ids.len(),
            event.failed_edge_keys.len(),
            affected.len()
        );

        let mut jobs = Vec::with_capacity(affected.len());
        for key in &affected {
            let weights = self
                .paths
                .get(key)
                .await
                .map(|set| set.weights)
                .unwrap_or_default();
            self.paths.deactivate(key).await;
            jobs.push(PairJob {
                source: key.source.clone(),
                destination: key.target.clone(),
                weights,
            });
        }

        let snapshot = self.fetch_snapshot().await?;
        let sets = self.compute_all(snapshot, jobs).await;
        self.store_and_publish(generation, &sets).await;
        Ok(sets)
    }

    /// Compute every `source -> destination` pair against a single snapshot.
    ///
    /// Nothing is written unless the snapshot fetch succeeds.
    pub async fn recompute_batch(
        &self,
        pairs: &IndexMap<String, Vec<String>>,
        weights: &WeightConfig,
    ) -> Result<Vec<PathSet>> {
        let generation = self.paths.generation().await;
        let snapshot = self.fetch_snapshot().await?;

        let jobs: Vec<PairJob> = pairs
            .iter()
            .flat_map(|(source, destinations)| {
                destinations.iter().map(move |destination| PairJob {
                    source: source.clone(),
                    destination: destination.clone(),
                    weights: *weights,
                })
            })
            .collect();

        tracing::debug!("Recomputing batch of {} pairs", jobs.len());
        let sets = self.compute_all(snapshot, jobs).await;
        self.store_and_publish(generation, &sets).await;
        Ok(sets)
    }

    /// Compute and store the set for a single pair
    pub async fn compute_pair(
        &self,
        source: &str,
        destination: &str,
        weights: &WeightConfig,
    ) -> Result<PathSet> {
        let generation = self.paths.generation().await;
        let snapshot = self.fetch_snapshot().await?;
        let set = self.engine.compute(&snapshot, weights, source, destination);
        self.store_and_publish(generation, std::slice::from_ref(&set)).await;
        Ok(set)
    }

    /// Run the engine for each job on the blocking pool. A job that panics
    /// degrades to an empty set for its pair.
    async fn compute_all(&self, snapshot: Arc<TopologySnapshot>, jobs: Vec<PairJob>) -> Vec<PathSet> {
        let engine = self.engine;
        let handles = jobs.iter().map(|job| {
            let snapshot = snapshot.clone();
            let source = job.source.clone();
            let destination = job.destination.clone();
            let weights = job.weights;
            tokio::task::spawn_blocking(move || {
                engine.compute(&snapshot, &weights, &source, &destination)
            })
        });

        join_all(handles)
            .await
            .into_iter()
            .zip(jobs)
            .map(|(result, job)| {
                result.unwrap_or_else(|e| {
                    tracing::error!(
                        "Path computation for {} failed: {}",
                        PairKey::new(job.source.clone(), job.destination.clone()),
                        e
                    );
                    PathSet::empty(job.source, job.destination, job.weights.normalized())
                })
            })
            .collect()
    }

    /// Sets computed before the topology was re-initialised are dropped
    async fn store_and_publish(&self, generation: u64, sets: &[PathSet]) {
        if !self
            .paths
            .replace_all_if_current(generation, sets.iter().cloned())
            .await
        {
            tracing::debug!(
                "Dropping {} path sets computed against a replaced topology",
                sets.len()
            );
            return;
        }
        for set in sets {
            self.bus.path_update(set.clone());
        }
    }
}
