//! Configuration for the netpath core

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::topology::paths::WeightConfig;

/// Core configuration for the topology runtime
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct NetpathConfig {
    /// Maximum number of ranked paths kept per pair (K)
    #[serde(default = "default_max_paths")]
    pub max_paths: usize,
    /// Capacity of the FIFO queue feeding the ingest worker
    #[serde(default = "default_ingest_queue_capacity")]
    pub ingest_queue_capacity: usize,
    /// Capacity of the queue feeding the failure coordinator
    #[serde(default = "default_failure_queue_capacity")]
    pub failure_queue_capacity: usize,
    /// Buffer size of the broadcast bus
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
    /// Number of latency-log records retained in memory
    #[serde(default = "default_latency_log_capacity")]
    pub latency_log_capacity: usize,
    /// Weights applied when a request supplies none
    #[serde(default)]
    pub default_weights: WeightConfig,
    /// CPU capacity assigned to a node on restore
    #[serde(default = "default_restore_cpu")]
    pub restore_cpu: i64,
    /// Base latency assigned to a node on restore
    #[serde(default = "default_restore_latency")]
    pub restore_latency: i64,
}

fn default_max_paths() -> usize {
    10
}

fn default_ingest_queue_capacity() -> usize {
    256
}

fn default_failure_queue_capacity() -> usize {
    64
}

fn default_bus_capacity() -> usize {
    1024
}

fn default_latency_log_capacity() -> usize {
    10_000
}

fn default_restore_cpu() -> i64 {
    4
}

fn default_restore_latency() -> i64 {
    50
}

impl Default for NetpathConfig {
    fn default() -> Self {
        Self {
            max_paths: default_max_paths(),
            ingest_queue_capacity: default_ingest_queue_capacity(),
            failure_queue_capacity: default_failure_queue_capacity(),
            bus_capacity: default_bus_capacity(),
            latency_log_capacity: default_latency_log_capacity(),
            default_weights: WeightConfig::default(),
            restore_cpu: default_restore_cpu(),
            restore_latency: default_restore_latency(),
        }
    }
}

impl NetpathConfig {
    /// Override K, ignoring zero
    pub fn with_max_paths(mut self, max_paths: usize) -> Self {
        if max_paths > 0 {
            self.max_paths = max_paths;
        }
        self
    }
}
