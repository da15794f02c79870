pub mod alerts;
pub mod config;
pub mod error;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod simulator;

use std::sync::Arc;

use netpath::TopologyService;

use crate::{alerts::AlertService, config::ServerConfig, simulator::NetworkSimulator};

/// Shared state handed to every route
#[derive(Clone)]
pub struct AppState {
    pub topology: TopologyService,
    pub simulator: Arc<NetworkSimulator>,
    pub alerts: AlertService,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Start the topology core and attach the simulator and alert listener.
    /// Must run inside a tokio runtime.
    pub fn new(config: ServerConfig) -> Self {
        let topology = TopologyService::start(config.netpath_config());
        let simulator = Arc::new(NetworkSimulator::new(
            topology.clone(),
            config.latency_jitter_ms,
        ));
        let alerts = AlertService::from_config(&config);
        alerts.spawn(topology.bus());

        Self {
            topology,
            simulator,
            alerts,
            config: Arc::new(config),
        }
    }
}
