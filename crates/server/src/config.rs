//! Gateway configuration read from the environment

use std::str::FromStr;
use std::time::Duration;

use netpath::NetpathConfig;

/// Runtime settings for the gateway and the heartbeat simulator
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub heartbeat_interval: Duration,
    pub latency_jitter_ms: i64,
    pub latency_alert_threshold_ms: i64,
    pub alert_webhook_url: Option<String>,
    pub max_paths: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            heartbeat_interval: Duration::from_millis(5000),
            latency_jitter_ms: 0,
            latency_alert_threshold_ms: 200,
            alert_webhook_url: None,
            max_paths: 10,
        }
    }
}

/// Parse an env var, keeping the default when it is unset or unparseable
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            tracing::warn!("Ignoring unparseable {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host = std::env::var("HOST").unwrap_or(defaults.host);
        let port = env_or("PORT", defaults.port);
        let heartbeat_interval_ms = env_or("HEARTBEAT_INTERVAL_MS", 5000u64).max(1);
        let latency_jitter_ms = env_or("HEARTBEAT_LATENCY_JITTER_MS", defaults.latency_jitter_ms).max(0);
        let latency_alert_threshold_ms =
            env_or("LATENCY_ALERT_THRESHOLD_MS", defaults.latency_alert_threshold_ms);
        let alert_webhook_url = std::env::var("ALERT_WEBHOOK_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());
        let max_paths = env_or("NETPATH_MAX_PATHS", defaults.max_paths);

        Self {
            host,
            port,
            heartbeat_interval: Duration::from_millis(heartbeat_interval_ms),
            latency_jitter_ms,
            latency_alert_threshold_ms,
            alert_webhook_url,
            max_paths,
        }
    }

    /// Core configuration derived from the gateway settings
    pub fn netpath_config(&self) -> NetpathConfig {
        NetpathConfig::default().with_max_paths(self.max_paths)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.netpath_config().max_paths, 10);
    }

    #[test]
    fn test_zero_max_paths_keeps_core_default() {
        let config = ServerConfig {
            max_paths: 0,
            ..ServerConfig::default()
        };
        assert_eq!(config.netpath_config().max_paths, 10);
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        assert_eq!(env_or("NETPATH_TEST_UNSET_VARIABLE", 42u16), 42);
    }
}
