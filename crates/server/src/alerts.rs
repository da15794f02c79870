//! Alerting collaborator - turns bus traffic into operator alerts
//!
//! Failure events raise FAILURE alerts per failed node or edge; heartbeats
//! raise LATENCY alerts for nodes reporting above the threshold. While an
//! alert of the same kind for the same subject is unacknowledged, no new one
//! is raised.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use netpath::{BusMessage, EventBus, FailureEvent, Heartbeat};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use ts_rs::TS;
use uuid::Uuid;

use crate::config::ServerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    Failure,
    Latency,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: Uuid,
    pub kind: AlertKind,
    /// Node id or `source->target` edge key
    pub subject: String,
    pub message: String,
    pub value: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
}

/// Outbound delivery of raised alerts
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> anyhow::Result<()>;
}

/// Writes alerts to the log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &Alert) -> anyhow::Result<()> {
        tracing::warn!("[{:?}] {}", alert.kind, alert.message);
        Ok(())
    }
}

/// Posts alerts as JSON to a webhook
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, alert: &Alert) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(alert)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct AlertService {
    alerts: Arc<DashMap<Uuid, Alert>>,
    sender: broadcast::Sender<Alert>,
    notifier: Arc<dyn Notifier>,
    latency_threshold_ms: i64,
}

impl AlertService {
    pub fn new(latency_threshold_ms: i64, notifier: Arc<dyn Notifier>) -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            alerts: Arc::new(DashMap::new()),
            sender,
            notifier,
            latency_threshold_ms,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        let notifier: Arc<dyn Notifier> = match &config.alert_webhook_url {
            Some(url) => {
                tracing::info!("Alerts will be posted to {}", url);
                Arc::new(WebhookNotifier::new(url.clone()))
            }
            None => Arc::new(LogNotifier),
        };
        Self::new(config.latency_alert_threshold_ms, notifier)
    }

    /// Consume heartbeats and failure events from the bus until it closes
    pub fn spawn(&self, bus: &EventBus) -> JoinHandle<()> {
        let service = self.clone();
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => service.handle(&message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Alert listener lagged, skipped {} messages", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn handle(&self, message: &BusMessage) {
        match message {
            BusMessage::NodeFailure(event) => self.on_failure(event),
            BusMessage::Heartbeat(heartbeat) => self.on_heartbeat(heartbeat),
            _ => {}
        }
    }

    fn on_failure(&self, event: &FailureEvent) {
        for node_id in &event.failed_node_ids {
            self.raise(
                AlertKind::Failure,
                node_id.clone(),
                format!("Node {} failed", node_id),
                None,
            );
        }
        for key in &event.failed_edge_keys {
            self.raise(
                AlertKind::Failure,
                key.to_string(),
                format!("Link {} failed", key),
                None,
            );
        }
    }

    fn on_heartbeat(&self, heartbeat: &Heartbeat) {
        for (node_id, report) in &heartbeat.node_statuses {
            if report.health().is_active() && report.latency > self.latency_threshold_ms {
                self.raise(
                    AlertKind::Latency,
                    node_id.clone(),
                    format!(
                        "Node {} latency {}ms exceeds {}ms",
                        node_id, report.latency, self.latency_threshold_ms
                    ),
                    Some(report.latency),
                );
            }
        }
    }

    /// Record and fan out an alert unless an open one already covers it
    pub fn raise(
        &self,
        kind: AlertKind,
        subject: String,
        message: String,
        value: Option<i64>,
    ) -> Option<Alert> {
        let open = self
            .alerts
            .iter()
            .any(|a| a.kind == kind && a.subject == subject && !a.acknowledged);
        if open {
            return None;
        }

        let alert = Alert {
            id: Uuid::new_v4(),
            kind,
            subject,
            message,
            value,
            created_at: Utc::now(),
            acknowledged: false,
        };
        self.alerts.insert(alert.id, alert.clone());
        let _ = self.sender.send(alert.clone());

        let notifier = self.notifier.clone();
        let outbound = alert.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&outbound).await {
                tracing::warn!("Failed to deliver alert {}: {}", outbound.id, e);
            }
        });

        Some(alert)
    }

    /// All alerts, newest first
    pub fn list(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.alerts.iter().map(|a| a.value().clone()).collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        alerts
    }

    pub fn acknowledge(&self, id: Uuid) -> Option<Alert> {
        self.alerts.get_mut(&id).map(|mut alert| {
            alert.acknowledged = true;
            alert.clone()
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.sender.subscribe()
    }
}
