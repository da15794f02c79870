//! In-process message bus carrying topology traffic between components

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ts_rs::TS;

use super::graph::TopologyInit;
use super::heartbeat::{FailureEvent, Heartbeat};
use super::paths::PathSet;

/// Topic names
pub mod topics {
    pub const TOPOLOGY_INIT: &str = "topology-init";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const NODE_FAILURE: &str = "node-failure";
    pub const PATH_UPDATE: &str = "path-update";
}

/// Message published on the bus, tagged with its topic
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(tag = "topic", content = "payload", rename_all = "kebab-case")]
pub enum BusMessage {
    TopologyInit(TopologyInit),
    Heartbeat(Heartbeat),
    NodeFailure(FailureEvent),
    PathUpdate(PathSet),
}

impl BusMessage {
    pub fn topic(&self) -> &'static str {
        match self {
            BusMessage::TopologyInit(_) => topics::TOPOLOGY_INIT,
            BusMessage::Heartbeat(_) => topics::HEARTBEAT,
            BusMessage::NodeFailure(_) => topics::NODE_FAILURE,
            BusMessage::PathUpdate(_) => topics::PATH_UPDATE,
        }
    }
}

/// Broadcasts bus messages to every subscriber
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusMessage>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, message: BusMessage) {
        tracing::trace!("Publishing on {}", message.topic());
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(message);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn topology_init(&self, init: TopologyInit) {
        self.publish(BusMessage::TopologyInit(init));
    }

    pub fn heartbeat(&self, heartbeat: Heartbeat) {
        self.publish(BusMessage::Heartbeat(heartbeat));
    }

    pub fn node_failure(&self, event: FailureEvent) {
        self.publish(BusMessage::NodeFailure(event));
    }

    pub fn path_update(&self, set: PathSet) {
        self.publish(BusMessage::PathUpdate(set));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::paths::WeightConfig;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new(4);
        bus.node_failure(FailureEvent::new(vec!["A".into()], vec![]));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_tagged_message() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.path_update(PathSet::empty("A", "B", WeightConfig::default()));

        let message = rx.recv().await.unwrap();
        assert_eq!(message.topic(), topics::PATH_UPDATE);

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["topic"], "path-update");
        assert_eq!(json["payload"]["source"], "A");
    }
}
