// incident-broker/src/sink/channel.rs
// ============================================================================
// Module: Incident Broker Channel Event Bus
// Description: In-process event bus backed by a Tokio mpsc channel.
// Purpose: Wire the pipeline's stages together without an external broker,
//          for tests and single-process deployments.
// Dependencies: incident-core, tokio
// ============================================================================

//! ## Overview
//! [`ChannelEventBus`] fans every publish into a single `tokio::sync::mpsc`
//! channel as a [`BusEvent`]; a consumer task drains it and routes by topic.

use tokio::sync::mpsc::UnboundedSender;

use incident_core::EventBus;
use incident_core::EventBusError;
use incident_core::EventMessage;
use incident_core::Topic;

/// A published event, carrying its topic alongside the message.
#[derive(Debug, Clone)]
pub struct BusEvent {
    /// Topic the message was published to.
    pub topic: Topic,
    /// The published message.
    pub message: EventMessage,
}

/// Event bus that forwards every publish into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelEventBus {
    sender: UnboundedSender<BusEvent>,
}

impl ChannelEventBus {
    /// Creates a channel event bus from an existing sender half.
    #[must_use]
    pub const fn new(sender: UnboundedSender<BusEvent>) -> Self {
        Self { sender }
    }
}

impl EventBus for ChannelEventBus {
    fn publish(&self, topic: Topic, message: &EventMessage) -> Result<(), EventBusError> {
        self.sender
            .send(BusEvent {
                topic,
                message: message.clone(),
            })
            .map_err(|err| EventBusError::PublishFailed(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, reason = "test assertions read values that must be present")]

    use serde_json::json;
    use tokio::sync::mpsc;

    use super::ChannelEventBus;
    use incident_core::EventBus;
    use incident_core::EventMessage;
    use incident_core::Topic;

    #[tokio::test]
    async fn publish_forwards_to_receiver() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let bus = ChannelEventBus::new(tx);
        let message = EventMessage {
            key: "merchant-1".to_string(),
            payload: json!({"signal_id": "sig-1"}),
        };
        bus.publish(Topic::SignalsNormalized, &message).expect("publish succeeds");
        let received = rx.recv().await.expect("event delivered");
        assert_eq!(received.topic.as_str(), "signals.normalized");
        assert_eq!(received.message.key, "merchant-1");
    }

    #[tokio::test]
    async fn publish_fails_after_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let bus = ChannelEventBus::new(tx);
        let message = EventMessage {
            key: "merchant-1".to_string(),
            payload: json!({}),
        };
        assert!(bus.publish(Topic::PatternsDetected, &message).is_err());
    }
}
