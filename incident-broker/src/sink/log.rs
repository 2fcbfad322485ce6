// incident-broker/src/sink/log.rs
// ============================================================================
// Module: Incident Broker Log Event Bus
// Description: Log-only event bus for local development and tests.
// Purpose: Record every publish as a structured log line without requiring a
//          running message broker.
// Dependencies: incident-core, tracing
// ============================================================================

//! ## Overview
//! [`LogEventBus`] never fails a publish; it exists so the pipeline can run
//! end to end without a Kafka (or equivalent) deployment during development.

use incident_core::EventBus;
use incident_core::EventBusError;
use incident_core::EventMessage;
use incident_core::Topic;

/// Event bus that records every publish via `tracing` and never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventBus;

impl EventBus for LogEventBus {
    fn publish(&self, topic: Topic, message: &EventMessage) -> Result<(), EventBusError> {
        tracing::info!(
            topic = topic.as_str(),
            key = message.key.as_str(),
            payload = %message.payload,
            "published event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::LogEventBus;
    use incident_core::EventBus;
    use incident_core::EventMessage;
    use incident_core::Topic;

    #[test]
    fn publish_never_fails() {
        let bus = LogEventBus;
        let message = EventMessage {
            key: "merchant-1".to_string(),
            payload: json!({"hello": "world"}),
        };
        assert!(bus.publish(Topic::SignalsNormalized, &message).is_ok());
    }
}
