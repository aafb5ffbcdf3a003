//! INTERNALS event bus
//!
//! Scripts and plugins emit named events with a JSON payload; the host
//! subscribes to receive them. Events emitted while nobody is subscribed are
//! dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Capacity of the broadcast buffer
const EVENT_CAPACITY: usize = 256;

/// A named event with a JSON payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxEvent {
    pub name: String,
    pub payload: serde_json::Value,
}

/// Cloneable sender side of the event bus
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SandboxEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Emit an event, returning how many subscribers received it
    pub fn emit(&self, name: impl Into<String>, payload: serde_json::Value) -> usize {
        let event = SandboxEvent {
            name: name.into(),
            payload,
        };
        tracing::trace!("INTERNALS event '{}'", event.name);
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SandboxEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_emit_without_subscribers_is_dropped() {
        let bus = EventBus::new();
        assert_eq!(bus.emit("ready", json!(null)), 0);
    }

    #[test]
    fn test_subscriber_receives_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit("a", json!(1));
        bus.clone().emit("b", json!({"x": 2}));

        assert_eq!(rx.try_recv().unwrap().name, "a");
        let second = rx.try_recv().unwrap();
        assert_eq!(second.name, "b");
        assert_eq!(second.payload["x"], 2);
    }
}
