//! Lifecycle event definitions and bus.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use krane_common::ContainerId;

/// Actions reported on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    /// The kernel killed a process in the container for exceeding memory.
    Oom,
    /// The primary process exited.
    Die,
    /// The primary process started (or was restored).
    Start,
    /// The container was paused.
    Pause,
    /// The container was resumed.
    Unpause,
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Oom => write!(f, "oom"),
            Self::Die => write!(f, "die"),
            Self::Start => write!(f, "start"),
            Self::Pause => write!(f, "pause"),
            Self::Unpause => write!(f, "unpause"),
        }
    }
}

/// A single lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerEvent {
    /// Container the event concerns.
    pub id: String,
    /// What happened.
    pub action: EventAction,
    /// Action-specific attributes (e.g. `exitCode` on `die`).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
    /// Unix timestamp of the event.
    pub timestamp: i64,
}

/// Event bus for lifecycle events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ContainerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }
}

impl EventBus {
    /// Create a new event bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ContainerEvent> {
        self.sender.subscribe()
    }

    /// Publish an event without attributes.
    pub fn emit(&self, id: &ContainerId, action: EventAction) {
        self.emit_with_attributes(id, action, HashMap::new());
    }

    /// Publish an event with attributes.
    pub fn emit_with_attributes(
        &self,
        id: &ContainerId,
        action: EventAction,
        attributes: HashMap<String, String>,
    ) {
        let event = ContainerEvent {
            id: id.to_string(),
            action,
            attributes,
            timestamp: chrono::Utc::now().timestamp(),
        };
        // Ignore SendError (no subscribers)
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let id = ContainerId::new("abc123").unwrap();
        bus.emit_with_attributes(
            &id,
            EventAction::Die,
            HashMap::from([("exitCode".to_string(), "0".to_string())]),
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.id, "abc123");
        assert_eq!(event.action, EventAction::Die);
        assert_eq!(event.attributes["exitCode"], "0");
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        let bus = EventBus::new();
        bus.emit(&ContainerId::new("abc123").unwrap(), EventAction::Start);
    }
}
