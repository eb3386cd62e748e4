//! Configuration change events.
//!
//! The config store's write path publishes these on a broadcast channel;
//! the bridge supervisor subscribes and diff-applies them. Delivery is
//! at-least-once and consumers are idempotent — a missed event is repaired
//! by the supervisor's periodic resync against the store.
//!
//! # Wire Format
//!
//! Events serialize with an upper-case `kind` tag, matching what an
//! external pub/sub transport would carry:
//!
//! ```json
//! { "kind": "UPDATE", "endpoint": { "id": 3, "name": "prod", "url": "wss://…" } }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::Endpoint;

/// What changed in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigEventKind {
    /// An endpoint became enabled (or was created enabled).
    Connect,
    /// An endpoint was disabled or deleted.
    Disconnect,
    /// An endpoint's URL changed.
    Update,
    /// Server definitions or overrides changed; recompute everything.
    Reload,
}

/// Lightweight endpoint payload for events — not the full `Endpoint`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSummary {
    pub id: i64,
    pub name: String,
    pub url: String,
}

impl EndpointSummary {
    /// Summarize a full endpoint record.
    #[must_use]
    pub fn of(endpoint: &Endpoint) -> Self {
        Self {
            id: endpoint.id,
            name: endpoint.name.clone(),
            url: endpoint.url.clone(),
        }
    }
}

/// One configuration change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEvent {
    pub kind: ConfigEventKind,
    /// The endpoint the event targets; absent for `Reload`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EndpointSummary>,
}

impl ConfigEvent {
    #[must_use]
    pub fn connect(endpoint: EndpointSummary) -> Self {
        Self {
            kind: ConfigEventKind::Connect,
            endpoint: Some(endpoint),
        }
    }

    #[must_use]
    pub fn disconnect(endpoint: EndpointSummary) -> Self {
        Self {
            kind: ConfigEventKind::Disconnect,
            endpoint: Some(endpoint),
        }
    }

    #[must_use]
    pub fn update(endpoint: EndpointSummary) -> Self {
        Self {
            kind: ConfigEventKind::Update,
            endpoint: Some(endpoint),
        }
    }

    #[must_use]
    pub const fn reload() -> Self {
        Self {
            kind: ConfigEventKind::Reload,
            endpoint: None,
        }
    }
}

pub type ConfigEventSender = broadcast::Sender<ConfigEvent>;
pub type ConfigEventReceiver = broadcast::Receiver<ConfigEvent>;

/// Create the config event channel. Slow subscribers that lag past
/// `capacity` events fall back to resync.
#[must_use]
pub fn config_event_channel(capacity: usize) -> ConfigEventSender {
    broadcast::channel(capacity).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_upper_case_kind() {
        let ev = ConfigEvent::update(EndpointSummary {
            id: 3,
            name: "prod".to_string(),
            url: "wss://hub.example.com/mcp".to_string(),
        });
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["kind"], "UPDATE");
        assert_eq!(json["endpoint"]["name"], "prod");

        let reload = serde_json::to_value(ConfigEvent::reload()).unwrap();
        assert_eq!(reload["kind"], "RELOAD");
        assert!(reload.get("endpoint").is_none());
    }
}
