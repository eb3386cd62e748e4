//! Endpoint domain types.
//!
//! An endpoint is a URL identifying one remote hub the bridge should dial.
//! Endpoints are created by admin action, and their `connection_status` is
//! written back by the bridge as sessions move through their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Runtime connection state of an endpoint, as reported by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    /// Stable string form used in storage and log output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }

    /// Parse the storage form; unknown values map to `Disconnected`.
    #[must_use]
    pub fn from_db(s: &str) -> Self {
        match s {
            "connecting" => Self::Connecting,
            "connected" => Self::Connected,
            "error" => Self::Error,
            _ => Self::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted remote hub endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// Database ID.
    pub id: i64,
    /// Unique human-readable name.
    pub name: String,
    /// WebSocket URL of the remote hub (`ws://` or `wss://`).
    pub url: String,
    /// Whether the bridge should maintain a session for this endpoint.
    pub enabled: bool,
    /// Last connection state reported by the bridge.
    pub connection_status: ConnectionStatus,
    /// When the bridge last reached `connected` for this endpoint.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last connection error, if any.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An endpoint to be inserted (no ID yet).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEndpoint {
    pub name: String,
    pub url: String,
    pub enabled: bool,
}

impl NewEndpoint {
    /// Create a new enabled endpoint.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            enabled: true,
        }
    }

    /// Validate the endpoint before persisting.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the URL is not a valid
    /// `ws://` / `wss://` URL.
    pub fn validate(&self) -> Result<(), EndpointValidationError> {
        if self.name.trim().is_empty() {
            return Err(EndpointValidationError::EmptyName);
        }
        validate_endpoint_url(&self.url)
    }
}

/// Partial update for an endpoint. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateEndpoint {
    pub name: Option<String>,
    pub url: Option<String>,
    pub enabled: Option<bool>,
}

/// Validation failures surfaced at CRUD time, before anything reaches
/// the runtime.
#[derive(Debug, Error)]
pub enum EndpointValidationError {
    #[error("endpoint name must not be empty")]
    EmptyName,

    #[error("endpoint URL is not valid: {0}")]
    InvalidUrl(String),

    #[error("endpoint URL must use ws:// or wss://, got {0}://")]
    UnsupportedScheme(String),
}

/// Check that `raw` parses as a URL with a `ws` or `wss` scheme.
///
/// # Errors
///
/// Returns `InvalidUrl` for unparseable input and `UnsupportedScheme` for
/// any other scheme (notably `http`/`https`).
pub fn validate_endpoint_url(raw: &str) -> Result<(), EndpointValidationError> {
    let parsed =
        url::Url::parse(raw).map_err(|e| EndpointValidationError::InvalidUrl(e.to_string()))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(EndpointValidationError::UnsupportedScheme(other.to_string())),
    }
}
