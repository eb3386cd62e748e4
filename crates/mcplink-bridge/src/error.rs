//! Bridge error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the bridge runtime.
///
/// Transport and subprocess failures are recovered internally by the owning
/// endpoint session (reconnect with backoff); they surface here only as the
/// reason a session left `Open`.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to spawn server '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server '{0}' stdin closed")]
    SubprocessClosed(String),

    #[error("dial timed out after {0:?}")]
    DialTimeout(Duration),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("transport overrun on {0} (peer not draining)")]
    Overrun(&'static str),
}
