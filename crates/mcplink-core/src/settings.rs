//! Runtime settings value objects.
//!
//! Both processes read their configuration from the environment exactly
//! once at bootstrap and pass the resulting value object into their
//! constructors. Nothing below the composition root touches `std::env`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_DB_PATH: &str = "data/mcplink.db";
pub const DEFAULT_SERVERS_FILE: &str = "data/mcp_config.json";
pub const DEFAULT_CATALOG_PATH: &str = "data/tools_cache.json";
pub const DEFAULT_BACKOFF_MAX_SECONDS: u64 = 60;
pub const DEFAULT_SUBPROCESS_GRACE_SECONDS: u64 = 5;
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 5;
pub const DEFAULT_DIAL_TIMEOUT_SECONDS: u64 = 10;
pub const DEFAULT_HUB_BIND_ADDR: &str = "0.0.0.0:8765";
pub const DEFAULT_BROWSER_PATH: &str = "/";
pub const DEFAULT_TOOL_PATH: &str = "/mcp";

/// Settings read from the environment failed to parse.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid value for {var}: {value}")]
    Invalid { var: String, value: String },
}

/// Bridge-side runtime configuration.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// SQLite database holding endpoints and overrides (`MCPLINK_DB_PATH`).
    pub db_path: PathBuf,
    /// Servers file with the `mcpServers` map (`MCPLINK_SERVERS_FILE`).
    pub servers_file: PathBuf,
    /// Where the supervisor writes the catalog snapshot
    /// (`BRIDGE_CATALOG_PATH`).
    pub catalog_path: PathBuf,
    /// Reconnect backoff cap (`BRIDGE_BACKOFF_MAX_SECONDS`).
    pub backoff_max: Duration,
    /// Grace period between SIGTERM and SIGKILL
    /// (`BRIDGE_SUBPROCESS_GRACE_SECONDS`).
    pub subprocess_grace: Duration,
    /// Token appended to every dial as `token=` (`BRIDGE_WS_TOKEN`).
    pub ws_token: Option<String>,
    /// Store resync interval when no event arrives.
    pub poll_interval: Duration,
    /// WebSocket dial timeout.
    pub dial_timeout: Duration,
}

impl BridgeSettings {
    /// Read bridge settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::Invalid` for unparseable numeric overrides.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build settings from an arbitrary variable lookup (tests use a map).
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, SettingsError> {
        Ok(Self {
            db_path: path_var(&lookup, "MCPLINK_DB_PATH", DEFAULT_DB_PATH),
            servers_file: path_var(&lookup, "MCPLINK_SERVERS_FILE", DEFAULT_SERVERS_FILE),
            catalog_path: path_var(&lookup, "BRIDGE_CATALOG_PATH", DEFAULT_CATALOG_PATH),
            backoff_max: secs_var(&lookup, "BRIDGE_BACKOFF_MAX_SECONDS", DEFAULT_BACKOFF_MAX_SECONDS)?,
            subprocess_grace: secs_var(
                &lookup,
                "BRIDGE_SUBPROCESS_GRACE_SECONDS",
                DEFAULT_SUBPROCESS_GRACE_SECONDS,
            )?,
            ws_token: nonempty(&lookup, "BRIDGE_WS_TOKEN"),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECONDS),
            dial_timeout: Duration::from_secs(DEFAULT_DIAL_TIMEOUT_SECONDS),
        })
    }
}

/// Hub-side runtime configuration.
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Listener address (`HUB_BIND_ADDR`).
    pub bind_addr: SocketAddr,
    /// Browser WebSocket path (`HUB_BROWSER_PATH`).
    pub browser_path: String,
    /// Tool-pipe WebSocket path (`HUB_TOOL_PATH`).
    pub tool_path: String,
    /// Expected browser token (`HUB_BROWSER_TOKEN`); unset admits all.
    pub browser_token: Option<String>,
    /// Expected tool-pipe token (`HUB_TOOL_TOKEN`); unset admits all.
    pub tool_token: Option<String>,
    /// SQLite database for override projection (`MCPLINK_DB_PATH`).
    pub db_path: PathBuf,
}

impl HubSettings {
    /// Read hub settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::Invalid` when `HUB_BIND_ADDR` is not a
    /// socket address.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build settings from an arbitrary variable lookup (tests use a map).
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, SettingsError> {
        let raw_addr =
            nonempty(&lookup, "HUB_BIND_ADDR").unwrap_or_else(|| DEFAULT_HUB_BIND_ADDR.to_string());
        let bind_addr = raw_addr.parse().map_err(|_| SettingsError::Invalid {
            var: "HUB_BIND_ADDR".to_string(),
            value: raw_addr,
        })?;
        Ok(Self {
            bind_addr,
            browser_path: nonempty(&lookup, "HUB_BROWSER_PATH")
                .unwrap_or_else(|| DEFAULT_BROWSER_PATH.to_string()),
            tool_path: nonempty(&lookup, "HUB_TOOL_PATH")
                .unwrap_or_else(|| DEFAULT_TOOL_PATH.to_string()),
            browser_token: nonempty(&lookup, "HUB_BROWSER_TOKEN"),
            tool_token: nonempty(&lookup, "HUB_TOOL_TOKEN"),
            db_path: path_var(&lookup, "MCPLINK_DB_PATH", DEFAULT_DB_PATH),
        })
    }
}

fn nonempty(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<String> {
    lookup(var).filter(|v| !v.trim().is_empty())
}

fn path_var(lookup: &impl Fn(&str) -> Option<String>, var: &str, default: &str) -> PathBuf {
    nonempty(lookup, var).map_or_else(|| PathBuf::from(default), PathBuf::from)
}

fn secs_var(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    default: u64,
) -> Result<Duration, SettingsError> {
    match nonempty(lookup, var) {
        None => Ok(Duration::from_secs(default)),
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| SettingsError::Invalid {
                var: var.to_string(),
                value: raw,
            }),
    }
}
