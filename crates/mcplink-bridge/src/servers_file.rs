//! Servers file loading.
//!
//! The servers file is a JSON document with an `mcpServers` map keyed by
//! server name. `${VAR}` references anywhere in the file body are expanded
//! from the process environment before parsing, so secrets can live in the
//! environment rather than on disk. The supervisor re-reads the file when
//! its mtime changes.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::SystemTime;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use mcplink_core::domain::{ServerDefinition, ServerDefinitionError};

/// A parsed servers file.
#[derive(Debug, Clone, Default)]
pub struct ServersFile {
    pub servers: Vec<ServerDefinition>,
    /// Modification time at load, for change detection.
    pub mtime: Option<SystemTime>,
}

impl ServersFile {
    /// Definitions that should be materialized as subprocesses.
    #[must_use]
    pub fn enabled(&self) -> Vec<&ServerDefinition> {
        self.servers.iter().filter(|s| !s.disabled).collect()
    }

    /// Names of definitions that are present but disabled.
    #[must_use]
    pub fn disabled_names(&self) -> Vec<&str> {
        self.servers
            .iter()
            .filter(|s| s.disabled)
            .map(|s| s.name.as_str())
            .collect()
    }
}

/// Servers file load failures. A missing file is not an error — it loads
/// as an empty definition set.
#[derive(Debug, Error)]
pub enum ServersFileError {
    #[error("failed to read servers file: {0}")]
    Io(#[from] std::io::Error),

    #[error("servers file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Definition(#[from] ServerDefinitionError),
}

#[derive(Deserialize)]
struct RawServersFile {
    #[serde(default, rename = "mcpServers")]
    mcp_servers: BTreeMap<String, ServerDefinition>,
}

/// Load and validate the servers file at `path`.
///
/// # Errors
///
/// Returns an error for unreadable or malformed files, or for definitions
/// that fail validation; the caller keeps its previous definitions in that
/// case.
pub fn load_servers_file(path: &Path) -> Result<ServersFile, ServersFileError> {
    if !path.exists() {
        return Ok(ServersFile::default());
    }

    let mtime = file_mtime(path);
    let content = std::fs::read_to_string(path)?;
    let expanded = expand_env_vars(&content);
    let raw: RawServersFile = serde_json::from_str(&expanded)?;

    let mut servers = Vec::with_capacity(raw.mcp_servers.len());
    for (name, mut def) in raw.mcp_servers {
        def.name = name;
        def.validate()?;
        servers.push(def);
    }

    Ok(ServersFile { servers, mtime })
}

/// The current mtime of `path`, when it exists and is statable.
#[must_use]
pub fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Expand `${VAR}` references from the process environment. Unset
/// variables are left as-is, with a warning.
#[must_use]
pub fn expand_env_vars(input: &str) -> String {
    expand_env_vars_with(input, |name| std::env::var(name).ok())
}

fn expand_env_vars_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        warn!(var = name, "servers file references unset variable");
                        out.push_str(&rest[start..start + 2 + end + 1]);
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
