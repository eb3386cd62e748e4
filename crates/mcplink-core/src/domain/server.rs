//! Tool-server definitions.
//!
//! A server definition describes one tool subprocess: the command to spawn
//! for `stdio` servers, or the remote URL (reached through a local gateway
//! process) for `http` servers. Definitions come from the servers file and
//! are keyed by their unique name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport kind of a tool server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    /// Child process speaking newline-delimited JSON-RPC on stdio.
    #[default]
    Stdio,
    /// Remote HTTP/SSE server, bridged through a local gateway subprocess.
    #[serde(alias = "sse", alias = "streamablehttp", alias = "streamableHttp")]
    Http,
}

/// Configuration for one tool subprocess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDefinition {
    /// Unique name, taken from the servers-file map key.
    #[serde(skip)]
    pub name: String,

    /// Transport kind; defaults to stdio.
    #[serde(default, rename = "type", alias = "transportType")]
    pub kind: ServerKind,

    /// Executable for stdio servers (or a gateway override for http).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Argument vector passed to the command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Extra environment for the child, layered over the parent environment.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Remote URL for http servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Extra request headers for http servers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Disabled definitions are never materialized as subprocesses.
    #[serde(default)]
    pub disabled: bool,
}

impl ServerDefinition {
    /// Validate the definition against its transport kind.
    ///
    /// # Errors
    ///
    /// - `MissingCommand` for a stdio definition without `command`
    /// - `MissingUrl` for an http definition without `url`
    pub fn validate(&self) -> Result<(), ServerDefinitionError> {
        match self.kind {
            ServerKind::Stdio => {
                if self.command.as_deref().unwrap_or("").trim().is_empty() {
                    return Err(ServerDefinitionError::MissingCommand(self.name.clone()));
                }
            }
            ServerKind::Http => {
                if self.url.as_deref().unwrap_or("").trim().is_empty() {
                    return Err(ServerDefinitionError::MissingUrl(self.name.clone()));
                }
            }
        }
        Ok(())
    }
}

/// Configuration errors for server definitions, surfaced at load time.
#[derive(Debug, Error)]
pub enum ServerDefinitionError {
    #[error("server '{0}' is missing 'command' (required for stdio)")]
    MissingCommand(String),

    #[error("server '{0}' is missing 'url' (required for http)")]
    MissingUrl(String),

    #[error("duplicate server name: {0}")]
    DuplicateName(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdio_def(name: &str, command: Option<&str>) -> ServerDefinition {
        ServerDefinition {
            name: name.to_string(),
            kind: ServerKind::Stdio,
            command: command.map(str::to_string),
            args: Vec::new(),
            env: BTreeMap::new(),
            url: None,
            headers: BTreeMap::new(),
            disabled: false,
        }
    }

    #[test]
    fn stdio_requires_command() {
        assert!(stdio_def("echo", Some("./echo-server")).validate().is_ok());
        assert!(matches!(
            stdio_def("echo", None).validate(),
            Err(ServerDefinitionError::MissingCommand(n)) if n == "echo"
        ));
    }

    #[test]
    fn http_requires_url() {
        let mut def = stdio_def("news", None);
        def.kind = ServerKind::Http;
        assert!(matches!(
            def.validate(),
            Err(ServerDefinitionError::MissingUrl(_))
        ));
        def.url = Some("https://news.example.com/mcp".to_string());
        assert!(def.validate().is_ok());
    }

    #[test]
    fn kind_aliases_deserialize_to_http() {
        for raw in ["\"http\"", "\"sse\"", "\"streamablehttp\""] {
            let kind: ServerKind = serde_json::from_str(raw).unwrap();
            assert_eq!(kind, ServerKind::Http);
        }
        let kind: ServerKind = serde_json::from_str("\"stdio\"").unwrap();
        assert_eq!(kind, ServerKind::Stdio);
    }
}
