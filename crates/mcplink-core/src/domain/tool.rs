//! Tool descriptors and per-tool overrides.
//!
//! Tools are derived, not authored: they arrive in `tools/list` responses
//! and live in the hub catalog and the persisted snapshot. Overrides are
//! administrative flags layered on top; disabling a tool removes it from
//! the catalog browsers see without touching the subprocess.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool advertised by a tool server, as seen in `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema", skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

impl ToolDescriptor {
    /// Parse one entry of a `tools/list` result; returns `None` when the
    /// entry has no usable `name`.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let name = value.get("name")?.as_str()?.to_string();
        Some(Self {
            name,
            description: value
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            input_schema: value.get("inputSchema").cloned(),
        })
    }
}

/// Administrative flags for one `(server_name, tool_name)` pair.
///
/// A disabled override hides the tool from browsers; custom name and
/// description replace what the server advertised. The real tool name is
/// what gets sent to the server on `tools/call` regardless of renames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOverride {
    pub server_name: String,
    pub tool_name: String,
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ToolOverride {
    /// An override that only disables the tool.
    pub fn disabled(server_name: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            tool_name: tool_name.into(),
            disabled: true,
            custom_name: None,
            custom_description: None,
            updated_at: Utc::now(),
        }
    }
}

/// Project one server's advertised tools through its overrides: disabled
/// tools are removed, custom metadata is applied.
#[must_use]
pub fn project_tools(tools: &[ToolDescriptor], overrides: &[ToolOverride]) -> Vec<ToolDescriptor> {
    tools
        .iter()
        .filter_map(|tool| {
            let ov = overrides.iter().find(|o| o.tool_name == tool.name);
            match ov {
                Some(o) if o.disabled => None,
                Some(o) => {
                    let mut projected = tool.clone();
                    if let Some(name) = &o.custom_name {
                        projected.name = name.clone();
                    }
                    if let Some(desc) = &o.custom_description {
                        projected.description = Some(desc.clone());
                    }
                    Some(projected)
                }
                None => Some(tool.clone()),
            }
        })
        .collect()
}
