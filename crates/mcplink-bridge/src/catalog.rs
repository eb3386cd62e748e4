//! Catalog snapshot: the on-disk JSON dump of currently known tools.
//!
//! Written by the supervisor after discovery so admin tooling can read the
//! full (unfiltered) tool set without talking to any server. Writes are
//! atomic — a reader observes either the previous snapshot or the full new
//! one, never a truncated file.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use mcplink_core::domain::ToolDescriptor;

/// `{servers: {name: [tool, …]}}` as persisted to disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub servers: BTreeMap<String, Vec<ToolDescriptor>>,
}

impl CatalogSnapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tool list for one server.
    pub fn insert_server(&mut self, server_name: impl Into<String>, tools: Vec<ToolDescriptor>) {
        self.servers.insert(server_name.into(), tools);
    }

    /// Drop a server from the snapshot (it was disabled or removed).
    pub fn remove_server(&mut self, server_name: &str) -> bool {
        self.servers.remove(server_name).is_some()
    }

    /// Write the snapshot atomically: serialize to a sibling temp file,
    /// then rename over the target.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error; the previous snapshot (if any) is
    /// left intact on failure.
    pub fn write_atomic(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_vec_pretty(self).map_err(io::Error::other)?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp);

        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, path)
    }

    /// Read a snapshot back from disk.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O or parse error.
    pub fn read(path: &Path) -> io::Result<Self> {
        let body = std::fs::read(path)?;
        serde_json::from_slice(&body).map_err(io::Error::other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> CatalogSnapshot {
        let mut snapshot = CatalogSnapshot::new();
        snapshot.insert_server(
            "calc",
            vec![ToolDescriptor {
                name: "add".to_string(),
                description: Some("adds two numbers".to_string()),
                input_schema: Some(json!({"type": "object"})),
            }],
        );
        snapshot
    }

    #[test]
    fn snapshot_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tools_cache.json");

        let snapshot = sample();
        snapshot.write_atomic(&path).unwrap();
        assert_eq!(CatalogSnapshot::read(&path).unwrap(), snapshot);

        // No temp file left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("tools_cache.json")]);
    }

    #[test]
    fn snapshot_serializes_with_input_schema_key() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["servers"]["calc"][0]["name"], "add");
        assert!(value["servers"]["calc"][0].get("inputSchema").is_some());
    }

    #[test]
    fn rewrite_replaces_the_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tools_cache.json");

        let mut snapshot = sample();
        snapshot.write_atomic(&path).unwrap();
        snapshot.remove_server("calc");
        snapshot.insert_server("news", Vec::new());
        snapshot.write_atomic(&path).unwrap();

        let read = CatalogSnapshot::read(&path).unwrap();
        assert!(!read.servers.contains_key("calc"));
        assert!(read.servers.contains_key("news"));
    }
}
