//! Tool override repository trait.

use async_trait::async_trait;

use super::RepositoryError;
use crate::domain::ToolOverride;

/// Repository for per-tool administrative overrides, keyed by
/// `(server_name, tool_name)`.
#[async_trait]
pub trait ToolOverrideRepository: Send + Sync {
    /// Insert or replace the override for one tool. The stored
    /// `updated_at` is set by the repository.
    async fn upsert(&self, ov: &ToolOverride) -> Result<(), RepositoryError>;

    /// Remove the override for one tool. Removing a missing override is
    /// not an error.
    async fn remove(&self, server_name: &str, tool_name: &str) -> Result<(), RepositoryError>;

    /// List every override.
    async fn list(&self) -> Result<Vec<ToolOverride>, RepositoryError>;

    /// List the overrides for one server.
    async fn for_server(&self, server_name: &str) -> Result<Vec<ToolOverride>, RepositoryError>;
}
