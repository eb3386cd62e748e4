//! Endpoint repository trait.

use async_trait::async_trait;

use super::RepositoryError;
use crate::domain::{ConnectionStatus, Endpoint, NewEndpoint, UpdateEndpoint};

/// Repository for persisted endpoint records.
///
/// The config store is the single writer of persisted state; the bridge
/// only ever calls `update_status`. Constraint: unique `name` across all
/// endpoints.
#[async_trait]
pub trait EndpointRepository: Send + Sync {
    /// Insert a new endpoint.
    ///
    /// # Errors
    ///
    /// - `Conflict` if an endpoint with the same name already exists
    /// - `Internal` for storage errors
    async fn insert(&self, endpoint: NewEndpoint) -> Result<Endpoint, RepositoryError>;

    /// Get an endpoint by its database ID.
    async fn get_by_id(&self, id: i64) -> Result<Endpoint, RepositoryError>;

    /// Get an endpoint by its unique name.
    async fn get_by_name(&self, name: &str) -> Result<Endpoint, RepositoryError>;

    /// List all endpoints, enabled or not.
    async fn list(&self) -> Result<Vec<Endpoint>, RepositoryError>;

    /// List only enabled endpoints.
    async fn list_enabled(&self) -> Result<Vec<Endpoint>, RepositoryError>;

    /// Apply a partial update; `None` fields are left unchanged.
    async fn update(&self, id: i64, update: UpdateEndpoint) -> Result<Endpoint, RepositoryError>;

    /// Flip the enabled flag.
    async fn set_enabled(&self, id: i64, enabled: bool) -> Result<Endpoint, RepositoryError>;

    /// Record a connection state transition reported by the bridge.
    ///
    /// `error` is stored as `last_error` (cleared when `None`); reaching
    /// `Connected` stamps `last_connected_at`.
    async fn update_status(
        &self,
        id: i64,
        status: ConnectionStatus,
        error: Option<&str>,
    ) -> Result<(), RepositoryError>;

    /// Delete an endpoint.
    async fn delete(&self, id: i64) -> Result<(), RepositoryError>;
}
