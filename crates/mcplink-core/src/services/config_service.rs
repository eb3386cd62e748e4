//! Config store write path.
//!
//! All admin mutations go through this service: it validates, persists via
//! the repositories, and publishes the matching change event. Persistence
//! failures reject the write and leave state unchanged — nothing is
//! published for a failed write.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::domain::{
    Endpoint, EndpointValidationError, NewEndpoint, ToolOverride, UpdateEndpoint,
    validate_endpoint_url,
};
use crate::events::{ConfigEvent, ConfigEventSender, EndpointSummary};
use crate::ports::{EndpointRepository, RepositoryError, ToolOverrideRepository};

/// Errors from config mutations.
#[derive(Debug, Error)]
pub enum ConfigServiceError {
    #[error(transparent)]
    Validation(#[from] EndpointValidationError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Write-path façade over the config store.
pub struct ConfigService {
    endpoints: Arc<dyn EndpointRepository>,
    overrides: Arc<dyn ToolOverrideRepository>,
    events: ConfigEventSender,
}

impl ConfigService {
    pub fn new(
        endpoints: Arc<dyn EndpointRepository>,
        overrides: Arc<dyn ToolOverrideRepository>,
        events: ConfigEventSender,
    ) -> Self {
        Self {
            endpoints,
            overrides,
            events,
        }
    }

    /// Create an endpoint. Publishes `CONNECT` when created enabled.
    pub async fn create_endpoint(
        &self,
        endpoint: NewEndpoint,
    ) -> Result<Endpoint, ConfigServiceError> {
        endpoint.validate()?;
        let created = self.endpoints.insert(endpoint).await?;
        if created.enabled {
            self.publish(ConfigEvent::connect(EndpointSummary::of(&created)));
        }
        Ok(created)
    }

    /// Delete an endpoint by name. Publishes `DISCONNECT` when it was
    /// enabled.
    pub async fn delete_endpoint(&self, name: &str) -> Result<(), ConfigServiceError> {
        let existing = self.endpoints.get_by_name(name).await?;
        self.endpoints.delete(existing.id).await?;
        if existing.enabled {
            self.publish(ConfigEvent::disconnect(EndpointSummary::of(&existing)));
        }
        Ok(())
    }

    /// Flip the enabled flag. Publishes `CONNECT`/`DISCONNECT` only on an
    /// actual transition.
    pub async fn set_endpoint_enabled(
        &self,
        name: &str,
        enabled: bool,
    ) -> Result<Endpoint, ConfigServiceError> {
        let existing = self.endpoints.get_by_name(name).await?;
        if existing.enabled == enabled {
            return Ok(existing);
        }
        let updated = self.endpoints.set_enabled(existing.id, enabled).await?;
        let summary = EndpointSummary::of(&updated);
        self.publish(if enabled {
            ConfigEvent::connect(summary)
        } else {
            ConfigEvent::disconnect(summary)
        });
        Ok(updated)
    }

    /// Change an endpoint URL. Publishes `UPDATE` when the endpoint is
    /// enabled (a disabled endpoint has no session to rewire).
    pub async fn set_endpoint_url(
        &self,
        name: &str,
        url: &str,
    ) -> Result<Endpoint, ConfigServiceError> {
        validate_endpoint_url(url)?;
        let existing = self.endpoints.get_by_name(name).await?;
        if existing.url == url {
            return Ok(existing);
        }
        let updated = self
            .endpoints
            .update(
                existing.id,
                UpdateEndpoint {
                    url: Some(url.to_string()),
                    ..UpdateEndpoint::default()
                },
            )
            .await?;
        if updated.enabled {
            self.publish(ConfigEvent::update(EndpointSummary::of(&updated)));
        }
        Ok(updated)
    }

    pub async fn list_endpoints(&self) -> Result<Vec<Endpoint>, ConfigServiceError> {
        Ok(self.endpoints.list().await?)
    }

    /// Upsert a tool override. Publishes `RELOAD`.
    pub async fn set_override(&self, ov: &ToolOverride) -> Result<(), ConfigServiceError> {
        self.overrides.upsert(ov).await?;
        self.publish(ConfigEvent::reload());
        Ok(())
    }

    /// Remove a tool override. Publishes `RELOAD`.
    pub async fn clear_override(
        &self,
        server_name: &str,
        tool_name: &str,
    ) -> Result<(), ConfigServiceError> {
        self.overrides.remove(server_name, tool_name).await?;
        self.publish(ConfigEvent::reload());
        Ok(())
    }

    pub async fn list_overrides(&self) -> Result<Vec<ToolOverride>, ConfigServiceError> {
        Ok(self.overrides.list().await?)
    }

    fn publish(&self, event: ConfigEvent) {
        debug!(?event, "publishing config event");
        // No subscribers is fine; the supervisor resyncs on its poll timer.
        let _ = self.events.send(event);
    }
}
