//! Shared hub state for the axum handlers.

use std::sync::Arc;

use mcplink_core::ports::TokenValidator;

use crate::router::RouterHandle;

/// Everything a WebSocket handler needs: the router inbox and the auth
/// collaborator.
pub struct HubContext {
    pub router: RouterHandle,
    pub validator: Arc<dyn TokenValidator>,
}

/// Application state shared across all handlers.
pub type HubState = Arc<HubContext>;
