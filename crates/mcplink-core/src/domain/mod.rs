//! Domain types for endpoints, server definitions, tools, and overrides.
//!
//! These types represent the configured world of the bridge and hub,
//! independent of any infrastructure concerns (database, sockets, process
//! management).
//!
//! # Design
//!
//! - `Endpoint` - A persisted remote hub endpoint with ID
//! - `NewEndpoint` / `UpdateEndpoint` - Write models for endpoint CRUD
//! - `ConnectionStatus` - Runtime connection state of an endpoint
//! - `ServerDefinition` - Configuration for one tool subprocess
//! - `ToolDescriptor` - A tool discovered via `tools/list`
//! - `ToolOverride` - Per-tool administrative flags (disable / rename)

mod endpoint;
mod server;
mod tool;

pub use endpoint::{
    validate_endpoint_url, ConnectionStatus, Endpoint, EndpointValidationError, NewEndpoint,
    UpdateEndpoint,
};
pub use server::{ServerDefinition, ServerDefinitionError, ServerKind};
pub use tool::{ToolDescriptor, ToolOverride, project_tools};
