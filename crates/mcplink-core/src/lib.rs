//! Core domain for mcplink: the connection and piping fabric between local
//! tool subprocesses, remote hubs, and browser clients.
//!
//! This crate is infrastructure-free. It holds the domain types (endpoints,
//! server definitions, tools, overrides), the JSON-RPC frame model used on
//! every wire, the configuration change events, the port traits the adapters
//! implement, and the runtime settings value objects.

#![deny(unsafe_code)]

pub mod domain;
pub mod events;
pub mod ports;
pub mod rpc;
pub mod services;
pub mod settings;
pub mod util;

// Re-export commonly used types for convenience
pub use domain::{
    ConnectionStatus, Endpoint, EndpointValidationError, NewEndpoint, ServerDefinition,
    ServerDefinitionError, ServerKind, ToolDescriptor, ToolOverride, UpdateEndpoint,
    project_tools,
};
pub use events::{
    ConfigEvent, ConfigEventKind, ConfigEventReceiver, ConfigEventSender, EndpointSummary,
    config_event_channel,
};
pub use ports::{
    EndpointRepository, RepositoryError, TokenAudience, TokenValidation, TokenValidator,
    ToolOverrideRepository,
};
pub use rpc::{RpcFrame, RpcId, RpcParseError};
pub use services::{ConfigService, ConfigServiceError};
pub use settings::{BridgeSettings, HubSettings, SettingsError};
