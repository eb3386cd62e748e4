//! The local hub: accepts browser and tool-server WebSocket clients,
//! aggregates advertised tools, and routes JSON-RPC requests from browsers
//! to the owning tool-server session.
//!
//! All routing state lives in a single serializing router task; sessions
//! hold only a channel to it. The axum listener authenticates upgrades via
//! the token-validator port before a session is registered.

#![deny(unsafe_code)]

mod auth;
mod browser;
mod router;
mod server;
mod state;
mod toolserver;

pub use auth::StaticTokenValidator;
pub use router::{RouterHandle, RouterMsg, SessionId, spawn_router};
pub use server::{build_router, start_hub};
pub use state::{HubContext, HubState};
