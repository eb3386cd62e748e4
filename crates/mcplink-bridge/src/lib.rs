//! The bridge: one supervised WebSocket session per enabled endpoint and
//! server pair, each owning one tool subprocess, with frames spliced
//! between socket and stdio.
//!
//! The supervisor reads the config store, maintains the live session set,
//! reacts to change events, and publishes the discovered tool catalog as an
//! atomic snapshot file.

#![deny(unsafe_code)]

mod backoff;
mod catalog;
mod error;
mod servers_file;
mod session;
mod subprocess;
mod supervisor;

pub use backoff::Backoff;
pub use catalog::CatalogSnapshot;
pub use error::BridgeError;
pub use servers_file::{ServersFile, ServersFileError, expand_env_vars};
pub use session::{DiscoveredTools, SessionConfig, SessionHandle, spawn_session};
pub use subprocess::{OutFrame, SubprocessAdapter};
pub use supervisor::BridgeSupervisor;
