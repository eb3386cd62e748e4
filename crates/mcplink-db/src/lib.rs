//! SQLite persistence for mcplink.
//!
//! Implements the core repository ports (`EndpointRepository`,
//! `ToolOverrideRepository`) on top of `sqlx` with SQLite. The schema is
//! created on first connect; there is no migration framework — columns are
//! added with `CREATE TABLE IF NOT EXISTS` semantics.

#![deny(unsafe_code)]

mod repositories;
mod setup;

pub use repositories::{SqliteEndpointRepository, SqliteOverrideRepository};
pub use setup::{setup_database, setup_test_database};
