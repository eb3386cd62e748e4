//! SQLite repository implementations.

mod sqlite_endpoint_repository;
mod sqlite_override_repository;

use chrono::{DateTime, TimeZone, Utc};
use mcplink_core::ports::RepositoryError;

pub use sqlite_endpoint_repository::SqliteEndpointRepository;
pub use sqlite_override_repository::SqliteOverrideRepository;

/// Parse a datetime string from SQLite (`YYYY-MM-DD HH:MM:SS`) to UTC.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| Utc.from_utc_datetime(&dt))
        .unwrap_or_else(|_| Utc::now())
}

/// Map `sqlx` errors to repository errors, detecting unique-key conflicts.
pub(crate) fn map_sqlx_error(e: sqlx::Error, conflict_message: &str) -> RepositoryError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        return RepositoryError::Conflict(conflict_message.to_string());
    }
    RepositoryError::Internal(msg)
}
