//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces the core expects from infrastructure.
//! They contain no implementation details and use only domain types.
//!
//! # Design Rules
//!
//! - No `sqlx` types in any signature
//! - Repositories are minimal and CRUD-focused
//! - The auth collaborator is a single intent-based call

pub mod endpoint_repository;
pub mod override_repository;
pub mod token_validator;

use thiserror::Error;

pub use endpoint_repository::EndpointRepository;
pub use override_repository::ToolOverrideRepository;
pub use token_validator::{TokenAudience, TokenValidation, TokenValidator};

/// Storage-agnostic repository errors.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The requested record was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A record with the same unique key already exists.
    #[error("already exists: {0}")]
    Conflict(String),

    /// Storage backend error (database, filesystem, etc.).
    #[error("storage error: {0}")]
    Internal(String),
}
