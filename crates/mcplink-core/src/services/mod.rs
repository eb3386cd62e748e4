//! Service layer: domain logic over the ports.

mod config_service;

pub use config_service::{ConfigService, ConfigServiceError};
