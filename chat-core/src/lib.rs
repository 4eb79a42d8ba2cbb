//! Chat Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by the other chat crates:
//! - Application configuration (broker endpoint, user, reconnect policy)
//! - The per-login `ConnectionConfig` value
//! - Global error types covering all error categories
//! - Structured logging with tracing
//! - Common constants

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;

// Re-export commonly used items at the crate root
pub use config::{AppConfig, ConnectionConfig};
pub use error::{ChatError, ChatResult};
pub use logging::init_logging;
