//! Zero Common - Shared configuration, errors and logging for Zero services.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup
//! - Small utility functions

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{
    CircuitBreakerSettings, Config, NotificationConfig, ObservabilityConfig, ProviderConfig,
    ScannerConfig, ScheduleConfig, StatusServerConfig, TaskConfig, UniverseConfig, WindowConfig,
};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::{Config, ScannerConfig, TaskConfig};
    pub use crate::error::{Error, Result};
    pub use crate::logging::init_logging;
    pub use crate::validation::{Validate, ValidationError};
}
