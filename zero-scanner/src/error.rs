//! Scanner error taxonomy.
//!
//! Only [`ScanError::Configuration`] is ever fatal, and only before the loop
//! starts. Everything raised by a task body or a provider call stops at the
//! execution governor and ends up as an [`ErrorClass`] in the run stats.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::data::ProviderError;

/// Classification tag written into run stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    TaskTimeout,
    TaskBodyError,
    ProviderError,
    UniverseResolutionFailure,
    ConfigurationError,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TaskTimeout => "TaskTimeout",
            Self::TaskBodyError => "TaskBodyError",
            Self::ProviderError => "ProviderError",
            Self::UniverseResolutionFailure => "UniverseResolutionFailure",
            Self::ConfigurationError => "ConfigurationError",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by the scanner engine.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("task {task} exceeded its {timeout:?} deadline")]
    TaskTimeout { task: String, timeout: Duration },

    #[error("task {task} failed: {message}")]
    TaskBodyError { task: String, message: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("universe resolution failed: {0}")]
    UniverseResolutionFailure(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ScanError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::TaskTimeout { .. } => ErrorClass::TaskTimeout,
            Self::TaskBodyError { .. } => ErrorClass::TaskBodyError,
            Self::Provider(_) => ErrorClass::ProviderError,
            Self::UniverseResolutionFailure(_) => ErrorClass::UniverseResolutionFailure,
            Self::Configuration(_) => ErrorClass::ConfigurationError,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

impl From<zero_common::Error> for ScanError {
    fn from(e: zero_common::Error) -> Self {
        Self::Configuration(e.to_string())
    }
}

impl From<zero_common::ValidationError> for ScanError {
    fn from(e: zero_common::ValidationError) -> Self {
        Self::Configuration(e.to_string())
    }
}

/// Failure returned by a task body.
#[derive(Debug, Error)]
pub enum TaskError {
    /// A data provider call failed (including a short-circuited breaker).
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The body noticed its cancellation token and stopped early.
    #[error("task cancelled")]
    Cancelled,

    /// Anything else the task logic raised.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Provider(_) => ErrorClass::ProviderError,
            Self::Cancelled => ErrorClass::TaskTimeout,
            Self::Other(_) => ErrorClass::TaskBodyError,
        }
    }
}
