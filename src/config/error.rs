//! Configuration Error Types

use std::path::PathBuf;
use thiserror::Error;

use crate::error::BroadcastError;

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    /// A source could not be read or deserialized
    #[error("Failed to load configuration from '{path}': {error}")]
    LoadError { path: PathBuf, error: String },
}

impl ConfigurationError {
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl ToString,
        context: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            context: context.into(),
        }
    }

    pub fn load_error(path: impl Into<PathBuf>, error: impl ToString) -> Self {
        Self::LoadError {
            path: path.into(),
            error: error.to_string(),
        }
    }
}

impl From<ConfigurationError> for BroadcastError {
    fn from(err: ConfigurationError) -> Self {
        BroadcastError::configuration("config", err.to_string())
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
