//! Manifest and settings errors.

use slipway_core::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("unsupported kind: {0}")]
    UnsupportedKind(String),

    #[error("unsupported apiVersion: {0}")]
    UnsupportedApiVersion(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("duplicate definition: {0}")]
    Duplicate(String),

    #[error("invalid {kind} {name}: {source}")]
    Validation {
        kind: String,
        name: String,
        #[source]
        source: ValidationError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
