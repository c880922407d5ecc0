//! Error types for slipway.

use derive_more::Display;
use thiserror::Error;

/// Category of a validation or resolution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ErrorKind {
    /// Zero or several branches of a mutually exclusive union are populated.
    InvalidUnion,
    /// A declared parameter has neither a default nor a supplied value.
    MissingParameter,
    /// A value was supplied for a parameter the strategy does not declare.
    UnknownParameter,
    /// Array value for a string parameter, or the other way around.
    ParameterTypeMismatch,
    /// A build run carries both an inline build spec and a build name, or neither.
    AmbiguousBuildReference,
    /// A retention count limit outside the accepted range.
    RetentionPolicyConflict,
    /// Two entries of a name-keyed list share a name.
    DuplicateName,
    /// A reserved system parameter name was declared or supplied.
    RestrictedParameter,
    /// A volume mount or override names a volume nobody declares.
    UndefinedVolume,
    /// A build or run overrides a strategy volume that is not overridable.
    VolumeNotOverridable,
    /// The referenced build does not exist.
    BuildNotFound,
    /// The referenced build strategy does not exist.
    StrategyNotFound,
    /// A scalar field holds an unusable value.
    InvalidField,
}

/// A validation or resolution failure with enough context to render a
/// user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {path}: {message}")]
pub struct ValidationError {
    pub kind: ErrorKind,
    /// Field path of the offending value, e.g. `spec.paramValues[tag]`.
    pub path: String,
    /// Offending value, when there is one to show.
    pub value: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn new(kind: ErrorKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            value: None,
            message: message.into(),
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Prefix the field path, used when a nested check reports upwards.
    pub fn within(mut self, parent: &str) -> Self {
        self.path = if self.path.is_empty() {
            parent.to_string()
        } else {
            format!("{}.{}", parent, self.path)
        };
        self
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
