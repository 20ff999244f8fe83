//! Error types for ML stream pipelines

use thiserror::Error;

/// Result type for ML stream pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for ML stream pipeline operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid pipeline configuration, detected before any record flows
    #[error("Configuration error: {0}")]
    Config(String),

    /// A record does not satisfy the shape contract of a field
    #[error("Shape error in field '{field}': {message}")]
    Shape {
        /// Name of the offending field
        field: String,
        /// What went wrong
        message: String,
    },

    /// A field or nested path component is missing from a record
    #[error("Missing field: {0}")]
    MissingField(String),

    /// Data type mismatch
    #[error("Data type mismatch: {0}")]
    TypeMismatch(String),

    /// Index out of bounds
    #[error("Index out of bounds")]
    IndexOutOfBounds,

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Failure reported by an external source collaborator
    #[error("Source error: {0}")]
    Source(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// The background prefetch worker failed
    #[error("Prefetch error: {0}")]
    Prefetch(String),
}

impl Error {
    /// Build a shape error attributed to `field`
    pub fn shape(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Shape {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether this error was raised by configuration validation
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Re-attribute a shape error to `field`; other errors pass through
    #[must_use]
    pub fn in_field(self, field: &str) -> Self {
        match self {
            Error::Shape { message, .. } => Error::Shape {
                field: field.to_string(),
                message,
            },
            other => other,
        }
    }
}
