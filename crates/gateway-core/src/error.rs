//! Error types for the edge gateway.
//!
//! `GatewayError` is `Clone` so a single upstream failure can be delivered to
//! every branch of a teed body stream.

use thiserror::Error;

/// Result type alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Main gateway error type
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Request validation failed
    #[error("Validation error: {message}")]
    Validation {
        /// Error message
        message: String,
        /// Field that failed validation
        field: Option<String>,
        /// Machine-readable error code
        code: String,
    },

    /// The selected body strategy cannot perform the operation
    #[error("Operation '{operation}' is not supported by the {strategy} body buffer")]
    Unsupported {
        /// Operation that was attempted
        operation: &'static str,
        /// Strategy that rejected it
        strategy: &'static str,
    },

    /// The body buffer was already released
    #[error("Body buffer has been released")]
    BufferReleased,

    /// The forward body stream was already taken
    #[error("Body stream has already been consumed")]
    BodyConsumed,

    /// Body is not valid JSON (or not the expected JSON shape)
    #[error("Invalid JSON body: {message}")]
    InvalidJson {
        /// Error message
        message: String,
    },

    /// Missing or invalid credentials
    #[error("Authentication error: {message}")]
    Authentication {
        /// Error message
        message: String,
    },

    /// Object storage request failed
    #[error("Storage error: {message}")]
    Storage {
        /// Error message
        message: String,
        /// HTTP status returned by the store, if any
        status: Option<u16>,
    },

    /// Remote body container request failed
    #[error("Remote buffer error: {message}")]
    RemoteBuffer {
        /// Error message
        message: String,
    },

    /// Reading or writing a body stream failed
    #[error("Stream error: {message}")]
    Stream {
        /// Error message
        message: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl GatewayError {
    /// Create a validation error
    pub fn validation(
        message: impl Into<String>,
        field: Option<String>,
        code: impl Into<String>,
    ) -> Self {
        Self::Validation {
            message: message.into(),
            field,
            code: code.into(),
        }
    }

    /// Create an unsupported-operation error
    pub const fn unsupported(operation: &'static str, strategy: &'static str) -> Self {
        Self::Unsupported {
            operation,
            strategy,
        }
    }

    /// Create an invalid JSON error
    pub fn invalid_json(message: impl Into<String>) -> Self {
        Self::InvalidJson {
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Storage {
            message: message.into(),
            status,
        }
    }

    /// Create a remote buffer error
    pub fn remote_buffer(message: impl Into<String>) -> Self {
        Self::RemoteBuffer {
            message: message.into(),
        }
    }

    /// Create a streaming error
    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True when the error means the caller picked the wrong buffer strategy
    /// for the operation, rather than a runtime failure.
    #[must_use]
    pub const fn is_capability_mismatch(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    /// Short machine-readable error kind
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::Unsupported { .. } => "unsupported_operation",
            Self::BufferReleased => "buffer_released",
            Self::BodyConsumed => "body_consumed",
            Self::InvalidJson { .. } => "invalid_json",
            Self::Authentication { .. } => "authentication_error",
            Self::Storage { .. } => "storage_error",
            Self::RemoteBuffer { .. } => "remote_buffer_error",
            Self::Stream { .. } => "stream_error",
            Self::Configuration { .. } => "configuration_error",
            Self::Internal { .. } => "internal_error",
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_json(err.to_string())
    }
}
