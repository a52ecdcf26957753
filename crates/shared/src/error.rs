//! # Shared Error Handling Module
//!
//! Error taxonomy for the SkinLens prediction service.
//!
//! ## Error Categories
//!
//! - **Validation Errors**: Malformed requests, unknown categories, bad images
//! - **Model Errors**: Artifacts that do not match the declared architecture
//! - **Configuration Errors**: Invalid options or unreadable artifact files
//! - **Inference Errors**: Tensor failures while serving a request
//! - **Network Errors**: Listener bind and serve failures
//! - **Internal Errors**: Anything else that escapes a request handler
//!
//! Model and configuration errors are startup errors: the process must not
//! begin serving when one occurs. Every other category is local to a single
//! request and is reported to the client as HTTP 400.

use std::net::AddrParseError;
use thiserror::Error;
use tracing::warn;

/// Result type alias for SkinLens operations
pub type Result<T> = std::result::Result<T, SkinlensError>;

/// Boxed source error carried by the variants that wrap a lower-level failure
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Error types for every SkinLens component
///
/// The `Display` output of each variant is the message returned to HTTP
/// clients, so it never contains backtraces or source chains.
#[derive(Error, Debug)]
pub enum SkinlensError {
    /// Request validation errors
    ///
    /// Missing form fields, malformed multipart bodies, categorical values
    /// the encoder was not fitted on, non-numeric or negative ages and byte
    /// streams that are not decodable images.
    ///
    /// **HTTP Status Mapping**: 400 Bad Request
    #[error("{reason}")]
    Validation {
        /// Reason for validation failure
        reason: String,
    },

    /// Model artifact errors
    ///
    /// Raised while loading weights, the encoder, the scaler or the label
    /// set when they disagree with the declared network architecture or
    /// with each other.
    ///
    /// **HTTP Status Mapping**: Not applicable (startup error)
    #[error("Model error: {message}")]
    Model {
        /// Description of the mismatch
        message: String,
        /// Underlying loader error
        #[source]
        source: Option<BoxedSource>,
    },

    /// Configuration validation errors
    ///
    /// **HTTP Status Mapping**: Not applicable (startup error)
    #[error("Configuration error: {message}")]
    Configuration {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// Optional source error for additional context
        #[source]
        source: Option<BoxedSource>,
    },

    /// Tensor or forward-pass failures while serving a request
    ///
    /// **HTTP Status Mapping**: 400 Bad Request
    #[error("Inference failed: {message}")]
    Inference {
        /// Description of the failed operation
        message: String,
        /// Underlying tensor library error
        #[source]
        source: Option<BoxedSource>,
    },

    /// Network-level errors from the HTTP listener
    ///
    /// **HTTP Status Mapping**: Not applicable (listener error)
    #[error("Network error on {target}: {message}")]
    Network {
        /// Address that failed
        target: String,
        /// Descriptive error message
        message: String,
        /// Underlying network error for debugging
        #[source]
        source: Option<BoxedSource>,
    },

    /// Internal errors
    ///
    /// Unexpected failures during request processing, for example a
    /// prediction task that panicked. The process keeps serving.
    ///
    /// **HTTP Status Mapping**: 400 Bad Request
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal failure
        message: String,
        /// Source error for debugging
        #[source]
        source: Option<BoxedSource>,
    },
}

impl SkinlensError {
    /// Creates a request validation error
    ///
    /// # Examples
    ///
    /// ```rust
    /// use skinlens_shared::error::SkinlensError;
    ///
    /// let error = SkinlensError::validation("missing form field `sex`");
    /// assert_eq!(error.to_string(), "missing form field `sex`");
    /// ```
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Creates a model artifact error
    pub fn model(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::Model {
            message: message.into(),
            source,
        }
    }

    /// Creates a configuration error with context
    ///
    /// # Examples
    ///
    /// ```rust
    /// use skinlens_shared::error::SkinlensError;
    ///
    /// let error = SkinlensError::configuration("Invalid listen address", None);
    /// ```
    pub fn configuration(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::Configuration {
            message: message.into(),
            source,
        }
    }

    /// Creates an inference error
    pub fn inference(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::Inference {
            message: message.into(),
            source,
        }
    }

    /// Creates a network error with target and context
    pub fn network(
        target: impl Into<String>,
        message: impl Into<String>,
        source: Option<BoxedSource>,
    ) -> Self {
        Self::Network {
            target: target.into(),
            message: message.into(),
            source,
        }
    }

    /// Creates an internal error with source context
    pub fn internal(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::Internal {
            message: message.into(),
            source,
        }
    }

    /// Maps this error to the HTTP status code returned to clients
    ///
    /// Every failure that can happen while serving a request is reported as
    /// 400 with the error message. Startup-only errors map to 500 should
    /// they ever reach the HTTP layer.
    pub fn to_http_status(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::Inference { .. } | Self::Internal { .. } => 400,
            Self::Model { .. } | Self::Configuration { .. } | Self::Network { .. } => {
                warn!(error = %self, "Startup error reached HTTP status mapping");
                500
            }
        }
    }

    /// Whether this error must stop the process before it starts serving
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Model { .. } | Self::Configuration { .. } | Self::Network { .. }
        )
    }
}

impl From<AddrParseError> for SkinlensError {
    fn from(err: AddrParseError) -> Self {
        SkinlensError::configuration(
            format!("Invalid network address: {}", err),
            Some(Box::new(err)),
        )
    }
}

impl From<std::io::Error> for SkinlensError {
    fn from(err: std::io::Error) -> Self {
        SkinlensError::internal(format!("I/O error: {}", err), Some(Box::new(err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_validation_message_is_bare_reason() {
        let err = SkinlensError::validation("unknown value `X` for `sex`");
        assert_eq!(err.to_string(), "unknown value `X` for `sex`");
    }

    #[test]
    fn test_source_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "weights.safetensors");
        let err = SkinlensError::model("cannot open weights", Some(Box::new(io)));
        assert!(err.source().is_some());
        assert!(err.is_fatal());
    }
}
