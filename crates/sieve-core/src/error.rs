//! Error types for Wallet Sieve.
//!
//! This module defines the error hierarchy for configuration loading, backend
//! requests, the generation stream, and control-panel preconditions.

use std::path::PathBuf;

/// A specialized `Result` type for sieve operations.
pub type Result<T> = std::result::Result<T, SieveError>;

/// Errors that can occur while driving the wallet-analysis workflow.
///
/// Variants are grouped by subsystem and carry an actionable suggestion where
/// the operator can do something about the failure.
#[derive(Debug, thiserror::Error)]
pub enum SieveError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in the configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your sieve.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Generation Stream Errors
    // ========================================================================
    /// The producer sent an `error` record in the middle of the stream.
    #[error("Stream error: {message}")]
    ProducerError {
        /// Message carried by the error record.
        message: String,
    },

    /// The transport failed while reading the stream.
    #[error("Stream transport failed: {message}\n\nSuggestion: Check that the backend is reachable and retry")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// No chunk arrived within the configured inactivity window.
    #[error("Stream stalled: no data received for {timeout_secs}s\n\nSuggestion: Retry, or raise chunkTimeoutSecs in sieve.json")]
    StreamTimeout {
        /// The inactivity timeout in seconds.
        timeout_secs: u64,
    },

    /// A generation stream is already running for this panel.
    #[error("A filter generation is already in progress\n\nSuggestion: Wait for the current generation to finish")]
    GenerationInProgress,

    // ========================================================================
    // Backend Errors
    // ========================================================================
    /// The backend answered with a non-success status.
    #[error("Backend error ({status}): {message}")]
    Backend {
        /// HTTP status code.
        status: u16,
        /// Error message reported by the backend.
        message: String,
    },

    /// The upstream API rejected the key during validation.
    #[error("API key rejected: {message}\n\nSuggestion: Check the key in your provider dashboard and try again")]
    InvalidApiKey {
        /// Reason reported by the backend.
        message: String,
    },

    /// The HTTP request could not be sent or its body could not be read.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // ========================================================================
    // Precondition Errors
    // ========================================================================
    /// A workflow step was attempted without the input it needs.
    #[error("{message}\n\nSuggestion: {suggestion}")]
    Precondition {
        /// What is missing.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // State Machine Errors
    // ========================================================================
    /// Invalid state transition attempted.
    #[error("Invalid state transition: cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
    },
}

impl SieveError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `ProducerError`.
    #[must_use]
    pub fn producer(message: impl Into<String>) -> Self {
        Self::ProducerError {
            message: message.into(),
        }
    }

    /// Creates a new `Transport` error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a new `Backend` error.
    #[must_use]
    pub fn backend(status: u16, message: impl Into<String>) -> Self {
        Self::Backend {
            status,
            message: message.into(),
        }
    }

    /// Creates a new `InvalidApiKey` error.
    #[must_use]
    pub fn invalid_api_key(message: impl Into<String>) -> Self {
        Self::InvalidApiKey {
            message: message.into(),
        }
    }

    /// Creates a new `Precondition` error.
    #[must_use]
    pub fn precondition(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `InvalidStateTransition` error.
    #[must_use]
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns `true` if this error ended a generation stream.
    #[must_use]
    pub const fn is_stream_failure(&self) -> bool {
        matches!(
            self,
            Self::ProducerError { .. } | Self::Transport { .. } | Self::StreamTimeout { .. }
        )
    }

    /// Returns `true` if this error is transient and the caller may retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::StreamTimeout { .. } | Self::GenerationInProgress => {
                true
            }
            Self::Backend { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if this error is fatal and requires immediate termination.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. } | Self::ConfigValidationError { .. }
        )
    }
}
