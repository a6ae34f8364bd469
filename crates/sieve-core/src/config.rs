//! Configuration types for Wallet Sieve.
//!
//! The client reads `sieve.json` from the working directory. Every field has a
//! default, so a missing file or an empty object yields a usable configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SieveError};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "sieve.json";

/// Default base URL of the analysis backend.
fn default_backend_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

/// Default inactivity timeout for a generation stream, in seconds.
const fn default_chunk_timeout() -> u64 {
    60
}

/// Default timeout for plain request/response calls, in seconds.
const fn default_request_timeout() -> u64 {
    30
}

/// Default directory for saved snippets.
fn default_snippet_dir() -> String {
    ".".to_string()
}

/// Default buffer capacity for generation event subscribers.
const fn default_event_capacity() -> usize {
    256
}

/// Main configuration for the Wallet Sieve client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Base URL of the analysis backend (without the `/api` suffix).
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Model used for filter generation. Falls back to the backend's
    /// `selected_model` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Prompt template file name used for filter generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,

    /// Maximum silence between two stream chunks before the stream is failed.
    #[serde(default = "default_chunk_timeout")]
    pub chunk_timeout_secs: u64,

    /// Timeout for non-streaming backend calls.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Directory that saved snippets are written to.
    #[serde(default = "default_snippet_dir")]
    pub snippet_dir: String,

    /// Per-subscriber buffer size for live generation events.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            model: None,
            prompt_template: None,
            chunk_timeout_secs: default_chunk_timeout(),
            request_timeout_secs: default_request_timeout(),
            snippet_dir: default_snippet_dir(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `sieve.json` exists but contains invalid JSON or
    /// invalid values.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            SieveError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `sieve.json` inside `dir`.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `SieveError::ConfigParseError` if the file cannot be read or is
    /// not valid JSON, and `SieveError::ConfigValidationError` if a value is
    /// out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(SieveError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| SieveError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `SieveError::ConfigValidationError` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        let url = self.backend_url.trim();
        if url.is_empty() {
            return Err(SieveError::config_validation(
                "backendUrl must not be empty",
                "Set backendUrl to the analysis backend address in your sieve.json",
            ));
        }

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SieveError::config_validation(
                format!("backendUrl must use http or https, got '{url}'"),
                "Prefix backendUrl with http:// or https:// in your sieve.json",
            ));
        }

        if self.chunk_timeout_secs == 0 {
            return Err(SieveError::config_validation(
                "chunkTimeoutSecs must be greater than 0",
                "Set chunkTimeoutSecs to at least 1 second in your sieve.json",
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(SieveError::config_validation(
                "requestTimeoutSecs must be greater than 0",
                "Set requestTimeoutSecs to at least 1 second in your sieve.json",
            ));
        }

        if self.snippet_dir.trim().is_empty() {
            return Err(SieveError::config_validation(
                "snippetDir must not be empty",
                "Provide a snippet directory in your sieve.json (use '.' for current directory)",
            ));
        }

        if self.event_capacity == 0 {
            return Err(SieveError::config_validation(
                "eventCapacity must be greater than 0",
                "Set eventCapacity to at least 1 in your sieve.json",
            ));
        }

        Ok(())
    }

    /// Stream inactivity timeout as a `Duration`.
    #[must_use]
    pub const fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }

    /// Request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
