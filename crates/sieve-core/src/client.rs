//! Typed HTTP client for the analysis backend.
//!
//! Every call maps to one `/api` endpoint. Non-success responses become
//! [`SieveError::Backend`] carrying the backend's `error` field when the body
//! is JSON, or the raw body text otherwise.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Result, SieveError};
use crate::generation::GenerationRequest;
use crate::wallet::{WalletList, WalletRecord};

/// Backend-side settings shared with every front end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Upstream inference API key. Empty until validated and stored.
    #[serde(default)]
    pub api_key: String,
    /// Models pinned for quick selection.
    #[serde(default)]
    pub starred_models: Vec<String>,
    /// Every model the key can access, as of the last refresh.
    #[serde(default)]
    pub all_models: Vec<String>,
    /// Model picked for generation.
    #[serde(default)]
    pub selected_model: String,
}

impl BackendConfig {
    /// Returns `true` once an API key has been stored.
    #[must_use]
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// The selected model, if one is set.
    #[must_use]
    pub fn selected_model(&self) -> Option<&str> {
        Some(self.selected_model.as_str()).filter(|m| !m.is_empty())
    }
}

/// Result of `POST /api/validate-key`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValidation {
    /// Whether the upstream API accepted the key.
    pub valid: bool,
    /// Why the key was rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ParseFilesResponse {
    wallets: WalletList,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    results: Vec<WalletRecord>,
}

/// Client for the analysis backend's `/api` surface.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
    request_timeout: Duration,
}

impl BackendClient {
    /// Creates a client for `base_url` (without the `/api` suffix).
    ///
    /// `request_timeout` bounds connection setup and every non-streaming call.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let http = Client::builder().connect_timeout(request_timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            http,
            base_url,
            request_timeout,
        })
    }

    /// Creates a client from the loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.backend_url.trim(), config.request_timeout())
    }

    /// The backend base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/{endpoint}", self.base_url)
    }

    /// `GET /api/config`
    pub async fn get_config(&self) -> Result<BackendConfig> {
        let response = self
            .http
            .get(self.url("config"))
            .timeout(self.request_timeout)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// `POST /api/config`
    pub async fn save_config(&self, config: &BackendConfig) -> Result<()> {
        let response = self
            .http
            .post(self.url("config"))
            .timeout(self.request_timeout)
            .json(config)
            .send()
            .await?;
        check(response).await?;
        debug!("Backend config saved");
        Ok(())
    }

    /// `GET /api/prompts`: available prompt template file names.
    pub async fn list_prompts(&self) -> Result<Vec<String>> {
        let response = self
            .http
            .get(self.url("prompts"))
            .timeout(self.request_timeout)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// `POST /api/validate-key`
    ///
    /// The backend reports a rejected key as `{"valid": false, "error": ...}`
    /// with a 500 status, so the body is decoded before the status is judged.
    pub async fn validate_key(&self, api_key: &str) -> Result<KeyValidation> {
        let response = self
            .http
            .post(self.url("validate-key"))
            .timeout(self.request_timeout)
            .json(&serde_json::json!({ "api_key": api_key }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        match serde_json::from_str::<KeyValidation>(&body) {
            Ok(validation) => Ok(validation),
            Err(_) if status.is_success() => Err(SieveError::backend(
                status.as_u16(),
                format!("unexpected validate-key response: {}", body.trim()),
            )),
            Err(_) => Err(SieveError::backend(status.as_u16(), error_message(&body))),
        }
    }

    /// `GET /api/models`: model identifiers available to the stored key.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .http
            .get(self.url("models"))
            .timeout(self.request_timeout)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// `POST /api/parse-files`: uploads workbooks and returns the parsed wallets.
    ///
    /// # Errors
    ///
    /// Returns `SieveError::Precondition` if `paths` is empty and
    /// `SieveError::Io` if a file cannot be read.
    pub async fn parse_files(&self, paths: &[PathBuf]) -> Result<WalletList> {
        if paths.is_empty() {
            return Err(SieveError::precondition(
                "No files selected",
                "Pass one or more workbook files to upload",
            ));
        }

        let mut form = Form::new();
        for path in paths {
            let bytes = tokio::fs::read(path).await?;
            debug!(path = %path.display(), bytes = bytes.len(), "Attaching workbook");
            let part = Part::bytes(bytes).file_name(upload_name(path));
            form = form.part("files", part);
        }

        let response = self
            .http
            .post(self.url("parse-files"))
            .multipart(form)
            .send()
            .await?;
        let parsed: ParseFilesResponse = check(response).await?.json().await?;
        info!(files = paths.len(), wallets = parsed.wallets.len(), "Workbooks parsed");
        Ok(parsed.wallets)
    }

    /// `POST /api/learn-filter-stream`: opens the generation stream.
    ///
    /// The returned response has an accepted status; read it with
    /// `bytes_stream()`. No overall timeout is applied since the stream is
    /// bounded per chunk by the consumer.
    pub async fn open_filter_stream(&self, request: &GenerationRequest) -> Result<Response> {
        let response = self
            .http
            .post(self.url("learn-filter-stream"))
            .json(request)
            .send()
            .await
            .map_err(|e| SieveError::transport(e.to_string()))?;
        check(response).await
    }

    /// `POST /api/execute`: runs `code` against the backend's wallet set and
    /// returns the matched records.
    pub async fn execute(&self, code: &str) -> Result<Vec<WalletRecord>> {
        let response = self
            .http
            .post(self.url("execute"))
            .json(&serde_json::json!({ "code": code }))
            .send()
            .await?;
        let executed: ExecuteResponse = check(response).await?.json().await?;
        Ok(executed.results)
    }
}

/// Passes success responses through and converts the rest into
/// `SieveError::Backend`.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SieveError::backend(status.as_u16(), error_message(&body)))
}

/// Extracts the `error` field from a JSON error body, falling back to the
/// raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

fn upload_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| "upload.xlsx".to_string(), |n| n.to_string_lossy().into_owned())
}
