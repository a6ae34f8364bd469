//! The control panel: one operator session against one backend.
//!
//! [`ControlPanel`] owns the wallet [`Session`], the code buffer the generated
//! snippet streams into, and the backend settings. Each public method is one
//! operator action.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::client::{BackendClient, BackendConfig};
use crate::config::Config;
use crate::error::{Result, SieveError};
use crate::events::{EventBroadcaster, GenerationEvent};
use crate::generation::{
    consume_stream, GenerationRecord, GenerationRequest, GenerationSlot, StreamSummary,
    TokenSink,
};
use crate::selection::{ApplyReport, Session, ToggleOutcome};
use crate::stream::StreamIngestor;
use crate::wallet::WalletRecord;

/// Marker appended to the code buffer when a generation fails.
pub const ERROR_TRAILER_PREFIX: &str = "\n\n# AN ERROR OCCURRED: ";

/// File name for a snippet saved at `at`.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use sieve_core::panel::snippet_file_name;
///
/// let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 34, 56).unwrap();
/// assert_eq!(snippet_file_name(at), "snippet_2024-05-01T12-34-56-000Z.txt");
/// ```
#[must_use]
pub fn snippet_file_name(at: DateTime<Utc>) -> String {
    format!("snippet_{}.txt", at.format("%Y-%m-%dT%H-%M-%S-%3fZ"))
}

/// Short operator-facing text for a failed generation.
fn failure_text(error: &SieveError) -> String {
    match error {
        SieveError::ProducerError { message } => message.clone(),
        other => other
            .to_string()
            .lines()
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

/// Session-level state and the operator actions on it.
#[derive(Debug, Clone)]
pub struct ControlPanel {
    config: Config,
    client: BackendClient,
    backend: Arc<Mutex<BackendConfig>>,
    session: Arc<Mutex<Session>>,
    code: Arc<Mutex<String>>,
    slot: GenerationSlot,
    broadcaster: EventBroadcaster,
    last_generation: Arc<Mutex<Option<GenerationRecord>>>,
}

impl ControlPanel {
    /// Creates a panel whose client is built from `config`.
    pub fn new(config: Config) -> Result<Self> {
        let client = BackendClient::from_config(&config)?;
        Ok(Self::with_client(config, client))
    }

    /// Creates a panel around an existing client.
    #[must_use]
    pub fn with_client(config: Config, client: BackendClient) -> Self {
        let broadcaster = EventBroadcaster::new(config.event_capacity);
        Self {
            config,
            client,
            backend: Arc::new(Mutex::new(BackendConfig::default())),
            session: Arc::new(Mutex::new(Session::new())),
            code: Arc::new(Mutex::new(String::new())),
            slot: GenerationSlot::new(),
            broadcaster,
            last_generation: Arc::new(Mutex::new(None)),
        }
    }

    /// Client configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The backend client.
    #[must_use]
    pub const fn client(&self) -> &BackendClient {
        &self.client
    }

    /// Shared handle to the wallet session.
    #[must_use]
    pub fn session(&self) -> Arc<Mutex<Session>> {
        Arc::clone(&self.session)
    }

    /// The single-flight slot guarding filter generation.
    #[must_use]
    pub const fn generation_slot(&self) -> &GenerationSlot {
        &self.slot
    }

    /// Subscribes to live generation events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.broadcaster.subscribe()
    }

    // ------------------------------------------------------------------------
    // Backend settings
    // ------------------------------------------------------------------------

    /// Fetches the backend settings and caches them in the panel.
    pub async fn initialize(&self) -> Result<BackendConfig> {
        let fetched = self.client.get_config().await?;
        info!(
            has_key = fetched.has_api_key(),
            models = fetched.all_models.len(),
            "Loaded backend config"
        );
        *self.backend.lock().await = fetched.clone();
        Ok(fetched)
    }

    /// Cached backend settings.
    pub async fn backend_config(&self) -> BackendConfig {
        self.backend.lock().await.clone()
    }

    /// Validates `api_key` upstream and stores it in the backend settings.
    ///
    /// # Errors
    ///
    /// - `SieveError::Precondition` if the key is blank
    /// - `SieveError::InvalidApiKey` if the upstream API rejects it
    pub async fn validate_and_store_key(&self, api_key: &str) -> Result<()> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(SieveError::precondition(
                "API key is empty",
                "Enter the API key issued by your inference provider",
            ));
        }

        let validation = self.client.validate_key(api_key).await?;
        if !validation.valid {
            return Err(SieveError::invalid_api_key(
                validation
                    .error
                    .unwrap_or_else(|| "unknown validation error".to_string()),
            ));
        }

        let mut backend = self.backend.lock().await;
        backend.api_key = api_key.to_string();
        self.client.save_config(&backend).await?;
        info!("API key validated and stored");
        Ok(())
    }

    /// Refreshes the model list for the stored key and persists it.
    pub async fn refresh_models(&self) -> Result<Vec<String>> {
        let mut backend = self.backend.lock().await;
        if !backend.has_api_key() {
            return Err(SieveError::precondition(
                "No API key stored",
                "Validate and save an API key first",
            ));
        }

        let models = self.client.list_models().await?;
        backend.all_models.clone_from(&models);
        self.client.save_config(&backend).await?;
        info!(count = models.len(), "Model list refreshed");
        Ok(models)
    }

    /// Makes `model` the selected model. Saves only when it changes.
    ///
    /// Returns `true` if the selection changed.
    pub async fn select_model(&self, model: &str) -> Result<bool> {
        let mut backend = self.backend.lock().await;
        if model.is_empty() || backend.selected_model == model {
            return Ok(false);
        }
        backend.selected_model = model.to_string();
        self.client.save_config(&backend).await?;
        info!(model, "Selected model");
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Wallets and selection
    // ------------------------------------------------------------------------

    /// Uploads workbooks and replaces the wallet list, clearing the selection.
    ///
    /// Returns the number of wallets loaded.
    pub async fn load_wallets(&self, paths: &[PathBuf]) -> Result<usize> {
        let wallets = self.client.parse_files(paths).await?;
        let count = wallets.len();
        self.session.lock().await.load_wallets(wallets);
        Ok(count)
    }

    /// Applies bulk address text to the selection.
    pub async fn apply_bulk_input(&self, raw_text: &str) -> ApplyReport {
        let report = self.session.lock().await.apply_address_list(raw_text);
        if !report.unmatched.is_empty() {
            warn!(
                unmatched = report.unmatched.len(),
                "Some addresses match no loaded wallet"
            );
        }
        report
    }

    /// Toggles one wallet in the selection.
    pub async fn toggle_wallet(&self, index: usize, selected: bool) -> ToggleOutcome {
        let outcome = self.session.lock().await.toggle_by_index(index, selected);
        if !outcome.is_accepted() {
            warn!(index, ?outcome, "Ignored wallet toggle");
        }
        outcome
    }

    /// The bulk text view of the current selection.
    pub async fn address_text(&self) -> String {
        self.session.lock().await.address_text()
    }

    // ------------------------------------------------------------------------
    // Filter generation
    // ------------------------------------------------------------------------

    /// Generates a filter snippet from the selected wallets.
    ///
    /// `model` falls back to the configured model, then to the backend's
    /// selected model. The code buffer is cleared and receives tokens as they
    /// arrive. On failure the tokens received so far stay in the buffer,
    /// followed by an `# AN ERROR OCCURRED:` trailer.
    ///
    /// # Errors
    ///
    /// - `SieveError::Precondition` if no wallet is selected or no model or
    ///   prompt template is given
    /// - `SieveError::GenerationInProgress` if another generation is running
    /// - any stream failure from [`consume_stream`]
    pub async fn learn_filter(&self, model: Option<&str>, prompt_template: &str) -> Result<String> {
        let wallets = self.session.lock().await.selected_wallets();
        if wallets.is_empty() {
            return Err(SieveError::precondition(
                "No positive-example wallets selected",
                "Select wallets by address or by index before generating a filter",
            ));
        }

        let model = self.resolve_model(model).await.ok_or_else(|| {
            SieveError::precondition(
                "No model selected",
                "Pass --model, set model in sieve.json, or select a model first",
            )
        })?;

        if prompt_template.trim().is_empty() {
            return Err(SieveError::precondition(
                "No prompt template selected",
                "Pick one of the templates listed by `sieve prompts`",
            ));
        }

        let _guard = self.slot.try_begin()?;
        self.code.lock().await.clear();

        let request = GenerationRequest::new(wallets, model, prompt_template.trim());
        let mut record = GenerationRecord::begin(&request);
        let mut ingestor = StreamIngestor::new();
        info!(
            model = %request.model,
            prompt = %request.prompt_template,
            wallets = request.wallets.len(),
            "Requesting filter generation"
        );

        let result = self.run_generation(&request, &mut ingestor).await;
        record.finish(&result, &ingestor);
        info!(state = %record.state, tokens = record.token_count, "Filter generation ended");
        *self.last_generation.lock().await = Some(record);

        match result {
            Ok(_) => Ok(self.code.lock().await.clone()),
            Err(e) => {
                let mut code = self.code.lock().await;
                code.push_str(ERROR_TRAILER_PREFIX);
                code.push_str(&failure_text(&e));
                Err(e)
            }
        }
    }

    async fn run_generation(
        &self,
        request: &GenerationRequest,
        ingestor: &mut StreamIngestor,
    ) -> Result<StreamSummary> {
        let response = match self.client.open_filter_stream(request).await {
            Ok(response) => response,
            Err(e) => {
                self.broadcaster.send(GenerationEvent::failed(e.to_string()));
                return Err(e);
            }
        };

        ingestor.begin()?;
        self.broadcaster.send(GenerationEvent::started(
            &request.model,
            &request.prompt_template,
            request.wallets.len(),
        ));

        let sink = TokenSink::new(Arc::clone(&self.code), self.broadcaster.clone());
        consume_stream(
            response.bytes_stream(),
            ingestor,
            &sink,
            self.config.chunk_timeout(),
        )
        .await
    }

    async fn resolve_model(&self, explicit: Option<&str>) -> Option<String> {
        if let Some(model) = explicit.map(str::trim).filter(|m| !m.is_empty()) {
            return Some(model.to_string());
        }
        if let Some(model) = self.config.model.as_deref().filter(|m| !m.is_empty()) {
            return Some(model.to_string());
        }
        self.backend
            .lock()
            .await
            .selected_model()
            .map(str::to_string)
    }

    /// Record of the most recent generation, if any.
    pub async fn last_generation(&self) -> Option<GenerationRecord> {
        self.last_generation.lock().await.clone()
    }

    /// Returns `true` while a generation is streaming.
    #[must_use]
    pub fn is_generating(&self) -> bool {
        self.slot.is_busy()
    }

    // ------------------------------------------------------------------------
    // Code buffer
    // ------------------------------------------------------------------------

    /// Current contents of the code buffer.
    pub async fn code(&self) -> String {
        self.code.lock().await.clone()
    }

    /// Replaces the code buffer, e.g. after the operator edited the snippet.
    pub async fn set_code(&self, code: impl Into<String>) {
        *self.code.lock().await = code.into();
    }

    /// Empties the code buffer.
    pub async fn clear_code(&self) {
        self.code.lock().await.clear();
    }

    /// Runs the code buffer against the loaded wallets and returns the matches.
    pub async fn execute_code(&self) -> Result<Vec<WalletRecord>> {
        let code = self.code.lock().await.trim().to_string();
        if code.is_empty() {
            return Err(SieveError::precondition(
                "Code input is empty",
                "Generate a filter or load a snippet first",
            ));
        }
        if self.session.lock().await.wallets().is_empty() {
            return Err(SieveError::precondition(
                "No wallets loaded to filter",
                "Upload wallet workbooks before executing a filter",
            ));
        }

        let results = self.client.execute(&code).await?;
        info!(matched = results.len(), "Filter executed");
        Ok(results)
    }

    /// Writes the code buffer to a timestamped file in `dir`, or in the
    /// configured snippet directory when `dir` is `None`.
    ///
    /// Returns `None` without touching the filesystem if the buffer is empty.
    pub async fn save_snippet(&self, dir: Option<&Path>) -> Result<Option<PathBuf>> {
        let code = self.code.lock().await.clone();
        if code.is_empty() {
            return Ok(None);
        }

        let dir = dir.map_or_else(|| PathBuf::from(&self.config.snippet_dir), Path::to_path_buf);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(snippet_file_name(Utc::now()));
        tokio::fs::write(&path, code.as_bytes()).await?;
        info!(path = %path.display(), "Snippet saved");
        Ok(Some(path))
    }
}
