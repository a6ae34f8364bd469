//! Filter generation: request body, single-flight guard, and the async loop
//! that drives a [`StreamIngestor`] from a live byte stream.

use std::fmt::Display;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, SieveError};
use crate::events::{EventBroadcaster, GenerationEvent};
use crate::stream::{FeedOutcome, StreamIngestor, StreamState};
use crate::wallet::WalletRecord;

// ============================================================================
// Request
// ============================================================================

/// Body of `POST /api/learn-filter-stream`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Positive-example wallets, in selection order.
    pub wallets: Vec<WalletRecord>,
    /// Model identifier.
    pub model: String,
    /// Prompt template file name.
    #[serde(rename = "promptTemplate")]
    pub prompt_template: String,
}

impl GenerationRequest {
    /// Creates a new request.
    #[must_use]
    pub fn new(
        wallets: Vec<WalletRecord>,
        model: impl Into<String>,
        prompt_template: impl Into<String>,
    ) -> Self {
        Self {
            wallets,
            model: model.into(),
            prompt_template: prompt_template.into(),
        }
    }
}

// ============================================================================
// Single-flight guard
// ============================================================================

/// Allows at most one generation at a time.
///
/// Clones share the same flag. [`GenerationSlot::try_begin`] hands out a
/// [`GenerationGuard`]; the slot is free again once the guard is dropped,
/// including when the future holding it is cancelled.
#[derive(Debug, Clone, Default)]
pub struct GenerationSlot {
    busy: Arc<AtomicBool>,
}

impl GenerationSlot {
    /// Creates a free slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the slot.
    ///
    /// # Errors
    ///
    /// Returns `SieveError::GenerationInProgress` if a guard is still alive.
    pub fn try_begin(&self) -> Result<GenerationGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SieveError::GenerationInProgress)?;
        Ok(GenerationGuard {
            busy: Arc::clone(&self.busy),
        })
    }

    /// Returns `true` while a generation holds the slot.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Proof that the holder owns the generation slot.
#[derive(Debug)]
pub struct GenerationGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for GenerationGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

// ============================================================================
// Record
// ============================================================================

/// Summary of a finished generation, kept by the panel for inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRecord {
    /// Model the snippet was generated with.
    pub model: String,
    /// Prompt template file name.
    pub prompt_template: String,
    /// Number of positive-example wallets sent.
    pub wallet_count: usize,
    /// Terminal state of the stream.
    pub state: StreamState,
    /// Tokens received.
    pub token_count: usize,
    /// Malformed records skipped.
    pub malformed: usize,
    /// Error message if the stream failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the request was sent.
    pub started_at: DateTime<Utc>,
    /// When the stream ended.
    pub ended_at: DateTime<Utc>,
}

impl GenerationRecord {
    /// Starts a record for `request`, stamped with the current time.
    #[must_use]
    pub fn begin(request: &GenerationRequest) -> Self {
        let now = Utc::now();
        Self {
            model: request.model.clone(),
            prompt_template: request.prompt_template.clone(),
            wallet_count: request.wallets.len(),
            state: StreamState::Streaming,
            token_count: 0,
            malformed: 0,
            error: None,
            started_at: now,
            ended_at: now,
        }
    }

    /// Closes the record with the outcome of [`consume_stream`].
    pub fn finish(&mut self, outcome: &Result<StreamSummary>, ingestor: &StreamIngestor) {
        self.malformed = ingestor.malformed_count();
        match outcome {
            Ok(summary) => {
                self.state = ingestor.state();
                self.token_count = summary.token_count;
            }
            Err(e) => {
                // Covers requests rejected before the stream opened.
                self.state = StreamState::Failed;
                self.error = Some(e.to_string());
            }
        }
        self.ended_at = Utc::now();
    }

    /// Wall-clock duration of the generation.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }
}

// ============================================================================
// Stream consumption
// ============================================================================

/// Where decoded tokens go besides the ingestor's own output.
#[derive(Debug, Clone)]
pub struct TokenSink {
    buffer: Arc<Mutex<String>>,
    broadcaster: EventBroadcaster,
}

impl TokenSink {
    /// Creates a sink that appends to `buffer` and publishes on `broadcaster`.
    #[must_use]
    pub const fn new(buffer: Arc<Mutex<String>>, broadcaster: EventBroadcaster) -> Self {
        Self {
            buffer,
            broadcaster,
        }
    }

    /// The shared buffer tokens are appended to.
    #[must_use]
    pub fn buffer(&self) -> &Arc<Mutex<String>> {
        &self.buffer
    }

    /// The broadcaster token events are published on.
    #[must_use]
    pub const fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }

    async fn append(&self, tokens: Vec<String>) {
        if tokens.is_empty() {
            return;
        }
        {
            let mut buffer = self.buffer.lock().await;
            for token in &tokens {
                buffer.push_str(token);
            }
        }
        for token in tokens {
            self.broadcaster.send(GenerationEvent::token(token));
        }
    }
}

/// Totals for a stream that ended naturally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Tokens received.
    pub token_count: usize,
    /// Characters in the final output.
    pub chars: usize,
}

/// Drives `ingestor` from `chunks` until the stream ends or fails.
///
/// `ingestor` must be in the `Streaming` state. Each chunk read is bounded by
/// `chunk_timeout`. Tokens are appended to the sink's buffer and published as
/// they are decoded, so observers see the snippet grow mid-stream. A
/// `completed` or `failed` event is published before returning.
///
/// # Errors
///
/// - `SieveError::ProducerError` if the stream carried an error record
/// - `SieveError::Transport` if reading a chunk failed
/// - `SieveError::StreamTimeout` if no chunk arrived within `chunk_timeout`
pub async fn consume_stream<S, B, E>(
    chunks: S,
    ingestor: &mut StreamIngestor,
    sink: &TokenSink,
    chunk_timeout: Duration,
) -> Result<StreamSummary>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let result = drive(chunks, ingestor, sink, chunk_timeout).await;

    match &result {
        Ok(summary) => {
            info!(
                tokens = summary.token_count,
                chars = summary.chars,
                malformed = ingestor.malformed_count(),
                "Generation stream complete"
            );
            sink.broadcaster
                .send(GenerationEvent::completed(summary.chars, summary.token_count));
        }
        Err(e) => {
            sink.broadcaster.send(GenerationEvent::failed(e.to_string()));
        }
    }

    result
}

async fn drive<S, B, E>(
    chunks: S,
    ingestor: &mut StreamIngestor,
    sink: &TokenSink,
    chunk_timeout: Duration,
) -> Result<StreamSummary>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut chunks = pin!(chunks);
    let mut token_count = 0usize;

    loop {
        let next = tokio::time::timeout(chunk_timeout, chunks.next())
            .await
            .map_err(|_| {
                ingestor.fail(SieveError::StreamTimeout {
                    timeout_secs: chunk_timeout.as_secs(),
                })
            })?;

        let Some(chunk) = next else {
            break;
        };
        let bytes = chunk.map_err(|e| ingestor.fail(SieveError::transport(e.to_string())))?;
        debug!(bytes = bytes.as_ref().len(), "Received stream chunk");

        token_count += publish(ingestor.feed(bytes.as_ref())?, sink).await?;
    }

    token_count += publish(ingestor.finish()?, sink).await?;

    Ok(StreamSummary {
        token_count,
        chars: ingestor.output().chars().count(),
    })
}

/// Hands one outcome's tokens to the sink, then surfaces its error record.
async fn publish(outcome: FeedOutcome, sink: &TokenSink) -> Result<usize> {
    let error = outcome.error();
    let count = outcome.tokens.len();
    if outcome.malformed > 0 {
        sink.broadcaster
            .send(GenerationEvent::malformed(outcome.malformed));
    }
    sink.append(outcome.tokens).await;

    match error {
        Some(e) => Err(e),
        None => Ok(count),
    }
}
