//! Incremental decoding of the filter-generation event stream.
//!
//! The backend answers a generation request with a `text/event-stream` body
//! where each event is a single line:
//!
//! ```text
//! data: {"token": "result_df = df[df"}
//! data: {"token": "['roi'] > 50]"}
//! data: {"error": "Request timed out."}
//! ```
//!
//! Transport chunks do not respect line boundaries, so [`LineDecoder`] keeps
//! the unterminated tail of each chunk as raw bytes and only releases a line
//! once its newline has arrived (or the stream has ended). Working on bytes
//! keeps multi-byte UTF-8 sequences intact when a chunk splits them.
//!
//! [`StreamIngestor`] sits on top of the decoder and owns the
//! `Idle -> Streaming -> Complete | Failed` lifecycle plus the growing output.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SieveError};

/// Prefix that marks an event line.
pub const DATA_PREFIX: &str = "data: ";

// ============================================================================
// LineDecoder
// ============================================================================

/// Reassembles newline-terminated lines from arbitrarily split byte chunks.
#[derive(Debug, Clone, Default)]
pub struct LineDecoder {
    carry: Vec<u8>,
}

impl LineDecoder {
    /// Creates a decoder with an empty carry-over.
    #[must_use]
    pub const fn new() -> Self {
        Self { carry: Vec::new() }
    }

    /// Appends `chunk` and returns every line it completed, in order.
    ///
    /// The trailing `\n` (and a `\r` before it) is stripped. Bytes after the
    /// last newline stay in the carry-over until a later chunk completes them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);

        let Some(last_newline) = self.carry.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let tail = self.carry.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.carry, tail);

        complete[..last_newline]
            .split(|&b| b == b'\n')
            .map(decode_line)
            .collect()
    }

    /// Flushes the carry-over at end of stream.
    ///
    /// Returns the final unterminated line, if any bytes were pending.
    pub fn finish(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.carry);
        Some(decode_line(&rest))
    }

    /// Bytes currently held back waiting for a newline.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.carry
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

// ============================================================================
// Records
// ============================================================================

/// JSON body of a `data:` line.
#[derive(Debug, Clone, Default, Deserialize)]
struct EventPayload {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Message carried by an `error` field; `null` and `""` carry none.
fn error_message(error: Option<serde_json::Value>) -> Option<String> {
    match error? {
        serde_json::Value::Null => None,
        serde_json::Value::String(message) if message.is_empty() => None,
        serde_json::Value::String(message) => Some(message),
        other => Some(other.to_string()),
    }
}

/// Interpretation of one complete line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRecord {
    /// Not an event line, an empty payload, or a payload with nothing to apply.
    Ignored,
    /// A fragment of generated text.
    Token(String),
    /// The producer failed.
    Error(String),
    /// The payload was not valid JSON.
    Malformed {
        /// The payload after the `data: ` prefix.
        payload: String,
        /// Why it could not be parsed.
        reason: String,
    },
}

impl StreamRecord {
    /// Parses one line of the event stream.
    ///
    /// ```
    /// use sieve_core::StreamRecord;
    ///
    /// assert_eq!(
    ///     StreamRecord::parse(r#"data: {"token": "df"}"#),
    ///     StreamRecord::Token("df".to_string())
    /// );
    /// assert_eq!(StreamRecord::parse(": keep-alive"), StreamRecord::Ignored);
    /// assert_eq!(StreamRecord::parse("data: "), StreamRecord::Ignored);
    /// ```
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return Self::Ignored;
        };
        if payload.is_empty() {
            return Self::Ignored;
        }

        let EventPayload { token, error } = match serde_json::from_str(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                return Self::Malformed {
                    payload: payload.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        if let Some(message) = error_message(error) {
            return Self::Error(message);
        }
        match token {
            Some(token) if !token.is_empty() => Self::Token(token),
            _ => Self::Ignored,
        }
    }
}

// ============================================================================
// StreamState
// ============================================================================

/// Lifecycle of a single generation stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    /// Created, request not yet accepted.
    #[default]
    Idle,
    /// Chunks are being consumed.
    Streaming,
    /// The stream ended naturally.
    Complete,
    /// An error record or transport failure ended the stream.
    Failed,
}

impl StreamState {
    /// Returns `true` for `Complete` and `Failed`.
    ///
    /// ```
    /// use sieve_core::StreamState;
    ///
    /// assert!(StreamState::Complete.is_terminal());
    /// assert!(StreamState::Failed.is_terminal());
    /// assert!(!StreamState::Streaming.is_terminal());
    /// ```
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Streaming => write!(f, "streaming"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ============================================================================
// StreamIngestor
// ============================================================================

/// What a single [`StreamIngestor::feed`] call produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedOutcome {
    /// Tokens appended to the output by this chunk, in arrival order.
    pub tokens: Vec<String>,
    /// Number of malformed lines skipped in this chunk.
    pub malformed: usize,
    /// Producer message if this chunk carried an error record.
    pub failure: Option<String>,
}

impl FeedOutcome {
    /// The producer error carried by this chunk, if any.
    #[must_use]
    pub fn error(&self) -> Option<SieveError> {
        self.failure.clone().map(SieveError::producer)
    }
}

/// Consumes a chunked event stream and accumulates the generated text.
///
/// # Example
///
/// ```
/// use sieve_core::{StreamIngestor, StreamState};
///
/// let mut ingestor = StreamIngestor::new();
/// ingestor.begin().unwrap();
/// ingestor.feed(b"data: {\"tok").unwrap();
/// ingestor.feed(b"en\":\"ab\"}\n").unwrap();
/// ingestor.finish().unwrap();
///
/// assert_eq!(ingestor.output(), "ab");
/// assert_eq!(ingestor.state(), StreamState::Complete);
/// ```
#[derive(Debug, Clone, Default)]
pub struct StreamIngestor {
    state: StreamState,
    decoder: LineDecoder,
    output: String,
    malformed: usize,
}

impl StreamIngestor {
    /// Creates an idle ingestor with an empty output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.state
    }

    /// Text accumulated so far.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Consumes the ingestor and returns the accumulated text.
    #[must_use]
    pub fn into_output(self) -> String {
        self.output
    }

    /// Total malformed lines skipped so far.
    #[must_use]
    pub const fn malformed_count(&self) -> usize {
        self.malformed
    }

    /// Marks the request as accepted: `Idle -> Streaming`.
    pub fn begin(&mut self) -> Result<()> {
        if self.state != StreamState::Idle {
            return Err(SieveError::invalid_transition(
                self.state,
                StreamState::Streaming,
            ));
        }
        self.state = StreamState::Streaming;
        Ok(())
    }

    /// Processes one transport chunk.
    ///
    /// Tokens are appended to the output as they are decoded. An error record
    /// moves the ingestor to `Failed` and sets [`FeedOutcome::failure`]; the
    /// tokens decoded before it in the same chunk are still returned. Lines
    /// after it, in this chunk or any later one, are never applied.
    ///
    /// # Errors
    ///
    /// Returns `SieveError::InvalidStateTransition` unless streaming.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<FeedOutcome> {
        self.ensure_streaming()?;
        let lines = self.decoder.push(chunk);
        Ok(self.apply_lines(lines))
    }

    /// Handles natural end of input: flushes the carry-over and moves to
    /// `Complete`, unless the final partial line is an error record, in which
    /// case the outcome carries the failure as for [`Self::feed`].
    ///
    /// # Errors
    ///
    /// Returns `SieveError::InvalidStateTransition` unless streaming.
    pub fn finish(&mut self) -> Result<FeedOutcome> {
        self.ensure_streaming()?;
        let tail = self.decoder.finish();
        let outcome = self.apply_lines(tail);
        if outcome.failure.is_none() {
            self.state = StreamState::Complete;
        }
        Ok(outcome)
    }

    /// Records a transport failure and returns the error to propagate.
    ///
    /// Tokens already appended stay in the output.
    pub fn fail(&mut self, error: SieveError) -> SieveError {
        if !self.state.is_terminal() {
            self.state = StreamState::Failed;
        }
        error
    }

    fn ensure_streaming(&self) -> Result<()> {
        if self.state == StreamState::Streaming {
            Ok(())
        } else {
            Err(SieveError::invalid_transition(
                self.state,
                StreamState::Streaming,
            ))
        }
    }

    fn apply_lines(&mut self, lines: impl IntoIterator<Item = String>) -> FeedOutcome {
        let mut outcome = FeedOutcome::default();

        for line in lines {
            match StreamRecord::parse(&line) {
                StreamRecord::Token(token) => {
                    self.output.push_str(&token);
                    outcome.tokens.push(token);
                }
                StreamRecord::Error(message) => {
                    self.state = StreamState::Failed;
                    outcome.failure = Some(message);
                    break;
                }
                StreamRecord::Malformed { payload, reason } => {
                    debug!(%payload, %reason, "Skipping malformed stream record");
                    self.malformed += 1;
                    outcome.malformed += 1;
                }
                StreamRecord::Ignored => {}
            }
        }

        outcome
    }
}

// ============================================================================
// Tests
// ============================================================================
