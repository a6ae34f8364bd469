//! Live generation events.
//!
//! Every filter generation publishes its progress on a broadcast channel so a
//! front end (or the CLI) can render the snippet while it is still streaming.
//! Events serialize as `{"event": "...", "payload": {...}}`.
//!
//! # Example
//!
//! ```
//! use sieve_core::events::{EventBroadcaster, GenerationEvent};
//!
//! # async fn example() {
//! let broadcaster = EventBroadcaster::new(16);
//! let mut receiver = broadcaster.subscribe();
//!
//! broadcaster.send(GenerationEvent::token("result_df = "));
//!
//! if let Ok(event) = receiver.recv().await {
//!     assert_eq!(event.event_name(), "token");
//! }
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `started` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedPayload {
    /// Model the snippet is generated with.
    pub model: String,
    /// Prompt template file name.
    pub prompt_template: String,
    /// Number of positive-example wallets sent.
    pub wallet_count: usize,
    /// When the request was accepted.
    pub timestamp: DateTime<Utc>,
}

/// Payload for the `token` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    /// Text fragment, to be appended to what came before.
    pub text: String,
}

/// Payload for the `malformed` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedPayload {
    /// Number of records skipped in the chunk.
    pub count: usize,
}

/// Payload for the `completed` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPayload {
    /// Length of the generated snippet in characters.
    pub chars: usize,
    /// Tokens received over the whole stream.
    pub token_count: usize,
}

/// Payload for the `failed` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPayload {
    /// Human-readable error message.
    pub message: String,
}

// ============================================================================
// Event Enum
// ============================================================================

/// Progress of a single filter generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum GenerationEvent {
    /// The backend accepted the request.
    Started(StartedPayload),
    /// A token was appended to the snippet.
    Token(TokenPayload),
    /// Malformed records were skipped.
    Malformed(MalformedPayload),
    /// The stream ended naturally.
    Completed(CompletedPayload),
    /// The stream ended with an error.
    Failed(FailedPayload),
}

impl GenerationEvent {
    /// Creates a `Started` event stamped with the current time.
    #[must_use]
    pub fn started(
        model: impl Into<String>,
        prompt_template: impl Into<String>,
        wallet_count: usize,
    ) -> Self {
        Self::Started(StartedPayload {
            model: model.into(),
            prompt_template: prompt_template.into(),
            wallet_count,
            timestamp: Utc::now(),
        })
    }

    /// Creates a `Token` event.
    #[must_use]
    pub fn token(text: impl Into<String>) -> Self {
        Self::Token(TokenPayload { text: text.into() })
    }

    /// Creates a `Malformed` event.
    #[must_use]
    pub const fn malformed(count: usize) -> Self {
        Self::Malformed(MalformedPayload { count })
    }

    /// Creates a `Completed` event.
    #[must_use]
    pub const fn completed(chars: usize, token_count: usize) -> Self {
        Self::Completed(CompletedPayload { chars, token_count })
    }

    /// Creates a `Failed` event.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(FailedPayload {
            message: message.into(),
        })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Started(_) => "started",
            Self::Token(_) => "token",
            Self::Malformed(_) => "malformed",
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
        }
    }

    /// Returns `true` for the events that close a generation.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Fans generation events out to every subscriber.
///
/// Events are not replayed to late subscribers. A subscriber that falls more
/// than `capacity` events behind receives `Lagged` and misses the overflow.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<GenerationEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster with a per-subscriber buffer of `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event and returns how many subscribers will see it.
    pub fn send(&self, event: GenerationEvent) -> usize {
        // Err only means nobody is listening.
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
