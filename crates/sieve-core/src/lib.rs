//! Wallet Sieve core
//!
//! Keeps the positive-example wallet selection consistent between its toggle
//! and bulk-text views, and ingests the streamed filter snippet from the
//! analysis backend.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod generation;
pub mod panel;
pub mod selection;
pub mod stream;
pub mod wallet;

pub use client::{BackendClient, BackendConfig, KeyValidation};
pub use config::Config;
pub use error::{Result, SieveError};
pub use events::{EventBroadcaster, GenerationEvent};
pub use generation::{
    consume_stream, GenerationGuard, GenerationRecord, GenerationRequest, GenerationSlot,
    StreamSummary, TokenSink,
};
pub use panel::ControlPanel;
pub use selection::{parse_address_tokens, ApplyReport, Session, ToggleOutcome};
pub use stream::{FeedOutcome, LineDecoder, StreamIngestor, StreamRecord, StreamState};
pub use wallet::{WalletList, WalletRecord};
