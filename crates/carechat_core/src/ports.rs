//! crates/carechat_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like the document
//! store or the AI providers.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::{Forecast, GeoLocation, Headline};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
    /// One side of the conversation has blocked the other. A recoverable,
    /// expected state checked before every send.
    #[error("Conversation is blocked")]
    Blocked,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Document Store Port
//=========================================================================================

/// A standing watch on one document. Each change is delivered as a
/// full-document snapshot on the channel; `cancel()` stops the feed.
/// Delivery is at-least-once and ordered per document.
pub struct Subscription {
    pub snapshots: mpsc::Receiver<Value>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(snapshots: mpsc::Receiver<Value>, cancel: CancellationToken) -> Self {
        Self { snapshots, cancel }
    }

    /// Token the feeding task observes; cancelling it ends the stream.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// An opaque, synchronized key/document store with point read, upsert,
/// atomic array append, and change subscription.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads a document, returning `None` if it does not exist.
    async fn read(&self, doc_id: &str) -> PortResult<Option<Value>>;

    /// Writes (upserts) a full document.
    async fn write(&self, doc_id: &str, doc: Value) -> PortResult<()>;

    /// Atomically appends one item to an array field of a document,
    /// creating the document with a single-element array if absent.
    async fn append(&self, doc_id: &str, array_field: &str, item: Value) -> PortResult<()>;

    /// Subscribes to change notifications for one document.
    async fn watch(&self, doc_id: &str) -> PortResult<Subscription>;
}

//=========================================================================================
// Auth Provider Port
//=========================================================================================

/// A sign-in/sign-out transition from the auth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(String),
    SignedOut,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Creates a new auth identity and returns its uid.
    async fn create_user(&self, email: &str, password: &str) -> PortResult<String>;

    /// Removes an auth identity. Used as the compensating action when a
    /// multi-step account creation fails partway.
    async fn delete_user(&self, uid: &str) -> PortResult<()>;

    async fn sign_in(&self, email: &str, password: &str) -> PortResult<String>;

    async fn sign_out(&self) -> PortResult<()>;

    /// Auth state transitions. The core subscribes to this exactly once
    /// at top level.
    fn subscribe(&self) -> mpsc::Receiver<AuthEvent>;
}

//=========================================================================================
// AI Service Ports
//=========================================================================================

/// One prior exchange turn handed to the language model as history.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub from_user: bool,
    pub text: String,
}

#[async_trait]
pub trait LanguageModelService: Send + Sync {
    /// Runs a plain completion: system prompt, optional prior turns, then
    /// the user's utterance.
    async fn complete(
        &self,
        system_prompt: &str,
        prior_turns: &[ChatTurn],
        user_turn: &str,
    ) -> PortResult<String>;

    /// Streaming variant; `on_chunk` receives incremental text chunks.
    /// The callback is higher-ranked so chunks borrowed inside the
    /// implementation outlive no further than the call.
    async fn complete_streaming(
        &self,
        system_prompt: &str,
        prior_turns: &[ChatTurn],
        user_turn: &str,
        on_chunk: Box<dyn for<'a> FnMut(&'a str) + Send>,
    ) -> PortResult<String>;

    /// Strict-JSON response mode for structured extraction.
    async fn complete_json(
        &self,
        system_prompt: &str,
        prior_turns: &[ChatTurn],
        user_turn: &str,
    ) -> PortResult<Value>;
}

#[async_trait]
pub trait SpeechSynthesisService: Send + Sync {
    /// Generates audio data from text using the given voice identity.
    async fn synthesize(&self, text: &str, voice: &str) -> PortResult<Vec<u8>>;
}

#[async_trait]
pub trait SpeechToTextService: Send + Sync {
    /// Transcribes a blob of audio data into text.
    async fn transcribe(&self, audio_data: &[u8]) -> PortResult<String>;
}

//=========================================================================================
// News / Weather / Blob Ports
//=========================================================================================

#[async_trait]
pub trait NewsService: Send + Sync {
    async fn top_headlines(&self, limit: usize) -> PortResult<Vec<Headline>>;
}

#[async_trait]
pub trait WeatherService: Send + Sync {
    async fn forecast(&self, latitude: f64, longitude: f64) -> PortResult<Forecast>;

    /// Resolves a city name to coordinates; `None` when the city is unknown.
    async fn geocode(&self, city: &str) -> PortResult<Option<GeoLocation>>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores a blob and returns a durable URL reference to it.
    async fn store(&self, name: &str, data: &[u8], content_type: &str) -> PortResult<String>;
}
