//! # Domain Traits
//!
//! Abstract interfaces for the engine's collaborators (messaging backend, configuration store).
//! Allows for pluggable implementations in the Infrastructure layer.

use crate::domain::config::Snapshot;
use crate::domain::error::{Result, SendError};
use crate::domain::types::{FeedHandle, Message, MessageId, Page, PageToken, RawMessage, Subscription};
use async_trait::async_trait;

/// Abstract interface for the messaging backend (e.g., Matrix).
#[async_trait]
pub trait FeedGateway: Send + Sync {
    /// Authenticate and prime local state. Called once at startup.
    async fn connect(&self) -> Result<()>;

    /// Resolve the configured source identifier to a live feed.
    async fn resolve_source(&self, identifier: &str) -> Result<FeedHandle>;

    /// One page of history strictly older than `before`, newest first.
    async fn fetch_page(
        &self,
        feed: &FeedHandle,
        page_size: usize,
        before: Option<&PageToken>,
    ) -> Result<Page>;

    /// Up to `page_size` of the newest messages with an id strictly greater than `after`.
    async fn fetch_since(
        &self,
        feed: &FeedHandle,
        after: MessageId,
        page_size: usize,
    ) -> Result<Vec<RawMessage>>;

    /// Public groups the account belongs to, as destination identifiers.
    async fn list_owned_groups(&self) -> Result<Vec<String>>;

    async fn resolve_destination(&self, identifier: &str) -> Result<FeedHandle, SendError>;

    async fn send(&self, destination: &FeedHandle, message: &Message) -> Result<(), SendError>;

    /// Whether `send_batch` is a single native call. Without one, batched
    /// delivery goes message by message with the usual pacing.
    fn supports_batch(&self) -> bool {
        false
    }

    /// Send a whole set in one call. Only called when `supports_batch` is true;
    /// the set is delivered or refused as a unit.
    async fn send_batch(
        &self,
        destination: &FeedHandle,
        _messages: &[Message],
    ) -> Result<(), SendError> {
        Err(SendError::Failed(format!(
            "no batch send available for {}",
            destination.identifier
        )))
    }

    /// Start receiving live messages from `feed`.
    async fn subscribe(&self, feed: &FeedHandle) -> Result<Subscription>;
}

/// Persisted forwarding configuration.
///
/// Everything except the watermark is read-only to the engine.
pub trait ConfigStore: Send + Sync {
    /// Latest valid configuration, re-read from the backing store.
    fn snapshot(&self) -> Result<Snapshot>;

    fn watermark(&self) -> Result<MessageId>;

    /// Persist a new watermark atomically. Never lowers the stored value.
    fn set_watermark(&self, id: MessageId) -> Result<()>;
}
