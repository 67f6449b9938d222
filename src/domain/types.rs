//! # Domain Types
//!
//! Value objects passed between the gateway, the resolver and the delivery executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identifier of a message within its source feed. Grows monotonically.
pub type MessageId = u64;

/// Opaque handle back to the gateway's native representation of a message.
///
/// Only the gateway that produced it knows the concrete type; everyone else
/// just carries it along so the message can be delivered later.
#[derive(Clone)]
pub struct OriginRef(Arc<dyn Any + Send + Sync>);

impl OriginRef {
    pub fn new<T: Any + Send + Sync>(native: T) -> Self {
        Self(Arc::new(native))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for OriginRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OriginRef(..)")
    }
}

/// A message as the gateway returns it, before text filtering.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
    /// `None` for media, stickers, polls and everything else without a plain body.
    pub text: Option<String>,
    pub origin: OriginRef,
}

/// A text-only message selected for forwarding. Immutable once built.
#[derive(Debug, Clone)]
pub struct Message {
    id: MessageId,
    timestamp: DateTime<Utc>,
    content: String,
    origin: OriginRef,
}

impl Message {
    /// Keeps only messages with a non-empty plain-text body.
    pub fn from_raw(raw: RawMessage) -> Option<Self> {
        let content = raw.text.filter(|text| !text.is_empty())?;
        Some(Self {
            id: raw.id,
            timestamp: raw.timestamp,
            content,
            origin: raw.origin,
        })
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn origin(&self) -> &OriginRef {
        &self.origin
    }
}

/// A feed resolved by the gateway (source or destination).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedHandle {
    /// Identifier as written in the configuration.
    pub identifier: String,
    /// Gateway-native key (e.g. a Matrix room id).
    pub native_id: String,
}

/// Continuation point for reverse-chronological paging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageToken(pub String);

/// One page of history, newest message first.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub messages: Vec<RawMessage>,
    /// `None` once the beginning of the feed has been reached.
    pub next: Option<PageToken>,
}

/// Live stream of inbound messages from a subscribed feed.
///
/// Dropping the subscription runs the gateway's teardown hook.
pub struct Subscription {
    events: mpsc::Receiver<RawMessage>,
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(events: mpsc::Receiver<RawMessage>) -> Self {
        Self {
            events,
            teardown: None,
        }
    }

    pub fn on_teardown(mut self, teardown: impl FnOnce() + Send + 'static) -> Self {
        self.teardown = Some(Box::new(teardown));
        self
    }

    /// Waits for the next inbound message. `None` means the stream is closed.
    pub async fn next(&mut self) -> Option<RawMessage> {
        self.events.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

/// Operating mode, fixed at process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Round-robin over today's messages, forever.
    #[serde(alias = "daily", alias = "today")]
    Continuous,
    /// Forward everything newer than the watermark, once per trigger.
    #[serde(alias = "new")]
    Incremental,
    /// Forward each inbound message as it arrives.
    Listen,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Continuous => "continuous",
            Mode::Incremental => "incremental",
            Mode::Listen => "listen",
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "continuous" | "daily" | "today" => Ok(Mode::Continuous),
            "incremental" | "new" => Ok(Mode::Incremental),
            "listen" => Ok(Mode::Listen),
            other => Err(format!(
                "unknown mode '{other}', expected continuous, incremental or listen"
            )),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a resolved message set is handed to each destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryOrder {
    /// One send call per destination carrying the whole set.
    #[serde(alias = "batch")]
    Batched,
    /// One send call per message, paced.
    #[serde(alias = "one_by_one")]
    Sequential,
}
