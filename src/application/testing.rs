//! In-memory collaborators for engine tests.

use crate::domain::config::{ForwardingConfig, Snapshot};
use crate::domain::error::{RelayError, Result, SendError};
use crate::domain::traits::{ConfigStore, FeedGateway};
use crate::domain::types::{
    FeedHandle, Message, MessageId, OriginRef, Page, PageToken, RawMessage, Subscription,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

pub fn raw_text(id: MessageId, timestamp: DateTime<Utc>, text: &str) -> RawMessage {
    RawMessage {
        id,
        timestamp,
        text: Some(text.to_string()),
        origin: OriginRef::new(id),
    }
}

pub fn raw_media(id: MessageId, timestamp: DateTime<Utc>) -> RawMessage {
    RawMessage {
        id,
        timestamp,
        text: None,
        origin: OriginRef::new(id),
    }
}

#[derive(Debug, Clone)]
pub enum Failure {
    Unresolvable,
    RateLimited(Duration),
    Failed,
    /// Resolves, but every send is refused for lack of permission.
    Forbidden,
    /// Only the given message fails.
    FailedOn(MessageId),
}

#[derive(Debug, Clone)]
pub struct SentRecord {
    pub destination: String,
    pub message_id: MessageId,
    pub at: tokio::time::Instant,
}

#[derive(Default)]
struct FakeState {
    source_available: bool,
    history: Vec<RawMessage>,
    groups: Vec<String>,
    aliases: HashMap<String, String>,
    failures: HashMap<String, Failure>,
    native_batch: bool,
    attempts: Vec<(String, MessageId)>,
    sends: Vec<SentRecord>,
    batches: Vec<(String, Vec<MessageId>)>,
    fetch_calls: usize,
    subscriptions: usize,
    live: Option<mpsc::Sender<RawMessage>>,
}

/// Gateway backed by a vector of messages. Records every send.
pub struct FakeGateway {
    source: String,
    state: Mutex<FakeState>,
}

impl FakeGateway {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            state: Mutex::new(FakeState {
                source_available: true,
                native_batch: true,
                ..Default::default()
            }),
        }
    }

    pub fn with_messages(self, messages: Vec<RawMessage>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.history.extend(messages);
            state.history.sort_by_key(|m| m.id);
        }
        self
    }

    pub fn with_groups(self, groups: &[&str]) -> Self {
        self.state.lock().unwrap().groups = groups.iter().map(|g| g.to_string()).collect();
        self
    }

    pub fn failing(self, destination: &str, failure: Failure) -> Self {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(destination.to_string(), failure);
        self
    }

    /// Make `alias` resolve to the same native id as `target`.
    pub fn with_alias(self, alias: &str, target: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .aliases
            .insert(alias.to_string(), target.to_string());
        self
    }

    /// Drop the native batch call so batched delivery goes message by message.
    pub fn without_batch(self) -> Self {
        self.state.lock().unwrap().native_batch = false;
        self
    }

    pub fn without_source(self) -> Self {
        self.state.lock().unwrap().source_available = false;
        self
    }

    pub fn publish(&self, message: RawMessage) {
        let mut state = self.state.lock().unwrap();
        state.history.push(message);
        state.history.sort_by_key(|m| m.id);
    }

    /// Push a live event to the current subscriber.
    pub async fn push_live(&self, message: RawMessage) {
        let sender = self.state.lock().unwrap().live.clone();
        if let Some(sender) = sender {
            let _ = sender.send(message).await;
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.state.lock().unwrap().live.is_some()
    }

    pub fn subscriptions(&self) -> usize {
        self.state.lock().unwrap().subscriptions
    }

    pub fn close_live(&self) {
        self.state.lock().unwrap().live = None;
    }

    pub fn sends(&self) -> Vec<SentRecord> {
        self.state.lock().unwrap().sends.clone()
    }

    pub fn sent_pairs(&self) -> Vec<(String, MessageId)> {
        self.sends()
            .into_iter()
            .map(|s| (s.destination, s.message_id))
            .collect()
    }

    /// Every send call, successful or not.
    pub fn attempts(&self) -> Vec<(String, MessageId)> {
        self.state.lock().unwrap().attempts.clone()
    }

    pub fn batches(&self) -> Vec<(String, Vec<MessageId>)> {
        self.state.lock().unwrap().batches.clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.state.lock().unwrap().fetch_calls
    }

    fn native_id(state: &FakeState, identifier: &str) -> String {
        state
            .aliases
            .get(identifier)
            .cloned()
            .unwrap_or_else(|| identifier.to_string())
    }

    fn source_handle(&self, identifier: &str) -> Result<FeedHandle> {
        let state = self.state.lock().unwrap();
        let native_id = Self::native_id(&state, identifier);
        if !state.source_available || native_id != Self::native_id(&state, &self.source) {
            return Err(RelayError::SourceUnavailable {
                feed: identifier.to_string(),
                reason: "no such feed".to_string(),
            });
        }
        Ok(FeedHandle {
            identifier: identifier.to_string(),
            native_id,
        })
    }

    /// `message` is `None` for a whole batch.
    fn check_destination(
        &self,
        destination: &FeedHandle,
        message: Option<MessageId>,
    ) -> Result<(), SendError> {
        let state = self.state.lock().unwrap();
        match state.failures.get(&destination.identifier) {
            Some(Failure::RateLimited(cooldown)) => Err(SendError::RateLimited(*cooldown)),
            Some(Failure::Failed) => Err(SendError::Failed("boom".to_string())),
            Some(Failure::Forbidden) => Err(SendError::DestinationUnavailable(
                "not allowed to post".to_string(),
            )),
            Some(Failure::FailedOn(id)) if message == Some(*id) => {
                Err(SendError::Failed(format!("message {id} rejected")))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl FeedGateway for FakeGateway {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn resolve_source(&self, identifier: &str) -> Result<FeedHandle> {
        self.source_handle(identifier)
    }

    async fn fetch_page(
        &self,
        _feed: &FeedHandle,
        page_size: usize,
        before: Option<&PageToken>,
    ) -> Result<Page> {
        let mut state = self.state.lock().unwrap();
        state.fetch_calls += 1;
        let before: MessageId = match before {
            Some(token) => token
                .0
                .parse()
                .map_err(|_| RelayError::TransportFailure("bad token".to_string()))?,
            None => MessageId::MAX,
        };
        let older: Vec<RawMessage> = state
            .history
            .iter()
            .rev()
            .filter(|m| m.id < before)
            .cloned()
            .collect();
        let page: Vec<RawMessage> = older.iter().take(page_size).cloned().collect();
        let next = if older.len() > page.len() {
            page.last().map(|m| PageToken(m.id.to_string()))
        } else {
            None
        };
        Ok(Page {
            messages: page,
            next,
        })
    }

    async fn fetch_since(
        &self,
        _feed: &FeedHandle,
        after: MessageId,
        page_size: usize,
    ) -> Result<Vec<RawMessage>> {
        let mut state = self.state.lock().unwrap();
        state.fetch_calls += 1;
        Ok(state
            .history
            .iter()
            .rev()
            .filter(|m| m.id > after)
            .take(page_size)
            .cloned()
            .collect())
    }

    async fn list_owned_groups(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().groups.clone())
    }

    async fn resolve_destination(&self, identifier: &str) -> Result<FeedHandle, SendError> {
        let state = self.state.lock().unwrap();
        if let Some(Failure::Unresolvable) = state.failures.get(identifier) {
            return Err(SendError::DestinationUnavailable(identifier.to_string()));
        }
        Ok(FeedHandle {
            identifier: identifier.to_string(),
            native_id: Self::native_id(&state, identifier),
        })
    }

    async fn send(&self, destination: &FeedHandle, message: &Message) -> Result<(), SendError> {
        self.state
            .lock()
            .unwrap()
            .attempts
            .push((destination.identifier.clone(), message.id()));
        self.check_destination(destination, Some(message.id()))?;
        self.state.lock().unwrap().sends.push(SentRecord {
            destination: destination.identifier.clone(),
            message_id: message.id(),
            at: tokio::time::Instant::now(),
        });
        Ok(())
    }

    fn supports_batch(&self) -> bool {
        self.state.lock().unwrap().native_batch
    }

    async fn send_batch(
        &self,
        destination: &FeedHandle,
        messages: &[Message],
    ) -> Result<(), SendError> {
        self.check_destination(destination, None)?;
        self.state.lock().unwrap().batches.push((
            destination.identifier.clone(),
            messages.iter().map(Message::id).collect(),
        ));
        Ok(())
    }

    async fn subscribe(&self, feed: &FeedHandle) -> Result<Subscription> {
        self.source_handle(&feed.identifier)?;
        let (tx, rx) = mpsc::channel(16);
        let mut state = self.state.lock().unwrap();
        state.live = Some(tx);
        state.subscriptions += 1;
        Ok(Subscription::new(rx))
    }
}

/// Configuration store kept in memory.
pub struct MemoryStore {
    config: Mutex<ForwardingConfig>,
    watermark_writes: Mutex<Vec<MessageId>>,
}

impl MemoryStore {
    pub fn new(config: ForwardingConfig) -> Self {
        Self {
            config: Mutex::new(config),
            watermark_writes: Mutex::new(Vec::new()),
        }
    }

    pub fn update(&self, change: impl FnOnce(&mut ForwardingConfig)) {
        change(&mut self.config.lock().unwrap());
    }

    pub fn watermark_writes(&self) -> Vec<MessageId> {
        self.watermark_writes.lock().unwrap().clone()
    }
}

impl ConfigStore for MemoryStore {
    fn snapshot(&self) -> Result<Snapshot> {
        Snapshot::new(self.config.lock().unwrap().clone())
    }

    fn watermark(&self) -> Result<MessageId> {
        Ok(self.config.lock().unwrap().last_forwarded_id)
    }

    fn set_watermark(&self, id: MessageId) -> Result<()> {
        let mut config = self.config.lock().unwrap();
        if id > config.last_forwarded_id {
            config.last_forwarded_id = id;
        }
        self.watermark_writes.lock().unwrap().push(id);
        Ok(())
    }
}

/// Forwarding config with the window disabled and no pacing, for fast tests.
pub fn quick_config(source: &str, destinations: &[&str]) -> ForwardingConfig {
    ForwardingConfig {
        source: source.to_string(),
        destinations: destinations.iter().map(|d| d.to_string()).collect(),
        time_window_enabled: false,
        send_delay_secs: 0,
        pacing_secs: 0,
        ..Default::default()
    }
}
