//! # Matrix Gateway
//!
//! Implements the `FeedGateway` trait for the Matrix protocol using the `matrix_sdk`.
//! Rooms play the role of feeds: the source is a room id (`!abc:server`) or alias
//! (`#news:server`), destinations are rooms the account has joined.
//!
//! Message ids are the server timestamps in milliseconds, which grow with the
//! room timeline and fit the watermark model.

use crate::domain::config::MatrixConfig;
use crate::domain::error::{RelayError, Result, SendError};
use crate::domain::traits::FeedGateway;
use crate::domain::types::{
    FeedHandle, Message, MessageId, OriginRef, Page, PageToken, RawMessage, Subscription,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use matrix_sdk::Client;
use matrix_sdk::config::SyncSettings;
use matrix_sdk::room::{MessagesOptions, Room};
use matrix_sdk::ruma::api::client::error::{ErrorKind, RetryAfter};
use matrix_sdk::ruma::events::room::message::{
    MessageType, OriginalSyncRoomMessageEvent, Relation, RoomMessageEventContent,
};
use matrix_sdk::ruma::events::{AnySyncMessageLikeEvent, AnySyncTimelineEvent, SyncMessageLikeEvent};
use matrix_sdk::ruma::{
    MilliSecondsSinceUnixEpoch, OwnedEventId, OwnedRoomId, RoomAliasId, RoomId, UInt,
};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;

const SUBSCRIPTION_BUFFER: usize = 64;

/// Native payload carried in `OriginRef` so a message can be re-sent as-is.
#[derive(Debug, Clone)]
pub struct MatrixOrigin {
    pub event_id: OwnedEventId,
    pub content: RoomMessageEventContent,
}

pub struct MatrixGateway {
    client: Client,
    username: String,
    password: String,
    device_name: Option<String>,
    /// Sync token from the last completed sync; live subscriptions start from here.
    sync_token: Mutex<Option<String>>,
}

impl MatrixGateway {
    pub async fn new(config: &MatrixConfig) -> Result<Self> {
        let password = config.resolve_password()?;
        let client = Client::builder()
            .homeserver_url(&config.homeserver)
            .build()
            .await
            .map_err(|e| RelayError::TransportFailure(format!("cannot build client: {e}")))?;
        Ok(Self {
            client,
            username: config.username.clone(),
            password,
            device_name: config.device_name.clone(),
            sync_token: Mutex::new(None),
        })
    }

    fn room_for(&self, room_id: &RoomId) -> Option<Room> {
        self.client.get_room(room_id)
    }

    /// Resolve `!id:server` directly, `#alias:server` through the directory.
    async fn resolve_room_id(&self, identifier: &str) -> std::result::Result<OwnedRoomId, String> {
        let identifier = identifier.trim();
        if identifier.starts_with('#') {
            let alias = RoomAliasId::parse(identifier).map_err(|e| e.to_string())?;
            let response = self
                .client
                .resolve_room_alias(&alias)
                .await
                .map_err(|e| e.to_string())?;
            Ok(response.room_id)
        } else {
            RoomId::parse(identifier).map_err(|e| e.to_string())
        }
    }

    fn joined_room(&self, handle: &FeedHandle) -> Result<Room> {
        let room_id = RoomId::parse(&handle.native_id)
            .map_err(|e| RelayError::TransportFailure(e.to_string()))?;
        self.room_for(&room_id)
            .ok_or_else(|| RelayError::SourceUnavailable {
                feed: handle.identifier.clone(),
                reason: "room is not joined".to_string(),
            })
    }

    async fn page(&self, room: &Room, page_size: usize, before: Option<&PageToken>) -> Result<Page> {
        let mut options = MessagesOptions::backward();
        options.from = before.map(|token| token.0.clone());
        options.limit = UInt::new_saturating(page_size as u64);

        let response = room
            .messages(options)
            .await
            .map_err(|e| RelayError::TransportFailure(e.to_string()))?;

        let messages: Vec<RawMessage> = response
            .chunk
            .iter()
            .filter_map(|event| event.raw().deserialize().ok())
            .filter_map(|event| match event {
                AnySyncTimelineEvent::MessageLike(AnySyncMessageLikeEvent::RoomMessage(
                    SyncMessageLikeEvent::Original(ev),
                )) => Some(raw_message(ev.event_id, ev.origin_server_ts, ev.content)),
                _ => None,
            })
            .collect();

        // An empty chunk marks the start of the room.
        let exhausted = response.chunk.is_empty();
        let next = match response.end {
            Some(end) if !exhausted => Some(PageToken(end)),
            _ => None,
        };
        Ok(Page { messages, next })
    }
}

/// Convert a room message into the gateway-neutral shape.
/// Only plain text counts as text; edits are treated as non-text.
fn raw_message(
    event_id: OwnedEventId,
    origin_server_ts: MilliSecondsSinceUnixEpoch,
    content: RoomMessageEventContent,
) -> RawMessage {
    let millis: u64 = origin_server_ts.get().into();
    let timestamp = DateTime::<Utc>::from_timestamp_millis(millis as i64).unwrap_or_default();
    let is_edit = matches!(content.relates_to, Some(Relation::Replacement(_)));
    let text = match &content.msgtype {
        MessageType::Text(text) if !is_edit => Some(text.body.clone()),
        _ => None,
    };
    RawMessage {
        id: millis,
        timestamp,
        text,
        origin: OriginRef::new(MatrixOrigin { event_id, content }),
    }
}

/// Map a send failure onto the delivery taxonomy.
fn classify_send_error(err: &matrix_sdk::Error) -> SendError {
    match err.client_api_error_kind() {
        Some(ErrorKind::LimitExceeded { retry_after, .. }) => {
            let cooldown = match retry_after {
                Some(RetryAfter::Delay(delay)) => *delay,
                Some(RetryAfter::DateTime(at)) => {
                    at.duration_since(SystemTime::now()).unwrap_or_default()
                }
                None => Duration::ZERO,
            };
            SendError::RateLimited(cooldown)
        }
        Some(ErrorKind::Forbidden { .. }) => SendError::DestinationUnavailable(err.to_string()),
        _ => classify_message(&err.to_string()),
    }
}

/// Fallback classification on the error text, for errors that lost their structured kind.
fn classify_message(text: &str) -> SendError {
    if text.contains("M_LIMIT_EXCEEDED") || text.contains("429") {
        SendError::RateLimited(Duration::ZERO)
    } else if text.contains("M_FORBIDDEN") {
        SendError::DestinationUnavailable(text.to_string())
    } else {
        SendError::Failed(text.to_string())
    }
}

#[async_trait]
impl FeedGateway for MatrixGateway {
    async fn connect(&self) -> Result<()> {
        let mut login = self
            .client
            .matrix_auth()
            .login_username(&self.username, &self.password);
        if let Some(device_name) = &self.device_name {
            login = login.initial_device_display_name(device_name);
        }
        login
            .send()
            .await
            .map_err(|e| RelayError::TransportFailure(format!("login failed: {e}")))?;
        tracing::info!("{}", crate::strings::logs::logged_in(&self.username));

        let response = self
            .client
            .sync_once(SyncSettings::default())
            .await
            .map_err(|e| RelayError::TransportFailure(format!("initial sync failed: {e}")))?;
        if let Ok(mut token) = self.sync_token.lock() {
            *token = Some(response.next_batch);
        }
        tracing::info!("Initial sync complete, {} rooms joined", self.client.joined_rooms().len());
        Ok(())
    }

    async fn resolve_source(&self, identifier: &str) -> Result<FeedHandle> {
        let unavailable = |reason: String| RelayError::SourceUnavailable {
            feed: identifier.to_string(),
            reason,
        };
        let room_id = self.resolve_room_id(identifier).await.map_err(unavailable)?;
        if self.room_for(&room_id).is_none() {
            return Err(unavailable("room is not joined".to_string()));
        }
        Ok(FeedHandle {
            identifier: identifier.to_string(),
            native_id: room_id.to_string(),
        })
    }

    async fn fetch_page(
        &self,
        feed: &FeedHandle,
        page_size: usize,
        before: Option<&PageToken>,
    ) -> Result<Page> {
        let room = self.joined_room(feed)?;
        self.page(&room, page_size, before).await
    }

    async fn fetch_since(
        &self,
        feed: &FeedHandle,
        after: MessageId,
        page_size: usize,
    ) -> Result<Vec<RawMessage>> {
        let room = self.joined_room(feed)?;
        let mut collected = Vec::new();
        let mut before = None;

        loop {
            let page = self.page(&room, page_size, before.as_ref()).await?;
            let mut reached = false;
            for message in page.messages {
                if message.id <= after {
                    reached = true;
                    break;
                }
                collected.push(message);
                if collected.len() >= page_size {
                    return Ok(collected);
                }
            }
            match page.next {
                Some(token) if !reached => before = Some(token),
                _ => return Ok(collected),
            }
        }
    }

    async fn list_owned_groups(&self) -> Result<Vec<String>> {
        Ok(self
            .client
            .joined_rooms()
            .iter()
            .filter_map(|room| room.canonical_alias())
            .map(|alias| alias.to_string())
            .collect())
    }

    async fn resolve_destination(&self, identifier: &str) -> Result<FeedHandle, SendError> {
        let room_id = self
            .resolve_room_id(identifier)
            .await
            .map_err(SendError::DestinationUnavailable)?;
        if self.room_for(&room_id).is_none() {
            return Err(SendError::DestinationUnavailable(format!(
                "{identifier} is not a joined room"
            )));
        }
        Ok(FeedHandle {
            identifier: identifier.to_string(),
            native_id: room_id.to_string(),
        })
    }

    async fn send(&self, destination: &FeedHandle, message: &Message) -> Result<(), SendError> {
        let room_id = RoomId::parse(&destination.native_id)
            .map_err(|e| SendError::DestinationUnavailable(e.to_string()))?;
        let room = self.room_for(&room_id).ok_or_else(|| {
            SendError::DestinationUnavailable(format!("{} is not a joined room", destination.identifier))
        })?;

        // Re-send the original content so formatting survives; drop any thread or reply relation.
        let content = match message.origin().downcast_ref::<MatrixOrigin>() {
            Some(origin) => {
                tracing::debug!("Re-sending {} to {}", origin.event_id, destination.identifier);
                let mut content = origin.content.clone();
                content.relates_to = None;
                content
            }
            None => RoomMessageEventContent::text_plain(message.content()),
        };

        room.send(content)
            .await
            .map(|_| ())
            .map_err(|e| classify_send_error(&e))
    }

    async fn subscribe(&self, feed: &FeedHandle) -> Result<Subscription> {
        let room_id = RoomId::parse(&feed.native_id)
            .map_err(|e| RelayError::TransportFailure(e.to_string()))?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        let handler = self.client.add_event_handler(
            move |ev: OriginalSyncRoomMessageEvent, room: Room| {
                let tx = tx.clone();
                let room_id = room_id.clone();
                async move {
                    if room.room_id() != &*room_id {
                        return;
                    }
                    let raw = raw_message(ev.event_id, ev.origin_server_ts, ev.content);
                    if tx.send(raw).await.is_err() {
                        tracing::debug!("Listen subscriber is gone; dropping event");
                    }
                }
            },
        );

        let mut settings = SyncSettings::default();
        if let Some(token) = self.sync_token.lock().ok().and_then(|token| token.clone()) {
            settings = settings.token(token);
        }

        let sync_client = self.client.clone();
        let sync_handler = handler.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = sync_client.sync(settings).await {
                tracing::error!("Sync loop failed: {}", e);
            }
            // Dropping the handler closes the channel so the listener notices.
            sync_client.remove_event_handler(sync_handler);
        });

        let client = self.client.clone();
        tracing::info!("Subscribed to {}", feed.identifier);
        Ok(Subscription::new(rx).on_teardown(move || {
            task.abort();
            client.remove_event_handler(handler);
        }))
    }
}
