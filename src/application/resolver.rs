//! # Message Window Resolver
//!
//! Turns a forwarding policy into an ordered set of text messages, paging through
//! the source feed as needed.
//!
//! Two strategies:
//! - **Full day**: everything published since local midnight, oldest first.
//! - **Incremental**: everything newer than the watermark, bounded by the page size.

use crate::domain::error::Result;
use crate::domain::traits::FeedGateway;
use crate::domain::types::{FeedHandle, Message, MessageId};
use chrono::{DateTime, Utc};

pub struct MessageWindowResolver<'a> {
    gateway: &'a dyn FeedGateway,
}

impl<'a> MessageWindowResolver<'a> {
    pub fn new(gateway: &'a dyn FeedGateway) -> Self {
        Self { gateway }
    }

    /// Resolve the source identifier, failing with `SourceUnavailable`.
    pub async fn source(&self, identifier: &str) -> Result<FeedHandle> {
        self.gateway.resolve_source(identifier).await
    }

    /// Every text message published at or after `since`, oldest first.
    ///
    /// The feed is read newest-first; paging stops at the first page whose
    /// oldest message predates `since`. Pages without messages (only state
    /// events, say) do not end the walk; only a missing continuation does.
    pub async fn full_day(
        &self,
        source: &FeedHandle,
        since: DateTime<Utc>,
        page_size: usize,
    ) -> Result<Vec<Message>> {
        let mut collected = Vec::new();
        let mut before = None;

        loop {
            let page = self
                .gateway
                .fetch_page(source, page_size, before.as_ref())
                .await?;
            let crossed = page
                .messages
                .last()
                .is_some_and(|oldest| oldest.timestamp < since);

            collected.extend(
                page.messages
                    .into_iter()
                    .take_while(|raw| raw.timestamp >= since)
                    .filter_map(Message::from_raw),
            );

            match page.next {
                Some(token) if !crossed => before = Some(token),
                _ => break,
            }
        }

        collected.reverse();
        tracing::info!(
            source = %source.identifier,
            "Resolved {} text messages since {}",
            collected.len(),
            since
        );
        Ok(collected)
    }

    /// Text messages with an id strictly above `after`, in ascending timestamp order.
    pub async fn incremental(
        &self,
        source: &FeedHandle,
        after: MessageId,
        page_size: usize,
    ) -> Result<Vec<Message>> {
        let raw = self.gateway.fetch_since(source, after, page_size).await?;
        if raw.len() >= page_size {
            // Anything older than this page is skipped once the watermark moves.
            tracing::warn!(
                source = %source.identifier,
                "Backlog fills a whole page of {}; older messages after id {} will not be forwarded",
                page_size,
                after
            );
        }
        let mut messages: Vec<Message> = raw
            .into_iter()
            .filter(|raw| raw.id > after)
            .filter_map(Message::from_raw)
            .collect();
        messages.sort_by_key(|m| (m.timestamp(), m.id()));
        tracing::debug!(
            source = %source.identifier,
            "Resolved {} new text messages after id {}",
            messages.len(),
            after
        );
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{FakeGateway, raw_media, raw_text};
    use crate::domain::error::RelayError;
    use chrono::{Duration, TimeZone};

    const SOURCE: &str = "#news:example.org";

    fn midnight() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_full_day_keeps_today_oldest_first() {
        let gateway = FakeGateway::new(SOURCE).with_messages(vec![
            raw_text(1, midnight() - Duration::minutes(10), "yesterday 23:50"),
            raw_text(2, midnight() + Duration::minutes(1), "today 00:01"),
            raw_text(3, midnight() + Duration::hours(10), "today 10:00"),
        ]);
        let resolver = MessageWindowResolver::new(&gateway);
        let source = resolver.source(SOURCE).await.unwrap();

        let messages = resolver.full_day(&source, midnight(), 100).await.unwrap();
        let contents: Vec<&str> = messages.iter().map(Message::content).collect();
        assert_eq!(contents, vec!["today 00:01", "today 10:00"]);
    }

    #[tokio::test]
    async fn test_full_day_pages_until_boundary() {
        // 250 messages today, then 50 from yesterday that must never be paged in full
        let mut history = Vec::new();
        for id in 1..=50 {
            history.push(raw_text(id, midnight() - Duration::hours(2), "old"));
        }
        for id in 51..=300 {
            history.push(raw_text(id, midnight() + Duration::seconds(id as i64), "new"));
        }
        let gateway = FakeGateway::new(SOURCE).with_messages(history);
        let resolver = MessageWindowResolver::new(&gateway);
        let source = resolver.source(SOURCE).await.unwrap();

        let messages = resolver.full_day(&source, midnight(), 100).await.unwrap();
        assert_eq!(messages.len(), 250);
        assert_eq!(messages.first().unwrap().id(), 51);
        assert_eq!(messages.last().unwrap().id(), 300);
        // Pages: 300..201, 200..101, 100..1 (crosses the boundary)
        assert_eq!(gateway.fetch_calls(), 3);
    }

    #[tokio::test]
    async fn test_full_day_drops_non_text() {
        let gateway = FakeGateway::new(SOURCE).with_messages(vec![
            raw_text(7, midnight() + Duration::hours(1), "hello"),
            raw_media(8, midnight() + Duration::hours(2)),
        ]);
        let resolver = MessageWindowResolver::new(&gateway);
        let source = resolver.source(SOURCE).await.unwrap();

        let messages = resolver.full_day(&source, midnight(), 100).await.unwrap();
        assert_eq!(messages.iter().map(Message::id).collect::<Vec<_>>(), vec![7]);
    }

    #[tokio::test]
    async fn test_full_day_empty_feed() {
        let gateway = FakeGateway::new(SOURCE);
        let resolver = MessageWindowResolver::new(&gateway);
        let source = resolver.source(SOURCE).await.unwrap();
        assert!(resolver.full_day(&source, midnight(), 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_incremental_above_watermark() {
        let now = Utc::now();
        let gateway = FakeGateway::new(SOURCE).with_messages(
            [40, 41, 43, 44, 50]
                .iter()
                .map(|&id| raw_text(id, now + Duration::seconds(id as i64), "m"))
                .collect(),
        );
        let resolver = MessageWindowResolver::new(&gateway);
        let source = resolver.source(SOURCE).await.unwrap();

        let messages = resolver.incremental(&source, 42, 100).await.unwrap();
        assert_eq!(messages.iter().map(Message::id).collect::<Vec<_>>(), vec![43, 44, 50]);
    }

    #[tokio::test]
    async fn test_incremental_timestamp_order_wins() {
        let now = Utc::now();
        let gateway = FakeGateway::new(SOURCE).with_messages(vec![
            raw_text(10, now + Duration::seconds(5), "late"),
            raw_text(11, now, "early"),
        ]);
        let resolver = MessageWindowResolver::new(&gateway);
        let source = resolver.source(SOURCE).await.unwrap();

        let messages = resolver.incremental(&source, 0, 100).await.unwrap();
        assert_eq!(messages.iter().map(Message::id).collect::<Vec<_>>(), vec![11, 10]);
    }

    #[tokio::test]
    async fn test_incremental_bounded_by_page_size() {
        let now = Utc::now();
        let gateway = FakeGateway::new(SOURCE).with_messages(
            (1..=10)
                .map(|id| raw_text(id, now + Duration::seconds(id as i64), "m"))
                .collect(),
        );
        let resolver = MessageWindowResolver::new(&gateway);
        let source = resolver.source(SOURCE).await.unwrap();

        // Only the newest page survives; 1..=7 are left behind
        let messages = resolver.incremental(&source, 0, 3).await.unwrap();
        assert_eq!(messages.iter().map(Message::id).collect::<Vec<_>>(), vec![8, 9, 10]);
    }

    #[tokio::test]
    async fn test_unknown_source() {
        let gateway = FakeGateway::new(SOURCE).without_source();
        let resolver = MessageWindowResolver::new(&gateway);
        let err = resolver.source(SOURCE).await.unwrap_err();
        assert!(matches!(err, RelayError::SourceUnavailable { .. }));
    }
}
