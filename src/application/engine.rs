//! # Forwarding Engine
//!
//! The mode state machine. Each mode owns its loop:
//! - `Continuous`: round-robin over today's messages with pacing between steps.
//! - `Incremental`: one watermark-driven cycle per trigger.
//! - `Listen`: forward each inbound message as it arrives.
//!
//! Every iteration starts from a fresh configuration snapshot and is gated by
//! the admission window. Nothing here is fatal; failures skip work and wait.

use crate::application::admission::is_admitted;
use crate::application::cursor::DeliveryCursor;
use crate::application::delivery::{DeliveryExecutor, DeliveryReport, Pacing, resolve_destinations};
use crate::application::resolver::MessageWindowResolver;
use crate::application::scheduler::Trigger;
use crate::application::shutdown::Shutdown;
use crate::application::watermark::WatermarkStore;
use crate::domain::config::{Snapshot, start_of_day};
use crate::domain::error::Result;
use crate::domain::traits::{ConfigStore, FeedGateway};
use crate::domain::types::{DeliveryOrder, Message, MessageId, Mode, RawMessage, Subscription};
use crate::strings::logs;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Wait used when there is no usable snapshot to take a pacing interval from.
const ERROR_BACKOFF: Duration = Duration::from_secs(60);

/// Result of one incremental cycle or one listen event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    OutsideWindow,
    NoDestinations,
    NoMessages,
    /// Nothing was mutated; the next trigger retries.
    Aborted(String),
    Delivered {
        report: DeliveryReport,
        watermark: Option<MessageId>,
    },
}

/// Result of one continuous-mode step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuousOutcome {
    OutsideWindow,
    NoDestinations,
    NoMessages,
    Aborted(String),
    /// One message of the sweep was sent to every destination.
    Forwarded {
        index: usize,
        message_id: MessageId,
        report: DeliveryReport,
    },
    /// The whole set went out in one batch per destination.
    Batched { report: DeliveryReport },
}

pub struct ForwardingEngine {
    gateway: Arc<dyn FeedGateway>,
    store: Arc<dyn ConfigStore>,
    shutdown: Shutdown,
}

impl ForwardingEngine {
    pub fn new(gateway: Arc<dyn FeedGateway>, store: Arc<dyn ConfigStore>, shutdown: Shutdown) -> Self {
        Self {
            gateway,
            store,
            shutdown,
        }
    }

    /// Drive the engine in `mode` until shutdown.
    pub async fn run(&self, mode: Mode) {
        tracing::info!("{}", logs::starting_mode(mode));
        match mode {
            Mode::Continuous => self.run_continuous().await,
            Mode::Incremental => self.run_scheduled().await,
            Mode::Listen => self.run_listen().await,
        }
        tracing::info!("{}", logs::ENGINE_STOPPED);
    }

    fn snapshot(&self) -> Option<Snapshot> {
        match self.store.snapshot() {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::error!("Configuration unavailable: {}", e);
                None
            }
        }
    }

    fn admitted(snapshot: &Snapshot) -> bool {
        let window = snapshot.window();
        let admitted = is_admitted(&snapshot.now_local(), &window);
        if !admitted {
            tracing::debug!(
                "{}",
                logs::outside_window(window.start_hour, window.end_hour, &snapshot.config.timezone)
            );
        }
        admitted
    }

    // ---------- Continuous ------------------------------------------------

    pub async fn run_continuous(&self) {
        let mut cursor = DeliveryCursor::new();
        while !self.shutdown.is_triggered() {
            let (outcome, idle) = self.continuous_step(&mut cursor).await;
            tracing::trace!(?outcome, "Continuous step finished");
            if self.shutdown.sleep(idle).await {
                break;
            }
        }
    }

    /// One continuous iteration. Returns the outcome and how long to idle afterwards.
    pub async fn continuous_step(&self, cursor: &mut DeliveryCursor) -> (ContinuousOutcome, Duration) {
        let Some(snapshot) = self.snapshot() else {
            return (
                ContinuousOutcome::Aborted("configuration unavailable".to_string()),
                ERROR_BACKOFF,
            );
        };
        let idle = snapshot.pacing();

        if !Self::admitted(&snapshot) {
            return (ContinuousOutcome::OutsideWindow, idle);
        }

        let today = snapshot.today();
        if cursor.needs_refresh(today) {
            match self.resolve_today(&snapshot).await {
                Ok(messages) => {
                    cursor.replace(messages, today);
                    tracing::debug!("Loaded {} messages for {}", cursor.messages().len(), today);
                }
                Err(e) => {
                    tracing::error!("{}", logs::cycle_aborted(&e.to_string()));
                    return (ContinuousOutcome::Aborted(e.to_string()), idle);
                }
            }
        }
        if cursor.is_empty() {
            tracing::debug!("No messages to forward in continuous mode.");
            return (ContinuousOutcome::NoMessages, idle);
        }

        let destinations = resolve_destinations(self.gateway.as_ref(), &snapshot).await;
        if destinations.is_empty() {
            tracing::error!("{}", logs::NO_DESTINATIONS);
            return (ContinuousOutcome::NoDestinations, idle);
        }

        let executor = DeliveryExecutor::new(self.gateway.as_ref(), &self.shutdown);
        let pacing = Pacing::from_snapshot(&snapshot);

        match snapshot.config.order {
            DeliveryOrder::Batched => {
                let remaining: Vec<Message> = cursor.sweep().map(|(_, m)| m.clone()).collect();
                let report = executor
                    .deliver(&destinations, &remaining, DeliveryOrder::Batched, &pacing)
                    .await;
                tracing::info!(
                    "Batch-forwarded {} messages to {} destinations",
                    remaining.len(),
                    destinations.len()
                );
                cursor.finish_sweep();
                (ContinuousOutcome::Batched { report }, idle)
            }
            DeliveryOrder::Sequential => {
                let Some((index, message)) = cursor.step() else {
                    return (ContinuousOutcome::NoMessages, idle);
                };
                let message = message.clone();
                tracing::info!("{}", logs::forwarding_message(message.id(), index));
                tracing::trace!(next = cursor.position(), "Cursor advanced");
                let report = executor
                    .deliver(
                        &destinations,
                        std::slice::from_ref(&message),
                        DeliveryOrder::Sequential,
                        &pacing,
                    )
                    .await;
                (
                    ContinuousOutcome::Forwarded {
                        index,
                        message_id: message.id(),
                        report,
                    },
                    idle,
                )
            }
        }
    }

    async fn resolve_today(&self, snapshot: &Snapshot) -> Result<Vec<Message>> {
        let resolver = MessageWindowResolver::new(self.gateway.as_ref());
        let source = resolver.source(&snapshot.config.source).await?;
        let since = start_of_day(&snapshot.now_local());
        resolver.full_day(&source, since, snapshot.config.page_size).await
    }

    // ---------- Incremental -----------------------------------------------

    /// Run one incremental cycle per trigger until shutdown.
    /// Cycles never overlap; fire times that pass during a cycle are skipped.
    pub async fn run_scheduled(&self) {
        loop {
            let trigger = match self.snapshot() {
                Some(snapshot) => Trigger::from_snapshot(&snapshot),
                None => Trigger::Interval(ERROR_BACKOFF),
            };
            let delay = trigger.delay_from(Utc::now()).unwrap_or_else(|| {
                tracing::warn!("Trigger {} has no upcoming fire time", trigger.describe());
                ERROR_BACKOFF
            });
            tracing::debug!("Next cycle in {:?} ({})", delay, trigger.describe());
            if self.shutdown.sleep(delay).await {
                break;
            }

            tracing::info!("Forwarding job started.");
            let outcome = self.run_incremental_cycle().await;
            tracing::debug!(?outcome, "Incremental cycle finished");
        }
    }

    /// Fetch everything above the watermark, deliver it, then advance the watermark.
    pub async fn run_incremental_cycle(&self) -> CycleOutcome {
        let Some(snapshot) = self.snapshot() else {
            return CycleOutcome::Aborted("configuration unavailable".to_string());
        };
        if !Self::admitted(&snapshot) {
            return CycleOutcome::OutsideWindow;
        }

        let destinations = resolve_destinations(self.gateway.as_ref(), &snapshot).await;
        if destinations.is_empty() {
            tracing::error!("{}", logs::NO_DESTINATIONS);
            return CycleOutcome::NoDestinations;
        }

        let watermark = WatermarkStore::new(self.store.as_ref());
        let messages = match self.resolve_new(&snapshot, &watermark).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::error!("{}", logs::cycle_aborted(&e.to_string()));
                return CycleOutcome::Aborted(e.to_string());
            }
        };
        if messages.is_empty() {
            tracing::debug!("No messages to forward in incremental mode.");
            return CycleOutcome::NoMessages;
        }

        if snapshot.config.order == DeliveryOrder::Batched {
            tracing::debug!("Batched order only applies to continuous mode; sending one by one.");
        }
        let executor = DeliveryExecutor::new(self.gateway.as_ref(), &self.shutdown);
        let report = executor
            .deliver(
                &destinations,
                &messages,
                DeliveryOrder::Sequential,
                &Pacing::from_snapshot(&snapshot),
            )
            .await;

        if report.interrupted {
            tracing::warn!("Cycle interrupted by shutdown; watermark left unchanged.");
            return CycleOutcome::Delivered {
                report,
                watermark: None,
            };
        }

        // Failed destinations do not hold the watermark back.
        let advanced = match watermark.advance_past(&messages) {
            Ok(advanced) => advanced,
            Err(e) => {
                tracing::error!("Failed to persist watermark: {}", e);
                None
            }
        };
        tracing::info!(
            sent = report.total_sent(),
            failed_destinations = report.failed_destinations(),
            "Forward operation complete in incremental mode."
        );
        CycleOutcome::Delivered {
            report,
            watermark: advanced,
        }
    }

    async fn resolve_new(&self, snapshot: &Snapshot, watermark: &WatermarkStore<'_>) -> Result<Vec<Message>> {
        let after = watermark.get()?;
        let resolver = MessageWindowResolver::new(self.gateway.as_ref());
        let source = resolver.source(&snapshot.config.source).await?;
        resolver
            .incremental(&source, after, snapshot.config.page_size)
            .await
    }

    // ---------- Listen ----------------------------------------------------

    /// Subscribe to the source and forward each inbound text message until
    /// shutdown. A closed subscription is re-established after a backoff.
    pub async fn run_listen(&self) {
        loop {
            let Some(mut subscription) = self.subscribe_with_retry().await else {
                return;
            };

            loop {
                let event = tokio::select! {
                    _ = self.shutdown.wait() => return,
                    event = subscription.next() => event,
                };
                let Some(raw) = event else {
                    break;
                };
                let outcome = self.handle_event(raw).await;
                tracing::debug!(?outcome, "Listen event handled");
            }

            drop(subscription);
            tracing::warn!("Listen subscription closed; resubscribing in {:?}", ERROR_BACKOFF);
            if self.shutdown.sleep(ERROR_BACKOFF).await {
                return;
            }
        }
    }

    /// `None` only when shutdown interrupts the retries.
    async fn subscribe_with_retry(&self) -> Option<Subscription> {
        loop {
            match self.subscribe().await {
                Ok(subscription) => return Some(subscription),
                Err(e) => {
                    tracing::error!("Failed to subscribe to source: {}", e);
                    if self.shutdown.sleep(ERROR_BACKOFF).await {
                        return None;
                    }
                }
            }
        }
    }

    async fn subscribe(&self) -> Result<Subscription> {
        let snapshot = self.store.snapshot()?;
        let source = self.gateway.resolve_source(&snapshot.config.source).await?;
        self.gateway.subscribe(&source).await
    }

    /// Forward a single inbound message. Each event stands alone: no cursor, no watermark.
    pub async fn handle_event(&self, raw: RawMessage) -> CycleOutcome {
        let raw_id = raw.id;
        let Some(message) = Message::from_raw(raw) else {
            tracing::debug!("Ignoring non-text message {}", raw_id);
            return CycleOutcome::NoMessages;
        };
        let Some(snapshot) = self.snapshot() else {
            return CycleOutcome::Aborted("configuration unavailable".to_string());
        };
        if !Self::admitted(&snapshot) {
            tracing::info!("Dropping message {} received outside the window", message.id());
            return CycleOutcome::OutsideWindow;
        }

        let destinations = resolve_destinations(self.gateway.as_ref(), &snapshot).await;
        if destinations.is_empty() {
            tracing::error!("No targets in listen mode; dropping msg {}", message.id());
            return CycleOutcome::NoDestinations;
        }

        let executor = DeliveryExecutor::new(self.gateway.as_ref(), &self.shutdown);
        let report = executor
            .deliver(
                &destinations,
                std::slice::from_ref(&message),
                DeliveryOrder::Sequential,
                &Pacing::from_snapshot(&snapshot),
            )
            .await;
        tracing::info!(
            "Listen-mode forwarded msg {} to {} targets",
            message.id(),
            destinations.len()
        );
        CycleOutcome::Delivered {
            report,
            watermark: None,
        }
    }
}
