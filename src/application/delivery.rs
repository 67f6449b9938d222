//! # Delivery Executor
//!
//! Sends a resolved message set to every destination. A failing destination never
//! fails the cycle:
//! - rate limited: sleep the cooldown, then move on (the send is not retried)
//! - unavailable: skip the destination for the rest of the set
//! - any other failure: skip that message for that destination

use crate::application::shutdown::Shutdown;
use crate::domain::config::Snapshot;
use crate::domain::error::SendError;
use crate::domain::traits::FeedGateway;
use crate::domain::types::{DeliveryOrder, FeedHandle, Message};
use crate::strings::logs;
use std::time::Duration;

/// Timing knobs for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Gap between two consecutive sends.
    pub send_delay: Duration,
    /// Cooldown used when the backend does not provide one.
    pub fallback_cooldown: Duration,
}

impl Pacing {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            send_delay: snapshot.send_delay(),
            fallback_cooldown: snapshot.rate_limit_cooldown(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationReport {
    pub destination: String,
    pub sent: usize,
    pub rate_limited: usize,
    pub failed: usize,
    /// Destination could not be resolved or refused delivery.
    pub skipped: bool,
}

impl DestinationReport {
    fn new(destination: &str) -> Self {
        Self {
            destination: destination.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub destinations: Vec<DestinationReport>,
    /// Shutdown was requested before every destination was attempted.
    pub interrupted: bool,
}

impl DeliveryReport {
    pub fn total_sent(&self) -> usize {
        self.destinations.iter().map(|d| d.sent).sum()
    }

    pub fn failed_destinations(&self) -> usize {
        self.destinations
            .iter()
            .filter(|d| d.skipped || d.failed > 0 || d.rate_limited > 0)
            .count()
    }

    #[cfg(test)]
    pub fn for_destination(&self, destination: &str) -> Option<&DestinationReport> {
        self.destinations.iter().find(|d| d.destination == destination)
    }
}

enum Step {
    Continue,
    SkipDestination,
    Interrupted,
}

pub struct DeliveryExecutor<'a> {
    gateway: &'a dyn FeedGateway,
    shutdown: &'a Shutdown,
}

impl<'a> DeliveryExecutor<'a> {
    pub fn new(gateway: &'a dyn FeedGateway, shutdown: &'a Shutdown) -> Self {
        Self { gateway, shutdown }
    }

    /// Deliver `messages` to `destinations`, visiting destinations in list order.
    pub async fn deliver(
        &self,
        destinations: &[String],
        messages: &[Message],
        order: DeliveryOrder,
        pacing: &Pacing,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if messages.is_empty() {
            return report;
        }

        if order == DeliveryOrder::Batched && !self.gateway.supports_batch() {
            tracing::debug!("No native batch send; delivering the batch message by message.");
        }

        let mut first_send = true;
        for identifier in destinations {
            if self.shutdown.is_triggered() {
                report.interrupted = true;
                break;
            }

            let mut entry = DestinationReport::new(identifier);
            let handle = match self.gateway.resolve_destination(identifier).await {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::error!("{}", logs::destination_skipped(identifier, &e.to_string()));
                    entry.skipped = true;
                    report.destinations.push(entry);
                    continue;
                }
            };

            let interrupted = match order {
                DeliveryOrder::Batched if self.gateway.supports_batch() => {
                    if !first_send && self.shutdown.sleep(pacing.send_delay).await {
                        true
                    } else {
                        first_send = false;
                        self.send_batch(&handle, messages, pacing, &mut entry).await
                    }
                }
                DeliveryOrder::Batched | DeliveryOrder::Sequential => {
                    self.send_each(&handle, messages, pacing, &mut entry, &mut first_send)
                        .await
                }
            };

            tracing::info!(
                destination = %identifier,
                sent = entry.sent,
                failed = entry.failed,
                rate_limited = entry.rate_limited,
                "Delivery to destination finished"
            );
            report.destinations.push(entry);
            if interrupted {
                report.interrupted = true;
                break;
            }
        }

        report
    }

    /// Returns `true` if shutdown interrupted the destination.
    async fn send_each(
        &self,
        handle: &FeedHandle,
        messages: &[Message],
        pacing: &Pacing,
        entry: &mut DestinationReport,
        first_send: &mut bool,
    ) -> bool {
        for message in messages {
            if !*first_send && self.shutdown.sleep(pacing.send_delay).await {
                return true;
            }
            *first_send = false;

            let outcome = self.gateway.send(handle, message).await;
            match self.absorb(handle, outcome, 1, pacing, entry).await {
                Step::Continue => {
                    tracing::debug!("Forwarded message {} to {}", message.id(), handle.identifier);
                }
                Step::SkipDestination => return false,
                Step::Interrupted => return true,
            }
        }
        false
    }

    async fn send_batch(
        &self,
        handle: &FeedHandle,
        messages: &[Message],
        pacing: &Pacing,
        entry: &mut DestinationReport,
    ) -> bool {
        let outcome = self.gateway.send_batch(handle, messages).await;
        match self.absorb(handle, outcome, messages.len(), pacing, entry).await {
            Step::Interrupted => true,
            _ => false,
        }
    }

    /// Folds a send outcome into the report, sleeping out rate limits.
    async fn absorb(
        &self,
        handle: &FeedHandle,
        outcome: Result<(), SendError>,
        count: usize,
        pacing: &Pacing,
        entry: &mut DestinationReport,
    ) -> Step {
        match outcome {
            Ok(()) => {
                entry.sent += count;
                Step::Continue
            }
            Err(SendError::RateLimited(cooldown)) => {
                entry.rate_limited += count;
                let cooldown = if cooldown.is_zero() {
                    pacing.fallback_cooldown
                } else {
                    cooldown
                };
                tracing::warn!("{}", logs::rate_limited(&handle.identifier, cooldown));
                if self.shutdown.sleep(cooldown).await {
                    Step::Interrupted
                } else {
                    Step::Continue
                }
            }
            Err(SendError::DestinationUnavailable(reason)) => {
                tracing::error!("{}", logs::destination_skipped(&handle.identifier, &reason));
                entry.skipped = true;
                Step::SkipDestination
            }
            Err(SendError::Failed(reason)) => {
                tracing::error!("Cannot forward to {}: {}", handle.identifier, reason);
                entry.failed += count;
                Step::Continue
            }
        }
    }
}

/// Destination list for this cycle: discovered groups, or the configured list.
/// Duplicates and the source itself are dropped; list order is kept.
///
/// The source is matched by its resolved native id as well, so an alias and a
/// room id naming the same feed are treated as one.
pub async fn resolve_destinations(gateway: &dyn FeedGateway, snapshot: &Snapshot) -> Vec<String> {
    let candidates = if snapshot.config.forward_to_all {
        match gateway.list_owned_groups().await {
            Ok(groups) => {
                tracing::info!("Found {} public groups.", groups.len());
                groups
            }
            Err(e) => {
                tracing::error!("Failed to list groups: {}", e);
                Vec::new()
            }
        }
    } else {
        snapshot.config.destinations.clone()
    };

    let source = snapshot.config.source.trim();
    let source_native = match gateway.resolve_source(source).await {
        Ok(handle) => Some(handle.native_id),
        Err(e) => {
            tracing::debug!("Source not resolved while filtering destinations: {}", e);
            None
        }
    };

    let mut destinations: Vec<String> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let candidate = candidate.trim().to_string();
        if candidate.is_empty() || candidate == source || destinations.contains(&candidate) {
            continue;
        }
        if let Some(native) = &source_native {
            // Unresolvable candidates stay in; the executor reports them.
            if let Ok(handle) = gateway.resolve_destination(&candidate).await {
                if &handle.native_id == native {
                    tracing::debug!("Dropping {}: it is the source", candidate);
                    continue;
                }
            }
        }
        destinations.push(candidate);
    }
    destinations
}
