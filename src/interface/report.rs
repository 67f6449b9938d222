//! # Console Reports
//!
//! Output for the `status` and `check` commands. Neither needs a connection.

use crate::application::scheduler::Trigger;
use crate::domain::config::Snapshot;
use crate::domain::error::Result;
use crate::strings::messages;
use chrono::{DateTime, Utc};

pub fn status(snapshot: &Snapshot) -> String {
    let config = &snapshot.config;
    let trigger = Trigger::from_snapshot(snapshot);
    let lines = [
        messages::STATUS_HEADER.to_string(),
        messages::status_line("source", &config.source),
        messages::status_line(
            "destinations",
            &messages::destinations(&config.destinations, config.forward_to_all),
        ),
        messages::status_line("mode", config.mode.as_str()),
        messages::status_line("order", &format!("{:?}", config.order).to_lowercase()),
        messages::status_line(
            "window",
            &messages::window(config.time_window_enabled, config.start_hour, config.end_hour),
        ),
        messages::status_line("timezone", &config.timezone),
        messages::status_line("trigger", &trigger.describe()),
        messages::status_line("last forwarded", &messages::watermark(config.last_forwarded_id)),
    ];
    lines.join("\n")
}

/// Validates the trigger and lists its next fire times.
/// Fails on a trigger the scheduler would have to replace.
pub fn check(snapshot: &Snapshot, now: DateTime<Utc>) -> Result<String> {
    let trigger = Trigger::configured(snapshot)?;
    let mut lines = vec![
        messages::CONFIG_OK.to_string(),
        messages::upcoming_header(&trigger.describe()),
    ];
    lines.extend(
        trigger
            .upcoming(now, 5)
            .iter()
            .enumerate()
            .map(|(i, at)| {
                let local = at.with_timezone(&snapshot.timezone);
                messages::upcoming_entry(i, &local.format("%Y-%m-%d %H:%M %Z").to_string())
            }),
    );
    Ok(lines.join("\n"))
}
