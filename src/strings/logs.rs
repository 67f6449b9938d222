use crate::domain::types::{MessageId, Mode};
use std::time::Duration;

pub fn config_loaded(path: &str) -> String {
    format!("Loaded configuration from {path}")
}

pub fn logged_in(user: &str) -> String {
    format!("Logged in as {user}")
}

pub fn starting_mode(mode: Mode) -> String {
    format!("Starting forwarder in {mode} mode")
}

pub const ENGINE_STOPPED: &str = "Forwarding engine stopped.";

pub const SHUTDOWN: &str = "Shutting down...";

pub fn shutdown_fail(err: &str) -> String {
    format!("Unable to listen for shutdown signal: {err}")
}

pub const NO_DESTINATIONS: &str = "No destinations configured; skipping cycle.";

pub fn outside_window(start: u32, end: u32, timezone: &str) -> String {
    format!("Outside allowed hours {start:02}:00-{end:02}:00 ({timezone}); skipping.")
}

pub fn cycle_aborted(err: &str) -> String {
    format!("Cycle aborted, nothing was forwarded: {err}")
}

pub fn forwarding_message(id: MessageId, index: usize) -> String {
    format!("Forwarding msg {id} (idx {index})")
}

pub fn destination_skipped(destination: &str, reason: &str) -> String {
    format!("Skipping destination {destination}: {reason}")
}

pub fn rate_limited(destination: &str, cooldown: Duration) -> String {
    format!(
        "Rate limited by {destination}; waiting {}s before moving on",
        cooldown.as_secs()
    )
}

pub fn config_reload_failed(path: &str, err: &str) -> String {
    format!("Ignoring invalid configuration in {path}, keeping last good values: {err}")
}

pub fn config_created(path: &str) -> String {
    format!("No forwarding configuration at {path}; wrote defaults")
}
