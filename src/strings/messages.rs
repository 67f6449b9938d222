//! # Messages
//!
//! Console output for the `status` and `check` commands.

use crate::domain::types::MessageId;

pub const STATUS_HEADER: &str = "Forwarding status";

pub fn status_line(label: &str, value: &str) -> String {
    format!("  {label:<18} {value}")
}

pub fn watermark(id: MessageId) -> String {
    if id == 0 {
        "none (nothing forwarded yet)".to_string()
    } else {
        id.to_string()
    }
}

pub fn window(enabled: bool, start: u32, end: u32) -> String {
    if enabled {
        format!("{start:02}:00-{end:02}:00")
    } else {
        "always open".to_string()
    }
}

pub fn destinations(list: &[String], forward_to_all: bool) -> String {
    if forward_to_all {
        "all public groups".to_string()
    } else if list.is_empty() {
        "(none)".to_string()
    } else {
        list.join(", ")
    }
}

pub fn upcoming_header(trigger: &str) -> String {
    format!("Next fire times for {trigger}:")
}

pub fn upcoming_entry(index: usize, at: &str) -> String {
    format!("  {}. {at}", index + 1)
}

pub const CONFIG_OK: &str = "Configuration is valid.";
