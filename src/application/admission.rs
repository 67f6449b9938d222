//! # Admission Controller
//!
//! Decides whether the current local time falls inside the forwarding window.

use crate::domain::config::TimeWindow;
use chrono::{DateTime, TimeZone, Timelike};

/// True when the window is disabled, or `start_hour <= hour < end_hour`.
pub fn is_admitted<Z: TimeZone>(now_local: &DateTime<Z>, window: &TimeWindow) -> bool {
    if !window.enabled {
        return true;
    }
    let hour = now_local.hour();
    window.start_hour <= hour && hour < window.end_hour
}
