//! # Trigger
//!
//! When an incremental cycle should run: a five-field cron expression
//! (minute, hour, day-of-month, month, day-of-week) evaluated in the
//! configured time zone, or a fixed interval.

use crate::domain::config::Snapshot;
use crate::domain::error::{RelayError, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;

pub const EVERY_MINUTE: &str = "* * * * *";

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

#[derive(Debug, Clone)]
pub enum Trigger {
    Cron {
        expression: String,
        schedule: Schedule,
        timezone: Tz,
    },
    Interval(Duration),
}

impl Trigger {
    /// Build the trigger from the snapshot. An interval wins over a cron expression;
    /// an invalid expression falls back to every minute.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self::configured(snapshot).unwrap_or_else(|e| {
            tracing::warn!("Invalid cron expression, defaulting to '{}': {}", EVERY_MINUTE, e);
            Self::every_minute(snapshot.timezone)
        })
    }

    /// The trigger exactly as configured, without the every-minute fallback.
    pub fn configured(snapshot: &Snapshot) -> Result<Self> {
        if let Some(secs) = snapshot.config.interval_secs.filter(|secs| *secs > 0) {
            return Ok(Trigger::Interval(Duration::from_secs(secs)));
        }
        let expression = snapshot
            .config
            .cron_schedule
            .as_deref()
            .unwrap_or(EVERY_MINUTE);
        Self::cron(expression, snapshot.timezone)
    }

    pub fn cron(expression: &str, timezone: Tz) -> Result<Self> {
        let normalized = normalize_cron(expression)?;
        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| RelayError::Schedule(format!("'{expression}': {e}")))?;
        Ok(Trigger::Cron {
            expression: expression.trim().to_string(),
            schedule,
            timezone,
        })
    }

    fn every_minute(timezone: Tz) -> Self {
        let schedule = Schedule::from_str("0 * * * * *").expect("static cron expression is valid");
        Trigger::Cron {
            expression: EVERY_MINUTE.to_string(),
            schedule,
            timezone,
        }
    }

    /// First fire time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Cron {
                schedule, timezone, ..
            } => schedule
                .after(&now.with_timezone(timezone))
                .next()
                .map(|at| at.with_timezone(&Utc)),
            Trigger::Interval(interval) => {
                chrono::Duration::from_std(*interval).ok().map(|step| now + step)
            }
        }
    }

    /// How long to wait from `now` until the next fire time.
    pub fn delay_from(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.next_after(now)
            .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn upcoming(&self, now: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = now;
        while times.len() < count {
            match self.next_after(cursor) {
                Some(at) => {
                    times.push(at);
                    cursor = at;
                }
                None => break,
            }
        }
        times
    }

    pub fn describe(&self) -> String {
        match self {
            Trigger::Cron {
                expression,
                timezone,
                ..
            } => format!("cron '{expression}' ({timezone})"),
            Trigger::Interval(interval) => format!("every {}s", interval.as_secs()),
        }
    }
}

/// Convert a classic five-field expression into the seconds-first form the
/// `cron` crate expects. Numeric weekdays (0 or 7 = Sunday) become names.
pub fn normalize_cron(expression: &str) -> Result<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(RelayError::Schedule(format!(
            "expected 5 fields, got {} in '{}'",
            fields.len(),
            expression
        )));
    }
    let weekday = normalize_weekday(fields[4])?;
    Ok(format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], weekday
    ))
}

fn normalize_weekday(field: &str) -> Result<String> {
    let parts: Result<Vec<String>> = field
        .split(',')
        .map(|part| {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (part, None),
            };
            let range = range
                .split('-')
                .map(weekday_name)
                .collect::<Result<Vec<_>>>()?
                .join("-");
            Ok(match step {
                Some(step) => format!("{range}/{step}"),
                None => range,
            })
        })
        .collect();
    Ok(parts?.join(","))
}

fn weekday_name(token: &str) -> Result<String> {
    match token.parse::<usize>() {
        Ok(day) if day <= 7 => Ok(WEEKDAYS[day % 7].to_string()),
        Ok(day) => Err(RelayError::Schedule(format!("day of week {day} is out of range"))),
        Err(_) => Ok(token.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::quick_config;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    #[test]
    fn test_normalize_five_fields() {
        assert_eq!(normalize_cron("*/5 * * * *").unwrap(), "0 */5 * * * *");
        assert_eq!(normalize_cron("0 9 * * 1-5").unwrap(), "0 0 9 * * Mon-Fri");
        assert_eq!(normalize_cron("0 9 * * 0,6").unwrap(), "0 0 9 * * Sun,Sat");
        assert_eq!(normalize_cron("0 9 * * 7").unwrap(), "0 0 9 * * Sun");
        assert_eq!(normalize_cron("0 9 * * */2").unwrap(), "0 0 9 * * */2");
        assert!(normalize_cron("* * * *").is_err());
        assert!(normalize_cron("0 9 * * 8").is_err());
    }

    #[test]
    fn test_every_five_minutes() {
        let trigger = Trigger::cron("*/5 * * * *", chrono_tz::UTC).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 10, 3, 20).unwrap();
        let next = trigger.next_after(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 2, 10, 5, 0).unwrap());
        assert_eq!(trigger.delay_from(now).unwrap(), Duration::from_secs(100));
    }

    #[test]
    fn test_weekday_schedule_in_zone() {
        let tz: Tz = "Asia/Tokyo".parse().unwrap();
        let trigger = Trigger::cron("30 9 * * 1", tz).unwrap();
        // Wednesday
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let next = trigger.next_after(now).unwrap().with_timezone(&tz);
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!((next.hour(), next.minute()), (9, 30));
    }

    #[test]
    fn test_interval_trigger() {
        let mut config = quick_config("#s:x", &[]);
        config.interval_secs = Some(90);
        let snapshot = Snapshot::new(config).unwrap();
        let trigger = Trigger::from_snapshot(&snapshot);
        let now = Utc::now();
        assert_eq!(trigger.delay_from(now).unwrap(), Duration::from_secs(90));
        assert_eq!(trigger.describe(), "every 90s");
    }

    #[test]
    fn test_invalid_expression_falls_back() {
        let mut config = quick_config("#s:x", &[]);
        config.cron_schedule = Some("not a cron".to_string());
        let snapshot = Snapshot::new(config).unwrap();
        let trigger = Trigger::from_snapshot(&snapshot);
        assert!(trigger.describe().contains(EVERY_MINUTE));

        let now = Utc.with_ymd_and_hms(2024, 5, 2, 10, 3, 20).unwrap();
        let upcoming = trigger.upcoming(now, 3);
        assert_eq!(upcoming.len(), 3);
        assert_eq!(upcoming[0], Utc.with_ymd_and_hms(2024, 5, 2, 10, 4, 0).unwrap());
        assert_eq!(upcoming[2], Utc.with_ymd_and_hms(2024, 5, 2, 10, 6, 0).unwrap());
    }
}
