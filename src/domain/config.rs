//! # Configuration
//!
//! Two layers of settings:
//! - `AppConfig`: static process settings from `data/config.yaml` (credentials, logging, store path).
//! - `ForwardingConfig`: the forwarding policy, persisted as JSON and editable while running.
//!
//! The engine never reads `ForwardingConfig` directly; it takes a validated `Snapshot` per cycle.

use crate::domain::error::{RelayError, Result};
use crate::domain::types::{DeliveryOrder, MessageId, Mode};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration structure.
/// Matches the layout of `data/config.yaml`.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub services: ServicesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Configuration for the connected messaging backend.
#[derive(Debug, Deserialize, Clone)]
pub struct ServicesConfig {
    pub matrix: MatrixConfig,
}

/// Specific configuration for the Matrix service.
#[derive(Debug, Deserialize, Clone)]
pub struct MatrixConfig {
    pub homeserver: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_env: Option<String>, // e.g. "RELAY_MATRIX_PASSWORD"
    #[serde(default)]
    pub device_name: Option<String>,
}

impl MatrixConfig {
    /// Password from the config file, falling back to the named environment variable.
    pub fn resolve_password(&self) -> Result<String> {
        if let Some(password) = &self.password {
            return Ok(password.clone());
        }
        if let Some(var) = &self.password_env {
            return std::env::var(var)
                .map_err(|_| RelayError::Config(format!("environment variable {var} is not set")));
        }
        Err(RelayError::Config(
            "services.matrix needs either password or password_env".to_string(),
        ))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub directory: String,
    #[serde(default = "default_log_prefix")]
    pub file_prefix: String,
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_log_dir(),
            file_prefix: default_log_prefix(),
            max_files: default_max_log_files(),
            filter: None,
        }
    }
}

fn default_log_dir() -> String {
    "data".to_string()
}
fn default_log_prefix() -> String {
    "relay".to_string()
}
fn default_max_log_files() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "data/forwarding.json".to_string()
}

/// Persisted forwarding policy. Field aliases accept the older key names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardingConfig {
    #[serde(default = "default_source", alias = "source_channel")]
    pub source: String,
    #[serde(default, alias = "supergroups", alias = "target_groups")]
    pub destinations: Vec<String>,
    /// Ignore `destinations` and forward to every group the account owns.
    #[serde(default)]
    pub forward_to_all: bool,
    #[serde(default = "default_mode", alias = "forward_mode")]
    pub mode: Mode,
    #[serde(default = "default_order", alias = "forward_order")]
    pub order: DeliveryOrder,
    #[serde(default = "default_true", alias = "time_interval_enabled")]
    pub time_window_enabled: bool,
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Delay between two consecutive sends.
    #[serde(default = "default_send_delay")]
    pub send_delay_secs: u64,
    /// Idle interval between loop iterations and admission re-checks.
    #[serde(default = "default_pacing", alias = "sleep_between_messages")]
    pub pacing_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Cooldown used when the backend rate-limits without saying for how long.
    #[serde(default = "default_cooldown")]
    pub rate_limit_cooldown_secs: u64,
    #[serde(default = "default_cron", alias = "cron")]
    pub cron_schedule: Option<String>,
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub last_forwarded_id: MessageId,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            destinations: Vec::new(),
            forward_to_all: false,
            mode: default_mode(),
            order: default_order(),
            time_window_enabled: true,
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
            timezone: default_timezone(),
            send_delay_secs: default_send_delay(),
            pacing_secs: default_pacing(),
            page_size: default_page_size(),
            rate_limit_cooldown_secs: default_cooldown(),
            cron_schedule: default_cron(),
            interval_secs: None,
            last_forwarded_id: 0,
        }
    }
}

fn default_source() -> String {
    "#source:localhost".to_string()
}
fn default_mode() -> Mode {
    Mode::Incremental
}
fn default_order() -> DeliveryOrder {
    DeliveryOrder::Sequential
}
fn default_true() -> bool {
    true
}
fn default_start_hour() -> u32 {
    8
}
fn default_end_hour() -> u32 {
    22
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_send_delay() -> u64 {
    1
}
fn default_pacing() -> u64 {
    60
}
fn default_page_size() -> usize {
    100
}
fn default_cooldown() -> u64 {
    30
}
fn default_cron() -> Option<String> {
    Some("* * * * *".to_string())
}

/// Hours during which forwarding is allowed, `[start_hour, end_hour)` in local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub enabled: bool,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl TimeWindow {
    pub fn always() -> Self {
        Self {
            enabled: false,
            start_hour: 0,
            end_hour: 24,
        }
    }

    pub fn hours(start_hour: u32, end_hour: u32) -> Self {
        Self {
            enabled: true,
            start_hour,
            end_hour,
        }
    }
}

impl ForwardingConfig {
    pub fn window(&self) -> TimeWindow {
        if self.time_window_enabled {
            TimeWindow::hours(self.start_hour, self.end_hour)
        } else {
            TimeWindow::always()
        }
    }

    /// Checks the invariants and parses the time zone.
    pub fn validate(&self) -> Result<Tz> {
        if self.time_window_enabled && !(self.start_hour < self.end_hour && self.end_hour <= 24) {
            return Err(RelayError::Config(format!(
                "time window must satisfy 0 <= start < end <= 24, got {}-{}",
                self.start_hour, self.end_hour
            )));
        }
        if self.page_size == 0 {
            return Err(RelayError::Config("page_size must be positive".to_string()));
        }
        if self.source.trim().is_empty() {
            return Err(RelayError::Config("source must not be empty".to_string()));
        }
        self.timezone
            .parse::<Tz>()
            .map_err(|_| RelayError::Config(format!("'{}' is not a valid IANA timezone", self.timezone)))
    }
}

/// Immutable, validated view of the forwarding policy for one cycle.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub config: ForwardingConfig,
    pub timezone: Tz,
}

impl Snapshot {
    pub fn new(config: ForwardingConfig) -> Result<Self> {
        let timezone = config.validate()?;
        Ok(Self { config, timezone })
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    pub fn window(&self) -> TimeWindow {
        self.config.window()
    }

    pub fn now_local(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.timezone)
    }

    pub fn today(&self) -> NaiveDate {
        self.now_local().date_naive()
    }

    pub fn send_delay(&self) -> Duration {
        Duration::from_secs(self.config.send_delay_secs)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_secs(self.config.pacing_secs)
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.config.rate_limit_cooldown_secs)
    }
}

/// Instant of local midnight for the day `now` falls in.
pub fn start_of_day<Z: TimeZone>(now: &DateTime<Z>) -> DateTime<Utc> {
    let tz = now.timezone();
    let midnight = now.date_naive().and_time(chrono::NaiveTime::MIN);
    // Zones that skip midnight on DST changes start the day at the earliest valid instant.
    tz.from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| {
            let elapsed = now.time() - chrono::NaiveTime::MIN;
            now.with_timezone(&Utc) - elapsed
        })
}
