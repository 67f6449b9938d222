//! # JSON Configuration Store
//!
//! The forwarding policy lives in a JSON file that operators may edit while
//! the process runs. Every snapshot re-reads the file; a file that fails to
//! parse or validate is ignored in favour of the last good snapshot.
//!
//! Watermark writes touch only `last_forwarded_id` and go through a temp file
//! plus rename, so a crash never leaves a half-written store behind.

use crate::domain::config::{ForwardingConfig, Snapshot};
use crate::domain::error::{RelayError, Result};
use crate::domain::traits::ConfigStore;
use crate::domain::types::MessageId;
use crate::strings::logs;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

const WATERMARK_KEY: &str = "last_forwarded_id";

pub struct JsonConfigStore {
    path: PathBuf,
    last_good: Mutex<Option<Snapshot>>,
    write_lock: Mutex<()>,
}

impl JsonConfigStore {
    /// Open the store at `path`, writing defaults if the file does not exist yet.
    /// Fails if the existing file is invalid.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let defaults = serde_json::to_value(ForwardingConfig::default())?;
            write_atomic(&path, &defaults)?;
            tracing::warn!("{}", logs::config_created(&path.display().to_string()));
        }

        let store = Self {
            path,
            last_good: Mutex::new(None),
            write_lock: Mutex::new(()),
        };
        let initial = store.load()?;
        *store.last_good.lock().unwrap_or_else(PoisonError::into_inner) = Some(initial);
        tracing::info!("{}", logs::config_loaded(&store.path.display().to_string()));
        Ok(store)
    }

    fn load(&self) -> Result<Snapshot> {
        let content = fs::read_to_string(&self.path)?;
        let config: ForwardingConfig = serde_json::from_str(&content)?;
        Snapshot::new(config)
    }

    fn read_raw(&self) -> Result<serde_json::Map<String, Value>> {
        let content = fs::read_to_string(&self.path)?;
        match serde_json::from_str(&content)? {
            Value::Object(map) => Ok(map),
            _ => Err(RelayError::Config(format!(
                "{} must contain a JSON object",
                self.path.display()
            ))),
        }
    }
}

impl ConfigStore for JsonConfigStore {
    fn snapshot(&self) -> Result<Snapshot> {
        let mut last_good = self.last_good.lock().unwrap_or_else(PoisonError::into_inner);
        match self.load() {
            Ok(snapshot) => {
                *last_good = Some(snapshot.clone());
                Ok(snapshot)
            }
            Err(e) => match last_good.as_ref() {
                Some(snapshot) => {
                    tracing::warn!(
                        "{}",
                        logs::config_reload_failed(&self.path.display().to_string(), &e.to_string())
                    );
                    Ok(snapshot.clone())
                }
                None => Err(e),
            },
        }
    }

    fn watermark(&self) -> Result<MessageId> {
        Ok(self.snapshot()?.config.last_forwarded_id)
    }

    fn set_watermark(&self, id: MessageId) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut raw = self.read_raw()?;
        let current = raw.get(WATERMARK_KEY).and_then(Value::as_u64).unwrap_or(0);
        if id <= current {
            return Ok(());
        }
        raw.insert(WATERMARK_KEY.to_string(), Value::from(id));
        write_atomic(&self.path, &Value::Object(raw))?;

        if let Some(snapshot) = self
            .last_good
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            snapshot.config.last_forwarded_id = id;
        }
        Ok(())
    }
}

fn write_atomic(path: &Path, value: &Value) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
