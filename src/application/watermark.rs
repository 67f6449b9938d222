//! # Watermark Store
//!
//! Narrow read/advance access to the persisted `last_forwarded_id`.

use crate::domain::error::Result;
use crate::domain::traits::ConfigStore;
use crate::domain::types::{Message, MessageId};

pub struct WatermarkStore<'a> {
    store: &'a dyn ConfigStore,
}

impl<'a> WatermarkStore<'a> {
    pub fn new(store: &'a dyn ConfigStore) -> Self {
        Self { store }
    }

    pub fn get(&self) -> Result<MessageId> {
        self.store.watermark()
    }

    /// Advance to the highest id of an attempted set. Lower ids are ignored.
    ///
    /// Returns the id that was persisted, if any.
    pub fn advance_past(&self, attempted: &[Message]) -> Result<Option<MessageId>> {
        let Some(max_id) = attempted.iter().map(Message::id).max() else {
            return Ok(None);
        };
        let current = self.get()?;
        if max_id <= current {
            return Ok(None);
        }
        self.store.set_watermark(max_id)?;
        tracing::info!("Setting last_forwarded_id to {}", max_id);
        Ok(Some(max_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{MemoryStore, quick_config, raw_text};
    use chrono::Utc;

    fn messages(ids: &[u64]) -> Vec<Message> {
        ids.iter()
            .filter_map(|&id| Message::from_raw(raw_text(id, Utc::now(), "m")))
            .collect()
    }

    #[test]
    fn test_advances_to_max_id() {
        let store = MemoryStore::new(quick_config("#s:x", &[]));
        let watermark = WatermarkStore::new(&store);
        assert_eq!(watermark.get().unwrap(), 0);

        assert_eq!(watermark.advance_past(&messages(&[43, 50, 44])).unwrap(), Some(50));
        assert_eq!(watermark.get().unwrap(), 50);
        assert_eq!(store.watermark_writes(), vec![50]);
    }

    #[test]
    fn test_never_moves_backwards() {
        let mut config = quick_config("#s:x", &[]);
        config.last_forwarded_id = 100;
        let store = MemoryStore::new(config);
        let watermark = WatermarkStore::new(&store);

        assert_eq!(watermark.advance_past(&messages(&[7, 9])).unwrap(), None);
        assert_eq!(watermark.get().unwrap(), 100);
        assert!(store.watermark_writes().is_empty());
    }

    #[test]
    fn test_empty_set_is_noop() {
        let store = MemoryStore::new(quick_config("#s:x", &[]));
        let watermark = WatermarkStore::new(&store);
        assert_eq!(watermark.advance_past(&[]).unwrap(), None);
    }
}
