//! # Delivery Cursor
//!
//! Round-robin position over the current message set, used by continuous mode.
//! A sweep is one full pass through the set; after a completed sweep the owner
//! re-resolves the set so newly published messages are picked up.

use crate::domain::types::Message;
use chrono::NaiveDate;

/// Yields the item at `position` together with the position that follows it.
///
/// Returns `None` for an empty set. `position` is taken modulo the set length.
pub fn next<T>(set: &[T], position: usize) -> Option<(usize, &T)> {
    if set.is_empty() {
        return None;
    }
    let current = position % set.len();
    Some(((current + 1) % set.len(), &set[current]))
}

/// Bounded iterator over one full cycle of a set, starting at a given position.
pub struct Sweep<'a, T> {
    set: &'a [T],
    position: usize,
    remaining: usize,
}

impl<'a, T> Sweep<'a, T> {
    pub fn new(set: &'a [T], position: usize) -> Self {
        Self {
            set,
            position,
            remaining: set.len(),
        }
    }
}

impl<'a, T> Iterator for Sweep<'a, T> {
    type Item = (usize, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let visited = self.position % self.set.len();
        let (following, item) = next(self.set, self.position)?;
        self.position = following;
        self.remaining -= 1;
        Some((visited, item))
    }
}

/// In-memory cursor over the day's resolved messages. Lost on restart.
#[derive(Debug, Default)]
pub struct DeliveryCursor {
    messages: Vec<Message>,
    position: usize,
    /// Steps taken since the set was loaded.
    visited: usize,
    loaded_for: Option<NaiveDate>,
}

impl DeliveryCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a freshly resolved set and rewind to the start.
    pub fn replace(&mut self, messages: Vec<Message>, day: NaiveDate) {
        self.messages = messages;
        self.position = 0;
        self.visited = 0;
        self.loaded_for = Some(day);
    }

    /// A refresh is due on a new calendar day, for an empty set, or after a full sweep.
    pub fn needs_refresh(&self, today: NaiveDate) -> bool {
        self.loaded_for != Some(today) || self.messages.is_empty() || self.sweep_complete()
    }

    pub fn sweep_complete(&self) -> bool {
        !self.messages.is_empty() && self.visited >= self.messages.len()
    }

    /// Mark the current sweep as done without stepping through it.
    pub fn finish_sweep(&mut self) {
        self.visited = self.messages.len();
        self.position = 0;
    }

    /// Take one step of the current sweep. `None` when the set is empty or the sweep is done.
    pub fn step(&mut self) -> Option<(usize, &Message)> {
        if self.sweep_complete() {
            return None;
        }
        let visited = self.position;
        let (following, _) = next(&self.messages, self.position)?;
        self.position = following;
        self.visited += 1;
        Some((visited, &self.messages[visited]))
    }

    /// Remaining steps of the current sweep, without advancing.
    pub fn sweep(&self) -> Sweep<'_, Message> {
        let mut sweep = Sweep::new(&self.messages, self.position);
        sweep.remaining = self.messages.len().saturating_sub(self.visited);
        sweep
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
