//! # Application Layer
//!
//! The forwarding logic itself: when to forward, what to forward, and how to
//! fan a message set out across destinations. Talks to the outside world only
//! through the domain traits.

pub mod admission;
pub mod cursor;
pub mod delivery;
pub mod engine;
pub mod resolver;
pub mod scheduler;
pub mod shutdown;
pub mod watermark;

#[cfg(test)]
pub mod testing;
