//! # Infrastructure Layer
//!
//! Handles interactions with external systems and services.
//! Implements the traits defined in the Domain layer (`FeedGateway`, `ConfigStore`).

pub mod logging;
pub mod matrix;
pub mod store;
