//! # Strings Module
//!
//! Centralizes log lines and console output so wording stays consistent.

pub mod logs;
pub mod messages;
