//! # Interface Layer
//!
//! Command line parsing and console output.

pub mod cli;
pub mod report;
