//! CLI command implementations for syspart.
//!
//! This module provides implementations for the one-shot subcommands:
//! - `check`: System and configuration validation
//! - `dump`: Listing of partitions, groups and rules
//! - `classify`: Dry-run rule evaluation for one process
//! - `config`: Sample configuration output

pub mod check;
pub mod classify;
pub mod config;
pub mod dump;

// Re-export command functions
pub use check::command_check;
pub use classify::command_classify;
pub use config::command_config;
pub use dump::command_dump;
