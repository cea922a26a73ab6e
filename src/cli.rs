//! CLI arguments and subcommands for syspart.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use syspart::ConfigFormat;

/// Log level options for CLI parsing
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "syspart",
    about = "Rule-based process classification into cgroup partitions",
    long_about = "Rule-based process classification into cgroup partitions.\n\n\
                  Watches process lifecycle events, classifies every process into a named \
                  group using per-binary rules and moves it into the cgroup partition of that \
                  group. Optionally raises I/O-wait and swap pressure notifications.",
    version = "0.1.0",
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Override the cgroup mount point
    #[arg(short = 'm', long)]
    pub mount: Option<PathBuf>,

    /// Override the /proc root used for process inspection
    #[arg(long)]
    pub proc_root: Option<PathBuf>,

    /// Print effective config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the classification daemon (default)
    Run,

    /// Validate system requirements and configuration
    Check {
        /// Also verify the cgroup hierarchy can be opened
        #[arg(long)]
        cgroups: bool,
    },

    /// Show partitions, groups and rules of the effective configuration
    Dump,

    /// Evaluate the rules for one process without moving it
    Classify {
        /// Process id to evaluate
        pid: u32,
    },

    /// Print a commented sample configuration
    Config {
        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}
