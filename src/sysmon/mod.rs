//! System pressure monitors.
//!
//! This module provides:
//! - `window`: fixed-size sliding window with running total
//! - `ewma`: exponentially weighted moving average
//! - `stat`: /proc/stat and /proc/meminfo counters behind `StatSource`
//! - `iowait`: windowed I/O-wait monitor
//! - `swap`: EWMA-smoothed swap monitor with repeat throttling
//!
//! Monitors are plain state machines; the daemon drives them from its
//! periodic timers and forwards transitions to the notifier.

pub mod ewma;
pub mod iowait;
pub mod stat;
pub mod swap;
pub mod window;

use serde::Serialize;
use std::fmt;

pub use ewma::Ewma;
pub use iowait::{IoWaitConfig, IoWaitMonitor};
pub use stat::{CpuTimes, ProcStatSource, StatSource, SwapInfo};
pub use swap::{SwapConfig, SwapMonitor};
pub use window::SlidingWindow;

/// Edge produced by a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Alert,
    Clear,
}

/// Which monitor produced a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureKind {
    IoWait,
    Swap,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transition::Alert => "alert",
            Transition::Clear => "clear",
        })
    }
}

impl fmt::Display for PressureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PressureKind::IoWait => "iowait",
            PressureKind::Swap => "swap",
        })
    }
}
