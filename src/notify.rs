//! Notification collaborator.
//!
//! Group membership changes and pressure transitions are handed to a
//! [`Notifier`]. Delivery is fire-and-forget; implementations log their own
//! failures.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::sysmon::{PressureKind, Transition};

/// A process moved between groups. `None` means no group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupChange {
    pub pid: u32,
    pub binary: String,
    pub old_group: Option<String>,
    pub new_group: Option<String>,
    /// Partition of the new group.
    pub partition: Option<String>,
    /// Either group is exported.
    pub exported: bool,
    pub timestamp: DateTime<Utc>,
}

impl GroupChange {
    pub fn new(
        pid: u32,
        binary: impl Into<String>,
        old_group: Option<String>,
        new_group: Option<String>,
    ) -> Self {
        Self {
            pid,
            binary: binary.into(),
            old_group,
            new_group,
            partition: None,
            exported: false,
            timestamp: Utc::now(),
        }
    }
}

/// A monitor crossed a threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PressureEvent {
    pub kind: PressureKind,
    pub transition: Transition,
    pub hook: String,
    pub timestamp: DateTime<Utc>,
}

impl PressureEvent {
    pub fn new(kind: PressureKind, transition: Transition, hook: impl Into<String>) -> Self {
        Self {
            kind,
            transition,
            hook: hook.into(),
            timestamp: Utc::now(),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn group_changed(&self, change: &GroupChange);
    fn pressure(&self, event: &PressureEvent);
}

/// Emits events as JSON payloads on the `syspart::notify` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn group_changed(&self, change: &GroupChange) {
        match serde_json::to_string(change) {
            Ok(payload) if change.exported => {
                info!(target: "syspart::notify", event = "group_changed", %payload)
            }
            Ok(payload) => debug!(target: "syspart::notify", event = "group_changed", %payload),
            Err(e) => warn!("Failed to serialize group change for pid {}: {}", change.pid, e),
        }
    }

    fn pressure(&self, event: &PressureEvent) {
        match serde_json::to_string(event) {
            Ok(payload) => info!(target: "syspart::notify", event = "pressure", %payload),
            Err(e) => warn!("Failed to serialize {} {} event: {}", event.kind, event.transition, e),
        }
    }
}
