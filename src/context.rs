//! The daemon context: every registry plus global options.
//!
//! A context is built in one piece from a validated configuration and
//! replaced in one piece on reload. All mutation happens on the dispatch
//! thread.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Error, LookupError, Result};
use crate::group::{Group, GroupTable};
use crate::partition::{Controllers, PartitionTable};
use crate::process::{ProcessTable, DEFAULT_PROC_ROOT};
use crate::rules::RuleTable;
use crate::sysmon::{IoWaitConfig, SwapConfig};

pub const DEFAULT_MOUNT: &str = "/syspart";
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(2);

/// Global options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub mount: PathBuf,
    pub controllers: Controllers,
    pub mount_if_missing: bool,
    pub export_groups: bool,
    pub export_partitions: bool,
    pub proc_root: PathBuf,
    /// Period of the /proc scan feeding lifecycle events. Zero disables it.
    pub scan_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mount: PathBuf::from(DEFAULT_MOUNT),
            controllers: Controllers::default(),
            mount_if_missing: false,
            export_groups: false,
            export_partitions: false,
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
            scan_interval: DEFAULT_SCAN_INTERVAL,
        }
    }
}

/// Foreground state reported for a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Active,
    Standby,
}

#[derive(Debug)]
pub struct Context {
    pub options: Options,
    pub partitions: PartitionTable,
    pub groups: GroupTable,
    pub rules: RuleTable,
    pub processes: ProcessTable,
    pub iowait: Option<IoWaitConfig>,
    pub swap: Option<SwapConfig>,
    active_process: Option<u32>,
    active_group: Option<String>,
}

impl Context {
    /// Creates an empty context around an opened partition table.
    pub fn new(options: Options, partitions: PartitionTable) -> Self {
        Self {
            options,
            partitions,
            groups: GroupTable::new(),
            rules: RuleTable::new(),
            processes: ProcessTable::new(),
            iowait: None,
            swap: None,
            active_process: None,
            active_group: None,
        }
    }

    /// Drops every trace of `pid`. Idempotent.
    pub fn remove_process(&mut self, pid: u32) -> Option<String> {
        let old = self.groups.del_process(&mut self.processes, pid);
        self.processes.remove(pid);
        self.groups.purge_pid(pid);
        if self.active_process == Some(pid) {
            self.active_process = None;
            self.active_group = None;
        }
        old
    }

    /// Re-homes a group and all of its members onto `partition`.
    /// Returns the number of tasks written.
    pub fn move_group(&mut self, group: &str, partition: &str) -> Result<usize> {
        let current = self
            .groups
            .lookup(group)
            .ok_or_else(|| LookupError::Group(group.to_string()))?;
        if current.flags.static_partition {
            return Err(Error::StaticGroup(group.to_string()));
        }
        if self.partitions.lookup(partition).is_none() {
            return Err(LookupError::Partition(partition.to_string()).into());
        }
        if current.partition == partition {
            return Ok(0);
        }

        let result = self.partitions.add_group(partition, current, true);
        let Some(entry) = self.groups.lookup_mut(group) else {
            return result;
        };
        match result {
            Ok(moved) => {
                info!(
                    "Group '{}' moved from '{}' to '{}'",
                    group, entry.partition, partition
                );
                entry.partition = partition.to_string();
                entry.flags.reassign_failed = false;
                Ok(moved)
            }
            Err(e) => {
                warn!("Moving group '{}' to '{}' failed: {}", group, partition, e);
                entry.flags.reassign_failed = true;
                Err(e)
            }
        }
    }

    /// Records a foreground state change for a classified process.
    pub fn update_state(&mut self, pid: u32, state: ProcessState) -> Result<(), LookupError> {
        let process = self.processes.get(pid).ok_or(LookupError::Process(pid))?;
        match state {
            ProcessState::Active => {
                self.active_process = Some(pid);
                self.active_group = process.group.clone();
            }
            ProcessState::Standby => {
                if self.active_process == Some(pid) {
                    self.active_process = None;
                    self.active_group = None;
                }
            }
        }
        Ok(())
    }

    pub fn active_process(&self) -> Option<u32> {
        self.active_process
    }

    pub fn active_group(&self) -> Option<&Group> {
        self.active_group
            .as_deref()
            .and_then(|name| self.groups.lookup(name))
    }

    /// Releases partition state before the context is dropped.
    pub fn teardown(&mut self) {
        self.partitions.thaw_all();
        self.active_process = None;
        self.active_group = None;
    }

    /// Combined listing of partitions, groups and rules.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# partitions ({})", self.partitions.len());
        out.push_str(&self.partitions.dump());
        let _ = writeln!(out, "# groups ({})", self.groups.len());
        out.push_str(&self.groups.dump());
        let _ = writeln!(out, "# rules ({})", self.rules.len());
        for procdef in self.rules.sorted() {
            let _ = writeln!(out, "{procdef}");
        }
        if let Some(fallback) = self.rules.fallback() {
            let _ = writeln!(out, "{fallback}");
        }
        out
    }
}
