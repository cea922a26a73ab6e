//! Table of processes the classifier has seen.

use ahash::AHashMap as HashMap;
use serde::Serialize;

/// A classified (or deliberately ignored) process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Process {
    pub pid: u32,
    /// Binary path cached from the snapshot that created the entry.
    pub binary: String,
    /// Current group, if any.
    pub group: Option<String>,
    /// Set by the `ignore` command; lifecycle events for the pid are skipped.
    pub ignored: bool,
}

impl Process {
    pub fn new(pid: u32, binary: impl Into<String>) -> Self {
        Self {
            pid,
            binary: binary.into(),
            group: None,
            ignored: false,
        }
    }
}

/// Pid-keyed process registry.
#[derive(Debug, Default)]
pub struct ProcessTable {
    procs: HashMap<u32, Process>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a process, replacing any stale entry for the same pid.
    pub fn insert(&mut self, process: Process) -> Option<Process> {
        self.procs.insert(process.pid, process)
    }

    pub fn get(&self, pid: u32) -> Option<&Process> {
        self.procs.get(&pid)
    }

    pub fn get_mut(&mut self, pid: u32) -> Option<&mut Process> {
        self.procs.get_mut(&pid)
    }

    /// Returns the entry for `pid`, creating one with `binary` if absent.
    pub fn entry(&mut self, pid: u32, binary: &str) -> &mut Process {
        self.procs
            .entry(pid)
            .or_insert_with(|| Process::new(pid, binary))
    }

    pub fn remove(&mut self, pid: u32) -> Option<Process> {
        self.procs.remove(&pid)
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.procs.contains_key(&pid)
    }

    pub fn is_ignored(&self, pid: u32) -> bool {
        self.procs.get(&pid).is_some_and(|p| p.ignored)
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    pub fn pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.procs.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.procs.values()
    }
}
