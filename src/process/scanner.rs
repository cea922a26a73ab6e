//! Process discovery by polling /proc.
//!
//! The scanner keeps the pid set of the previous pass and reports the
//! difference as lifecycle events: new pids, vanished pids, and processes
//! that were stopped or continued since the last pass.

use ahash::AHashMap as HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::procfs::read_stat;

/// A process lifecycle change observed between two scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Exec(u32),
    Exit(u32),
    /// The process was stopped or continued.
    StateChange(u32),
}

/// Lists the numeric entries of a procfs root.
pub fn collect_pids(root: &Path) -> Vec<u32> {
    let mut out = Vec::new();
    if let Ok(entries) = fs::read_dir(root) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = match name.to_str() {
                Some(v) => v,
                None => continue,
            };
            if !name.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            if let Ok(pid) = name.parse::<u32>() {
                out.push(pid);
            }
        }
    }
    out.sort_unstable();
    out
}

fn is_stopped(state: char) -> bool {
    matches!(state, 'T' | 't')
}

/// Diffing /proc poller.
#[derive(Debug)]
pub struct ProcScanner {
    root: PathBuf,
    /// pid -> stopped flag from the last pass.
    known: HashMap<u32, bool>,
}

impl ProcScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            known: HashMap::new(),
        }
    }

    /// Runs one pass. The first pass reports every live process as `Exec`.
    pub fn scan(&mut self) -> Vec<Lifecycle> {
        let mut events = Vec::new();
        let mut seen = HashMap::with_capacity(self.known.len());

        for pid in collect_pids(&self.root) {
            let Some(stat) = read_stat(&self.root, pid) else {
                continue;
            };
            let stopped = is_stopped(stat.state);
            match self.known.get(&pid) {
                None => events.push(Lifecycle::Exec(pid)),
                Some(&was) if was != stopped => events.push(Lifecycle::StateChange(pid)),
                Some(_) => {}
            }
            seen.insert(pid, stopped);
        }

        let mut gone: Vec<u32> = self
            .known
            .keys()
            .filter(|pid| !seen.contains_key(*pid))
            .copied()
            .collect();
        gone.sort_unstable();
        events.extend(gone.into_iter().map(Lifecycle::Exit));

        self.known = seen;
        events
    }

    /// Forgets a pid so the next pass reports it as new if it is still there.
    pub fn forget(&mut self, pid: u32) {
        self.known.remove(&pid);
    }

    pub fn known(&self) -> usize {
        self.known.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spawn(root: &Path, pid: u32, state: char) {
        let dir = root.join(pid.to_string());
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("stat"),
            format!("{pid} (p{pid}) {state} 1 0 0 0 -1 4194560 0"),
        )
        .unwrap();
    }

    #[test]
    fn test_collect_pids_skips_non_numeric() {
        let tmp = TempDir::new().unwrap();
        spawn(tmp.path(), 12, 'S');
        spawn(tmp.path(), 3, 'S');
        fs::create_dir_all(tmp.path().join("self")).unwrap();
        fs::write(tmp.path().join("stat"), "cpu 0").unwrap();
        assert_eq!(collect_pids(tmp.path()), vec![3, 12]);
    }

    #[test]
    fn test_scan_reports_exec_exit_and_state_change() {
        let tmp = TempDir::new().unwrap();
        spawn(tmp.path(), 10, 'S');
        spawn(tmp.path(), 11, 'R');

        let mut scanner = ProcScanner::new(tmp.path());
        assert_eq!(
            scanner.scan(),
            vec![Lifecycle::Exec(10), Lifecycle::Exec(11)]
        );
        assert!(scanner.scan().is_empty());

        spawn(tmp.path(), 11, 'T');
        fs::remove_dir_all(tmp.path().join("10")).unwrap();
        spawn(tmp.path(), 12, 'S');
        assert_eq!(
            scanner.scan(),
            vec![
                Lifecycle::StateChange(11),
                Lifecycle::Exec(12),
                Lifecycle::Exit(10)
            ]
        );
        assert_eq!(scanner.known(), 2);
    }
}
