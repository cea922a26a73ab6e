//! Attribute extraction from the /proc filesystem.
//!
//! Reads `stat`, `exe`, `cmdline` and `status` of a process (and `exe` of
//! its parent) into a [`ProcAttr`] snapshot. Each file is read on its own so
//! a single unreadable entry only leaves the matching fields unresolved.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

use super::attributes::{AttributeSource, ProcAttr, ProcessType};
use crate::rules::MAX_ARGS;

/// Default procfs mount point.
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Task flag marking kernel threads (`PF_KTHREAD`).
const PF_KTHREAD: u64 = 0x0020_0000;

/// Fields of `/proc/<pid>/stat` the classifier cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatInfo {
    pub state: char,
    pub ppid: u32,
    pub flags: u64,
}

/// Parses the contents of a `stat` file. The command name may contain spaces
/// and parentheses, so fields are counted from the last `)`.
pub fn parse_stat(content: &str) -> Option<StatInfo> {
    let rest = &content[content.rfind(')')? + 1..];
    let parts: Vec<&str> = rest.split_whitespace().collect();
    if parts.len() < 7 {
        return None;
    }
    Some(StatInfo {
        state: parts[0].chars().next()?,
        ppid: parts[1].parse().ok()?,
        flags: parts[6].parse().ok()?,
    })
}

/// Reads and parses `/proc/<pid>/stat`.
pub fn read_stat(root: &Path, pid: u32) -> Option<StatInfo> {
    let content = fs::read_to_string(root.join(pid.to_string()).join("stat")).ok()?;
    parse_stat(&content)
}

/// Resolves the `exe` link of a process, dropping the ` (deleted)` marker
/// the kernel appends for replaced binaries.
pub fn read_binary(root: &Path, pid: u32) -> Option<String> {
    let target = fs::read_link(root.join(pid.to_string()).join("exe")).ok()?;
    let path = target.to_str()?;
    let path = path.strip_suffix(" (deleted)").unwrap_or(path);
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

/// Splits a NUL separated command line into at most `MAX_ARGS` arguments.
/// Empty arguments keep their slot; only the final terminator is dropped.
pub fn parse_cmdline(content: &[u8]) -> Vec<String> {
    let body = content.strip_suffix(&[0u8]).unwrap_or(content);
    if body.is_empty() {
        return Vec::new();
    }
    body.split(|&b| b == 0u8)
        .take(MAX_ARGS)
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

/// Extracts the effective id (second column) of a `Uid:`/`Gid:` line.
fn status_effective_id(status: &str, key: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix(key))
        .and_then(|rest| rest.split_whitespace().nth(1))
        .and_then(|v| v.parse().ok())
}

/// Lists the thread ids of a process from `/proc/<pid>/task`.
pub fn list_threads(root: &Path, pid: u32) -> Vec<u32> {
    let mut tids: Vec<u32> = match fs::read_dir(root.join(pid.to_string()).join("task")) {
        Ok(entries) => entries
            .flatten()
            .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse().ok()))
            .collect(),
        Err(_) => Vec::new(),
    };
    tids.sort_unstable();
    tids
}

/// Snapshot source backed by a procfs tree.
#[derive(Debug, Clone)]
pub struct ProcfsSource {
    root: PathBuf,
}

impl ProcfsSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Default for ProcfsSource {
    fn default() -> Self {
        Self::new(DEFAULT_PROC_ROOT)
    }
}

impl AttributeSource for ProcfsSource {
    fn snapshot(&self, pid: u32, reclassify: u32) -> Option<ProcAttr> {
        let dir = self.root.join(pid.to_string());
        // Without a readable stat the process is treated as gone.
        let stat = read_stat(&self.root, pid)?;

        let mut attr = ProcAttr::new(pid);
        attr.reclassify = reclassify;
        attr.ppid = Some(stat.ppid);
        attr.binary = read_binary(&self.root, pid);

        if let Ok(content) = fs::read(dir.join("cmdline")) {
            let argv = parse_cmdline(&content);
            if !argv.is_empty() {
                attr.cmdline = Some(argv.join(" "));
                attr.argv = Some(argv);
            }
        }

        attr.kind = if stat.flags & PF_KTHREAD != 0 {
            ProcessType::Kernel
        } else if attr.argv.is_some() || attr.binary.is_some() {
            ProcessType::User
        } else {
            ProcessType::Unknown
        };

        if let Ok(status) = fs::read_to_string(dir.join("status")) {
            attr.euid = status_effective_id(&status, "Uid:");
            attr.egid = status_effective_id(&status, "Gid:");
        }

        if stat.ppid != 0 {
            attr.parent = read_binary(&self.root, stat.ppid);
        }

        trace!(
            "Snapshot of pid {}: binary={:?} argc={} euid={:?}",
            pid,
            attr.binary,
            attr.argc(),
            attr.euid
        );
        Some(attr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn write_proc(root: &Path, pid: u32, stat: &str, exe: Option<&str>, cmdline: &[u8]) {
        let dir = root.join(pid.to_string());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("stat"), stat).unwrap();
        fs::write(dir.join("cmdline"), cmdline).unwrap();
        fs::write(
            dir.join("status"),
            "Name:\tplayer\nUid:\t1000\t0\t0\t0\nGid:\t100\t5\t5\t5\n",
        )
        .unwrap();
        if let Some(exe) = exe {
            symlink(exe, dir.join("exe")).unwrap();
        }
    }

    // -------------------------------------------------------------------------
    // Parsers
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_stat_with_spaces_in_comm() {
        let info = parse_stat("42 (my (odd) proc) S 7 42 42 0 -1 4194560 0 0").unwrap();
        assert_eq!(info.state, 'S');
        assert_eq!(info.ppid, 7);
        assert_eq!(info.flags, 4194560);
    }

    #[test]
    fn test_parse_stat_rejects_truncated() {
        assert!(parse_stat("42 (x) S 1").is_none());
        assert!(parse_stat("garbage").is_none());
    }

    #[test]
    fn test_parse_cmdline() {
        let argv = parse_cmdline(b"/usr/bin/player\0--fullscreen\0");
        assert_eq!(argv, vec!["/usr/bin/player", "--fullscreen"]);
        assert!(parse_cmdline(b"").is_empty());
        assert!(parse_cmdline(b"\0").is_empty());

        let long: Vec<u8> = (0..40).flat_map(|i| format!("a{i}\0").into_bytes()).collect();
        assert_eq!(parse_cmdline(&long).len(), MAX_ARGS);
    }

    #[test]
    fn test_parse_cmdline_keeps_empty_arguments() {
        let argv = parse_cmdline(b"prog\0\0x\0");
        assert_eq!(argv, vec!["prog", "", "x"]);

        let unterminated = parse_cmdline(b"prog\0\0x");
        assert_eq!(unterminated, vec!["prog", "", "x"]);
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    #[test]
    fn test_snapshot_user_process() {
        let tmp = TempDir::new().unwrap();
        write_proc(
            tmp.path(),
            1,
            "1 (init) S 0 1 1 0 -1 4194560 0",
            Some("/sbin/init"),
            b"/sbin/init\0",
        );
        write_proc(
            tmp.path(),
            100,
            "100 (player) S 1 100 100 0 -1 4194560 0",
            Some("/usr/bin/player (deleted)"),
            b"player\0--fullscreen\0",
        );

        let src = ProcfsSource::new(tmp.path());
        let attr = src.snapshot(100, 2).unwrap();
        assert_eq!(attr.ppid, Some(1));
        assert_eq!(attr.binary.as_deref(), Some("/usr/bin/player"));
        assert_eq!(attr.kind, ProcessType::User);
        assert_eq!(attr.cmdline.as_deref(), Some("player --fullscreen"));
        assert_eq!(attr.argc(), 2);
        assert_eq!(attr.euid, Some(0));
        assert_eq!(attr.egid, Some(5));
        assert_eq!(attr.parent.as_deref(), Some("/sbin/init"));
        assert_eq!(attr.reclassify, 2);
    }

    #[test]
    fn test_snapshot_kernel_thread() {
        let tmp = TempDir::new().unwrap();
        write_proc(tmp.path(), 9, "9 (kworker/0:1) I 2 0 0 0 -1 69238880 0", None, b"");

        let attr = ProcfsSource::new(tmp.path()).snapshot(9, 0).unwrap();
        assert_eq!(attr.kind, ProcessType::Kernel);
        assert!(attr.binary.is_none());
        assert!(attr.argv.is_none());
        assert!(attr.parent.is_none());
    }

    #[test]
    fn test_snapshot_missing_process() {
        let tmp = TempDir::new().unwrap();
        assert!(ProcfsSource::new(tmp.path()).snapshot(4242, 0).is_none());
    }

    #[test]
    fn test_list_threads() {
        let tmp = TempDir::new().unwrap();
        for tid in [12, 10, 11] {
            fs::create_dir_all(tmp.path().join("10/task").join(tid.to_string())).unwrap();
        }
        assert_eq!(list_threads(tmp.path(), 10), vec![10, 11, 12]);
        assert!(list_threads(tmp.path(), 99).is_empty());
    }
}
