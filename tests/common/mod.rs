//! Shared fixtures for the integration tests: a fake procfs tree, a fake
//! cgroup mount and a notifier that records what it is told.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use syspart::config::{parse_config, ConfigFormat};
use syspart::partition::{CPU_SHARES_FILE, FREEZER_FILE, MEMORY_LIMIT_FILE, TASKS_FILE};
use syspart::sysmon::{CpuTimes, StatSource, SwapInfo};
use syspart::{Config, GroupChange, Notifier, PressureEvent};
use tempfile::TempDir;

/// A process to materialize under the fake /proc.
#[derive(Debug, Clone)]
pub struct FakeProc {
    pub pid: u32,
    pub ppid: u32,
    pub exe: Option<String>,
    pub argv: Vec<String>,
    pub euid: u32,
    pub state: char,
    pub kernel: bool,
}

impl FakeProc {
    pub fn new(pid: u32, exe: &str, euid: u32) -> Self {
        Self {
            pid,
            ppid: 1,
            exe: Some(exe.to_string()),
            argv: vec![exe.to_string()],
            euid,
            state: 'S',
            kernel: false,
        }
    }

    pub fn kernel_thread(pid: u32) -> Self {
        Self {
            pid,
            ppid: 2,
            exe: None,
            argv: Vec::new(),
            euid: 0,
            state: 'S',
            kernel: true,
        }
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.argv.extend(args.iter().map(|a| a.to_string()));
        self
    }

    pub fn parent(mut self, ppid: u32) -> Self {
        self.ppid = ppid;
        self
    }
}

/// Temporary directory holding `proc/` and `cgroup/` trees.
pub struct FakeSystem {
    tmp: TempDir,
}

impl FakeSystem {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("proc")).unwrap();
        fs::create_dir_all(tmp.path().join("cgroup")).unwrap();
        fs::write(tmp.path().join("cgroup").join(TASKS_FILE), "").unwrap();
        let sys = Self { tmp };
        sys.set_cpu(CpuTimes::default());
        sys.set_swap(0, 0);
        sys
    }

    pub fn dir(&self) -> &Path {
        self.tmp.path()
    }

    pub fn proc_root(&self) -> PathBuf {
        self.tmp.path().join("proc")
    }

    pub fn mount(&self) -> PathBuf {
        self.tmp.path().join("cgroup")
    }

    /// Pre-creates the control files the kernel would provide for a
    /// partition directory.
    pub fn partition_dir(&self, name: &str) {
        let dir = self.mount().join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(TASKS_FILE), "").unwrap();
        fs::write(dir.join(FREEZER_FILE), "THAWED\n").unwrap();
        fs::write(dir.join(CPU_SHARES_FILE), "1024\n").unwrap();
        fs::write(dir.join(MEMORY_LIMIT_FILE), "9223372036854771712\n").unwrap();
    }

    /// Task ids written to a partition, `"root"` for the mount point.
    pub fn tasks(&self, partition: &str) -> Vec<u32> {
        let path = if partition == "root" {
            self.mount().join(TASKS_FILE)
        } else {
            self.mount().join(partition).join(TASKS_FILE)
        };
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .filter_map(|l| l.trim().parse().ok())
            .collect()
    }

    pub fn control(&self, partition: &str, file: &str) -> String {
        fs::read_to_string(self.mount().join(partition).join(file))
            .unwrap()
            .lines()
            .next()
            .unwrap_or_default()
            .to_string()
    }

    pub fn spawn(&self, p: &FakeProc) {
        let dir = self.proc_root().join(p.pid.to_string());
        fs::create_dir_all(dir.join("task").join(p.pid.to_string())).unwrap();
        let flags: u64 = if p.kernel { 0x0020_0040 } else { 0x0040_0100 };
        fs::write(
            dir.join("stat"),
            format!(
                "{} (proc) {} {} {} {} 0 -1 {} 0 0 0 0 0 0\n",
                p.pid, p.state, p.ppid, p.pid, p.pid, flags
            ),
        )
        .unwrap();
        let mut cmdline = Vec::new();
        for arg in &p.argv {
            cmdline.extend_from_slice(arg.as_bytes());
            cmdline.push(0);
        }
        fs::write(dir.join("cmdline"), cmdline).unwrap();
        fs::write(
            dir.join("status"),
            format!(
                "Name:\tproc\nUid:\t{0}\t{0}\t{0}\t{0}\nGid:\t{0}\t{0}\t{0}\t{0}\n",
                p.euid
            ),
        )
        .unwrap();
        if let Some(exe) = &p.exe {
            let link = dir.join("exe");
            let _ = fs::remove_file(&link);
            symlink(exe, link).unwrap();
        }
    }

    pub fn kill(&self, pid: u32) {
        fs::remove_dir_all(self.proc_root().join(pid.to_string())).unwrap();
    }

    pub fn set_cpu(&self, t: CpuTimes) {
        fs::write(
            self.proc_root().join("stat"),
            format!(
                "cpu  {} {} {} {} {} {} {} {} 0 0\nctxt 1\n",
                t.user, t.nice, t.system, t.idle, t.iowait, t.irq, t.softirq, t.steal
            ),
        )
        .unwrap();
    }

    pub fn set_swap(&self, total_kb: u64, free_kb: u64) {
        fs::write(
            self.proc_root().join("meminfo"),
            format!("MemTotal: 1000 kB\nSwapTotal: {total_kb} kB\nSwapFree: {free_kb} kB\n"),
        )
        .unwrap();
    }

    /// Parses a YAML configuration after substituting `{mount}` and `{proc}`.
    pub fn config(&self, yaml: &str) -> Config {
        let text = yaml
            .replace("{mount}", &self.mount().display().to_string())
            .replace("{proc}", &self.proc_root().display().to_string());
        parse_config(&text, ConfigFormat::Yaml).unwrap()
    }

    /// Writes a YAML configuration file with the same substitutions.
    pub fn write_config(&self, name: &str, yaml: &str) -> PathBuf {
        let text = yaml
            .replace("{mount}", &self.mount().display().to_string())
            .replace("{proc}", &self.proc_root().display().to_string());
        let path = self.dir().join(name);
        fs::write(&path, text).unwrap();
        path
    }
}

/// Partitions fg/bg, groups active/standby and a rule for the player
/// that sends root-owned instances to the foreground.
pub const PLAYER_CONFIG: &str = r#"
mount: "{mount}"
proc_root: "{proc}"
scan_interval_ms: 0
partitions:
  - name: fg
    cpu_shares: 2048
  - name: bg
    cpu_shares: 256
groups:
  - name: active
    partition: fg
    export: true
  - name: standby
    partition: bg
rules:
  - binary: /usr/bin/player
    statements:
      - when:
          test: { property: euid, value: 0 }
        then:
          group: active
      - then:
          group: standby
fallback:
  - when:
      test: { property: type, value: kernel }
    then: ignore
"#;

/// Notifier that keeps every event for inspection.
#[derive(Default)]
pub struct RecordingNotifier {
    changes: Mutex<Vec<GroupChange>>,
    pressure: Mutex<Vec<PressureEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn changes(&self) -> Vec<GroupChange> {
        self.changes.lock().unwrap().clone()
    }

    pub fn pressure_events(&self) -> Vec<PressureEvent> {
        self.pressure.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn group_changed(&self, change: &GroupChange) {
        self.changes.lock().unwrap().push(change.clone());
    }

    fn pressure(&self, event: &PressureEvent) {
        self.pressure.lock().unwrap().push(event.clone());
    }
}

/// Replays scripted counters; the last value repeats once the script
/// runs out.
#[derive(Debug, Default)]
pub struct ScriptedStats {
    cpu: VecDeque<CpuTimes>,
    swap: VecDeque<SwapInfo>,
    last_cpu: CpuTimes,
    last_swap: SwapInfo,
}

impl ScriptedStats {
    /// Cumulative counters producing the given per-interval iowait
    /// percentages, preceded by a zero baseline.
    pub fn iowait(samples: &[u64]) -> Self {
        let mut cpu = VecDeque::new();
        let mut acc = CpuTimes::default();
        cpu.push_back(acc);
        for &pct in samples {
            acc.iowait += pct;
            acc.idle += 100 - pct;
            cpu.push_back(acc);
        }
        Self {
            cpu,
            ..Default::default()
        }
    }

    /// Swap usage percentages, one per poll.
    pub fn swap_usage(samples: &[u64]) -> Self {
        let swap = samples
            .iter()
            .map(|&used| SwapInfo {
                total_kb: 100,
                free_kb: 100 - used,
            })
            .collect();
        Self {
            swap,
            ..Default::default()
        }
    }
}

impl StatSource for ScriptedStats {
    fn cpu_times(&mut self) -> io::Result<CpuTimes> {
        if let Some(t) = self.cpu.pop_front() {
            self.last_cpu = t;
        }
        Ok(self.last_cpu)
    }

    fn swap(&mut self) -> io::Result<SwapInfo> {
        if let Some(s) = self.swap.pop_front() {
            self.last_swap = s;
        }
        Ok(self.last_swap)
    }
}
