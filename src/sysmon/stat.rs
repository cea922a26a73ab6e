//! Kernel counters read by the pressure monitors.
//!
//! `/proc/stat` is kept open for the lifetime of the source and re-read from
//! offset zero on every poll; `/proc/meminfo` is read by path.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Aggregate CPU time counters from the `cpu` line of /proc/stat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTimes {
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    /// Share of elapsed time spent in iowait since `prev`, in percent.
    pub fn iowait_percent_since(&self, prev: &CpuTimes) -> u32 {
        let total = self.total().saturating_sub(prev.total());
        if total == 0 {
            return 0;
        }
        let iowait = self.iowait.saturating_sub(prev.iowait);
        (iowait.saturating_mul(100) / total).min(100) as u32
    }
}

/// Swap figures from /proc/meminfo, in kB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwapInfo {
    pub total_kb: u64,
    pub free_kb: u64,
}

impl SwapInfo {
    /// Used swap in percent; `None` when there is no swap.
    pub fn used_percent(&self) -> Option<u32> {
        if self.total_kb == 0 {
            return None;
        }
        let used = self.total_kb.saturating_sub(self.free_kb);
        Some((used * 100 / self.total_kb) as u32)
    }
}

/// Parses the aggregate `cpu` line of /proc/stat content.
pub fn parse_cpu_line(content: &str) -> Option<CpuTimes> {
    let line = content
        .lines()
        .find(|l| l.split_whitespace().next() == Some("cpu"))?;
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 8 {
        return None;
    }
    let field = |i: usize| -> u64 {
        parts
            .get(i)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
    };
    Some(CpuTimes {
        user: field(1),
        nice: field(2),
        system: field(3),
        idle: field(4),
        iowait: field(5),
        irq: field(6),
        softirq: field(7),
        steal: field(8),
    })
}

/// Parses SwapTotal/SwapFree out of /proc/meminfo content.
pub fn parse_meminfo(content: &str) -> Option<SwapInfo> {
    let mut total: Option<u64> = None;
    let mut free: Option<u64> = None;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        match key {
            "SwapTotal:" => total = value.parse().ok(),
            "SwapFree:" => free = value.parse().ok(),
            _ => {}
        }
        if total.is_some() && free.is_some() {
            break;
        }
    }

    Some(SwapInfo {
        total_kb: total?,
        free_kb: free?,
    })
}

/// Source of the counters the monitors poll.
pub trait StatSource: Send {
    fn cpu_times(&mut self) -> io::Result<CpuTimes>;
    fn swap(&mut self) -> io::Result<SwapInfo>;
}

/// Reads counters from a procfs root.
#[derive(Debug)]
pub struct ProcStatSource {
    stat_path: PathBuf,
    stat: File,
    meminfo: PathBuf,
    buf: String,
}

impl ProcStatSource {
    pub fn open(proc_root: &Path) -> io::Result<Self> {
        let stat_path = proc_root.join("stat");
        let stat = File::open(&stat_path)?;
        Ok(Self {
            stat_path,
            stat,
            meminfo: proc_root.join("meminfo"),
            buf: String::with_capacity(4096),
        })
    }
}

fn invalid(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("unexpected format in {}", path.display()),
    )
}

impl StatSource for ProcStatSource {
    fn cpu_times(&mut self) -> io::Result<CpuTimes> {
        self.buf.clear();
        self.stat.seek(SeekFrom::Start(0))?;
        self.stat.read_to_string(&mut self.buf)?;
        parse_cpu_line(&self.buf).ok_or_else(|| invalid(&self.stat_path))
    }

    fn swap(&mut self) -> io::Result<SwapInfo> {
        let content = fs::read_to_string(&self.meminfo)?;
        parse_meminfo(&content).ok_or_else(|| invalid(&self.meminfo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const STAT: &str = "cpu  100 0 50 800 50 0 0 0 0 0\ncpu0 50 0 25 400 25 0 0 0 0 0\nctxt 1234\n";

    #[test]
    fn test_parse_cpu_line() {
        let t = parse_cpu_line(STAT).unwrap();
        assert_eq!(t.user, 100);
        assert_eq!(t.iowait, 50);
        assert_eq!(t.total(), 1000);
        assert!(parse_cpu_line("cpu0 1 2 3 4 5 6 7").is_none());
        assert!(parse_cpu_line("cpu 1 2").is_none());
    }

    #[test]
    fn test_iowait_percent_delta() {
        let prev = parse_cpu_line(STAT).unwrap();
        let mut next = prev;
        next.idle += 10;
        next.iowait += 90;
        assert_eq!(next.iowait_percent_since(&prev), 90);
        assert_eq!(prev.iowait_percent_since(&prev), 0);
    }

    #[test]
    fn test_parse_meminfo() {
        let content = "MemTotal: 1000 kB\nSwapTotal:  2000 kB\nSwapFree:   500 kB\n";
        let swap = parse_meminfo(content).unwrap();
        assert_eq!(swap.used_percent(), Some(75));
        assert!(parse_meminfo("MemTotal: 1 kB\n").is_none());
        assert_eq!(SwapInfo::default().used_percent(), None);
    }

    #[test]
    fn test_proc_source_rereads_open_handle() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("stat"), STAT).unwrap();
        fs::write(
            tmp.path().join("meminfo"),
            "SwapTotal: 100 kB\nSwapFree: 100 kB\n",
        )
        .unwrap();

        let mut src = ProcStatSource::open(tmp.path()).unwrap();
        assert_eq!(src.cpu_times().unwrap().total(), 1000);
        assert_eq!(src.swap().unwrap().used_percent(), Some(0));

        fs::write(tmp.path().join("stat"), "cpu  200 0 50 800 50 0 0 0\n").unwrap();
        assert_eq!(src.cpu_times().unwrap().user, 200);
    }
}
