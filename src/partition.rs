//! Resource-control partitions (cgroup v1 directories) and their registry.
//!
//! This is the only module that writes to the cgroup filesystem. Every
//! partition keeps its control files open for the lifetime of the daemon:
//! `tasks`, and depending on the enabled controllers `freezer.state`,
//! `cpu.shares` and `memory.limit_in_bytes`. A control file that does not
//! exist leaves that resource unmanaged.

use ahash::AHashMap as HashMap;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::validate_name;
use crate::error::{ConfigError, Error, LookupError, Result};
use crate::group::{Group, GroupTable};
use crate::process::list_threads;

/// Name of the root partition.
pub const ROOT_PARTITION: &str = "root";

pub const TASKS_FILE: &str = "tasks";
pub const FREEZER_FILE: &str = "freezer.state";
pub const CPU_SHARES_FILE: &str = "cpu.shares";
pub const MEMORY_LIMIT_FILE: &str = "memory.limit_in_bytes";

/// Kernel default for `cpu.shares`, written to lift a CPU limit.
pub const DEFAULT_CPU_SHARES: u64 = 1024;

/// A CPU or memory limit setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Limit {
    /// The resource is not managed for this partition; the control file is
    /// never opened.
    #[default]
    NoControl,
    /// Managed but unrestricted.
    NoLimit,
    Value(u64),
}

/// Cgroup controllers the daemon manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controllers {
    pub freezer: bool,
    pub cpu: bool,
    pub memory: bool,
    pub cpuset: bool,
}

impl Default for Controllers {
    fn default() -> Self {
        Self {
            freezer: true,
            cpu: true,
            memory: true,
            cpuset: false,
        }
    }
}

impl Controllers {
    /// Mount options for a cgroup v1 hierarchy carrying these controllers.
    pub fn mount_options(&self) -> String {
        let mut opts = Vec::new();
        if self.freezer {
            opts.push("freezer");
        }
        if self.cpu {
            opts.push("cpu");
        }
        if self.memory {
            opts.push("memory");
        }
        if self.cpuset {
            opts.push("cpuset");
        }
        opts.join(",")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionFlags {
    /// The partition can never be frozen.
    pub nofreeze: bool,
    /// Partition state is exported to the notification collaborator.
    pub exported: bool,
}

/// Everything needed to create a partition.
#[derive(Debug, Clone, Default)]
pub struct PartitionSpec {
    pub name: String,
    /// Directory relative to the mount point; defaults to the name.
    pub path: Option<PathBuf>,
    pub flags: PartitionFlags,
    pub cpu: Limit,
    pub memory: Limit,
    pub frozen: bool,
}

impl PartitionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// An open control file.
#[derive(Debug)]
struct Control {
    path: PathBuf,
    file: File,
}

impl Control {
    /// Opens `dir/name` for writing. A missing file yields `Ok(None)`.
    fn open(dir: &Path, name: &str) -> Result<Option<Self>> {
        let path = dir.join(name);
        match OpenOptions::new().write(true).open(&path) {
            Ok(file) => Ok(Some(Self { path, file })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(Error::ResourceIo { path, source }),
        }
    }

    /// Appends a task id.
    fn write_task(&self, tid: u32) -> Result<()> {
        (&self.file)
            .write_all(format!("{tid}\n").as_bytes())
            .map_err(|source| map_task_error(&self.path, tid, source))
    }

    /// Replaces the value of a single-value control file.
    fn write_value(&self, value: &str) -> Result<()> {
        self.file
            .write_all_at(format!("{value}\n").as_bytes(), 0)
            .map_err(|source| Error::ResourceIo {
                path: self.path.clone(),
                source,
            })
    }
}

fn map_task_error(path: &Path, tid: u32, source: io::Error) -> Error {
    if source.raw_os_error() == Some(libc::ESRCH) {
        Error::ProcessGone(tid)
    } else {
        Error::ResourceIo {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A resource-control domain.
#[derive(Debug)]
pub struct Partition {
    pub name: String,
    pub path: PathBuf,
    pub flags: PartitionFlags,
    tasks: Control,
    freeze: Option<Control>,
    cpu: Option<Control>,
    mem: Option<Control>,
    cpu_limit: Limit,
    mem_limit: Limit,
    frozen: bool,
}

impl Partition {
    pub fn cpu_limit(&self) -> Limit {
        self.cpu_limit
    }

    pub fn mem_limit(&self) -> Limit {
        self.mem_limit
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn is_freezable(&self) -> bool {
        !self.flags.nofreeze && self.freeze.is_some()
    }

    /// Attaches a single task id.
    pub fn add_task(&self, tid: u32) -> Result<()> {
        self.tasks.write_task(tid)
    }
}

/// A partition whose controls are open but not yet written.
#[derive(Debug)]
struct Opened {
    part: Partition,
    cpu: Limit,
    memory: Limit,
    frozen: bool,
    created: bool,
}

impl Opened {
    fn discard(&self) {
        if self.created {
            if let Err(e) = fs::remove_dir(&self.part.path) {
                debug!("Could not remove {}: {}", self.part.path.display(), e);
            }
        }
    }
}

/// Name-keyed partition registry with a permanent root partition.
#[derive(Debug)]
pub struct PartitionTable {
    mount: PathBuf,
    controllers: Controllers,
    proc_root: PathBuf,
    parts: HashMap<String, Partition>,
}

impl PartitionTable {
    /// Opens the root partition at `mount`. Failing to do so is fatal.
    pub fn new(
        mount: impl Into<PathBuf>,
        controllers: Controllers,
        proc_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let mount = mount.into();
        let tasks = Control::open(&mount, TASKS_FILE)?.ok_or_else(|| Error::Setup {
            what: format!("root partition at {}", mount.display()),
            source: io::Error::new(io::ErrorKind::NotFound, "no tasks control file"),
        })?;

        let root = Partition {
            name: ROOT_PARTITION.to_string(),
            path: mount.clone(),
            flags: PartitionFlags {
                nofreeze: true,
                exported: false,
            },
            tasks,
            freeze: None,
            cpu: None,
            mem: None,
            cpu_limit: Limit::NoControl,
            mem_limit: Limit::NoControl,
            frozen: false,
        };
        info!("Root partition opened at {}", mount.display());

        let mut parts = HashMap::new();
        parts.insert(root.name.clone(), root);
        Ok(Self {
            mount,
            controllers,
            proc_root: proc_root.into(),
            parts,
        })
    }

    pub fn mount(&self) -> &Path {
        &self.mount
    }

    pub fn controllers(&self) -> Controllers {
        self.controllers
    }

    pub fn root(&self) -> &Partition {
        &self.parts[ROOT_PARTITION]
    }

    /// Creates a partition directory, opens its controls and applies the
    /// configured limits and freeze state.
    pub fn add(&mut self, spec: PartitionSpec) -> Result<&Partition> {
        let opened = self.open(spec, &[])?;
        self.commit(opened)
    }

    /// Adds several partitions. Every directory is created and opened
    /// before the first limit or freeze state is written; if any of them
    /// fails, the directories created so far are removed again and no
    /// control file has been touched.
    pub fn add_all(&mut self, specs: Vec<PartitionSpec>) -> Result<()> {
        let mut opened: Vec<Opened> = Vec::with_capacity(specs.len());
        for spec in specs {
            match self.open(spec, &opened) {
                Ok(o) => opened.push(o),
                Err(e) => {
                    for o in opened.iter().rev() {
                        o.discard();
                    }
                    return Err(e);
                }
            }
        }
        for o in opened {
            self.commit(o)?;
        }
        Ok(())
    }

    fn open(&self, spec: PartitionSpec, pending: &[Opened]) -> Result<Opened> {
        validate_name("partition", &spec.name)?;
        if self.parts.contains_key(&spec.name)
            || pending.iter().any(|o| o.part.name == spec.name)
        {
            return Err(ConfigError::Duplicate {
                kind: "partition",
                name: spec.name,
            }
            .into());
        }

        let rel = spec.path.clone().unwrap_or_else(|| PathBuf::from(&spec.name));
        let path = self.mount.join(rel);
        let created = !path.exists();
        fs::create_dir_all(&path).map_err(|source| Error::ResourceIo {
            path: path.clone(),
            source,
        })?;

        match self.open_controls(&spec, &path) {
            Ok(part) => Ok(Opened {
                part,
                cpu: spec.cpu,
                memory: spec.memory,
                frozen: spec.frozen,
                created,
            }),
            Err(e) => {
                if created {
                    let _ = fs::remove_dir(&path);
                }
                Err(e)
            }
        }
    }

    fn open_controls(&self, spec: &PartitionSpec, path: &Path) -> Result<Partition> {
        let tasks = Control::open(path, TASKS_FILE)?.ok_or_else(|| Error::ResourceIo {
            path: path.join(TASKS_FILE),
            source: io::Error::new(io::ErrorKind::NotFound, "no tasks control file"),
        })?;
        let freeze = if self.controllers.freezer && !spec.flags.nofreeze {
            Control::open(path, FREEZER_FILE)?
        } else {
            None
        };
        let cpu = if self.controllers.cpu && spec.cpu != Limit::NoControl {
            Control::open(path, CPU_SHARES_FILE)?
        } else {
            None
        };
        let mem = if self.controllers.memory && spec.memory != Limit::NoControl {
            Control::open(path, MEMORY_LIMIT_FILE)?
        } else {
            None
        };
        Ok(Partition {
            name: spec.name.clone(),
            path: path.to_path_buf(),
            flags: spec.flags,
            tasks,
            freeze,
            cpu,
            mem,
            cpu_limit: Limit::NoControl,
            mem_limit: Limit::NoControl,
            frozen: false,
        })
    }

    fn commit(&mut self, opened: Opened) -> Result<&Partition> {
        let Opened {
            mut part,
            cpu,
            memory,
            frozen,
            ..
        } = opened;
        apply_cpu(&mut part, cpu, self.controllers.cpu)?;
        apply_mem(&mut part, memory, self.controllers.memory)?;
        // Written even when thawed; the directory may still carry an old state.
        if part.freeze.is_some() {
            apply_freeze(&mut part, frozen)?;
        }

        info!(
            "Partition '{}' created at {}",
            part.name,
            part.path.display()
        );
        let name = part.name.clone();
        self.parts.insert(name.clone(), part);
        Ok(&self.parts[&name])
    }

    pub fn lookup(&self, name: &str) -> Option<&Partition> {
        self.parts.get(name)
    }

    fn get(&self, name: &str) -> Result<&Partition> {
        self.parts
            .get(name)
            .ok_or_else(|| LookupError::Partition(name.to_string()).into())
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Partition> {
        self.parts
            .get_mut(name)
            .ok_or_else(|| LookupError::Partition(name.to_string()).into())
    }

    /// Removes a partition. The root and partitions that any group still
    /// maps onto cannot be removed.
    pub fn del(&mut self, name: &str, groups: &GroupTable) -> Result<()> {
        if name == ROOT_PARTITION {
            return Err(Error::RootPartition);
        }
        self.get(name)?;
        let busy = groups.referencing(name);
        if busy > 0 {
            return Err(Error::PartitionBusy(name.to_string(), busy));
        }
        if let Some(part) = self.parts.remove(name) {
            if let Err(e) = fs::remove_dir(&part.path) {
                warn!(
                    "Partition '{}' removed but {} stays: {}",
                    name,
                    part.path.display(),
                    e
                );
            }
        }
        Ok(())
    }

    /// Writes `pid` to the partition's task list.
    pub fn add_process(&self, name: &str, pid: u32) -> Result<()> {
        self.get(name)?.add_task(pid)
    }

    /// Attaches every member of `group` to partition `name`; with
    /// `recursive` all threads of each member are written too. Members that
    /// exited meanwhile are skipped. On any other failure the tasks already
    /// moved are written back to the group's current partition.
    pub fn add_group(&self, name: &str, group: &Group, recursive: bool) -> Result<usize> {
        let target = self.get(name)?;
        let mut moved: Vec<u32> = Vec::new();

        for &pid in group.members() {
            let mut tids = if recursive {
                list_threads(&self.proc_root, pid)
            } else {
                Vec::new()
            };
            if tids.is_empty() {
                tids.push(pid);
            }
            for tid in tids {
                match target.add_task(tid) {
                    Ok(()) => moved.push(tid),
                    Err(Error::ProcessGone(gone)) => {
                        debug!("Task {} of group '{}' is gone, skipping", gone, group.name);
                    }
                    Err(e) => {
                        self.rollback(&group.partition, &moved);
                        return Err(e);
                    }
                }
            }
        }
        debug!(
            "Moved {} task(s) of group '{}' to partition '{}'",
            moved.len(),
            group.name,
            name
        );
        Ok(moved.len())
    }

    fn rollback(&self, name: &str, tids: &[u32]) {
        let Some(part) = self.parts.get(name) else {
            return;
        };
        for &tid in tids {
            if let Err(e) = part.add_task(tid) {
                warn!("Rollback of task {} to '{}' failed: {}", tid, name, e);
            }
        }
    }

    /// Freezes or thaws a partition.
    pub fn freeze(&mut self, name: &str, frozen: bool) -> Result<()> {
        apply_freeze(self.get_mut(name)?, frozen)
    }

    pub fn limit_cpu(&mut self, name: &str, limit: Limit) -> Result<()> {
        let enabled = self.controllers.cpu;
        apply_cpu(self.get_mut(name)?, limit, enabled)
    }

    pub fn limit_mem(&mut self, name: &str, limit: Limit) -> Result<()> {
        let enabled = self.controllers.memory;
        apply_mem(self.get_mut(name)?, limit, enabled)
    }

    /// Thaws every frozen partition. Used on shutdown.
    pub fn thaw_all(&mut self) {
        for part in self.parts.values_mut() {
            if part.frozen {
                if let Err(e) = apply_freeze(part, false) {
                    warn!("Failed to thaw partition '{}': {}", part.name, e);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.parts.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Human readable listing of all partitions.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for name in self.names() {
            let part = &self.parts[name];
            let _ = write!(out, "partition {} ({})", part.name, part.path.display());
            let _ = write!(
                out,
                ", cpu {}, memory {}",
                describe(part.cpu_limit),
                describe(part.mem_limit)
            );
            if part.flags.nofreeze {
                out.push_str(", nofreeze");
            } else if part.frozen {
                out.push_str(", frozen");
            }
            if part.flags.exported {
                out.push_str(", exported");
            }
            out.push('\n');
        }
        out
    }
}

fn describe(limit: Limit) -> String {
    match limit {
        Limit::NoControl => "unmanaged".to_string(),
        Limit::NoLimit => "unlimited".to_string(),
        Limit::Value(v) => v.to_string(),
    }
}

fn apply_freeze(part: &mut Partition, frozen: bool) -> Result<()> {
    if part.flags.nofreeze {
        return Err(Error::NotFreezable(part.name.clone()));
    }
    let control = part
        .freeze
        .as_ref()
        .ok_or_else(|| Error::NotFreezable(part.name.clone()))?;
    control.write_value(if frozen { "FROZEN" } else { "THAWED" })?;
    part.frozen = frozen;
    info!(
        "Partition '{}' {}",
        part.name,
        if frozen { "frozen" } else { "thawed" }
    );
    Ok(())
}

/// Writes a limit through `control`, opening it on first use. Returns the
/// handle to keep, `None` when the resource is unmanaged: the limit is
/// `NoControl`, the controller is disabled or the control file is absent.
fn write_limit(
    dir: &Path,
    file: &str,
    control: Option<Control>,
    limit: Limit,
    unlimited: &str,
    enabled: bool,
) -> Result<Option<Control>> {
    let value = match limit {
        Limit::NoControl => return Ok(None),
        Limit::NoLimit => unlimited.to_string(),
        Limit::Value(v) => v.to_string(),
    };
    let control = match control {
        Some(c) => c,
        None if !enabled => return Ok(None),
        None => match Control::open(dir, file)? {
            Some(c) => c,
            None => {
                debug!("{} not available, leaving it unmanaged", dir.join(file).display());
                return Ok(None);
            }
        },
    };
    control.write_value(&value)?;
    Ok(Some(control))
}

fn managed(control: &Option<Control>, limit: Limit) -> Limit {
    if control.is_some() {
        limit
    } else {
        Limit::NoControl
    }
}

fn apply_cpu(part: &mut Partition, limit: Limit, enabled: bool) -> Result<()> {
    let unlimited = DEFAULT_CPU_SHARES.to_string();
    let current = part.cpu.take();
    match write_limit(&part.path, CPU_SHARES_FILE, current, limit, &unlimited, enabled) {
        Ok(control) => {
            part.cpu_limit = managed(&control, limit);
            part.cpu = control;
            Ok(())
        }
        Err(e) => {
            // Reopen lazily next time; the recorded limit stays the last applied one.
            warn!("CPU limit for partition '{}' failed: {}", part.name, e);
            Err(e)
        }
    }
}

fn apply_mem(part: &mut Partition, limit: Limit, enabled: bool) -> Result<()> {
    let current = part.mem.take();
    match write_limit(&part.path, MEMORY_LIMIT_FILE, current, limit, "-1", enabled) {
        Ok(control) => {
            part.mem_limit = managed(&control, limit);
            part.mem = control;
            Ok(())
        }
        Err(e) => {
            warn!("Memory limit for partition '{}' failed: {}", part.name, e);
            Err(e)
        }
    }
}
