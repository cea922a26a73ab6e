//! Per-evaluation process attribute snapshots.
//!
//! A snapshot is taken fresh for every classification attempt. Fields that
//! could not be resolved are `None`; rule tests against them evaluate to
//! false.

use serde::Serialize;

use crate::rules::{Field, Property, MAX_ARGS};

/// Whether a process is a regular user process or a kernel thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessType {
    #[default]
    Unknown,
    User,
    Kernel,
}

impl ProcessType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessType::Unknown => "unknown",
            ProcessType::User => "user",
            ProcessType::Kernel => "kernel",
        }
    }
}

/// Immutable attribute snapshot of one process.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcAttr {
    pub pid: u32,
    pub ppid: Option<u32>,
    /// Resolved path of the executable.
    pub binary: Option<String>,
    pub kind: ProcessType,
    /// Whole command line, arguments joined by a single space.
    pub cmdline: Option<String>,
    /// Command line arguments, at most `MAX_ARGS` of them.
    pub argv: Option<Vec<String>>,
    pub euid: Option<u32>,
    pub egid: Option<u32>,
    /// Binary of the parent process.
    pub parent: Option<String>,
    /// Number of reclassification rounds this evaluation belongs to; zero
    /// for evaluations triggered by a lifecycle event.
    pub reclassify: u32,
}

impl ProcAttr {
    /// Creates an empty snapshot for `pid` with nothing resolved.
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            ..Default::default()
        }
    }

    pub fn argc(&self) -> usize {
        self.argv.as_ref().map_or(0, Vec::len)
    }

    /// Returns the value a rule property addresses, or `None` when the
    /// attribute is unresolved (including argv slots at or past `argc`).
    pub fn field(&self, prop: Property) -> Option<Field<'_>> {
        match prop {
            Property::Binary => self.binary.as_deref().map(Field::Str),
            Property::Arg(n) => {
                let n = n as usize;
                if n >= MAX_ARGS {
                    return None;
                }
                self.argv
                    .as_ref()
                    .and_then(|argv| argv.get(n))
                    .map(|arg| Field::Str(arg.as_str()))
            }
            Property::Cmdline => self.cmdline.as_deref().map(Field::Str),
            Property::Type => match self.kind {
                ProcessType::Unknown => None,
                kind => Some(Field::Str(kind.as_str())),
            },
            Property::Parent => self.parent.as_deref().map(Field::Str),
            Property::Euid => self.euid.map(Field::U32),
            Property::Egid => self.egid.map(Field::U32),
            Property::Reclassify => Some(Field::S32(self.reclassify as i32)),
        }
    }
}

/// Something that can produce attribute snapshots for a pid.
pub trait AttributeSource {
    /// Takes a snapshot of `pid`. Returns `None` when the process cannot be
    /// resolved at all, typically because it already exited.
    fn snapshot(&self, pid: u32, reclassify: u32) -> Option<ProcAttr>;
}
