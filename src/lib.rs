//! syspart process classification library
//!
//! This library classifies running processes into named groups with a small
//! rule language and maps every group onto a cgroup partition with CPU,
//! memory and freezer controls. It is driven by process lifecycle events and
//! timers from a single dispatch loop.
//!
//! # Features
//!
//! - **Rule Language**: typed property tests (binary, argv, cmdline, type,
//!   parent, euid/egid, reclassify round) combined with and/or/not
//! - **Registries**: group, partition and process tables with consistent
//!   membership
//! - **Deferred Reclassification**: bounded re-evaluation after a delay
//! - **Partition Control**: cgroup v1 task lists, `cpu.shares`,
//!   `memory.limit_in_bytes` and the freezer
//! - **Pressure Monitors**: windowed I/O-wait and EWMA-smoothed swap alerts
//!
//! # Usage
//!
//! ```rust
//! use syspart::rules::{CmpOp, Command, Expr, Procdef, Property, RuleTable, Statement, Value};
//! use syspart::process::ProcAttr;
//!
//! let root = Expr::prop(Property::Euid, CmpOp::Eq, Value::U32(0)).unwrap();
//! let mut rules = RuleTable::new();
//! rules
//!     .insert(Procdef::new(
//!         "/usr/bin/player",
//!         vec![
//!             Statement::when(root, Command::Group("active".into())),
//!             Statement::always(Command::Group("standby".into())),
//!         ],
//!     ))
//!     .unwrap();
//!
//! let mut attrs = ProcAttr::new(100);
//! attrs.binary = Some("/usr/bin/player".into());
//! attrs.euid = Some(1000);
//!
//! let procdef = rules.lookup("/usr/bin/player").unwrap();
//! assert_eq!(procdef.eval(&attrs), Some(&Command::Group("standby".into())));
//! ```

pub mod classifier;
pub mod config;
pub mod context;
pub mod daemon;
pub mod error;
pub mod group;
pub mod notify;
pub mod partition;
pub mod process;
pub mod rules;
pub mod scheduler;
pub mod sysmon;

// Re-export main types for convenience
pub use classifier::{Classifier, Decision, Outcome, CGRP_RECLASSIFY_MAX};
pub use config::{load_config, validate, Config, ConfigFormat};
pub use context::{Context, Options, ProcessState};
pub use daemon::{Daemon, Event, Flow};
pub use error::{ConfigError, Error, LookupError, Result};
pub use group::{Group, GroupTable};
pub use notify::{GroupChange, LogNotifier, Notifier, PressureEvent};
pub use partition::{Limit, Partition, PartitionTable};
pub use scheduler::{ManualScheduler, Scheduler, TimerKey, TokioScheduler};
