//! Process-related modules: attribute snapshots, procfs extraction,
//! discovery and the process table.
//!
//! This module provides:
//! - `attributes`: the per-evaluation snapshot and the `AttributeSource` trait
//! - `procfs`: snapshot extraction from /proc
//! - `scanner`: lifecycle events by diffing /proc between passes
//! - `table`: the pid-keyed process registry

pub mod attributes;
pub mod procfs;
pub mod scanner;
pub mod table;

pub use attributes::{AttributeSource, ProcAttr, ProcessType};
pub use procfs::{list_threads, ProcfsSource, DEFAULT_PROC_ROOT};
pub use scanner::{collect_pids, Lifecycle, ProcScanner};
pub use table::{Process, ProcessTable};
