//! Error types for the classification engine.
//!
//! Configuration problems are detected while a configuration is turned into
//! a fresh context and never touch a running one. Lookup and resource errors
//! are returned from targeted operations and leave the registries unchanged.

use std::io;
use std::path::PathBuf;

/// Problems found while loading or validating a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("duplicate {kind} '{name}'")]
    Duplicate { kind: &'static str, name: String },

    #[error("invalid {kind} name '{name}'")]
    InvalidName { kind: &'static str, name: String },

    #[error("{context} refers to unknown group '{group}'")]
    UnknownGroup { context: String, group: String },

    #[error("{context} refers to unknown partition '{partition}'")]
    UnknownPartition { context: String, partition: String },

    #[error("unknown property '{0}'")]
    UnknownProperty(String),

    #[error("property '{property}' expects a {expected} value, got '{found}'")]
    TypeMismatch {
        property: String,
        expected: &'static str,
        found: String,
    },

    #[error("boolean '{op}' needs at least {min} operand(s)")]
    Arity { op: &'static str, min: usize },

    #[error("{0}")]
    Invalid(String),
}

/// A targeted operation named something that does not exist.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("unknown process {0}")]
    Process(u32),

    #[error("unknown group '{0}'")]
    Group(String),

    #[error("unknown partition '{0}'")]
    Partition(String),
}

/// Crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("write to {path} failed: {source}")]
    ResourceIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("process {0} no longer exists")]
    ProcessGone(u32),

    #[error("partition '{0}' is not freezable")]
    NotFreezable(String),

    #[error("partition '{0}' still hosts {1} group(s)")]
    PartitionBusy(String, usize),

    #[error("the root partition cannot be removed")]
    RootPartition,

    #[error("group '{0}' is statically partitioned")]
    StaticGroup(String),

    #[error("cannot set up {what}: {source}")]
    Setup {
        what: String,
        #[source]
        source: io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
