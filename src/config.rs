//! Configuration management for syspart.
//!
//! This module handles loading configuration files (YAML, JSON or TOML by
//! extension), compiling them into checked registries and turning the result
//! into a live [`Context`]. Compilation is pure; only instantiation touches
//! the cgroup filesystem.

use clap::ValueEnum;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::context::{Context, Options, DEFAULT_MOUNT};
use crate::error::{ConfigError, Error, Result};
use crate::group::{Group, GroupTable};
use crate::partition::{
    Controllers, Limit, PartitionFlags, PartitionSpec, PartitionTable, ROOT_PARTITION, TASKS_FILE,
};
use crate::process::DEFAULT_PROC_ROOT;
use crate::rules::{
    CmpOp, Command, Expr, Procdef, Property, RuleTable, Statement, Value, ValueType,
};
use crate::sysmon::{IoWaitConfig, SwapConfig};

/// Locations searched when no configuration file is given.
pub const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "/etc/syspart/syspart.yaml",
    "/etc/syspart/syspart.yml",
    "/etc/syspart/syspart.json",
    "./syspart.yaml",
];

/// Nice value range accepted for priorities and renice values.
pub const NICE_MIN: i32 = -20;
pub const NICE_MAX: i32 = 19;

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("name pattern is valid"));

/// Checks that a partition or group name is usable as a directory name.
pub fn validate_name(kind: &'static str, name: &str) -> Result<(), ConfigError> {
    if name == "." || name == ".." || !NAME_RE.is_match(name) {
        return Err(ConfigError::InvalidName {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Configuration format options for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    /// Format implied by a file extension; YAML unless `.json` or `.toml`.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => ConfigFormat::Json,
            Some("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Yaml,
        }
    }
}

// ---------------------------------------------------------------------------
// File representation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Controller {
    Freezer,
    Cpu,
    Memory,
    Cpuset,
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// cgroup mount point (default: /syspart)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount: Option<PathBuf>,
    /// Controllers to manage (default: freezer, cpu, memory)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controllers: Option<Vec<Controller>>,
    /// Mount a cgroup v1 hierarchy at `mount` if none is there
    #[serde(default)]
    pub mount_if_missing: bool,
    #[serde(default)]
    pub export_groups: bool,
    #[serde(default)]
    pub export_partitions: bool,
    /// procfs root (default: /proc)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proc_root: Option<PathBuf>,
    /// /proc scan period in milliseconds, 0 disables scanning (default: 2000)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_interval_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub iowait: Option<IoWaitSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swap: Option<SwapSection>,

    #[serde(default)]
    pub partitions: Vec<PartitionConfig>,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    /// Statements used for binaries without a rule of their own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Vec<StatementConfig>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartitionConfig {
    pub name: String,
    /// Directory relative to the mount point (default: name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// cpu.shares; absent leaves CPU unmanaged, 0 means unlimited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_shares: Option<u64>,
    /// memory.limit_in_bytes; absent leaves memory unmanaged, 0 means unlimited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<u64>,
    #[serde(default)]
    pub nofreeze: bool,
    #[serde(default)]
    pub frozen: bool,
    #[serde(default)]
    pub export: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    pub name: String,
    /// Partition the group starts in (default: root)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The group never moves to another partition.
    #[serde(default, rename = "static")]
    pub static_partition: bool,
    #[serde(default)]
    pub export: bool,
    /// Nice value applied to members, -20..=19
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub binary: String,
    /// Nice value applied on group assignment, overrides group priority
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renice: Option<i32>,
    pub statements: Vec<StatementConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatementConfig {
    /// Condition; absent means always.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "serde_yaml::with::singleton_map_recursive"
    )]
    pub when: Option<ExprConfig>,
    /// `ignore`, `{ group: <name> }` or `{ reclassify: <ms> }`
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub then: CommandConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandConfig {
    Group(String),
    Ignore,
    /// Delay in milliseconds.
    Reclassify(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExprConfig {
    And(Vec<ExprConfig>),
    Or(Vec<ExprConfig>),
    Not(Box<ExprConfig>),
    Test(TestConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestConfig {
    pub property: String,
    /// `==`, `!=` or `<` (default: `==`)
    #[serde(default = "default_op")]
    pub op: String,
    pub value: LiteralConfig,
}

fn default_op() -> String {
    "==".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiteralConfig {
    Int(i64),
    Str(String),
}

impl std::fmt::Display for LiteralConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiteralConfig::Int(v) => write!(f, "{v}"),
            LiteralConfig::Str(s) => write!(f, "{s:?}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IoWaitSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwapSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoothing: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Resolves the configuration file to use: the explicit path, or the first
/// existing default location.
pub fn find_config(path: Option<&Path>) -> Option<PathBuf> {
    match path {
        Some(p) => Some(p.to_path_buf()),
        None => DEFAULT_CONFIG_PATHS
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
            .map(Path::to_path_buf),
    }
}

/// Parses configuration text in the given format.
pub fn parse_config(content: &str, format: ConfigFormat) -> Result<Config, ConfigError> {
    match format {
        ConfigFormat::Json => {
            serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        ConfigFormat::Yaml => {
            serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
        }
    }
}

/// Reads and parses one configuration file.
pub fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let format = ConfigFormat::from_path(path);
    let config = parse_config(&content, format)
        .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
    info!("Loaded {:?} configuration from: {}", format, path.display());
    Ok(config)
}

/// Loads the explicit file, or the first default location, or defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    match find_config(path) {
        Some(p) => load_config_file(&p),
        None => {
            debug!("No configuration file found, using defaults");
            Ok(Config::default())
        }
    }
}

/// Renders a configuration in the requested format.
pub fn show_config(config: &Config, format: ConfigFormat) -> Result<String, ConfigError> {
    match format {
        ConfigFormat::Json => {
            serde_json::to_string_pretty(config).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        ConfigFormat::Toml => {
            toml::to_string_pretty(config).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        ConfigFormat::Yaml => {
            serde_yaml::to_string(config).map_err(|e| ConfigError::Parse(e.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// A checked configuration, ready to be instantiated.
#[derive(Debug)]
pub struct Blueprint {
    pub options: Options,
    pub partitions: Vec<PartitionSpec>,
    pub groups: GroupTable,
    pub rules: RuleTable,
    pub iowait: Option<IoWaitConfig>,
    pub swap: Option<SwapConfig>,
}

fn limit_from(value: Option<u64>) -> Limit {
    match value {
        None => Limit::NoControl,
        Some(0) => Limit::NoLimit,
        Some(v) => Limit::Value(v),
    }
}

fn check_nice(what: &str, value: i32) -> Result<i32, ConfigError> {
    if !(NICE_MIN..=NICE_MAX).contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{what}: nice value {value} outside {NICE_MIN}..={NICE_MAX}"
        )));
    }
    Ok(value)
}

fn resolve_user(name: &str) -> Result<u32, ConfigError> {
    match nix::unistd::User::from_name(name) {
        Ok(Some(user)) => Ok(user.uid.as_raw()),
        _ => Err(ConfigError::Invalid(format!("unknown user '{name}'"))),
    }
}

fn resolve_group(name: &str) -> Result<u32, ConfigError> {
    match nix::unistd::Group::from_name(name) {
        Ok(Some(group)) => Ok(group.gid.as_raw()),
        _ => Err(ConfigError::Invalid(format!("unknown group '{name}'"))),
    }
}

fn literal(prop: Property, value: &LiteralConfig) -> Result<Value, ConfigError> {
    let mismatch = || ConfigError::TypeMismatch {
        property: prop.to_string(),
        expected: prop.value_type().as_str(),
        found: value.to_string(),
    };
    match (prop.value_type(), value) {
        (ValueType::String, LiteralConfig::Str(s)) => Ok(Value::Str(s.clone())),
        (ValueType::Unsigned32, LiteralConfig::Int(v)) => {
            u32::try_from(*v).map(Value::U32).map_err(|_| mismatch())
        }
        (ValueType::Unsigned32, LiteralConfig::Str(s)) => {
            if let Ok(v) = s.parse::<u32>() {
                return Ok(Value::U32(v));
            }
            let id = match prop {
                Property::Egid => resolve_group(s)?,
                _ => resolve_user(s)?,
            };
            Ok(Value::U32(id))
        }
        (ValueType::Signed32, LiteralConfig::Int(v)) => {
            i32::try_from(*v).map(Value::S32).map_err(|_| mismatch())
        }
        _ => Err(mismatch()),
    }
}

/// Turns an expression description into an expression tree. `and`/`or`
/// with more than two operands fold left.
pub fn compile_expr(expr: &ExprConfig) -> Result<Expr, ConfigError> {
    match expr {
        ExprConfig::And(items) => fold(items, "and", Expr::and),
        ExprConfig::Or(items) => fold(items, "or", Expr::or),
        ExprConfig::Not(inner) => Ok(Expr::not(compile_expr(inner)?)),
        ExprConfig::Test(test) => {
            let prop: Property = test.property.parse()?;
            let op: CmpOp = test.op.parse()?;
            Expr::prop(prop, op, literal(prop, &test.value)?)
        }
    }
}

fn fold(
    items: &[ExprConfig],
    op: &'static str,
    join: fn(Expr, Expr) -> Expr,
) -> Result<Expr, ConfigError> {
    if items.len() < 2 {
        return Err(ConfigError::Arity { op, min: 2 });
    }
    let mut iter = items.iter();
    let mut acc = match iter.next() {
        Some(first) => compile_expr(first)?,
        None => return Err(ConfigError::Arity { op, min: 2 }),
    };
    for item in iter {
        acc = join(acc, compile_expr(item)?);
    }
    Ok(acc)
}

fn compile_statements(
    owner: &str,
    statements: &[StatementConfig],
    groups: &GroupTable,
) -> Result<Vec<Statement>, ConfigError> {
    statements
        .iter()
        .map(|stmt| {
            let command = match &stmt.then {
                CommandConfig::Group(name) => {
                    if groups.lookup(name).is_none() {
                        return Err(ConfigError::UnknownGroup {
                            context: format!("rule for {owner}"),
                            group: name.clone(),
                        });
                    }
                    Command::Group(name.clone())
                }
                CommandConfig::Ignore => Command::Ignore,
                CommandConfig::Reclassify(0) => {
                    return Err(ConfigError::Invalid(format!(
                        "rule for {owner}: reclassify delay must be positive"
                    )))
                }
                CommandConfig::Reclassify(ms) => Command::Reclassify { delay_ms: *ms },
            };
            Ok(Statement {
                expr: stmt.when.as_ref().map(compile_expr).transpose()?,
                command,
            })
        })
        .collect()
}

impl Config {
    /// Global options with defaults applied.
    pub fn options(&self) -> Options {
        let controllers = match &self.controllers {
            None => Controllers::default(),
            Some(list) => Controllers {
                freezer: list.contains(&Controller::Freezer),
                cpu: list.contains(&Controller::Cpu),
                memory: list.contains(&Controller::Memory),
                cpuset: list.contains(&Controller::Cpuset),
            },
        };
        let defaults = Options::default();
        Options {
            mount: self
                .mount
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MOUNT)),
            controllers,
            mount_if_missing: self.mount_if_missing,
            export_groups: self.export_groups,
            export_partitions: self.export_partitions,
            proc_root: self
                .proc_root
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROC_ROOT)),
            scan_interval: self
                .scan_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.scan_interval),
        }
    }

    fn iowait_config(&self) -> Result<Option<IoWaitConfig>, ConfigError> {
        let Some(section) = &self.iowait else {
            return Ok(None);
        };
        let d = IoWaitConfig::default();
        let cfg = IoWaitConfig {
            low: section.low.unwrap_or(d.low),
            high: section.high.unwrap_or(d.high),
            interval: section.interval_ms.map(Duration::from_millis).unwrap_or(d.interval),
            window: section.window.unwrap_or(d.window),
            hook: section.hook.clone().unwrap_or(d.hook),
        };
        check_thresholds("iowait", cfg.low, cfg.high)?;
        if cfg.window == 0 || cfg.interval.is_zero() {
            return Err(ConfigError::Invalid(
                "iowait: window and interval_ms must be positive".into(),
            ));
        }
        Ok(Some(cfg))
    }

    fn swap_config(&self) -> Result<Option<SwapConfig>, ConfigError> {
        let Some(section) = &self.swap else {
            return Ok(None);
        };
        let d = SwapConfig::default();
        let cfg = SwapConfig {
            low: section.low.unwrap_or(d.low),
            high: section.high.unwrap_or(d.high),
            interval: section.interval_ms.map(Duration::from_millis).unwrap_or(d.interval),
            notify_interval: section
                .notify_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(d.notify_interval),
            smoothing: section.smoothing.unwrap_or(d.smoothing),
            hook: section.hook.clone().unwrap_or(d.hook),
        };
        check_thresholds("swap", cfg.low, cfg.high)?;
        if cfg.smoothing == 0 || cfg.interval.is_zero() {
            return Err(ConfigError::Invalid(
                "swap: smoothing and interval_ms must be positive".into(),
            ));
        }
        Ok(Some(cfg))
    }

    /// Checks every name, reference and literal and builds the registries.
    /// Nothing outside the returned value is touched.
    pub fn compile(&self) -> Result<Blueprint, ConfigError> {
        let options = self.options();

        let mut partitions: Vec<PartitionSpec> = Vec::with_capacity(self.partitions.len());
        for p in &self.partitions {
            validate_name("partition", &p.name)?;
            if p.name == ROOT_PARTITION || partitions.iter().any(|s| s.name == p.name) {
                return Err(ConfigError::Duplicate {
                    kind: "partition",
                    name: p.name.clone(),
                });
            }
            if p.nofreeze && p.frozen {
                return Err(ConfigError::Invalid(format!(
                    "partition '{}' is both nofreeze and frozen",
                    p.name
                )));
            }
            partitions.push(PartitionSpec {
                name: p.name.clone(),
                path: p.path.clone(),
                flags: PartitionFlags {
                    nofreeze: p.nofreeze,
                    exported: p.export || self.export_partitions,
                },
                cpu: limit_from(p.cpu_shares),
                memory: limit_from(p.memory_limit),
                frozen: p.frozen,
            });
        }

        let mut groups = GroupTable::new();
        for g in &self.groups {
            validate_name("group", &g.name)?;
            let partition = g.partition.as_deref().unwrap_or(ROOT_PARTITION);
            if partition != ROOT_PARTITION && !partitions.iter().any(|s| s.name == partition) {
                return Err(ConfigError::UnknownPartition {
                    context: format!("group '{}'", g.name),
                    partition: partition.to_string(),
                });
            }
            let mut group = Group::new(&g.name, partition);
            group.description = g.description.clone().unwrap_or_default();
            group.flags.static_partition = g.static_partition;
            group.flags.exported = g.export || self.export_groups;
            group.priority = g
                .priority
                .map(|p| check_nice(&format!("group '{}'", g.name), p))
                .transpose()?;
            groups.add(group)?;
        }

        let mut rules = RuleTable::new();
        for r in &self.rules {
            let mut procdef =
                Procdef::new(&r.binary, compile_statements(&r.binary, &r.statements, &groups)?);
            if let Some(renice) = r.renice {
                procdef.renice = check_nice(&format!("rule for {}", r.binary), renice)?;
            }
            rules.insert(procdef)?;
        }
        if let Some(statements) = &self.fallback {
            rules.set_fallback(Procdef::new(
                "*",
                compile_statements("fallback", statements, &groups)?,
            ));
        }

        Ok(Blueprint {
            options,
            partitions,
            groups,
            rules,
            iowait: self.iowait_config()?,
            swap: self.swap_config()?,
        })
    }
}

fn check_thresholds(what: &str, low: u32, high: u32) -> Result<(), ConfigError> {
    if low > high || high > 100 {
        return Err(ConfigError::Invalid(format!(
            "{what}: thresholds must satisfy low <= high <= 100 (got {low}/{high})"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Instantiation
// ---------------------------------------------------------------------------

fn mount_hierarchy(options: &Options) -> Result<()> {
    use nix::mount::{mount, MsFlags};

    if options.mount.join(TASKS_FILE).exists() {
        return Ok(());
    }
    fs::create_dir_all(&options.mount).map_err(|source| Error::Setup {
        what: format!("creating {}", options.mount.display()),
        source,
    })?;
    let opts = options.controllers.mount_options();
    mount(
        Some("cgroup"),
        &options.mount,
        Some("cgroup"),
        MsFlags::empty(),
        Some(opts.as_str()),
    )
    .map_err(|errno| Error::Setup {
        what: format!("mounting cgroup ({}) at {}", opts, options.mount.display()),
        source: std::io::Error::from(errno),
    })?;
    info!("Mounted cgroup ({}) at {}", opts, options.mount.display());
    Ok(())
}

impl Blueprint {
    /// Opens the partitions and assembles a live context.
    pub fn instantiate(self) -> Result<Context> {
        if self.options.mount_if_missing {
            mount_hierarchy(&self.options)?;
        }
        let mut partitions = PartitionTable::new(
            &self.options.mount,
            self.options.controllers,
            &self.options.proc_root,
        )?;
        partitions.add_all(self.partitions)?;

        let mut ctx = Context::new(self.options, partitions);
        ctx.groups = self.groups;
        ctx.rules = self.rules;
        ctx.iowait = self.iowait;
        ctx.swap = self.swap;
        info!(
            "Configuration applied: {} partition(s), {} group(s), {} rule(s)",
            ctx.partitions.len(),
            ctx.groups.len(),
            ctx.rules.len()
        );
        Ok(ctx)
    }
}

/// Builds a complete fresh context from a configuration.
pub fn validate(config: &Config) -> Result<Context> {
    config.compile()?.instantiate()
}

/// Commented sample configuration printed by `syspart config`.
pub const SAMPLE_CONFIG: &str = r#"# syspart configuration
#
# Partitions are cgroup directories below `mount`. Groups map onto
# partitions; rules map binaries onto groups.

mount: /syspart
controllers: [freezer, cpu, memory]
mount_if_missing: false
export_groups: false
export_partitions: false
proc_root: /proc
scan_interval_ms: 2000

partitions:
  # cpu_shares / memory_limit: absent = unmanaged, 0 = unlimited
  - name: fg
    cpu_shares: 2048
    memory_limit: 0
  - name: bg
    cpu_shares: 256
    frozen: false
  - name: system
    nofreeze: true

groups:
  - name: active
    partition: fg
    priority: -5
    description: Foreground applications
  - name: standby
    partition: bg
  - name: services
    partition: system
    static: true

rules:
  - binary: /usr/bin/player
    statements:
      - when:
          test: { property: euid, op: "==", value: root }
        then:
          group: active
      - then:
          group: standby
  - binary: /usr/bin/launcher
    renice: 5
    statements:
      - when:
          and:
            - test: { property: arg1, value: "--daemon" }
            - not:
                test: { property: parent, value: /sbin/init }
        then: ignore
      - when:
          test: { property: reclassify, op: "<", value: 3 }
        then:
          reclassify: 500

# Used for binaries without a rule of their own.
fallback:
  - when:
      test: { property: type, value: kernel }
    then: ignore
  - then:
      group: standby

iowait:
  low: 10
  high: 80
  interval_ms: 1000
  window: 5
  hook: iowait

swap:
  low: 40
  high: 80
  interval_ms: 5000
  notify_interval_ms: 60000
  smoothing: 4
  hook: swap
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcAttr, ProcessType};
    use tempfile::TempDir;

    fn yaml(text: &str) -> Config {
        parse_config(text, ConfigFormat::Yaml).unwrap()
    }

    fn player(euid: u32) -> ProcAttr {
        let mut attrs = ProcAttr::new(100);
        attrs.binary = Some("/usr/bin/player".into());
        attrs.kind = ProcessType::User;
        attrs.euid = Some(euid);
        attrs
    }

    // -------------------------------------------------------------------------
    // Parsing
    // -------------------------------------------------------------------------

    #[test]
    fn test_sample_config_compiles() {
        let config = yaml(SAMPLE_CONFIG);
        let bp = config.compile().unwrap();
        assert_eq!(bp.partitions.len(), 3);
        assert_eq!(bp.groups.len(), 3);
        assert_eq!(bp.rules.len(), 2);
        assert!(bp.rules.fallback().is_some());
        assert_eq!(bp.iowait.as_ref().unwrap().window, 5);
        assert_eq!(bp.swap.as_ref().unwrap().smoothing, 4);
        assert_eq!(bp.options.scan_interval, Duration::from_millis(2000));
        assert!(!bp.options.controllers.cpuset);

        let fg = &bp.partitions[0];
        assert_eq!(fg.cpu, Limit::Value(2048));
        assert_eq!(fg.memory, Limit::NoLimit);
        assert_eq!(bp.partitions[1].memory, Limit::NoControl);
        assert_eq!(bp.groups.lookup("active").unwrap().priority, Some(-5));
        assert!(bp.groups.lookup("services").unwrap().flags.static_partition);
    }

    #[test]
    fn test_player_rule_semantics() {
        let bp = yaml(SAMPLE_CONFIG).compile().unwrap();
        let procdef = bp.rules.lookup("/usr/bin/player").unwrap();
        assert_eq!(
            procdef.eval(&player(0)),
            Some(&Command::Group("active".into()))
        );
        assert_eq!(
            procdef.eval(&player(1000)),
            Some(&Command::Group("standby".into()))
        );
        assert_eq!(bp.rules.lookup("/usr/bin/launcher").unwrap().renice, 5);
    }

    #[test]
    fn test_yaml_map_form_statements() {
        let config = yaml(
            r#"
groups: [{name: active}, {name: standby}]
rules:
  - binary: /bin/a
    statements:
      - when:
          not:
            test: { property: euid, value: 0 }
        then:
          group: standby
      - when:
          test: { property: reclassify, op: "<", value: 2 }
        then:
          reclassify: 100
      - then: ignore
"#,
        );
        assert_eq!(
            config.rules[0].statements[0].then,
            CommandConfig::Group("standby".into())
        );
        assert_eq!(config.rules[0].statements[2].when, None);

        let bp = config.compile().unwrap();
        let statements = &bp.rules.lookup("/bin/a").unwrap().statements;
        assert_eq!(statements[0].expr.as_ref().unwrap().to_string(), "!euid == 0");
        assert_eq!(statements[1].command, Command::Reclassify { delay_ms: 100 });
        assert_eq!(statements[2].command, Command::Ignore);
    }

    #[test]
    fn test_show_config_yaml_roundtrip() {
        let config = yaml(SAMPLE_CONFIG);
        let text = show_config(&config, ConfigFormat::Yaml).unwrap();
        assert!(!text.contains('!'), "{text}");
        assert_eq!(yaml(&text), config);
    }

    #[test]
    fn test_json_and_toml_forms() {
        let json = r#"{
            "groups": [{"name": "g"}],
            "rules": [{
                "binary": "/bin/a",
                "statements": [
                    {"when": {"or": [
                        {"test": {"property": "arg0", "value": "a"}},
                        {"test": {"property": "euid", "op": "<", "value": 1000}}
                    ]}, "then": {"group": "g"}},
                    {"then": "ignore"}
                ]
            }]
        }"#;
        let bp = parse_config(json, ConfigFormat::Json)
            .unwrap()
            .compile()
            .unwrap();
        let stmt = &bp.rules.lookup("/bin/a").unwrap().statements[0];
        assert_eq!(
            stmt.expr.as_ref().unwrap().to_string(),
            "(arg0 == \"a\" || euid < 1000)"
        );

        let toml_text = r#"
mount = "/tmp/cg"
controllers = ["cpu"]

[[groups]]
name = "g"

[[rules]]
binary = "/bin/b"

[[rules.statements]]
then = { reclassify = 250 }
"#;
        let config = parse_config(toml_text, ConfigFormat::Toml).unwrap();
        let options = config.options();
        assert_eq!(options.mount, PathBuf::from("/tmp/cg"));
        assert!(options.controllers.cpu && !options.controllers.freezer);
        let bp = config.compile().unwrap();
        assert_eq!(
            bp.rules.lookup("/bin/b").unwrap().statements[0].command,
            Command::Reclassify { delay_ms: 250 }
        );
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.conf")), ConfigFormat::Yaml);
    }

    #[test]
    fn test_load_config_file_and_errors() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("syspart.json");
        fs::write(&path, r#"{"mount": "/x"}"#).unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.mount, Some(PathBuf::from("/x")));

        let missing = tmp.path().join("missing.yaml");
        assert!(matches!(
            load_config(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));

        let bad = tmp.path().join("bad.yaml");
        fs::write(&bad, "bogus_key: 1\n").unwrap();
        assert!(matches!(load_config(Some(&bad)), Err(ConfigError::Parse(_))));
    }

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------

    #[test]
    fn test_unknown_group_reference() {
        let config = yaml(
            "rules:\n  - binary: /bin/a\n    statements:\n      - then:\n          group: nope\n",
        );
        assert!(matches!(
            config.compile(),
            Err(ConfigError::UnknownGroup { .. })
        ));
    }

    #[test]
    fn test_unknown_partition_reference() {
        let config = yaml("groups:\n  - name: g\n    partition: nope\n");
        assert!(matches!(
            config.compile(),
            Err(ConfigError::UnknownPartition { .. })
        ));
    }

    #[test]
    fn test_type_mismatch() {
        let config = yaml(
            "groups: [{name: g}]\nrules:\n  - binary: /bin/a\n    statements:\n      - when:\n          test: { property: binary, value: 5 }\n        then: ignore\n",
        );
        assert!(matches!(
            config.compile(),
            Err(ConfigError::TypeMismatch { .. })
        ));

        let config = yaml(
            "rules:\n  - binary: /bin/a\n    statements:\n      - when:\n          test: { property: type, value: daemon }\n        then: ignore\n",
        );
        assert!(matches!(
            config.compile(),
            Err(ConfigError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_duplicates_rejected() {
        let config = yaml("partitions: [{name: a}, {name: a}]\n");
        assert!(matches!(config.compile(), Err(ConfigError::Duplicate { .. })));
        let config = yaml("partitions: [{name: root}]\n");
        assert!(matches!(config.compile(), Err(ConfigError::Duplicate { .. })));
        let config = yaml("groups: [{name: g}, {name: g}]\n");
        assert!(matches!(config.compile(), Err(ConfigError::Duplicate { .. })));
        let config = yaml(
            "rules:\n  - {binary: /bin/a, statements: [{then: ignore}]}\n  - {binary: /bin/a, statements: [{then: ignore}]}\n",
        );
        assert!(matches!(config.compile(), Err(ConfigError::Duplicate { .. })));
    }

    #[test]
    fn test_arity_and_names() {
        let config = yaml(
            "rules:\n  - binary: /bin/a\n    statements:\n      - when:\n          and:\n            - test: { property: euid, value: 0 }\n        then: ignore\n",
        );
        assert!(matches!(
            config.compile(),
            Err(ConfigError::Arity { op: "and", min: 2 })
        ));

        assert!(validate_name("group", "fg-1.x_y").is_ok());
        for bad in ["", ".", "..", "a/b", "with space"] {
            assert!(validate_name("group", bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn test_monitor_thresholds_checked() {
        let config = yaml("iowait: {low: 90, high: 80}\n");
        assert!(matches!(config.compile(), Err(ConfigError::Invalid(_))));
        let config = yaml("swap: {smoothing: 0}\n");
        assert!(matches!(config.compile(), Err(ConfigError::Invalid(_))));
        let config = yaml("swap: {}\n");
        assert_eq!(config.compile().unwrap().swap, Some(SwapConfig::default()));
    }

    #[test]
    fn test_priority_range() {
        let config = yaml("groups: [{name: g, priority: 40}]\n");
        assert!(matches!(config.compile(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_user_name_literal() {
        let expr = compile_expr(&ExprConfig::Test(TestConfig {
            property: "euid".into(),
            op: "==".into(),
            value: LiteralConfig::Str("root".into()),
        }))
        .unwrap();
        assert_eq!(expr.to_string(), "euid == 0");
    }

    // -------------------------------------------------------------------------
    // Instantiation
    // -------------------------------------------------------------------------

    #[test]
    fn test_validate_builds_context() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(TASKS_FILE), "").unwrap();
        for name in ["fg", "bg"] {
            let dir = tmp.path().join(name);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(TASKS_FILE), "").unwrap();
        }
        let text = format!(
            "mount: {}\npartitions: [{{name: fg}}, {{name: bg}}]\ngroups:\n  - {{name: active, partition: fg}}\n",
            tmp.path().display()
        );
        let ctx = validate(&yaml(&text)).unwrap();
        assert_eq!(ctx.partitions.len(), 3);
        assert_eq!(ctx.groups.lookup("active").unwrap().partition, "fg");
    }

    #[test]
    fn test_validate_fails_without_root() {
        let tmp = TempDir::new().unwrap();
        let text = format!("mount: {}\n", tmp.path().join("absent").display());
        assert!(matches!(validate(&yaml(&text)), Err(Error::Setup { .. })));
    }

    #[test]
    fn test_show_config_json_roundtrip() {
        let config = yaml(SAMPLE_CONFIG);
        let text = show_config(&config, ConfigFormat::Json).unwrap();
        let back = parse_config(&text, ConfigFormat::Json).unwrap();
        assert_eq!(back, config);
    }
}
