//! Process definitions and the rule table.
//!
//! A process definition ("procdef") binds a binary path to an ordered list
//! of conditional statements. The first statement whose condition holds
//! decides the command.

use ahash::AHashMap as HashMap;
use std::fmt;

use super::expr::{Attributes, Expr};
use crate::error::ConfigError;

/// What to do with a process once a statement matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Assign the process to the named group.
    Group(String),
    /// Leave the process alone from now on.
    Ignore,
    /// Evaluate the rules again after `delay_ms` milliseconds.
    Reclassify { delay_ms: u32 },
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Group(name) => write!(f, "group {name}"),
            Command::Ignore => f.write_str("ignore"),
            Command::Reclassify { delay_ms } => write!(f, "reclassify-after {delay_ms}"),
        }
    }
}

/// A conditional command. A statement without a condition always matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub expr: Option<Expr>,
    pub command: Command,
}

impl Statement {
    pub fn when(expr: Expr, command: Command) -> Self {
        Self {
            expr: Some(expr),
            command,
        }
    }

    pub fn always(command: Command) -> Self {
        Self {
            expr: None,
            command,
        }
    }

    fn matches(&self, attrs: &dyn Attributes) -> bool {
        self.expr.as_ref().map_or(true, |e| e.eval(attrs))
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.expr {
            Some(expr) => write!(f, "{expr} => {}", self.command),
            None => write!(f, "{}", self.command),
        }
    }
}

/// Classification rule for one binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Procdef {
    /// Binary path, or `"*"` for the fallback rule.
    pub binary: String,
    /// Legacy nice adjustment, zero when unused.
    pub renice: i32,
    pub statements: Vec<Statement>,
}

impl Procdef {
    pub fn new(binary: impl Into<String>, statements: Vec<Statement>) -> Self {
        Self {
            binary: binary.into(),
            renice: 0,
            statements,
        }
    }

    /// Walks the statements in order and returns the first matching command,
    /// or `None` when nothing matched.
    pub fn eval(&self, attrs: &dyn Attributes) -> Option<&Command> {
        self.statements
            .iter()
            .find(|stmt| stmt.matches(attrs))
            .map(|stmt| &stmt.command)
    }
}

impl fmt::Display for Procdef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.binary)?;
        if self.renice != 0 {
            writeln!(f, "    renice {}", self.renice)?;
        }
        for stmt in &self.statements {
            writeln!(f, "    {stmt}")?;
        }
        Ok(())
    }
}

/// Evaluates `procdef` against a snapshot.
pub fn rule_eval<'a>(procdef: &'a Procdef, attrs: &dyn Attributes) -> Option<&'a Command> {
    procdef.eval(attrs)
}

/// Binary-keyed procdefs plus an optional fallback.
#[derive(Debug, Default)]
pub struct RuleTable {
    rules: HashMap<String, Procdef>,
    fallback: Option<Procdef>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a keyed rule. A duplicate binary is rejected and the existing
    /// rule is kept.
    pub fn insert(&mut self, procdef: Procdef) -> Result<(), ConfigError> {
        if self.rules.contains_key(&procdef.binary) {
            return Err(ConfigError::Duplicate {
                kind: "rule",
                name: procdef.binary,
            });
        }
        self.rules.insert(procdef.binary.clone(), procdef);
        Ok(())
    }

    /// Installs the fallback rule, returning the one it replaced.
    pub fn set_fallback(&mut self, procdef: Procdef) -> Option<Procdef> {
        self.fallback.replace(procdef)
    }

    pub fn fallback(&self) -> Option<&Procdef> {
        self.fallback.as_ref()
    }

    /// Exact match on the binary path, else the fallback, else `None`.
    pub fn lookup(&self, binary: &str) -> Option<&Procdef> {
        self.rules.get(binary).or(self.fallback.as_ref())
    }

    pub fn remove(&mut self, binary: &str) -> Option<Procdef> {
        self.rules.remove(binary)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Keyed rules sorted by binary path.
    pub fn sorted(&self) -> Vec<&Procdef> {
        let mut rules: Vec<&Procdef> = self.rules.values().collect();
        rules.sort_by(|a, b| a.binary.cmp(&b.binary));
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcAttr;
    use crate::rules::{CmpOp, Property, Value};

    fn euid_is(uid: u32) -> Expr {
        Expr::prop(Property::Euid, CmpOp::Eq, Value::U32(uid)).unwrap()
    }

    fn attrs(euid: u32) -> ProcAttr {
        ProcAttr {
            euid: Some(euid),
            ..ProcAttr::new(1)
        }
    }

    #[test]
    fn test_first_matching_statement_wins() {
        let def = Procdef::new(
            "/usr/bin/player",
            vec![
                Statement::when(euid_is(0), Command::Group("active".into())),
                Statement::always(Command::Group("standby".into())),
            ],
        );
        assert_eq!(def.eval(&attrs(0)), Some(&Command::Group("active".into())));
        assert_eq!(
            def.eval(&attrs(1000)),
            Some(&Command::Group("standby".into()))
        );
    }

    #[test]
    fn test_statement_order_matters() {
        let a = Statement::when(euid_is(0), Command::Ignore);
        let b = Statement::when(
            Expr::prop(Property::Euid, CmpOp::Lt, Value::U32(10)).unwrap(),
            Command::Reclassify { delay_ms: 100 },
        );
        let ab = Procdef::new("/bin/x", vec![a.clone(), b.clone()]);
        let ba = Procdef::new("/bin/x", vec![b, a]);
        assert_eq!(rule_eval(&ab, &attrs(0)), Some(&Command::Ignore));
        assert_eq!(
            rule_eval(&ba, &attrs(0)),
            Some(&Command::Reclassify { delay_ms: 100 })
        );
    }

    #[test]
    fn test_no_match() {
        let def = Procdef::new("/bin/x", vec![Statement::when(euid_is(0), Command::Ignore)]);
        assert_eq!(def.eval(&attrs(5)), None);
        assert_eq!(Procdef::new("/bin/y", vec![]).eval(&attrs(0)), None);
    }

    #[test]
    fn test_lookup_exact_then_fallback() {
        let mut table = RuleTable::new();
        assert!(table.lookup("/bin/sh").is_none());

        table
            .insert(Procdef::new("/bin/sh", vec![Statement::always(Command::Ignore)]))
            .unwrap();
        assert_eq!(table.lookup("/bin/sh").unwrap().binary, "/bin/sh");
        assert!(table.lookup("/bin/bash").is_none());

        table.set_fallback(Procdef::new("*", vec![]));
        assert_eq!(table.lookup("/bin/bash").unwrap().binary, "*");
        assert_eq!(table.lookup("/bin/sh").unwrap().binary, "/bin/sh");
    }

    #[test]
    fn test_duplicate_insert_keeps_existing() {
        let mut table = RuleTable::new();
        table
            .insert(Procdef::new("/bin/sh", vec![Statement::always(Command::Ignore)]))
            .unwrap();
        let err = table.insert(Procdef::new("/bin/sh", vec![]));
        assert!(matches!(err, Err(ConfigError::Duplicate { .. })));
        assert_eq!(table.lookup("/bin/sh").unwrap().statements.len(), 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_fallback_is_replaced() {
        let mut table = RuleTable::new();
        assert!(table.set_fallback(Procdef::new("*", vec![])).is_none());
        let old = table.set_fallback(Procdef::new(
            "*",
            vec![Statement::always(Command::Ignore)],
        ));
        assert!(old.unwrap().statements.is_empty());
        assert_eq!(table.fallback().unwrap().statements.len(), 1);
    }
}
