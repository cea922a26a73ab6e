//! Classification rule language: expressions, statements, procdefs.
//!
//! This module provides:
//! - `expr`: property tests and boolean expressions over attribute snapshots
//! - `procdef`: statements, commands, process definitions and the rule table

pub mod expr;
pub mod procdef;

pub use expr::{Attributes, CmpOp, Expr, Field, PropTest, Property, Value, ValueType, MAX_ARGS};
pub use procdef::{rule_eval, Command, Procdef, RuleTable, Statement};
