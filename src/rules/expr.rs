//! Boolean and property-test expressions over process attributes.
//!
//! Expressions are owned trees. Property tests are type-checked when they
//! are built, so evaluation itself is total and never fails.

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::process::ProcAttr;

/// Number of addressable command line argument slots.
pub const MAX_ARGS: usize = 32;

/// A process attribute a rule can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    Binary,
    /// Positional argument, `0..MAX_ARGS`.
    Arg(u8),
    Cmdline,
    /// `"user"` or `"kernel"`.
    Type,
    /// Binary of the parent process.
    Parent,
    Euid,
    Egid,
    /// Reclassification round, zero unless re-evaluated after a delay.
    Reclassify,
}

/// Literal types a property test can compare against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Unsigned32,
    Signed32,
}

impl ValueType {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Unsigned32 => "unsigned 32-bit",
            ValueType::Signed32 => "signed 32-bit",
        }
    }
}

impl Property {
    pub fn value_type(self) -> ValueType {
        match self {
            Property::Binary
            | Property::Arg(_)
            | Property::Cmdline
            | Property::Type
            | Property::Parent => ValueType::String,
            Property::Euid | Property::Egid => ValueType::Unsigned32,
            Property::Reclassify => ValueType::Signed32,
        }
    }
}

impl FromStr for Property {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let prop = match s {
            "binary" => Property::Binary,
            "cmdline" => Property::Cmdline,
            "type" => Property::Type,
            "parent" => Property::Parent,
            "euid" => Property::Euid,
            "egid" => Property::Egid,
            "reclassify" => Property::Reclassify,
            _ => {
                let idx = s
                    .strip_prefix("arg")
                    .and_then(|n| n.parse::<u8>().ok())
                    .filter(|n| (*n as usize) < MAX_ARGS)
                    .ok_or_else(|| ConfigError::UnknownProperty(s.to_string()))?;
                Property::Arg(idx)
            }
        };
        Ok(prop)
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Property::Binary => f.write_str("binary"),
            Property::Arg(n) => write!(f, "arg{n}"),
            Property::Cmdline => f.write_str("cmdline"),
            Property::Type => f.write_str("type"),
            Property::Parent => f.write_str("parent"),
            Property::Euid => f.write_str("euid"),
            Property::Egid => f.write_str("egid"),
            Property::Reclassify => f.write_str("reclassify"),
        }
    }
}

/// Comparison operator of a property test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    /// Numeric less-than, lexicographic for strings.
    Lt,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
        })
    }
}

impl FromStr for CmpOp {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "==" | "eq" => Ok(CmpOp::Eq),
            "!=" | "ne" => Ok(CmpOp::Ne),
            "<" | "lt" => Ok(CmpOp::Lt),
            _ => Err(ConfigError::Invalid(format!("unknown operator '{s}'"))),
        }
    }
}

/// Typed literal of a property test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    U32(u32),
    S32(i32),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Str(_) => ValueType::String,
            Value::U32(_) => ValueType::Unsigned32,
            Value::S32(_) => ValueType::Signed32,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s:?}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::S32(v) => write!(f, "{v}"),
        }
    }
}

/// A resolved attribute value borrowed from a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field<'a> {
    Str(&'a str),
    U32(u32),
    S32(i32),
}

/// Attribute lookup used by the evaluator.
pub trait Attributes {
    fn field(&self, prop: Property) -> Option<Field<'_>>;
}

impl Attributes for ProcAttr {
    fn field(&self, prop: Property) -> Option<Field<'_>> {
        ProcAttr::field(self, prop)
    }
}

/// A type-checked `property <op> literal` test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropTest {
    prop: Property,
    op: CmpOp,
    value: Value,
}

impl PropTest {
    pub fn new(prop: Property, op: CmpOp, value: Value) -> Result<Self, ConfigError> {
        if prop.value_type() != value.value_type() {
            return Err(ConfigError::TypeMismatch {
                property: prop.to_string(),
                expected: prop.value_type().as_str(),
                found: value.to_string(),
            });
        }
        if let (Property::Type, Value::Str(s)) = (prop, &value) {
            if s != "user" && s != "kernel" {
                return Err(ConfigError::TypeMismatch {
                    property: prop.to_string(),
                    expected: "\"user\" or \"kernel\"",
                    found: value.to_string(),
                });
            }
        }
        Ok(Self { prop, op, value })
    }

    pub fn property(&self) -> Property {
        self.prop
    }

    pub fn op(&self) -> CmpOp {
        self.op
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    fn eval(&self, attrs: &dyn Attributes) -> bool {
        let Some(field) = attrs.field(self.prop) else {
            return false;
        };
        match (field, &self.value) {
            (Field::Str(a), Value::Str(b)) => compare(a, b.as_str(), self.op),
            (Field::U32(a), Value::U32(b)) => compare(&a, b, self.op),
            (Field::S32(a), Value::S32(b)) => compare(&a, b, self.op),
            _ => false,
        }
    }
}

fn compare<T: PartialOrd + ?Sized>(a: &T, b: &T, op: CmpOp) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Lt => a < b,
    }
}

/// Expression tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Prop(PropTest),
}

impl Expr {
    pub fn and(a: Expr, b: Expr) -> Expr {
        Expr::And(Box::new(a), Box::new(b))
    }

    pub fn or(a: Expr, b: Expr) -> Expr {
        Expr::Or(Box::new(a), Box::new(b))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(a: Expr) -> Expr {
        Expr::Not(Box::new(a))
    }

    /// Builds a type-checked property test.
    pub fn prop(prop: Property, op: CmpOp, value: Value) -> Result<Expr, ConfigError> {
        PropTest::new(prop, op, value).map(Expr::Prop)
    }

    /// Evaluates the expression. `And`/`Or` short-circuit left to right.
    pub fn eval(&self, attrs: &dyn Attributes) -> bool {
        match self {
            Expr::And(a, b) => a.eval(attrs) && b.eval(attrs),
            Expr::Or(a, b) => a.eval(attrs) || b.eval(attrs),
            Expr::Not(a) => !a.eval(attrs),
            Expr::Prop(test) => test.eval(attrs),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::And(a, b) => write!(f, "({a} && {b})"),
            Expr::Or(a, b) => write!(f, "({a} || {b})"),
            Expr::Not(a) => write!(f, "!{a}"),
            Expr::Prop(t) => write!(f, "{} {} {}", t.prop, t.op, t.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessType;
    use std::cell::Cell;

    fn attrs() -> ProcAttr {
        ProcAttr {
            pid: 42,
            binary: Some("/usr/bin/player".into()),
            kind: ProcessType::User,
            argv: Some(vec!["player".into(), "-q".into()]),
            euid: Some(1000),
            reclassify: 2,
            ..ProcAttr::new(42)
        }
    }

    fn test(prop: Property, op: CmpOp, value: Value) -> Expr {
        Expr::prop(prop, op, value).unwrap()
    }

    /// Attribute source that records every lookup and refuses `Parent`.
    struct Tripwire {
        lookups: Cell<usize>,
    }

    impl Attributes for Tripwire {
        fn field(&self, prop: Property) -> Option<Field<'_>> {
            self.lookups.set(self.lookups.get() + 1);
            match prop {
                Property::Parent => panic!("short-circuited operand was evaluated"),
                Property::Euid => Some(Field::U32(0)),
                _ => None,
            }
        }
    }

    // -------------------------------------------------------------------------
    // Property parsing and type checking
    // -------------------------------------------------------------------------

    #[test]
    fn test_property_from_str() {
        assert_eq!("binary".parse::<Property>().unwrap(), Property::Binary);
        assert_eq!("arg0".parse::<Property>().unwrap(), Property::Arg(0));
        assert_eq!("arg31".parse::<Property>().unwrap(), Property::Arg(31));
        assert!("arg32".parse::<Property>().is_err());
        assert!("argx".parse::<Property>().is_err());
        assert!("nice".parse::<Property>().is_err());
    }

    #[test]
    fn test_prop_test_rejects_type_mismatch() {
        let err = PropTest::new(Property::Euid, CmpOp::Eq, Value::Str("root".into()));
        assert!(matches!(err, Err(ConfigError::TypeMismatch { .. })));

        let err = PropTest::new(Property::Binary, CmpOp::Eq, Value::U32(1));
        assert!(matches!(err, Err(ConfigError::TypeMismatch { .. })));

        let err = PropTest::new(Property::Type, CmpOp::Eq, Value::Str("daemon".into()));
        assert!(matches!(err, Err(ConfigError::TypeMismatch { .. })));
    }

    // -------------------------------------------------------------------------
    // Evaluation
    // -------------------------------------------------------------------------

    #[test]
    fn test_string_operators() {
        let a = attrs();
        let bin = |op, s: &str| test(Property::Binary, op, Value::Str(s.into()));
        assert!(bin(CmpOp::Eq, "/usr/bin/player").eval(&a));
        assert!(!bin(CmpOp::Ne, "/usr/bin/player").eval(&a));
        assert!(bin(CmpOp::Lt, "/usr/bin/zzz").eval(&a));
        assert!(!bin(CmpOp::Lt, "/usr/bin/aaa").eval(&a));
    }

    #[test]
    fn test_numeric_operators() {
        let a = attrs();
        assert!(test(Property::Euid, CmpOp::Eq, Value::U32(1000)).eval(&a));
        assert!(test(Property::Euid, CmpOp::Lt, Value::U32(1001)).eval(&a));
        assert!(!test(Property::Euid, CmpOp::Lt, Value::U32(1000)).eval(&a));
        assert!(test(Property::Reclassify, CmpOp::Lt, Value::S32(3)).eval(&a));
        assert!(test(Property::Reclassify, CmpOp::Ne, Value::S32(0)).eval(&a));
    }

    #[test]
    fn test_unresolved_is_false_for_every_operator() {
        let a = attrs();
        for op in [CmpOp::Eq, CmpOp::Ne, CmpOp::Lt] {
            assert!(!test(Property::Egid, op, Value::U32(0)).eval(&a));
            assert!(!test(Property::Arg(5), op, Value::Str("x".into())).eval(&a));
        }
        // Negation is the way to express "not equal or absent".
        let absent = Expr::not(test(Property::Arg(5), CmpOp::Eq, Value::Str("x".into())));
        assert!(absent.eval(&a));
    }

    #[test]
    fn test_boolean_operators() {
        let a = attrs();
        let yes = || test(Property::Euid, CmpOp::Eq, Value::U32(1000));
        let no = || test(Property::Euid, CmpOp::Eq, Value::U32(0));
        assert!(Expr::and(yes(), yes()).eval(&a));
        assert!(!Expr::and(yes(), no()).eval(&a));
        assert!(Expr::or(no(), yes()).eval(&a));
        assert!(!Expr::or(no(), no()).eval(&a));
        assert!(Expr::not(no()).eval(&a));
    }

    #[test]
    fn test_and_or_short_circuit() {
        let src = Tripwire {
            lookups: Cell::new(0),
        };
        let parent = test(Property::Parent, CmpOp::Eq, Value::Str("/sbin/init".into()));
        let root = test(Property::Euid, CmpOp::Eq, Value::U32(0));
        let not_root = test(Property::Euid, CmpOp::Ne, Value::U32(0));

        assert!(!Expr::and(not_root, parent.clone()).eval(&src));
        assert!(Expr::or(root, parent).eval(&src));
        assert_eq!(src.lookups.get(), 2);
    }

    #[test]
    fn test_display() {
        let e = Expr::and(
            test(Property::Euid, CmpOp::Eq, Value::U32(0)),
            Expr::not(test(Property::Arg(1), CmpOp::Eq, Value::Str("-q".into()))),
        );
        assert_eq!(e.to_string(), "(euid == 0 && !arg1 == \"-q\")");
    }
}
