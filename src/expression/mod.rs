//! Package-matching predicates.
//!
//! An [`Expression`] is an immutable tree of constants, attribute getters and
//! operators. Evaluating it requires binding it to a [`Subject`] (usually a
//! package): [`Expression::bind`] returns a [`Bound`] view pairing the tree
//! with the subject, so one tree can be evaluated against any number of
//! candidates, from any number of threads, without being mutated.
//!
//! Trees are composed with the std operators (`&`, `|`, `!`, `-`, `+`, `*`,
//! `/`, `%`) and with the comparison builders ([`Expression::equals`],
//! [`Expression::less_than`], ...), or parsed from text with
//! [`Expression::parse`].

mod parser;

use std::cmp::Ordering;
use std::fmt;
use std::ops;

use thiserror::Error;

use crate::package::version::Version;

pub use parser::parse;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("invalid expression '{input}' at offset {offset}: {message}")]
    Parse {
        input: String,
        offset: usize,
        message: String,
    },

    #[error("unsupported operand types for '{op}': {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("unsupported operand type for '{op}': {operand}")]
    UnaryTypeMismatch {
        op: &'static str,
        operand: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow")]
    Overflow,
}

/// Reference to a package or product by identity. Equality only looks at `id`.
#[derive(Debug, Clone, Eq)]
pub struct EntityRef {
    pub id: usize,
    pub label: String,
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Version(Version),
    Package(EntityRef),
    Product(EntityRef),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Version(_) => "version",
            Value::Package(_) => "package",
            Value::Product(_) => "product",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Version(v) => !v.is_empty(),
            Value::Package(_) | Value::Product(_) => true,
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// Text used when a version is compared against a plain value.
    fn version_text(&self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s.clone()),
            Value::Int(n) => Some(n.to_string()),
            Value::Float(x) => Some(x.to_string()),
            _ => None,
        }
    }

    fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Version(a), Value::Version(b)) => Some(a.cmp(b)),
            (Value::Version(a), b) => b.version_text().map(|t| a.cmp(&Version::new(&t))),
            (a, Value::Version(b)) => a.version_text().map(|t| Version::new(&t).cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Package(a), Value::Package(b)) | (Value::Product(a), Value::Product(b)) => {
                a == b
            }
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }
}

/// A single-quoted literal the parser reads back unchanged.
fn quoted(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => f.write_str(&quoted(s)),
            Value::Version(v) => f.write_str(&quoted(&v.to_string())),
            Value::Package(r) | Value::Product(r) => f.write_str(&r.label),
        }
    }
}

/// Package attributes readable from an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Name,
    AbsoluteName,
    Label,
    AbsoluteLabel,
    Version,
    Category,
    Package,
    Product,
}

impl Attribute {
    pub const ALL: [Attribute; 8] = [
        Attribute::Name,
        Attribute::AbsoluteName,
        Attribute::Label,
        Attribute::AbsoluteLabel,
        Attribute::Version,
        Attribute::Category,
        Attribute::Package,
        Attribute::Product,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            Attribute::Name => "NAME",
            Attribute::AbsoluteName => "ABSOLUTE_NAME",
            Attribute::Label => "LABEL",
            Attribute::AbsoluteLabel => "ABSOLUTE_LABEL",
            Attribute::Version => "VERSION",
            Attribute::Category => "CATEGORY",
            Attribute::Package => "PACKAGE",
            Attribute::Product => "PRODUCT",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.keyword() == word)
    }
}

/// Anything an expression can be evaluated against.
pub trait Subject {
    fn attribute(&self, attribute: Attribute) -> Value;
    fn has_tag(&self, tag: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
    Abs,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Const(Value),
    Attribute(Attribute),
    HasTag(String),
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
}

pub const NAME: Expression = Expression::Attribute(Attribute::Name);
pub const ABSOLUTE_NAME: Expression = Expression::Attribute(Attribute::AbsoluteName);
pub const LABEL: Expression = Expression::Attribute(Attribute::Label);
pub const ABSOLUTE_LABEL: Expression = Expression::Attribute(Attribute::AbsoluteLabel);
pub const VERSION: Expression = Expression::Attribute(Attribute::Version);
pub const CATEGORY: Expression = Expression::Attribute(Attribute::Category);
pub const PACKAGE: Expression = Expression::Attribute(Attribute::Package);
pub const PRODUCT: Expression = Expression::Attribute(Attribute::Product);

impl Expression {
    pub fn parse(text: &str) -> Result<Self, ExpressionError> {
        parser::parse(text)
    }

    pub fn has_tag(tag: impl Into<String>) -> Self {
        Expression::HasTag(tag.into())
    }

    pub fn abs(self) -> Self {
        Expression::unary(UnaryOp::Abs, self)
    }

    fn binary(op: BinaryOp, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn unary(op: UnaryOp, operand: Expression) -> Self {
        Expression::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn equals(self, other: impl Into<Expression>) -> Self {
        Expression::binary(BinaryOp::Eq, self, other.into())
    }

    pub fn not_equals(self, other: impl Into<Expression>) -> Self {
        Expression::binary(BinaryOp::Ne, self, other.into())
    }

    pub fn less_than(self, other: impl Into<Expression>) -> Self {
        Expression::binary(BinaryOp::Lt, self, other.into())
    }

    pub fn less_equal(self, other: impl Into<Expression>) -> Self {
        Expression::binary(BinaryOp::Le, self, other.into())
    }

    pub fn greater_than(self, other: impl Into<Expression>) -> Self {
        Expression::binary(BinaryOp::Gt, self, other.into())
    }

    pub fn greater_equal(self, other: impl Into<Expression>) -> Self {
        Expression::binary(BinaryOp::Ge, self, other.into())
    }

    pub(crate) fn compose(op: BinaryOp, left: Expression, right: Expression) -> Self {
        Expression::binary(op, left, right)
    }

    pub(crate) fn compose_unary(op: UnaryOp, operand: Expression) -> Self {
        Expression::unary(op, operand)
    }

    /// Pair this tree with a subject for evaluation.
    pub fn bind<'a>(&'a self, subject: &'a dyn Subject) -> Bound<'a> {
        Bound {
            expression: self,
            subject,
        }
    }
}

/// An expression bound to the subject it is evaluated against.
#[derive(Clone, Copy)]
pub struct Bound<'a> {
    expression: &'a Expression,
    subject: &'a dyn Subject,
}

impl Bound<'_> {
    pub fn evaluate(&self) -> Result<Value, ExpressionError> {
        eval(self.expression, self.subject)
    }

    pub fn is_true(&self) -> Result<bool, ExpressionError> {
        Ok(self.evaluate()?.is_truthy())
    }
}

fn eval(expression: &Expression, subject: &dyn Subject) -> Result<Value, ExpressionError> {
    match expression {
        Expression::Const(value) => Ok(value.clone()),
        Expression::Attribute(attribute) => Ok(subject.attribute(*attribute)),
        Expression::HasTag(tag) => Ok(Value::Bool(subject.has_tag(tag))),
        Expression::Unary { op, operand } => eval_unary(*op, eval(operand, subject)?),
        Expression::Binary { op, left, right } => {
            let left = eval(left, subject)?;
            // short-circuit like the boolean operators of most languages
            match op {
                BinaryOp::And if !left.is_truthy() => return Ok(Value::Bool(false)),
                BinaryOp::Or if left.is_truthy() => return Ok(Value::Bool(true)),
                _ => {}
            }
            eval_binary(*op, left, eval(right, subject)?)
        }
    }
}

fn eval_unary(op: UnaryOp, value: Value) -> Result<Value, ExpressionError> {
    let mismatch = |op| ExpressionError::UnaryTypeMismatch {
        op,
        operand: value.type_name(),
    };
    match (op, &value) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.is_truthy())),
        (UnaryOp::Neg, Value::Int(n)) => n.checked_neg().map(Value::Int).ok_or(ExpressionError::Overflow),
        (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnaryOp::Pos, Value::Int(_) | Value::Float(_)) => Ok(value.clone()),
        (UnaryOp::Abs, Value::Int(n)) => n.checked_abs().map(Value::Int).ok_or(ExpressionError::Overflow),
        (UnaryOp::Abs, Value::Float(x)) => Ok(Value::Float(x.abs())),
        (UnaryOp::Neg, _) => Err(mismatch("-")),
        (UnaryOp::Pos, _) => Err(mismatch("+")),
        (UnaryOp::Abs, _) => Err(mismatch("abs")),
    }
}

fn eval_binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, ExpressionError> {
    let mismatch = || ExpressionError::TypeMismatch {
        op: op.symbol(),
        left: left.type_name(),
        right: right.type_name(),
    };
    let ordering = || left.compare(&right).ok_or_else(mismatch);
    match op {
        BinaryOp::And | BinaryOp::Or => Ok(Value::Bool(right.is_truthy())),
        BinaryOp::Eq => Ok(Value::Bool(left.loosely_equals(&right))),
        BinaryOp::Ne => Ok(Value::Bool(!left.loosely_equals(&right))),
        BinaryOp::Lt => Ok(Value::Bool(ordering()? == Ordering::Less)),
        BinaryOp::Le => Ok(Value::Bool(ordering()? != Ordering::Greater)),
        BinaryOp::Gt => Ok(Value::Bool(ordering()? == Ordering::Greater)),
        BinaryOp::Ge => Ok(Value::Bool(ordering()? != Ordering::Less)),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, &left, &right)?.ok_or_else(mismatch)
        }
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Option<Value>, ExpressionError> {
    if let (Value::Str(a), Value::Str(b), BinaryOp::Add) = (left, right, op) {
        return Ok(Some(Value::Str(format!("{}{}", a, b))));
    }
    if let (Value::Int(a), Value::Int(b)) = (left, right) {
        let value = match op {
            BinaryOp::Add => a.checked_add(*b),
            BinaryOp::Sub => a.checked_sub(*b),
            BinaryOp::Mul => a.checked_mul(*b),
            BinaryOp::Div | BinaryOp::Rem if *b == 0 => {
                return Err(ExpressionError::DivisionByZero);
            }
            BinaryOp::Div => a.checked_div(*b),
            BinaryOp::Rem => a.checked_rem(*b),
            _ => return Ok(None),
        };
        return value.map(|n| Some(Value::Int(n))).ok_or(ExpressionError::Overflow);
    }
    let (Some(a), Some(b)) = (left.as_float(), right.as_float()) else {
        return Ok(None);
    };
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => return Err(ExpressionError::DivisionByZero),
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => return Ok(None),
    };
    Ok(Some(Value::Float(value)))
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Const(value) => write!(f, "{}", value),
            Expression::Attribute(attribute) => f.write_str(attribute.keyword()),
            Expression::HasTag(tag) => write!(f, "HAS_TAG({})", quoted(tag)),
            Expression::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Expression::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "!{}", operand),
                UnaryOp::Neg => write!(f, "-{}", operand),
                UnaryOp::Pos => write!(f, "+{}", operand),
                UnaryOp::Abs => write!(f, "abs({})", operand),
            },
        }
    }
}

impl From<Value> for Expression {
    fn from(value: Value) -> Self {
        Expression::Const(value)
    }
}

impl From<&str> for Expression {
    fn from(s: &str) -> Self {
        Expression::Const(Value::Str(s.to_string()))
    }
}

impl From<String> for Expression {
    fn from(s: String) -> Self {
        Expression::Const(Value::Str(s))
    }
}

impl From<i64> for Expression {
    fn from(n: i64) -> Self {
        Expression::Const(Value::Int(n))
    }
}

impl From<i32> for Expression {
    fn from(n: i32) -> Self {
        Expression::Const(Value::Int(n.into()))
    }
}

impl From<f64> for Expression {
    fn from(x: f64) -> Self {
        Expression::Const(Value::Float(x))
    }
}

impl From<bool> for Expression {
    fn from(b: bool) -> Self {
        Expression::Const(Value::Bool(b))
    }
}

impl From<Version> for Expression {
    fn from(v: Version) -> Self {
        Expression::Const(Value::Version(v))
    }
}

macro_rules! binary_operator {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<T: Into<Expression>> ops::$trait<T> for Expression {
            type Output = Expression;

            fn $method(self, rhs: T) -> Expression {
                Expression::binary($op, self, rhs.into())
            }
        }
    };
}

binary_operator!(BitAnd, bitand, BinaryOp::And);
binary_operator!(BitOr, bitor, BinaryOp::Or);
binary_operator!(Add, add, BinaryOp::Add);
binary_operator!(Sub, sub, BinaryOp::Sub);
binary_operator!(Mul, mul, BinaryOp::Mul);
binary_operator!(Div, div, BinaryOp::Div);
binary_operator!(Rem, rem, BinaryOp::Rem);

impl ops::Not for Expression {
    type Output = Expression;

    fn not(self) -> Expression {
        Expression::unary(UnaryOp::Not, self)
    }
}

impl ops::Neg for Expression {
    type Output = Expression;

    fn neg(self) -> Expression {
        Expression::unary(UnaryOp::Neg, self)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal subject for evaluating trees without a catalog.
    pub(crate) struct FakePackage {
        pub name: &'static str,
        pub version: &'static str,
        pub category: &'static str,
        pub id: usize,
        pub product_id: usize,
        pub tags: Vec<&'static str>,
    }

    impl FakePackage {
        pub fn new(name: &'static str, version: &'static str) -> Self {
            FakePackage {
                name,
                version,
                category: "library",
                id: 1,
                product_id: 1,
                tags: Vec::new(),
            }
        }
    }

    impl Subject for FakePackage {
        fn attribute(&self, attribute: Attribute) -> Value {
            let label = format!("{}-{}", self.name, self.version);
            match attribute {
                Attribute::Name | Attribute::AbsoluteName => Value::Str(self.name.into()),
                Attribute::Label | Attribute::AbsoluteLabel => Value::Str(label),
                Attribute::Version => Value::Version(Version::new(self.version)),
                Attribute::Category => Value::Str(self.category.into()),
                Attribute::Package => Value::Package(EntityRef { id: self.id, label }),
                Attribute::Product => Value::Product(EntityRef {
                    id: self.product_id,
                    label: self.name.into(),
                }),
            }
        }

        fn has_tag(&self, tag: &str) -> bool {
            self.tags.contains(&tag)
        }
    }

    fn truth(expression: &Expression, subject: &FakePackage) -> bool {
        expression.bind(subject).is_true().unwrap()
    }

    #[test]
    fn test_display_is_parenthesized_infix() {
        let e = NAME.equals("foo");
        assert_eq!(e.to_string(), "(NAME == 'foo')");

        let e = NAME.equals("foo") & VERSION.greater_equal("1.2");
        assert_eq!(e.to_string(), "((NAME == 'foo') & (VERSION >= '1.2'))");

        let e = !Expression::has_tag("mpi") | CATEGORY.not_equals("compiler");
        assert_eq!(e.to_string(), "(!HAS_TAG('mpi') | (CATEGORY != 'compiler'))");
    }

    #[test]
    fn test_version_attribute_uses_version_ordering() {
        let pkg = FakePackage::new("gcc", "1.10");
        // string ordering would put "1.10" before "1.9"
        assert!(truth(&VERSION.greater_than("1.9"), &pkg));
        assert!(!truth(&VERSION.equals("1.10.0"), &pkg));
        assert!(truth(&VERSION.equals("1-10"), &pkg));
    }

    #[test]
    fn test_same_tree_reused_across_candidates() {
        let expr = NAME.equals("alfa") & VERSION.less_than("2");
        let a1 = FakePackage::new("alfa", "1.0");
        let a3 = FakePackage::new("alfa", "3.0");
        let b1 = FakePackage::new("beta", "1.0");

        for _ in 0..3 {
            assert!(truth(&expr, &a1));
            assert!(!truth(&expr, &a3));
            assert!(!truth(&expr, &b1));
        }
    }

    #[test]
    fn test_identity_attributes() {
        let mut pkg = FakePackage::new("alfa", "1.0");
        pkg.id = 7;
        let same = Expression::Const(Value::Package(EntityRef {
            id: 7,
            label: "other-label".into(),
        }));
        let other = Expression::Const(Value::Package(EntityRef {
            id: 8,
            label: "alfa-1.0".into(),
        }));
        assert!(truth(&PACKAGE.equals(same), &pkg));
        assert!(!truth(&PACKAGE.equals(other), &pkg));
    }

    #[test]
    fn test_has_tag_and_arithmetic() {
        let mut pkg = FakePackage::new("openmpi", "1.6");
        pkg.tags.push("mpi");
        assert!(truth(&Expression::has_tag("mpi"), &pkg));
        assert!(!truth(&Expression::has_tag("gpu"), &pkg));

        let e = (Expression::from(7) % 4 + 1).equals(4);
        assert!(truth(&e, &pkg));
        let e = (-Expression::from(3)).abs().equals(3);
        assert!(truth(&e, &pkg));
    }

    #[test]
    fn test_type_errors_are_reported() {
        let pkg = FakePackage::new("alfa", "1.0");
        let err = (NAME - 1).bind(&pkg).evaluate().unwrap_err();
        assert!(matches!(err, ExpressionError::TypeMismatch { op: "-", .. }));

        let err = (Expression::from(1) / 0).bind(&pkg).evaluate().unwrap_err();
        assert_eq!(err, ExpressionError::DivisionByZero);
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        let pkg = FakePackage::new("alfa", "1.0");
        for e in [
            -Expression::from(i64::MIN),
            Expression::from(i64::MIN).abs(),
            Expression::from(i64::MAX) + 1,
            Expression::from(i64::MIN) / -1,
        ] {
            assert_eq!(e.bind(&pkg).evaluate().unwrap_err(), ExpressionError::Overflow);
        }
    }

    #[test]
    fn test_mismatched_types_are_unequal() {
        let pkg = FakePackage::new("alfa", "1.0");
        assert!(!truth(&NAME.equals(1), &pkg));
        assert!(truth(&NAME.not_equals(1), &pkg));
    }
}
