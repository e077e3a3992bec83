use core::fmt;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{AlertError, EvalError};

/// Scalar held by a [`MetricsContext`] or produced while evaluating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::Bool(_) => "bool",
        }
    }

    /// Zero, `NaN` and the empty string are false.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Text(s) => !s.is_empty(),
            Value::Bool(b) => *b,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Named metrics a condition may reference. Built fresh per symbol per cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsContext {
    fields: BTreeMap<String, Value>,
}

impl MetricsContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_symbol(symbol: impl Into<String>) -> Self {
        let mut ctx = Self::new();
        ctx.insert("symbol", Value::Text(symbol.into()));
        ctx
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn insert_number(&mut self, name: impl Into<String>, value: f64) -> &mut Self {
        self.insert(name, Value::Number(value))
    }

    pub fn insert_text(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.insert(name, Value::Text(value.into()))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_number)
    }

    pub fn symbol(&self) -> Option<&str> {
        self.get("symbol").and_then(Value::as_text)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        }
    }

    fn holds<T: PartialOrd + ?Sized>(self, a: &T, b: &T) -> bool {
        match self {
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl ArithOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Rem => "%",
        }
    }

    fn apply(self, a: f64, b: f64) -> Result<f64, EvalError> {
        Ok(match self {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => {
                if b == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                a / b
            }
            ArithOp::Rem => {
                if b == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                // Result takes the sign of the divisor.
                let r = a % b;
                if r != 0.0 && (r < 0.0) != (b < 0.0) {
                    r + b
                } else {
                    r
                }
            }
        })
    }
}

/// Built-in numeric functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Abs,
    Min,
    Max,
}

impl Func {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "abs" => Some(Func::Abs),
            "min" => Some(Func::Min),
            "max" => Some(Func::Max),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Func::Abs => "abs",
            Func::Min => "min",
            Func::Max => "max",
        }
    }

    /// Accepted argument count range.
    pub fn arity(self) -> (usize, usize) {
        match self {
            Func::Abs => (1, 1),
            Func::Min | Func::Max => (1, usize::MAX),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Bool(bool),
    Field(String),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Arith {
        op: ArithOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Cmp {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Call {
        func: Func,
        args: Vec<Expr>,
    },
}

fn number(v: Value, op: &'static str) -> Result<f64, EvalError> {
    match v {
        Value::Number(n) => Ok(n),
        other => Err(EvalError::TypeMismatch {
            op,
            lhs: other.type_name(),
            rhs: "number",
        }),
    }
}

fn compare(op: CmpOp, a: &Value, b: &Value) -> Result<bool, EvalError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(op.holds(x, y)),
        (Value::Text(x), Value::Text(y)) => Ok(op.holds(x.as_str(), y.as_str())),
        (Value::Bool(x), Value::Bool(y)) => Ok(op.holds(x, y)),
        // Values of different types are never equal and have no order.
        _ => match op {
            CmpOp::Eq => Ok(false),
            CmpOp::Ne => Ok(true),
            _ => Err(EvalError::TypeMismatch {
                op: op.symbol(),
                lhs: a.type_name(),
                rhs: b.type_name(),
            }),
        },
    }
}

impl Expr {
    pub fn eval(&self, ctx: &MetricsContext) -> Result<Value, EvalError> {
        match self {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Text(s) => Ok(Value::Text(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Field(name) => ctx
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::UnknownField(name.clone())),
            Expr::Neg(e) => Ok(Value::Number(-number(e.eval(ctx)?, "-")?)),
            Expr::Not(e) => Ok(Value::Bool(!e.eval(ctx)?.truthy())),
            Expr::Arith { op, lhs, rhs } => {
                let a = lhs.eval(ctx)?;
                let b = rhs.eval(ctx)?;
                match (&a, &b) {
                    (Value::Number(x), Value::Number(y)) => Ok(Value::Number(op.apply(*x, *y)?)),
                    _ => Err(EvalError::TypeMismatch {
                        op: op.symbol(),
                        lhs: a.type_name(),
                        rhs: b.type_name(),
                    }),
                }
            }
            Expr::Cmp { op, lhs, rhs } => {
                let a = lhs.eval(ctx)?;
                let b = rhs.eval(ctx)?;
                Ok(Value::Bool(compare(*op, &a, &b)?))
            }
            Expr::And(l, r) => {
                if !l.eval(ctx)?.truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(r.eval(ctx)?.truthy()))
            }
            Expr::Or(l, r) => {
                if l.eval(ctx)?.truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(r.eval(ctx)?.truthy()))
            }
            Expr::Call { func, args } => {
                let mut nums = Vec::with_capacity(args.len());
                for a in args {
                    nums.push(number(a.eval(ctx)?, func.name())?);
                }
                let out = match func {
                    Func::Abs => nums.first().map_or(f64::NAN, |n| n.abs()),
                    Func::Min => nums.iter().copied().fold(f64::INFINITY, f64::min),
                    Func::Max => nums.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                };
                Ok(Value::Number(out))
            }
        }
    }

    fn collect_fields<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Number(_) | Expr::Text(_) | Expr::Bool(_) => {}
            Expr::Field(name) => {
                out.insert(name.as_str());
            }
            Expr::Neg(e) | Expr::Not(e) => e.collect_fields(out),
            Expr::Arith { lhs, rhs, .. } | Expr::Cmp { lhs, rhs, .. } => {
                lhs.collect_fields(out);
                rhs.collect_fields(out);
            }
            Expr::And(l, r) | Expr::Or(l, r) => {
                l.collect_fields(out);
                r.collect_fields(out);
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| a.collect_fields(out)),
        }
    }
}

/// A parsed alert condition, kept together with its source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, AlertError> {
        let expr = super::parser::parse_expr(source).map_err(|reason| AlertError::InvalidCondition {
            source_text: source.to_string(),
            reason,
        })?;
        Ok(Self {
            source: source.trim().to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Truthiness of the condition against `ctx`.
    pub fn evaluate(&self, ctx: &MetricsContext) -> Result<bool, EvalError> {
        Ok(self.expr.eval(ctx)?.truthy())
    }

    /// Field names the condition reads.
    pub fn fields(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.expr.collect_fields(&mut out);
        out
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl TryFrom<String> for Condition {
    type Error = AlertError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Condition::parse(&s)
    }
}

impl From<Condition> for String {
    fn from(c: Condition) -> Self {
        c.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> MetricsContext {
        let mut c = MetricsContext::for_symbol("btcusdt");
        c.insert_number("zscore", 2.5)
            .insert_number("price", 50_000.0)
            .insert_number("volatility", f64::NAN);
        c
    }

    fn eval(src: &str) -> Result<bool, EvalError> {
        Condition::parse(src).unwrap().evaluate(&ctx())
    }

    #[test]
    fn comparisons_and_connectives() {
        assert_eq!(eval("zscore > 2"), Ok(true));
        assert_eq!(eval("zscore < -2"), Ok(false));
        assert_eq!(eval("zscore > 2 and price >= 50000"), Ok(true));
        assert_eq!(eval("zscore > 3 or symbol == 'btcusdt'"), Ok(true));
        assert_eq!(eval("not zscore > 2"), Ok(false));
        assert_eq!(eval("!(zscore > 2) || price != 50000"), Ok(false));
        assert_eq!(eval("zscore > 2 AND symbol == \"ethusdt\""), Ok(false));
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(eval("price / 1000 - 2 * 5 == 40"), Ok(true));
        assert_eq!(eval("(zscore + 0.5) * 2 == 6"), Ok(true));
        assert_eq!(eval("-7 % 3 == 2"), Ok(true));
        assert_eq!(eval("abs(-zscore) > 2 and max(1, zscore, 2) == 2.5"), Ok(true));
    }

    #[test]
    fn nan_is_false() {
        assert_eq!(eval("volatility > 0"), Ok(false));
        assert_eq!(eval("volatility < 0"), Ok(false));
        assert_eq!(eval("volatility"), Ok(false));
    }

    #[test]
    fn double_not_coerces_to_bool() {
        assert_eq!(eval("(not not price) == true"), Ok(true));
        assert_eq!(eval("(not not volatility) == false"), Ok(true));
        assert_eq!(eval("not not zscore > 2"), Ok(true));
    }

    #[test]
    fn runtime_errors() {
        assert_eq!(eval("spread > 1"), Err(EvalError::UnknownField("spread".into())));
        assert_eq!(eval("price / 0 > 1"), Err(EvalError::DivisionByZero));
        assert!(matches!(eval("symbol > 1"), Err(EvalError::TypeMismatch { .. })));
        assert_eq!(eval("symbol == 1"), Ok(false));
        // Short-circuit skips the unknown field.
        assert_eq!(eval("zscore < 0 and spread > 1"), Ok(false));
    }

    #[test]
    fn fields_and_serde() {
        let c = Condition::parse("zscore > 2 and abs(price - last) > 10").unwrap();
        let fields: Vec<&str> = c.fields().into_iter().collect();
        assert_eq!(fields, vec!["last", "price", "zscore"]);

        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "\"zscore > 2 and abs(price - last) > 10\"");
        let back: Condition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
        assert!(serde_json::from_str::<Condition>("\"zscore >\"").is_err());
    }
}
