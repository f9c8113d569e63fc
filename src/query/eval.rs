//! Expression evaluation
//!
//! Evaluates select-list arithmetic and WHERE conditions one row at a time.
//! Any arithmetic or comparison touching a null yields null; conditions
//! treat null as false.

use std::cmp::Ordering;

use crate::model::Value;
use crate::query::ast::{BinaryOp, Call, Expr};

/// Resolves names and calls for one row
pub trait Valuer {
    /// Value of a field or tag reference
    fn value(&self, name: &str) -> Option<Value>;

    /// Value of a call already computed for this row
    fn call(&self, _call: &Call) -> Option<Value> {
        None
    }
}

/// Evaluate an expression against a row
pub fn eval(expr: &Expr, valuer: &dyn Valuer) -> Value {
    match expr {
        Expr::VarRef(name) => valuer.value(name).unwrap_or_default(),
        Expr::Call(call) => valuer.call(call).unwrap_or_default(),
        Expr::Paren(inner) => eval(inner, valuer),
        Expr::Binary(b) => {
            if matches!(b.op, BinaryOp::EqRegex | BinaryOp::NeqRegex) {
                return eval_regex(b.op, &b.lhs, &b.rhs, valuer);
            }
            let lhs = eval(&b.lhs, valuer);
            let rhs = eval(&b.rhs, valuer);
            eval_binary(b.op, lhs, rhs)
        }
        Expr::Regex(_) | Expr::Wildcard => Value::Null,
        literal => literal.literal().unwrap_or_default(),
    }
}

/// Evaluate a condition; anything but `true` rejects the row
pub fn eval_condition(expr: &Expr, valuer: &dyn Valuer) -> bool {
    eval(expr, valuer) == Value::Boolean(true)
}

fn eval_regex(op: BinaryOp, lhs: &Expr, rhs: &Expr, valuer: &dyn Valuer) -> Value {
    let Expr::Regex(re) = rhs else {
        return Value::Null;
    };
    let lhs = eval(lhs, valuer);
    let Some(s) = lhs.as_str() else {
        return Value::Null;
    };
    let matched = re.is_match(s);
    Value::Boolean(if op == BinaryOp::EqRegex { matched } else { !matched })
}

/// Apply a binary operator to two evaluated operands
pub fn eval_binary(op: BinaryOp, lhs: Value, rhs: Value) -> Value {
    match op {
        BinaryOp::And | BinaryOp::Or => {
            let l = lhs == Value::Boolean(true);
            let r = rhs == Value::Boolean(true);
            return Value::Boolean(if op == BinaryOp::And { l && r } else { l || r });
        }
        _ => {}
    }
    if lhs.is_null() || rhs.is_null() {
        return Value::Null;
    }

    if op.is_arithmetic() {
        return arithmetic(op, &lhs, &rhs);
    }

    let ordering = match (&lhs, &rhs) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        (a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    let Some(ordering) = ordering else {
        return match op {
            BinaryOp::Neq => Value::Boolean(true),
            _ => Value::Boolean(false),
        };
    };
    let result = match op {
        BinaryOp::Eq => ordering == Ordering::Equal,
        BinaryOp::Neq => ordering != Ordering::Equal,
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::Lte => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::Gte => ordering != Ordering::Less,
        _ => return Value::Null,
    };
    Value::Boolean(result)
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
    if let (Value::Integer(a), Value::Integer(b)) = (lhs, rhs) {
        return match op {
            BinaryOp::Add => Value::Integer(a.wrapping_add(*b)),
            BinaryOp::Sub => Value::Integer(a.wrapping_sub(*b)),
            BinaryOp::Mul => Value::Integer(a.wrapping_mul(*b)),
            _ if *b == 0 => Value::Null,
            _ => Value::Float(*a as f64 / *b as f64),
        };
    }
    let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
        return Value::Null;
    };
    match op {
        BinaryOp::Add => Value::Float(a + b),
        BinaryOp::Sub => Value::Float(a - b),
        BinaryOp::Mul => Value::Float(a * b),
        _ if b == 0.0 => Value::Null,
        _ => Value::Float(a / b),
    }
}
