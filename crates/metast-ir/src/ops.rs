//! Operators and their pinned semantics
//!
//! Typing rules and evaluation for unary, binary, comparison and cast
//! operators live here so constant folding, the reference interpreter and
//! the bytecode VM all compute exactly the same results.
//!
//! - `i32` / `i64`: two's complement, wrapping; shift amounts are masked to
//!   the bit width; division or remainder by zero is an error.
//! - `f64`: IEEE-754 double.
//! - casts: widening is exact, narrowing wraps, float to int saturates
//!   (NaN becomes 0).

use crate::types::{Shape, Type};
use crate::value::Value;
use metast_error::{BuildError, Result, RuntimeError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unary operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    /// Arithmetic negation
    Neg,
    /// Logical negation
    Not,
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }

    pub fn result_type(&self, operand: &Type) -> Result<Type> {
        match self {
            UnaryOp::Neg if operand.is_numeric() => Ok(operand.clone()),
            UnaryOp::Neg => Err(BuildError::mismatch("unary `-`", "numeric type", operand)),
            UnaryOp::Not if operand.is_bool() => Ok(operand.clone()),
            UnaryOp::Not => Err(BuildError::mismatch("unary `!`", "bool", operand)),
        }
    }

    pub fn apply(&self, v: &Value) -> std::result::Result<Value, RuntimeError> {
        match (self, v) {
            (UnaryOp::Neg, Value::I32(a)) => Ok(Value::I32(a.wrapping_neg())),
            (UnaryOp::Neg, Value::I64(a)) => Ok(Value::I64(a.wrapping_neg())),
            (UnaryOp::Neg, Value::F64(a)) => Ok(Value::F64(-a)),
            (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
            _ => Err(operand_error(self.symbol(), v)),
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Neg => write!(f, "neg"),
            UnaryOp::Not => write!(f, "not"),
        }
    }
}

/// Binary operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    // Bitwise
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    // Logical (short-circuit)
    And,
    Or,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 12] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Rem,
        BinaryOp::BitAnd,
        BinaryOp::BitOr,
        BinaryOp::BitXor,
        BinaryOp::Shl,
        BinaryOp::Shr,
        BinaryOp::And,
        BinaryOp::Or,
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    /// Parses an operator symbol (`"+"`, `"<<"`, `"&&"`, ...)
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.symbol() == symbol)
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(self, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem)
    }

    pub fn is_bitwise(&self) -> bool {
        matches!(
            self,
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    /// Typing rule
    pub fn result_type(&self, lhs: &Type, rhs: &Type) -> Result<Type> {
        let context = format!("binary `{}`", self.symbol());
        if self.is_arithmetic() {
            let accepts = lhs.is_numeric() || (*self == BinaryOp::Add && lhs.is_str());
            if !accepts {
                return Err(BuildError::mismatch(context, "numeric type", lhs));
            }
        } else if self.is_bitwise() {
            if !lhs.is_integer() {
                return Err(BuildError::mismatch(context, "integer type", lhs));
            }
        } else if !lhs.is_bool() {
            return Err(BuildError::mismatch(context, "bool", lhs));
        }
        if lhs != rhs {
            return Err(BuildError::mismatch(context, lhs, rhs));
        }
        Ok(lhs.clone())
    }

    /// Evaluates the operator on two values of its operand type
    pub fn apply(&self, lhs: &Value, rhs: &Value) -> std::result::Result<Value, RuntimeError> {
        use BinaryOp::*;
        let value = match (self, lhs, rhs) {
            (Add, Value::I32(a), Value::I32(b)) => Value::I32(a.wrapping_add(*b)),
            (Sub, Value::I32(a), Value::I32(b)) => Value::I32(a.wrapping_sub(*b)),
            (Mul, Value::I32(a), Value::I32(b)) => Value::I32(a.wrapping_mul(*b)),
            (Div, Value::I32(_), Value::I32(0)) | (Rem, Value::I32(_), Value::I32(0)) => {
                return Err(RuntimeError::DivisionByZero)
            }
            (Div, Value::I32(a), Value::I32(b)) => Value::I32(a.wrapping_div(*b)),
            (Rem, Value::I32(a), Value::I32(b)) => Value::I32(a.wrapping_rem(*b)),
            (BitAnd, Value::I32(a), Value::I32(b)) => Value::I32(a & b),
            (BitOr, Value::I32(a), Value::I32(b)) => Value::I32(a | b),
            (BitXor, Value::I32(a), Value::I32(b)) => Value::I32(a ^ b),
            (Shl, Value::I32(a), Value::I32(b)) => Value::I32(a.wrapping_shl(*b as u32)),
            (Shr, Value::I32(a), Value::I32(b)) => Value::I32(a.wrapping_shr(*b as u32)),

            (Add, Value::I64(a), Value::I64(b)) => Value::I64(a.wrapping_add(*b)),
            (Sub, Value::I64(a), Value::I64(b)) => Value::I64(a.wrapping_sub(*b)),
            (Mul, Value::I64(a), Value::I64(b)) => Value::I64(a.wrapping_mul(*b)),
            (Div, Value::I64(_), Value::I64(0)) | (Rem, Value::I64(_), Value::I64(0)) => {
                return Err(RuntimeError::DivisionByZero)
            }
            (Div, Value::I64(a), Value::I64(b)) => Value::I64(a.wrapping_div(*b)),
            (Rem, Value::I64(a), Value::I64(b)) => Value::I64(a.wrapping_rem(*b)),
            (BitAnd, Value::I64(a), Value::I64(b)) => Value::I64(a & b),
            (BitOr, Value::I64(a), Value::I64(b)) => Value::I64(a | b),
            (BitXor, Value::I64(a), Value::I64(b)) => Value::I64(a ^ b),
            (Shl, Value::I64(a), Value::I64(b)) => Value::I64(a.wrapping_shl(*b as u32)),
            (Shr, Value::I64(a), Value::I64(b)) => Value::I64(a.wrapping_shr(*b as u32)),

            (Add, Value::F64(a), Value::F64(b)) => Value::F64(a + b),
            (Sub, Value::F64(a), Value::F64(b)) => Value::F64(a - b),
            (Mul, Value::F64(a), Value::F64(b)) => Value::F64(a * b),
            (Div, Value::F64(a), Value::F64(b)) => Value::F64(a / b),
            (Rem, Value::F64(a), Value::F64(b)) => Value::F64(a % b),

            (Add, Value::Str(a), Value::Str(b)) => Value::Str(format!("{}{}", a, b)),

            (And, Value::Bool(a), Value::Bool(b)) => Value::Bool(*a && *b),
            (Or, Value::Bool(a), Value::Bool(b)) => Value::Bool(*a || *b),

            _ => {
                return Err(RuntimeError::Malformed(format!(
                    "operator `{}` applied to {} and {}",
                    self.symbol(),
                    lhs.ty(),
                    rhs.ty()
                )))
            }
        };
        Ok(value)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOp::Add => write!(f, "add"),
            BinaryOp::Sub => write!(f, "sub"),
            BinaryOp::Mul => write!(f, "mul"),
            BinaryOp::Div => write!(f, "div"),
            BinaryOp::Rem => write!(f, "rem"),
            BinaryOp::BitAnd => write!(f, "bitand"),
            BinaryOp::BitOr => write!(f, "bitor"),
            BinaryOp::BitXor => write!(f, "bitxor"),
            BinaryOp::Shl => write!(f, "shl"),
            BinaryOp::Shr => write!(f, "shr"),
            BinaryOp::And => write!(f, "and"),
            BinaryOp::Or => write!(f, "or"),
        }
    }
}

/// Comparison operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub const ALL: [CompareOp; 6] = [
        CompareOp::Eq,
        CompareOp::Ne,
        CompareOp::Lt,
        CompareOp::Le,
        CompareOp::Gt,
        CompareOp::Ge,
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.symbol() == symbol)
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, CompareOp::Eq | CompareOp::Ne)
    }

    /// Typing rule
    pub fn result_type(&self, lhs: &Type, rhs: &Type) -> Result<Type> {
        let context = format!("comparison `{}`", self.symbol());
        if lhs.is_function() {
            return Err(BuildError::mismatch(context, "comparable type", lhs));
        }
        if !self.is_equality() && !(lhs.is_numeric() || lhs.is_str()) {
            return Err(BuildError::mismatch(context, "numeric or str", lhs));
        }
        if lhs != rhs {
            return Err(BuildError::mismatch(context, lhs, rhs));
        }
        Ok(Type::bool())
    }

    pub fn apply(&self, lhs: &Value, rhs: &Value) -> std::result::Result<Value, RuntimeError> {
        use std::cmp::Ordering;
        let ordering = match (lhs, rhs) {
            (Value::Unit, Value::Unit) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::I32(a), Value::I32(b)) => Some(a.cmp(b)),
            (Value::I64(a), Value::I64(b)) => Some(a.cmp(b)),
            // IEEE: NaN is unordered
            (Value::F64(a), Value::F64(b)) => a.partial_cmp(b),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => {
                return Err(RuntimeError::Malformed(format!(
                    "comparison `{}` applied to {} and {}",
                    self.symbol(),
                    lhs.ty(),
                    rhs.ty()
                )))
            }
        };
        let result = match (self, ordering) {
            (CompareOp::Ne, None) => true,
            (_, None) => false,
            (CompareOp::Eq, Some(o)) => o == Ordering::Equal,
            (CompareOp::Ne, Some(o)) => o != Ordering::Equal,
            (CompareOp::Lt, Some(o)) => o == Ordering::Less,
            (CompareOp::Le, Some(o)) => o != Ordering::Greater,
            (CompareOp::Gt, Some(o)) => o == Ordering::Greater,
            (CompareOp::Ge, Some(o)) => o != Ordering::Less,
        };
        Ok(Value::Bool(result))
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareOp::Eq => write!(f, "eq"),
            CompareOp::Ne => write!(f, "ne"),
            CompareOp::Lt => write!(f, "lt"),
            CompareOp::Le => write!(f, "le"),
            CompareOp::Gt => write!(f, "gt"),
            CompareOp::Ge => write!(f, "ge"),
        }
    }
}

/// Typing rule of a numeric cast
pub fn cast_type(from: &Type, to: &Type) -> Result<Type> {
    if !from.is_numeric() {
        return Err(BuildError::mismatch("cast", "numeric type", from));
    }
    if !to.is_numeric() {
        return Err(BuildError::mismatch("cast target", "numeric type", to));
    }
    Ok(to.clone())
}

/// Converts a numeric value to the structural shape of `to`
pub fn cast_value(v: &Value, to: &Type) -> std::result::Result<Value, RuntimeError> {
    let value = match (v, to.resolved().shape()) {
        (Value::I32(a), Shape::I32) => Value::I32(*a),
        (Value::I32(a), Shape::I64) => Value::I64(*a as i64),
        (Value::I32(a), Shape::F64) => Value::F64(*a as f64),
        (Value::I64(a), Shape::I32) => Value::I32(*a as i32),
        (Value::I64(a), Shape::I64) => Value::I64(*a),
        (Value::I64(a), Shape::F64) => Value::F64(*a as f64),
        // `as` saturates and maps NaN to 0
        (Value::F64(a), Shape::I32) => Value::I32(*a as i32),
        (Value::F64(a), Shape::I64) => Value::I64(*a as i64),
        (Value::F64(a), Shape::F64) => Value::F64(*a),
        _ => {
            return Err(RuntimeError::Malformed(format!("cannot cast {} to {}", v.ty(), to)))
        }
    };
    Ok(value)
}

fn operand_error(symbol: &str, v: &Value) -> RuntimeError {
    RuntimeError::Malformed(format!("operator `{}` applied to {}", symbol, v.ty()))
}
