//! Literal and runtime values

use crate::types::{Shape, Type};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A value: literal payload at construction time, result at run time
#[derive(Debug, Clone)]
pub enum Value {
    Unit,
    Bool(bool),
    I32(i32),
    I64(i64),
    F64(f64),
    Str(String),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// Structural type of the value
    pub fn ty(&self) -> Type {
        match self {
            Value::Unit => Type::unit(),
            Value::Bool(_) => Type::bool(),
            Value::I32(_) => Type::i32(),
            Value::I64(_) => Type::i64(),
            Value::F64(_) => Type::f64(),
            Value::Str(_) => Type::str(),
        }
    }

    /// Checks whether the value inhabits `ty` (named types by their shape)
    pub fn has_type(&self, ty: &Type) -> bool {
        matches!(
            (self, ty.resolved().shape()),
            (Value::Unit, Shape::Unit)
                | (Value::Bool(_), Shape::Bool)
                | (Value::I32(_), Shape::I32)
                | (Value::I64(_), Shape::I64)
                | (Value::F64(_), Shape::F64)
                | (Value::Str(_), Shape::Str)
        )
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I32(v) => Some(*v as i64),
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Whether this is the additive identity of its type
    pub fn is_zero(&self) -> bool {
        match self {
            Value::I32(v) => *v == 0,
            Value::I64(v) => *v == 0,
            // +0.0 only
            Value::F64(v) => v.to_bits() == 0,
            _ => false,
        }
    }

    /// Whether this is the multiplicative identity of its type
    pub fn is_one(&self) -> bool {
        match self {
            Value::I32(v) => *v == 1,
            Value::I64(v) => *v == 1,
            Value::F64(v) => *v == 1.0,
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            // Bit equality: literals must be Eq + Hash
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Unit => {}
            Value::Bool(b) => b.hash(state),
            Value::I32(v) => v.hash(state),
            Value::I64(v) => v.hash(state),
            Value::F64(v) => v.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::I32(v) => write!(f, "{}i32", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{:?}", v),
            Value::Str(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_display() {
        assert_eq!(Value::I64(7).to_string(), "7");
        assert_eq!(Value::I32(-3).to_string(), "-3i32");
        assert_eq!(Value::F64(1.5).to_string(), "1.5");
        assert_eq!(Value::F64(2.0).to_string(), "2.0");
        assert_eq!(Value::str("a\"b").to_string(), "\"a\\\"b\"");
        assert_eq!(Value::Unit.to_string(), "()");
    }

    #[test]
    fn test_float_bit_equality() {
        assert_eq!(Value::F64(f64::NAN), Value::F64(f64::NAN));
        assert_ne!(Value::F64(0.0), Value::F64(-0.0));
    }

    #[test]
    fn test_has_type() {
        assert!(Value::I32(1).has_type(&Type::i32()));
        assert!(!Value::I32(1).has_type(&Type::i64()));
        assert_eq!(Value::str("x").ty(), Type::str());
    }
}
