//! Type Registry
//!
//! Types are immutable, structurally compared values. A [`TypeRegistry`]
//! interns them per compilation session and owns the named types created
//! with [`TypeRegistry::define_type`].

use metast_error::{BuildError, Result};
use parking_lot::RwLock;
use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Shape of a value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Unit (no value)
    Unit,
    Bool,
    /// 32-bit two's complement integer, wrapping
    I32,
    /// 64-bit two's complement integer, wrapping
    I64,
    /// IEEE-754 double
    F64,
    /// Immutable UTF-8 string
    Str,
    Tuple(Vec<Type>),
    Function {
        params: Vec<Type>,
        ret: Type,
    },
    /// Nominal type created by `define_type`
    Named {
        name: String,
        underlying: Type,
    },
}

/// Interned, immutable type handle
///
/// Equality is structural: two handles are equal when their shapes are,
/// whether or not they come from the same registry.
#[derive(Clone)]
pub struct Type(Arc<Shape>);

impl Type {
    pub fn from_shape(shape: Shape) -> Self {
        Type(Arc::new(shape))
    }

    pub fn unit() -> Self {
        Self::from_shape(Shape::Unit)
    }

    pub fn bool() -> Self {
        Self::from_shape(Shape::Bool)
    }

    pub fn i32() -> Self {
        Self::from_shape(Shape::I32)
    }

    pub fn i64() -> Self {
        Self::from_shape(Shape::I64)
    }

    pub fn f64() -> Self {
        Self::from_shape(Shape::F64)
    }

    pub fn str() -> Self {
        Self::from_shape(Shape::Str)
    }

    pub fn tuple(elems: Vec<Type>) -> Self {
        Self::from_shape(Shape::Tuple(elems))
    }

    pub fn function(params: Vec<Type>, ret: Type) -> Self {
        Self::from_shape(Shape::Function { params, ret })
    }

    pub fn shape(&self) -> &Shape {
        &self.0
    }

    /// Strips named wrappers down to the structural type
    pub fn resolved(&self) -> &Type {
        match self.shape() {
            Shape::Named { underlying, .. } => underlying.resolved(),
            _ => self,
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self.resolved().shape(), Shape::Unit)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self.resolved().shape(), Shape::Bool)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self.resolved().shape(), Shape::I32 | Shape::I64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self.resolved().shape(), Shape::F64)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub fn is_str(&self) -> bool {
        matches!(self.resolved().shape(), Shape::Str)
    }

    pub fn is_function(&self) -> bool {
        matches!(self.resolved().shape(), Shape::Function { .. })
    }

    /// Names of the builtin scalar types, usable with [`TypeRegistry::lookup`]
    pub const BUILTINS: [&'static str; 6] = ["unit", "bool", "i32", "i64", "f64", "str"];

    fn builtin(name: &str) -> Option<Self> {
        match name {
            "unit" => Some(Self::unit()),
            "bool" => Some(Self::bool()),
            "i32" => Some(Self::i32()),
            "i64" => Some(Self::i64()),
            "f64" => Some(Self::f64()),
            "str" => Some(Self::str()),
            _ => None,
        }
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl Borrow<Shape> for Type {
    fn borrow(&self) -> &Shape {
        &self.0
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shape() {
            Shape::Unit => write!(f, "unit"),
            Shape::Bool => write!(f, "bool"),
            Shape::I32 => write!(f, "i32"),
            Shape::I64 => write!(f, "i64"),
            Shape::F64 => write!(f, "f64"),
            Shape::Str => write!(f, "str"),
            Shape::Tuple(elems) => {
                write!(f, "(")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", e)?;
                }
                write!(f, ")")
            }
            Shape::Function { params, ret } => {
                write!(f, "fn(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", p)?;
                }
                write!(f, ") -> {}", ret)
            }
            Shape::Named { name, .. } => write!(f, "{}", name),
        }
    }
}

/// Structural type equality
pub fn types_equal(a: &Type, b: &Type) -> bool {
    a == b
}

/// Subtyping relation
///
/// Reflexive; `i32 <: i64`; a named type is a subtype of its underlying
/// type (not the reverse); tuples are covariant; functions are contravariant
/// in their parameters and covariant in their result.
pub fn is_subtype(a: &Type, b: &Type) -> bool {
    if a == b {
        return true;
    }
    match (a.shape(), b.shape()) {
        (Shape::Named { underlying, .. }, _) => is_subtype(underlying, b),
        (Shape::I32, Shape::I64) => true,
        (Shape::Tuple(xs), Shape::Tuple(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| is_subtype(x, y))
        }
        (
            Shape::Function { params: pa, ret: ra },
            Shape::Function { params: pb, ret: rb },
        ) => {
            pa.len() == pb.len()
                && pa.iter().zip(pb).all(|(x, y)| is_subtype(y, x))
                && is_subtype(ra, rb)
        }
        _ => false,
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    named: HashMap<String, Type>,
    interned: HashSet<Type>,
    sealed: bool,
}

/// Session-scoped type registry
///
/// Create one per compilation session; independent sessions never share
/// state. Registration takes the write lock, lookups take the read lock, and
/// [`seal`](Self::seal) ends the registration phase.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    state: RwLock<RegistryState>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the canonical handle for a shape
    pub fn intern(&self, shape: Shape) -> Type {
        if let Some(existing) = self.state.read().interned.get(&shape) {
            return existing.clone();
        }
        let mut state = self.state.write();
        if let Some(existing) = state.interned.get(&shape) {
            return existing.clone();
        }
        let ty = Type::from_shape(shape);
        state.interned.insert(ty.clone());
        ty
    }

    /// Defines a named type over `shape`
    ///
    /// Redefining a name with the same shape returns the existing type.
    pub fn define_type(&self, name: &str, shape: Shape) -> Result<Type> {
        let underlying = self.intern(shape);
        let mut state = self.state.write();

        if let Some(builtin) = Type::builtin(name) {
            return Err(BuildError::DuplicateType {
                name: name.to_string(),
                existing: builtin.to_string(),
                requested: underlying.to_string(),
            });
        }

        if let Some(existing) = state.named.get(name) {
            if let Shape::Named { underlying: prev, .. } = existing.shape() {
                if *prev == underlying {
                    return Ok(existing.clone());
                }
                return Err(BuildError::DuplicateType {
                    name: name.to_string(),
                    existing: prev.to_string(),
                    requested: underlying.to_string(),
                });
            }
        }

        if state.sealed {
            return Err(BuildError::RegistryFrozen { name: name.to_string() });
        }

        let ty = Type::from_shape(Shape::Named {
            name: name.to_string(),
            underlying,
        });
        state.interned.insert(ty.clone());
        state.named.insert(name.to_string(), ty.clone());
        Ok(ty)
    }

    /// Looks up a builtin or defined type by name
    pub fn lookup(&self, name: &str) -> Result<Type> {
        if let Some(builtin) = Type::builtin(name) {
            return Ok(self.intern(builtin.shape().clone()));
        }
        self.state
            .read()
            .named
            .get(name)
            .cloned()
            .ok_or_else(|| BuildError::UnknownType { name: name.to_string() })
    }

    /// Ends the registration phase; the registry is read-only afterwards
    pub fn seal(&self) {
        self.state.write().sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.state.read().sealed
    }

    pub fn types_equal(&self, a: &Type, b: &Type) -> bool {
        types_equal(a, b)
    }

    pub fn is_subtype(&self, a: &Type, b: &Type) -> bool {
        is_subtype(a, b)
    }

    /// Names of the defined (non-builtin) types, sorted
    pub fn defined_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().named.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_display() {
        assert_eq!(Type::i64().to_string(), "i64");
        assert_eq!(Type::tuple(vec![Type::i32(), Type::bool()]).to_string(), "(i32, bool)");
        assert_eq!(
            Type::function(vec![Type::i64()], Type::str()).to_string(),
            "fn(i64) -> str"
        );
    }

    #[test]
    fn test_structural_equality() {
        let registry = TypeRegistry::new();
        let a = registry.intern(Shape::Tuple(vec![Type::i64(), Type::f64()]));
        let b = Type::tuple(vec![Type::i64(), Type::f64()]);
        assert!(types_equal(&a, &b));
        assert_ne!(Type::i32(), Type::i64());
    }

    #[test]
    fn test_interning_dedups() {
        let registry = TypeRegistry::new();
        let a = registry.intern(Shape::I64);
        let b = registry.intern(Shape::I64);
        assert!(Arc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn test_define_type() {
        let registry = TypeRegistry::new();
        let meters = registry.define_type("Meters", Shape::F64).unwrap();
        assert_eq!(meters.to_string(), "Meters");
        assert!(meters.is_float());
        assert_eq!(registry.lookup("Meters").unwrap(), meters);

        // Same shape: idempotent
        let again = registry.define_type("Meters", Shape::F64).unwrap();
        assert_eq!(again, meters);
    }

    #[test]
    fn test_duplicate_type() {
        let registry = TypeRegistry::new();
        registry.define_type("Meters", Shape::F64).unwrap();
        let err = registry.define_type("Meters", Shape::I64).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateType { .. }));

        let err = registry.define_type("i64", Shape::I32).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateType { .. }));
    }

    #[test]
    fn test_sealed_registry() {
        let registry = TypeRegistry::new();
        registry.define_type("Id", Shape::I64).unwrap();
        registry.seal();
        assert!(registry.is_sealed());
        assert!(matches!(
            registry.define_type("Name", Shape::Str),
            Err(BuildError::RegistryFrozen { .. })
        ));
        // Lookups keep working
        assert!(registry.lookup("Id").is_ok());
    }

    #[test]
    fn test_unknown_type() {
        let registry = TypeRegistry::new();
        assert!(matches!(registry.lookup("Nope"), Err(BuildError::UnknownType { .. })));
        assert_eq!(registry.lookup("bool").unwrap(), Type::bool());
    }

    #[test]
    fn test_subtyping() {
        let registry = TypeRegistry::new();
        let id = registry.define_type("Id", Shape::I32).unwrap();

        assert!(is_subtype(&Type::i32(), &Type::i64()));
        assert!(!is_subtype(&Type::i64(), &Type::i32()));
        assert!(is_subtype(&id, &Type::i32()));
        assert!(is_subtype(&id, &Type::i64()));
        assert!(!is_subtype(&Type::i32(), &id));

        let takes_i64 = Type::function(vec![Type::i64()], Type::i32());
        let takes_i32 = Type::function(vec![Type::i32()], Type::i64());
        assert!(is_subtype(&takes_i64, &takes_i32));
        assert!(!is_subtype(&takes_i32, &takes_i64));
    }

    #[test]
    fn test_sessions_are_independent() {
        let a = TypeRegistry::new();
        let b = TypeRegistry::new();
        a.define_type("T", Shape::I64).unwrap();
        b.define_type("T", Shape::Str).unwrap();
        assert_ne!(a.lookup("T").unwrap(), b.lookup("T").unwrap());
    }
}
