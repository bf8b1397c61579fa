//! Environment - scoped name bindings
//!
//! Used for checking (names bound to types) and for execution (names bound
//! to values). Scopes are pushed and popped as a walk enters and leaves
//! function bodies and `let` bodies. Looking up an unbound name is always
//! an error.

use crate::types::Type;
use crate::value::Value;
use metast_error::{BuildError, Result};
use std::collections::BTreeMap;

/// What a name is bound to
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Type(Type),
    Value(Value),
}

impl Binding {
    pub fn ty(&self) -> Type {
        match self {
            Binding::Type(ty) => ty.clone(),
            Binding::Value(v) => v.ty(),
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Binding::Value(v) => Some(v),
            Binding::Type(_) => None,
        }
    }
}

/// Stack of scopes; the bottom scope holds unit inputs
#[derive(Debug, Clone, PartialEq)]
pub struct Environment {
    scopes: Vec<BTreeMap<String, Binding>>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self {
            scopes: vec![BTreeMap::new()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(BTreeMap::new());
    }

    /// Pops the innermost scope; the root scope is never popped
    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Binds in the innermost scope, shadowing outer bindings
    pub fn bind(&mut self, name: impl Into<String>, binding: Binding) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), binding);
        }
    }

    pub fn bind_type(&mut self, name: impl Into<String>, ty: Type) {
        self.bind(name, Binding::Type(ty));
    }

    pub fn bind_value(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.bind(name, Binding::Value(value.into()));
    }

    /// Builder-style `bind_value`
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bind_value(name, value);
        self
    }

    /// Builder-style `bind_type`
    pub fn with_type(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.bind_type(name, ty);
        self
    }

    pub fn lookup(&self, name: &str) -> Result<&Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .ok_or_else(|| BuildError::UnboundName { name: name.to_string() })
    }

    pub fn lookup_mut(&mut self, name: &str) -> Result<&mut Binding> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.get_mut(name))
            .ok_or_else(|| BuildError::UnboundName { name: name.to_string() })
    }

    pub fn lookup_type(&self, name: &str) -> Result<Type> {
        self.lookup(name).map(Binding::ty)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_ok()
    }

    /// Root-scope bindings in name order
    pub fn globals(&self) -> impl Iterator<Item = (&String, &Binding)> {
        self.scopes[0].iter()
    }

    /// Root-scope names and their types, in name order
    pub fn signature(&self) -> Vec<(String, Type)> {
        self.globals().map(|(n, b)| (n.clone(), b.ty())).collect()
    }
}
