//! Functions and compilation units
//!
//! A [`CompilationUnit`] is the checked input to the transform engine and
//! to every backend: named functions, an entry node, the typed inputs the
//! entry reads, and the options it is compiled with.

use crate::env::Environment;
use crate::node::{FnSig, Node, NodeKind};
use crate::types::Type;
use metast_error::{BuildError, Result};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Deepest expression nesting a unit may contain
pub const MAX_NESTING: usize = 256;

/// Code generation backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Portable stack bytecode, runnable by the loader
    #[default]
    Bytecode,
    /// JavaScript subset source text
    Js,
    /// Spreadsheet formula text
    Formula,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::Bytecode, BackendKind::Js, BackendKind::Formula];

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Bytecode => "bytecode",
            BackendKind::Js => "js",
            BackendKind::Formula => "formula",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Optimization level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptLevel {
    #[default]
    None,
    Basic,
    Full,
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptLevel::None => write!(f, "none"),
            OptLevel::Basic => write!(f, "basic"),
            OptLevel::Full => write!(f, "full"),
        }
    }
}

/// Compilation options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CompileOptions {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub opt_level: OptLevel,
}

impl CompileOptions {
    pub fn new(backend: BackendKind, opt_level: OptLevel) -> Self {
        Self { backend, opt_level }
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_opt_level(mut self, opt_level: OptLevel) -> Self {
        self.opt_level = opt_level;
        self
    }
}

/// Only scalar types can cross a function or unit boundary
fn check_boundary_type(context: String, ty: &Type) -> Result<()> {
    let scalar = ty.is_unit() || ty.is_bool() || ty.is_numeric() || ty.is_str();
    if scalar {
        Ok(())
    } else {
        Err(BuildError::mismatch(context, "scalar type", ty))
    }
}

// =========================================
// Functions
// =========================================

/// A named function with typed parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionDef {
    sig: FnSig,
    params: Vec<String>,
    body: Node,
}

impl FunctionDef {
    /// The body's type must equal the declared return type
    pub fn new(sig: FnSig, params: Vec<String>, body: Node) -> Result<Self> {
        if params.len() != sig.params.len() {
            return Err(BuildError::arity(
                format!("function `{}`", sig.name),
                sig.params.len(),
                params.len(),
            ));
        }
        for (name, ty) in params.iter().zip(&sig.params) {
            check_boundary_type(format!("parameter `{}` of `{}`", name, sig.name), ty)?;
        }
        check_boundary_type(format!("return type of `{}`", sig.name), &sig.ret)?;
        let def = Self { sig, params, body };
        def.check_return()?;
        Ok(def)
    }

    fn check_return(&self) -> Result<()> {
        if self.body.ty() != &self.sig.ret {
            return Err(BuildError::mismatch(
                format!("body of `{}`", self.sig.name),
                &self.sig.ret,
                self.body.ty(),
            ));
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.sig.name
    }

    pub fn sig(&self) -> &FnSig {
        &self.sig
    }

    pub fn param_names(&self) -> &[String] {
        &self.params
    }

    /// `(name, type)` pairs in declaration order
    pub fn params(&self) -> impl Iterator<Item = (&String, &Type)> {
        self.params.iter().zip(&self.sig.params)
    }

    pub fn body(&self) -> &Node {
        &self.body
    }

    /// Same function over a new body
    pub fn with_body(&self, body: Node) -> Result<Self> {
        let def = Self {
            sig: self.sig.clone(),
            params: self.params.clone(),
            body,
        };
        def.check_return()?;
        Ok(def)
    }
}

/// Incremental construction of a [`FunctionDef`]
///
/// The signature is available before the body exists, so a body can call
/// its own function.
#[derive(Debug, Clone)]
pub struct FunctionBuilder {
    name: String,
    params: Vec<(String, Type)>,
    ret: Type,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, ret: Type) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            ret,
        }
    }

    pub fn param(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.params.push((name.into(), ty));
        self
    }

    pub fn sig(&self) -> FnSig {
        FnSig::new(
            self.name.clone(),
            self.params.iter().map(|(_, ty)| ty.clone()).collect(),
            self.ret.clone(),
        )
    }

    /// Reference to a declared parameter
    pub fn arg(&self, name: &str) -> Result<Node> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(n, ty)| Node::var(n.clone(), ty.clone()))
            .ok_or_else(|| BuildError::UnboundName { name: name.to_string() })
    }

    pub fn body(self, body: Node) -> Result<FunctionDef> {
        let sig = self.sig();
        let names = self.params.into_iter().map(|(n, _)| n).collect();
        FunctionDef::new(sig, names, body)
    }
}

// =========================================
// Compilation units
// =========================================

/// A checked program: functions, an entry node and its inputs
#[derive(Debug, Clone, PartialEq)]
pub struct CompilationUnit {
    name: String,
    functions: BTreeMap<String, FunctionDef>,
    entry: Node,
    inputs: Environment,
    options: CompileOptions,
}

impl CompilationUnit {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Functions in name order
    pub fn functions(&self) -> impl Iterator<Item = &FunctionDef> {
        self.functions.values()
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(name)
    }

    pub fn entry(&self) -> &Node {
        &self.entry
    }

    /// Entry inputs, bound to their types
    pub fn inputs(&self) -> &Environment {
        &self.inputs
    }

    pub fn options(&self) -> CompileOptions {
        self.options
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    /// Same unit over rewritten function bodies and entry, re-checked
    pub fn with_bodies(&self, functions: Vec<FunctionDef>, entry: Node) -> Result<Self> {
        let functions = functions
            .into_iter()
            .map(|f| (f.name().to_string(), f))
            .collect();
        let unit = Self {
            name: self.name.clone(),
            functions,
            entry,
            inputs: self.inputs.clone(),
            options: self.options,
        };
        unit.check()?;
        Ok(unit)
    }

    /// Every node in the unit: function bodies in name order, then the entry
    pub fn roots(&self) -> impl Iterator<Item = &Node> {
        self.functions.values().map(FunctionDef::body).chain(std::iter::once(&self.entry))
    }

    /// Structural hash of the whole unit, options included
    ///
    /// Stable within a process; used as the artifact cache key.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.name.hash(&mut hasher);
        for def in self.functions.values() {
            def.hash(&mut hasher);
        }
        self.entry.hash(&mut hasher);
        self.inputs.signature().hash(&mut hasher);
        self.options.hash(&mut hasher);
        hasher.finish()
    }

    fn check(&self) -> Result<()> {
        let sigs: BTreeMap<&str, &FnSig> = self
            .functions
            .values()
            .map(|f| (f.name(), f.sig()))
            .collect();

        for def in self.functions.values() {
            let mut env = Environment::new();
            for (name, ty) in def.params() {
                env.bind_type(name.clone(), ty.clone());
            }
            check_node(def.body(), &mut env, &sigs, 0)?;
        }
        let mut env = self.inputs.clone();
        check_node(&self.entry, &mut env, &sigs, 0)
    }
}

/// Resolves names and calls; types of individual nodes were checked when
/// they were built
///
/// Every later phase walks units recursively, so nesting deeper than
/// [`MAX_NESTING`] is rejected here.
fn check_node(
    node: &Node,
    env: &mut Environment,
    sigs: &BTreeMap<&str, &FnSig>,
    depth: usize,
) -> Result<()> {
    if depth >= MAX_NESTING {
        return Err(BuildError::NestingTooDeep { limit: MAX_NESTING });
    }
    let depth = depth + 1;
    match node.kind() {
        NodeKind::Var { name, ty } => {
            let bound = env.lookup_type(name)?;
            if &bound != ty {
                return Err(BuildError::mismatch(format!("variable `{}`", name), &bound, ty));
            }
            Ok(())
        }
        NodeKind::Assign { name, value } => {
            let bound = env.lookup_type(name)?;
            if value.ty() != &bound {
                return Err(BuildError::mismatch(
                    format!("assignment to `{}`", name),
                    &bound,
                    value.ty(),
                ));
            }
            check_node(value, env, sigs, depth)
        }
        NodeKind::Let { name, value, body } => {
            check_node(value, env, sigs, depth)?;
            env.push_scope();
            env.bind_type(name.clone(), value.ty().clone());
            let result = check_node(body, env, sigs, depth);
            env.pop_scope();
            result
        }
        NodeKind::Call { callee, args } => {
            let defined = sigs
                .get(callee.name.as_str())
                .ok_or_else(|| BuildError::UnknownFunction { name: callee.name.clone() })?;
            if *defined != callee {
                return Err(BuildError::mismatch(
                    format!("call `{}`", callee.name),
                    defined.fn_type(),
                    callee.fn_type(),
                ));
            }
            args.iter().try_for_each(|arg| check_node(arg, env, sigs, depth))
        }
        _ => node
            .children()
            .into_iter()
            .try_for_each(|child| check_node(child, env, sigs, depth)),
    }
}

/// Assembles and checks a [`CompilationUnit`]
///
/// ```rust
/// use metast_ir::builder::*;
/// use metast_ir::{Type, UnitBuilder};
///
/// let unit = UnitBuilder::new("double")
///     .input("x", Type::i64())
///     .build(mul(var("x", Type::i64()), i64(2))?)?;
/// assert_eq!(unit.inputs().signature().len(), 1);
/// # Ok::<(), metast_error::BuildError>(())
/// ```
#[derive(Debug, Clone)]
pub struct UnitBuilder {
    name: String,
    functions: Vec<FunctionDef>,
    inputs: Environment,
    options: CompileOptions,
}

impl UnitBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            inputs: Environment::new(),
            options: CompileOptions::default(),
        }
    }

    pub fn input(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.inputs.bind_type(name, ty);
        self
    }

    pub fn function(mut self, def: FunctionDef) -> Self {
        self.functions.push(def);
        self
    }

    pub fn options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self, entry: Node) -> Result<CompilationUnit> {
        for (name, ty) in self.inputs.signature() {
            check_boundary_type(format!("input `{}`", name), &ty)?;
        }
        let mut functions = BTreeMap::new();
        for def in self.functions {
            let name = def.name().to_string();
            if functions.contains_key(&name) {
                return Err(BuildError::DuplicateFunction { name });
            }
            functions.insert(name, def);
        }
        let unit = CompilationUnit {
            name: self.name,
            functions,
            entry,
            inputs: self.inputs,
            options: self.options,
        };
        unit.check()?;
        Ok(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::*;

    fn square() -> FunctionDef {
        let f = FunctionBuilder::new("square", Type::i64()).param("n", Type::i64());
        let n = f.arg("n").unwrap();
        f.body(mul(n.clone(), n).unwrap()).unwrap()
    }

    fn add_chain(links: usize) -> Node {
        (0..links).fold(i64(0), |acc, _| add(acc, i64(1)).unwrap())
    }

    #[test]
    fn test_nesting_limit() {
        let unit = UnitBuilder::new("u").build(add_chain(MAX_NESTING - 1)).unwrap();
        assert_eq!(unit.roots().count(), 1);

        let err = UnitBuilder::new("u").build(add_chain(MAX_NESTING)).unwrap_err();
        assert_eq!(err, BuildError::NestingTooDeep { limit: MAX_NESTING });
    }

    #[test]
    fn test_very_deep_chain_is_rejected_not_overflowed() {
        let err = UnitBuilder::new("u").build(add_chain(200_000)).unwrap_err();
        assert_eq!(err, BuildError::NestingTooDeep { limit: MAX_NESTING });
    }

    #[test]
    fn test_unit_checks_calls() {
        let def = square();
        let entry = call(def.sig(), vec![i64(7)]).unwrap();
        let unit = UnitBuilder::new("u").function(def).build(entry).unwrap();
        assert_eq!(unit.functions().count(), 1);

        // Call to a function the unit does not define
        let ghost = FnSig::new("ghost", vec![], Type::i64());
        let err = UnitBuilder::new("u")
            .build(call(&ghost, vec![]).unwrap())
            .unwrap_err();
        assert_eq!(err, BuildError::UnknownFunction { name: "ghost".to_string() });
    }

    #[test]
    fn test_unbound_input() {
        let err = UnitBuilder::new("u")
            .build(var("x", Type::i64()))
            .unwrap_err();
        assert_eq!(err, BuildError::UnboundName { name: "x".to_string() });

        let unit = UnitBuilder::new("u")
            .input("x", Type::i64())
            .build(var("x", Type::i64()))
            .unwrap();
        assert_eq!(unit.entry().ty(), &Type::i64());
    }

    #[test]
    fn test_var_type_must_match_binding() {
        let err = UnitBuilder::new("u")
            .input("x", Type::i32())
            .build(var("x", Type::i64()))
            .unwrap_err();
        assert!(matches!(err, BuildError::TypeMismatch { .. }));
    }

    #[test]
    fn test_let_scope_ends_with_body() {
        // (seq (let y 1 y) y): the second `y` is out of scope
        let inner = let_in("y", i64(1), var("y", Type::i64())).unwrap();
        let entry = seq(vec![inner, var("y", Type::i64())]).unwrap();
        let err = UnitBuilder::new("u").build(entry).unwrap_err();
        assert_eq!(err, BuildError::UnboundName { name: "y".to_string() });
    }

    #[test]
    fn test_functions_do_not_see_inputs() {
        let f = FunctionBuilder::new("leak", Type::i64())
            .body(var("x", Type::i64()))
            .unwrap();
        let err = UnitBuilder::new("u")
            .input("x", Type::i64())
            .function(f)
            .build(i64(0))
            .unwrap_err();
        assert_eq!(err, BuildError::UnboundName { name: "x".to_string() });
    }

    #[test]
    fn test_duplicate_function() {
        let err = UnitBuilder::new("u")
            .function(square())
            .function(square())
            .build(i64(0))
            .unwrap_err();
        assert_eq!(err, BuildError::DuplicateFunction { name: "square".to_string() });
    }

    #[test]
    fn test_body_must_match_return_type() {
        let err = FunctionBuilder::new("f", Type::i64())
            .body(boolean(true))
            .unwrap_err();
        assert!(matches!(err, BuildError::TypeMismatch { .. }));
    }

    #[test]
    fn test_assign_type_checked() {
        let entry = let_in(
            "x",
            i64(0),
            seq(vec![assign("x", str("oops")).unwrap(), var("x", Type::i64())]).unwrap(),
        )
        .unwrap();
        let err = UnitBuilder::new("u").build(entry).unwrap_err();
        assert!(matches!(err, BuildError::TypeMismatch { .. }));
    }

    #[test]
    fn test_fingerprint_tracks_options() {
        let unit = UnitBuilder::new("u").build(i64(1)).unwrap();
        let same = UnitBuilder::new("u").build(i64(1)).unwrap();
        assert_eq!(unit.fingerprint(), same.fingerprint());

        let other = unit
            .clone()
            .with_options(CompileOptions::default().with_opt_level(OptLevel::Full));
        assert_ne!(unit.fingerprint(), other.fingerprint());
    }

    #[test]
    fn test_options_serde() {
        let opts: CompileOptions =
            serde_json::from_str(r#"{"backend": "js", "opt_level": "basic"}"#).unwrap();
        assert_eq!(opts, CompileOptions::new(BackendKind::Js, OptLevel::Basic));
        let defaults: CompileOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(defaults, CompileOptions::default());
    }
}
