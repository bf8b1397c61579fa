//! JSON program descriptions
//!
//! A [`ProgramSpec`] is a serializable description of a compilation unit.
//! It is turned into IR only through the Builder API, so a program file is
//! validated exactly like a unit built in Rust.
//!
//! ```json
//! {
//!   "name": "clamp",
//!   "inputs": { "x": "i64" },
//!   "entry": {
//!     "kind": "if",
//!     "cond": { "kind": "binary", "op": ">", "lhs": { "kind": "var", "name": "x" },
//!               "rhs": { "kind": "int", "value": 10 } },
//!     "then": { "kind": "int", "value": 10 },
//!     "else": { "kind": "var", "name": "x" }
//!   },
//!   "options": { "backend": "js", "opt_level": "basic" }
//! }
//! ```

use metast_error::{BuildError, CompileError};
use metast_ir::builder;
use metast_ir::{
    BinaryOp, CompareOp, CompilationUnit, CompileOptions, FnSig, FunctionBuilder, Node, Shape, Type,
    TypeRegistry, UnaryOp, UnitBuilder, Value,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A whole program: named types, inputs, functions and the entry expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramSpec {
    pub name: String,
    /// Named types, defined in order; later ones may refer to earlier ones
    #[serde(default)]
    pub types: Vec<TypeDecl>,
    /// Entry inputs: name to type name
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    #[serde(default)]
    pub functions: Vec<FunctionSpec>,
    pub entry: Expr,
    #[serde(default)]
    pub options: CompileOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: String,
    pub underlying: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    pub returns: String,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// Expression tree, tagged by `kind`
///
/// Variables carry no type: it is taken from the binding in scope.
/// `binary` accepts both arithmetic/logical symbols (`+`, `&&`, `<<`, ...)
/// and comparison symbols (`==`, `<`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Int {
        value: i64,
    },
    I32 {
        value: i32,
    },
    Float {
        value: f64,
    },
    Bool {
        value: bool,
    },
    Str {
        value: String,
    },
    Unit,
    Var {
        name: String,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: String,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Cast {
        to: String,
        operand: Box<Expr>,
    },
    If {
        cond: Box<Expr>,
        #[serde(rename = "then")]
        then_branch: Box<Expr>,
        #[serde(rename = "else")]
        else_branch: Box<Expr>,
    },
    Let {
        name: String,
        value: Box<Expr>,
        body: Box<Expr>,
    },
    Assign {
        name: String,
        value: Box<Expr>,
    },
    While {
        cond: Box<Expr>,
        body: Box<Expr>,
    },
    Seq {
        items: Vec<Expr>,
    },
    Call {
        function: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
}

impl ProgramSpec {
    pub fn from_json(text: &str) -> Result<Self, CompileError> {
        serde_json::from_str(text).map_err(|e| CompileError::Program(e.to_string()))
    }

    pub fn to_json(&self) -> String {
        // Plain data with string keys always serializes
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Builds and checks the unit, defining named types in `registry`
    pub fn to_unit(&self, registry: &TypeRegistry) -> Result<CompilationUnit, CompileError> {
        for decl in &self.types {
            let underlying = registry.lookup(&decl.underlying)?;
            registry.define_type(&decl.name, underlying.shape().clone())?;
        }

        let mut sigs = BTreeMap::new();
        for f in &self.functions {
            let params = f
                .params
                .iter()
                .map(|p| registry.lookup(&p.ty))
                .collect::<Result<Vec<_>, _>>()?;
            let sig = FnSig::new(f.name.clone(), params, registry.lookup(&f.returns)?);
            if sigs.insert(f.name.clone(), sig).is_some() {
                return Err(BuildError::DuplicateFunction { name: f.name.clone() }.into());
            }
        }
        let lowerer = Lowerer { registry, sigs: &sigs };

        let mut unit = UnitBuilder::new(self.name.clone()).options(self.options);
        let mut scope = Vec::new();
        for (name, ty) in &self.inputs {
            let ty = registry.lookup(ty)?;
            scope.push((name.clone(), ty.clone()));
            unit = unit.input(name.clone(), ty);
        }

        for f in &self.functions {
            let sig = &sigs[&f.name];
            let mut builder = FunctionBuilder::new(f.name.clone(), sig.ret.clone());
            let mut params = Vec::new();
            for (p, ty) in f.params.iter().zip(&sig.params) {
                builder = builder.param(p.name.clone(), ty.clone());
                params.push((p.name.clone(), ty.clone()));
            }
            let body = lowerer.expr(&f.body, &mut params)?;
            unit = unit.function(builder.body(body)?);
        }

        let entry = lowerer.expr(&self.entry, &mut scope)?;
        Ok(unit.build(entry)?)
    }
}

/// Visible bindings, innermost last
type Scope = Vec<(String, Type)>;

struct Lowerer<'a> {
    registry: &'a TypeRegistry,
    sigs: &'a BTreeMap<String, FnSig>,
}

impl Lowerer<'_> {
    fn expr(&self, expr: &Expr, scope: &mut Scope) -> Result<Node, CompileError> {
        let node = match expr {
            Expr::Int { value } => builder::i64(*value),
            Expr::I32 { value } => builder::i32(*value),
            Expr::Float { value } => builder::f64(*value),
            Expr::Bool { value } => builder::boolean(*value),
            Expr::Str { value } => builder::str(value),
            Expr::Unit => builder::unit(),
            Expr::Var { name } => {
                let ty = scope
                    .iter()
                    .rev()
                    .find(|(n, _)| n == name)
                    .map(|(_, ty)| ty.clone())
                    .ok_or_else(|| BuildError::UnboundName { name: name.clone() })?;
                builder::var(name.clone(), ty)
            }
            Expr::Unary { op, operand } => builder::unary(*op, self.expr(operand, scope)?)?,
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.expr(lhs, scope)?;
                let rhs = self.expr(rhs, scope)?;
                if let Some(op) = BinaryOp::from_symbol(op) {
                    builder::binary(op, lhs, rhs)?
                } else if let Some(op) = CompareOp::from_symbol(op) {
                    builder::compare(op, lhs, rhs)?
                } else {
                    return Err(CompileError::Program(format!("unknown operator `{}`", op)));
                }
            }
            Expr::Cast { to, operand } => {
                let to = self.registry.lookup(to)?;
                builder::cast(self.expr(operand, scope)?, to)?
            }
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => builder::if_expr(
                self.expr(cond, scope)?,
                self.expr(then_branch, scope)?,
                self.expr(else_branch, scope)?,
            )?,
            Expr::Let { name, value, body } => {
                let value = self.expr(value, scope)?;
                scope.push((name.clone(), value.ty().clone()));
                let body = self.expr(body, scope);
                scope.pop();
                builder::let_in(name.clone(), value, body?)?
            }
            Expr::Assign { name, value } => builder::assign(name.clone(), self.expr(value, scope)?)?,
            Expr::While { cond, body } => {
                builder::loop_while(self.expr(cond, scope)?, self.expr(body, scope)?)?
            }
            Expr::Seq { items } => {
                let items = items
                    .iter()
                    .map(|item| self.expr(item, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                builder::seq(items)?
            }
            Expr::Call { function, args } => {
                let sig = self
                    .sigs
                    .get(function)
                    .ok_or_else(|| BuildError::UnknownFunction { name: function.clone() })?;
                let args = args
                    .iter()
                    .map(|arg| self.expr(arg, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                builder::call(sig, args)?
            }
        };
        Ok(node)
    }
}

/// Parses a `name=value` command-line input against the unit's declared
/// input type
pub fn parse_input(unit: &CompilationUnit, arg: &str) -> Result<(String, Value), CompileError> {
    let (name, text) = arg
        .split_once('=')
        .ok_or_else(|| CompileError::Program(format!("expected `name=value`, found `{}`", arg)))?;
    let ty = unit
        .inputs()
        .lookup_type(name)
        .map_err(|_| CompileError::Program(format!("unit `{}` has no input `{}`", unit.name(), name)))?;
    let invalid = || CompileError::Program(format!("`{}` is not a valid `{}` for input `{}`", text, ty, name));
    let value = match ty.resolved().shape() {
        Shape::I32 => Value::I32(text.parse().map_err(|_| invalid())?),
        Shape::I64 => Value::I64(text.parse().map_err(|_| invalid())?),
        Shape::F64 => Value::F64(text.parse().map_err(|_| invalid())?),
        Shape::Bool => Value::Bool(text.parse().map_err(|_| invalid())?),
        Shape::Str => Value::str(text),
        Shape::Unit if text.is_empty() || text == "()" => Value::Unit,
        _ => return Err(invalid()),
    };
    Ok((name.to_string(), value))
}
