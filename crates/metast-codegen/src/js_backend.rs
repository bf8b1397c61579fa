//! JS Backend - Generates a restricted JavaScript subset
//!
//! Each IR function becomes a JS function and the entry node becomes
//! `__entry`, whose parameters are the unit inputs in name order.
//! Expressions that need statements (bindings, branches with side effects,
//! loops) are lowered into the enclosing block and referenced through
//! temporaries.
//!
//! Numeric semantics follow the bytecode VM: `i32` values are numbers kept
//! in range with `| 0` and `Math.imul`, `i64` values are `BigInt`s wrapped
//! with `BigInt.asIntN(64, ..)`, and integer division or remainder by zero
//! throws from an emitted helper. String ordering compares UTF-16 code
//! units, which differs from byte order only outside the BMP.

use crate::bytecode::ValueKind;
use crate::{check_cancel, expand_extension, Artifact, CodeGen, ENTRY_NAME};
use metast_error::LoweringError;
use metast_ir::{
    BackendKind, BinaryOp, CancelToken, CompareOp, CompilationUnit, Node, NodeKind, Type, UnaryOp, Value,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::mem;
use tracing::debug;

const BACKEND: BackendKind = BackendKind::Js;

/// Runtime support functions, emitted only when referenced
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Helper {
    DivI32,
    RemI32,
    DivI64,
    RemI64,
    F64ToI32,
    F64ToI64,
}

impl Helper {
    fn name(&self) -> &'static str {
        match self {
            Helper::DivI32 => "__div_i32",
            Helper::RemI32 => "__rem_i32",
            Helper::DivI64 => "__div_i64",
            Helper::RemI64 => "__rem_i64",
            Helper::F64ToI32 => "__f64_to_i32",
            Helper::F64ToI64 => "__f64_to_i64",
        }
    }

    fn source(&self) -> &'static str {
        match self {
            Helper::DivI32 => {
                "function __div_i32(a, b) {\n  if (b === 0) throw new RangeError(\"division by zero\");\n  return (a / b) | 0;\n}\n"
            }
            Helper::RemI32 => {
                "function __rem_i32(a, b) {\n  if (b === 0) throw new RangeError(\"division by zero\");\n  return (a % b) | 0;\n}\n"
            }
            Helper::DivI64 => {
                "function __div_i64(a, b) {\n  if (b === 0n) throw new RangeError(\"division by zero\");\n  return BigInt.asIntN(64, a / b);\n}\n"
            }
            Helper::RemI64 => {
                "function __rem_i64(a, b) {\n  if (b === 0n) throw new RangeError(\"division by zero\");\n  return a % b;\n}\n"
            }
            Helper::F64ToI32 => {
                "function __f64_to_i32(x) {\n  if (Number.isNaN(x)) return 0;\n  return Math.max(-2147483648, Math.min(2147483647, Math.trunc(x)));\n}\n"
            }
            Helper::F64ToI64 => {
                "function __f64_to_i64(x) {\n  if (Number.isNaN(x)) return 0n;\n  if (x >= 9223372036854775807) return 9223372036854775807n;\n  if (x <= -9223372036854775808) return -9223372036854775808n;\n  return BigInt(Math.trunc(x));\n}\n"
            }
        }
    }
}

/// JavaScript code generation backend
#[derive(Debug, Default, Clone, Copy)]
pub struct JsBackend;

impl JsBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CodeGen for JsBackend {
    fn kind(&self) -> BackendKind {
        BACKEND
    }

    fn lower(&self, unit: &CompilationUnit, cancel: &CancelToken) -> Result<Artifact, LoweringError> {
        check_cancel(cancel)?;
        let idents: BTreeMap<&str, String> = unit
            .functions()
            .enumerate()
            .map(|(i, f)| (f.name(), format!("f{}_{}", i, sanitize(f.name()))))
            .collect();

        let mut helpers = BTreeSet::new();
        let mut functions = Vec::new();
        for def in unit.functions() {
            check_cancel(cancel)?;
            let params: Vec<&String> = def.param_names().iter().collect();
            let ident = &idents[def.name()];
            functions.push(FnWriter::new(&idents, &mut helpers).function(ident, &params, def.body())?);
            debug!(function = def.name(), "emitted js function");
        }
        check_cancel(cancel)?;
        let inputs: Vec<String> = unit.inputs().signature().into_iter().map(|(n, _)| n).collect();
        let params: Vec<&String> = inputs.iter().collect();
        functions.push(FnWriter::new(&idents, &mut helpers).function(ENTRY_NAME, &params, unit.entry())?);

        let mut out = String::new();
        let _ = writeln!(out, "// generated by metast from unit `{}`", unit.name());
        let _ = writeln!(out, "\"use strict\";");
        for helper in &helpers {
            let _ = writeln!(out);
            out.push_str(helper.source());
        }
        for function in &functions {
            let _ = writeln!(out);
            out.push_str(function);
        }
        Ok(Artifact::Source { backend: BACKEND, text: out })
    }
}

fn unrepresentable(detail: impl Into<String>) -> LoweringError {
    LoweringError::Unrepresentable {
        backend: BACKEND.name().to_string(),
        detail: detail.into(),
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn kind_of(ty: &Type) -> Result<ValueKind, LoweringError> {
    ValueKind::of_type(ty).ok_or_else(|| unrepresentable(format!("values of type {} have no JS representation", ty)))
}

fn literal(value: &Value) -> String {
    match value {
        Value::Unit => "undefined".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::I32(v) if *v < 0 => format!("({})", v),
        Value::I32(v) => v.to_string(),
        Value::I64(v) if *v < 0 => format!("({}n)", v),
        Value::I64(v) => format!("{}n", v),
        Value::F64(x) if x.is_nan() => "NaN".to_string(),
        Value::F64(x) if x.is_infinite() && *x > 0.0 => "Infinity".to_string(),
        Value::F64(x) if x.is_infinite() => "(-Infinity)".to_string(),
        Value::F64(x) if x.is_sign_negative() => format!("({:?})", x),
        Value::F64(x) => format!("{:?}", x),
        // JSON string literals are valid JS string literals
        Value::Str(s) => serde_json::Value::String(s.clone()).to_string(),
    }
}

fn indented(lines: Vec<String>) -> impl Iterator<Item = String> {
    lines.into_iter().map(|l| format!("  {}", l))
}

/// Emits one JS function
struct FnWriter<'a> {
    functions: &'a BTreeMap<&'a str, String>,
    helpers: &'a mut BTreeSet<Helper>,
    /// Statements of the block being emitted
    lines: Vec<String>,
    /// IR name to JS identifier, innermost last
    scope: Vec<(String, String)>,
    used: BTreeSet<String>,
    temps: usize,
}

impl<'a> FnWriter<'a> {
    fn new(functions: &'a BTreeMap<&'a str, String>, helpers: &'a mut BTreeSet<Helper>) -> Self {
        Self {
            functions,
            helpers,
            lines: Vec::new(),
            scope: Vec::new(),
            used: BTreeSet::new(),
            temps: 0,
        }
    }

    fn function(mut self, ident: &str, params: &[&String], body: &Node) -> Result<String, LoweringError> {
        let params: Vec<String> = params.iter().map(|p| self.declare(p)).collect();
        let result = self.expr(body)?;
        self.lines.push(format!("return {};", result));

        let mut out = String::new();
        let _ = writeln!(out, "function {}({}) {{", ident, params.join(", "));
        for line in indented(mem::take(&mut self.lines)) {
            let _ = writeln!(out, "{}", line);
        }
        let _ = writeln!(out, "}}");
        Ok(out)
    }

    /// Binds `name` to an identifier unique within the function
    fn declare(&mut self, name: &str) -> String {
        let base = format!("${}", sanitize(name));
        let mut ident = base.clone();
        let mut n = 1;
        while self.used.contains(&ident) {
            ident = format!("{}_{}", base, n);
            n += 1;
        }
        self.used.insert(ident.clone());
        self.scope.push((name.to_string(), ident.clone()));
        ident
    }

    fn lookup(&self, name: &str) -> Result<String, LoweringError> {
        self.scope
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, ident)| ident.clone())
            .ok_or_else(|| unrepresentable(format!("unbound name `{}`", name)))
    }

    fn temp(&mut self) -> String {
        let t = format!("t{}", self.temps);
        self.temps += 1;
        t
    }

    fn helper(&mut self, helper: Helper, args: &[&str]) -> String {
        self.helpers.insert(helper);
        format!("{}({})", helper.name(), args.join(", "))
    }

    /// Lowers `node` into a separate statement list
    fn capture(&mut self, node: &Node) -> Result<(Vec<String>, String), LoweringError> {
        let saved = mem::take(&mut self.lines);
        let result = self.expr(node);
        let stmts = mem::replace(&mut self.lines, saved);
        Ok((stmts, result?))
    }

    /// Lowers operands left to right
    ///
    /// When an operand needs statements, every earlier operand is first
    /// saved to a temporary so those statements cannot change it.
    fn operands(&mut self, nodes: &[&Node]) -> Result<Vec<String>, LoweringError> {
        let mut values: Vec<(String, bool)> = Vec::with_capacity(nodes.len());
        for node in nodes {
            let (stmts, value) = self.capture(node)?;
            if !stmts.is_empty() {
                for (prev, stable) in values.iter_mut().filter(|(_, stable)| !*stable) {
                    let t = self.temp();
                    self.lines.push(format!("const {} = {};", t, prev));
                    *prev = t;
                    *stable = true;
                }
                self.lines.extend(stmts);
            }
            values.push((value, node.is_literal()));
        }
        Ok(values.into_iter().map(|(v, _)| v).collect())
    }

    fn expr(&mut self, node: &Node) -> Result<String, LoweringError> {
        let code = match node.kind() {
            NodeKind::Literal(value) => literal(value),
            NodeKind::Var { name, .. } => self.lookup(name)?,
            NodeKind::Unary { op, operand } => {
                let a = self.expr(operand)?;
                match (op, kind_of(operand.ty())?) {
                    (UnaryOp::Not, _) => format!("(!{})", a),
                    (UnaryOp::Neg, ValueKind::I32) => format!("((-{}) | 0)", a),
                    (UnaryOp::Neg, ValueKind::I64) => format!("BigInt.asIntN(64, -{})", a),
                    (UnaryOp::Neg, _) => format!("(-{})", a),
                }
            }
            NodeKind::Binary { op: op @ (BinaryOp::And | BinaryOp::Or), lhs, rhs } => {
                let l = self.expr(lhs)?;
                let (stmts, r) = self.capture(rhs)?;
                let symbol = op.symbol();
                if stmts.is_empty() {
                    format!("({} {} {})", l, symbol, r)
                } else {
                    let t = self.temp();
                    self.lines.push(format!("let {} = {};", t, l));
                    let test = if *op == BinaryOp::And { t.clone() } else { format!("!{}", t) };
                    self.lines.push(format!("if ({}) {{", test));
                    self.lines.extend(indented(stmts));
                    self.lines.push(format!("  {} = {};", t, r));
                    self.lines.push("}".to_string());
                    t
                }
            }
            NodeKind::Binary { op, lhs, rhs } => {
                let values = self.operands(&[lhs, rhs])?;
                let kind = kind_of(lhs.ty())?;
                self.binary(*op, kind, &values[0], &values[1])
            }
            NodeKind::Compare { op, lhs, rhs } => {
                let values = self.operands(&[lhs, rhs])?;
                let symbol = match op {
                    CompareOp::Eq => "===",
                    CompareOp::Ne => "!==",
                    other => other.symbol(),
                };
                format!("({} {} {})", values[0], symbol, values[1])
            }
            NodeKind::Cast { to, operand } => {
                let a = self.expr(operand)?;
                self.cast(&a, kind_of(operand.ty())?, kind_of(to)?)
            }
            NodeKind::If { cond, then_branch, else_branch } => {
                let c = self.expr(cond)?;
                let (then_stmts, t) = self.capture(then_branch)?;
                let (else_stmts, e) = self.capture(else_branch)?;
                if then_stmts.is_empty() && else_stmts.is_empty() {
                    format!("({} ? {} : {})", c, t, e)
                } else {
                    let result = self.temp();
                    self.lines.push(format!("let {};", result));
                    self.lines.push(format!("if ({}) {{", c));
                    self.lines.extend(indented(then_stmts));
                    self.lines.push(format!("  {} = {};", result, t));
                    self.lines.push("} else {".to_string());
                    self.lines.extend(indented(else_stmts));
                    self.lines.push(format!("  {} = {};", result, e));
                    self.lines.push("}".to_string());
                    result
                }
            }
            NodeKind::Let { name, value, body } => {
                let v = self.expr(value)?;
                let ident = self.declare(name);
                self.lines.push(format!("let {} = {};", ident, v));
                let result = self.expr(body);
                self.scope.pop();
                result?
            }
            NodeKind::Assign { name, value } => {
                let v = self.expr(value)?;
                let ident = self.lookup(name)?;
                self.lines.push(format!("{} = {};", ident, v));
                "undefined".to_string()
            }
            NodeKind::Loop { cond, body } => {
                let (cond_stmts, c) = self.capture(cond)?;
                let (body_stmts, b) = self.capture(body)?;
                self.lines.push("while (true) {".to_string());
                self.lines.extend(indented(cond_stmts));
                self.lines.push(format!("  if (!{}) break;", c));
                self.lines.extend(indented(body_stmts));
                if !body.is_literal() && b != "undefined" {
                    self.lines.push(format!("  {};", b));
                }
                self.lines.push("}".to_string());
                "undefined".to_string()
            }
            NodeKind::Seq(items) => {
                let (last, init) = items.split_last().ok_or_else(|| unrepresentable("empty sequence"))?;
                for item in init {
                    let e = self.expr(item)?;
                    if !item.is_literal() && e != "undefined" {
                        self.lines.push(format!("{};", e));
                    }
                }
                self.expr(last)?
            }
            NodeKind::Call { callee, args } => {
                let ident = self
                    .functions
                    .get(callee.name.as_str())
                    .cloned()
                    .ok_or_else(|| unrepresentable(format!("call to unknown function `{}`", callee.name)))?;
                let nodes: Vec<&Node> = args.iter().collect();
                let values = self.operands(&nodes)?;
                let mut widened = Vec::with_capacity(values.len());
                for ((value, arg), param) in values.iter().zip(args).zip(&callee.params) {
                    widened.push(self.cast(value, kind_of(arg.ty())?, kind_of(param)?));
                }
                format!("{}({})", ident, widened.join(", "))
            }
            NodeKind::Extension(ext) => {
                let expanded = expand_extension(BACKEND, node, ext)?;
                self.expr(&expanded)?
            }
        };
        Ok(code)
    }

    fn binary(&mut self, op: BinaryOp, kind: ValueKind, a: &str, b: &str) -> String {
        use BinaryOp::*;
        match (kind, op) {
            (ValueKind::I32, Add) => format!("(({} + {}) | 0)", a, b),
            (ValueKind::I32, Sub) => format!("(({} - {}) | 0)", a, b),
            (ValueKind::I32, Mul) => format!("Math.imul({}, {})", a, b),
            (ValueKind::I32, Div) => self.helper(Helper::DivI32, &[a, b]),
            (ValueKind::I32, Rem) => self.helper(Helper::RemI32, &[a, b]),
            (ValueKind::I64, Add | Sub | Mul) => format!("BigInt.asIntN(64, {} {} {})", a, op.symbol(), b),
            (ValueKind::I64, Div) => self.helper(Helper::DivI64, &[a, b]),
            (ValueKind::I64, Rem) => self.helper(Helper::RemI64, &[a, b]),
            (ValueKind::I64, Shl) => format!("BigInt.asIntN(64, {} << ({} & 63n))", a, b),
            (ValueKind::I64, Shr) => format!("({} >> ({} & 63n))", a, b),
            // i32 shifts mask the amount to five bits natively
            _ => format!("({} {} {})", a, op.symbol(), b),
        }
    }

    fn cast(&mut self, a: &str, from: ValueKind, to: ValueKind) -> String {
        match (from, to) {
            (ValueKind::I32, ValueKind::I64) => format!("BigInt({})", a),
            (ValueKind::I64, ValueKind::I32) => format!("Number(BigInt.asIntN(32, {}))", a),
            (ValueKind::I64, ValueKind::F64) => format!("Number({})", a),
            (ValueKind::F64, ValueKind::I32) => self.helper(Helper::F64ToI32, &[a]),
            (ValueKind::F64, ValueKind::I64) => self.helper(Helper::F64ToI64, &[a]),
            // i32 -> f64 and same-kind casts
            _ => a.to_string(),
        }
    }
}
