//! IR to MTBC lowering
//!
//! Every node leaves exactly one value on the operand stack. Structured
//! control flow becomes jumps to labels that are resolved to instruction
//! indices once a function body is complete.

use super::{Function, Instr, Module, ValueKind};
use crate::{check_cancel, expand_extension, Artifact, CodeGen, ENTRY_NAME};
use metast_error::LoweringError;
use metast_ir::{BackendKind, BinaryOp, CancelToken, CompilationUnit, Node, NodeKind, Type, UnaryOp, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

const BACKEND: BackendKind = BackendKind::Bytecode;

/// Bytecode backend
#[derive(Debug, Default, Clone, Copy)]
pub struct BytecodeBackend;

impl BytecodeBackend {
    pub fn new() -> Self {
        Self
    }

    /// Lowers to an in-memory module
    ///
    /// User functions get indices in name order; the entry function is last.
    pub fn compile_module(&self, unit: &CompilationUnit, cancel: &CancelToken) -> Result<Module, LoweringError> {
        let count = unit.functions().count();
        if count >= u16::MAX as usize {
            return Err(unrepresentable(format!("{} functions exceed the module limit", count)));
        }
        let indices: BTreeMap<&str, u16> = unit
            .functions()
            .enumerate()
            .map(|(i, f)| (f.name(), i as u16))
            .collect();

        let mut pool = ConstPool::default();
        let mut functions = Vec::with_capacity(count + 1);
        for def in unit.functions() {
            check_cancel(cancel)?;
            let params: Vec<(&String, &Type)> = def.params().collect();
            let function = FnEmitter::new(&mut pool, &indices).lower(def.name(), &params, def.body())?;
            debug!(function = def.name(), instrs = function.code.len(), "lowered function");
            functions.push(function);
        }

        check_cancel(cancel)?;
        let signature = unit.inputs().signature();
        let mut inputs = Vec::with_capacity(signature.len());
        for (name, ty) in &signature {
            let kind = ValueKind::of_type(ty)
                .ok_or_else(|| unrepresentable(format!("input `{}` of type {} is not a scalar", name, ty)))?;
            inputs.push((name.clone(), kind));
        }
        let params: Vec<(&String, &Type)> = signature.iter().map(|(n, t)| (n, t)).collect();
        let entry = FnEmitter::new(&mut pool, &indices).lower(ENTRY_NAME, &params, unit.entry())?;
        functions.push(entry);

        Ok(Module {
            consts: pool.values,
            functions,
            entry: count as u16,
            inputs,
        })
    }
}

impl CodeGen for BytecodeBackend {
    fn kind(&self) -> BackendKind {
        BACKEND
    }

    fn lower(&self, unit: &CompilationUnit, cancel: &CancelToken) -> Result<Artifact, LoweringError> {
        let module = self.compile_module(unit, cancel)?;
        let bytes = module.encode().map_err(|e| unrepresentable(e.to_string()))?;
        Ok(Artifact::Bytecode { bytes })
    }
}

fn unrepresentable(detail: impl Into<String>) -> LoweringError {
    LoweringError::Unrepresentable {
        backend: BACKEND.name().to_string(),
        detail: detail.into(),
    }
}

/// Deduplicated constant pool shared by every function of a module
#[derive(Default)]
struct ConstPool {
    values: Vec<Value>,
    index: HashMap<Value, u32>,
}

impl ConstPool {
    fn add(&mut self, value: &Value) -> Result<u32, LoweringError> {
        if let Some(i) = self.index.get(value) {
            return Ok(*i);
        }
        let i = u32::try_from(self.values.len()).map_err(|_| unrepresentable("constant pool overflow"))?;
        self.values.push(value.clone());
        self.index.insert(value.clone(), i);
        Ok(i)
    }
}

#[derive(Debug, Clone, Copy)]
struct Label(usize);

struct FnEmitter<'a> {
    pool: &'a mut ConstPool,
    functions: &'a BTreeMap<&'a str, u16>,
    code: Vec<Instr>,
    /// Visible bindings, innermost last
    scope: Vec<(String, u16)>,
    n_locals: u16,
    labels: Vec<Option<u32>>,
    /// Jump instructions whose operand is still a label id
    fixups: Vec<usize>,
}

impl<'a> FnEmitter<'a> {
    fn new(pool: &'a mut ConstPool, functions: &'a BTreeMap<&'a str, u16>) -> Self {
        Self {
            pool,
            functions,
            code: Vec::new(),
            scope: Vec::new(),
            n_locals: 0,
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    fn lower(mut self, name: &str, params: &[(&String, &Type)], body: &Node) -> Result<Function, LoweringError> {
        for (param, _) in params {
            self.bind(param)?;
        }
        let n_params = self.n_locals;
        self.emit(body)?;
        self.code.push(Instr::Ret);
        self.resolve_labels()?;
        Ok(Function {
            name: name.to_string(),
            n_params,
            n_locals: self.n_locals,
            code: self.code,
        })
    }

    fn bind(&mut self, name: &str) -> Result<u16, LoweringError> {
        let slot = self.n_locals;
        self.n_locals = slot
            .checked_add(1)
            .ok_or_else(|| unrepresentable("too many local slots in one function"))?;
        self.scope.push((name.to_string(), slot));
        Ok(slot)
    }

    fn slot_of(&self, name: &str) -> Result<u16, LoweringError> {
        self.scope
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, slot)| *slot)
            .ok_or_else(|| unrepresentable(format!("unbound name `{}`", name)))
    }

    fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    fn place(&mut self, label: Label) {
        self.labels[label.0] = Some(self.code.len() as u32);
    }

    fn jump(&mut self, make: fn(u32) -> Instr, label: Label) {
        self.fixups.push(self.code.len());
        self.code.push(make(label.0 as u32));
    }

    fn resolve_labels(&mut self) -> Result<(), LoweringError> {
        for &at in &self.fixups {
            let instr = self.code[at];
            let label = instr.jump_target().unwrap_or_default() as usize;
            let target = self
                .labels
                .get(label)
                .copied()
                .flatten()
                .ok_or_else(|| unrepresentable(format!("label {} was never placed", label)))?;
            self.code[at] = instr.with_target(target);
        }
        Ok(())
    }

    fn constant(&mut self, value: &Value) -> Result<(), LoweringError> {
        let i = self.pool.add(value)?;
        self.code.push(Instr::Const(i));
        Ok(())
    }

    fn emit(&mut self, node: &Node) -> Result<(), LoweringError> {
        match node.kind() {
            NodeKind::Literal(value) => self.constant(value)?,
            NodeKind::Var { name, .. } => {
                let slot = self.slot_of(name)?;
                self.code.push(Instr::Load(slot));
            }
            NodeKind::Unary { op, operand } => {
                self.emit(operand)?;
                self.code.push(match op {
                    UnaryOp::Neg => Instr::Neg,
                    UnaryOp::Not => Instr::Not,
                });
            }
            NodeKind::Binary { op: op @ (BinaryOp::And | BinaryOp::Or), lhs, rhs } => {
                // Keep the left value as the result when it decides the outcome
                let end = self.new_label();
                self.emit(lhs)?;
                self.code.push(Instr::Dup);
                let exit: fn(u32) -> Instr = if *op == BinaryOp::And { Instr::JumpIfFalse } else { Instr::JumpIfTrue };
                self.jump(exit, end);
                self.code.push(Instr::Pop);
                self.emit(rhs)?;
                self.place(end);
            }
            NodeKind::Binary { op, lhs, rhs } => {
                self.emit(lhs)?;
                self.emit(rhs)?;
                self.code.push(Instr::Binary(*op));
            }
            NodeKind::Compare { op, lhs, rhs } => {
                self.emit(lhs)?;
                self.emit(rhs)?;
                self.code.push(Instr::Compare(*op));
            }
            NodeKind::Cast { to, operand } => {
                let kind = ValueKind::of_type(to)
                    .ok_or_else(|| unrepresentable(format!("cast to non-scalar type {}", to)))?;
                self.emit(operand)?;
                self.code.push(Instr::Cast(kind));
            }
            NodeKind::If { cond, then_branch, else_branch } => {
                let otherwise = self.new_label();
                let end = self.new_label();
                self.emit(cond)?;
                self.jump(Instr::JumpIfFalse, otherwise);
                self.emit(then_branch)?;
                self.jump(Instr::Jump, end);
                self.place(otherwise);
                self.emit(else_branch)?;
                self.place(end);
            }
            NodeKind::Let { name, value, body } => {
                self.emit(value)?;
                let slot = self.bind(name)?;
                self.code.push(Instr::Store(slot));
                self.emit(body)?;
                self.scope.pop();
            }
            NodeKind::Assign { name, value } => {
                self.emit(value)?;
                let slot = self.slot_of(name)?;
                self.code.push(Instr::Store(slot));
                self.code.push(Instr::PushUnit);
            }
            NodeKind::Loop { cond, body } => {
                let start = self.new_label();
                let end = self.new_label();
                self.place(start);
                self.emit(cond)?;
                self.jump(Instr::JumpIfFalse, end);
                self.emit(body)?;
                self.code.push(Instr::Pop);
                self.jump(Instr::Jump, start);
                self.place(end);
                self.code.push(Instr::PushUnit);
            }
            NodeKind::Seq(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.emit(item)?;
                    if i + 1 < items.len() {
                        self.code.push(Instr::Pop);
                    }
                }
            }
            NodeKind::Call { callee, args } => {
                let index = *self
                    .functions
                    .get(callee.name.as_str())
                    .ok_or_else(|| unrepresentable(format!("call to unknown function `{}`", callee.name)))?;
                for (arg, param) in args.iter().zip(&callee.params) {
                    self.emit(arg)?;
                    if let Some(want) = ValueKind::of_type(param) {
                        if ValueKind::of_type(arg.ty()) != Some(want) {
                            self.code.push(Instr::Cast(want));
                        }
                    }
                }
                self.code.push(Instr::Call(index));
            }
            NodeKind::Extension(ext) => {
                let expanded = expand_extension(BACKEND, node, ext)?;
                self.emit(&expanded)?;
            }
        }
        Ok(())
    }
}
