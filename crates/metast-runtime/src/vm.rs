//! Bytecode virtual machine
//!
//! Executes a validated [`Module`]. Every resource the program can consume
//! is bounded by [`Limits`]: instruction count (fuel), operand stack depth
//! and call depth. Operand type errors surface as `Malformed`, since a
//! module produced by the bytecode backend never contains them.

use metast_codegen::bytecode::{Instr, Module};
use metast_error::RuntimeError;
use metast_ir::{cast_value, CancelToken, UnaryOp, Value};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

/// How often (in steps) the VM polls its cancel token
const CANCEL_POLL_INTERVAL: u64 = 1024;

/// Execution limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum number of executed instructions
    pub fuel: u64,
    /// Maximum operand stack depth
    pub max_stack: usize,
    /// Maximum number of active calls, the entry included
    pub max_call_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            fuel: 10_000_000,
            max_stack: 65_536,
            max_call_depth: 256,
        }
    }
}

impl Limits {
    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel = fuel;
        self
    }

    pub fn with_max_stack(mut self, max_stack: usize) -> Self {
        self.max_stack = max_stack;
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }
}

#[derive(Debug)]
struct Frame {
    function: usize,
    pc: usize,
    /// First local slot of this frame
    locals_base: usize,
    /// Operand stack height when the frame was entered
    stack_base: usize,
}

/// Stack machine over a single module
pub struct Vm<'m> {
    module: &'m Module,
    limits: Limits,
    cancel: Option<CancelToken>,
    stack: Vec<Value>,
    locals: Vec<Value>,
    frames: Vec<Frame>,
    steps: u64,
}

impl<'m> Vm<'m> {
    pub fn new(module: &'m Module, limits: Limits) -> Self {
        Self {
            module,
            limits,
            cancel: None,
            stack: Vec::new(),
            locals: Vec::new(),
            frames: Vec::new(),
            steps: 0,
        }
    }

    /// Stops execution with `Cancelled` once `token` is cancelled
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Instructions executed so far
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Runs the entry function with `args` bound to its parameters
    pub fn run(&mut self, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let module = self.module;
        let entry = module.entry as usize;
        let function = module
            .functions
            .get(entry)
            .ok_or_else(|| RuntimeError::Malformed(format!("entry function {} does not exist", entry)))?;
        if args.len() != function.n_params as usize {
            return Err(RuntimeError::Malformed(format!(
                "entry takes {} arguments, {} given",
                function.n_params,
                args.len()
            )));
        }
        self.stack.clear();
        self.locals.clear();
        self.frames.clear();
        self.steps = 0;
        self.enter(entry, args)?;

        loop {
            self.tick()?;
            let frame = self.frames.last_mut().ok_or_else(|| malformed("no active frame"))?;
            let code = &module.functions[frame.function].code;
            let instr = *code.get(frame.pc).ok_or_else(|| malformed("execution ran past the end of a function"))?;
            frame.pc += 1;
            let locals_base = frame.locals_base;
            trace!(pc = frame.pc - 1, %instr, "step");

            match instr {
                Instr::Const(i) => {
                    let value = module.consts.get(i as usize).cloned().ok_or_else(|| malformed("constant out of range"))?;
                    self.push(value)?;
                }
                Instr::Load(slot) => {
                    let value = self.local(locals_base, slot)?.clone();
                    self.push(value)?;
                }
                Instr::Store(slot) => {
                    let value = self.pop()?;
                    *self.local_mut(locals_base, slot)? = value;
                }
                Instr::Pop => {
                    self.pop()?;
                }
                Instr::Dup => {
                    let value = self.stack.last().cloned().ok_or_else(|| malformed("dup on empty stack"))?;
                    self.push(value)?;
                }
                Instr::PushUnit => self.push(Value::Unit)?,
                Instr::Neg => {
                    let v = self.pop()?;
                    self.push(UnaryOp::Neg.apply(&v)?)?;
                }
                Instr::Not => {
                    let v = self.pop()?;
                    self.push(UnaryOp::Not.apply(&v)?)?;
                }
                Instr::Binary(op) => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(op.apply(&a, &b)?)?;
                }
                Instr::Compare(op) => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(op.apply(&a, &b)?)?;
                }
                Instr::Cast(kind) => {
                    let v = self.pop()?;
                    self.push(cast_value(&v, &kind.to_type())?)?;
                }
                Instr::Jump(target) => self.jump(target),
                Instr::JumpIfFalse(target) => {
                    if !self.pop_bool()? {
                        self.jump(target);
                    }
                }
                Instr::JumpIfTrue(target) => {
                    if self.pop_bool()? {
                        self.jump(target);
                    }
                }
                Instr::Call(index) => {
                    let callee = module
                        .functions
                        .get(index as usize)
                        .ok_or_else(|| malformed("call target out of range"))?;
                    let n = callee.n_params as usize;
                    let base = self.frame_stack_base();
                    if self.stack.len() < base + n {
                        return Err(malformed("not enough arguments on the stack"));
                    }
                    let args = self.stack.split_off(self.stack.len() - n);
                    self.enter(index as usize, args)?;
                }
                Instr::Ret => {
                    let result = self.pop()?;
                    let frame = self.frames.pop().ok_or_else(|| malformed("return without a frame"))?;
                    if self.stack.len() != frame.stack_base {
                        return Err(malformed("operand stack not balanced on return"));
                    }
                    self.locals.truncate(frame.locals_base);
                    if self.frames.is_empty() {
                        return Ok(result);
                    }
                    self.push(result)?;
                }
            }
        }
    }

    fn enter(&mut self, function: usize, args: Vec<Value>) -> Result<(), RuntimeError> {
        if self.frames.len() >= self.limits.max_call_depth {
            warn!(limit = self.limits.max_call_depth, "call depth limit reached");
            return Err(RuntimeError::CallDepthExceeded {
                limit: self.limits.max_call_depth,
            });
        }
        let n_locals = self.module.functions[function].n_locals as usize;
        let locals_base = self.locals.len();
        self.locals.extend(args);
        self.locals.resize(locals_base + n_locals, Value::Unit);
        self.frames.push(Frame {
            function,
            pc: 0,
            locals_base,
            stack_base: self.stack.len(),
        });
        Ok(())
    }

    fn tick(&mut self) -> Result<(), RuntimeError> {
        if self.steps >= self.limits.fuel {
            warn!(fuel = self.limits.fuel, "fuel exhausted");
            return Err(RuntimeError::FuelExhausted { steps: self.steps });
        }
        self.steps += 1;
        if self.steps % CANCEL_POLL_INTERVAL == 0 {
            if let Some(token) = &self.cancel {
                if token.is_cancelled() {
                    return Err(RuntimeError::Cancelled);
                }
            }
        }
        Ok(())
    }

    fn frame_stack_base(&self) -> usize {
        self.frames.last().map(|f| f.stack_base).unwrap_or(0)
    }

    fn jump(&mut self, target: u32) {
        if let Some(frame) = self.frames.last_mut() {
            frame.pc = target as usize;
        }
    }

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() >= self.limits.max_stack {
            warn!(limit = self.limits.max_stack, "operand stack limit reached");
            return Err(RuntimeError::StackOverflow {
                limit: self.limits.max_stack,
            });
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        if self.stack.len() <= self.frame_stack_base() {
            return Err(malformed("operand stack underflow"));
        }
        self.stack.pop().ok_or_else(|| malformed("operand stack underflow"))
    }

    fn pop_bool(&mut self) -> Result<bool, RuntimeError> {
        let value = self.pop()?;
        value
            .as_bool()
            .ok_or_else(|| RuntimeError::Malformed(format!("branch on non-bool value {}", value)))
    }

    fn local(&self, base: usize, slot: u16) -> Result<&Value, RuntimeError> {
        self.locals.get(base + slot as usize).ok_or_else(|| malformed("local slot out of range"))
    }

    fn local_mut(&mut self, base: usize, slot: u16) -> Result<&mut Value, RuntimeError> {
        self.locals.get_mut(base + slot as usize).ok_or_else(|| malformed("local slot out of range"))
    }
}

fn malformed(msg: &str) -> RuntimeError {
    RuntimeError::Malformed(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use metast_codegen::bytecode::{Function, ValueKind};
    use metast_ir::BinaryOp;
    use pretty_assertions::assert_eq;

    fn module(code: Vec<Instr>, consts: Vec<Value>) -> Module {
        Module {
            consts,
            functions: vec![Function {
                name: "__entry".to_string(),
                n_params: 0,
                n_locals: 1,
                code,
            }],
            entry: 0,
            inputs: Vec::new(),
        }
    }

    #[test]
    fn test_arithmetic() {
        let m = module(
            vec![Instr::Const(0), Instr::Const(1), Instr::Binary(BinaryOp::Mul), Instr::Ret],
            vec![Value::I64(6), Value::I64(7)],
        );
        assert_eq!(Vm::new(&m, Limits::default()).run(vec![]), Ok(Value::I64(42)));
    }

    #[test]
    fn test_division_by_zero() {
        let m = module(
            vec![Instr::Const(0), Instr::Const(1), Instr::Binary(BinaryOp::Div), Instr::Ret],
            vec![Value::I32(1), Value::I32(0)],
        );
        assert_eq!(Vm::new(&m, Limits::default()).run(vec![]), Err(RuntimeError::DivisionByZero));
    }

    #[test]
    fn test_infinite_loop_runs_out_of_fuel() {
        let m = module(vec![Instr::Jump(0), Instr::Ret], vec![]);
        let result = Vm::new(&m, Limits::default().with_fuel(1_000)).run(vec![]);
        assert_eq!(result, Err(RuntimeError::FuelExhausted { steps: 1_000 }));
    }

    #[test]
    fn test_cancelled_vm_stops_at_next_poll() {
        let m = module(vec![Instr::Jump(0), Instr::Ret], vec![]);
        let token = CancelToken::new();
        token.cancel();
        let mut vm = Vm::new(&m, Limits::default().with_fuel(u64::MAX)).with_cancel(token);
        assert_eq!(vm.run(vec![]), Err(RuntimeError::Cancelled));
        assert_eq!(vm.steps(), CANCEL_POLL_INTERVAL);
    }

    #[test]
    fn test_stack_limit() {
        let m = module(vec![Instr::PushUnit, Instr::Jump(0), Instr::Ret], vec![]);
        let result = Vm::new(&m, Limits::default().with_max_stack(16)).run(vec![]);
        assert_eq!(result, Err(RuntimeError::StackOverflow { limit: 16 }));
    }

    #[test]
    fn test_unbounded_recursion_hits_call_depth() {
        let mut m = module(vec![Instr::Call(0), Instr::Ret], vec![]);
        m.functions[0].n_locals = 0;
        let result = Vm::new(&m, Limits::default().with_max_call_depth(8)).run(vec![]);
        assert_eq!(result, Err(RuntimeError::CallDepthExceeded { limit: 8 }));
    }

    #[test]
    fn test_branch_on_non_bool_is_malformed() {
        let m = module(vec![Instr::Const(0), Instr::JumpIfFalse(2), Instr::Ret], vec![Value::I64(1)]);
        assert!(matches!(
            Vm::new(&m, Limits::default()).run(vec![]),
            Err(RuntimeError::Malformed(_))
        ));
    }

    #[test]
    fn test_cast_and_locals() {
        let m = module(
            vec![Instr::Const(0), Instr::Cast(ValueKind::I64), Instr::Store(0), Instr::Load(0), Instr::Ret],
            vec![Value::I32(-3)],
        );
        assert_eq!(Vm::new(&m, Limits::default()).run(vec![]), Ok(Value::I64(-3)));
    }

    #[test]
    fn test_frame_cannot_pop_callers_operands() {
        let mut m = module(vec![Instr::Const(0), Instr::Call(1), Instr::Ret], vec![Value::I64(1)]);
        m.functions.push(Function {
            name: "thief".to_string(),
            n_params: 0,
            n_locals: 0,
            code: vec![Instr::Ret],
        });
        assert!(matches!(
            Vm::new(&m, Limits::default()).run(vec![]),
            Err(RuntimeError::Malformed(_))
        ));
    }

    #[test]
    fn test_limits_deserialize_with_defaults() {
        let limits: Limits = serde_json::from_str(r#"{"fuel": 5}"#).unwrap();
        assert_eq!(limits, Limits::default().with_fuel(5));
    }
}
