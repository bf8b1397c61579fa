//! Reference interpreter
//!
//! Evaluates a [`CompilationUnit`] directly over the IR graph. It shares the
//! operator semantics in `metast_ir::ops` with the VM, so for every program
//! that runs to completion both produce the same value or the same error.
//! Fuel counts evaluated nodes here rather than instructions.

use crate::loader::{coerce_input, input_value};
use crate::vm::Limits;
use metast_error::RuntimeError;
use metast_ir::{cast_value, BinaryOp, CompilationUnit, Environment, Node, NodeKind, Value};

/// Evaluates the unit's entry with default limits
pub fn evaluate(unit: &CompilationUnit, inputs: &Environment) -> Result<Value, RuntimeError> {
    evaluate_with_limits(unit, inputs, Limits::default())
}

pub fn evaluate_with_limits(
    unit: &CompilationUnit,
    inputs: &Environment,
    limits: Limits,
) -> Result<Value, RuntimeError> {
    let mut scope = Vec::new();
    for (name, ty) in unit.inputs().signature() {
        let value = coerce_input(&name, input_value(inputs, &name)?, &ty)?;
        scope.push((name, value));
    }
    let mut interp = Interp {
        unit,
        limits,
        steps: 0,
        depth: 1,
    };
    interp.eval(unit.entry(), &mut scope)
}

struct Interp<'u> {
    unit: &'u CompilationUnit,
    limits: Limits,
    steps: u64,
    depth: usize,
}

/// Visible bindings, innermost last
type Scope = Vec<(String, Value)>;

impl Interp<'_> {
    fn eval(&mut self, node: &Node, scope: &mut Scope) -> Result<Value, RuntimeError> {
        if self.steps >= self.limits.fuel {
            return Err(RuntimeError::FuelExhausted { steps: self.steps });
        }
        self.steps += 1;

        match node.kind() {
            NodeKind::Literal(value) => Ok(value.clone()),
            NodeKind::Var { name, .. } => lookup(scope, name).cloned(),
            NodeKind::Unary { op, operand } => {
                let v = self.eval(operand, scope)?;
                op.apply(&v)
            }
            NodeKind::Binary { op: BinaryOp::And, lhs, rhs } => {
                if self.eval_bool(lhs, scope)? {
                    self.eval(rhs, scope)
                } else {
                    Ok(Value::Bool(false))
                }
            }
            NodeKind::Binary { op: BinaryOp::Or, lhs, rhs } => {
                if self.eval_bool(lhs, scope)? {
                    Ok(Value::Bool(true))
                } else {
                    self.eval(rhs, scope)
                }
            }
            NodeKind::Binary { op, lhs, rhs } => {
                let a = self.eval(lhs, scope)?;
                let b = self.eval(rhs, scope)?;
                op.apply(&a, &b)
            }
            NodeKind::Compare { op, lhs, rhs } => {
                let a = self.eval(lhs, scope)?;
                let b = self.eval(rhs, scope)?;
                op.apply(&a, &b)
            }
            NodeKind::Cast { to, operand } => {
                let v = self.eval(operand, scope)?;
                cast_value(&v, to)
            }
            NodeKind::If { cond, then_branch, else_branch } => {
                if self.eval_bool(cond, scope)? {
                    self.eval(then_branch, scope)
                } else {
                    self.eval(else_branch, scope)
                }
            }
            NodeKind::Let { name, value, body } => {
                let v = self.eval(value, scope)?;
                scope.push((name.clone(), v));
                let result = self.eval(body, scope);
                scope.pop();
                result
            }
            NodeKind::Assign { name, value } => {
                let v = self.eval(value, scope)?;
                let slot = scope
                    .iter_mut()
                    .rev()
                    .find(|(n, _)| n == name)
                    .ok_or_else(|| unbound(name))?;
                slot.1 = v;
                Ok(Value::Unit)
            }
            NodeKind::Loop { cond, body } => {
                while self.eval_bool(cond, scope)? {
                    self.eval(body, scope)?;
                }
                Ok(Value::Unit)
            }
            NodeKind::Seq(items) => {
                let mut last = Value::Unit;
                for item in items {
                    last = self.eval(item, scope)?;
                }
                Ok(last)
            }
            NodeKind::Call { callee, args } => {
                let def = self
                    .unit
                    .function(&callee.name)
                    .ok_or_else(|| RuntimeError::Malformed(format!("call to unknown function `{}`", callee.name)))?;
                let mut frame = Vec::with_capacity(args.len());
                for (arg, (param, ty)) in args.iter().zip(def.params()) {
                    let v = self.eval(arg, scope)?;
                    // Widen subtype arguments the way the VM does at call sites
                    let v = if v.has_type(ty) { v } else { cast_value(&v, ty)? };
                    frame.push((param.clone(), v));
                }
                if self.depth >= self.limits.max_call_depth {
                    return Err(RuntimeError::CallDepthExceeded {
                        limit: self.limits.max_call_depth,
                    });
                }
                self.depth += 1;
                let result = self.eval(def.body(), &mut frame);
                self.depth -= 1;
                result
            }
            NodeKind::Extension(ext) => {
                let payload = ext.payload();
                match payload.expand(ext.args()) {
                    Some(expanded) => {
                        let expanded = expanded.map_err(|e| RuntimeError::Malformed(e.to_string()))?;
                        self.eval(&expanded, scope)
                    }
                    None => {
                        let mut values = Vec::with_capacity(ext.args().len());
                        for arg in ext.args() {
                            values.push(self.eval(arg, scope)?);
                        }
                        payload.fold(&values).ok_or_else(|| {
                            RuntimeError::Malformed(format!("extension `{}` cannot be evaluated", ext.name()))
                        })
                    }
                }
            }
        }
    }

    fn eval_bool(&mut self, node: &Node, scope: &mut Scope) -> Result<bool, RuntimeError> {
        let value = self.eval(node, scope)?;
        value
            .as_bool()
            .ok_or_else(|| RuntimeError::Malformed(format!("expected a bool, found {}", value)))
    }
}

fn lookup<'s>(scope: &'s Scope, name: &str) -> Result<&'s Value, RuntimeError> {
    scope
        .iter()
        .rev()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v)
        .ok_or_else(|| unbound(name))
}

fn unbound(name: &str) -> RuntimeError {
    RuntimeError::Malformed(format!("unbound name `{}`", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use metast_ir::builder::*;
    use metast_ir::{FunctionBuilder, Type, UnitBuilder};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_counted_loop() {
        // let acc = 0 in (for i in 0..5 { acc := acc + i }; acc)
        let acc = || var("acc", Type::i64());
        let i = var("i", Type::i64());
        let body = assign("acc", add(acc(), i).unwrap()).unwrap();
        let entry = let_in(
            "acc",
            i64(0),
            seq(vec![count_loop("i", i64(0), i64(5), body).unwrap(), acc()]).unwrap(),
        )
        .unwrap();
        let unit = UnitBuilder::new("u").build(entry).unwrap();
        assert_eq!(evaluate(&unit, &Environment::new()), Ok(Value::I64(10)));
    }

    #[test]
    fn test_short_circuit_skips_division() {
        let boom = eq(div(i64(1), i64(0)).unwrap(), i64(0)).unwrap();
        let unit = UnitBuilder::new("u")
            .build(and(boolean(false), boom.clone()).unwrap())
            .unwrap();
        assert_eq!(evaluate(&unit, &Environment::new()), Ok(Value::Bool(false)));

        let unit = UnitBuilder::new("u").build(and(boolean(true), boom).unwrap()).unwrap();
        assert_eq!(evaluate(&unit, &Environment::new()), Err(RuntimeError::DivisionByZero));
    }

    #[test]
    fn test_recursion_with_depth_limit() {
        let f = FunctionBuilder::new("fact", Type::i64()).param("n", Type::i64());
        let n = f.arg("n").unwrap();
        let recurse = call(&f.sig(), vec![sub(n.clone(), i64(1)).unwrap()]).unwrap();
        let body = if_expr(le(n.clone(), i64(1)).unwrap(), i64(1), mul(n, recurse).unwrap()).unwrap();
        let fact = f.body(body).unwrap();
        let entry = call(fact.sig(), vec![i32(10)]).unwrap();
        let unit = UnitBuilder::new("u").function(fact).build(entry).unwrap();
        assert_eq!(evaluate(&unit, &Environment::new()), Ok(Value::I64(3_628_800)));

        let limits = Limits::default().with_max_call_depth(4);
        assert_eq!(
            evaluate_with_limits(&unit, &Environment::new(), limits),
            Err(RuntimeError::CallDepthExceeded { limit: 4 })
        );
    }

    #[test]
    fn test_functions_do_not_see_caller_bindings() {
        let f = FunctionBuilder::new("k", Type::i64()).param("x", Type::i64());
        let x = f.arg("x").unwrap();
        let k = f.body(x).unwrap();
        let entry = let_in("x", i64(99), call(k.sig(), vec![i64(1)]).unwrap()).unwrap();
        let unit = UnitBuilder::new("u").function(k).build(entry).unwrap();
        assert_eq!(evaluate(&unit, &Environment::new()), Ok(Value::I64(1)));
    }

    #[test]
    fn test_fuel() {
        let forever = loop_while(boolean(true), unit()).unwrap();
        let unit = UnitBuilder::new("u").build(forever).unwrap();
        let limits = Limits::default().with_fuel(100);
        assert!(matches!(
            evaluate_with_limits(&unit, &Environment::new(), limits),
            Err(RuntimeError::FuelExhausted { .. })
        ));
    }
}
