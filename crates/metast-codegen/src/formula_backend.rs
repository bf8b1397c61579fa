//! Formula Backend - Generates spreadsheet formula text
//!
//! The entry node becomes a single formula; unit inputs are referenced by
//! name. Every number is an IEEE double in the target, so integer wrapping
//! and the bit width of `i32` versus `i64` are not emulated, and the
//! `BIT*` functions only accept non-negative operands.
//!
//! There is no rule for `loop`, `assign`, `call` or a `seq` of more than
//! one element; lowering them fails with `UnsupportedVariant`.

use crate::{check_cancel, expand_extension, unsupported, Artifact, CodeGen};
use metast_error::LoweringError;
use metast_ir::{BackendKind, BinaryOp, CancelToken, CompareOp, CompilationUnit, Node, NodeKind, UnaryOp, Value};
use std::collections::BTreeSet;
use tracing::debug;

const BACKEND: BackendKind = BackendKind::Formula;

/// Spreadsheet formula backend
#[derive(Debug, Default, Clone, Copy)]
pub struct FormulaBackend;

impl FormulaBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CodeGen for FormulaBackend {
    fn kind(&self) -> BackendKind {
        BACKEND
    }

    fn lower(&self, unit: &CompilationUnit, cancel: &CancelToken) -> Result<Artifact, LoweringError> {
        check_cancel(cancel)?;
        let mut writer = FormulaWriter::default();
        for (name, _) in unit.inputs().signature() {
            let ident = writer.declare(&name, false);
            writer.scope.push((name, ident));
        }
        let formula = writer.expr(unit.entry())?;
        debug!(unit = unit.name(), len = formula.len(), "emitted formula");
        Ok(Artifact::Source {
            backend: BACKEND,
            text: format!("={}\n", formula),
        })
    }
}

fn unrepresentable(detail: impl Into<String>) -> LoweringError {
    LoweringError::Unrepresentable {
        backend: BACKEND.name().to_string(),
        detail: detail.into(),
    }
}

fn literal(value: &Value) -> Result<String, LoweringError> {
    let text = match value {
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::I32(v) => v.to_string(),
        Value::I64(v) => v.to_string(),
        Value::F64(x) if !x.is_finite() => {
            return Err(unrepresentable(format!("non-finite number {}", x)))
        }
        Value::F64(x) => format!("{:?}", x),
        Value::Str(s) => format!("\"{}\"", s.replace('"', "\"\"")),
        Value::Unit => return Err(unrepresentable("the unit value")),
    };
    Ok(text)
}

#[derive(Default)]
struct FormulaWriter {
    scope: Vec<(String, String)>,
    used: BTreeSet<String>,
}

impl FormulaWriter {
    /// `LET` names get a leading underscore so they never look like cell
    /// references
    fn declare(&mut self, name: &str, local: bool) -> String {
        let clean: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        let base = if local { format!("_{}", clean) } else { clean };
        let mut ident = base.clone();
        let mut n = 1;
        while self.used.contains(&ident) {
            ident = format!("{}_{}", base, n);
            n += 1;
        }
        self.used.insert(ident.clone());
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

    fn expr(&mut self, node: &Node) -> Result<String, LoweringError> {
        let text = match node.kind() {
            NodeKind::Literal(value) => literal(value)?,
            NodeKind::Var { name, .. } => self.lookup(name)?,
            NodeKind::Unary { op: UnaryOp::Neg, operand } => format!("(-{})", self.expr(operand)?),
            NodeKind::Unary { op: UnaryOp::Not, operand } => format!("NOT({})", self.expr(operand)?),
            NodeKind::Binary { op, lhs, rhs } => {
                let a = self.expr(lhs)?;
                let b = self.expr(rhs)?;
                binary(*op, lhs, &a, &b)
            }
            NodeKind::Compare { op, lhs, rhs } => {
                let a = self.expr(lhs)?;
                let b = self.expr(rhs)?;
                let symbol = match op {
                    CompareOp::Eq => "=",
                    CompareOp::Ne => "<>",
                    other => other.symbol(),
                };
                format!("({}{}{})", a, symbol, b)
            }
            NodeKind::Cast { to, operand } => {
                let a = self.expr(operand)?;
                if operand.ty().is_float() && to.is_integer() {
                    format!("TRUNC({})", a)
                } else {
                    a
                }
            }
            NodeKind::If { cond, then_branch, else_branch } => format!(
                "IF({},{},{})",
                self.expr(cond)?,
                self.expr(then_branch)?,
                self.expr(else_branch)?
            ),
            NodeKind::Let { name, value, body } => {
                let v = self.expr(value)?;
                let ident = self.declare(name, true);
                self.scope.push((name.clone(), ident.clone()));
                let b = self.expr(body);
                self.scope.pop();
                format!("LET({},{},{})", ident, v, b?)
            }
            NodeKind::Seq(items) if items.len() == 1 => self.expr(&items[0])?,
            NodeKind::Extension(ext) => {
                let expanded = expand_extension(BACKEND, node, ext)?;
                self.expr(&expanded)?
            }
            NodeKind::Seq(_) | NodeKind::Loop { .. } | NodeKind::Assign { .. } | NodeKind::Call { .. } => {
                return Err(unsupported(BACKEND, node))
            }
        };
        Ok(text)
    }
}

fn binary(op: BinaryOp, lhs: &Node, a: &str, b: &str) -> String {
    let integer = lhs.ty().is_integer();
    match op {
        BinaryOp::Add if lhs.ty().is_str() => format!("({}&{})", a, b),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => format!("({}{}{})", a, op.symbol(), b),
        BinaryOp::Div if integer => format!("QUOTIENT({},{})", a, b),
        BinaryOp::Div => format!("({}/{})", a, b),
        // Remainder takes the sign of the dividend, unlike MOD
        BinaryOp::Rem if integer => format!("({0}-{1}*QUOTIENT({0},{1}))", a, b),
        BinaryOp::Rem => format!("({0}-{1}*TRUNC({0}/{1}))", a, b),
        BinaryOp::BitAnd => format!("BITAND({},{})", a, b),
        BinaryOp::BitOr => format!("BITOR({},{})", a, b),
        BinaryOp::BitXor => format!("BITXOR({},{})", a, b),
        BinaryOp::Shl => format!("BITLSHIFT({},{})", a, b),
        BinaryOp::Shr => format!("BITRSHIFT({},{})", a, b),
        // IF evaluates only the chosen branch
        BinaryOp::And => format!("IF({},{},FALSE)", a, b),
        BinaryOp::Or => format!("IF({},TRUE,{})", a, b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metast_ir::builder::*;
    use metast_ir::{FunctionBuilder, Type, UnitBuilder};
    use pretty_assertions::assert_eq;

    fn formula(unit: &CompilationUnit) -> Result<String, LoweringError> {
        FormulaBackend::new()
            .lower(unit, &CancelToken::new())
            .map(|a| a.as_text().unwrap_or_default().to_string())
    }

    #[test]
    fn test_if_and_let() {
        let x = var("x", Type::i64());
        let entry = let_in(
            "k",
            mul(x.clone(), i64(2)).unwrap(),
            if_expr(gt(var("k", Type::i64()), i64(10)).unwrap(), var("k", Type::i64()), x).unwrap(),
        )
        .unwrap();
        let unit = UnitBuilder::new("u").input("x", Type::i64()).build(entry).unwrap();
        assert_eq!(formula(&unit).unwrap(), "=LET(_k,(x*2),IF((_k>10),_k,x))\n");
    }

    #[test]
    fn test_integer_division_and_logic() {
        let entry = or(
            eq(div(i64(7), i64(2)).unwrap(), i64(3)).unwrap(),
            not(boolean(false)).unwrap(),
        )
        .unwrap();
        let unit = UnitBuilder::new("u").build(entry).unwrap();
        assert_eq!(formula(&unit).unwrap(), "=IF((QUOTIENT(7,2)=3),TRUE,NOT(FALSE))\n");
    }

    #[test]
    fn test_strings() {
        let unit = UnitBuilder::new("u")
            .build(add(str("say \""), str("hi")).unwrap())
            .unwrap();
        assert_eq!(formula(&unit).unwrap(), "=(\"say \"\"\"&\"hi\")\n");
    }

    #[test]
    fn test_loop_is_unsupported() {
        let unit = UnitBuilder::new("u")
            .build(count_loop("i", i64(0), i64(3), unit()).unwrap())
            .unwrap();
        assert_eq!(
            formula(&unit),
            Err(LoweringError::UnsupportedVariant {
                backend: "formula".to_string(),
                variant: "loop".to_string(),
            })
        );
    }

    #[test]
    fn test_call_is_unsupported() {
        let f = FunctionBuilder::new("one", Type::i64());
        let one = f.body(i64(1)).unwrap();
        let entry = call(one.sig(), vec![]).unwrap();
        let unit = UnitBuilder::new("u").function(one).build(entry).unwrap();
        assert!(matches!(
            formula(&unit),
            Err(LoweringError::UnsupportedVariant { variant, .. }) if variant.starts_with("call")
        ));
    }

    #[test]
    fn test_non_finite_literal() {
        let unit = UnitBuilder::new("u").build(f64(f64::NAN)).unwrap();
        assert!(matches!(formula(&unit), Err(LoweringError::Unrepresentable { .. })));
    }
}
