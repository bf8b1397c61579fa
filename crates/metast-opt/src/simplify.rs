//! Algebraic simplification

use crate::pass::{is_discardable, literal_bool, transform, Pass, PassContext, Rewrite};
use metast_error::Result;
use metast_ir::{BinaryOp, Node, NodeKind, Value};

/// Removes identity operations
///
/// | pattern                          | result | applies to        |
/// |----------------------------------|--------|-------------------|
/// | `x + 0`, `0 + x`                 | `x`    | integers          |
/// | `x + ""`, `"" + x`               | `x`    | strings           |
/// | `x - 0`, `x * 1`, `1 * x`, `x / 1` | `x`  | numbers           |
/// | `x * 0`, `0 * x`, `x & 0`        | `0`    | integers, `x` discardable |
/// | `x \| 0`, `x ^ 0`, `x << 0`, `x >> 0` | `x` | integers        |
/// | `true and x`, `x and true`       | `x`    |                   |
/// | `false or x`, `x or false`       | `x`    |                   |
/// | `false and x`, `true or x`       | literal |                  |
/// | `not not x`, `neg neg x`         | `x`    |                   |
/// | cast of `x` to its own type      | `x`    |                   |
///
/// Float additive identities are skipped (`-0.0 + 0.0` is `+0.0`).
#[derive(Debug, Default, Clone, Copy)]
pub struct AlgebraicSimplify;

impl Pass for AlgebraicSimplify {
    fn name(&self) -> &'static str {
        "algebraic-simplify"
    }

    fn run(&self, node: &Node, _ctx: &PassContext<'_>) -> Result<Node> {
        transform(node, &mut |n| Ok(simplify(n)))
    }
}

fn simplify(node: &Node) -> Rewrite {
    let replacement = match node.kind() {
        NodeKind::Binary { op, lhs, rhs } => simplify_binary(*op, lhs, rhs),
        NodeKind::Unary { op, operand } => match operand.kind() {
            NodeKind::Unary { op: inner, operand: x } if inner == op => Some(x.clone()),
            _ => None,
        },
        NodeKind::Cast { to, operand } if operand.ty() == to => Some(operand.clone()),
        _ => None,
    };
    match replacement.filter(|r| r.ty() == node.ty()) {
        Some(r) => Rewrite::Replace(r),
        None => Rewrite::Keep,
    }
}

fn is_zero(node: &Node) -> bool {
    node.as_literal().is_some_and(Value::is_zero)
}

fn is_one(node: &Node) -> bool {
    node.as_literal().is_some_and(Value::is_one)
}

fn is_empty_str(node: &Node) -> bool {
    matches!(node.as_literal(), Some(Value::Str(s)) if s.is_empty())
}

fn simplify_binary(op: BinaryOp, lhs: &Node, rhs: &Node) -> Option<Node> {
    use BinaryOp::*;
    let ty = lhs.ty();
    let int = ty.is_integer();
    match op {
        Add if int && is_zero(rhs) => Some(lhs.clone()),
        Add if int && is_zero(lhs) => Some(rhs.clone()),
        Add if ty.is_str() && is_empty_str(rhs) => Some(lhs.clone()),
        Add if ty.is_str() && is_empty_str(lhs) => Some(rhs.clone()),
        Sub if is_zero(rhs) => Some(lhs.clone()),
        Mul if is_one(rhs) => Some(lhs.clone()),
        Mul if is_one(lhs) => Some(rhs.clone()),
        Div if is_one(rhs) => Some(lhs.clone()),
        Mul | BitAnd if int && is_zero(rhs) && is_discardable(lhs) => Some(rhs.clone()),
        Mul | BitAnd if int && is_zero(lhs) && is_discardable(rhs) => Some(lhs.clone()),
        BitOr | BitXor if is_zero(rhs) => Some(lhs.clone()),
        BitOr | BitXor if is_zero(lhs) => Some(rhs.clone()),
        Shl | Shr if is_zero(rhs) => Some(lhs.clone()),
        And => match (literal_bool(lhs), literal_bool(rhs)) {
            (Some(true), _) => Some(rhs.clone()),
            (_, Some(true)) => Some(lhs.clone()),
            (Some(false), _) => Some(lhs.clone()),
            (_, Some(false)) if is_discardable(lhs) => Some(rhs.clone()),
            _ => None,
        },
        Or => match (literal_bool(lhs), literal_bool(rhs)) {
            (Some(false), _) => Some(rhs.clone()),
            (_, Some(false)) => Some(lhs.clone()),
            (Some(true), _) => Some(lhs.clone()),
            (_, Some(true)) if is_discardable(lhs) => Some(rhs.clone()),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metast_ir::builder::*;
    use metast_ir::{Type, UnitBuilder};
    use pretty_assertions::assert_eq;

    fn run(node: Node) -> Node {
        let unit = UnitBuilder::new("t")
            .input("x", Type::i64())
            .input("f", Type::f64())
            .input("b", Type::bool())
            .build(node.clone())
            .unwrap();
        AlgebraicSimplify.run(&node, &PassContext::new(&unit)).unwrap()
    }

    fn x() -> Node {
        var("x", Type::i64())
    }

    fn b() -> Node {
        var("b", Type::bool())
    }

    #[test]
    fn test_integer_identities() {
        assert_eq!(run(add(x(), i64(0)).unwrap()), x());
        assert_eq!(run(add(i64(0), x()).unwrap()), x());
        assert_eq!(run(mul(i64(1), x()).unwrap()), x());
        assert_eq!(run(div(x(), i64(1)).unwrap()), x());
        assert_eq!(run(mul(x(), i64(0)).unwrap()), i64(0));
    }

    #[test]
    fn test_float_additive_identity_skipped() {
        let f = var("f", Type::f64());
        let node = add(f.clone(), f64(0.0)).unwrap();
        assert_eq!(run(node.clone()), node);
        assert_eq!(run(mul(f.clone(), f64(1.0)).unwrap()), f);
    }

    #[test]
    fn test_trapping_operand_is_kept() {
        // (1 / x) * 0 must still divide
        let node = mul(div(i64(1), x()).unwrap(), i64(0)).unwrap();
        assert_eq!(run(node.clone()), node);
    }

    #[test]
    fn test_boolean_identities() {
        assert_eq!(run(and(boolean(true), b()).unwrap()), b());
        assert_eq!(run(or(b(), boolean(false)).unwrap()), b());
        assert_eq!(run(and(boolean(false), b()).unwrap()), boolean(false));
        assert_eq!(run(or(b(), boolean(true)).unwrap()), boolean(true));
        assert_eq!(run(not(not(b()).unwrap()).unwrap()), b());
    }

    #[test]
    fn test_redundant_cast() {
        assert_eq!(run(cast(x(), Type::i64()).unwrap()), x());
        let widen = cast(x(), Type::f64()).unwrap();
        assert_eq!(run(widen.clone()), widen);
    }

    #[test]
    fn test_idempotent() {
        let node = add(mul(add(x(), i64(0)).unwrap(), i64(1)).unwrap(), i64(0)).unwrap();
        let once = run(node);
        assert_eq!(once, x());
        assert_eq!(run(once.clone()), once);
    }
}
