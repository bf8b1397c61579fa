//! Constant folding

use crate::pass::{transform, Pass, PassContext, Rewrite};
use metast_error::Result;
use metast_ir::{Node, Value};

/// Replaces foldable nodes whose children are all literals by a literal
///
/// Works on any node advertising the foldable capability, extension nodes
/// included. Operations that would fail at runtime (division by zero) are
/// left in place so the failure still happens.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConstantFold;

impl Pass for ConstantFold {
    fn name(&self) -> &'static str {
        "constant-fold"
    }

    fn run(&self, node: &Node, _ctx: &PassContext<'_>) -> Result<Node> {
        transform(node, &mut |n| Ok(fold_node(n)))
    }
}

fn fold_node(node: &Node) -> Rewrite {
    let Some(foldable) = node.foldable() else {
        return Rewrite::Keep;
    };
    let operands: Option<Vec<Value>> = node
        .children()
        .into_iter()
        .map(|c| c.as_literal().cloned())
        .collect();
    // A literal only carries a structural type; named results stay unfolded
    let folded = operands
        .and_then(|ops| foldable.fold(&ops))
        .filter(|v| v.ty() == *node.ty());
    match folded {
        Some(value) => Rewrite::Replace(Node::literal(value)),
        None => Rewrite::Keep,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metast_ir::builder::*;
    use metast_ir::{Capabilities, Extension, Arity, Type, UnitBuilder};
    use metast_error::BuildError;
    use pretty_assertions::assert_eq;

    fn run(node: Node) -> Node {
        let unit = UnitBuilder::new("t").input("x", Type::i64()).build(node.clone()).unwrap();
        ConstantFold.run(&node, &PassContext::new(&unit)).unwrap()
    }

    #[test]
    fn test_folds_nested_arithmetic() {
        let node = add(i64(2), mul(i64(3), i64(4)).unwrap()).unwrap();
        assert_eq!(run(node), i64(14));
    }

    #[test]
    fn test_partial_fold() {
        let x = var("x", Type::i64());
        let node = add(x, mul(i64(3), i64(4)).unwrap()).unwrap();
        assert_eq!(run(node).to_string(), "(add x 12)");
    }

    #[test]
    fn test_division_by_zero_is_kept() {
        let node = div(i64(1), i64(0)).unwrap();
        assert_eq!(run(node.clone()), node);
    }

    #[test]
    fn test_wrapping_and_casts() {
        let node = add(i32(i32::MAX), i32(1)).unwrap();
        assert_eq!(run(node), i32(i32::MIN));
        let node = cast(f64(f64::NAN), Type::i64()).unwrap();
        assert_eq!(run(node), i64(0));
    }

    #[test]
    fn test_if_is_not_folded() {
        // Control flow belongs to branch pruning
        let node = if_expr(boolean(true), i64(1), i64(2)).unwrap();
        assert_eq!(run(node.clone()), node);
    }

    #[derive(Debug)]
    struct Clamp;

    impl Extension for Clamp {
        fn name(&self) -> &str {
            "clamp"
        }

        fn arity(&self) -> Arity {
            Arity::Exact(3)
        }

        fn type_of(&self, args: &[Type]) -> std::result::Result<Type, BuildError> {
            if args.iter().all(|t| *t == Type::i64()) {
                Ok(Type::i64())
            } else {
                Err(BuildError::mismatch("clamp", "i64", &args[0]))
            }
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::FOLDABLE | Capabilities::PURE
        }

        fn fold(&self, args: &[Value]) -> Option<Value> {
            match args {
                [Value::I64(v), Value::I64(lo), Value::I64(hi)] => Some(Value::I64((*v).max(*lo).min(*hi))),
                _ => None,
            }
        }
    }

    #[test]
    fn test_folds_extension() {
        let node = extension(Clamp, vec![i64(42), i64(0), add(i64(5), i64(5)).unwrap()]).unwrap();
        assert_eq!(run(node), i64(10));
    }

    #[test]
    fn test_idempotent() {
        let x = var("x", Type::i64());
        let node = sub(mul(x, add(i64(1), i64(1)).unwrap()).unwrap(), div(i64(1), i64(0)).unwrap()).unwrap();
        let once = run(node);
        assert_eq!(run(once.clone()), once);
    }
}
