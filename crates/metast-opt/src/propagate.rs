//! Constant propagation through `let`

use crate::pass::{transform, Pass, PassContext, Rewrite};
use metast_error::Result;
use metast_ir::builder::{is_assigned, substitute};
use metast_ir::{Node, NodeKind};

/// Substitutes `let` bindings of literals into their body and drops the
/// binding
///
/// Bindings that the body assigns to are left alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConstantPropagation;

impl Pass for ConstantPropagation {
    fn name(&self) -> &'static str {
        "constant-propagation"
    }

    fn run(&self, node: &Node, _ctx: &PassContext<'_>) -> Result<Node> {
        transform(node, &mut |n| {
            let NodeKind::Let { name, value, body } = n.kind() else {
                return Ok(Rewrite::Keep);
            };
            if !value.is_literal() || is_assigned(body, name) {
                return Ok(Rewrite::Keep);
            }
            // The substituted body may expose further literal bindings
            Ok(Rewrite::Revisit(substitute(body, name, value)?))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metast_ir::builder::*;
    use metast_ir::{Type, UnitBuilder};
    use pretty_assertions::assert_eq;

    fn run(node: Node) -> Node {
        let unit = UnitBuilder::new("t").input("y", Type::i64()).build(node.clone()).unwrap();
        ConstantPropagation.run(&node, &PassContext::new(&unit)).unwrap()
    }

    fn x() -> Node {
        var("x", Type::i64())
    }

    #[test]
    fn test_propagates_literal() {
        let node = let_in("x", i64(4), add(x(), x()).unwrap()).unwrap();
        assert_eq!(run(node).to_string(), "(add 4 4)");
    }

    #[test]
    fn test_chained_bindings() {
        // let x = 1 in let z = x in z
        let z = var("z", Type::i64());
        let node = let_in("x", i64(1), let_in("z", x(), z).unwrap()).unwrap();
        assert_eq!(run(node), i64(1));
    }

    #[test]
    fn test_assigned_binding_kept() {
        let body = seq(vec![assign("x", i64(2)).unwrap(), x()]).unwrap();
        let node = let_in("x", i64(1), body).unwrap();
        assert_eq!(run(node.clone()), node);
    }

    #[test]
    fn test_non_literal_kept() {
        let y = var("y", Type::i64());
        let node = let_in("x", add(y, i64(1)).unwrap(), x()).unwrap();
        assert_eq!(run(node.clone()), node);
    }

    #[test]
    fn test_idempotent() {
        let y = var("y", Type::i64());
        let node = let_in(
            "x",
            i64(3),
            let_in("w", add(x(), y).unwrap(), mul(var("w", Type::i64()), x()).unwrap()).unwrap(),
        )
        .unwrap();
        let once = run(node);
        assert_eq!(once.to_string(), "(let w (add 3 y) (mul w 3))");
        assert_eq!(run(once.clone()), once);
    }
}
