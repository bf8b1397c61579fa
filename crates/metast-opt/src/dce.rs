//! Dead binding elimination

use crate::pass::{is_discardable, transform, Pass, PassContext, Rewrite};
use metast_error::Result;
use metast_ir::builder::{occurs_free, seq};
use metast_ir::{Node, NodeKind};

/// Removes unused `let` bindings and effect-free statements
///
/// A `let` is dropped when its name does not occur in the body and its
/// value is discardable. In a `seq`, discardable elements other than the
/// last are dropped; a `seq` left with one element becomes that element.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeadBindingElim;

impl Pass for DeadBindingElim {
    fn name(&self) -> &'static str {
        "dead-binding-elim"
    }

    fn run(&self, node: &Node, _ctx: &PassContext<'_>) -> Result<Node> {
        transform(node, &mut |n| match n.kind() {
            NodeKind::Let { name, value, body } => {
                if !occurs_free(body, name) && is_discardable(value) {
                    Ok(Rewrite::Replace(body.clone()))
                } else {
                    Ok(Rewrite::Keep)
                }
            }
            NodeKind::Seq(items) => prune_seq(items),
            _ => Ok(Rewrite::Keep),
        })
    }
}

fn prune_seq(items: &[Node]) -> Result<Rewrite> {
    let Some((last, init)) = items.split_last() else {
        return Ok(Rewrite::Keep);
    };
    let kept: Vec<Node> = init
        .iter()
        .filter(|item| !is_discardable(item))
        .cloned()
        .collect();
    if kept.len() == init.len() {
        return Ok(Rewrite::Keep);
    }
    if kept.is_empty() {
        return Ok(Rewrite::Replace(last.clone()));
    }
    let mut items = kept;
    items.push(last.clone());
    Ok(Rewrite::Replace(seq(items)?))
}
