//! IR Node Model
//!
//! A [`Node`] is an immutable, reference-counted handle. The only way to
//! obtain one is [`Node::new`], which runs the variant's arity and typing
//! rule, so an ill-typed node cannot exist. Rewrites build new nodes;
//! children are fixed at construction, so graphs cannot contain cycles.

use crate::capability::{Capabilities, ControlFlow, Foldable};
use crate::extension::{Extension, ExtensionNode};
use crate::ops::{cast_type, cast_value, BinaryOp, CompareOp, UnaryOp};
use crate::types::{is_subtype, Type};
use crate::value::Value;
use metast_error::{BuildError, Result};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Signature of a callable function
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FnSig {
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Type,
}

impl FnSig {
    pub fn new(name: impl Into<String>, params: Vec<Type>, ret: Type) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
        }
    }

    pub fn fn_type(&self) -> Type {
        Type::function(self.params.clone(), self.ret.clone())
    }
}

/// Node variants
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Literal(Value),
    /// Reference to a let-bound name, function parameter or unit input
    Var { name: String, ty: Type },
    Unary { op: UnaryOp, operand: Node },
    Binary { op: BinaryOp, lhs: Node, rhs: Node },
    Compare { op: CompareOp, lhs: Node, rhs: Node },
    Cast { to: Type, operand: Node },
    If { cond: Node, then_branch: Node, else_branch: Node },
    Let { name: String, value: Node, body: Node },
    /// Overwrites an enclosing binding; evaluates to unit
    Assign { name: String, value: Node },
    /// `while cond { body }`; evaluates to unit
    Loop { cond: Node, body: Node },
    /// Evaluates every element, yields the last
    Seq(Vec<Node>),
    Call { callee: FnSig, args: Vec<Node> },
    Extension(ExtensionNode),
}

/// Variant tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeTag {
    Literal,
    Var,
    Unary,
    Binary,
    Compare,
    Cast,
    If,
    Let,
    Assign,
    Loop,
    Seq,
    Call,
    Extension,
}

impl NodeTag {
    pub fn name(&self) -> &'static str {
        match self {
            NodeTag::Literal => "literal",
            NodeTag::Var => "var",
            NodeTag::Unary => "unary",
            NodeTag::Binary => "binary",
            NodeTag::Compare => "compare",
            NodeTag::Cast => "cast",
            NodeTag::If => "if",
            NodeTag::Let => "let",
            NodeTag::Assign => "assign",
            NodeTag::Loop => "loop",
            NodeTag::Seq => "seq",
            NodeTag::Call => "call",
            NodeTag::Extension => "extension",
        }
    }
}

impl fmt::Display for NodeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Number of children a variant takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match self {
            Arity::Exact(k) => n == *k,
            Arity::AtLeast(k) => n >= *k,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(k) => write!(f, "{}", k),
            Arity::AtLeast(k) => write!(f, "at least {}", k),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct NodeData {
    kind: NodeKind,
    ty: Type,
    /// This node and all descendants are pure
    pure: bool,
}

impl Drop for NodeData {
    /// Releases uniquely owned descendants from an explicit stack, so long
    /// chains do not recurse once per level
    fn drop(&mut self) {
        let mut pending = take_children(&mut self.kind);
        while let Some(node) = pending.pop() {
            if let Ok(mut data) = Arc::try_unwrap(node.0) {
                pending.extend(take_children(&mut data.kind));
            }
        }
    }
}

/// Moves the children out of `kind`, leaving a childless literal behind
fn take_children(kind: &mut NodeKind) -> Vec<Node> {
    if matches!(kind, NodeKind::Literal(_) | NodeKind::Var { .. }) {
        return Vec::new();
    }
    match std::mem::replace(kind, NodeKind::Literal(Value::Unit)) {
        NodeKind::Literal(_) | NodeKind::Var { .. } => Vec::new(),
        NodeKind::Unary { operand, .. } | NodeKind::Cast { operand, .. } => vec![operand],
        NodeKind::Binary { lhs, rhs, .. } | NodeKind::Compare { lhs, rhs, .. } => vec![lhs, rhs],
        NodeKind::If { cond, then_branch, else_branch } => vec![cond, then_branch, else_branch],
        NodeKind::Let { value, body, .. } => vec![value, body],
        NodeKind::Assign { value, .. } => vec![value],
        NodeKind::Loop { cond, body } => vec![cond, body],
        NodeKind::Seq(items) => items,
        NodeKind::Call { args, .. } => args,
        NodeKind::Extension(ext) => ext.into_args(),
    }
}

/// Immutable IR node handle
#[derive(Clone)]
pub struct Node(Arc<NodeData>);

impl Node {
    /// Validating constructor: the single gate through which nodes are created
    pub fn new(kind: NodeKind) -> Result<Node> {
        let arity = kind_arity(&kind);
        let count = kind_children(&kind).len();
        if !arity.accepts(count) {
            return Err(BuildError::arity(kind_label(&kind), arity, count));
        }
        let ty = type_of(&kind)?;
        let pure = kind_capabilities(&kind).contains(Capabilities::PURE)
            && kind_children(&kind).iter().all(|c| c.is_pure());
        Ok(Node(Arc::new(NodeData { kind, ty, pure })))
    }

    /// Literal constructor; literals are always well-typed
    pub fn literal(value: Value) -> Node {
        let ty = value.ty();
        Node(Arc::new(NodeData {
            kind: NodeKind::Literal(value),
            ty,
            pure: true,
        }))
    }

    /// Variable reference; the name's binding is checked by the enclosing unit
    pub fn var(name: impl Into<String>, ty: Type) -> Node {
        Node(Arc::new(NodeData {
            kind: NodeKind::Var { name: name.into(), ty: ty.clone() },
            ty,
            pure: true,
        }))
    }

    pub(crate) fn extension(payload: Arc<dyn Extension>, args: Vec<Node>) -> Result<Node> {
        Node::new(NodeKind::Extension(ExtensionNode::new(payload, args)))
    }

    pub fn kind(&self) -> &NodeKind {
        &self.0.kind
    }

    pub fn ty(&self) -> &Type {
        &self.0.ty
    }

    pub fn tag(&self) -> NodeTag {
        tag_of(self.kind())
    }

    /// Variant name for diagnostics (`loop`, `extension:clamp`, ...)
    pub fn variant_name(&self) -> String {
        kind_label(self.kind())
    }

    /// Direct children in evaluation order
    pub fn children(&self) -> Vec<&Node> {
        kind_children(self.kind())
    }

    pub fn arity(&self) -> Arity {
        kind_arity(self.kind())
    }

    pub fn capabilities(&self) -> Capabilities {
        kind_capabilities(self.kind())
    }

    /// True when this node and every descendant is pure
    pub fn is_pure(&self) -> bool {
        self.0.pure
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match self.kind() {
            NodeKind::Literal(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        self.as_literal().is_some()
    }

    pub fn ptr_eq(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Foldable interface, when the node advertises it
    pub fn foldable(&self) -> Option<&dyn Foldable> {
        if self.capabilities().contains(Capabilities::FOLDABLE) {
            Some(self.kind())
        } else {
            None
        }
    }

    /// Control-flow interface, when the node advertises it
    pub fn control_flow(&self) -> Option<&dyn ControlFlow> {
        if self.capabilities().contains(Capabilities::CONTROL_FLOW) {
            Some(self.kind())
        } else {
            None
        }
    }

    /// Rebuilds the same variant over new children, re-running validation
    ///
    /// Returns `self` unchanged when every child is the same handle.
    pub fn with_children(&self, children: Vec<Node>) -> Result<Node> {
        let arity = self.arity();
        if !arity.accepts(children.len()) {
            return Err(BuildError::arity(self.variant_name(), arity, children.len()));
        }
        let current = self.children();
        if current.len() == children.len()
            && current.iter().zip(&children).all(|(a, b)| a.ptr_eq(b))
        {
            return Ok(self.clone());
        }

        let mut it = children.into_iter();
        // Arity was checked above, so `next` cannot run dry for fixed arities
        let mut next = || it.next().ok_or_else(|| BuildError::arity("node", arity, 0));
        let kind = match self.kind() {
            NodeKind::Literal(v) => NodeKind::Literal(v.clone()),
            NodeKind::Var { name, ty } => NodeKind::Var {
                name: name.clone(),
                ty: ty.clone(),
            },
            NodeKind::Unary { op, .. } => NodeKind::Unary { op: *op, operand: next()? },
            NodeKind::Binary { op, .. } => NodeKind::Binary {
                op: *op,
                lhs: next()?,
                rhs: next()?,
            },
            NodeKind::Compare { op, .. } => NodeKind::Compare {
                op: *op,
                lhs: next()?,
                rhs: next()?,
            },
            NodeKind::Cast { to, .. } => NodeKind::Cast {
                to: to.clone(),
                operand: next()?,
            },
            NodeKind::If { .. } => NodeKind::If {
                cond: next()?,
                then_branch: next()?,
                else_branch: next()?,
            },
            NodeKind::Let { name, .. } => NodeKind::Let {
                name: name.clone(),
                value: next()?,
                body: next()?,
            },
            NodeKind::Assign { name, .. } => NodeKind::Assign {
                name: name.clone(),
                value: next()?,
            },
            NodeKind::Loop { .. } => NodeKind::Loop {
                cond: next()?,
                body: next()?,
            },
            NodeKind::Seq(_) => NodeKind::Seq(std::iter::from_fn(|| next().ok()).collect()),
            NodeKind::Call { callee, .. } => NodeKind::Call {
                callee: callee.clone(),
                args: std::iter::from_fn(|| next().ok()).collect(),
            },
            NodeKind::Extension(ext) => NodeKind::Extension(ExtensionNode::new(
                ext.payload_arc(),
                std::iter::from_fn(|| next().ok()).collect(),
            )),
        };
        Node::new(kind)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0 == other.0
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.kind.hash(state);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, head: &str, items: &[&Node]) -> fmt::Result {
    write!(f, "({}", head)?;
    for item in items {
        write!(f, " {}", item)?;
    }
    write!(f, ")")
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            NodeKind::Literal(v) => write!(f, "{}", v),
            NodeKind::Var { name, .. } => write!(f, "{}", name),
            NodeKind::Unary { op, operand } => write_list(f, &op.to_string(), &[operand]),
            NodeKind::Binary { op, lhs, rhs } => write_list(f, &op.to_string(), &[lhs, rhs]),
            NodeKind::Compare { op, lhs, rhs } => write_list(f, &op.to_string(), &[lhs, rhs]),
            NodeKind::Cast { to, operand } => write_list(f, &format!("cast {}", to), &[operand]),
            NodeKind::If { cond, then_branch, else_branch } => {
                write_list(f, "if", &[cond, then_branch, else_branch])
            }
            NodeKind::Let { name, value, body } => write_list(f, &format!("let {}", name), &[value, body]),
            NodeKind::Assign { name, value } => write_list(f, &format!("set {}", name), &[value]),
            NodeKind::Loop { cond, body } => write_list(f, "loop", &[cond, body]),
            NodeKind::Seq(items) => write_list(f, "seq", &items.iter().collect::<Vec<_>>()),
            NodeKind::Call { callee, args } => {
                write_list(f, &format!("call {}", callee.name), &args.iter().collect::<Vec<_>>())
            }
            NodeKind::Extension(ext) => {
                let head = if ext.payload().key().is_empty() {
                    format!("ext:{}", ext.name())
                } else {
                    format!("ext:{} {}", ext.name(), ext.payload().key())
                };
                write_list(f, &head, &ext.args().iter().collect::<Vec<_>>())
            }
        }
    }
}

impl Foldable for NodeKind {
    fn fold(&self, operands: &[Value]) -> Option<Value> {
        match (self, operands) {
            (NodeKind::Unary { op, .. }, [v]) => op.apply(v).ok(),
            (NodeKind::Binary { op, .. }, [a, b]) => op.apply(a, b).ok(),
            (NodeKind::Compare { op, .. }, [a, b]) => op.apply(a, b).ok(),
            (NodeKind::Cast { to, .. }, [v]) => cast_value(v, to).ok(),
            (NodeKind::Extension(ext), args) => ext.payload().fold(args),
            _ => None,
        }
    }
}

impl ControlFlow for NodeKind {
    fn condition_index(&self) -> usize {
        match self {
            NodeKind::Extension(ext) => ext.payload().condition_index(),
            _ => 0,
        }
    }

    fn resolve(&self, condition: bool, children: &[Node]) -> Option<Node> {
        match (self, children) {
            (NodeKind::If { .. }, [_, then_branch, else_branch]) => {
                Some(if condition { then_branch.clone() } else { else_branch.clone() })
            }
            (NodeKind::Loop { .. }, [_, _]) if !condition => Some(Node::literal(Value::Unit)),
            (NodeKind::Extension(ext), args) => ext.payload().resolve(condition, args),
            _ => None,
        }
    }
}

fn kind_label(kind: &NodeKind) -> String {
    match kind {
        NodeKind::Extension(ext) => format!("extension:{}", ext.name()),
        NodeKind::Call { callee, .. } => format!("call `{}`", callee.name),
        _ => tag_of(kind).name().to_string(),
    }
}

fn tag_of(kind: &NodeKind) -> NodeTag {
    match kind {
        NodeKind::Literal(_) => NodeTag::Literal,
        NodeKind::Var { .. } => NodeTag::Var,
        NodeKind::Unary { .. } => NodeTag::Unary,
        NodeKind::Binary { .. } => NodeTag::Binary,
        NodeKind::Compare { .. } => NodeTag::Compare,
        NodeKind::Cast { .. } => NodeTag::Cast,
        NodeKind::If { .. } => NodeTag::If,
        NodeKind::Let { .. } => NodeTag::Let,
        NodeKind::Assign { .. } => NodeTag::Assign,
        NodeKind::Loop { .. } => NodeTag::Loop,
        NodeKind::Seq(_) => NodeTag::Seq,
        NodeKind::Call { .. } => NodeTag::Call,
        NodeKind::Extension(_) => NodeTag::Extension,
    }
}

fn kind_children(kind: &NodeKind) -> Vec<&Node> {
    match kind {
        NodeKind::Literal(_) | NodeKind::Var { .. } => Vec::new(),
        NodeKind::Unary { operand, .. } | NodeKind::Cast { operand, .. } => vec![operand],
        NodeKind::Binary { lhs, rhs, .. } | NodeKind::Compare { lhs, rhs, .. } => vec![lhs, rhs],
        NodeKind::If { cond, then_branch, else_branch } => vec![cond, then_branch, else_branch],
        NodeKind::Let { value, body, .. } => vec![value, body],
        NodeKind::Assign { value, .. } => vec![value],
        NodeKind::Loop { cond, body } => vec![cond, body],
        NodeKind::Seq(items) => items.iter().collect(),
        NodeKind::Call { args, .. } => args.iter().collect(),
        NodeKind::Extension(ext) => ext.args().iter().collect(),
    }
}

fn kind_arity(kind: &NodeKind) -> Arity {
    match kind {
        NodeKind::Literal(_) | NodeKind::Var { .. } => Arity::Exact(0),
        NodeKind::Unary { .. } | NodeKind::Cast { .. } | NodeKind::Assign { .. } => Arity::Exact(1),
        NodeKind::Binary { .. }
        | NodeKind::Compare { .. }
        | NodeKind::Let { .. }
        | NodeKind::Loop { .. } => Arity::Exact(2),
        NodeKind::If { .. } => Arity::Exact(3),
        NodeKind::Seq(_) => Arity::AtLeast(1),
        NodeKind::Call { callee, .. } => Arity::Exact(callee.params.len()),
        NodeKind::Extension(ext) => ext.payload().arity(),
    }
}

fn kind_capabilities(kind: &NodeKind) -> Capabilities {
    match kind {
        NodeKind::Literal(_) => Capabilities::PURE,
        NodeKind::Var { .. } | NodeKind::Let { .. } => Capabilities::PURE | Capabilities::BINDING,
        NodeKind::Unary { .. }
        | NodeKind::Binary { .. }
        | NodeKind::Compare { .. }
        | NodeKind::Cast { .. } => Capabilities::FOLDABLE | Capabilities::PURE,
        NodeKind::If { .. } => Capabilities::CONTROL_FLOW | Capabilities::PURE,
        NodeKind::Assign { .. } => Capabilities::BINDING,
        NodeKind::Loop { .. } => Capabilities::CONTROL_FLOW,
        NodeKind::Seq(_) => Capabilities::PURE,
        NodeKind::Call { .. } => Capabilities::NONE,
        NodeKind::Extension(ext) => ext.payload().capabilities(),
    }
}

/// Typing rules per variant
fn type_of(kind: &NodeKind) -> Result<Type> {
    match kind {
        NodeKind::Literal(v) => Ok(v.ty()),
        NodeKind::Var { ty, .. } => Ok(ty.clone()),
        NodeKind::Unary { op, operand } => op.result_type(operand.ty()),
        NodeKind::Binary { op, lhs, rhs } => op.result_type(lhs.ty(), rhs.ty()),
        NodeKind::Compare { op, lhs, rhs } => op.result_type(lhs.ty(), rhs.ty()),
        NodeKind::Cast { to, operand } => cast_type(operand.ty(), to),
        NodeKind::If { cond, then_branch, else_branch } => {
            if !cond.ty().is_bool() {
                return Err(BuildError::mismatch("if condition", "bool", cond.ty()));
            }
            if then_branch.ty() != else_branch.ty() {
                return Err(BuildError::mismatch("if branches", then_branch.ty(), else_branch.ty()));
            }
            Ok(then_branch.ty().clone())
        }
        NodeKind::Let { body, .. } => Ok(body.ty().clone()),
        NodeKind::Assign { .. } => Ok(Type::unit()),
        NodeKind::Loop { cond, .. } => {
            if !cond.ty().is_bool() {
                return Err(BuildError::mismatch("loop condition", "bool", cond.ty()));
            }
            Ok(Type::unit())
        }
        NodeKind::Seq(items) => items
            .last()
            .map(|last| last.ty().clone())
            .ok_or_else(|| BuildError::arity("seq", Arity::AtLeast(1), 0)),
        NodeKind::Call { callee, args } => {
            for (i, (arg, param)) in args.iter().zip(&callee.params).enumerate() {
                if !is_subtype(arg.ty(), param) {
                    return Err(BuildError::mismatch(
                        format!("argument {} of `{}`", i, callee.name),
                        param,
                        arg.ty(),
                    ));
                }
            }
            Ok(callee.ret.clone())
        }
        NodeKind::Extension(ext) => {
            let types: Vec<Type> = ext.args().iter().map(|a| a.ty().clone()).collect();
            ext.payload().type_of(&types)
        }
    }
}
