//! Extension nodes
//!
//! The core variant set is closed. New node kinds plug in through
//! [`Extension`]: a payload that declares its arity, typing rule and
//! capabilities, and optionally how to fold it, resolve it statically, or
//! expand it into core nodes for backends with no native rule for it.

use crate::capability::Capabilities;
use crate::node::{Arity, Node};
use crate::types::Type;
use crate::value::Value;
use metast_error::Result;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Payload of an extension node
pub trait Extension: fmt::Debug + Send + Sync {
    /// Stable name, used in diagnostics and backend rule lookup
    fn name(&self) -> &str;

    /// Payload identity beyond the name (two payloads with the same name and
    /// key are interchangeable)
    fn key(&self) -> String {
        String::new()
    }

    fn arity(&self) -> Arity;

    /// Typing rule over the argument types
    fn type_of(&self, args: &[Type]) -> Result<Type>;

    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
    }

    /// Constant folding; only consulted when `capabilities` has `FOLDABLE`
    fn fold(&self, _args: &[Value]) -> Option<Value> {
        None
    }

    /// Static branch resolution; only consulted with `CONTROL_FLOW`
    fn resolve(&self, _condition: bool, _args: &[Node]) -> Option<Node> {
        None
    }

    /// Index of the condition argument; only consulted with `CONTROL_FLOW`
    fn condition_index(&self) -> usize {
        0
    }

    /// Equivalent core-node graph
    fn expand(&self, _args: &[Node]) -> Option<Result<Node>> {
        None
    }
}

/// An extension payload together with its argument nodes
#[derive(Clone)]
pub struct ExtensionNode {
    payload: Arc<dyn Extension>,
    args: Vec<Node>,
}

impl ExtensionNode {
    pub(crate) fn new(payload: Arc<dyn Extension>, args: Vec<Node>) -> Self {
        Self { payload, args }
    }

    pub fn payload(&self) -> &dyn Extension {
        self.payload.as_ref()
    }

    pub fn payload_arc(&self) -> Arc<dyn Extension> {
        Arc::clone(&self.payload)
    }

    pub(crate) fn into_args(self) -> Vec<Node> {
        self.args
    }

    pub fn args(&self) -> &[Node] {
        &self.args
    }

    pub fn name(&self) -> &str {
        self.payload.name()
    }
}

impl PartialEq for ExtensionNode {
    fn eq(&self, other: &Self) -> bool {
        self.payload.name() == other.payload.name()
            && self.payload.key() == other.payload.key()
            && self.args == other.args
    }
}

impl Eq for ExtensionNode {}

impl Hash for ExtensionNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.payload.name().hash(state);
        self.payload.key().hash(state);
        self.args.hash(state);
    }
}

impl fmt::Debug for ExtensionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionNode")
            .field("name", &self.payload.name())
            .field("key", &self.payload.key())
            .field("args", &self.args)
            .finish()
    }
}
