//! metast-runtime - Execution of generated metast code
//!
//! Provides:
//! - **Loader**: decodes and validates artifacts, binds inputs and runs
//!   them under [`Limits`], synchronously or on tokio's blocking pool
//! - **VM**: the stack machine that executes MTBC bytecode
//! - **Interpreter**: a reference evaluator over the IR graph, used to
//!   check that lowering preserves meaning
//!
//! # Example
//!
//! ```rust
//! use metast_codegen::{BytecodeBackend, CodeGen};
//! use metast_ir::builder::*;
//! use metast_ir::{CancelToken, Environment, Type, UnitBuilder, Value};
//! use metast_runtime::{interp, load_and_run};
//!
//! let x = var("x", Type::i64());
//! let unit = UnitBuilder::new("double")
//!     .input("x", Type::i64())
//!     .build(add(x.clone(), x).unwrap())
//!     .unwrap();
//! let artifact = BytecodeBackend::new().lower(&unit, &CancelToken::new()).unwrap();
//!
//! let inputs = Environment::new().with_value("x", 21i64);
//! assert_eq!(load_and_run(&artifact, &inputs), Ok(Value::I64(42)));
//! assert_eq!(interp::evaluate(&unit, &inputs), Ok(Value::I64(42)));
//! ```

pub mod interp;
pub mod loader;
pub mod vm;

pub use loader::{load_and_run, Loader};
pub use vm::{Limits, Vm};
