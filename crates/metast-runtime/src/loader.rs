//! Loader - the only place where generated code is executed
//!
//! Artifacts are treated as untrusted input: bytecode is decoded and
//! validated before it runs, execution is bounded by [`Limits`], and a
//! panic inside the VM is caught and reported instead of unwinding into
//! the caller.

use crate::vm::{Limits, Vm};
use metast_codegen::bytecode::{Module, ValueKind};
use metast_codegen::Artifact;
use metast_error::RuntimeError;
use metast_ir::{cast_value, CancelToken, Environment, Shape, Type, Value};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Loads and runs artifacts under fixed limits
#[derive(Debug, Clone, Default)]
pub struct Loader {
    limits: Limits,
}

impl Loader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: Limits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Decodes an artifact into a validated module
    pub fn load(&self, artifact: &Artifact) -> Result<Module, RuntimeError> {
        match artifact {
            Artifact::Bytecode { bytes } => {
                let module = Module::decode(bytes)?;
                debug!(
                    functions = module.functions.len(),
                    consts = module.consts.len(),
                    "loaded module"
                );
                Ok(module)
            }
            Artifact::Source { backend, .. } => Err(RuntimeError::NotExecutable {
                backend: backend.name().to_string(),
            }),
        }
    }

    /// Runs the artifact's entry with inputs taken from `inputs`
    pub fn run(&self, artifact: &Artifact, inputs: &Environment) -> Result<Value, RuntimeError> {
        self.run_with_cancel(artifact, inputs, None)
    }

    fn run_with_cancel(
        &self,
        artifact: &Artifact,
        inputs: &Environment,
        cancel: Option<CancelToken>,
    ) -> Result<Value, RuntimeError> {
        let module = self.load(artifact)?;
        let args = bind_inputs(&module, inputs)?;
        let limits = self.limits;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut vm = Vm::new(&module, limits);
            if let Some(token) = cancel {
                vm = vm.with_cancel(token);
            }
            let result = vm.run(args);
            (result, vm.steps())
        }));
        match outcome {
            Ok((result, steps)) => {
                match &result {
                    Ok(value) => info!(steps, %value, "execution finished"),
                    Err(err) => debug!(steps, error = %err, "execution failed"),
                }
                result
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(%message, "generated code panicked");
                Err(RuntimeError::Panicked(message))
            }
        }
    }

    /// Runs on tokio's blocking pool, giving up after `timeout`
    ///
    /// On timeout the VM is asked to stop at its next poll; its result is
    /// discarded either way.
    pub async fn run_async(
        &self,
        artifact: Artifact,
        inputs: Environment,
        timeout: Duration,
    ) -> Result<Value, RuntimeError> {
        let loader = self.clone();
        let token = CancelToken::new();
        let vm_token = token.clone();
        let handle =
            tokio::task::spawn_blocking(move || loader.run_with_cancel(&artifact, &inputs, Some(vm_token)));
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(RuntimeError::Panicked(join_error.to_string())),
            Err(_) => {
                token.cancel();
                let millis = timeout.as_millis() as u64;
                warn!(millis, "execution timed out");
                Err(RuntimeError::Timeout { millis })
            }
        }
    }
}

/// Runs `artifact` with default limits
pub fn load_and_run(artifact: &Artifact, inputs: &Environment) -> Result<Value, RuntimeError> {
    Loader::new().run(artifact, inputs)
}

/// Entry arguments in slot order
fn bind_inputs(module: &Module, inputs: &Environment) -> Result<Vec<Value>, RuntimeError> {
    module
        .inputs
        .iter()
        .map(|(name, kind)| {
            let value = input_value(inputs, name)?;
            coerce_input(name, value, &kind.to_type())
        })
        .collect()
}

pub(crate) fn input_value<'e>(inputs: &'e Environment, name: &str) -> Result<&'e Value, RuntimeError> {
    inputs
        .lookup(name)
        .ok()
        .and_then(|binding| binding.value())
        .ok_or_else(|| RuntimeError::MissingInput { name: name.to_string() })
}

/// Checks an input value against its declared type; `i32` widens to `i64`
pub(crate) fn coerce_input(name: &str, value: &Value, expected: &Type) -> Result<Value, RuntimeError> {
    if value.has_type(expected) {
        return Ok(value.clone());
    }
    match (value, expected.resolved().shape()) {
        (Value::I32(_), Shape::I64) => cast_value(value, expected),
        _ => Err(RuntimeError::InputType {
            name: name.to_string(),
            expected: ValueKind::of_type(expected)
                .map(|k| k.to_string())
                .unwrap_or_else(|| expected.to_string()),
            found: value.ty().to_string(),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
