//! Integration tests for the metast metalanguage
//!
//! This crate exercises the whole pipeline end to end:
//! Builder API → CompilationUnit → Transform Engine → Backend → Loader
//!
//! The helpers below are shared by the scenario tests and the property
//! tests.

use metast_codegen::Artifact;
use metast_driver::Compiled;
use metast_error::{CompileError, RuntimeError};
use metast_ir::{
    BackendKind, CancelToken, CompilationUnit, CompileOptions, Environment, Node, OptLevel, Type,
    UnitBuilder, Value,
};
use metast_runtime::{interp, load_and_run};

/// Builds a unit with the given inputs and options, panicking on build errors
pub fn unit_of(inputs: &[(&str, Type)], options: CompileOptions, entry: Node) -> CompilationUnit {
    let mut builder = UnitBuilder::new("test").options(options);
    for (name, ty) in inputs {
        builder = builder.input(*name, ty.clone());
    }
    match builder.build(entry) {
        Ok(unit) => unit,
        Err(e) => panic!("Expected unit to build, but got: {}", e),
    }
}

/// Compiles `unit` with another backend and level
pub fn compile_with(
    unit: &CompilationUnit,
    backend: BackendKind,
    opt_level: OptLevel,
) -> Result<Compiled, CompileError> {
    let unit = unit.clone().with_options(CompileOptions::new(backend, opt_level));
    metast_driver::compile(&unit, &CancelToken::new())
}

/// Generated text of a source backend
pub fn lower_text(unit: &CompilationUnit, backend: BackendKind, opt_level: OptLevel) -> String {
    match compile_with(unit, backend, opt_level) {
        Ok(Compiled {
            artifact: Artifact::Source { text, .. },
            ..
        }) => text,
        Ok(other) => panic!("Expected source text, got {:?}", other.artifact),
        Err(e) => panic!("Expected {} lowering to succeed, but got: {}", backend, e),
    }
}

/// Compiles to bytecode at `opt_level` and runs it in-process
pub fn run_bytecode(
    unit: &CompilationUnit,
    opt_level: OptLevel,
    inputs: &Environment,
) -> Result<Value, RuntimeError> {
    match compile_with(unit, BackendKind::Bytecode, opt_level) {
        Ok(compiled) => load_and_run(&compiled.artifact, inputs),
        Err(e) => panic!("Expected bytecode lowering to succeed, but got: {}", e),
    }
}

/// Asserts that the VM and the reference interpreter agree at every level
pub fn assert_round_trip(unit: &CompilationUnit, inputs: &Environment) {
    let expected = interp::evaluate(unit, inputs);
    for level in [OptLevel::None, OptLevel::Basic, OptLevel::Full] {
        let actual = run_bytecode(unit, level, inputs);
        if actual != expected {
            panic!(
                "VM and interpreter disagree at opt level {}:\n  vm:     {:?}\n  interp: {:?}\n  entry:  {}",
                level,
                actual,
                expected,
                unit.entry()
            );
        }
    }
}

#[cfg(test)]
mod properties;
#[cfg(test)]
mod scenarios;
