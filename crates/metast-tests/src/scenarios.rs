use super::*;
use metast_driver::{ProgramSpec, Session};
use metast_error::{BuildError, Diagnostic, DiagnosticRenderer, LoweringError};
use metast_ir::builder::*;
use metast_ir::{FunctionBuilder, Shape, TypeRegistry};
use pretty_assertions::assert_eq;
use std::io::Write;

fn if_true_one_two() -> Node {
    if_expr(boolean(true), i64(1), i64(2)).unwrap()
}

// =========================================
// End-to-end scenarios
// =========================================

#[test]
fn test_if_runs_to_one_without_optimization() {
    let unit = unit_of(&[], CompileOptions::default(), if_true_one_two());
    assert_eq!(
        run_bytecode(&unit, OptLevel::None, &Environment::new()),
        Ok(Value::I64(1))
    );
    assert_eq!(
        lower_text(&unit, BackendKind::Js, OptLevel::None),
        "// generated by metast from unit `test`\n\
         \"use strict\";\n\
         \n\
         function __entry() {\n  return (true ? 1n : 2n);\n}\n"
    );
}

#[test]
fn test_folding_reduces_if_to_literal() {
    let unit = unit_of(&[], CompileOptions::default(), if_true_one_two());
    let compiled = compile_with(&unit, BackendKind::Bytecode, OptLevel::Basic).unwrap();
    assert_eq!(compiled.unit.entry(), &i64(1));
    assert_eq!(load_and_run(&compiled.artifact, &Environment::new()), Ok(Value::I64(1)));

    assert_eq!(lower_text(&unit, BackendKind::Formula, OptLevel::Basic), "=1\n");
    assert!(lower_text(&unit, BackendKind::Js, OptLevel::Full).contains("return 1n;"));
}

#[test]
fn test_adding_int_and_string_is_rejected() {
    let err = add(i64(1), str("a")).unwrap_err();
    assert!(matches!(err, BuildError::TypeMismatch { .. }));

    let rendered = DiagnosticRenderer::new()
        .without_colors()
        .render(&Diagnostic::from(&err));
    assert!(rendered.starts_with("error[EB002]"));
}

#[test]
fn test_formula_rejects_loops() {
    let entry = count_loop("i", i64(0), i64(3), unit()).unwrap();
    let unit = unit_of(&[], CompileOptions::default(), entry);
    let err = compile_with(&unit, BackendKind::Formula, OptLevel::None).unwrap_err();
    assert_eq!(
        err,
        CompileError::Lowering(LoweringError::UnsupportedVariant {
            backend: "formula".to_string(),
            variant: "loop".to_string(),
        })
    );

    // The same unit is fine for the other backends
    assert!(compile_with(&unit, BackendKind::Js, OptLevel::None).is_ok());
    assert_eq!(
        run_bytecode(&unit, OptLevel::None, &Environment::new()),
        Ok(Value::Unit)
    );
}

// =========================================
// Programs
// =========================================

fn sum_below(n: Node) -> Node {
    let acc = || var("acc", Type::i64());
    let i = var("i", Type::i64());
    let body = assign("acc", add(acc(), i).unwrap()).unwrap();
    let_in(
        "acc",
        i64(0),
        seq(vec![count_loop("i", i64(0), n, body).unwrap(), acc()]).unwrap(),
    )
    .unwrap()
}

#[test]
fn test_counted_loop_everywhere() {
    let unit = unit_of(
        &[("n", Type::i64())],
        CompileOptions::default(),
        sum_below(var("n", Type::i64())),
    );
    let inputs = Environment::new().with_value("n", 100i64);
    assert_eq!(run_bytecode(&unit, OptLevel::Full, &inputs), Ok(Value::I64(4950)));
    assert_round_trip(&unit, &inputs);

    let js = lower_text(&unit, BackendKind::Js, OptLevel::None);
    assert!(js.contains("while (true) {"));
    assert!(js.contains("break;"));
}

#[test]
fn test_recursive_function() {
    let f = FunctionBuilder::new("fib", Type::i64()).param("n", Type::i64());
    let n = f.arg("n").unwrap();
    let minus = |k: i64| sub(n.clone(), i64(k)).unwrap();
    let body = if_expr(
        lt(n.clone(), i64(2)).unwrap(),
        n.clone(),
        add(
            call(&f.sig(), vec![minus(1)]).unwrap(),
            call(&f.sig(), vec![minus(2)]).unwrap(),
        )
        .unwrap(),
    )
    .unwrap();
    let fib = f.body(body).unwrap();
    let entry = call(fib.sig(), vec![var("k", Type::i64())]).unwrap();
    let unit = UnitBuilder::new("fib").input("k", Type::i64()).function(fib).build(entry).unwrap();

    let inputs = Environment::new().with_value("k", 15i64);
    assert_eq!(run_bytecode(&unit, OptLevel::None, &inputs), Ok(Value::I64(610)));
    assert_round_trip(&unit, &inputs);

    // Calls have no formula rule
    assert!(matches!(
        compile_with(&unit, BackendKind::Formula, OptLevel::None),
        Err(CompileError::Lowering(LoweringError::UnsupportedVariant { .. }))
    ));
}

#[test]
fn test_strings_and_casts() {
    let greeting = add(str("hello, "), var("who", Type::str())).unwrap();
    let unit = unit_of(&[("who", Type::str())], CompileOptions::default(), greeting);
    let inputs = Environment::new().with_value("who", "world");
    assert_eq!(
        run_bytecode(&unit, OptLevel::None, &inputs),
        Ok(Value::str("hello, world"))
    );

    let truncated = cast(div(f64(7.0), f64(2.0)).unwrap(), Type::i32()).unwrap();
    let unit = unit_of(&[], CompileOptions::default(), truncated);
    assert_eq!(run_bytecode(&unit, OptLevel::None, &Environment::new()), Ok(Value::I32(3)));
    assert_round_trip(&unit, &Environment::new());
}

#[test]
fn test_division_by_zero_is_a_runtime_error() {
    let entry = div(var("a", Type::i64()), var("b", Type::i64())).unwrap();
    let unit = unit_of(&[("a", Type::i64()), ("b", Type::i64())], CompileOptions::default(), entry);
    let inputs = Environment::new().with_value("a", 1i64).with_value("b", 0i64);
    assert_eq!(
        run_bytecode(&unit, OptLevel::Full, &inputs),
        Err(RuntimeError::DivisionByZero)
    );
    assert_round_trip(&unit, &inputs);
}

#[test]
fn test_folding_keeps_traps() {
    // Dividing by a literal zero must still fail at run time
    let entry = mul(div(i64(1), i64(0)).unwrap(), i64(0)).unwrap();
    let unit = unit_of(&[], CompileOptions::default(), entry);
    assert_eq!(
        run_bytecode(&unit, OptLevel::Full, &Environment::new()),
        Err(RuntimeError::DivisionByZero)
    );
}

// =========================================
// Sessions, registry and cancellation
// =========================================

#[test]
fn test_registry_is_safe_to_share() {
    let registry = TypeRegistry::new();
    let shared = &registry;
    let defined: Vec<Type> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(move || shared.define_type("Celsius", Shape::F64).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(defined.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(registry.defined_names(), vec!["Celsius".to_string()]);

    registry.seal();
    assert_eq!(
        registry.define_type("Kelvin", Shape::F64).unwrap_err(),
        BuildError::RegistryFrozen { name: "Kelvin".to_string() }
    );
}

#[test]
fn test_cancellation_yields_no_artifact() {
    let unit = unit_of(&[], CompileOptions::default(), if_true_one_two());
    let token = CancelToken::new();
    token.cancel();
    for level in [OptLevel::None, OptLevel::Full] {
        let unit = unit.clone().with_options(CompileOptions::default().with_opt_level(level));
        assert_eq!(
            metast_driver::compile(&unit, &token).unwrap_err(),
            CompileError::Cancelled
        );
    }
}

#[test]
fn test_parallel_batch_matches_sequential() {
    let session = Session::new();
    let units: Vec<_> = (0..32)
        .map(|k| {
            let options = CompileOptions::new(BackendKind::ALL[k % 3], OptLevel::Basic);
            unit_of(&[("n", Type::i64())], options, mul(var("n", Type::i64()), i64(k as i64)).unwrap())
        })
        .collect();
    let parallel = session.compile_all(&units);
    session.clear_cache();
    for (unit, result) in units.iter().zip(parallel) {
        assert_eq!(result.unwrap(), session.compile(unit).unwrap());
    }
}

#[test]
fn test_program_file_end_to_end() {
    let program = r#"{
        "name": "sum",
        "inputs": { "n": "i64" },
        "entry": {
            "kind": "let", "name": "acc", "value": { "kind": "int", "value": 0 },
            "body": { "kind": "let", "name": "i", "value": { "kind": "int", "value": 0 },
                "body": { "kind": "seq", "items": [
                    { "kind": "while",
                      "cond": { "kind": "binary", "op": "<", "lhs": { "kind": "var", "name": "i" },
                                "rhs": { "kind": "var", "name": "n" } },
                      "body": { "kind": "seq", "items": [
                          { "kind": "assign", "name": "acc",
                            "value": { "kind": "binary", "op": "+", "lhs": { "kind": "var", "name": "acc" },
                                       "rhs": { "kind": "var", "name": "i" } } },
                          { "kind": "assign", "name": "i",
                            "value": { "kind": "binary", "op": "+", "lhs": { "kind": "var", "name": "i" },
                                       "rhs": { "kind": "int", "value": 1 } } } ] } },
                    { "kind": "var", "name": "acc" } ] } }
        },
        "options": { "backend": "js", "opt_level": "full" }
    }"#;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(program.as_bytes()).unwrap();

    let session = Session::new();
    let unit = session.load_file(file.path()).unwrap();
    assert_eq!(unit.options().backend, BackendKind::Js);

    let js = session.compile(&unit).unwrap();
    assert!(js.as_text().unwrap().contains("function __entry($n)"));

    let inputs = Environment::new().with_value("n", 10i64);
    assert_eq!(session.run(&unit, &inputs).unwrap(), Value::I64(45));
    assert_round_trip(&unit, &inputs);

    let spec = ProgramSpec::from_json(program).unwrap();
    assert_eq!(session.load(&spec).unwrap(), unit);
}
