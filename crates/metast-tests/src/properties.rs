use super::*;
use metast_ir::builder::*;
use metast_ir::{BinaryOp, CompareOp};
use metast_opt::optimize;
use proptest::prelude::*;

fn arb_binop() -> impl Strategy<Value = BinaryOp> {
    let ops: Vec<BinaryOp> = BinaryOp::ALL
        .into_iter()
        .filter(|op| op.is_arithmetic() || op.is_bitwise())
        .collect();
    prop::sample::select(ops)
}

fn arb_cmp() -> impl Strategy<Value = CompareOp> {
    prop::sample::select(CompareOp::ALL.to_vec())
}

/// Well-typed `i64` expressions over the inputs `x` and `y`
fn arb_expr() -> impl Strategy<Value = Node> {
    let leaf = prop_oneof![
        (-20i64..20).prop_map(i64),
        Just(var("x", Type::i64())),
        Just(var("y", Type::i64())),
    ];
    leaf.prop_recursive(4, 48, 4, |inner| {
        prop_oneof![
            (arb_binop(), inner.clone(), inner.clone())
                .prop_map(|(op, a, b)| binary(op, a, b).unwrap()),
            (arb_cmp(), inner.clone(), inner.clone(), inner.clone(), inner.clone()).prop_map(
                |(op, a, b, t, e)| if_expr(compare(op, a, b).unwrap(), t, e).unwrap()
            ),
            (inner.clone(), inner.clone()).prop_map(|(value, rest)| {
                let body = add(var("t", Type::i64()), rest).unwrap();
                let_in("t", value, body).unwrap()
            }),
            inner.prop_map(|a| neg(a).unwrap()),
        ]
    })
}

fn arb_unit() -> impl Strategy<Value = CompilationUnit> {
    arb_expr().prop_map(|entry| {
        unit_of(
            &[("x", Type::i64()), ("y", Type::i64())],
            CompileOptions::default(),
            entry,
        )
    })
}

fn arb_inputs() -> impl Strategy<Value = Environment> {
    let value = prop_oneof![-50i64..50, proptest::arbitrary::any::<i64>()];
    (value.clone(), value)
        .prop_map(|(x, y)| Environment::new().with_value("x", x).with_value("y", y))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn optimization_is_idempotent(unit in arb_unit()) {
        let cancel = CancelToken::new();
        for level in [OptLevel::Basic, OptLevel::Full] {
            let unit = unit.clone().with_options(CompileOptions::default().with_opt_level(level));
            let once = optimize(&unit, &cancel).unwrap();
            let twice = optimize(&once, &cancel).unwrap();
            prop_assert_eq!(once, twice);
        }
    }

    #[test]
    fn lowering_is_deterministic(unit in arb_unit()) {
        for backend in BackendKind::ALL {
            for level in [OptLevel::None, OptLevel::Full] {
                let first = compile_with(&unit, backend, level).unwrap();
                let second = compile_with(&unit.clone(), backend, level).unwrap();
                prop_assert_eq!(first.artifact, second.artifact);
            }
        }
    }

    #[test]
    fn bytecode_agrees_with_interpreter(unit in arb_unit(), inputs in arb_inputs()) {
        let expected = interp::evaluate(&unit, &inputs);
        for level in [OptLevel::None, OptLevel::Basic, OptLevel::Full] {
            prop_assert_eq!(run_bytecode(&unit, level, &inputs), expected.clone());
        }
    }

    #[test]
    fn optimization_preserves_meaning(unit in arb_unit(), inputs in arb_inputs()) {
        let expected = interp::evaluate(&unit, &inputs);
        let full = unit.clone().with_options(CompileOptions::default().with_opt_level(OptLevel::Full));
        let optimized = optimize(&full, &CancelToken::new()).unwrap();
        prop_assert_eq!(interp::evaluate(&optimized, &inputs), expected);
    }
}
