use keel_ast::build::*;
use keel_ast::{Decl, Module, UnaryOp};
use keel_core::{CheckConfig, ComptimeConfig, ComptimeValue, ErrorKind, IntType, check, check_with_config};

fn squares_table() -> Decl {
    const_decl(
        "SQUARES",
        Some(array_of(ty("u32"), int(10))),
        comptime(block_with_tail(
            vec![
                var_("out", array_of(ty("u32"), int(10)), array_repeat(int(0), int(10))),
                for_(
                    "i",
                    int(0),
                    int(10),
                    block(vec![assign(
                        index(ident("out"), ident("i")),
                        mul(ident("i"), ident("i")),
                    )]),
                ),
            ],
            ident("out"),
        )),
    )
}

#[test]
fn lookup_table_is_built_at_comptime() {
    let m = module("tables", vec![squares_table()]);
    let (annotated, diagnostics) = check(&m);
    assert!(diagnostics.is_empty(), "unexpected diagnostics:\n{}", diagnostics.report());

    let value = annotated.const_value("SQUARES").expect("SQUARES resolved");
    assert_eq!(
        value.int_elements(),
        Some(vec![0, 1, 4, 9, 16, 25, 36, 49, 64, 81])
    );
}

/// Bodies of ordinary functions run at comptime when a constant calls them.
#[test]
fn constant_calls_a_plain_function() {
    let m = module(
        "calc",
        vec![
            func(
                "square",
                vec![param("x", ty("u32"))],
                ty("u32"),
                block(vec![ret(mul(ident("x"), ident("x")))]),
            ),
            const_decl("AREA", Some(ty("u32")), call("square", vec![int(12)])),
        ],
    );
    let (annotated, diagnostics) = check(&m);
    assert!(diagnostics.is_empty(), "unexpected diagnostics:\n{}", diagnostics.report());
    let u32_ty = IntType::from_name("u32", 64).expect("u32");
    assert_eq!(annotated.const_value("AREA"), Some(&ComptimeValue::int(144, u32_ty)));
}

#[test]
fn runtime_loop_bound_is_not_deterministic() {
    let m = module(
        "fill",
        vec![func(
            "fill",
            vec![param("n", ty("u32"))],
            void(),
            block(vec![comptime_stmt(block(vec![for_(
                "i",
                int(0),
                ident("n"),
                block(vec![]),
            )]))]),
        )],
    );
    let (annotated, diagnostics) = check(&m);
    assert_eq!(diagnostics.kinds(), vec![ErrorKind::NonDeterministicComptime]);
    let diag = &diagnostics.as_slice()[0];
    assert!(diag.message.contains("'n'"), "expected the runtime name, got: {}", diag.message);
    assert!(!annotated.ready_for_codegen());
}

#[test]
fn extern_call_in_constant_is_not_deterministic() {
    let m = module(
        "clock",
        vec![
            extern_fn("now", vec![], ty("u64")),
            const_decl("STARTED", None, call("now", vec![])),
        ],
    );
    let (_, diagnostics) = check(&m);
    assert!(
        diagnostics.contains_kind(ErrorKind::NonDeterministicComptime),
        "expected NonDeterministicComptime, got: {:?}",
        diagnostics.kinds()
    );
}

#[test]
fn endless_loop_exhausts_the_step_budget() {
    let m = module(
        "spin",
        vec![const_decl(
            "SPIN",
            Some(ty("u32")),
            comptime(block_with_tail(vec![while_(boolean(true), block(vec![]))], int(0))),
        )],
    );
    let config = CheckConfig {
        comptime: ComptimeConfig {
            max_steps: 500,
            ..ComptimeConfig::default()
        },
        ..CheckConfig::default()
    };
    let (annotated, diagnostics) = check_with_config(&m, &config);
    assert_eq!(diagnostics.kinds(), vec![ErrorKind::ComptimeBudgetExceeded]);
    assert!(
        diagnostics.as_slice()[0].message.contains("500"),
        "expected the budget in the message, got: {}",
        diagnostics.as_slice()[0].message
    );
    assert!(annotated.const_value("SPIN").is_none());
}

#[test]
fn unbounded_recursion_hits_the_call_depth_limit() {
    let m = module(
        "rec",
        vec![
            func(
                "forever",
                vec![param("x", ty("u32"))],
                ty("u32"),
                block(vec![ret(call("forever", vec![ident("x")]))]),
            ),
            const_decl("Y", Some(ty("u32")), call("forever", vec![int(1)])),
        ],
    );
    let (_, diagnostics) = check(&m);
    assert_eq!(diagnostics.kinds(), vec![ErrorKind::ComptimeBudgetExceeded]);
}

#[test]
fn typed_overflow_traps() {
    let m = module(
        "math",
        vec![const_decl("X", Some(ty("u8")), add(int(250), int(10)))],
    );
    let (annotated, diagnostics) = check(&m);
    assert_eq!(diagnostics.kinds(), vec![ErrorKind::ComptimeTrap]);
    assert!(!annotated.ready_for_codegen());
}

#[test]
fn wrapping_operator_does_not_trap() {
    let m = module(
        "math",
        vec![const_decl(
            "X",
            Some(ty("u8")),
            binary(int(250), keel_ast::BinOp::AddWrap, int(10)),
        )],
    );
    let (annotated, diagnostics) = check(&m);
    assert!(diagnostics.is_empty(), "unexpected diagnostics:\n{}", diagnostics.report());
    assert_eq!(annotated.const_value("X").and_then(ComptimeValue::as_int), Some(4));
}

#[test]
fn array_length_comes_from_a_constant() {
    let m = module(
        "buf",
        vec![
            const_decl("N", Some(ty("usize")), mul(int(4), int(8))),
            struct_decl("Buffer", vec![field("data", array_of(ty("u8"), ident("N")))]),
        ],
    );
    let (annotated, diagnostics) = check(&m);
    assert!(diagnostics.is_empty(), "unexpected diagnostics:\n{}", diagnostics.report());
    assert_eq!(annotated.struct_layout("Buffer").map(|l| l.size), Some(32));
}

#[test]
fn failing_array_length_is_an_unresolved_constant() {
    let m = module(
        "buf",
        vec![
            extern_fn("runtime_len", vec![], ty("usize")),
            struct_decl(
                "Buffer",
                vec![field("data", array_of(ty("u8"), call("runtime_len", vec![])))],
            ),
        ],
    );
    let (_, diagnostics) = check(&m);
    assert_eq!(diagnostics.kinds(), vec![ErrorKind::UnresolvedConstant]);
    let diag = &diagnostics.as_slice()[0];
    assert_eq!(diag.related.len(), 1, "expected the evaluator's reason as a label");
}

/// The value of a `comptime` expression inside a function is recorded at
/// the expression's span for code generation to substitute.
#[test]
fn comptime_expression_value_is_recorded_at_its_span() {
    let value = comptime(block_with_tail(vec![], add(int(40), int(2))));
    let at = value.span;
    let m = module(
        "answer",
        vec![func(
            "answer",
            vec![],
            ty("u32"),
            block(vec![let_typed("x", ty("u32"), value), ret(ident("x"))]),
        )],
    );
    let (annotated, diagnostics) = check(&m);
    assert!(diagnostics.is_empty(), "unexpected diagnostics:\n{}", diagnostics.report());
    assert_eq!(annotated.comptime_value(at).and_then(ComptimeValue::as_int), Some(42));
}

#[test]
fn block_constant_is_usable_in_function_comptime() {
    let m = module(
        "local",
        vec![func(
            "scaled",
            vec![],
            ty("u32"),
            block(vec![
                const_stmt("K", Some(ty("u32")), int(7)),
                let_typed("x", ty("u32"), comptime(block_with_tail(vec![], mul(ident("K"), int(6))))),
                ret(ident("x")),
            ]),
        )],
    );
    let (annotated, diagnostics) = check(&m);
    assert!(diagnostics.is_empty(), "unexpected diagnostics:\n{}", diagnostics.report());
    let facts = annotated.function("scaled").expect("facts");
    assert!(
        facts.comptime_values.iter().any(|(_, v)| v.as_int() == Some(42)),
        "expected 42 among {:?}",
        facts.comptime_values
    );
}

fn idempotence_module() -> Module {
    module(
        "stable",
        vec![
            squares_table(),
            const_decl("SUM", Some(ty("u64")), add(int(1), int(2))),
            func(
                "pick",
                vec![],
                ty("u32"),
                block(vec![ret(comptime(block_with_tail(vec![], add(int(1), int(1)))))]),
            ),
        ],
    )
}

/// Checking the same module twice gives the same diagnostics and values.
#[test]
fn checking_is_idempotent() {
    let m = idempotence_module();
    let (first, first_diags) = check(&m);
    let (second, second_diags) = check(&m);
    assert_eq!(first_diags, second_diags);
    assert_eq!(first.const_value("SQUARES"), second.const_value("SQUARES"));
    assert_eq!(first.const_value("SUM"), second.const_value("SUM"));
    assert_eq!(first.functions, second.functions);
}

#[test]
fn sequential_and_parallel_checks_agree() {
    let m = idempotence_module();
    let sequential = CheckConfig {
        parallel: false,
        ..CheckConfig::default()
    };
    let (a, a_diags) = check(&m);
    let (b, b_diags) = check_with_config(&m, &sequential);
    assert_eq!(a_diags, b_diags);
    assert_eq!(a.functions, b.functions);
}

fn returns_module_constant(constant: &str) -> Decl {
    func("f", vec![], ty("u32"), block(vec![ret(ident(constant))]))
}

/// A function called at comptime sees module constants, not the block
/// constants of the function that called it.
#[test]
fn called_function_sees_module_constants_only() {
    let in_g = comptime(block_with_tail(vec![], call("f", vec![])));
    let in_h = comptime(block_with_tail(vec![], call("f", vec![])));
    let (at_g, at_h) = (in_g.span, in_h.span);
    let m = module(
        "scopes",
        vec![
            const_decl("A", Some(ty("u32")), int(1)),
            returns_module_constant("A"),
            func(
                "g",
                vec![],
                ty("u32"),
                block(vec![
                    const_stmt("A", Some(ty("u32")), int(7)),
                    const_stmt("B", Some(ty("u32")), in_g),
                    ret(ident("B")),
                ]),
            ),
            func(
                "h",
                vec![],
                ty("u32"),
                block(vec![const_stmt("C", Some(ty("u32")), in_h), ret(ident("C"))]),
            ),
        ],
    );
    let (annotated, diagnostics) = check(&m);
    assert!(diagnostics.is_empty(), "unexpected diagnostics:\n{}", diagnostics.report());
    assert_eq!(annotated.comptime_value(at_g).and_then(ComptimeValue::as_int), Some(1));
    assert_eq!(annotated.comptime_value(at_h).and_then(ComptimeValue::as_int), Some(1));
}

#[test]
fn runtime_parameter_does_not_hide_a_module_constant_from_a_callee() {
    let value = comptime(block_with_tail(vec![], call("f", vec![])));
    let at = value.span;
    let m = module(
        "scopes",
        vec![
            const_decl("N", Some(ty("u32")), int(3)),
            returns_module_constant("N"),
            func("g", vec![param("N", ty("u32"))], ty("u32"), block(vec![ret(value)])),
        ],
    );
    let (annotated, diagnostics) = check(&m);
    assert!(diagnostics.is_empty(), "unexpected diagnostics:\n{}", diagnostics.report());
    assert_eq!(annotated.comptime_value(at).and_then(ComptimeValue::as_int), Some(3));
}

/// Nested repeats are charged for every element they materialize.
#[test]
fn nested_array_repeat_is_charged_per_element() {
    let cube = array_repeat(
        array_repeat(array_repeat(cast(int(0), ty("u8")), int(100)), int(100)),
        int(100),
    );
    let m = module("cube", vec![const_decl("CUBE", None, cube)]);
    let config = CheckConfig {
        comptime: ComptimeConfig {
            max_steps: 1000,
            ..ComptimeConfig::default()
        },
        ..CheckConfig::default()
    };
    let (annotated, diagnostics) = check_with_config(&m, &config);
    assert_eq!(diagnostics.kinds(), vec![ErrorKind::ComptimeBudgetExceeded]);
    assert!(annotated.const_value("CUBE").is_none());
}

#[test]
fn bitwise_not_flips_within_the_operand_width() {
    let m = module(
        "mask",
        vec![
            const_decl("LOW", Some(ty("u8")), unary(UnaryOp::BitNot, cast(int(0x0f), ty("u8")))),
            const_decl("WIDE", Some(ty("u32")), unary(UnaryOp::BitNot, cast(int(0), ty("u32")))),
            const_decl("SIGNED", Some(ty("i8")), unary(UnaryOp::BitNot, cast(int(5), ty("i8")))),
        ],
    );
    let (annotated, diagnostics) = check(&m);
    assert!(diagnostics.is_empty(), "unexpected diagnostics:\n{}", diagnostics.report());
    assert_eq!(annotated.const_value("LOW").and_then(ComptimeValue::as_int), Some(0xf0));
    assert_eq!(annotated.const_value("WIDE").and_then(ComptimeValue::as_int), Some(0xffff_ffff));
    assert_eq!(annotated.const_value("SIGNED").and_then(ComptimeValue::as_int), Some(-6));
}
