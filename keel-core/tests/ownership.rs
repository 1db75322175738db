use keel_ast::build::*;
use keel_ast::{Decl, Module};
use keel_core::{ErrorKind, OwnershipState, check};

fn connection() -> Decl {
    struct_decl("Connection", vec![field("port", ty("u32"))])
}

fn consume_fn() -> Decl {
    extern_fn("consume", vec![own_param("c", ptr(ty("Connection")))], void())
}

fn inspect_fn() -> Decl {
    extern_fn("inspect", vec![ref_param("c", ptr(ty("Connection")))], void())
}

fn kinds(module: &Module) -> Vec<ErrorKind> {
    let (_, diagnostics) = check(module);
    diagnostics.kinds()
}

/// Passing a binding to an `own` parameter moves it; the second pass is rejected.
#[test]
fn second_move_into_own_parameter_is_rejected() {
    let m = module(
        "moves",
        vec![
            connection(),
            consume_fn(),
            func(
                "main",
                vec![],
                void(),
                block(vec![
                    let_("c", allocate(ty("Connection"))),
                    expr_stmt(call("consume", vec![ident("c")])),
                    expr_stmt(call("consume", vec![ident("c")])),
                ]),
            ),
        ],
    );

    let (annotated, diagnostics) = check(&m);
    assert_eq!(diagnostics.kinds(), vec![ErrorKind::UseAfterMove]);
    let moved = diagnostics.of_kind(ErrorKind::UseAfterMove);
    assert_eq!(moved[0].related.len(), 1, "expected a 'moved here' label");

    let trace = annotated.trace("main", "c").expect("trace for c");
    let states = trace.states();
    assert_eq!(states.first(), Some(&OwnershipState::Owned));
    assert!(trace.reaches(OwnershipState::Moved));
    assert_eq!(states.last(), Some(&OwnershipState::Gone));
}

#[test]
fn single_move_is_accepted() {
    let m = module(
        "moves",
        vec![
            connection(),
            consume_fn(),
            func(
                "main",
                vec![],
                void(),
                block(vec![
                    let_("c", allocate(ty("Connection"))),
                    expr_stmt(call("consume", vec![ident("c")])),
                ]),
            ),
        ],
    );
    assert!(kinds(&m).is_empty());
}

#[test]
fn double_free_is_rejected() {
    let m = module(
        "frees",
        vec![
            connection(),
            func(
                "main",
                vec![],
                void(),
                block(vec![
                    let_("c", allocate(ty("Connection"))),
                    expr_stmt(call("free", vec![ident("c")])),
                    expr_stmt(call("free", vec![ident("c")])),
                ]),
            ),
        ],
    );

    let (_, diagnostics) = check(&m);
    assert_eq!(diagnostics.kinds(), vec![ErrorKind::UseAfterFree]);
    let diag = &diagnostics.as_slice()[0];
    assert!(diag.message.contains("freed twice"), "got: {}", diag.message);
}

/// A `release` function frees its `own` argument.
#[test]
fn read_after_release_function_is_use_after_free() {
    let m = module(
        "release",
        vec![
            connection(),
            release_fn("close", vec![own_param("c", ptr(ty("Connection")))]),
            func(
                "main",
                vec![],
                ty("u32"),
                block(vec![
                    let_("c", allocate(ty("Connection"))),
                    expr_stmt(call("close", vec![ident("c")])),
                    ret(field_of(deref(ident("c")), "port")),
                ]),
            ),
        ],
    );
    assert_eq!(kinds(&m), vec![ErrorKind::UseAfterFree]);
}

/// A borrow bound in an inner block blocks moves until the block exits.
#[test]
fn borrow_blocks_move_until_its_scope_exits() {
    let m = module(
        "borrows",
        vec![
            connection(),
            consume_fn(),
            func(
                "main",
                vec![],
                void(),
                block(vec![
                    let_("c", allocate(ty("Connection"))),
                    block_stmt(block(vec![
                        let_("r", ref_(ident("c"))),
                        expr_stmt(call("consume", vec![ident("c")])),
                    ])),
                    expr_stmt(call("consume", vec![ident("c")])),
                ]),
            ),
        ],
    );

    let (annotated, diagnostics) = check(&m);
    assert_eq!(diagnostics.kinds(), vec![ErrorKind::MoveWhileBorrowed]);

    let states = annotated.trace("main", "c").expect("trace").states();
    let borrowed = states.iter().position(|s| *s == OwnershipState::Borrowed(1));
    let moved = states.iter().position(|s| *s == OwnershipState::Moved);
    assert!(
        matches!((borrowed, moved), (Some(b), Some(m)) if b < m),
        "expected borrow before move, got {states:?}"
    );
}

#[test]
fn call_argument_borrow_ends_with_the_call() {
    let m = module(
        "borrows",
        vec![
            connection(),
            consume_fn(),
            inspect_fn(),
            func(
                "main",
                vec![],
                void(),
                block(vec![
                    let_("c", allocate(ty("Connection"))),
                    expr_stmt(call("inspect", vec![ref_(ident("c"))])),
                    expr_stmt(call("inspect", vec![ident("c")])),
                    expr_stmt(call("consume", vec![ident("c")])),
                ]),
            ),
        ],
    );
    assert!(kinds(&m).is_empty());
}

#[test]
fn moving_out_of_a_ref_parameter_is_rejected() {
    let m = module(
        "borrows",
        vec![
            connection(),
            consume_fn(),
            func(
                "main",
                vec![ref_param("c", ptr(ty("Connection")))],
                void(),
                block(vec![expr_stmt(call("consume", vec![ident("c")]))]),
            ),
        ],
    );
    assert_eq!(kinds(&m), vec![ErrorKind::MoveWhileBorrowed]);
}

/// Re-borrowing through an alias counts against the original binding.
#[test]
fn reborrow_keeps_the_source_borrowed() {
    let m = module(
        "borrows",
        vec![
            connection(),
            consume_fn(),
            func(
                "main",
                vec![],
                void(),
                block(vec![
                    let_("c", allocate(ty("Connection"))),
                    let_("r", ref_(ident("c"))),
                    let_("r2", ident("r")),
                    expr_stmt(call("consume", vec![ident("c")])),
                ]),
            ),
        ],
    );

    let (annotated, diagnostics) = check(&m);
    assert_eq!(diagnostics.kinds(), vec![ErrorKind::MoveWhileBorrowed]);
    let trace = annotated.trace("main", "c").expect("trace");
    assert!(trace.reaches(OwnershipState::Borrowed(2)), "got {:?}", trace.states());
}

#[test]
fn slice_borrows_its_backing_array() {
    let m = module(
        "slices",
        vec![
            extern_fn("take", vec![own_param("buf", array_of(ty("u8"), int(4)))], void()),
            func(
                "main",
                vec![],
                void(),
                block(vec![
                    let_typed("buf", array_of(ty("u8"), int(4)), array_repeat(int(0), int(4))),
                    let_("s", slice(ident("buf"), int(0), int(2))),
                    expr_stmt(call("take", vec![ident("buf")])),
                ]),
            ),
        ],
    );
    assert_eq!(kinds(&m), vec![ErrorKind::MoveWhileBorrowed]);
}

#[test]
fn returning_a_borrow_of_a_local_escapes() {
    let m = module(
        "escape",
        vec![func(
            "leak",
            vec![],
            ptr(ty("u32")),
            block(vec![let_typed("x", ty("u32"), int(5)), ret(ref_(ident("x")))]),
        )],
    );
    assert_eq!(kinds(&m), vec![ErrorKind::EscapingBorrow]);
}

#[test]
fn borrow_stored_in_an_outer_binding_escapes() {
    let m = module(
        "escape",
        vec![func(
            "main",
            vec![],
            void(),
            block(vec![
                declare("p", ptr(ty("u32"))),
                block_stmt(block(vec![
                    let_typed("x", ty("u32"), int(1)),
                    assign(ident("p"), ref_(ident("x"))),
                ])),
            ]),
        )],
    );
    assert_eq!(kinds(&m), vec![ErrorKind::EscapingBorrow]);
}

fn holder() -> Decl {
    struct_decl("Holder", vec![field("p", ptr(ty("u32")))])
}

#[test]
fn returning_a_borrow_inside_a_struct_literal_escapes() {
    let m = module(
        "escape",
        vec![
            holder(),
            func(
                "leak",
                vec![],
                ty("Holder"),
                block(vec![
                    let_typed("a", ty("u32"), int(5)),
                    ret(struct_lit("Holder", vec![("p", ref_(ident("a")))])),
                ]),
            ),
        ],
    );
    let (_, diagnostics) = check(&m);
    assert_eq!(diagnostics.kinds(), vec![ErrorKind::EscapingBorrow]);
    let diag = &diagnostics.as_slice()[0];
    assert!(diag.message.contains("'a'"), "got: {}", diag.message);
}

#[test]
fn returning_a_borrow_inside_an_array_or_cast_escapes() {
    let m = module(
        "escape",
        vec![
            func(
                "table",
                vec![],
                array_of(ptr(ty("u32")), int(1)),
                block(vec![let_typed("a", ty("u32"), int(5)), ret(array(vec![ref_(ident("a"))]))]),
            ),
            func(
                "address",
                vec![],
                ty("usize"),
                block(vec![let_typed("b", ty("u32"), int(5)), ret(cast(ref_(ident("b")), ty("usize")))]),
            ),
        ],
    );
    assert_eq!(kinds(&m), vec![ErrorKind::EscapingBorrow, ErrorKind::EscapingBorrow]);
}

#[test]
fn borrow_inside_a_struct_stored_in_an_outer_binding_escapes() {
    let m = module(
        "escape",
        vec![
            holder(),
            func(
                "main",
                vec![],
                void(),
                block(vec![
                    declare("outer", ty("Holder")),
                    block_stmt(block(vec![
                        let_typed("a", ty("u32"), int(1)),
                        assign(ident("outer"), struct_lit("Holder", vec![("p", ref_(ident("a")))])),
                    ])),
                ]),
            ),
        ],
    );
    assert_eq!(kinds(&m), vec![ErrorKind::EscapingBorrow]);
}

/// A struct holding a borrow keeps its source borrowed for as long as the
/// struct's binding is in scope.
#[test]
fn borrow_held_by_a_struct_blocks_a_move() {
    let m = module(
        "held",
        vec![
            connection(),
            consume_fn(),
            struct_decl("View", vec![field("c", ptr(ptr(ty("Connection"))))]),
            func(
                "main",
                vec![],
                void(),
                block(vec![
                    let_("c", allocate(ty("Connection"))),
                    let_("v", struct_lit("View", vec![("c", ref_(ident("c")))])),
                    expr_stmt(call("consume", vec![ident("c")])),
                ]),
            ),
        ],
    );
    assert_eq!(kinds(&m), vec![ErrorKind::MoveWhileBorrowed]);
}

fn lookup_fn() -> Decl {
    extern_fn("lookup", vec![param("key", ty("u32"))], nullable_ptr(ty("Connection")))
}

fn find(body: Vec<keel_ast::Stmt>) -> Module {
    module(
        "nulls",
        vec![
            connection(),
            lookup_fn(),
            func("find", vec![], ty("u32"), block(body)),
        ],
    )
}

#[test]
fn deref_of_nullable_pointer_requires_a_check() {
    let m = find(vec![
        let_("c", call("lookup", vec![int(1)])),
        ret(field_of(deref(ident("c")), "port")),
    ]);
    let (_, diagnostics) = check(&m);
    assert_eq!(diagnostics.kinds(), vec![ErrorKind::UncheckedNullDeref]);
    assert!(diagnostics.as_slice()[0].help.is_some());
}

#[test]
fn not_null_test_narrows_the_pointer() {
    let m = find(vec![
        let_("c", call("lookup", vec![int(1)])),
        if_(
            ne(ident("c"), null()),
            block(vec![ret(field_of(deref(ident("c")), "port"))]),
            None,
        ),
        ret(int(0)),
    ]);
    assert!(kinds(&m).is_empty());
}

#[test]
fn capture_narrows_the_pointer() {
    let m = find(vec![
        let_("c", call("lookup", vec![int(1)])),
        if_capture(
            ident("c"),
            "conn",
            block(vec![ret(field_of(deref(ident("conn")), "port"))]),
            Some(block(vec![ret(int(0))])),
        ),
    ]);
    assert!(kinds(&m).is_empty());
}

#[test]
fn early_exit_on_null_narrows_the_rest_of_the_block() {
    let m = find(vec![
        let_("c", call("lookup", vec![int(1)])),
        if_(eq(ident("c"), null()), block(vec![ret(int(0))]), None),
        ret(field_of(deref(ident("c")), "port")),
    ]);
    assert!(kinds(&m).is_empty());
}

#[test]
fn assignment_drops_narrowing() {
    let m = find(vec![
        var_("c", nullable_ptr(ty("Connection")), call("lookup", vec![int(1)])),
        if_(
            ne(ident("c"), null()),
            block(vec![
                assign(ident("c"), call("lookup", vec![int(2)])),
                ret(field_of(deref(ident("c")), "port")),
            ]),
            None,
        ),
        ret(int(0)),
    ]);
    assert_eq!(kinds(&m), vec![ErrorKind::UncheckedNullDeref]);
}

fn list(body: Vec<keel_ast::Stmt>) -> Module {
    module(
        "list",
        vec![
            struct_decl(
                "Node",
                vec![field("value", ty("u32")), field("next", nullable_ptr(ty("Node")))],
            ),
            func("second", vec![ref_param("n", ptr(ty("Node")))], ty("u32"), block(body)),
        ],
    )
}

fn next_value() -> keel_ast::Expr {
    field_of(deref(field_of(ident("n"), "next")), "value")
}

#[test]
fn null_test_on_a_field_narrows_that_field() {
    let m = list(vec![
        if_(
            ne(field_of(ident("n"), "next"), null()),
            block(vec![ret(next_value())]),
            None,
        ),
        ret(int(0)),
    ]);
    let (_, diagnostics) = check(&m);
    assert!(diagnostics.is_empty(), "unexpected diagnostics:\n{}", diagnostics.report());

    let unchecked = list(vec![ret(next_value())]);
    assert_eq!(kinds(&unchecked), vec![ErrorKind::UncheckedNullDeref]);
}

#[test]
fn writing_the_field_drops_its_narrowing() {
    let m = list(vec![
        if_(
            ne(field_of(ident("n"), "next"), null()),
            block(vec![
                assign(field_of(ident("n"), "next"), null()),
                ret(next_value()),
            ]),
            None,
        ),
        ret(int(0)),
    ]);
    assert_eq!(kinds(&m), vec![ErrorKind::UncheckedNullDeref]);
}

#[test]
fn read_before_initialization_is_rejected() {
    let m = module(
        "init",
        vec![func(
            "main",
            vec![],
            void(),
            block(vec![declare("x", ty("u32")), let_("y", ident("x"))]),
        )],
    );
    assert_eq!(kinds(&m), vec![ErrorKind::UseOfUninitialized]);
}

fn point_fn(body: Vec<keel_ast::Stmt>) -> Module {
    module(
        "fields",
        vec![
            struct_decl("Point", vec![field("x", ty("u32")), field("y", ty("u32"))]),
            func("main", vec![], void(), block(body)),
        ],
    )
}

#[test]
fn assigning_every_field_initializes_a_struct() {
    let m = point_fn(vec![
        declare("p", ty("Point")),
        assign(field_of(ident("p"), "x"), int(1)),
        let_("x", field_of(ident("p"), "x")),
        assign(field_of(ident("p"), "y"), int(2)),
        let_("q", ident("p")),
    ]);
    assert!(kinds(&m).is_empty());
}

#[test]
fn partially_initialized_struct_cannot_be_read_whole() {
    let m = point_fn(vec![
        declare("p", ty("Point")),
        assign(field_of(ident("p"), "x"), int(1)),
        let_("q", ident("p")),
    ]);
    assert_eq!(kinds(&m), vec![ErrorKind::UseOfUninitialized]);
}

#[test]
fn moving_a_field_poisons_the_whole_struct() {
    let m = module(
        "fields",
        vec![
            connection(),
            consume_fn(),
            struct_decl(
                "Pair",
                vec![field("a", ptr(ty("Connection"))), field("b", ptr(ty("Connection")))],
            ),
            func(
                "split",
                vec![own_param("p", ty("Pair"))],
                void(),
                block(vec![
                    expr_stmt(call("consume", vec![field_of(ident("p"), "a")])),
                    expr_stmt(call("consume", vec![field_of(ident("p"), "b")])),
                    let_("q", ident("p")),
                ]),
            ),
        ],
    );
    let (_, diagnostics) = check(&m);
    assert_eq!(diagnostics.kinds(), vec![ErrorKind::UseAfterMove]);
    assert!(diagnostics.as_slice()[0].message.contains("p.a"));
}

#[test]
fn move_in_one_branch_is_seen_after_the_join() {
    let m = module(
        "branches",
        vec![
            connection(),
            consume_fn(),
            func(
                "main",
                vec![param("flag", ty("bool"))],
                void(),
                block(vec![
                    let_("c", allocate(ty("Connection"))),
                    if_(
                        ident("flag"),
                        block(vec![expr_stmt(call("consume", vec![ident("c")]))]),
                        None,
                    ),
                    expr_stmt(call("consume", vec![ident("c")])),
                ]),
            ),
        ],
    );
    assert_eq!(kinds(&m), vec![ErrorKind::UseAfterMove]);
}

#[test]
fn diverging_branch_does_not_poison_the_join() {
    let m = module(
        "branches",
        vec![
            connection(),
            consume_fn(),
            func(
                "main",
                vec![param("flag", ty("bool"))],
                void(),
                block(vec![
                    let_("c", allocate(ty("Connection"))),
                    if_(
                        ident("flag"),
                        block(vec![expr_stmt(call("consume", vec![ident("c")])), ret_void()]),
                        None,
                    ),
                    expr_stmt(call("consume", vec![ident("c")])),
                ]),
            ),
        ],
    );
    assert!(kinds(&m).is_empty());
}

/// The body is walked a second time from the back-edge state.
#[test]
fn move_inside_a_loop_is_caught_on_the_next_iteration() {
    let m = module(
        "loops",
        vec![
            connection(),
            consume_fn(),
            func(
                "main",
                vec![],
                void(),
                block(vec![
                    let_("c", allocate(ty("Connection"))),
                    for_(
                        "i",
                        int(0),
                        int(3),
                        block(vec![expr_stmt(call("consume", vec![ident("c")]))]),
                    ),
                ]),
            ),
        ],
    );
    let (_, diagnostics) = check(&m);
    assert_eq!(diagnostics.kinds(), vec![ErrorKind::UseAfterMove]);
}

#[test]
fn move_followed_by_break_is_fine() {
    let m = module(
        "loops",
        vec![
            connection(),
            consume_fn(),
            func(
                "main",
                vec![],
                void(),
                block(vec![
                    let_("c", allocate(ty("Connection"))),
                    while_(
                        boolean(true),
                        block(vec![expr_stmt(call("consume", vec![ident("c")])), brk()]),
                    ),
                ]),
            ),
        ],
    );
    assert!(kinds(&m).is_empty());
}

/// A freed binding stays dead: assigning a fresh allocation to it is a
/// use of the freed binding, reported once.
#[test]
fn assigning_to_a_freed_binding_is_rejected() {
    let m = module(
        "reinit",
        vec![
            connection(),
            func(
                "main",
                vec![],
                void(),
                block(vec![
                    var_("p", ptr(ty("Connection")), allocate(ty("Connection"))),
                    expr_stmt(call("free", vec![ident("p")])),
                    assign(ident("p"), allocate(ty("Connection"))),
                    expr_stmt(call("free", vec![ident("p")])),
                ]),
            ),
        ],
    );
    let (_, diagnostics) = check(&m);
    assert_eq!(diagnostics.kinds(), vec![ErrorKind::UseAfterFree]);
    let diag = &diagnostics.as_slice()[0];
    assert!(diag.message.contains("assignment to 'p'"), "got: {}", diag.message);
    assert_eq!(diag.related.len(), 1, "expected a 'freed here' label");
}

#[test]
fn assigning_to_a_moved_binding_is_rejected() {
    let m = module(
        "reinit",
        vec![
            connection(),
            consume_fn(),
            func(
                "main",
                vec![],
                void(),
                block(vec![
                    var_("c", ptr(ty("Connection")), allocate(ty("Connection"))),
                    expr_stmt(call("consume", vec![ident("c")])),
                    assign(ident("c"), allocate(ty("Connection"))),
                ]),
            ),
        ],
    );
    let (_, diagnostics) = check(&m);
    assert_eq!(diagnostics.kinds(), vec![ErrorKind::UseAfterMove]);
    assert_eq!(diagnostics.as_slice()[0].related.len(), 1, "expected a 'moved here' label");
}

#[test]
fn failures_in_one_function_do_not_affect_another() {
    let m = module(
        "isolation",
        vec![
            connection(),
            func(
                "bad",
                vec![],
                void(),
                block(vec![
                    let_("c", allocate(ty("Connection"))),
                    expr_stmt(call("free", vec![ident("c")])),
                    expr_stmt(call("free", vec![ident("c")])),
                ]),
            ),
            func(
                "good",
                vec![],
                void(),
                block(vec![
                    let_("c", allocate(ty("Connection"))),
                    expr_stmt(call("free", vec![ident("c")])),
                ]),
            ),
        ],
    );
    let (annotated, diagnostics) = check(&m);
    assert_eq!(diagnostics.len(), 1);
    assert!(!annotated.ready_for_codegen());
    let good = annotated.trace("good", "c").expect("trace");
    assert_eq!(good.states().last(), Some(&OwnershipState::Gone));
    assert!(good.reaches(OwnershipState::Freed));
}
