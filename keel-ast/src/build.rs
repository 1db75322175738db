//! Terse constructors for synthesizing trees without going through the parser.
//!
//! Every node gets a fresh span from a per-thread counter, so nodes built in
//! order have increasing source offsets and diagnostics sort the same way the
//! tree was written.

use std::cell::Cell;

use crate::*;

thread_local! {
    static NEXT_OFFSET: Cell<usize> = const { Cell::new(0) };
}

pub fn next_span() -> Span {
    NEXT_OFFSET.with(|c| {
        let at = c.get();
        c.set(at + 1);
        span(at, 1)
    })
}

pub fn name(n: &str) -> Ident {
    Ident::new(next_span(), n.to_string())
}

pub fn module(name: &str, decls: Vec<Decl>) -> Module {
    Module {
        name: name.to_string(),
        decls,
    }
}

// ---- declarations ----

pub fn field(n: &str, ty: TypeExpr) -> FieldDecl {
    FieldDecl {
        span: next_span(),
        name: name(n),
        ty,
    }
}

pub fn struct_decl(n: &str, fields: Vec<FieldDecl>) -> Decl {
    Decl::Struct(StructDecl {
        span: next_span(),
        name: name(n),
        fields,
        packed: false,
        align: None,
    })
}

pub fn packed_struct(n: &str, fields: Vec<FieldDecl>) -> Decl {
    Decl::Struct(StructDecl {
        span: next_span(),
        name: name(n),
        fields,
        packed: true,
        align: None,
    })
}

pub fn aligned_struct(n: &str, align: Expr, fields: Vec<FieldDecl>) -> Decl {
    Decl::Struct(StructDecl {
        span: next_span(),
        name: name(n),
        fields,
        packed: false,
        align: Some(align),
    })
}

fn const_node(n: &str, ty: Option<TypeExpr>, value: Expr) -> ConstDecl {
    ConstDecl {
        span: next_span(),
        name: name(n),
        ty,
        value,
    }
}

pub fn const_decl(n: &str, ty: Option<TypeExpr>, value: Expr) -> Decl {
    Decl::Const(const_node(n, ty, value))
}

pub fn func(n: &str, params: Vec<Param>, ret: TypeExpr, body: Block) -> Decl {
    Decl::Fn(FnDecl {
        span: next_span(),
        name: name(n),
        params,
        ret,
        body: Some(body),
        release: false,
    })
}

pub fn extern_fn(n: &str, params: Vec<Param>, ret: TypeExpr) -> Decl {
    Decl::Fn(FnDecl {
        span: next_span(),
        name: name(n),
        params,
        ret,
        body: None,
        release: false,
    })
}

/// Extern close function whose `own` parameters are freed by the call.
pub fn release_fn(n: &str, params: Vec<Param>) -> Decl {
    Decl::Fn(FnDecl {
        span: next_span(),
        name: name(n),
        params,
        ret: void(),
        body: None,
        release: true,
    })
}

fn param_with(n: &str, qual: Qualifier, ty: TypeExpr) -> Param {
    Param {
        span: next_span(),
        name: name(n),
        qual,
        ty,
    }
}

pub fn param(n: &str, ty: TypeExpr) -> Param {
    param_with(n, Qualifier::None, ty)
}

pub fn own_param(n: &str, ty: TypeExpr) -> Param {
    param_with(n, Qualifier::Own, ty)
}

pub fn ref_param(n: &str, ty: TypeExpr) -> Param {
    param_with(n, Qualifier::Ref, ty)
}

// ---- types ----

fn type_node(kind: TypeExprKind) -> TypeExpr {
    TypeExpr {
        span: next_span(),
        kind,
    }
}

pub fn ty(n: &str) -> TypeExpr {
    type_node(TypeExprKind::Named(n.to_string()))
}

pub fn void() -> TypeExpr {
    type_node(TypeExprKind::Void)
}

pub fn ptr(target: TypeExpr) -> TypeExpr {
    type_node(TypeExprKind::Pointer {
        target: Box::new(target),
        nullable: false,
    })
}

pub fn nullable_ptr(target: TypeExpr) -> TypeExpr {
    type_node(TypeExprKind::Pointer {
        target: Box::new(target),
        nullable: true,
    })
}

pub fn slice_of(elem: TypeExpr) -> TypeExpr {
    type_node(TypeExprKind::Slice(Box::new(elem)))
}

pub fn array_of(elem: TypeExpr, len: Expr) -> TypeExpr {
    type_node(TypeExprKind::Array {
        elem: Box::new(elem),
        len: Box::new(len),
    })
}

pub fn error_union(success: TypeExpr, errors: &[&str]) -> TypeExpr {
    type_node(TypeExprKind::ErrorUnion {
        success: Box::new(success),
        errors: errors.iter().map(|e| name(e)).collect(),
    })
}

// ---- statements ----

pub fn block(stmts: Vec<Stmt>) -> Block {
    Block {
        span: next_span(),
        stmts,
        tail: None,
    }
}

pub fn block_with_tail(stmts: Vec<Stmt>, tail: Expr) -> Block {
    Block {
        span: next_span(),
        stmts,
        tail: Some(Box::new(tail)),
    }
}

pub fn let_(n: &str, value: Expr) -> Stmt {
    Stmt::Let(LetStmt {
        span: next_span(),
        name: name(n),
        mutable: false,
        ty: None,
        value: Some(value),
    })
}

pub fn let_typed(n: &str, ty: TypeExpr, value: Expr) -> Stmt {
    Stmt::Let(LetStmt {
        span: next_span(),
        name: name(n),
        mutable: false,
        ty: Some(ty),
        value: Some(value),
    })
}

pub fn var_(n: &str, ty: TypeExpr, value: Expr) -> Stmt {
    Stmt::Let(LetStmt {
        span: next_span(),
        name: name(n),
        mutable: true,
        ty: Some(ty),
        value: Some(value),
    })
}

/// Mutable binding without an initializer.
pub fn declare(n: &str, ty: TypeExpr) -> Stmt {
    Stmt::Let(LetStmt {
        span: next_span(),
        name: name(n),
        mutable: true,
        ty: Some(ty),
        value: None,
    })
}

pub fn const_stmt(n: &str, ty: Option<TypeExpr>, value: Expr) -> Stmt {
    Stmt::Const(const_node(n, ty, value))
}

pub fn assign(target: Expr, value: Expr) -> Stmt {
    Stmt::Assign(AssignStmt {
        span: next_span(),
        target,
        value,
    })
}

pub fn expr_stmt(e: Expr) -> Stmt {
    Stmt::Expr(e)
}

pub fn ret(value: Expr) -> Stmt {
    Stmt::Return(ReturnStmt {
        span: next_span(),
        value: Some(value),
    })
}

pub fn ret_void() -> Stmt {
    Stmt::Return(ReturnStmt {
        span: next_span(),
        value: None,
    })
}

pub fn if_(cond: Expr, then_block: Block, else_block: Option<Block>) -> Stmt {
    Stmt::If(IfStmt {
        span: next_span(),
        cond,
        capture: None,
        then_block,
        else_block,
    })
}

pub fn if_capture(value: Expr, binding: &str, then_block: Block, else_block: Option<Block>) -> Stmt {
    Stmt::If(IfStmt {
        span: next_span(),
        cond: value,
        capture: Some(name(binding)),
        then_block,
        else_block,
    })
}

pub fn while_(cond: Expr, body: Block) -> Stmt {
    Stmt::While(WhileStmt {
        span: next_span(),
        cond,
        body,
    })
}

pub fn for_(var: &str, start: Expr, end: Expr, body: Block) -> Stmt {
    Stmt::For(ForStmt {
        span: next_span(),
        var: name(var),
        start,
        end,
        body,
    })
}

pub fn brk() -> Stmt {
    Stmt::Break(next_span())
}

pub fn cont() -> Stmt {
    Stmt::Continue(next_span())
}

pub fn block_stmt(b: Block) -> Stmt {
    Stmt::Block(b)
}

pub fn defer_(body: Block) -> Stmt {
    Stmt::Defer(DeferStmt {
        span: next_span(),
        on_error: false,
        body,
    })
}

pub fn defer_on_error(body: Block) -> Stmt {
    Stmt::Defer(DeferStmt {
        span: next_span(),
        on_error: true,
        body,
    })
}

pub fn comptime_stmt(body: Block) -> Stmt {
    Stmt::Comptime(body)
}

// ---- expressions ----

fn expr(kind: ExprKind) -> Expr {
    Expr::new(next_span(), kind)
}

pub fn ident(n: &str) -> Expr {
    expr(ExprKind::Ident(n.to_string()))
}

pub fn int(v: i128) -> Expr {
    expr(ExprKind::Int(v))
}

pub fn boolean(b: bool) -> Expr {
    expr(ExprKind::Bool(b))
}

pub fn null() -> Expr {
    expr(ExprKind::Null)
}

pub fn unary(op: UnaryOp, e: Expr) -> Expr {
    expr(ExprKind::Unary {
        op,
        expr: Box::new(e),
    })
}

pub fn binary(left: Expr, op: BinOp, right: Expr) -> Expr {
    expr(ExprKind::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
    })
}

pub fn add(l: Expr, r: Expr) -> Expr {
    binary(l, BinOp::Add, r)
}

pub fn mul(l: Expr, r: Expr) -> Expr {
    binary(l, BinOp::Mul, r)
}

pub fn lt(l: Expr, r: Expr) -> Expr {
    binary(l, BinOp::Lt, r)
}

pub fn eq(l: Expr, r: Expr) -> Expr {
    binary(l, BinOp::Eq, r)
}

pub fn ne(l: Expr, r: Expr) -> Expr {
    binary(l, BinOp::Ne, r)
}

pub fn call(callee: &str, args: Vec<Expr>) -> Expr {
    expr(ExprKind::Call {
        callee: name(callee),
        args,
    })
}

pub fn ref_(e: Expr) -> Expr {
    expr(ExprKind::Ref(Box::new(e)))
}

pub fn deref(e: Expr) -> Expr {
    expr(ExprKind::Deref(Box::new(e)))
}

pub fn field_of(base: Expr, f: &str) -> Expr {
    expr(ExprKind::Field {
        base: Box::new(base),
        field: name(f),
    })
}

pub fn index(base: Expr, i: Expr) -> Expr {
    expr(ExprKind::Index {
        base: Box::new(base),
        index: Box::new(i),
    })
}

pub fn slice(base: Expr, start: Expr, end: Expr) -> Expr {
    expr(ExprKind::Slice {
        base: Box::new(base),
        start: Box::new(start),
        end: Box::new(end),
    })
}

pub fn array(items: Vec<Expr>) -> Expr {
    expr(ExprKind::ArrayLit(items))
}

pub fn array_repeat(value: Expr, count: Expr) -> Expr {
    expr(ExprKind::ArrayRepeat {
        value: Box::new(value),
        count: Box::new(count),
    })
}

pub fn struct_lit(n: &str, fields: Vec<(&str, Expr)>) -> Expr {
    expr(ExprKind::StructLit {
        name: name(n),
        fields: fields.into_iter().map(|(f, e)| (name(f), e)).collect(),
    })
}

pub fn try_(e: Expr) -> Expr {
    expr(ExprKind::Try(Box::new(e)))
}

pub fn catch(e: Expr, fallback: Expr) -> Expr {
    expr(ExprKind::Catch {
        expr: Box::new(e),
        fallback: Box::new(fallback),
    })
}

pub fn error_tag(tag: &str) -> Expr {
    expr(ExprKind::ErrorTag(name(tag)))
}

pub fn comptime(body: Block) -> Expr {
    expr(ExprKind::Comptime(Box::new(body)))
}

pub fn cast(e: Expr, ty: TypeExpr) -> Expr {
    expr(ExprKind::Cast {
        expr: Box::new(e),
        ty,
    })
}

pub fn allocate(ty: TypeExpr) -> Expr {
    expr(ExprKind::Allocate(ty))
}
