//! The per-function walker: scopes, bindings and statement-level control flow.

use std::collections::HashMap;
use std::rc::Rc;

use keel_ast::{
    Block, BinOp, ConstDecl, Expr, ExprKind, FnDecl, ForStmt, Ident, IfStmt, LetStmt, Span, Stmt,
    TypeExpr, UnaryOp, WhileStmt,
};
use tracing::{debug, trace};

use super::CheckContext;
use crate::annotate::{BindingTrace, FunctionFacts};
use crate::comptime::{ComptimeEnv, ComptimeValue};
use crate::diagnostics::{Diagnostic, DiagnosticSink, ErrorKind};
use crate::ownership::{
    Binding, BindingId, BindingKind, Event, FlowState, NullPath, OwnershipState, Transition,
};
use crate::resolve::{ModuleEnv, lower_type, reduce_to_u64};
use crate::types::{FnSig, IntType, Type};

/// Names visible at some point of the function body.
pub(super) type NameView = Rc<HashMap<String, BindingId>>;

#[derive(Clone, Debug)]
pub(super) enum ExitAction<'a> {
    /// Deferred code resolves names as they were where it was written.
    Defer {
        body: &'a Block,
        on_error: bool,
        names: NameView,
    },
    /// Give back a borrow held by a binding of this scope.
    Release { source: BindingId, span: Span },
}

#[derive(Default)]
pub(super) struct Scope<'a> {
    names: HashMap<String, BindingId>,
    order: Vec<BindingId>,
    pub(super) exits: Vec<ExitAction<'a>>,
}

#[derive(Default)]
pub(super) struct LoopFrame {
    /// Number of scopes outside the loop body.
    depth: usize,
    breaks: Vec<FlowState>,
    continues: Vec<FlowState>,
}

pub(crate) struct FnChecker<'a> {
    pub(super) ctx: &'a CheckContext<'a>,
    pub(super) decl: &'a FnDecl,
    pub(super) sig: &'a FnSig,
    pub(super) sink: DiagnosticSink,
    pub(super) bindings: Vec<Binding>,
    by_decl: HashMap<(usize, usize), BindingId>,
    traces: Vec<Vec<Transition>>,
    pub(super) scopes: Vec<Scope<'a>>,
    /// While deferred code runs: the scope count its body starts from and
    /// the names it captured. Scopes below that count are not visible.
    views: Vec<(usize, NameView)>,
    pub(super) flow: FlowState,
    loops: Vec<LoopFrame>,
    /// Nesting of defer bodies currently being checked.
    pub(super) defer_depth: usize,
    /// Borrows taken inside the current statement's expressions.
    pub(super) temps: Vec<(BindingId, Span)>,
    pub(super) comptime_values: Vec<(Span, ComptimeValue)>,
}

impl<'a> FnChecker<'a> {
    pub(crate) fn new(ctx: &'a CheckContext<'a>, decl: &'a FnDecl, sig: &'a FnSig) -> Self {
        FnChecker {
            ctx,
            decl,
            sig,
            sink: DiagnosticSink::with_limit(ctx.config.max_diagnostics_per_function),
            bindings: Vec::new(),
            by_decl: HashMap::new(),
            traces: Vec::new(),
            scopes: Vec::new(),
            views: Vec::new(),
            flow: FlowState::new(),
            loops: Vec::new(),
            defer_depth: 0,
            temps: Vec::new(),
            comptime_values: Vec::new(),
        }
    }

    pub(crate) fn run(mut self) -> (FunctionFacts, DiagnosticSink) {
        let decl = self.decl;
        let Some(body) = &decl.body else {
            return (self.finish(), DiagnosticSink::new());
        };
        self.push_scope();
        let sig = self.sig;
        for (param, sig) in decl.params.iter().zip(&sig.params) {
            self.declare(
                &param.name,
                Some(sig.ty.clone()),
                BindingKind::Param(param.qual),
                false,
                OwnershipState::Owned,
            );
        }

        self.push_scope();
        self.stmts(body);
        if let Some(tail) = &body.tail {
            if self.flow.reachable {
                self.return_value(Some(&**tail), tail.span);
            }
        }
        self.pop_scope(body.span);
        self.pop_scope(body.span);

        debug!(
            function = %self.decl.name.node,
            bindings = self.bindings.len(),
            diagnostics = self.sink.len(),
            "checked function"
        );
        let sink = std::mem::take(&mut self.sink);
        (self.finish(), sink)
    }

    fn finish(self) -> FunctionFacts {
        let bindings = self
            .bindings
            .into_iter()
            .zip(self.traces)
            .map(|(b, transitions)| BindingTrace {
                name: b.name,
                span: b.span,
                ty: b.ty,
                transitions,
            })
            .collect();
        FunctionFacts {
            name: self.decl.name.node.clone(),
            bindings,
            comptime_values: self.comptime_values,
        }
    }

    // ---- diagnostics ----

    pub(super) fn report(&mut self, kind: ErrorKind, span: Span, message: impl Into<String>) {
        self.sink.report(kind, span, message);
    }

    pub(super) fn push(&mut self, diagnostic: Diagnostic) {
        self.sink.push(diagnostic);
    }

    // ---- scopes and bindings ----

    pub(super) fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Leave the innermost scope: run its exit actions in reverse, then its
    /// bindings are gone.
    pub(super) fn pop_scope(&mut self, end: Span) {
        if self.flow.reachable && !self.scopes.is_empty() {
            self.run_scope_exits(self.scopes.len() - 1, false);
        }
        let Some(scope) = self.scopes.pop() else {
            return;
        };
        if self.flow.reachable {
            for id in scope.order {
                self.set_state(id, OwnershipState::Gone, end, None);
            }
        }
    }

    pub(super) fn current_scope(&mut self) -> Option<&mut Scope<'a>> {
        self.scopes.last_mut()
    }

    pub(super) fn declare(
        &mut self,
        name: &Ident,
        ty: Option<Type>,
        kind: BindingKind,
        mutable: bool,
        state: OwnershipState,
    ) -> BindingId {
        let depth = self.scopes.len().saturating_sub(1);
        let key = (name.span.offset(), name.span.len());
        let binding = Binding {
            name: name.node.clone(),
            span: name.span,
            ty,
            kind,
            depth,
            mutable,
            comptime: None,
        };
        let id = match self.by_decl.get(&key) {
            Some(&id) => {
                self.bindings[id] = binding;
                id
            }
            None => {
                let id = self.bindings.len();
                self.bindings.push(binding);
                self.traces.push(Vec::new());
                self.by_decl.insert(key, id);
                id
            }
        };
        if let Some(scope) = self.scopes.last_mut() {
            scope.names.insert(name.node.clone(), id);
            scope.order.push(id);
        }
        self.flow.declare(id, state);
        self.record(id, name.span, state);
        id
    }

    pub(super) fn lookup(&self, name: &str) -> Option<BindingId> {
        let view = self.views.last();
        let base = view.map_or(0, |(base, _)| *base);
        self.scopes
            .iter()
            .skip(base)
            .rev()
            .find_map(|s| s.names.get(name).copied())
            .or_else(|| view.and_then(|(_, names)| names.get(name).copied()))
    }

    /// Snapshot of every name `lookup` can currently resolve.
    pub(super) fn visible_names(&self) -> NameView {
        let view = self.views.last();
        let base = view.map_or(0, |(base, _)| *base);
        let mut names = view.map(|(_, names)| (**names).clone()).unwrap_or_default();
        for scope in self.scopes.iter().skip(base) {
            names.extend(scope.names.iter().map(|(n, id)| (n.clone(), *id)));
        }
        Rc::new(names)
    }

    /// The binding whose ownership `id` stands for.
    pub(super) fn resolve_alias(&self, id: BindingId) -> BindingId {
        match self.bindings[id].kind {
            BindingKind::Capture { source: Some(s) } => s,
            _ => id,
        }
    }

    pub(super) fn set_state(&mut self, id: BindingId, state: OwnershipState, span: Span, event: Option<Event>) {
        self.flow.set(id, state, event);
        self.record(id, span, state);
    }

    fn record(&mut self, id: BindingId, span: Span, state: OwnershipState) {
        if !self.flow.reachable {
            return;
        }
        let transition = Transition { span, state };
        if let Some(trace) = self.traces.get_mut(id) {
            if !trace.contains(&transition) {
                trace!(
                    target: "ownership",
                    binding = %self.bindings[id].name,
                    state = %state.display(),
                    "transition"
                );
                trace.push(transition);
            }
        }
    }

    // ---- exit actions ----

    /// Run the exit actions of scope `index` in reverse registration order.
    pub(super) fn run_scope_exits(&mut self, index: usize, error_path: bool) {
        let Some(scope) = self.scopes.get(index) else {
            return;
        };
        let actions = scope.exits.clone();
        for action in actions.into_iter().rev() {
            match action {
                ExitAction::Release { source, span } => self.release_borrow(source, span),
                ExitAction::Defer { body, on_error, names } => {
                    if on_error && !error_path {
                        continue;
                    }
                    self.views.push((self.scopes.len(), names));
                    self.defer_depth += 1;
                    self.block(body);
                    self.defer_depth -= 1;
                    self.views.pop();
                }
            }
        }
    }

    /// Run the exit actions of every scope from the innermost down to `depth`.
    pub(super) fn run_exits_down_to(&mut self, depth: usize, error_path: bool) {
        for index in (depth..self.scopes.len()).rev() {
            self.run_scope_exits(index, error_path);
        }
    }

    pub(super) fn release_borrow(&mut self, source: BindingId, span: Span) {
        let state = self.flow.state(source);
        if let OwnershipState::Borrowed(_) = state {
            self.set_state(source, state.released(), span, None);
        }
    }

    // ---- types and comptime ----

    pub(super) fn lower(&mut self, ty: &TypeExpr) -> Option<Type> {
        let this: &Self = self;
        let env = FnEnv::new(this);
        let limits = &this.ctx.config.comptime;
        let result = lower_type(&this.ctx.tables.types, ty, &|len: &Expr| {
            reduce_to_u64(
                this.ctx.cache.evaluate(&env, limits, len, None),
                "array length",
                len.span,
            )
        });
        match result {
            Ok(t) => Some(t),
            Err(diag) => {
                self.push(diag);
                None
            }
        }
    }

    /// Evaluate a comptime block in this function and remember its value.
    pub(super) fn comptime_block(&mut self, block: &Block, span: Span, hint: Option<IntType>) -> Option<ComptimeValue> {
        let this: &Self = self;
        let result = this
            .ctx
            .cache
            .evaluate_block(&FnEnv::new(this), &this.ctx.config.comptime, block, hint);
        self.comptime_result(result, span)
    }

    pub(super) fn comptime_expr(&mut self, expr: &Expr, hint: Option<IntType>) -> Option<ComptimeValue> {
        let this: &Self = self;
        let result = this
            .ctx
            .cache
            .evaluate(&FnEnv::new(this), &this.ctx.config.comptime, expr, hint);
        self.comptime_result(result, expr.span)
    }

    fn comptime_result(
        &mut self,
        result: Result<ComptimeValue, crate::comptime::ComptimeError>,
        span: Span,
    ) -> Option<ComptimeValue> {
        match result {
            Ok(value) => {
                self.comptime_values.push((span, value.clone()));
                Some(value)
            }
            Err(err) => {
                self.push(err.into());
                None
            }
        }
    }

    // ---- statements ----

    pub(super) fn block(&mut self, block: &'a Block) {
        self.push_scope();
        self.stmts(block);
        if let Some(tail) = &block.tail {
            if self.flow.reachable {
                self.expr(tail);
            }
        }
        self.pop_scope(block.span);
    }

    fn stmts(&mut self, block: &'a Block) {
        for stmt in &block.stmts {
            if !self.flow.reachable {
                break;
            }
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &'a Stmt) {
        match stmt {
            Stmt::Let(l) => self.let_stmt(l),
            Stmt::Const(c) => self.local_const(c),
            Stmt::Assign(a) => self.assign(&a.target, &a.value, a.span),
            Stmt::Expr(e) => self.expr_stmt(e),
            Stmt::Return(r) => self.return_value(r.value.as_ref(), r.span),
            Stmt::If(i) => self.if_stmt(i),
            Stmt::While(w) => self.while_stmt(w),
            Stmt::For(f) => self.for_stmt(f),
            Stmt::Break(span) => self.loop_exit(*span, true),
            Stmt::Continue(span) => self.loop_exit(*span, false),
            Stmt::Block(b) => self.block(b),
            Stmt::Defer(d) => self.defer_stmt(d),
            Stmt::Comptime(b) => {
                self.comptime_block(b, b.span, None);
            }
        }
        self.release_temps();
    }

    fn let_stmt(&mut self, l: &'a LetStmt) {
        let declared = match &l.ty {
            Some(t) => self.lower(t),
            None => None,
        };
        let Some(value) = &l.value else {
            self.declare(&l.name, declared, BindingKind::Local, l.mutable, OwnershipState::Uninitialized);
            return;
        };

        if self.is_borrow_expr(value) {
            let (source, source_ty) = self.take_borrow(value);
            let ty = declared.or(source_ty);
            self.declare(&l.name, ty, BindingKind::Borrow { source }, l.mutable, OwnershipState::Owned);
            if let (Some(source), Some(scope)) = (source, self.current_scope()) {
                scope.exits.push(ExitAction::Release {
                    source,
                    span: value.span,
                });
            }
            return;
        }

        let ty = self.expr(value);
        let ty = declared.or(ty);
        let id = self.declare(&l.name, ty, BindingKind::Local, l.mutable, OwnershipState::Owned);
        self.store_nested_borrows(Some(id), value);
    }

    fn local_const(&mut self, c: &'a ConstDecl) {
        let declared = match &c.ty {
            Some(t) => self.lower(t),
            None => None,
        };
        let hint = match &declared {
            Some(Type::Int(it)) => Some(*it),
            _ => None,
        };
        let value = self.comptime_expr(&c.value, hint);
        let ty = declared.or_else(|| match &value {
            Some(ComptimeValue::Int { ty: Some(it), .. }) => Some(Type::Int(*it)),
            Some(ComptimeValue::Bool(_)) => Some(Type::Bool),
            _ => None,
        });
        let id = self.declare(&c.name, ty, BindingKind::Local, false, OwnershipState::Owned);
        self.bindings[id].comptime = value;
    }

    fn if_stmt(&mut self, i: &'a IfStmt) {
        let cond_ty = self.full_expr(&i.cond);
        let base = self.flow.clone();

        let (then_narrow, else_narrow) = match &i.capture {
            Some(_) => (self.null_path(&i.cond).into_iter().collect(), Vec::new()),
            None => self.narrowing(&i.cond),
        };

        for path in then_narrow {
            self.flow.narrow(path);
        }
        match &i.capture {
            Some(capture) => {
                let source = self.ident_binding(&i.cond).map(|id| self.resolve_alias(id));
                self.push_scope();
                self.declare(
                    capture,
                    cond_ty.as_ref().map(Type::narrowed),
                    BindingKind::Capture { source },
                    false,
                    OwnershipState::Owned,
                );
                self.block(&i.then_block);
                self.pop_scope(i.then_block.span);
            }
            None => self.block(&i.then_block),
        }
        let then_state = std::mem::replace(&mut self.flow, base);

        for path in else_narrow {
            self.flow.narrow(path);
        }
        if let Some(else_block) = &i.else_block {
            self.block(else_block);
        }
        self.flow = then_state.join(&self.flow);
    }

    /// Places proven non-null when `cond` is true, and when it is false.
    pub(super) fn narrowing(&self, cond: &Expr) -> (Vec<NullPath>, Vec<NullPath>) {
        match &cond.kind {
            ExprKind::Binary { left, op, right } => match op {
                BinOp::Ne | BinOp::Eq => {
                    let tested = match (&left.kind, &right.kind) {
                        (_, ExprKind::Null) => self.null_path(left),
                        (ExprKind::Null, _) => self.null_path(right),
                        _ => None,
                    };
                    let tested: Vec<_> = tested.into_iter().collect();
                    if *op == BinOp::Ne {
                        (tested, Vec::new())
                    } else {
                        (Vec::new(), tested)
                    }
                }
                BinOp::And => {
                    let (mut t, _) = self.narrowing(left);
                    t.extend(self.narrowing(right).0);
                    (t, Vec::new())
                }
                BinOp::Or => {
                    let (_, mut f) = self.narrowing(left);
                    f.extend(self.narrowing(right).1);
                    (Vec::new(), f)
                }
                _ => (Vec::new(), Vec::new()),
            },
            ExprKind::Unary { op: UnaryOp::Not, expr } => {
                let (t, f) = self.narrowing(expr);
                (f, t)
            }
            _ => (Vec::new(), Vec::new()),
        }
    }

    pub(super) fn ident_binding(&self, expr: &Expr) -> Option<BindingId> {
        match &expr.kind {
            ExprKind::Ident(n) => self.lookup(n),
            _ => None,
        }
    }

    /// `x` or a field chain `x.a.b` that a null test can narrow.
    pub(super) fn null_path(&self, expr: &Expr) -> Option<NullPath> {
        match &expr.kind {
            ExprKind::Ident(n) => self.lookup(n).map(NullPath::binding),
            ExprKind::Field { base, field } => Some(self.null_path(base)?.field(&field.node)),
            _ => None,
        }
    }

    fn while_stmt(&mut self, w: &'a WhileStmt) {
        let always = matches!(w.cond.kind, ExprKind::Bool(true));
        self.run_loop(move |this| {
            this.full_expr(&w.cond);
            let (then_narrow, else_narrow) = this.narrowing(&w.cond);
            let exit = if always {
                FlowState::unreachable()
            } else {
                let mut exit = this.flow.clone();
                for path in else_narrow {
                    exit.narrow(path);
                }
                exit
            };
            for path in then_narrow {
                this.flow.narrow(path);
            }
            this.block(&w.body);
            exit
        });
    }

    fn for_stmt(&mut self, f: &'a ForStmt) {
        let start = self.full_expr(&f.start);
        let end = self.full_expr(&f.end);
        let ty = start.or(end);
        self.run_loop(move |this| {
            let exit = this.flow.clone();
            this.push_scope();
            this.declare(&f.var, ty.clone(), BindingKind::LoopVar, false, OwnershipState::Owned);
            this.block(&f.body);
            this.pop_scope(f.body.span);
            exit
        });
    }

    /// Check a loop body twice: the second pass starts from the join of the
    /// entry state and the state at the end of the first iteration, so moves
    /// carried across iterations are seen. `pass` returns the state on the
    /// path that leaves through the loop condition.
    fn run_loop(&mut self, mut pass: impl FnMut(&mut Self) -> FlowState) {
        let entry = self.flow.clone();
        let mut head = entry.clone();
        let mut exits = Vec::new();
        for _ in 0..2 {
            self.flow = head.clone();
            self.loops.push(LoopFrame {
                depth: self.scopes.len(),
                ..LoopFrame::default()
            });
            let exit = pass(self);
            let frame = self.loops.pop().unwrap_or_default();
            let back = FlowState::join_all(std::iter::once(self.flow.clone()).chain(frame.continues));
            head = entry.join(&back);
            exits = std::iter::once(exit).chain(frame.breaks).collect();
        }
        self.flow = FlowState::join_all(exits);
    }

    fn loop_exit(&mut self, span: Span, is_break: bool) {
        let Some(depth) = self.loops.last().map(|l| l.depth) else {
            return;
        };
        let saved = self.flow.clone();
        self.run_exits_down_to(depth, false);
        let state = std::mem::replace(&mut self.flow, saved);
        trace!(target: "ownership", offset = span.offset(), is_break, "loop exit");
        if let Some(frame) = self.loops.last_mut() {
            if is_break {
                frame.breaks.push(state);
            } else {
                frame.continues.push(state);
            }
        }
        self.flow.reachable = false;
    }
}

/// Comptime view from inside a function: block-level constants shadow module
/// constants, and every other binding is a runtime value.
struct FnEnv<'c, 'a> {
    checker: &'c FnChecker<'a>,
    module: ModuleEnv<'c>,
}

impl<'c, 'a> FnEnv<'c, 'a> {
    fn new(checker: &'c FnChecker<'a>) -> Self {
        FnEnv {
            checker,
            module: ModuleEnv {
                consts: &checker.ctx.tables.consts,
                fns: &checker.ctx.decls,
                pointer_width: checker.ctx.config.target.pointer_width,
            },
        }
    }
}

impl ComptimeEnv for FnEnv<'_, '_> {
    fn constant(&self, name: &str) -> Option<ComptimeValue> {
        match self.checker.lookup(name) {
            Some(id) => self.checker.bindings[id].comptime.clone(),
            None => self.checker.ctx.tables.const_value(name).cloned(),
        }
    }

    fn function(&self, name: &str) -> Option<&FnDecl> {
        self.checker.ctx.decls.get(name).copied()
    }

    fn is_runtime(&self, name: &str) -> bool {
        self.checker
            .lookup(name)
            .is_some_and(|id| self.checker.bindings[id].comptime.is_none())
    }

    fn pointer_width(&self) -> u16 {
        self.checker.ctx.config.target.pointer_width
    }

    fn module_scope(&self) -> Option<&dyn ComptimeEnv> {
        Some(&self.module)
    }
}
