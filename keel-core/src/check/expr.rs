use keel_ast::{BinOp, Expr, ExprKind, Ident, Qualifier, Span, UnaryOp};

use super::function::{ExitAction, FnChecker};
use crate::comptime::ComptimeValue;
use crate::diagnostics::{Diagnostic, ErrorKind};
use crate::ownership::{BindingId, BindingKind, Event, MoveSite, NullPath, OwnershipState};
use crate::types::{IntType, Type};

impl<'a> FnChecker<'a> {
    /// Check an expression that is evaluated on its own, releasing any
    /// borrows it took once it is done.
    pub(super) fn full_expr(&mut self, e: &Expr) -> Option<Type> {
        let ty = self.expr(e);
        self.release_temps();
        ty
    }

    pub(super) fn release_temps(&mut self) {
        for (source, span) in std::mem::take(&mut self.temps).into_iter().rev() {
            self.release_borrow(source, span);
        }
    }

    pub(super) fn expr(&mut self, e: &Expr) -> Option<Type> {
        match &e.kind {
            ExprKind::Ident(name) => self.read_name(name, e.span),
            ExprKind::Int(_) | ExprKind::Null => None,
            ExprKind::Bool(_) => Some(Type::Bool),
            ExprKind::Unary { op, expr } => {
                let ty = self.expr(expr);
                match op {
                    UnaryOp::Not => Some(Type::Bool),
                    UnaryOp::Neg | UnaryOp::BitNot => ty,
                }
            }
            ExprKind::Binary { left, op, right } => self.binary(left, *op, right),
            ExprKind::Call { callee, args } => self.call(callee, args, e.span),
            ExprKind::Ref(_) | ExprKind::Slice { .. } => {
                let (source, ty) = self.take_borrow(e);
                if let Some(source) = source {
                    self.temps.push((source, e.span));
                }
                ty
            }
            ExprKind::Deref(inner) => self.deref(inner, e.span),
            ExprKind::Field { base, field } => self.field(base, field, e.span),
            ExprKind::Index { base, index } => {
                let base_ty = self.expr(base);
                self.expr(index);
                match base_ty? {
                    Type::Array { elem, .. } | Type::Slice(elem) => Some(*elem),
                    _ => None,
                }
            }
            ExprKind::ArrayLit(items) => {
                let mut elem = None;
                for item in items {
                    let ty = self.expr(item);
                    elem = elem.or(ty);
                }
                elem.map(|elem| Type::Array {
                    elem: Box::new(elem),
                    len: items.len() as u64,
                })
            }
            ExprKind::ArrayRepeat { value, count } => {
                let elem = self.expr(value);
                let len = self.comptime_expr(count, None).and_then(|v| v.as_u64());
                match (elem, len) {
                    (Some(elem), Some(len)) => Some(Type::Array {
                        elem: Box::new(elem),
                        len,
                    }),
                    _ => None,
                }
            }
            ExprKind::StructLit { name, fields } => {
                for (_, value) in fields {
                    self.expr(value);
                }
                let ty = self.ctx.tables.types.struct_type(&name.node);
                if ty.is_none() {
                    self.report(ErrorKind::UnknownName, name.span, format!("unknown struct '{}'", name.node));
                }
                ty
            }
            ExprKind::Try(inner) => self.try_expr(inner, e.span),
            ExprKind::Catch { expr, fallback } => self.catch_expr(expr, fallback),
            ExprKind::ErrorTag(tag) => Some(Type::ErrorUnion {
                success: Box::new(Type::Void),
                errors: [crate::types::ErrorTag::new(tag.node.clone())].into(),
            }),
            ExprKind::Comptime(block) => {
                let value = self.comptime_block(block, e.span, None)?;
                value_type(&value)
            }
            ExprKind::Cast { expr, ty } => {
                self.expr(expr);
                self.lower(ty)
            }
            ExprKind::Allocate(ty) => Some(Type::Pointer {
                target: Box::new(self.lower(ty)?),
                nullable: false,
            }),
        }
    }

    fn read_name(&mut self, name: &str, span: Span) -> Option<Type> {
        if let Some(id) = self.lookup(name) {
            self.check_use(id, span, true);
            return self.bindings[id].ty.clone();
        }
        if let Some(entry) = self.ctx.tables.consts.get(name) {
            return entry.ty.clone();
        }
        self.report(ErrorKind::UnknownName, span, format!("cannot find '{name}' in this scope"));
        None
    }

    fn binary(&mut self, left: &Expr, op: BinOp, right: &Expr) -> Option<Type> {
        let left_ty = self.expr(left);
        let right_ty = match op {
            BinOp::And | BinOp::Or => {
                let (when_true, when_false) = self.narrowing(left);
                let facts = if op == BinOp::And { when_true } else { when_false };
                let added: Vec<NullPath> = facts.into_iter().filter(|p| !self.flow.is_narrowed(p)).collect();
                for path in &added {
                    self.flow.narrow(path.clone());
                }
                let ty = self.expr(right);
                for path in &added {
                    self.flow.unnarrow(path);
                }
                ty
            }
            _ => self.expr(right),
        };
        if op.is_comparison() || matches!(op, BinOp::And | BinOp::Or) {
            Some(Type::Bool)
        } else {
            left_ty.or(right_ty)
        }
    }

    fn deref(&mut self, inner: &Expr, span: Span) -> Option<Type> {
        let ty = self.expr(inner)?;
        if ty.is_nullable_pointer() {
            self.require_non_null(inner, span);
        }
        ty.pointee().cloned()
    }

    fn require_non_null(&mut self, pointer: &Expr, span: Span) {
        let narrowed = self.null_path(pointer).is_some_and(|p| self.flow.is_narrowed(&p));
        if narrowed {
            return;
        }
        let what = pointer.place_root().unwrap_or("pointer");
        self.push(
            Diagnostic::new(
                ErrorKind::UncheckedNullDeref,
                span,
                format!("'{what}' may be null here"),
            )
            .with_help(format!("check it first with `if {what} |p| {{ ... }}` or `{what} != null`")),
        );
    }

    fn field(&mut self, base: &Expr, field: &Ident, span: Span) -> Option<Type> {
        let ExprKind::Ident(name) = &base.kind else {
            let base_ty = self.expr(base)?;
            if base_ty.is_nullable_pointer() {
                self.require_non_null(base, span);
            }
            return self.ctx.tables.types.field_type(&base_ty, &field.node);
        };
        let Some(id) = self.lookup(name) else {
            let base_ty = self.read_name(name, base.span)?;
            return self.ctx.tables.types.field_type(&base_ty, &field.node);
        };
        let owner = self.resolve_alias(id);
        let initialized_field = self.flow.state(owner) == OwnershipState::Uninitialized
            && self.flow.is_field_init(owner, &field.node);
        if !initialized_field && self.check_use(id, base.span, false) {
            if let Some((state, event)) = self.flow.field(owner, &field.node) {
                let path = format!("{name}.{}", field.node);
                self.report_dead(&path, state, event, span);
            }
        }

        let base_ty = self.bindings[id].ty.clone()?;
        if base_ty.is_nullable_pointer() {
            self.require_non_null(base, span);
        }
        self.ctx.tables.types.field_type(&base_ty, &field.node)
    }

    // ---- uses ----

    /// Report a read of `id` that its state forbids. `whole` also rejects a
    /// struct binding that had a field moved out. Returns whether the read
    /// was allowed.
    pub(super) fn check_use(&mut self, id: BindingId, span: Span, whole: bool) -> bool {
        let owner = self.resolve_alias(id);
        let name = self.bindings[id].name.clone();
        if whole {
            if let Some((field, state, event)) = self.flow.dead_field(owner) {
                let path = format!("{name}.{field}");
                self.report_dead(&path, state, event, span);
                return false;
            }
        }
        match self.flow.state(owner) {
            OwnershipState::Owned | OwnershipState::Borrowed(_) | OwnershipState::Gone => true,
            OwnershipState::Moved if self.flow.event(owner).is_some_and(|e| e.site == MoveSite::Return) => true,
            state @ (OwnershipState::Moved | OwnershipState::Freed) => {
                let event = self.flow.event(owner);
                self.report_dead(&name, state, event, span);
                false
            }
            OwnershipState::Uninitialized => {
                self.report_uninitialized(&name, span);
                false
            }
        }
    }

    fn report_uninitialized(&mut self, name: &str, span: Span) {
        if self.defer_depth > 0 {
            self.push(
                Diagnostic::new(
                    ErrorKind::DeferOrderingHazard,
                    span,
                    format!("deferred code uses '{name}' on a path where it is not yet initialized"),
                )
                .with_help(format!("register the defer after '{name}' is assigned")),
            );
        } else {
            self.report(
                ErrorKind::UseOfUninitialized,
                span,
                format!("'{name}' is used before it is initialized"),
            );
        }
    }

    fn report_dead(&mut self, what: &str, state: OwnershipState, event: Option<Event>, span: Span) {
        let (kind, message) = match state {
            OwnershipState::Freed => (ErrorKind::UseAfterFree, format!("use of '{what}' after it was freed")),
            OwnershipState::Moved => (ErrorKind::UseAfterMove, format!("use of '{what}' after it was moved")),
            _ => return,
        };
        let mut diag = Diagnostic::new(kind, span, message);
        if let Some(event) = event {
            diag = diag.with_related(event.span, event_label(event.site));
        }
        self.push(diag);
    }

    /// A moved or freed binding stays dead: writing a new value into it is
    /// rejected like any other use.
    fn report_dead_write(&mut self, name: &str, state: OwnershipState, event: Option<Event>, span: Span) {
        let (kind, message) = match state {
            OwnershipState::Freed => (ErrorKind::UseAfterFree, format!("assignment to '{name}' after it was freed")),
            _ => (ErrorKind::UseAfterMove, format!("assignment to '{name}' after it was moved")),
        };
        let mut diag = Diagnostic::new(kind, span, message)
            .with_help(format!("declare a new binding instead of reusing '{name}'"));
        if let Some(event) = event {
            diag = diag.with_related(event.span, event_label(event.site));
        }
        self.push(diag);
    }

    // ---- moves and frees ----

    /// Transfer ownership of the place `place` out of this function.
    pub(super) fn consume(&mut self, place: &Expr, site: MoveSite) {
        match &place.kind {
            ExprKind::Ident(name) => match self.lookup(name) {
                Some(id) => self.consume_binding(id, place.span, site),
                None => {
                    self.read_name(name, place.span);
                }
            },
            ExprKind::Field { base, field } => {
                let id = match &base.kind {
                    ExprKind::Ident(name) => self.lookup(name),
                    _ => None,
                };
                let Some(id) = id else {
                    self.expr(place);
                    return;
                };
                let owner = self.resolve_alias(id);
                let path = format!("{}.{}", self.bindings[id].name, field.node);
                if !self.check_use(id, base.span, false) {
                    return;
                }
                if self.bindings[id].is_borrow() {
                    self.report_move_out_of_borrow(&path, place.span);
                    return;
                }
                if let Some((state, event)) = self.flow.field(owner, &field.node) {
                    if state.is_dead() {
                        self.report_second_consume(&path, state, event, site, place.span);
                        return;
                    }
                }
                if self.flow.state(owner).borrow_count() > 0 {
                    self.report_move_while_borrowed(&path, place.span, site);
                    return;
                }
                let event = Event {
                    span: place.span,
                    site,
                };
                self.flow.set_field(owner, &field.node, consumed_state(site), Some(event));
            }
            _ => {
                self.expr(place);
            }
        }
    }

    fn consume_binding(&mut self, id: BindingId, span: Span, site: MoveSite) {
        let name = self.bindings[id].name.clone();
        if self.bindings[id].is_borrow() {
            self.report_move_out_of_borrow(&name, span);
            return;
        }
        let owner = self.resolve_alias(id);
        if let Some((field, state, event)) = self.flow.dead_field(owner) {
            let path = format!("{name}.{field}");
            self.report_dead(&path, state, event, span);
            return;
        }
        match self.flow.state(owner) {
            state @ (OwnershipState::Moved | OwnershipState::Freed) => {
                let event = self.flow.event(owner);
                self.report_second_consume(&name, state, event, site, span);
            }
            OwnershipState::Uninitialized => self.report_uninitialized(&name, span),
            OwnershipState::Borrowed(_) => self.report_move_while_borrowed(&name, span, site),
            OwnershipState::Owned | OwnershipState::Gone => {
                let event = Event { span, site };
                self.set_state(owner, consumed_state(site), span, Some(event));
            }
        }
    }

    fn report_second_consume(
        &mut self,
        what: &str,
        state: OwnershipState,
        event: Option<Event>,
        site: MoveSite,
        span: Span,
    ) {
        let (kind, message) = match (site, state) {
            (MoveSite::Free, OwnershipState::Freed) => (ErrorKind::UseAfterFree, format!("'{what}' is freed twice")),
            (MoveSite::Free, _) => (
                ErrorKind::UseAfterFree,
                format!("'{what}' is freed after its ownership was transferred"),
            ),
            (_, OwnershipState::Freed) => (ErrorKind::UseAfterFree, format!("use of '{what}' after it was freed")),
            _ => (ErrorKind::UseAfterMove, format!("'{what}' was already moved")),
        };
        let mut diag = Diagnostic::new(kind, span, message);
        if let Some(event) = event {
            diag = diag.with_related(event.span, event_label(event.site));
        }
        self.push(diag);
    }

    fn report_move_out_of_borrow(&mut self, what: &str, span: Span) {
        self.push(
            Diagnostic::new(
                ErrorKind::MoveWhileBorrowed,
                span,
                format!("cannot transfer ownership out of '{what}', which is only borrowed"),
            )
            .with_help("only owning bindings can be passed to `own` parameters, returned or freed"),
        );
    }

    fn report_move_while_borrowed(&mut self, what: &str, span: Span, site: MoveSite) {
        let action = match site {
            MoveSite::Free => "free",
            MoveSite::Argument | MoveSite::Return => "move",
        };
        self.report(
            ErrorKind::MoveWhileBorrowed,
            span,
            format!("cannot {action} '{what}' while it is borrowed"),
        );
    }

    // ---- borrows ----

    /// Whether binding `value` creates or forwards a borrow.
    pub(super) fn is_borrow_expr(&self, value: &Expr) -> bool {
        match &value.kind {
            ExprKind::Ref(_) | ExprKind::Slice { .. } => true,
            ExprKind::Ident(name) => self.lookup(name).is_some_and(|id| self.bindings[id].is_borrow()),
            _ => false,
        }
    }

    /// Evaluate a borrowing expression and take one borrow of the binding it
    /// aliases. Returns that binding when a count was taken.
    pub(super) fn take_borrow(&mut self, value: &Expr) -> (Option<BindingId>, Option<Type>) {
        match &value.kind {
            ExprKind::Ref(place) => {
                let ty = self.expr(place);
                let source = self.borrow_source(place);
                let taken = self.add_borrow(source, value.span);
                let ty = ty.map(|t| Type::Pointer {
                    target: Box::new(t),
                    nullable: false,
                });
                (taken, ty)
            }
            ExprKind::Slice { base, start, end } => {
                let base_ty = self.expr(base);
                self.expr(start);
                self.expr(end);
                let (source, elem) = match base_ty {
                    Some(Type::Array { elem, .. }) => (self.borrow_source(base), Some(*elem)),
                    Some(Type::Slice(elem)) => (self.forwarded_source(base), Some(*elem)),
                    _ => (self.forwarded_source(base), None),
                };
                let taken = self.add_borrow(source, value.span);
                (taken, elem.map(|e| Type::Slice(Box::new(e))))
            }
            ExprKind::Ident(name) => {
                let ty = self.read_name(name, value.span);
                let source = self.forwarded_source(value);
                (self.add_borrow(source, value.span), ty)
            }
            _ => (None, self.expr(value)),
        }
    }

    /// The binding whose storage a place lives in, seen through borrows.
    pub(super) fn borrow_source(&self, place: &Expr) -> Option<BindingId> {
        let id = self.place_binding(place)?;
        match self.bindings[id].kind {
            BindingKind::Borrow { source } => source,
            BindingKind::Param(Qualifier::Ref) => None,
            _ => Some(self.resolve_alias(id)),
        }
    }

    /// The source of a borrow that `place` already holds, if any.
    fn forwarded_source(&self, place: &Expr) -> Option<BindingId> {
        let id = self.place_binding(place)?;
        match self.bindings[id].kind {
            BindingKind::Borrow { source } => source,
            _ => None,
        }
    }

    /// Binding at the root of a place expression (`x`, `x.f`, `x[i]`).
    pub(super) fn place_binding(&self, place: &Expr) -> Option<BindingId> {
        match &place.kind {
            ExprKind::Ident(name) => self.lookup(name),
            ExprKind::Field { base, .. } | ExprKind::Index { base, .. } => self.place_binding(base),
            _ => None,
        }
    }

    /// The binding a borrowing expression aliases, without taking a count.
    fn carried_source(&self, value: &Expr) -> Option<BindingId> {
        match &value.kind {
            ExprKind::Ref(place) => self.borrow_source(place),
            ExprKind::Slice { base, .. } => match self.place_type(base) {
                Some(Type::Array { .. }) => self.borrow_source(base),
                _ => self.forwarded_source(base),
            },
            ExprKind::Ident(_) => self.forwarded_source(value),
            _ => None,
        }
    }

    /// Every borrow `value` carries: itself, or the borrows nested in its
    /// struct fields, array items and cast operand. Pairs the aliased
    /// binding with the span of the borrowing expression.
    pub(super) fn carried_borrows(&self, value: &Expr) -> Vec<(BindingId, Span)> {
        let mut out = Vec::new();
        self.collect_borrows(value, &mut out);
        out
    }

    fn collect_borrows(&self, value: &Expr, out: &mut Vec<(BindingId, Span)>) {
        if let Some(source) = self.carried_source(value) {
            out.push((source, value.span));
            return;
        }
        match &value.kind {
            ExprKind::StructLit { fields, .. } => {
                for (_, e) in fields {
                    self.collect_borrows(e, out);
                }
            }
            ExprKind::ArrayLit(items) => {
                for item in items {
                    self.collect_borrows(item, out);
                }
            }
            ExprKind::ArrayRepeat { value: item, .. } => self.collect_borrows(item, out),
            ExprKind::Cast { expr, .. } => self.collect_borrows(expr, out),
            _ => {}
        }
    }

    fn add_borrow(&mut self, source: Option<BindingId>, span: Span) -> Option<BindingId> {
        let source = source?;
        let state = self.flow.state(source);
        if !state.is_live() {
            return None;
        }
        self.set_state(source, state.borrowed(), span, None);
        Some(source)
    }

    // ---- assignment ----

    pub(super) fn assign(&mut self, target: &Expr, value: &Expr, span: Span) {
        let holder = self.place_binding(target);
        if self.is_borrow_expr(value) {
            let (source, _) = self.take_borrow(value);
            self.store_borrow(holder, source, value.span);
        } else {
            self.expr(value);
            self.store_nested_borrows(holder, value);
        }
        self.write_place(target, span);
    }

    /// Borrows nested in an aggregate stored into `holder` are held by it
    /// rather than released at the end of the statement.
    pub(super) fn store_nested_borrows(&mut self, holder: Option<BindingId>, value: &Expr) {
        for (source, at) in self.carried_borrows(value) {
            let counted = match self.temps.iter().position(|t| *t == (source, at)) {
                Some(pos) => {
                    self.temps.remove(pos);
                    Some(source)
                }
                None => self.add_borrow(Some(source), at),
            };
            self.store_borrow(holder, counted, at);
        }
    }

    /// A borrow of `source` is stored into `holder`: it may not outlive its
    /// source, and it is held until the holder's scope exits.
    fn store_borrow(&mut self, holder: Option<BindingId>, source: Option<BindingId>, at: Span) {
        let Some(source) = source else {
            return;
        };
        let Some(holder) = holder else {
            self.temps.push((source, at));
            return;
        };
        let (holder_depth, source_depth) = (self.bindings[holder].depth, self.bindings[source].depth);
        if holder_depth < source_depth {
            let diag = Diagnostic::new(
                ErrorKind::EscapingBorrow,
                at,
                format!(
                    "borrow of '{}' is stored in '{}', which outlives it",
                    self.bindings[source].name, self.bindings[holder].name
                ),
            )
            .with_related(self.bindings[source].span, "borrowed value declared here");
            self.push(diag);
            self.release_borrow(source, at);
            return;
        }
        if let BindingKind::Borrow { source: held } = &mut self.bindings[holder].kind {
            *held = Some(source);
        }
        match self.scopes.get_mut(holder_depth) {
            Some(scope) => scope.exits.push(ExitAction::Release { source, span: at }),
            None => self.temps.push((source, at)),
        }
    }

    fn write_place(&mut self, target: &Expr, span: Span) {
        if let Some(path) = self.null_path(target) {
            self.flow.forget_narrowing(path.root, &path.fields);
        }
        match &target.kind {
            ExprKind::Ident(name) => {
                let Some(id) = self.lookup(name) else {
                    self.read_name(name, target.span);
                    return;
                };
                let owner = self.resolve_alias(id);
                let state = self.flow.state(owner);
                if state.borrow_count() > 0 {
                    self.report(
                        ErrorKind::MoveWhileBorrowed,
                        target.span,
                        format!("cannot assign to '{name}' while it is borrowed"),
                    );
                    return;
                }
                if state.is_dead() {
                    let event = self.flow.event(owner);
                    self.report_dead_write(name, state, event, target.span);
                }
                // Reported once; later uses see the new value.
                self.flow.reinitialize(owner);
                self.set_state(owner, OwnershipState::Owned, span, None);
            }
            ExprKind::Field { base, field } if matches!(base.kind, ExprKind::Ident(_)) => {
                let Some(id) = self.place_binding(base) else {
                    self.expr(target);
                    return;
                };
                let owner = self.resolve_alias(id);
                let ty = self.bindings[id].ty.clone();
                match (self.flow.state(owner), &ty) {
                    (OwnershipState::Uninitialized, Some(Type::Struct { id: sid, .. })) => {
                        let total = self.ctx.tables.types.struct_layout(*sid).fields.len();
                        if self.flow.init_field(owner, &field.node) >= total {
                            self.set_state(owner, OwnershipState::Owned, span, None);
                        }
                    }
                    _ => {
                        if !self.check_use(id, base.span, false) {
                            return;
                        }
                        if ty.as_ref().is_some_and(Type::is_nullable_pointer) {
                            self.require_non_null(base, target.span);
                        }
                        self.flow.clear_field(owner, &field.node);
                    }
                }
            }
            _ => {
                self.expr(target);
            }
        }
    }

    // ---- calls ----

    fn call(&mut self, callee: &Ident, args: &[Expr], span: Span) -> Option<Type> {
        let ctx = self.ctx;
        if callee.node == "free" && ctx.tables.signature("free").is_none() {
            for arg in args {
                self.consume(arg, MoveSite::Free);
            }
            return Some(Type::Void);
        }
        let Some(sig) = ctx.tables.signature(&callee.node) else {
            self.report(
                ErrorKind::UnknownName,
                callee.span,
                format!("cannot find function '{}'", callee.node),
            );
            for arg in args {
                self.expr(arg);
            }
            return None;
        };

        let mut held = Vec::new();
        for (i, arg) in args.iter().enumerate() {
            let qual = sig.params.get(i).map_or(Qualifier::None, |p| p.qual);
            match qual {
                Qualifier::Own if is_place(arg) => {
                    let site = if sig.release { MoveSite::Free } else { MoveSite::Argument };
                    self.consume(arg, site);
                }
                Qualifier::Ref if is_place(arg) && !self.is_borrow_expr(arg) => {
                    self.expr(arg);
                    let source = self.borrow_source(arg);
                    held.extend(self.add_borrow(source, arg.span));
                }
                _ if self.is_borrow_expr(arg) => {
                    let (source, _) = self.take_borrow(arg);
                    held.extend(source);
                }
                _ => {
                    self.expr(arg);
                }
            }
        }
        for source in held.into_iter().rev() {
            self.release_borrow(source, span);
        }
        Some(sig.ret.clone())
    }
}

fn is_place(e: &Expr) -> bool {
    e.place_root().is_some()
}

fn consumed_state(site: MoveSite) -> OwnershipState {
    match site {
        MoveSite::Free => OwnershipState::Freed,
        MoveSite::Argument | MoveSite::Return => OwnershipState::Moved,
    }
}

fn event_label(site: MoveSite) -> &'static str {
    match site {
        MoveSite::Argument => "moved here",
        MoveSite::Return => "returned here",
        MoveSite::Free => "freed here",
    }
}

/// Runtime type of a value computed at comptime.
pub(super) fn value_type(value: &ComptimeValue) -> Option<Type> {
    match value {
        ComptimeValue::Int { ty, .. } => ty.map(Type::Int),
        ComptimeValue::Bool(_) => Some(Type::Bool),
        ComptimeValue::Void => Some(Type::Void),
        ComptimeValue::Array(items) => {
            let elem = items.first().and_then(value_type).unwrap_or(Type::Int(IntType::I64));
            Some(Type::Array {
                elem: Box::new(elem),
                len: items.len() as u64,
            })
        }
        ComptimeValue::Struct { .. } => None,
    }
}
