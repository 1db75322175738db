//! Error-union flow: `?`, `else`, `return` and the defers they unwind through.
//!
//! Every exit from the function runs the exit actions of all open scopes,
//! innermost first. On an error exit (`?` that propagates, `return Error.X`)
//! `defer on_error` bodies run as well. The unwind of a `?` is simulated on
//! a copy of the ownership state so the path that continues past it is not
//! affected.

use keel_ast::{DeferStmt, Expr, ExprKind, Span};

use super::function::{ExitAction, FnChecker};
use crate::diagnostics::{Diagnostic, ErrorKind};
use crate::ownership::MoveSite;
use crate::types::{ErrorSet, ErrorTag, Type, display_error_set};

impl<'a> FnChecker<'a> {
    pub(super) fn defer_stmt(&mut self, d: &'a DeferStmt) {
        if d.on_error && self.sig.error_set().is_none() {
            self.push(
                Diagnostic::new(
                    ErrorKind::UnreachableErrorDefer,
                    d.span,
                    format!(
                        "`defer on_error` never runs: '{}' does not return an error union",
                        self.sig.name
                    ),
                )
                .with_help("use a plain `defer`, or declare an error set on the return type"),
            );
            return;
        }
        let names = self.visible_names();
        if let Some(scope) = self.current_scope() {
            scope.exits.push(ExitAction::Defer {
                body: &d.body,
                on_error: d.on_error,
                names,
            });
        }
    }

    /// Leave the function: every open scope's exit actions run, then the
    /// rest of the current path is unreachable.
    pub(super) fn unwind(&mut self, error_path: bool) {
        self.run_exits_down_to(0, error_path);
        self.flow.reachable = false;
    }

    pub(super) fn return_value(&mut self, value: Option<&Expr>, span: Span) {
        if self.defer_depth > 0 {
            self.report(
                ErrorKind::InvalidPropagation,
                span,
                "cannot return from inside a deferred block",
            );
            return;
        }
        let Some(value) = value else {
            self.unwind(false);
            return;
        };

        if let ExprKind::ErrorTag(tag) = &value.kind {
            self.return_error(&tag.node, value.span);
            self.unwind(true);
            return;
        }

        if self.escapes(value) {
            self.release_temps();
            self.unwind(false);
            return;
        }

        let ty = match &value.kind {
            ExprKind::Ident(_) | ExprKind::Field { .. } if !self.is_borrow_expr(value) => {
                let ty = self.place_type(value);
                self.consume(value, MoveSite::Return);
                ty
            }
            _ => self.expr(value),
        };
        if let Some(Type::ErrorUnion { errors, .. }) = &ty {
            self.require_subset(errors, value.span, "returned value");
        }
        self.release_temps();
        self.unwind(false);
    }

    fn return_error(&mut self, tag: &str, span: Span) {
        let Some(declared) = self.sig.error_set() else {
            self.push(
                Diagnostic::new(
                    ErrorKind::InvalidPropagation,
                    span,
                    format!("'{}' does not return an error union", self.sig.name),
                )
                .with_related(self.sig.span, "return type declared here"),
            );
            return;
        };
        if !declared.contains(&ErrorTag::new(tag)) {
            let diag = Diagnostic::new(
                ErrorKind::UnhandledErrorVariant,
                span,
                format!(
                    "Error.{tag} is not in the error set {} of '{}'",
                    display_error_set(declared),
                    self.sig.name
                ),
            )
            .with_help(format!("add {tag} to the declared error set"));
            self.push(diag);
        }
    }

    /// A returned borrow of storage owned by this function, directly or
    /// nested in the returned aggregate.
    fn escapes(&mut self, value: &Expr) -> bool {
        let borrows = self.carried_borrows(value);
        for &(source, at) in &borrows {
            let diag = Diagnostic::new(
                ErrorKind::EscapingBorrow,
                at,
                format!(
                    "returns a borrow of '{}', which does not outlive this function",
                    self.bindings[source].name
                ),
            )
            .with_related(self.bindings[source].span, "declared here");
            self.push(diag);
        }
        !borrows.is_empty()
    }

    /// Declared type of a place, without checking its use.
    pub(super) fn place_type(&self, place: &Expr) -> Option<Type> {
        match &place.kind {
            ExprKind::Ident(name) => match self.lookup(name) {
                Some(id) => self.bindings[id].ty.clone(),
                None => self.ctx.tables.consts.get(name).and_then(|c| c.ty.clone()),
            },
            ExprKind::Field { base, field } => {
                let base = self.place_type(base)?;
                self.ctx.tables.types.field_type(&base, &field.node)
            }
            _ => None,
        }
    }

    fn require_subset(&mut self, errors: &ErrorSet, span: Span, what: &str) {
        let Some(declared) = self.sig.error_set() else {
            return;
        };
        let missing: ErrorSet = errors.difference(declared).cloned().collect();
        if missing.is_empty() {
            return;
        }
        let names: Vec<&str> = missing.iter().map(|t| t.0.as_str()).collect();
        self.push(
            Diagnostic::new(
                ErrorKind::UnhandledErrorVariant,
                span,
                format!(
                    "{what} can fail with {}, which is not in the error set {} of '{}'",
                    display_error_set(&missing),
                    display_error_set(declared),
                    self.sig.name
                ),
            )
            .with_help(format!(
                "add {} to the declared error set, or handle the error with `else`",
                names.join(", ")
            )),
        );
    }

    pub(super) fn try_expr(&mut self, inner: &Expr, span: Span) -> Option<Type> {
        let ty = self.expr(inner);
        if self.defer_depth > 0 {
            self.report(
                ErrorKind::InvalidPropagation,
                span,
                "`?` cannot propagate out of a deferred block",
            );
            return ty.map(|t| t.success().clone());
        }
        if self.sig.error_set().is_none() {
            self.push(
                Diagnostic::new(
                    ErrorKind::InvalidPropagation,
                    span,
                    format!("`?` used in '{}', which does not return an error union", self.sig.name),
                )
                .with_help("handle the error with `else`, or declare an error set on the return type"),
            );
            return ty.map(|t| t.success().clone());
        }
        let Type::ErrorUnion { success, errors } = ty? else {
            self.report(
                ErrorKind::InvalidPropagation,
                span,
                "`?` applied to a value that cannot fail",
            );
            return None;
        };
        self.require_subset(&errors, inner.span, "this call");

        let saved = self.flow.clone();
        self.unwind(true);
        self.flow = saved;
        Some(*success)
    }

    /// `expr else fallback`: the fallback runs only when `expr` fails.
    pub(super) fn catch_expr(&mut self, expr: &Expr, fallback: &Expr) -> Option<Type> {
        let ty = self.expr(expr);
        let before = self.flow.clone();
        let fallback_ty = self.expr(fallback);
        self.flow = self.flow.join(&before);
        match ty {
            Some(t) => Some(t.success().clone()),
            None => fallback_ty,
        }
    }

    pub(super) fn expr_stmt(&mut self, e: &Expr) {
        let ty = self.expr(e);
        if let Some(Type::ErrorUnion { errors, .. }) = ty {
            self.push(
                Diagnostic::new(
                    ErrorKind::DiscardedErrorUnion,
                    e.span,
                    format!("result that can fail with {} is discarded", display_error_set(&errors)),
                )
                .with_help("propagate it with `?` or handle it with `else`"),
            );
        }
    }
}
