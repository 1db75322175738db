//! The restricted interpreter behind comptime evaluation.
//!
//! Integer semantics are those of the runtime: `+ - *`, negation, division
//! and shifts trap on overflow, the `%`-suffixed operators wrap. Anything not
//! on the whitelist (pointers, allocation, extern calls, runtime bindings,
//! error unions, defers) is rejected as non-deterministic.

use std::collections::HashMap;

use keel_ast::{
    BinOp, Block, Expr, ExprKind, FnDecl, Qualifier, Span, Stmt, TypeExpr, TypeExprKind, UnaryOp,
};
use thiserror::Error;

use super::value::ComptimeValue;
use crate::config::ComptimeConfig;
use crate::diagnostics::{Diagnostic, ErrorKind};
use crate::types::IntType;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ComptimeError {
    pub kind: ErrorKind,
    pub span: Span,
    pub message: String,
}

impl ComptimeError {
    pub fn new(kind: ErrorKind, span: Span, message: impl Into<String>) -> Self {
        ComptimeError {
            kind,
            span,
            message: message.into(),
        }
    }

    fn trap(span: Span, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ComptimeTrap, span, message)
    }

    fn nondet(span: Span, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NonDeterministicComptime, span, message)
    }

    fn unresolved(span: Span, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnresolvedConstant, span, message)
    }
}

impl From<ComptimeError> for Diagnostic {
    fn from(err: ComptimeError) -> Self {
        Diagnostic::new(err.kind, err.span, err.message)
    }
}

/// What comptime code can see outside itself.
pub trait ComptimeEnv {
    /// Value of a module or enclosing block constant.
    fn constant(&self, name: &str) -> Option<ComptimeValue>;

    fn function(&self, name: &str) -> Option<&FnDecl>;

    /// Whether `name` is a runtime binding of the enclosing function.
    fn is_runtime(&self, name: &str) -> bool {
        let _ = name;
        false
    }

    fn pointer_width(&self) -> u16 {
        64
    }

    /// Environment a called function body runs in. Bodies see module names
    /// only; `None` means this environment already is that view.
    fn module_scope(&self) -> Option<&dyn ComptimeEnv> {
        None
    }
}

struct Local {
    value: Option<ComptimeValue>,
    mutable: bool,
    hint: Option<IntType>,
}

enum Flow {
    Normal(ComptimeValue),
    Break,
    Continue,
    Return(ComptimeValue),
}

enum PathSeg {
    Index(u64, Span),
    Field(String, Span),
}

pub struct Evaluator<'a> {
    env: &'a dyn ComptimeEnv,
    limits: &'a ComptimeConfig,
    steps: u64,
    depth: u32,
    scopes: Vec<HashMap<String, Local>>,
}

type EvalResult<T> = Result<T, ComptimeError>;

impl<'a> Evaluator<'a> {
    pub fn new(env: &'a dyn ComptimeEnv, limits: &'a ComptimeConfig) -> Self {
        Evaluator {
            env,
            limits,
            steps: 0,
            depth: 0,
            scopes: vec![HashMap::new()],
        }
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Evaluate a block used as a value (`comptime { ... }`).
    pub fn eval_block_value(&mut self, block: &Block, hint: Option<IntType>) -> EvalResult<ComptimeValue> {
        match self.block(block, hint)? {
            Flow::Normal(v) | Flow::Return(v) => coerce(v, hint, block.span),
            Flow::Break | Flow::Continue => Err(ComptimeError::trap(
                block.span,
                "`break`/`continue` outside of a loop",
            )),
        }
    }

    fn step(&mut self, span: Span, cost: u64) -> EvalResult<()> {
        self.steps = self.steps.saturating_add(cost);
        if self.steps > self.limits.max_steps {
            return Err(ComptimeError::new(
                ErrorKind::ComptimeBudgetExceeded,
                span,
                format!(
                    "comptime evaluation exceeded its budget of {} steps",
                    self.limits.max_steps
                ),
            ));
        }
        Ok(())
    }

    fn int_hint(&self, ty: &TypeExpr) -> Option<IntType> {
        match &ty.kind {
            TypeExprKind::Named(n) => IntType::from_name(n, self.env.pointer_width()),
            TypeExprKind::Array { elem, .. } => self.int_hint(elem),
            _ => None,
        }
    }

    // ---- scopes ----

    fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> EvalResult<T>) -> EvalResult<T> {
        self.scopes.push(HashMap::new());
        let result = f(self);
        self.scopes.pop();
        result
    }

    fn define(&mut self, name: &str, local: Local) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), local);
        }
    }

    fn lookup_local(&self, name: &str) -> Option<&Local> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    fn lookup_local_mut(&mut self, name: &str) -> Option<&mut Local> {
        self.scopes.iter_mut().rev().find_map(|s| s.get_mut(name))
    }

    // ---- statements ----

    fn block(&mut self, block: &Block, hint: Option<IntType>) -> EvalResult<Flow> {
        self.scoped(|ev| {
            for stmt in &block.stmts {
                match ev.stmt(stmt)? {
                    Flow::Normal(_) => {}
                    other => return Ok(other),
                }
            }
            let value = match &block.tail {
                Some(tail) => ev.eval_expr(tail, hint)?,
                None => ComptimeValue::Void,
            };
            Ok(Flow::Normal(value))
        })
    }

    fn stmt(&mut self, stmt: &Stmt) -> EvalResult<Flow> {
        match stmt {
            Stmt::Let(l) => {
                let hint = l.ty.as_ref().and_then(|t| self.int_hint(t));
                let value = match &l.value {
                    Some(e) => Some(self.eval_expr(e, hint)?),
                    None => None,
                };
                self.define(
                    &l.name.node,
                    Local {
                        value,
                        mutable: l.mutable,
                        hint,
                    },
                );
            }
            Stmt::Const(c) => {
                let hint = c.ty.as_ref().and_then(|t| self.int_hint(t));
                let value = self.eval_expr(&c.value, hint)?;
                self.define(
                    &c.name.node,
                    Local {
                        value: Some(value),
                        mutable: false,
                        hint,
                    },
                );
            }
            Stmt::Assign(a) => self.assign(&a.target, &a.value, a.span)?,
            Stmt::Expr(e) => {
                self.eval_expr(e, None)?;
            }
            Stmt::Return(r) => {
                let value = match &r.value {
                    Some(e) => self.eval_expr(e, None)?,
                    None => ComptimeValue::Void,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::If(i) => {
                if i.capture.is_some() {
                    return Err(ComptimeError::nondet(
                        i.span,
                        "optional pointer captures are runtime operations",
                    ));
                }
                let flow = if self.condition(&i.cond)? {
                    self.block(&i.then_block, None)?
                } else if let Some(else_block) = &i.else_block {
                    self.block(else_block, None)?
                } else {
                    Flow::Normal(ComptimeValue::Void)
                };
                return Ok(match flow {
                    Flow::Normal(_) => Flow::Normal(ComptimeValue::Void),
                    other => other,
                });
            }
            Stmt::While(w) => loop {
                self.step(w.span, 1)?;
                if !self.condition(&w.cond)? {
                    break;
                }
                match self.block(&w.body, None)? {
                    Flow::Break => break,
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal(_) | Flow::Continue => {}
                }
            },
            Stmt::For(f) => {
                let start = self.eval_expr(&f.start, None)?;
                let end = self.eval_expr(&f.end, start.int_type())?;
                let ty = start.int_type().or(end.int_type());
                let (Some(lo), Some(hi)) = (start.as_int(), end.as_int()) else {
                    return Err(ComptimeError::trap(f.span, "`for` bounds must be integers"));
                };
                let mut i = lo;
                while i < hi {
                    self.step(f.span, 1)?;
                    let flow = self.scoped(|ev| {
                        ev.define(
                            &f.var.node,
                            Local {
                                value: Some(ComptimeValue::Int { value: i, ty }),
                                mutable: false,
                                hint: ty,
                            },
                        );
                        ev.block(&f.body, None)
                    })?;
                    match flow {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal(_) | Flow::Continue => {}
                    }
                    i += 1;
                }
            }
            Stmt::Break(_) => return Ok(Flow::Break),
            Stmt::Continue(_) => return Ok(Flow::Continue),
            Stmt::Block(b) | Stmt::Comptime(b) => {
                return Ok(match self.block(b, None)? {
                    Flow::Normal(_) => Flow::Normal(ComptimeValue::Void),
                    other => other,
                });
            }
            Stmt::Defer(d) => {
                return Err(ComptimeError::nondet(d.span, "`defer` is a runtime construct"));
            }
        }
        Ok(Flow::Normal(ComptimeValue::Void))
    }

    fn condition(&mut self, cond: &Expr) -> EvalResult<bool> {
        let value = self.eval_expr(cond, None)?;
        value.as_bool().ok_or_else(|| {
            ComptimeError::trap(
                cond.span,
                format!("condition must be bool, found {}", value.kind_name()),
            )
        })
    }

    fn assign(&mut self, target: &Expr, value: &Expr, span: Span) -> EvalResult<()> {
        let (root, path) = self.place_path(target)?;
        let hint = match self.lookup_local(&root) {
            Some(local) => local.hint,
            None if self.env.constant(&root).is_some() => {
                return Err(ComptimeError::trap(span, format!("cannot assign to constant '{root}'")));
            }
            None if self.env.is_runtime(&root) => {
                return Err(ComptimeError::nondet(
                    span,
                    format!("comptime code cannot write runtime value '{root}'"),
                ));
            }
            None => {
                return Err(ComptimeError::unresolved(span, format!("unknown binding '{root}'")));
            }
        };
        let new_value = self.eval_expr(value, hint)?;
        let Some(local) = self.lookup_local_mut(&root) else {
            return Err(ComptimeError::unresolved(span, format!("unknown binding '{root}'")));
        };
        if !local.mutable {
            return Err(ComptimeError::trap(
                span,
                format!("cannot assign to immutable binding '{root}'"),
            ));
        }
        if path.is_empty() {
            local.value = Some(new_value);
            return Ok(());
        }
        let Some(mut slot) = local.value.as_mut() else {
            return Err(ComptimeError::trap(
                span,
                format!("'{root}' is read before it was assigned"),
            ));
        };
        for seg in &path {
            slot = match (seg, slot) {
                (PathSeg::Index(i, at), ComptimeValue::Array(items)) => {
                    let len = items.len();
                    match usize::try_from(*i).ok().filter(|idx| *idx < len) {
                        Some(idx) => &mut items[idx],
                        None => {
                            return Err(ComptimeError::trap(
                                *at,
                                format!("index {i} out of bounds for array of length {len}"),
                            ));
                        }
                    }
                }
                (PathSeg::Field(name, at), ComptimeValue::Struct { fields, .. }) => fields
                    .iter_mut()
                    .find(|(f, _)| f == name)
                    .map(|(_, v)| v)
                    .ok_or_else(|| ComptimeError::trap(*at, format!("no field '{name}'")))?,
                (PathSeg::Index(_, at), other) => {
                    return Err(ComptimeError::trap(
                        *at,
                        format!("cannot index into {}", other.kind_name()),
                    ));
                }
                (PathSeg::Field(name, at), other) => {
                    return Err(ComptimeError::trap(
                        *at,
                        format!("{} has no field '{name}'", other.kind_name()),
                    ));
                }
            };
        }
        let new_value = coerce(new_value, slot.int_type(), span)?;
        *slot = new_value;
        Ok(())
    }

    fn place_path(&mut self, target: &Expr) -> EvalResult<(String, Vec<PathSeg>)> {
        match &target.kind {
            ExprKind::Ident(n) => Ok((n.clone(), Vec::new())),
            ExprKind::Field { base, field } => {
                let (root, mut path) = self.place_path(base)?;
                path.push(PathSeg::Field(field.node.clone(), field.span));
                Ok((root, path))
            }
            ExprKind::Index { base, index } => {
                let (root, mut path) = self.place_path(base)?;
                let i = self.eval_expr(index, None)?;
                let i = i.as_u64().ok_or_else(|| {
                    ComptimeError::trap(index.span, format!("invalid array index {i}"))
                })?;
                path.push(PathSeg::Index(i, index.span));
                Ok((root, path))
            }
            ExprKind::Deref(_) => Err(ComptimeError::nondet(
                target.span,
                "pointer stores are runtime operations",
            )),
            _ => Err(ComptimeError::trap(target.span, "invalid assignment target")),
        }
    }

    // ---- expressions ----

    pub fn eval_expr(&mut self, expr: &Expr, hint: Option<IntType>) -> EvalResult<ComptimeValue> {
        self.step(expr.span, 1)?;
        let span = expr.span;
        match &expr.kind {
            ExprKind::Int(v) => coerce(ComptimeValue::untyped(*v), hint, span),
            ExprKind::Bool(b) => Ok(ComptimeValue::Bool(*b)),
            ExprKind::Ident(name) => {
                if let Some(local) = self.lookup_local(name) {
                    return match &local.value {
                        Some(v) => coerce(v.clone(), hint, span),
                        None => Err(ComptimeError::trap(
                            span,
                            format!("'{name}' is read before it was assigned"),
                        )),
                    };
                }
                if let Some(v) = self.env.constant(name) {
                    return coerce(v, hint, span);
                }
                if self.env.is_runtime(name) {
                    return Err(ComptimeError::nondet(
                        span,
                        format!("comptime code cannot read runtime value '{name}'"),
                    ));
                }
                Err(ComptimeError::unresolved(span, format!("unknown constant '{name}'")))
            }
            ExprKind::Unary { op, expr: inner } => self.unary(*op, inner, hint, span),
            ExprKind::Binary { left, op, right } => self.binary(left, *op, right, hint, span),
            ExprKind::Call { callee, args } => self.call(callee, args, span),
            ExprKind::Field { base, field } => match self.eval_expr(base, None)? {
                ComptimeValue::Struct { fields, .. } => fields
                    .into_iter()
                    .find(|(f, _)| *f == field.node)
                    .map(|(_, v)| v)
                    .ok_or_else(|| ComptimeError::trap(field.span, format!("no field '{}'", field.node))),
                other => Err(ComptimeError::trap(
                    field.span,
                    format!("{} has no field '{}'", other.kind_name(), field.node),
                )),
            },
            ExprKind::Index { base, index } => {
                let base_value = self.eval_expr(base, None)?;
                let i = self.eval_expr(index, None)?;
                let ComptimeValue::Array(items) = base_value else {
                    return Err(ComptimeError::trap(
                        span,
                        format!("cannot index into {}", base_value.kind_name()),
                    ));
                };
                let len = items.len();
                i.as_u64()
                    .and_then(|i| usize::try_from(i).ok())
                    .and_then(|i| items.into_iter().nth(i))
                    .ok_or_else(|| {
                        ComptimeError::trap(
                            index.span,
                            format!("index {i} out of bounds for array of length {len}"),
                        )
                    })
            }
            ExprKind::ArrayLit(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item, hint)?);
                }
                Ok(ComptimeValue::Array(values))
            }
            ExprKind::ArrayRepeat { value, count } => {
                let n = self.eval_expr(count, None)?;
                let n = n.as_u64().ok_or_else(|| {
                    ComptimeError::trap(count.span, format!("invalid repeat count {n}"))
                })?;
                let v = self.eval_expr(value, hint)?;
                self.step(span, n.saturating_mul(element_count(&v)))?;
                let n = usize::try_from(n)
                    .map_err(|_| ComptimeError::trap(count.span, "repeat count too large"))?;
                Ok(ComptimeValue::Array(vec![v; n]))
            }
            ExprKind::StructLit { name, fields } => {
                let mut values = Vec::with_capacity(fields.len());
                for (f, e) in fields {
                    values.push((f.node.clone(), self.eval_expr(e, None)?));
                }
                Ok(ComptimeValue::Struct {
                    name: name.node.clone(),
                    fields: values,
                })
            }
            ExprKind::Comptime(block) => self.eval_block_value(block, hint),
            ExprKind::Cast { expr: inner, ty } => {
                let Some(target) = self.int_hint(ty) else {
                    return Err(ComptimeError::trap(ty.span, "comptime casts must target an integer type"));
                };
                let value = self.eval_expr(inner, None)?;
                let v = value.as_int().ok_or_else(|| {
                    ComptimeError::trap(span, format!("cannot cast {} to {target}", value.kind_name()))
                })?;
                if !target.contains(v) {
                    return Err(ComptimeError::trap(span, format!("cast of {v} to {target} overflows")));
                }
                Ok(ComptimeValue::int(v, target))
            }
            ExprKind::Null | ExprKind::Ref(_) | ExprKind::Deref(_) | ExprKind::Allocate(_) => Err(
                ComptimeError::nondet(span, "pointer operations are not allowed at comptime"),
            ),
            ExprKind::Slice { .. } => Err(ComptimeError::nondet(
                span,
                "slices are runtime views and cannot be formed at comptime",
            )),
            ExprKind::Try(_) | ExprKind::Catch { .. } | ExprKind::ErrorTag(_) => Err(
                ComptimeError::nondet(span, "error unions are not comptime values"),
            ),
        }
    }

    fn unary(&mut self, op: UnaryOp, inner: &Expr, hint: Option<IntType>, span: Span) -> EvalResult<ComptimeValue> {
        match op {
            UnaryOp::Not => {
                let value = self.eval_expr(inner, None)?;
                value
                    .as_bool()
                    .map(|b| ComptimeValue::Bool(!b))
                    .ok_or_else(|| ComptimeError::trap(span, format!("`!` on {}", value.kind_name())))
            }
            UnaryOp::Neg => {
                let value = self.eval_expr(inner, hint)?;
                let ComptimeValue::Int { value: v, ty } = value else {
                    return Err(ComptimeError::trap(span, format!("`-` on {}", value.kind_name())));
                };
                let negated = v
                    .checked_neg()
                    .filter(|n| ty.is_none_or(|t| t.contains(*n)))
                    .ok_or_else(|| overflow(span, &format!("-{v}"), ty))?;
                Ok(ComptimeValue::Int { value: negated, ty })
            }
            UnaryOp::BitNot => {
                let value = self.eval_expr(inner, hint)?;
                match value {
                    ComptimeValue::Int { value: v, ty: Some(t) } => {
                        let flipped = if t.signed { !v } else { t.max_value() - v };
                        Ok(ComptimeValue::int(flipped, t))
                    }
                    ComptimeValue::Int { ty: None, .. } => Err(ComptimeError::trap(
                        span,
                        "bitwise not needs a sized integer operand",
                    )),
                    other => Err(ComptimeError::trap(span, format!("`~` on {}", other.kind_name()))),
                }
            }
        }
    }

    fn binary(
        &mut self,
        left: &Expr,
        op: BinOp,
        right: &Expr,
        hint: Option<IntType>,
        span: Span,
    ) -> EvalResult<ComptimeValue> {
        if matches!(op, BinOp::And | BinOp::Or) {
            let l = self.condition(left)?;
            if (op == BinOp::And && !l) || (op == BinOp::Or && l) {
                return Ok(ComptimeValue::Bool(l));
            }
            return self.condition(right).map(ComptimeValue::Bool);
        }

        let is_shift = matches!(op, BinOp::Shl | BinOp::Shr);
        let operand_hint = if op.is_comparison() { None } else { hint };
        let mut l = self.eval_expr(left, operand_hint)?;
        let right_hint = if is_shift {
            None
        } else {
            l.int_type().or(operand_hint)
        };
        let r = self.eval_expr(right, right_hint)?;
        if !is_shift && l.int_type().is_none() {
            if let Some(t) = r.int_type() {
                l = coerce(l, Some(t), left.span)?;
            }
        }

        if matches!(op, BinOp::Eq | BinOp::Ne) {
            let same = match (&l, &r) {
                (ComptimeValue::Int { value: a, .. }, ComptimeValue::Int { value: b, .. }) => a == b,
                (a, b) => a == b,
            };
            return Ok(ComptimeValue::Bool(if op == BinOp::Eq { same } else { !same }));
        }

        let (ComptimeValue::Int { value: a, ty: ta }, ComptimeValue::Int { value: b, ty: tb }) = (&l, &r)
        else {
            return Err(ComptimeError::trap(
                span,
                format!(
                    "`{}` needs integer operands, found {} and {}",
                    op.symbol(),
                    l.kind_name(),
                    r.kind_name()
                ),
            ));
        };
        let (a, b) = (*a, *b);
        let ty = if is_shift { *ta } else { ta.or(*tb) };
        int_binop(op, a, b, ty, span)
    }

    fn call(&mut self, callee: &keel_ast::Ident, args: &[Expr], span: Span) -> EvalResult<ComptimeValue> {
        let name = callee.node.as_str();
        let env = self.env;
        let Some(decl) = env.function(name) else {
            if name == "free" {
                return Err(ComptimeError::nondet(span, "`free` is a runtime pointer operation"));
            }
            return Err(ComptimeError::unresolved(callee.span, format!("unknown function '{name}'")));
        };
        let Some(body) = &decl.body else {
            return Err(ComptimeError::nondet(
                span,
                format!("extern function '{name}' cannot be called at comptime"),
            ));
        };
        if args.len() != decl.params.len() {
            return Err(ComptimeError::trap(
                span,
                format!(
                    "'{name}' expects {} arguments, got {}",
                    decl.params.len(),
                    args.len()
                ),
            ));
        }
        if self.depth >= self.limits.max_call_depth {
            return Err(ComptimeError::new(
                ErrorKind::ComptimeBudgetExceeded,
                span,
                format!(
                    "comptime call depth exceeded {} while calling '{name}'",
                    self.limits.max_call_depth
                ),
            ));
        }

        let mut bound = Vec::with_capacity(args.len());
        for (param, arg) in decl.params.iter().zip(args) {
            if param.qual == Qualifier::Ref {
                return Err(ComptimeError::nondet(
                    arg.span,
                    format!("'{name}' takes '{}' by reference, which needs runtime memory", param.name.node),
                ));
            }
            let hint = self.int_hint(&param.ty);
            let value = self.eval_expr(arg, hint)?;
            bound.push((param.name.node.clone(), value, hint));
        }
        let ret_hint = self.int_hint(&decl.ret);

        let saved = std::mem::replace(&mut self.scopes, vec![HashMap::new()]);
        self.env = env.module_scope().unwrap_or(env);
        self.depth += 1;
        for (param_name, value, hint) in bound {
            self.define(
                &param_name,
                Local {
                    value: Some(value),
                    mutable: false,
                    hint,
                },
            );
        }
        let flow = self.block(body, ret_hint);
        self.depth -= 1;
        self.scopes = saved;
        self.env = env;

        match flow? {
            Flow::Normal(v) | Flow::Return(v) => coerce(v, ret_hint, span),
            Flow::Break | Flow::Continue => Err(ComptimeError::trap(
                span,
                "`break`/`continue` outside of a loop",
            )),
        }
    }
}

/// Give an untyped integer (or array of them) the expected type, checking range.
/// Typed values must already match: there are no implicit conversions.
fn coerce(value: ComptimeValue, hint: Option<IntType>, span: Span) -> EvalResult<ComptimeValue> {
    let Some(t) = hint else {
        return Ok(value);
    };
    match value {
        ComptimeValue::Int { value: v, ty: None } => {
            if t.contains(v) {
                Ok(ComptimeValue::int(v, t))
            } else {
                Err(ComptimeError::trap(span, format!("value {v} does not fit in {t}")))
            }
        }
        ComptimeValue::Int { ty: Some(actual), .. } if actual != t => Err(ComptimeError::trap(
            span,
            format!("expected {t}, found {actual}; convert with an explicit cast"),
        )),
        ComptimeValue::Array(items) => items
            .into_iter()
            .map(|item| coerce(item, hint, span))
            .collect::<EvalResult<Vec<_>>>()
            .map(ComptimeValue::Array),
        other => Ok(other),
    }
}

/// Scalars a value occupies once nested arrays are flattened.
fn element_count(value: &ComptimeValue) -> u64 {
    match value {
        ComptimeValue::Array(items) => items
            .iter()
            .fold(0u64, |total, item| total.saturating_add(element_count(item))),
        _ => 1,
    }
}

fn overflow(span: Span, what: &str, ty: Option<IntType>) -> ComptimeError {
    match ty {
        Some(t) => ComptimeError::trap(span, format!("integer overflow: {what} does not fit in {t}")),
        None => ComptimeError::trap(span, format!("integer overflow: {what} exceeds the comptime integer range")),
    }
}

/// Integer arithmetic with the runtime's trap/wrap policy.
pub(crate) fn int_binop(op: BinOp, a: i128, b: i128, ty: Option<IntType>, span: Span) -> EvalResult<ComptimeValue> {
    let what = || format!("{a} {} {b}", op.symbol());
    let raw = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div | BinOp::Rem => {
            if b == 0 {
                return Err(ComptimeError::trap(span, format!("division by zero in {}", what())));
            }
            if op == BinOp::Div {
                a.checked_div(b)
            } else {
                a.checked_rem(b)
            }
        }
        BinOp::AddWrap | BinOp::SubWrap | BinOp::MulWrap => {
            let Some(t) = ty else {
                return Err(ComptimeError::trap(
                    span,
                    format!("`{}` needs a sized integer operand", op.symbol()),
                ));
            };
            let raw = match op {
                BinOp::AddWrap => a.wrapping_add(b),
                BinOp::SubWrap => a.wrapping_sub(b),
                _ => a.wrapping_mul(b),
            };
            return Ok(ComptimeValue::int(t.wrap(raw), t));
        }
        BinOp::BitAnd => Some(a & b),
        BinOp::BitOr => Some(a | b),
        BinOp::BitXor => Some(a ^ b),
        BinOp::Shl | BinOp::Shr => {
            let width = ty.map_or(127, |t| i128::from(t.bits));
            if b < 0 || b >= width {
                return Err(ComptimeError::trap(
                    span,
                    format!("shift amount {b} out of range in {}", what()),
                ));
            }
            let amount = b as u32;
            if op == BinOp::Shl {
                1i128.checked_shl(amount).and_then(|p| a.checked_mul(p))
            } else {
                Some(a >> amount)
            }
        }
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
            let result = match op {
                BinOp::Lt => a < b,
                BinOp::Gt => a > b,
                BinOp::Le => a <= b,
                _ => a >= b,
            };
            return Ok(ComptimeValue::Bool(result));
        }
        BinOp::Eq | BinOp::Ne | BinOp::And | BinOp::Or => {
            return Err(ComptimeError::trap(span, format!("unexpected operator `{}`", op.symbol())));
        }
    };
    let value = raw
        .filter(|v| ty.is_none_or(|t| t.contains(*v)))
        .ok_or_else(|| overflow(span, &what(), ty))?;
    Ok(ComptimeValue::Int { value, ty })
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_ast::span;

    fn at() -> Span {
        span(0, 1)
    }

    #[test]
    fn typed_add_traps_on_overflow() {
        let err = int_binop(BinOp::Add, 250, 10, Some(IntType::U8), at()).expect_err("overflow");
        assert_eq!(err.kind, ErrorKind::ComptimeTrap);
        assert!(err.message.contains("does not fit in u8"));
    }

    #[test]
    fn wrapping_add_wraps() {
        let v = int_binop(BinOp::AddWrap, 250, 10, Some(IntType::U8), at()).expect("wraps");
        assert_eq!(v, ComptimeValue::int(4, IntType::U8));
    }

    #[test]
    fn signed_division_overflow_traps() {
        let i8t = IntType { bits: 8, signed: true };
        assert!(int_binop(BinOp::Div, -128, -1, Some(i8t), at()).is_err());
        assert!(int_binop(BinOp::Div, 7, 0, None, at()).is_err());
    }

    #[test]
    fn shifts_check_amount_and_overflow() {
        assert!(int_binop(BinOp::Shl, 1, 8, Some(IntType::U8), at()).is_err());
        assert!(int_binop(BinOp::Shl, 0x80, 1, Some(IntType::U8), at()).is_err());
        let v = int_binop(BinOp::Shl, 1, 7, Some(IntType::U8), at()).expect("fits");
        assert_eq!(v.as_int(), Some(128));
    }

    #[test]
    fn untyped_literal_coerces_to_hint() {
        let v = coerce(ComptimeValue::untyped(300), Some(IntType::U32), at()).expect("fits");
        assert_eq!(v, ComptimeValue::int(300, IntType::U32));
        assert!(coerce(ComptimeValue::untyped(300), Some(IntType::U8), at()).is_err());
    }

    #[test]
    fn typed_mismatch_is_not_coerced() {
        let err = coerce(ComptimeValue::int(3, IntType::U8), Some(IntType::U32), at()).expect_err("mismatch");
        assert!(err.message.contains("explicit cast"));
    }
}
