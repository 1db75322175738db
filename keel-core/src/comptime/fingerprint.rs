//! Span-insensitive structural hashing of comptime expressions.
//!
//! Two occurrences of the same expression text at different source locations
//! hash alike, so they share one memo entry. The walk also collects every
//! identifier the expression mentions; the memo key records what each of
//! them resolved to.

use std::collections::BTreeSet;
use std::hash::{DefaultHasher, Hash, Hasher};

use keel_ast::{Block, Expr, ExprKind, Stmt, TypeExpr, TypeExprKind};

pub(crate) struct Fingerprint {
    pub hash: u64,
    pub names: BTreeSet<String>,
}

pub(crate) fn of_expr(expr: &Expr) -> Fingerprint {
    let mut walker = Walker::default();
    walker.expr(expr);
    walker.finish()
}

pub(crate) fn of_block(block: &Block) -> Fingerprint {
    let mut walker = Walker::default();
    walker.block(block);
    walker.finish()
}

#[derive(Default)]
struct Walker {
    hasher: DefaultHasher,
    names: BTreeSet<String>,
}

impl Walker {
    fn finish(self) -> Fingerprint {
        Fingerprint {
            hash: self.hasher.finish(),
            names: self.names,
        }
    }

    fn tag(&mut self, tag: u8) {
        tag.hash(&mut self.hasher);
    }

    fn name(&mut self, name: &str) {
        name.hash(&mut self.hasher);
        self.names.insert(name.to_string());
    }

    fn block(&mut self, block: &Block) {
        self.tag(0xB0);
        block.stmts.len().hash(&mut self.hasher);
        for stmt in &block.stmts {
            self.stmt(stmt);
        }
        match &block.tail {
            Some(tail) => {
                self.tag(1);
                self.expr(tail);
            }
            None => self.tag(0),
        }
    }

    fn opt_ty(&mut self, ty: Option<&TypeExpr>) {
        match ty {
            Some(t) => {
                self.tag(1);
                self.ty(t);
            }
            None => self.tag(0),
        }
    }

    fn ty(&mut self, ty: &TypeExpr) {
        match &ty.kind {
            TypeExprKind::Named(n) => {
                self.tag(0x70);
                self.name(n);
            }
            TypeExprKind::Void => self.tag(0x71),
            TypeExprKind::Pointer { target, nullable } => {
                self.tag(0x72);
                nullable.hash(&mut self.hasher);
                self.ty(target);
            }
            TypeExprKind::Slice(elem) => {
                self.tag(0x73);
                self.ty(elem);
            }
            TypeExprKind::Array { elem, len } => {
                self.tag(0x74);
                self.ty(elem);
                self.expr(len);
            }
            TypeExprKind::ErrorUnion { success, errors } => {
                self.tag(0x75);
                self.ty(success);
                for e in errors {
                    e.node.hash(&mut self.hasher);
                }
            }
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let(l) => {
                self.tag(0x50);
                self.name(&l.name.node);
                l.mutable.hash(&mut self.hasher);
                self.opt_ty(l.ty.as_ref());
                if let Some(v) = &l.value {
                    self.expr(v);
                }
            }
            Stmt::Const(c) => {
                self.tag(0x51);
                self.name(&c.name.node);
                self.opt_ty(c.ty.as_ref());
                self.expr(&c.value);
            }
            Stmt::Assign(a) => {
                self.tag(0x52);
                self.expr(&a.target);
                self.expr(&a.value);
            }
            Stmt::Expr(e) => {
                self.tag(0x53);
                self.expr(e);
            }
            Stmt::Return(r) => {
                self.tag(0x54);
                if let Some(v) = &r.value {
                    self.expr(v);
                }
            }
            Stmt::If(i) => {
                self.tag(0x55);
                self.expr(&i.cond);
                if let Some(c) = &i.capture {
                    self.name(&c.node);
                }
                self.block(&i.then_block);
                if let Some(e) = &i.else_block {
                    self.block(e);
                }
            }
            Stmt::While(w) => {
                self.tag(0x56);
                self.expr(&w.cond);
                self.block(&w.body);
            }
            Stmt::For(f) => {
                self.tag(0x57);
                self.name(&f.var.node);
                self.expr(&f.start);
                self.expr(&f.end);
                self.block(&f.body);
            }
            Stmt::Break(_) => self.tag(0x58),
            Stmt::Continue(_) => self.tag(0x59),
            Stmt::Block(b) => {
                self.tag(0x5A);
                self.block(b);
            }
            Stmt::Defer(d) => {
                self.tag(0x5B);
                d.on_error.hash(&mut self.hasher);
                self.block(&d.body);
            }
            Stmt::Comptime(b) => {
                self.tag(0x5C);
                self.block(b);
            }
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Ident(n) => {
                self.tag(0x10);
                self.name(n);
            }
            ExprKind::Int(v) => {
                self.tag(0x11);
                v.hash(&mut self.hasher);
            }
            ExprKind::Bool(b) => {
                self.tag(0x12);
                b.hash(&mut self.hasher);
            }
            ExprKind::Null => self.tag(0x13),
            ExprKind::Unary { op, expr } => {
                self.tag(0x14);
                op.hash(&mut self.hasher);
                self.expr(expr);
            }
            ExprKind::Binary { left, op, right } => {
                self.tag(0x15);
                op.hash(&mut self.hasher);
                self.expr(left);
                self.expr(right);
            }
            ExprKind::Call { callee, args } => {
                self.tag(0x16);
                self.name(&callee.node);
                args.len().hash(&mut self.hasher);
                for a in args {
                    self.expr(a);
                }
            }
            ExprKind::Ref(e) => {
                self.tag(0x17);
                self.expr(e);
            }
            ExprKind::Deref(e) => {
                self.tag(0x18);
                self.expr(e);
            }
            ExprKind::Field { base, field } => {
                self.tag(0x19);
                self.expr(base);
                field.node.hash(&mut self.hasher);
            }
            ExprKind::Index { base, index } => {
                self.tag(0x1A);
                self.expr(base);
                self.expr(index);
            }
            ExprKind::Slice { base, start, end } => {
                self.tag(0x1B);
                self.expr(base);
                self.expr(start);
                self.expr(end);
            }
            ExprKind::ArrayLit(items) => {
                self.tag(0x1C);
                items.len().hash(&mut self.hasher);
                for i in items {
                    self.expr(i);
                }
            }
            ExprKind::ArrayRepeat { value, count } => {
                self.tag(0x1D);
                self.expr(value);
                self.expr(count);
            }
            ExprKind::StructLit { name, fields } => {
                self.tag(0x1E);
                self.name(&name.node);
                for (f, v) in fields {
                    f.node.hash(&mut self.hasher);
                    self.expr(v);
                }
            }
            ExprKind::Try(e) => {
                self.tag(0x1F);
                self.expr(e);
            }
            ExprKind::Catch { expr, fallback } => {
                self.tag(0x20);
                self.expr(expr);
                self.expr(fallback);
            }
            ExprKind::ErrorTag(t) => {
                self.tag(0x21);
                t.node.hash(&mut self.hasher);
            }
            ExprKind::Comptime(b) => {
                self.tag(0x22);
                self.block(b);
            }
            ExprKind::Cast { expr, ty } => {
                self.tag(0x23);
                self.expr(expr);
                self.ty(ty);
            }
            ExprKind::Allocate(ty) => {
                self.tag(0x24);
                self.ty(ty);
            }
        }
    }
}
