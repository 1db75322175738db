//! Dependency arena for module constants and struct layouts.
//!
//! Nodes are indices into a flat arena; edges carry the span of the
//! reference that introduced them so a cycle can be reported at each hop.

use std::collections::{HashMap, HashSet};

use keel_ast::{Block, Expr, ExprKind, FnDecl, Span, Stmt, TypeExpr, TypeExprKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NodeKind {
    Const,
    Struct,
}

#[derive(Debug)]
pub(crate) struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub span: Span,
    pub deps: Vec<(usize, Span)>,
}

#[derive(Debug)]
pub(crate) struct Cycle {
    /// Members in dependency order, starting at the node that was re-entered.
    pub members: Vec<usize>,
    /// Span of the reference that closed the cycle.
    pub closing: Span,
}

#[derive(Debug, Default)]
pub(crate) struct DepGraph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl DepGraph {
    pub fn add_node(&mut self, name: &str, kind: NodeKind, span: Span) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node {
            name: name.to_string(),
            kind,
            span,
            deps: Vec::new(),
        });
        self.index.insert(name.to_string(), id);
        id
    }

    pub fn id(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn node(&self, id: usize) -> &Node {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn add_edge(&mut self, from: usize, to: usize, at: Span) {
        let deps = &mut self.nodes[from].deps;
        if !deps.iter().any(|(d, _)| *d == to) {
            deps.push((to, at));
        }
    }

    /// Dependencies-first order of every node, plus each back edge found.
    pub fn order(&self) -> (Vec<usize>, Vec<Cycle>) {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut path = Vec::new();
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut cycles = Vec::new();
        for id in 0..self.nodes.len() {
            if marks[id] == Mark::Unvisited {
                self.visit(id, &mut marks, &mut path, &mut order, &mut cycles);
            }
        }
        (order, cycles)
    }

    fn visit(
        &self,
        id: usize,
        marks: &mut [Mark],
        path: &mut Vec<usize>,
        order: &mut Vec<usize>,
        cycles: &mut Vec<Cycle>,
    ) {
        marks[id] = Mark::InProgress;
        path.push(id);
        for &(dep, at) in &self.nodes[id].deps {
            match marks[dep] {
                Mark::Unvisited => self.visit(dep, marks, path, order, cycles),
                Mark::InProgress => {
                    let start = path.iter().position(|n| *n == dep).unwrap_or(0);
                    cycles.push(Cycle {
                        members: path[start..].to_vec(),
                        closing: at,
                    });
                }
                Mark::Done => {}
            }
        }
        path.pop();
        marks[id] = Mark::Done;
        order.push(id);
    }

    /// `A -> B -> A`
    pub fn describe(&self, cycle: &Cycle) -> String {
        let mut names: Vec<&str> = cycle.members.iter().map(|m| self.nodes[*m].name.as_str()).collect();
        if let Some(first) = names.first().copied() {
            names.push(first);
        }
        names.join(" -> ")
    }
}

/// Names referenced by expressions, types and function bodies. A name is
/// local only where a declaration of it is in scope, so a read that comes
/// before a shadowing `let` still refers to the module.
#[derive(Default)]
pub(crate) struct RefCollector {
    pub refs: Vec<(String, Span)>,
    scopes: Vec<HashSet<String>>,
}

impl RefCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_refs(self) -> Vec<(String, Span)> {
        self.refs
    }

    fn reference(&mut self, name: &str, span: Span) {
        if !self.scopes.iter().any(|s| s.contains(name)) {
            self.refs.push((name.to_string(), span));
        }
    }

    fn bind(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string());
        }
    }

    fn scoped(&mut self, binds: Option<&str>, block: &Block) {
        self.scopes.push(HashSet::new());
        if let Some(name) = binds {
            self.bind(name);
        }
        self.block(block);
        self.scopes.pop();
    }

    pub fn function(&mut self, decl: &FnDecl) {
        self.ty(&decl.ret);
        self.scopes.push(HashSet::new());
        for p in &decl.params {
            self.ty(&p.ty);
            self.bind(&p.name.node);
        }
        if let Some(body) = &decl.body {
            self.block(body);
        }
        self.scopes.pop();
    }

    pub fn ty(&mut self, ty: &TypeExpr) {
        match &ty.kind {
            TypeExprKind::Named(n) => self.reference(n, ty.span),
            TypeExprKind::Void => {}
            TypeExprKind::Pointer { target, .. } => self.ty(target),
            TypeExprKind::Slice(elem) => self.ty(elem),
            TypeExprKind::Array { elem, len } => {
                self.ty(elem);
                self.expr(len);
            }
            TypeExprKind::ErrorUnion { success, .. } => self.ty(success),
        }
    }

    pub fn block(&mut self, block: &Block) {
        self.scopes.push(HashSet::new());
        for stmt in &block.stmts {
            self.stmt(stmt);
        }
        if let Some(tail) = &block.tail {
            self.expr(tail);
        }
        self.scopes.pop();
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let(l) => {
                if let Some(t) = &l.ty {
                    self.ty(t);
                }
                if let Some(v) = &l.value {
                    self.expr(v);
                }
                self.bind(&l.name.node);
            }
            Stmt::Const(c) => {
                if let Some(t) = &c.ty {
                    self.ty(t);
                }
                self.expr(&c.value);
                self.bind(&c.name.node);
            }
            Stmt::Assign(a) => {
                self.expr(&a.target);
                self.expr(&a.value);
            }
            Stmt::Expr(e) => self.expr(e),
            Stmt::Return(r) => {
                if let Some(v) = &r.value {
                    self.expr(v);
                }
            }
            Stmt::If(i) => {
                self.expr(&i.cond);
                self.scoped(i.capture.as_ref().map(|c| c.node.as_str()), &i.then_block);
                if let Some(e) = &i.else_block {
                    self.block(e);
                }
            }
            Stmt::While(w) => {
                self.expr(&w.cond);
                self.block(&w.body);
            }
            Stmt::For(f) => {
                self.expr(&f.start);
                self.expr(&f.end);
                self.scoped(Some(f.var.node.as_str()), &f.body);
            }
            Stmt::Break(_) | Stmt::Continue(_) => {}
            Stmt::Block(b) | Stmt::Comptime(b) => self.block(b),
            Stmt::Defer(d) => self.block(&d.body),
        }
    }

    pub fn expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Ident(n) => self.reference(n, expr.span),
            ExprKind::Int(_) | ExprKind::Bool(_) | ExprKind::Null | ExprKind::ErrorTag(_) => {}
            ExprKind::Unary { expr, .. } | ExprKind::Ref(expr) | ExprKind::Deref(expr) | ExprKind::Try(expr) => {
                self.expr(expr)
            }
            ExprKind::Binary { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            ExprKind::Call { callee, args } => {
                self.reference(&callee.node, callee.span);
                for a in args {
                    self.expr(a);
                }
            }
            ExprKind::Field { base, .. } => self.expr(base),
            ExprKind::Index { base, index } => {
                self.expr(base);
                self.expr(index);
            }
            ExprKind::Slice { base, start, end } => {
                self.expr(base);
                self.expr(start);
                self.expr(end);
            }
            ExprKind::ArrayLit(items) => {
                for i in items {
                    self.expr(i);
                }
            }
            ExprKind::ArrayRepeat { value, count } => {
                self.expr(value);
                self.expr(count);
            }
            ExprKind::StructLit { fields, .. } => {
                for (_, v) in fields {
                    self.expr(v);
                }
            }
            ExprKind::Catch { expr, fallback } => {
                self.expr(expr);
                self.expr(fallback);
            }
            ExprKind::Comptime(b) => self.block(b),
            ExprKind::Cast { expr, ty } => {
                self.expr(expr);
                self.ty(ty);
            }
            ExprKind::Allocate(ty) => self.ty(ty),
        }
    }
}

/// Struct names a type embeds by value; pointer and slice targets do not
/// contribute to the size.
pub(crate) fn by_value_structs(ty: &TypeExpr, out: &mut Vec<(String, Span)>) {
    match &ty.kind {
        TypeExprKind::Named(n) => out.push((n.clone(), ty.span)),
        TypeExprKind::Array { elem, .. } => by_value_structs(elem, out),
        TypeExprKind::ErrorUnion { success, .. } => by_value_structs(success, out),
        TypeExprKind::Void | TypeExprKind::Pointer { .. } | TypeExprKind::Slice(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_ast::span;

    #[test]
    fn orders_dependencies_first() {
        let mut g = DepGraph::default();
        let a = g.add_node("A", NodeKind::Const, span(0, 1));
        let b = g.add_node("B", NodeKind::Const, span(1, 1));
        g.add_edge(a, b, span(2, 1));
        let (order, cycles) = g.order();
        assert!(cycles.is_empty());
        assert_eq!(order, vec![b, a]);
    }

    #[test]
    fn reports_back_edge_as_cycle() {
        let mut g = DepGraph::default();
        let a = g.add_node("A", NodeKind::Const, span(0, 1));
        let b = g.add_node("B", NodeKind::Const, span(1, 1));
        g.add_edge(a, b, span(2, 1));
        g.add_edge(b, a, span(3, 1));
        let (_, cycles) = g.order();
        assert_eq!(cycles.len(), 1);
        assert_eq!(g.describe(&cycles[0]), "A -> B -> A");
    }

    #[test]
    fn local_names_are_scoped_to_their_block() {
        use keel_ast::build::*;
        let f = func(
            "f",
            vec![param("n", ty("u32"))],
            ty("u32"),
            block(vec![
                let_typed("x", ty("u32"), ident("A")),
                let_typed("A", ty("u32"), add(ident("A"), ident("n"))),
                block_stmt(block(vec![let_typed("B", ty("u32"), int(1))])),
                ret(add(ident("A"), ident("B"))),
            ]),
        );
        let keel_ast::Decl::Fn(decl) = &f else {
            panic!("expected a function");
        };
        let mut refs = RefCollector::new();
        refs.function(decl);
        let names: Vec<String> = refs.into_refs().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names.iter().filter(|n| *n == "A").count(), 2, "{names:?}");
        assert!(names.contains(&"B".to_string()), "{names:?}");
        assert!(!names.contains(&"n".to_string()));
        assert!(!names.contains(&"x".to_string()));
    }

    #[test]
    fn self_edge_is_a_cycle() {
        let mut g = DepGraph::default();
        let node = g.add_node("Node", NodeKind::Struct, span(0, 1));
        g.add_edge(node, node, span(1, 1));
        let (_, cycles) = g.order();
        assert_eq!(g.describe(&cycles[0]), "Node -> Node");
    }
}
