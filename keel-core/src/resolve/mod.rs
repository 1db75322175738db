//! Symbol and type resolution for one module.
//!
//! Declarations are collected, constants and struct layouts are ordered by a
//! dependency graph and evaluated in that order, then every function
//! signature is lowered. The resulting [`ModuleTables`] are immutable.

use std::collections::{HashMap, HashSet};

use keel_ast::{ConstDecl, Decl, Expr, FnDecl, Module, Span, StructDecl, TypeExpr, TypeExprKind};
use tracing::{debug, trace};

use crate::comptime::{ComptimeCache, ComptimeEnv, ComptimeValue};
use crate::config::CheckConfig;
use crate::diagnostics::{Diagnostic, DiagnosticSink, ErrorKind};
use crate::types::{ErrorTag, FnSig, IntType, ParamSig, StructId, StructLayout, Type, TypeTable};

mod graph;
mod layout;

use graph::{DepGraph, NodeKind, RefCollector, by_value_structs};
use layout::{FieldInput, compute_layout};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstEntry {
    pub name: String,
    pub value: ComptimeValue,
    pub ty: Option<Type>,
    pub span: Span,
}

/// Resolved facts about a module, shared read-only by every function check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleTables {
    pub types: TypeTable,
    pub consts: HashMap<String, ConstEntry>,
    pub fns: HashMap<String, FnSig>,
}

impl ModuleTables {
    pub fn new(pointer_width: u16) -> Self {
        ModuleTables {
            types: TypeTable::new(pointer_width),
            consts: HashMap::new(),
            fns: HashMap::new(),
        }
    }

    pub fn const_value(&self, name: &str) -> Option<&ComptimeValue> {
        self.consts.get(name).map(|c| &c.value)
    }

    pub fn signature(&self, name: &str) -> Option<&FnSig> {
        self.fns.get(name)
    }

    pub fn struct_layout(&self, name: &str) -> Option<&StructLayout> {
        self.types.lookup_struct(name)
    }
}

/// Comptime view of the module: resolved constants and function bodies.
pub(crate) struct ModuleEnv<'a> {
    pub consts: &'a HashMap<String, ConstEntry>,
    pub fns: &'a HashMap<&'a str, &'a FnDecl>,
    pub pointer_width: u16,
}

impl ComptimeEnv for ModuleEnv<'_> {
    fn constant(&self, name: &str) -> Option<ComptimeValue> {
        self.consts.get(name).map(|c| c.value.clone())
    }

    fn function(&self, name: &str) -> Option<&FnDecl> {
        self.fns.get(name).copied()
    }

    fn pointer_width(&self) -> u16 {
        self.pointer_width
    }
}

/// Lower a written type. Array lengths are reduced through `array_len`.
pub(crate) fn lower_type(
    types: &TypeTable,
    ty: &TypeExpr,
    array_len: &dyn Fn(&Expr) -> Result<u64, Diagnostic>,
) -> Result<Type, Diagnostic> {
    Ok(match &ty.kind {
        TypeExprKind::Named(n) => match n.as_str() {
            "bool" => Type::Bool,
            "void" => Type::Void,
            _ => {
                if let Some(it) = IntType::from_name(n, types.pointer_width) {
                    Type::Int(it)
                } else if let Some(st) = types.struct_type(n) {
                    st
                } else {
                    return Err(Diagnostic::new(
                        ErrorKind::UnknownName,
                        ty.span,
                        format!("unknown type '{n}'"),
                    ));
                }
            }
        },
        TypeExprKind::Void => Type::Void,
        TypeExprKind::Pointer { target, nullable } => Type::Pointer {
            target: Box::new(lower_type(types, target, array_len)?),
            nullable: *nullable,
        },
        TypeExprKind::Slice(elem) => Type::Slice(Box::new(lower_type(types, elem, array_len)?)),
        TypeExprKind::Array { elem, len } => Type::Array {
            elem: Box::new(lower_type(types, elem, array_len)?),
            len: array_len(len)?,
        },
        TypeExprKind::ErrorUnion { success, errors } => Type::ErrorUnion {
            success: Box::new(lower_type(types, success, array_len)?),
            errors: errors.iter().map(|e| ErrorTag::new(e.node.clone())).collect(),
        },
    })
}

/// Reduce a length or alignment expression; any failure is reported as
/// `UnresolvedConstant` carrying the evaluator's reason.
pub(crate) fn reduce_to_u64(
    result: Result<ComptimeValue, crate::comptime::ComptimeError>,
    what: &str,
    at: Span,
) -> Result<u64, Diagnostic> {
    match result {
        Ok(value) => value.as_u64().ok_or_else(|| {
            Diagnostic::new(
                ErrorKind::UnresolvedConstant,
                at,
                format!("{what} must be a non-negative integer, found {value}"),
            )
        }),
        Err(err) => Err(Diagnostic::new(
            ErrorKind::UnresolvedConstant,
            at,
            format!("{what} cannot be computed at comptime: {}", err.message),
        )
        .with_related(err.span, format!("{}", err.kind))),
    }
}

struct Resolver<'m> {
    config: &'m CheckConfig,
    cache: &'m ComptimeCache,
    sink: DiagnosticSink,
    consts: Vec<&'m ConstDecl>,
    structs: Vec<&'m StructDecl>,
    fn_order: Vec<&'m FnDecl>,
    fns: HashMap<&'m str, &'m FnDecl>,
    graph: DepGraph,
    tables: ModuleTables,
    failed: HashSet<usize>,
}

/// Resolve `module`: declarations, constants, layouts and signatures.
pub fn resolve_module(
    module: &Module,
    config: &CheckConfig,
    cache: &ComptimeCache,
) -> (ModuleTables, DiagnosticSink) {
    let mut resolver = Resolver {
        config,
        cache,
        sink: DiagnosticSink::new(),
        consts: Vec::new(),
        structs: Vec::new(),
        fn_order: Vec::new(),
        fns: HashMap::new(),
        graph: DepGraph::default(),
        tables: ModuleTables::new(config.target.pointer_width),
        failed: HashSet::new(),
    };
    resolver.collect(module);
    resolver.build_graph();
    resolver.evaluate_in_order();
    resolver.resolve_signatures();
    debug!(
        module = %module.name,
        consts = resolver.tables.consts.len(),
        structs = resolver.tables.types.structs().len(),
        fns = resolver.tables.fns.len(),
        diagnostics = resolver.sink.len(),
        "resolved module"
    );
    (resolver.tables, resolver.sink)
}

impl<'m> Resolver<'m> {
    fn collect(&mut self, module: &'m Module) {
        let mut seen: HashMap<&'m str, Span> = HashMap::new();
        for decl in &module.decls {
            let name = decl.name();
            if let Some(first) = seen.get(name.node.as_str()) {
                self.sink.push(
                    Diagnostic::new(
                        ErrorKind::DuplicateDeclaration,
                        name.span,
                        format!("'{}' is declared more than once", name.node),
                    )
                    .with_related(*first, "first declared here"),
                );
                continue;
            }
            seen.insert(name.node.as_str(), name.span);
            match decl {
                Decl::Const(c) => self.consts.push(c),
                Decl::Struct(s) => {
                    let id = StructId(self.structs.len() as u32);
                    self.tables.types.by_name.insert(s.name.node.clone(), id);
                    self.tables.types.structs.push(StructLayout {
                        id,
                        name: s.name.node.clone(),
                        span: s.span,
                        fields: Vec::new(),
                        packed: s.packed,
                        explicit_align: None,
                        size: 0,
                        align: 1,
                    });
                    self.structs.push(s);
                }
                Decl::Fn(f) => {
                    self.fns.insert(f.name.node.as_str(), f);
                    self.fn_order.push(f);
                }
            }
        }
    }

    fn build_graph(&mut self) {
        let mut const_nodes = Vec::with_capacity(self.consts.len());
        for c in &self.consts {
            const_nodes.push(self.graph.add_node(&c.name.node, NodeKind::Const, c.name.span));
        }
        let mut struct_nodes = Vec::with_capacity(self.structs.len());
        for s in &self.structs {
            struct_nodes.push(self.graph.add_node(&s.name.node, NodeKind::Struct, s.name.span));
        }

        for (c, node) in self.consts.iter().zip(&const_nodes) {
            let mut refs = RefCollector::new();
            refs.expr(&c.value);
            if let Some(t) = &c.ty {
                refs.ty(t);
            }
            for (dep, at) in self.const_deps(refs.into_refs()) {
                self.graph.add_edge(*node, dep, at);
            }
        }

        for (s, node) in self.structs.iter().zip(&struct_nodes) {
            let mut refs = RefCollector::new();
            let mut embedded = Vec::new();
            for f in &s.fields {
                refs.ty(&f.ty);
                by_value_structs(&f.ty, &mut embedded);
            }
            if let Some(align) = &s.align {
                refs.expr(align);
            }
            let mut edges = self.const_deps(refs.into_refs());
            for (name, at) in embedded {
                if let Some(dep) = self.graph.id(&name) {
                    if self.graph.node(dep).kind == NodeKind::Struct {
                        edges.push((dep, at));
                    }
                }
            }
            for (dep, at) in edges {
                self.graph.add_edge(*node, dep, at);
            }
        }
    }

    /// Constants reachable from `refs`, directly or through called function
    /// bodies. Edges through a function carry the call site span.
    fn const_deps(&self, refs: Vec<(String, Span)>) -> Vec<(usize, Span)> {
        let mut out = Vec::new();
        let mut seen_fns = HashSet::new();
        let mut work: Vec<(String, Span)> = refs;
        let mut via: Vec<Option<Span>> = vec![None; work.len()];
        while let Some((name, at)) = work.pop() {
            let site = via.pop().flatten().unwrap_or(at);
            if let Some(id) = self.graph.id(&name) {
                if self.graph.node(id).kind == NodeKind::Const {
                    out.push((id, site));
                }
                continue;
            }
            if let Some(f) = self.fns.get(name.as_str()) {
                if !seen_fns.insert(name.clone()) {
                    continue;
                }
                let mut inner = RefCollector::new();
                inner.function(f);
                for r in inner.into_refs() {
                    work.push(r);
                    via.push(Some(site));
                }
            }
        }
        out
    }

    fn env(&self) -> ModuleEnv<'_> {
        ModuleEnv {
            consts: &self.tables.consts,
            fns: &self.fns,
            pointer_width: self.config.target.pointer_width,
        }
    }

    fn eval_u64(&self, expr: &Expr, what: &str) -> Result<u64, Diagnostic> {
        let env = self.env();
        let result = self.cache.evaluate(&env, &self.config.comptime, expr, None);
        reduce_to_u64(result, what, expr.span)
    }

    fn lower(&self, ty: &TypeExpr) -> Result<Type, Diagnostic> {
        lower_type(&self.tables.types, ty, &|len: &Expr| self.eval_u64(len, "array length"))
    }

    fn evaluate_in_order(&mut self) {
        let (order, cycles) = self.graph.order();
        for cycle in &cycles {
            let Some(&head) = cycle.members.first() else {
                continue;
            };
            let mut diag = Diagnostic::new(
                ErrorKind::CyclicConstantDependency,
                self.graph.node(head).span,
                format!("dependency cycle: {}", self.graph.describe(cycle)),
            );
            for m in &cycle.members[1..] {
                diag = diag.with_related(
                    self.graph.node(*m).span,
                    format!("'{}' is part of the cycle", self.graph.node(*m).name),
                );
            }
            diag = diag.with_related(cycle.closing, "cycle closes here");
            self.sink.push(diag);
            self.failed.extend(cycle.members.iter().copied());
        }

        for id in order {
            if self.failed.contains(&id) {
                continue;
            }
            if self.graph.node(id).deps.iter().any(|(d, _)| self.failed.contains(d)) {
                trace!(name = %self.graph.node(id).name, "skipping node with failed dependency");
                self.failed.insert(id);
                continue;
            }
            let ok = match self.graph.node(id).kind {
                NodeKind::Const => self.evaluate_const(id),
                NodeKind::Struct => self.layout_struct(id),
            };
            if !ok {
                self.failed.insert(id);
            }
        }
    }

    fn evaluate_const(&mut self, id: usize) -> bool {
        let Some(decl) = self.consts.iter().find(|c| c.name.node == self.graph.node(id).name).copied() else {
            return false;
        };
        let declared = match decl.ty.as_ref().map(|t| self.lower(t)).transpose() {
            Ok(t) => t,
            Err(diag) => {
                self.sink.push(diag);
                return false;
            }
        };
        let hint = match &declared {
            Some(Type::Int(it)) => Some(*it),
            Some(Type::Array { elem, .. }) => match elem.as_ref() {
                Type::Int(it) => Some(*it),
                _ => None,
            },
            _ => None,
        };
        let env = self.env();
        let result = self.cache.evaluate(&env, &self.config.comptime, &decl.value, hint);
        match result {
            Ok(value) => {
                let ty = declared.or_else(|| match &value {
                    ComptimeValue::Int { ty: Some(it), .. } => Some(Type::Int(*it)),
                    ComptimeValue::Bool(_) => Some(Type::Bool),
                    _ => None,
                });
                trace!(name = %decl.name.node, %value, "constant resolved");
                self.tables.consts.insert(
                    decl.name.node.clone(),
                    ConstEntry {
                        name: decl.name.node.clone(),
                        value,
                        ty,
                        span: decl.span,
                    },
                );
                true
            }
            Err(err) => {
                self.sink.push(
                    Diagnostic::from(err).with_related(decl.name.span, format!("while evaluating '{}'", decl.name.node)),
                );
                false
            }
        }
    }

    fn layout_struct(&mut self, id: usize) -> bool {
        let Some(decl) = self.structs.iter().find(|s| s.name.node == self.graph.node(id).name).copied() else {
            return false;
        };
        let Some(struct_id) = self.tables.types.by_name.get(&decl.name.node).copied() else {
            return false;
        };

        let mut ok = true;
        let mut fields = Vec::with_capacity(decl.fields.len());
        let mut names = HashSet::new();
        for f in &decl.fields {
            if !names.insert(f.name.node.as_str()) {
                self.sink.report(
                    ErrorKind::DuplicateDeclaration,
                    f.name.span,
                    format!("field '{}' is declared more than once in '{}'", f.name.node, decl.name.node),
                );
                ok = false;
                continue;
            }
            match self.lower(&f.ty) {
                Ok(ty) => fields.push(FieldInput {
                    name: f.name.node.clone(),
                    ty,
                }),
                Err(diag) => {
                    self.sink.push(diag);
                    ok = false;
                }
            }
        }
        let explicit_align = match &decl.align {
            Some(expr) => match self.eval_u64(expr, "struct alignment") {
                Ok(n) => Some((n, expr.span)),
                Err(diag) => {
                    self.sink.push(diag);
                    ok = false;
                    None
                }
            },
            None => None,
        };

        let (layout, conflict) = compute_layout(
            &self.tables.types,
            struct_id,
            &decl.name.node,
            decl.span,
            decl.packed,
            fields,
            explicit_align,
        );
        if let Some(diag) = conflict {
            self.sink.push(diag);
            ok = false;
        }
        trace!(name = %layout.name, size = layout.size, align = layout.align, "struct laid out");
        self.tables.types.structs[struct_id.index()] = layout;
        ok
    }

    fn resolve_signatures(&mut self) {
        for decl in self.fn_order.clone() {
            let mut params = Vec::with_capacity(decl.params.len());
            let mut complete = true;
            for p in &decl.params {
                match self.lower(&p.ty) {
                    Ok(ty) => params.push(ParamSig {
                        name: p.name.node.clone(),
                        ty,
                        qual: p.qual,
                    }),
                    Err(diag) => {
                        self.sink.push(diag);
                        complete = false;
                    }
                }
            }
            let ret = match self.lower(&decl.ret) {
                Ok(ty) => ty,
                Err(diag) => {
                    self.sink.push(diag);
                    complete = false;
                    Type::Void
                }
            };
            if complete {
                self.tables.fns.insert(
                    decl.name.node.clone(),
                    FnSig {
                        name: decl.name.node.clone(),
                        span: decl.span,
                        params,
                        ret,
                        release: decl.release,
                        has_body: decl.body.is_some(),
                    },
                );
            }
        }
    }
}
