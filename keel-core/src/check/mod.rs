//! Module entry point: resolve declarations, then check every function body.
//!
//! Function checks only read the frozen module tables, so they fan out over
//! the rayon pool with one diagnostic buffer per function; the buffers are
//! merged and ordered at the join.

use std::collections::HashMap;
use std::sync::Arc;

use keel_ast::{Decl, FnDecl, Module};
use rayon::prelude::*;
use tracing::debug;

use crate::annotate::{AnnotatedModule, FunctionFacts};
use crate::comptime::ComptimeCache;
use crate::config::CheckConfig;
use crate::diagnostics::{DiagnosticSink, Diagnostics};
use crate::resolve::{ModuleTables, resolve_module};

mod errflow;
mod expr;
mod function;

use function::FnChecker;

/// Read-only state shared by every function check of one module.
pub(crate) struct CheckContext<'a> {
    pub tables: Arc<ModuleTables>,
    pub decls: HashMap<&'a str, &'a FnDecl>,
    pub config: &'a CheckConfig,
    pub cache: &'a ComptimeCache,
}

/// Check `module` with the default configuration.
pub fn check(module: &Module) -> (AnnotatedModule<'_>, Diagnostics) {
    check_with_config(module, &CheckConfig::default())
}

pub fn check_with_config<'m>(module: &'m Module, config: &CheckConfig) -> (AnnotatedModule<'m>, Diagnostics) {
    let cache = ComptimeCache::new();
    let (tables, resolved) = resolve_module(module, config, &cache);
    let tables = Arc::new(tables);

    if resolved.has_fatal() {
        debug!(
            module = %module.name,
            diagnostics = resolved.len(),
            "resolution failed, function checks skipped"
        );
        cache.log_summary(&module.name);
        let diagnostics = Diagnostics::merge([resolved]);
        return (AnnotatedModule::new(module, tables, Vec::new(), true), diagnostics);
    }

    let fns: Vec<&FnDecl> = module
        .decls
        .iter()
        .filter_map(|d| match d {
            Decl::Fn(f) => Some(f),
            _ => None,
        })
        .collect();
    let ctx = CheckContext {
        tables: Arc::clone(&tables),
        decls: fns.iter().map(|f| (f.name.node.as_str(), *f)).collect(),
        config,
        cache: &cache,
    };
    let bodies: Vec<&FnDecl> = fns.into_iter().filter(|f| f.body.is_some()).collect();

    let results: Vec<(FunctionFacts, DiagnosticSink)> = if config.parallel {
        bodies.par_iter().filter_map(|f| check_function(&ctx, f)).collect()
    } else {
        bodies.iter().filter_map(|f| check_function(&ctx, f)).collect()
    };

    let (functions, sinks): (Vec<_>, Vec<_>) = results.into_iter().unzip();
    let diagnostics = Diagnostics::merge(std::iter::once(resolved).chain(sinks));
    cache.log_summary(&module.name);

    let fatal = diagnostics.has_fatal();
    debug!(
        module = %module.name,
        functions = functions.len(),
        diagnostics = diagnostics.len(),
        fatal,
        "checked module"
    );
    (AnnotatedModule::new(module, tables, functions, fatal), diagnostics)
}

fn check_function<'a>(ctx: &'a CheckContext<'a>, decl: &'a FnDecl) -> Option<(FunctionFacts, DiagnosticSink)> {
    let sig = ctx.tables.signature(&decl.name.node)?;
    Some(FnChecker::new(ctx, decl, sig).run())
}
