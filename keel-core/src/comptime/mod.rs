//! Comptime evaluation with a memo shared across worker threads.
//!
//! Results are keyed by the expression's structure (not its location), the
//! resolution of every name it mentions and the expected type, so the same
//! expression in two functions is evaluated once. Failures are not cached.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use keel_ast::{Block, Expr};
use tracing::{debug, trace};

use crate::config::ComptimeConfig;
use crate::diagnostics::ErrorKind;
use crate::types::IntType;

mod eval;
mod fingerprint;
pub mod value;

pub use eval::{ComptimeEnv, ComptimeError, Evaluator};
pub(crate) use eval::int_binop;
pub use value::ComptimeValue;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum NameBinding {
    Const(ComptimeValue),
    Function,
    Runtime,
    Unbound,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct MemoKey {
    hash: u64,
    block: bool,
    hint: Option<IntType>,
    names: Vec<(String, NameBinding)>,
}

/// Counters reported once per `check`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ComptimeStats {
    pub hits: u64,
    pub misses: u64,
    pub steps: u64,
    pub budget_exhaustions: u64,
    pub entries: usize,
}

#[derive(Debug, Default)]
pub struct ComptimeCache {
    entries: RwLock<HashMap<MemoKey, ComptimeValue>>,
    hits: AtomicU64,
    misses: AtomicU64,
    steps: AtomicU64,
    budget_exhaustions: AtomicU64,
}

impl ComptimeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate `expr` to a value of the expected integer type, if given.
    pub fn evaluate(
        &self,
        env: &dyn ComptimeEnv,
        limits: &ComptimeConfig,
        expr: &Expr,
        hint: Option<IntType>,
    ) -> Result<ComptimeValue, ComptimeError> {
        let fp = fingerprint::of_expr(expr);
        self.memoized(env, limits, fp, false, hint, |ev| ev.eval_expr(expr, hint))
    }

    /// Evaluate a `comptime { ... }` block.
    pub fn evaluate_block(
        &self,
        env: &dyn ComptimeEnv,
        limits: &ComptimeConfig,
        block: &Block,
        hint: Option<IntType>,
    ) -> Result<ComptimeValue, ComptimeError> {
        let fp = fingerprint::of_block(block);
        self.memoized(env, limits, fp, true, hint, |ev| ev.eval_block_value(block, hint))
    }

    fn memoized(
        &self,
        env: &dyn ComptimeEnv,
        limits: &ComptimeConfig,
        fp: fingerprint::Fingerprint,
        block: bool,
        hint: Option<IntType>,
        run: impl FnOnce(&mut Evaluator<'_>) -> Result<ComptimeValue, ComptimeError>,
    ) -> Result<ComptimeValue, ComptimeError> {
        let names = fp
            .names
            .into_iter()
            .map(|name| {
                let binding = if let Some(v) = env.constant(&name) {
                    NameBinding::Const(v)
                } else if env.function(&name).is_some() {
                    NameBinding::Function
                } else if env.is_runtime(&name) {
                    NameBinding::Runtime
                } else {
                    NameBinding::Unbound
                };
                (name, binding)
            })
            .collect();
        let key = MemoKey {
            hash: fp.hash,
            block,
            hint,
            names,
        };

        let cached = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&key)
            .cloned();
        if let Some(value) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(target: "comptime", hash = key.hash, "memo hit");
            return Ok(value);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let mut evaluator = Evaluator::new(env, limits);
        let result = run(&mut evaluator);
        self.steps.fetch_add(evaluator.steps(), Ordering::Relaxed);
        match &result {
            Ok(value) => {
                self.entries
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .insert(key, value.clone());
            }
            Err(err) if err.kind == ErrorKind::ComptimeBudgetExceeded => {
                self.budget_exhaustions.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {}
        }
        result
    }

    pub fn stats(&self) -> ComptimeStats {
        ComptimeStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            steps: self.steps.load(Ordering::Relaxed),
            budget_exhaustions: self.budget_exhaustions.load(Ordering::Relaxed),
            entries: self
                .entries
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .len(),
        }
    }

    pub fn log_summary(&self, module: &str) {
        let stats = self.stats();
        debug!(
            target: "comptime",
            module,
            hits = stats.hits,
            misses = stats.misses,
            steps = stats.steps,
            budget_exhaustions = stats.budget_exhaustions,
            entries = stats.entries,
            "comptime evaluation summary"
        );
    }
}
