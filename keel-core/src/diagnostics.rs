//! Diagnostics produced by every pass, and the collector that merges them.
//!
//! Each worker appends to its own [`DiagnosticSink`]; sinks are merged into a
//! [`Diagnostics`] set at the join, which orders them by source location.

use std::collections::HashSet;
use std::fmt;

use keel_ast::Span;
use miette::{LabeledSpan, SourceSpan};
use thiserror::Error;
use tracing::warn;

/// Category of a diagnostic, grouped by the pass that detects it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    // resolver
    LayoutConflict,
    UnresolvedConstant,
    CyclicConstantDependency,
    UnknownName,
    DuplicateDeclaration,

    // ownership
    UseAfterMove,
    UseAfterFree,
    MoveWhileBorrowed,
    EscapingBorrow,
    UncheckedNullDeref,
    UseOfUninitialized,

    // comptime
    NonDeterministicComptime,
    ComptimeBudgetExceeded,
    ComptimeTrap,

    // error flow
    UnhandledErrorVariant,
    DeferOrderingHazard,
    InvalidPropagation,
    DiscardedErrorUnion,
    UnreachableErrorDefer,
}

impl ErrorKind {
    pub fn severity(&self) -> Severity {
        match self {
            ErrorKind::UnreachableErrorDefer => Severity::Recoverable,
            _ => Severity::Fatal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::LayoutConflict => "keel::layout_conflict",
            ErrorKind::UnresolvedConstant => "keel::unresolved_constant",
            ErrorKind::CyclicConstantDependency => "keel::cyclic_constant_dependency",
            ErrorKind::UnknownName => "keel::unknown_name",
            ErrorKind::DuplicateDeclaration => "keel::duplicate_declaration",
            ErrorKind::UseAfterMove => "keel::use_after_move",
            ErrorKind::UseAfterFree => "keel::use_after_free",
            ErrorKind::MoveWhileBorrowed => "keel::move_while_borrowed",
            ErrorKind::EscapingBorrow => "keel::escaping_borrow",
            ErrorKind::UncheckedNullDeref => "keel::unchecked_null_deref",
            ErrorKind::UseOfUninitialized => "keel::use_of_uninitialized",
            ErrorKind::NonDeterministicComptime => "keel::non_deterministic_comptime",
            ErrorKind::ComptimeBudgetExceeded => "keel::comptime_budget_exceeded",
            ErrorKind::ComptimeTrap => "keel::comptime_trap",
            ErrorKind::UnhandledErrorVariant => "keel::unhandled_error_variant",
            ErrorKind::DeferOrderingHazard => "keel::defer_ordering_hazard",
            ErrorKind::InvalidPropagation => "keel::invalid_propagation",
            ErrorKind::DiscardedErrorUnion => "keel::discarded_error_union",
            ErrorKind::UnreachableErrorDefer => "keel::unreachable_error_defer",
        }
    }

    /// Whether the resolver reports this kind; a fatal resolver diagnostic
    /// halts every function check of the module.
    pub fn is_resolver_kind(&self) -> bool {
        matches!(
            self,
            ErrorKind::LayoutConflict
                | ErrorKind::UnresolvedConstant
                | ErrorKind::CyclicConstantDependency
                | ErrorKind::UnknownName
                | ErrorKind::DuplicateDeclaration
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Fatal diagnostics block code generation for the module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Recoverable,
    Fatal,
}

impl Severity {
    pub fn display(&self) -> &'static str {
        match self {
            Severity::Recoverable => "warning",
            Severity::Fatal => "error",
        }
    }
}

/// Secondary location, e.g. where a binding was moved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Related {
    pub span: Span,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub span: Span,
    pub message: String,
    pub related: Vec<Related>,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: ErrorKind, span: Span, message: impl Into<String>) -> Self {
        Diagnostic {
            kind,
            severity: kind.severity(),
            span,
            message: message.into(),
            related: Vec::new(),
            help: None,
        }
    }

    pub fn with_related(mut self, span: Span, message: impl Into<String>) -> Self {
        self.related.push(Related {
            span,
            message: message.into(),
        });
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }

    /// One-line rendering used by [`Diagnostics::report`].
    pub fn display(&self) -> String {
        let mut out = format!(
            "{}[{}] at {}: {}",
            self.severity.display(),
            self.kind,
            self.span.offset(),
            self.message
        );
        for rel in &self.related {
            out.push_str(&format!("\n  note at {}: {}", rel.span.offset(), rel.message));
        }
        if let Some(help) = &self.help {
            out.push_str(&format!("\n  help: {help}"));
        }
        out
    }

    fn sort_key(&self) -> (usize, usize, ErrorKind) {
        (self.span.offset(), self.span.len(), self.kind)
    }
}

impl miette::Diagnostic for Diagnostic {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.kind.code()))
    }

    fn severity(&self) -> Option<miette::Severity> {
        Some(match self.severity {
            Severity::Fatal => miette::Severity::Error,
            Severity::Recoverable => miette::Severity::Warning,
        })
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        self.help
            .as_ref()
            .map(|h| Box::new(h) as Box<dyn fmt::Display + 'a>)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let primary = LabeledSpan::new_primary_with_span(None, SourceSpan::from(self.span));
        let related = self
            .related
            .iter()
            .map(|r| LabeledSpan::new_with_span(Some(r.message.clone()), r.span));
        Some(Box::new(std::iter::once(primary).chain(related)))
    }
}

/// Append-only buffer owned by a single worker.
///
/// Identical diagnostics (same kind, span and message) are collapsed; loop
/// bodies are walked more than once and would otherwise report twice.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    items: Vec<Diagnostic>,
    seen: HashSet<(ErrorKind, usize, usize, String)>,
    limit: Option<usize>,
    truncated: bool,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        DiagnosticSink {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        let key = (
            diagnostic.kind,
            diagnostic.span.offset(),
            diagnostic.span.len(),
            diagnostic.message.clone(),
        );
        if !self.seen.insert(key) {
            return;
        }
        if let Some(limit) = self.limit {
            if self.items.len() >= limit {
                if !self.truncated {
                    warn!(limit, "diagnostic limit reached; further diagnostics dropped");
                    self.truncated = true;
                }
                return;
            }
        }
        self.items.push(diagnostic);
    }

    pub fn report(&mut self, kind: ErrorKind, span: Span, message: impl Into<String>) {
        self.push(Diagnostic::new(kind, span, message));
    }

    pub fn has_fatal(&self) -> bool {
        self.items.iter().any(Diagnostic::is_fatal)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}

/// The ordered diagnostic set handed to the reporting layer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge worker buffers and order the result by source location.
    pub fn merge(sinks: impl IntoIterator<Item = DiagnosticSink>) -> Self {
        let mut items: Vec<Diagnostic> = sinks.into_iter().flat_map(DiagnosticSink::into_vec).collect();
        items.sort_by_key(Diagnostic::sort_key);
        Diagnostics { items }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_fatal(&self) -> bool {
        self.items.iter().any(Diagnostic::is_fatal)
    }

    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.items.iter().filter(|d| d.is_fatal()).collect()
    }

    pub fn of_kind(&self, kind: ErrorKind) -> Vec<&Diagnostic> {
        self.items.iter().filter(|d| d.kind == kind).collect()
    }

    pub fn contains_kind(&self, kind: ErrorKind) -> bool {
        self.items.iter().any(|d| d.kind == kind)
    }

    pub fn kinds(&self) -> Vec<ErrorKind> {
        self.items.iter().map(|d| d.kind).collect()
    }

    /// Report all diagnostics as formatted strings.
    pub fn report(&self) -> String {
        let mut output = String::new();
        for diag in &self.items {
            output.push_str(&diag.display());
            output.push('\n');
        }
        output
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
