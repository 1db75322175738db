//! Facts handed to code generation once a module has been checked.

use std::sync::Arc;

use keel_ast::{Module, Span};

use crate::comptime::ComptimeValue;
use crate::ownership::{OwnershipState, Transition};
use crate::resolve::ModuleTables;
use crate::types::{StructLayout, Type};

/// Ownership history of one binding, in program order. Drop insertion reads
/// the last state a binding holds on each path.
#[derive(Clone, Debug, PartialEq)]
pub struct BindingTrace {
    pub name: String,
    pub span: Span,
    pub ty: Option<Type>,
    pub transitions: Vec<Transition>,
}

impl BindingTrace {
    pub fn states(&self) -> Vec<OwnershipState> {
        self.transitions.iter().map(|t| t.state).collect()
    }

    pub fn reaches(&self, state: OwnershipState) -> bool {
        self.transitions.iter().any(|t| t.state == state)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionFacts {
    pub name: String,
    pub bindings: Vec<BindingTrace>,
    /// Values of `comptime` blocks and block-level constants, keyed by the
    /// span of the construct they replace.
    pub comptime_values: Vec<(Span, ComptimeValue)>,
}

impl FunctionFacts {
    pub fn binding(&self, name: &str) -> Option<&BindingTrace> {
        self.bindings.iter().find(|b| b.name == name)
    }
}

#[derive(Debug)]
pub struct AnnotatedModule<'m> {
    pub module: &'m Module,
    pub tables: Arc<ModuleTables>,
    pub functions: Vec<FunctionFacts>,
    fatal: bool,
}

impl<'m> AnnotatedModule<'m> {
    pub(crate) fn new(
        module: &'m Module,
        tables: Arc<ModuleTables>,
        functions: Vec<FunctionFacts>,
        fatal: bool,
    ) -> Self {
        AnnotatedModule {
            module,
            tables,
            functions,
            fatal,
        }
    }

    /// Code generation may only run when no fatal diagnostic was reported.
    pub fn ready_for_codegen(&self) -> bool {
        !self.fatal
    }

    pub fn function(&self, name: &str) -> Option<&FunctionFacts> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn trace(&self, function: &str, binding: &str) -> Option<&BindingTrace> {
        self.function(function)?.binding(binding)
    }

    pub fn struct_layout(&self, name: &str) -> Option<&StructLayout> {
        self.tables.struct_layout(name)
    }

    pub fn const_value(&self, name: &str) -> Option<&ComptimeValue> {
        self.tables.const_value(name)
    }

    /// The value that replaces the comptime construct at `span`.
    pub fn comptime_value(&self, span: Span) -> Option<&ComptimeValue> {
        self.functions
            .iter()
            .flat_map(|f| f.comptime_values.iter())
            .find(|(at, _)| *at == span)
            .map(|(_, v)| v)
            .or_else(|| {
                self.tables
                    .consts
                    .values()
                    .find(|c| c.span == span)
                    .map(|c| &c.value)
            })
    }
}
