#![forbid(unsafe_code)]

//! Semantic core of the keel front end.
//!
//! [`check`] resolves a parsed [`keel_ast::Module`], then verifies ownership,
//! comptime evaluation and error-union flow for every function body. The
//! result is an [`AnnotatedModule`] for code generation and the ordered
//! [`Diagnostics`] for the driver.

pub mod annotate;
mod check;
pub mod comptime;
pub mod config;
pub mod diagnostics;
mod error;
pub mod ownership;
pub mod resolve;
pub mod types;

pub use annotate::{AnnotatedModule, BindingTrace, FunctionFacts};
pub use check::{check, check_with_config};
pub use comptime::{ComptimeCache, ComptimeValue};
pub use config::{CheckConfig, ComptimeConfig, TargetConfig};
pub use diagnostics::{Diagnostic, Diagnostics, ErrorKind, Severity};
pub use error::ConfigError;
pub use ownership::OwnershipState;
pub use resolve::{ModuleTables, resolve_module};
pub use types::{IntType, Type};
