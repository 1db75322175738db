#![forbid(unsafe_code)]

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Failure to load a [`crate::CheckConfig`].
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("cannot read check config {path}")]
    #[diagnostic(code(keel::config::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed check config")]
    #[diagnostic(code(keel::config::parse))]
    Parse(#[from] toml::de::Error),

    #[error("invalid check config: {message}")]
    #[diagnostic(code(keel::config::invalid))]
    Invalid { message: String },
}
