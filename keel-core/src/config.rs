#![forbid(unsafe_code)]

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Knobs for one `check` invocation.
///
/// ```toml
/// parallel = true
/// max_diagnostics_per_function = 64
///
/// [comptime]
/// max_steps = 100000
/// max_call_depth = 64
///
/// [target]
/// pointer_width = 64
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckConfig {
    /// Check function bodies on the rayon pool.
    pub parallel: bool,
    pub max_diagnostics_per_function: usize,
    pub comptime: ComptimeConfig,
    pub target: TargetConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComptimeConfig {
    /// Evaluation steps allowed per top-level comptime evaluation.
    pub max_steps: u64,
    pub max_call_depth: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetConfig {
    /// Bits; pointers, `usize` and `isize` follow it.
    pub pointer_width: u16,
}

impl Default for CheckConfig {
    fn default() -> Self {
        CheckConfig {
            parallel: true,
            max_diagnostics_per_function: 256,
            comptime: ComptimeConfig::default(),
            target: TargetConfig::default(),
        }
    }
}

impl Default for ComptimeConfig {
    fn default() -> Self {
        ComptimeConfig {
            max_steps: 1_000_000,
            max_call_depth: 64,
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        TargetConfig { pointer_width: 64 }
    }
}

impl CheckConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: CheckConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.target.pointer_width, 32 | 64) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "target.pointer_width must be 32 or 64, got {}",
                    self.target.pointer_width
                ),
            });
        }
        if self.comptime.max_steps == 0 {
            return Err(ConfigError::Invalid {
                message: "comptime.max_steps must be positive".to_string(),
            });
        }
        if self.max_diagnostics_per_function == 0 {
            return Err(ConfigError::Invalid {
                message: "max_diagnostics_per_function must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn pointer_bytes(&self) -> u64 {
        u64::from(self.target.pointer_width / 8)
    }
}
