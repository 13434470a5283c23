//! Compiler configuration, loadable from TOML.
//!
//! ```toml
//! opt_level = "speed"
//! verify = true
//! dump_ir = false
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    None,
    #[default]
    Speed,
    SpeedAndSize,
}

impl OptLevel {
    /// Value of Cranelift's `opt_level` setting.
    pub fn as_str(self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    pub opt_level: OptLevel,
    /// Run the Cranelift IR verifier on every translation unit.
    pub verify: bool,
    /// Emit each synthesized function at `trace` level.
    pub dump_ir: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::Speed,
            verify: true,
            dump_ir: false,
        }
    }
}

impl CompilerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = CompilerConfig::from_toml_str("").expect("parse");
        assert_eq!(config, CompilerConfig::default());
    }

    #[test]
    fn reads_every_field() {
        let config = CompilerConfig::from_toml_str(
            "opt_level = \"speed_and_size\"\nverify = false\ndump_ir = true\n",
        )
        .expect("parse");
        assert_eq!(config.opt_level, OptLevel::SpeedAndSize);
        assert!(!config.verify);
        assert!(config.dump_ir);
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = CompilerConfig::from_toml_str("inline = true").expect_err("unknown key");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_unknown_opt_levels() {
        assert!(CompilerConfig::from_toml_str("opt_level = \"fastest\"").is_err());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = CompilerConfig::load("/nonexistent/ouro.toml").expect_err("missing");
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
