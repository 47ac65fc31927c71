//! Engine Configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::transclusion::DEFAULT_MAX_DEPTH;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Line terminator of compiled output, `\n` or `\r\n`.
    #[serde(default = "default_newline")]
    pub newline: String,
    #[serde(default)]
    pub include_comments: bool,
    #[serde(default = "default_max_depth")]
    pub max_transclusion_depth: usize,
    #[serde(default = "default_pdf_timeout_ms")]
    pub pdf_timeout_ms: u64,
}

fn default_newline() -> String { "\n".to_string() }
fn default_max_depth() -> usize { DEFAULT_MAX_DEPTH }
fn default_pdf_timeout_ms() -> u64 { 30_000 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            newline: default_newline(),
            include_comments: false,
            max_transclusion_depth: default_max_depth(),
            pdf_timeout_ms: default_pdf_timeout_ms(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.newline != "\n" && self.newline != "\r\n" {
            return Err(ConfigError::Invalid(format!(
                "newline must be \\n or \\r\\n, got {:?}",
                self.newline
            )));
        }
        if self.max_transclusion_depth == 0 {
            return Err(ConfigError::Invalid("maxTransclusionDepth must be at least 1".into()));
        }
        if self.pdf_timeout_ms == 0 {
            return Err(ConfigError::Invalid("pdfTimeoutMs must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn pdf_timeout(&self) -> Duration {
        Duration::from_millis(self.pdf_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.pdf_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_newline_rejected() {
        let err = EngineConfig::from_json(r#"{"newline": "\t"}"#).unwrap_err();
        assert_matches!(err, ConfigError::Invalid(_));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docforge.json");
        fs::write(&path, r#"{"newline": "\r\n", "includeComments": true, "maxTransclusionDepth": 4}"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.newline, "\r\n");
        assert!(config.include_comments);
        assert_eq!(config.max_transclusion_depth, 4);

        assert_matches!(
            EngineConfig::load(&dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        );
    }
}
