//! PDF Rendering Boundary
//!
//! The engine never produces PDF bytes itself. It hands sanitized HTML to an
//! injected renderer together with a timeout, an optional cancellation
//! token and the recipe's page settings.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSize {
    #[default]
    A4,
    Letter,
    Legal,
}

/// Page options carried by a PDF recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfSettings {
    #[serde(default)]
    pub page_size: PageSize,
    #[serde(default)]
    pub landscape: bool,
    #[serde(default = "default_margin_mm")]
    pub margin_mm: f64,
    #[serde(default)]
    pub header_template: Option<String>,
    #[serde(default)]
    pub footer_template: Option<String>,
}

fn default_margin_mm() -> f64 { 15.0 }

impl Default for PdfSettings {
    fn default() -> Self {
        Self {
            page_size: PageSize::A4,
            landscape: false,
            margin_mm: default_margin_mm(),
            header_template: None,
            footer_template: None,
        }
    }
}

impl PdfSettings {
    /// Recipe-provided settings, checked before they reach a renderer.
    pub fn validated(self) -> Result<Self, &'static str> {
        if !self.margin_mm.is_finite() || self.margin_mm < 0.0 || self.margin_mm > 100.0 {
            return Err("Margin must be between 0 and 100 mm");
        }
        Ok(self)
    }
}

/// Everything a renderer receives besides the HTML.
#[derive(Debug, Clone)]
pub struct PdfRenderOptions {
    pub timeout: Duration,
    /// Renderers are expected to stop work once this fires.
    pub cancel: Option<CancellationToken>,
    pub settings: PdfSettings,
}

#[derive(Debug, Error)]
pub enum PdfRenderError {
    #[error("Render cancelled")]
    Cancelled,

    #[error("Renderer failed: {0}")]
    Failed(String),
}

/// External PDF backend.
#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn render(&self, html: &str, options: &PdfRenderOptions) -> Result<Vec<u8>, PdfRenderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings: PdfSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, PdfSettings::default());
        assert_eq!(settings.margin_mm, 15.0);
    }

    #[test]
    fn test_margin_bounds() {
        let bad = PdfSettings { margin_mm: -1.0, ..Default::default() };
        assert!(bad.validated().is_err());
        let wide = PdfSettings { margin_mm: 250.0, ..Default::default() };
        assert!(wide.validated().is_err());
        assert!(PdfSettings::default().validated().is_ok());
    }
}
