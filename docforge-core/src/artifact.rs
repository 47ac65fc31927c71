//! Artifact Builder - Compile Result to Distributable Bytes
//!
//! Markdown, text and HTML are built synchronously. PDF goes through the
//! injected renderer and is the only async step.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::hashing::{canonical_json, sha256_hex};
use crate::html::{escape_attr, escape_text, render_sanitized};
use crate::pdf::{PdfRenderError, PdfRenderOptions, PdfRenderer};
use crate::pipeline::CompileResult;
use crate::recipes::{ExportRecipe, RecipeKind, UnknownRecipeKind};
use crate::ENGINE_VERSION;

pub const PROVENANCE_META_NAME: &str = "docforge-provenance";

pub const CONTENT_SECURITY_POLICY: &str =
    "default-src 'none'; img-src https: data:; style-src 'unsafe-inline'; base-uri 'none'; form-action 'none'";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Unsupported recipe type: {0}")]
    UnsupportedRecipe(String),

    #[error("PDF export requested but no renderer is configured")]
    RendererNotConfigured,

    #[error("PDF rendering timed out after {0} ms")]
    PdfTimeout(u64),

    #[error("PDF rendering failed: {0}")]
    PdfRender(#[from] PdfRenderError),

    #[error("Invalid PDF settings: {0}")]
    InvalidPdfSettings(String),

    #[error("Recipe {0} requires engine >= {1}, current is {2}")]
    EngineVersionMismatch(String, String, String),

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<UnknownRecipeKind> for ExportError {
    fn from(err: UnknownRecipeKind) -> Self {
        ExportError::UnsupportedRecipe(err.0)
    }
}

/// Output bytes plus deterministic metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub body: Vec<u8>,
    pub content_type: String,
    pub extension: String,
    pub metadata: BTreeMap<String, String>,
}

impl ExportArtifact {
    pub fn hash(&self) -> Option<&str> {
        self.metadata.get("artifactHash").map(String::as_str)
    }
}

/// Envelope around an artifact for callers. Carries the only wall-clock
/// and random values in the export path; none of it is hashed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReceipt {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub content_type: String,
    pub extension: String,
    pub metadata: BTreeMap<String, String>,
    pub body_base64: String,
}

impl ExportReceipt {
    pub fn new(artifact: &ExportArtifact) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            content_type: artifact.content_type.clone(),
            extension: artifact.extension.clone(),
            metadata: artifact.metadata.clone(),
            body_base64: STANDARD.encode(&artifact.body),
        }
    }
}

/// Per-call export options.
#[derive(Debug, Clone, Default)]
pub struct ExportContext {
    /// Overrides the builder's PDF timeout.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

fn base_metadata(result: &CompileResult, recipe: &ExportRecipe) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert("documentId".to_string(), result.document_id.clone());
    metadata.insert("recipeId".to_string(), recipe.id.clone());
    metadata.insert("recipeKind".to_string(), recipe.kind.as_str().to_string());
    metadata.insert("compileHash".to_string(), result.hash.clone());
    metadata.insert("provenanceCount".to_string(), result.provenance.len().to_string());
    metadata.insert("engineVersion".to_string(), ENGINE_VERSION.to_string());
    metadata
}

fn finish(body: Vec<u8>, kind: RecipeKind, mut metadata: BTreeMap<String, String>) -> ExportArtifact {
    metadata.insert("artifactHash".to_string(), sha256_hex(&body));
    ExportArtifact {
        body,
        content_type: kind.content_type().to_string(),
        extension: kind.extension().to_string(),
        metadata,
    }
}

pub fn markdown_artifact(result: &CompileResult, recipe: &ExportRecipe) -> ExportArtifact {
    finish(
        result.markdown.as_bytes().to_vec(),
        RecipeKind::Markdown,
        base_metadata(result, recipe),
    )
}

pub fn text_artifact(result: &CompileResult, recipe: &ExportRecipe) -> ExportArtifact {
    finish(
        result.text.as_bytes().to_vec(),
        RecipeKind::Text,
        base_metadata(result, recipe),
    )
}

/// Sanitized body HTML and the full standalone document around it.
pub struct HtmlDocument {
    pub inner: String,
    pub full: String,
}

pub fn html_document(result: &CompileResult) -> Result<HtmlDocument, ExportError> {
    let inner = render_sanitized(&result.markdown);
    let provenance = STANDARD.encode(canonical_json(&result.provenance)?);

    let full = format!(
        concat!(
            "<!DOCTYPE html>\n",
            "<html lang=\"en\">\n",
            "<head>\n",
            "<meta charset=\"utf-8\">\n",
            "<meta http-equiv=\"Content-Security-Policy\" content=\"{csp}\">\n",
            "<meta name=\"{meta}\" content=\"{provenance}\">\n",
            "<title>{title}</title>\n",
            "</head>\n",
            "<body>\n",
            "<article>\n{inner}</article>\n",
            "</body>\n",
            "</html>\n"
        ),
        csp = escape_attr(CONTENT_SECURITY_POLICY),
        meta = PROVENANCE_META_NAME,
        provenance = provenance,
        title = escape_text(&result.title),
        inner = inner,
    );

    Ok(HtmlDocument { inner, full })
}

pub fn html_artifact(result: &CompileResult, recipe: &ExportRecipe) -> Result<ExportArtifact, ExportError> {
    let document = html_document(result)?;
    let mut metadata = base_metadata(result, recipe);
    metadata.insert("htmlHash".to_string(), sha256_hex(document.inner.as_bytes()));
    Ok(finish(document.full.into_bytes(), RecipeKind::Html, metadata))
}

/// Reject recipes that need a newer engine.
pub fn check_engine_version(recipe: &ExportRecipe) -> Result<(), ExportError> {
    let Some(min) = recipe.engine_min_version.as_deref() else {
        return Ok(());
    };
    let engine_ver = semver::Version::parse(ENGINE_VERSION)
        .map_err(|_| ExportError::InvalidVersion(ENGINE_VERSION.to_string()))?;
    let min_ver = semver::Version::parse(min)
        .map_err(|_| ExportError::InvalidVersion(min.to_string()))?;

    if engine_ver < min_ver {
        return Err(ExportError::EngineVersionMismatch(
            recipe.id.clone(),
            min.to_string(),
            ENGINE_VERSION.to_string(),
        ));
    }
    Ok(())
}

pub struct ArtifactBuilder {
    pdf_renderer: Option<Arc<dyn PdfRenderer>>,
    pdf_timeout: Duration,
}

impl ArtifactBuilder {
    pub fn new() -> Self {
        Self {
            pdf_renderer: None,
            pdf_timeout: Duration::from_millis(30_000),
        }
    }

    pub fn with_pdf_renderer(mut self, renderer: Arc<dyn PdfRenderer>) -> Self {
        self.pdf_renderer = Some(renderer);
        self
    }

    pub fn with_pdf_timeout(mut self, timeout: Duration) -> Self {
        self.pdf_timeout = timeout;
        self
    }

    /// Build the artifact the recipe asks for.
    pub async fn build(
        &self,
        result: &CompileResult,
        recipe: &ExportRecipe,
        ctx: &ExportContext,
    ) -> Result<ExportArtifact, ExportError> {
        check_engine_version(recipe)?;

        let artifact = match recipe.kind {
            RecipeKind::Markdown => markdown_artifact(result, recipe),
            RecipeKind::Text => text_artifact(result, recipe),
            RecipeKind::Html => html_artifact(result, recipe)?,
            RecipeKind::Pdf => self.pdf_artifact(result, recipe, ctx).await?,
        };

        info!(
            document = %result.document_id,
            recipe = %recipe.id,
            kind = %recipe.kind,
            bytes = artifact.body.len(),
            "artifact built"
        );
        Ok(artifact)
    }

    async fn pdf_artifact(
        &self,
        result: &CompileResult,
        recipe: &ExportRecipe,
        ctx: &ExportContext,
    ) -> Result<ExportArtifact, ExportError> {
        let renderer = self
            .pdf_renderer
            .as_ref()
            .ok_or(ExportError::RendererNotConfigured)?;

        let settings = recipe
            .pdf
            .clone()
            .unwrap_or_default()
            .validated()
            .map_err(|e| ExportError::InvalidPdfSettings(e.to_string()))?;

        let document = html_document(result)?;
        let timeout = ctx.timeout.unwrap_or(self.pdf_timeout);
        let options = PdfRenderOptions {
            timeout,
            cancel: ctx.cancel.clone(),
            settings,
        };

        debug!(recipe = %recipe.id, timeout_ms = timeout.as_millis() as u64, "delegating to PDF renderer");
        let bytes = tokio::time::timeout(timeout, renderer.render(&document.full, &options))
            .await
            .map_err(|_| ExportError::PdfTimeout(timeout.as_millis() as u64))??;

        let mut metadata = base_metadata(result, recipe);
        metadata.insert("htmlHash".to_string(), sha256_hex(document.inner.as_bytes()));
        Ok(finish(bytes, RecipeKind::Pdf, metadata))
    }
}

impl Default for ArtifactBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::PreflightReport;
    use crate::model::TransclusionMode;
    use crate::transclusion::ProvenanceEntry;
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    fn result(markdown: &str) -> CompileResult {
        CompileResult {
            document_id: "doc-1".into(),
            title: "Q3 <Report> & \"Notes\"".into(),
            markdown: markdown.into(),
            text: "plain\n".into(),
            hash: sha256_hex(markdown.as_bytes()),
            provenance: vec![ProvenanceEntry {
                snippet_id: "s1".into(),
                revision: 2,
                hash: "abc".into(),
                mode: TransclusionMode::Inline,
                path: "legal/s1".into(),
            }],
            diagnostics: vec![],
            preflight: PreflightReport::from_issues(vec![]),
        }
    }

    struct FixedRenderer;

    #[async_trait]
    impl PdfRenderer for FixedRenderer {
        async fn render(&self, html: &str, options: &PdfRenderOptions) -> Result<Vec<u8>, PdfRenderError> {
            assert!(html.starts_with("<!DOCTYPE html>"));
            assert_eq!(options.settings.margin_mm, 15.0);
            Ok(b"%PDF-1.7 fake".to_vec())
        }
    }

    struct SlowRenderer;

    #[async_trait]
    impl PdfRenderer for SlowRenderer {
        async fn render(&self, _html: &str, _options: &PdfRenderOptions) -> Result<Vec<u8>, PdfRenderError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![])
        }
    }

    struct CancelAwareRenderer;

    #[async_trait]
    impl PdfRenderer for CancelAwareRenderer {
        async fn render(&self, _html: &str, options: &PdfRenderOptions) -> Result<Vec<u8>, PdfRenderError> {
            match &options.cancel {
                Some(token) if token.is_cancelled() => Err(PdfRenderError::Cancelled),
                _ => Ok(b"%PDF".to_vec()),
            }
        }
    }

    #[test]
    fn test_markdown_and_text_metadata() {
        let r = result("# Hi\n");
        let md = markdown_artifact(&r, &ExportRecipe::new("md", RecipeKind::Markdown));
        assert_eq!(md.body, b"# Hi\n");
        assert_eq!(md.extension, "md");
        assert_eq!(md.metadata["compileHash"], r.hash);
        assert_eq!(md.metadata["provenanceCount"], "1");
        assert_eq!(md.hash(), Some(sha256_hex(b"# Hi\n").as_str()));

        let txt = text_artifact(&r, &ExportRecipe::new("txt", RecipeKind::Text));
        assert_eq!(txt.body, b"plain\n");
        assert_eq!(txt.content_type, "text/plain; charset=utf-8");
    }

    #[test]
    fn test_html_document_shell() {
        let r = result("# Hi\n\n<script>alert(1)</script>\n\n[x](https://x.example)\n");
        let artifact = html_artifact(&r, &ExportRecipe::new("web", RecipeKind::Html)).unwrap();
        let html = String::from_utf8(artifact.body.clone()).unwrap();

        assert!(!html.contains("<script"));
        assert!(html.contains("<h1>Hi</h1>"));
        assert!(html.contains("<title>Q3 &lt;Report&gt; &amp; \"Notes\"</title>"));
        assert!(html.contains("Content-Security-Policy"));

        let expected = STANDARD.encode(canonical_json(&r.provenance).unwrap());
        assert!(html.contains(&format!("<meta name=\"docforge-provenance\" content=\"{}\">", expected)));
        assert!(artifact.metadata.contains_key("htmlHash"));
        assert_ne!(artifact.metadata["htmlHash"], artifact.metadata["artifactHash"]);
    }

    #[tokio::test]
    async fn test_pdf_requires_renderer() {
        let err = ArtifactBuilder::new()
            .build(&result("x\n"), &ExportRecipe::new("print", RecipeKind::Pdf), &ExportContext::default())
            .await
            .unwrap_err();
        assert_matches!(err, ExportError::RendererNotConfigured);
    }

    #[tokio::test]
    async fn test_pdf_delegates_to_renderer() {
        let builder = ArtifactBuilder::new().with_pdf_renderer(Arc::new(FixedRenderer));
        let artifact = builder
            .build(&result("x\n"), &ExportRecipe::new("print", RecipeKind::Pdf), &ExportContext::default())
            .await
            .unwrap();

        assert_eq!(artifact.body, b"%PDF-1.7 fake");
        assert_eq!(artifact.content_type, "application/pdf");
        assert_eq!(artifact.metadata["artifactHash"], sha256_hex(b"%PDF-1.7 fake"));
        assert!(artifact.metadata.contains_key("htmlHash"));
    }

    #[tokio::test]
    async fn test_pdf_timeout() {
        let builder = ArtifactBuilder::new().with_pdf_renderer(Arc::new(SlowRenderer));
        let ctx = ExportContext {
            timeout: Some(Duration::from_millis(20)),
            cancel: None,
        };
        let err = builder
            .build(&result("x\n"), &ExportRecipe::new("print", RecipeKind::Pdf), &ctx)
            .await
            .unwrap_err();
        assert_matches!(err, ExportError::PdfTimeout(20));
    }

    #[tokio::test]
    async fn test_cancellation_reaches_renderer() {
        let builder = ArtifactBuilder::new().with_pdf_renderer(Arc::new(CancelAwareRenderer));
        let token = CancellationToken::new();
        token.cancel();
        let ctx = ExportContext { timeout: None, cancel: Some(token) };

        let err = builder
            .build(&result("x\n"), &ExportRecipe::new("print", RecipeKind::Pdf), &ctx)
            .await
            .unwrap_err();
        assert_matches!(err, ExportError::PdfRender(PdfRenderError::Cancelled));
    }

    #[tokio::test]
    async fn test_engine_version_gate() {
        let mut recipe = ExportRecipe::new("future", RecipeKind::Markdown);
        recipe.engine_min_version = Some("99.0.0".into());
        let err = ArtifactBuilder::new()
            .build(&result("x\n"), &recipe, &ExportContext::default())
            .await
            .unwrap_err();
        assert_matches!(err, ExportError::EngineVersionMismatch(..));
    }

    #[test]
    fn test_unknown_recipe_kind_maps_to_unsupported() {
        let err = ExportError::from("docx".parse::<RecipeKind>().unwrap_err());
        assert_eq!(err.to_string(), "Unsupported recipe type: docx");
        assert_matches!(err, ExportError::UnsupportedRecipe(kind) if kind == "docx");
    }
}
