//! Compilation Pipeline - Single Entry Point
//!
//! CRITICAL: compile MUST run preflight internally and embed the report.
//! Preflight errors never abort a compile; export refuses them.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::artifact::{ArtifactBuilder, ExportArtifact, ExportContext, ExportError};
use crate::config::EngineConfig;
use crate::diagnostics::{codes, CompilerDiagnostic, PreflightReport, Severity};
use crate::formatters::{quote_lines, FilterContext, FilterRegistry, FormatContext, FormatterRegistry};
use crate::hashing::compute_content_hash;
use crate::index::SnippetIndex;
use crate::model::{Block, BlockContent, DocumentModel, SnippetBundle, TransclusionMode};
use crate::preflight::{PreflightInput, PreflightValidator};
use crate::recipes::ExportRecipe;
use crate::text::{
    apply_newline, ensure_terminal_newline, markdown_to_text, normalize_newlines,
    trim_trailing_whitespace,
};
use crate::transclusion::{missing_marker, ProvenanceEntry, ProvenanceLog, TransclusionState, Transcluder};
use crate::variables::{resolve_variables, substitute, ResolvedVariables, VariableValues};

/// Output of a divider block.
pub const DIVIDER_MARKER: &str = "---";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Preflight failed with {errors} error(s): {}", .codes.join(", "))]
    PreflightFailed { errors: usize, codes: Vec<String> },

    #[error(transparent)]
    Export(#[from] ExportError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
    pub document: DocumentModel,
    #[serde(default)]
    pub bundles: Vec<SnippetBundle>,
    #[serde(default)]
    pub variables: VariableValues,
    #[serde(default)]
    pub allowed_statuses: Vec<String>,
    /// Falls back to the engine config when absent.
    #[serde(default)]
    pub include_comments: Option<bool>,
    #[serde(default)]
    pub newline: Option<String>,
}

impl CompileRequest {
    pub fn new(document: DocumentModel) -> Self {
        Self {
            document,
            bundles: vec![],
            variables: VariableValues::new(),
            allowed_statuses: vec![],
            include_comments: None,
            newline: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompileResult {
    pub document_id: String,
    pub title: String,
    pub markdown: String,
    pub text: String,
    pub hash: String,
    pub provenance: Vec<ProvenanceEntry>,
    pub diagnostics: Vec<CompilerDiagnostic>,
    pub preflight: PreflightReport,
}

/// The compilation pipeline - single entry point for document operations
pub struct CompilationPipeline {
    formatters: FormatterRegistry,
    filters: FilterRegistry,
    validator: PreflightValidator,
    config: EngineConfig,
}

/// Per-compile state shared by block dispatch.
struct BlockRun<'r> {
    document: &'r DocumentModel,
    index: &'r SnippetIndex,
    variables: &'r ResolvedVariables,
    include_comments: bool,
    provenance: ProvenanceLog,
    diagnostics: Vec<CompilerDiagnostic>,
}

impl CompilationPipeline {
    pub fn new(formatters: FormatterRegistry, filters: FilterRegistry) -> Self {
        Self {
            formatters,
            filters,
            validator: PreflightValidator::new(),
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run preflight on its own, exactly as compile would.
    pub fn preflight(&self, request: &CompileRequest) -> PreflightReport {
        let index = SnippetIndex::build(&request.bundles);
        let variables = resolve_variables(&request.document.variables, &request.variables);
        self.run_preflight(request, &index, &variables)
    }

    fn run_preflight(
        &self,
        request: &CompileRequest,
        index: &SnippetIndex,
        variables: &ResolvedVariables,
    ) -> PreflightReport {
        self.validator.validate(&PreflightInput {
            document: &request.document,
            index,
            variables,
            allowed_statuses: &request.allowed_statuses,
        })
    }

    /// Compile a document
    ///
    /// CRITICAL: This ALWAYS runs preflight. No bypass possible.
    pub fn compile(&self, request: &CompileRequest) -> CompileResult {
        let document = &request.document;
        info!(document = %document.id, blocks = document.blocks.len(), "compile started");

        let index = SnippetIndex::build(&request.bundles);
        let variables = resolve_variables(&document.variables, &request.variables);

        // MANDATORY: preflight is always run and embedded.
        let preflight = self.run_preflight(request, &index, &variables);

        let mut run = BlockRun {
            document,
            index: &index,
            variables: &variables,
            include_comments: request.include_comments.unwrap_or(self.config.include_comments),
            provenance: ProvenanceLog::new(),
            diagnostics: Vec::new(),
        };

        let outputs: Vec<String> = document
            .ordered_blocks()
            .into_iter()
            .filter_map(|block| self.compile_block(block, &mut run))
            .filter(|out| !out.trim().is_empty())
            .collect();

        let joined = trim_trailing_whitespace(&normalize_newlines(&outputs.join("\n\n")));
        let filter_ctx = FilterContext {
            document,
            variables: &variables,
        };
        let filtered = self.filters.apply(joined, &filter_ctx, &mut run.diagnostics);
        let normalized = ensure_terminal_newline(&trim_trailing_whitespace(&normalize_newlines(&filtered)));

        let newline = request.newline.as_deref().unwrap_or(&self.config.newline);
        let text = apply_newline(&markdown_to_text(&normalized), newline);
        let markdown = apply_newline(&normalized, newline);
        let hash = compute_content_hash(&markdown);

        let BlockRun {
            provenance,
            diagnostics,
            ..
        } = run;

        info!(
            document = %document.id,
            hash = %hash,
            provenance = provenance.len(),
            diagnostics = diagnostics.len(),
            preflight_errors = preflight.errors,
            "compile finished"
        );

        CompileResult {
            document_id: document.id.clone(),
            title: document.title.clone(),
            markdown,
            text,
            hash,
            provenance: provenance.into_sorted(),
            diagnostics,
            preflight,
        }
    }

    fn compile_block(&self, block: &Block, run: &mut BlockRun<'_>) -> Option<String> {
        let path = format!("blocks/{}", block.id);
        let index = run.index;
        let transcluder = Transcluder::new(index, self.config.max_transclusion_depth);

        let expanded = match &block.content {
            BlockContent::Markdown { body } => {
                let mut state = TransclusionState {
                    provenance: &mut run.provenance,
                    diagnostics: &mut run.diagnostics,
                    origin: path.clone(),
                };
                transcluder.expand(body, &mut Vec::new(), &mut state)
            }
            BlockContent::Snippet {
                snippet_id,
                revision,
                mode,
            } => match index.resolve(snippet_id, *revision) {
                Some(resolved) => {
                    run.provenance.record(&resolved, *mode);
                    let mut state = TransclusionState {
                        provenance: &mut run.provenance,
                        diagnostics: &mut run.diagnostics,
                        origin: path.clone(),
                    };
                    let body = transcluder.expand_snippet(&resolved, &mut state);
                    match mode {
                        TransclusionMode::Inline => body,
                        TransclusionMode::Quote => quote_lines(&body),
                    }
                }
                None => {
                    let reference = match revision {
                        Some(rev) => format!("{}@{}", snippet_id, rev),
                        None => snippet_id.clone(),
                    };
                    run.diagnostics.push(
                        CompilerDiagnostic::error(
                            codes::SNIPPET_UNRESOLVED,
                            format!("Snippet block references unknown snippet '{}'", reference),
                        )
                        .at(path.clone())
                        .with_details(serde_json::json!({ "reference": reference })),
                    );
                    missing_marker(&reference)
                }
            },
            BlockContent::Divider => return Some(DIVIDER_MARKER.to_string()),
            BlockContent::Comment { body } => {
                return run.include_comments.then(|| body.clone());
            }
            BlockContent::Group { .. } => {
                debug!(block = %block.id, "group block produces no output");
                return None;
            }
        };

        let substituted = substitute(&expanded, run.variables, &path, &mut run.diagnostics);
        let ctx = FormatContext {
            document: run.document,
            block,
            variables: run.variables,
        };
        Some(self.formatters.apply(substituted, &ctx, &mut run.diagnostics))
    }

    /// Compile, gate on preflight, then build the recipe's artifact.
    ///
    /// The recipe's allowed statuses replace the request's when non-empty.
    pub async fn export(
        &self,
        request: &CompileRequest,
        recipe: &ExportRecipe,
        builder: &ArtifactBuilder,
        ctx: &ExportContext,
    ) -> Result<(CompileResult, ExportArtifact), PipelineError> {
        let request = if recipe.allowed_statuses.is_empty() {
            Cow::Borrowed(request)
        } else {
            let mut merged = request.clone();
            merged.allowed_statuses = recipe.allowed_statuses.clone();
            Cow::Owned(merged)
        };

        let result = self.compile(&request);
        if result.preflight.errors > 0 {
            let mut codes: Vec<String> = result
                .preflight
                .issues
                .iter()
                .filter(|i| i.severity == Severity::Error)
                .map(|i| i.code.clone())
                .collect();
            codes.dedup();
            return Err(PipelineError::PreflightFailed {
                errors: result.preflight.errors,
                codes,
            });
        }

        let artifact = builder.build(&result, recipe, ctx).await?;
        Ok((result, artifact))
    }
}

impl Default for CompilationPipeline {
    fn default() -> Self {
        Self::new(FormatterRegistry::default(), FilterRegistry::default())
    }
}
