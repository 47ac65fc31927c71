//! DocForge Core - Document Compiler
//!
//! # The Five Laws (Non-Negotiable)
//! 1. The Document Model Is Read-Only
//! 2. Same Inputs, Same Bytes
//! 3. Preflight Always Runs
//! 4. Recipes Are Contracts
//! 5. Exported HTML Is Sanitized

pub mod model;
pub mod hashing;
pub mod diagnostics;
pub mod text;
pub mod index;
pub mod variables;
pub mod transclusion;
pub mod formatters;
pub mod graph;
pub mod preflight;
pub mod html;
pub mod pdf;
pub mod recipes;
pub mod config;
pub mod pipeline;
pub mod artifact;

pub use model::{Block, BlockContent, DocumentModel, Snippet, SnippetBundle, SnippetVersion, TransclusionMode};
pub use diagnostics::{codes, CompilerDiagnostic, PreflightIssue, PreflightReport, Severity};
pub use hashing::{canonical_json, compute_content_hash, sha256_hex};
pub use index::SnippetIndex;
pub use variables::{resolve_variables, ResolvedVariables, VariableValues};
pub use transclusion::ProvenanceEntry;
pub use formatters::{BlockFormatter, DocumentFilter, FilterRegistry, FormatterRegistry};
pub use preflight::{preflight, PreflightCheck, PreflightValidator};
pub use pdf::{PdfRenderError, PdfRenderOptions, PdfRenderer, PdfSettings};
pub use recipes::{ExportRecipe, RecipeKind, RecipeRegistry};
pub use config::{ConfigError, EngineConfig};
pub use pipeline::{CompilationPipeline, CompileRequest, CompileResult, PipelineError};
pub use artifact::{ArtifactBuilder, ExportArtifact, ExportContext, ExportError, ExportReceipt};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
