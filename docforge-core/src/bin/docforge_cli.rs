//! DocForge CLI - Bridge interface for the editor
//!
//! Commands: preflight, compile, export
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 when preflight reports errors

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use docforge_core::{
    ArtifactBuilder, CompilationPipeline, CompileRequest, EngineConfig, ExportContext, ExportError,
    ExportReceipt, ExportRecipe, PipelineError, RecipeKind, RecipeRegistry,
};

#[derive(Parser)]
#[command(name = "docforge-cli")]
#[command(about = "DocForge CLI - Document Compiler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to engine config (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to export recipes directory
    #[arg(short, long, default_value = "recipes")]
    recipes_dir: PathBuf,

    /// Log filter, e.g. `info` or `docforge_core=debug`
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run preflight checks only
    Preflight {
        /// JSON file (CompileRequest)
        #[arg(short = 'i', long)]
        request: PathBuf,
    },

    /// Compile a document
    Compile {
        /// JSON file (CompileRequest)
        #[arg(short = 'i', long)]
        request: PathBuf,
    },

    /// Compile and export an artifact
    Export {
        /// JSON file (CompileRequest)
        #[arg(short = 'i', long)]
        request: PathBuf,

        /// Recipe ID from the recipes directory
        #[arg(long, conflicts_with = "format")]
        recipe: Option<String>,

        /// Ad-hoc recipe kind (markdown, text, html, pdf)
        #[arg(long)]
        format: Option<String>,

        /// Write artifact bytes to this file
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap());
}

fn fail(message: String) -> ExitCode {
    print_json(&serde_json::json!({ "success": false, "error": message }));
    ExitCode::FAILURE
}

fn read_request(path: &Path) -> Result<CompileRequest, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read request {}: {}", path.display(), e))?;
    serde_json::from_str(&content).map_err(|e| format!("Invalid request: {}", e))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = match &cli.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(c) => c,
            Err(e) => return fail(e.to_string()),
        },
        None => EngineConfig::default(),
    };
    let pdf_timeout = config.pdf_timeout();
    let pipeline = CompilationPipeline::default().with_config(config);

    match cli.command {
        Commands::Preflight { request } => {
            let request = match read_request(&request) {
                Ok(r) => r,
                Err(e) => return fail(e),
            };

            let report = pipeline.preflight(&request);
            print_json(&serde_json::to_value(&report).unwrap());
            if report.ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2) // Preflight errors
            }
        }

        Commands::Compile { request } => {
            let request = match read_request(&request) {
                Ok(r) => r,
                Err(e) => return fail(e),
            };

            let result = pipeline.compile(&request);
            let ok = result.preflight.ok;
            print_json(&serde_json::json!({ "success": true, "result": result }));
            if ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2) // Compiled, but preflight reported errors
            }
        }

        Commands::Export { request, recipe, format, out } => {
            let request = match read_request(&request) {
                Ok(r) => r,
                Err(e) => return fail(e),
            };

            let recipe = match (recipe, format) {
                (Some(id), _) => {
                    let registry = match RecipeRegistry::load_from_dir(&cli.recipes_dir) {
                        Ok(r) => r,
                        Err(e) => return fail(format!("Failed to load recipes: {}", e)),
                    };
                    match registry.get(&id) {
                        Some(r) => r.clone(),
                        None => return fail(format!("Recipe not found: {}", id)),
                    }
                }
                (None, Some(kind)) => match kind.parse::<RecipeKind>() {
                    Ok(kind) => ExportRecipe::new(kind.as_str(), kind),
                    Err(e) => return fail(ExportError::from(e).to_string()),
                },
                (None, None) => return fail("Either --recipe or --format is required".into()),
            };

            let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
                Ok(rt) => rt,
                Err(e) => return fail(format!("Failed to start runtime: {}", e)),
            };

            // No PDF backend ships with the CLI; pdf recipes report RendererNotConfigured.
            let builder = ArtifactBuilder::new().with_pdf_timeout(pdf_timeout);
            let exported = runtime.block_on(pipeline.export(
                &request,
                &recipe,
                &builder,
                &ExportContext::default(),
            ));

            match exported {
                Ok((_, artifact)) => {
                    if let Some(path) = &out {
                        if let Err(e) = fs::write(path, &artifact.body) {
                            return fail(format!("Failed to write {}: {}", path.display(), e));
                        }
                    }
                    let receipt = ExportReceipt::new(&artifact);
                    print_json(&serde_json::json!({ "success": true, "receipt": receipt }));
                    ExitCode::SUCCESS
                }
                Err(e @ PipelineError::PreflightFailed { .. }) => {
                    print_json(&serde_json::json!({ "success": false, "error": e.to_string() }));
                    ExitCode::from(2) // Export blocked by preflight
                }
                Err(e) => fail(e.to_string()),
            }
        }
    }
}
