//! Preflight Validation - Independent Checks, One Report
//!
//! Checks produce issues. They never throw and never alter compiled content.
//! The caller decides what an error count means for export.

use std::collections::BTreeMap;

use serde_json::json;
use tracing::{debug, info};

use crate::diagnostics::{codes, PreflightIssue, PreflightReport};
use crate::graph::{document_cycles, SnippetGraph};
use crate::index::SnippetIndex;
use crate::model::{BlockContent, DocumentModel, SnippetBundle};
use crate::text::{scan_placeholders, scan_transclusions, unbalanced_fences};
use crate::variables::ResolvedVariables;

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static PREFLIGHT_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_preflight_call_count() -> u32 {
    PREFLIGHT_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_preflight_call_count() {
    PREFLIGHT_CALL_COUNT.store(0, Ordering::SeqCst);
}

/// Highest document schema version this engine understands.
pub const SUPPORTED_SCHEMA_VERSION: u32 = 1;

/// Everything a check may look at.
pub struct PreflightInput<'a> {
    pub document: &'a DocumentModel,
    pub index: &'a SnippetIndex,
    pub variables: &'a ResolvedVariables,
    pub allowed_statuses: &'a [String],
}

/// A Markdown text gathered for scanning, with the path issues point at.
pub struct MarkdownSource<'a> {
    pub path: String,
    pub body: &'a str,
}

impl<'a> PreflightInput<'a> {
    /// Markdown bodies of the document's blocks, in compile order.
    pub fn document_sources(&self) -> Vec<MarkdownSource<'a>> {
        self.document
            .ordered_blocks()
            .into_iter()
            .filter_map(|block| match &block.content {
                BlockContent::Markdown { body } => Some(MarkdownSource {
                    path: format!("blocks/{}", block.id),
                    body: body.as_str(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Every supplied snippet version body, plus version-less snippet bodies.
    pub fn snippet_sources(&self) -> Vec<MarkdownSource<'a>> {
        let mut sources = Vec::new();
        for entry in self.index.entries() {
            if entry.versions.is_empty() {
                sources.push(MarkdownSource {
                    path: format!("snippets/{}", entry.snippet.id),
                    body: entry.snippet.body.as_str(),
                });
            }
            for version in entry.versions.values() {
                sources.push(MarkdownSource {
                    path: format!("snippets/{}@{}", entry.snippet.id, version.rev),
                    body: version.body.as_str(),
                });
            }
        }
        sources
    }

    pub fn all_sources(&self) -> Vec<MarkdownSource<'a>> {
        let mut sources = self.document_sources();
        sources.extend(self.snippet_sources());
        sources
    }
}

pub trait PreflightCheck: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, input: &PreflightInput<'_>) -> Vec<PreflightIssue>;
}

// --- Concrete checks ---

pub struct StatusGateCheck;

impl PreflightCheck for StatusGateCheck {
    fn name(&self) -> &'static str { "status_gate" }

    fn check(&self, input: &PreflightInput<'_>) -> Vec<PreflightIssue> {
        let status = &input.document.status_key;
        if input.allowed_statuses.is_empty() || input.allowed_statuses.contains(status) {
            return vec![];
        }
        vec![PreflightIssue::error(
            codes::PREFLIGHT_STATUS_GATE,
            format!(
                "Document status '{}' is not allowed for export (allowed: {})",
                status,
                input.allowed_statuses.join(", ")
            ),
        )
        .at("statusKey")
        .with_details(json!({ "status": status, "allowed": input.allowed_statuses }))]
    }
}

pub struct VariableCheck;

impl PreflightCheck for VariableCheck {
    fn name(&self) -> &'static str { "variables" }

    fn check(&self, input: &PreflightInput<'_>) -> Vec<PreflightIssue> {
        let mut issues = vec![];

        for key in &input.variables.missing {
            issues.push(
                PreflightIssue::error(
                    codes::PREFLIGHT_VARIABLE_REQUIRED,
                    format!("Required variable '{}' has no value and no default", key),
                )
                .at(format!("variables/{}", key))
                .with_details(json!({ "key": key })),
            );
        }

        // key -> every source it appears unbound in
        let mut unbound: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for source in input.all_sources() {
            for placeholder in scan_placeholders(source.body) {
                if input.variables.is_bound(&placeholder.key) {
                    continue;
                }
                let paths = unbound.entry(placeholder.key).or_default();
                if !paths.contains(&source.path) {
                    paths.push(source.path.clone());
                }
            }
        }

        for (key, paths) in unbound {
            issues.push(
                PreflightIssue::error(
                    codes::PREFLIGHT_VARIABLE_UNBOUND,
                    format!("Placeholder '{{{{{}}}}}' has no resolved value", key),
                )
                .at(paths[0].clone())
                .with_details(json!({ "key": key, "sources": paths })),
            );
        }

        issues
    }
}

pub struct SnippetExistenceCheck;

impl PreflightCheck for SnippetExistenceCheck {
    fn name(&self) -> &'static str { "snippet_existence" }

    fn check(&self, input: &PreflightInput<'_>) -> Vec<PreflightIssue> {
        input
            .document
            .ordered_blocks()
            .into_iter()
            .filter_map(|block| match &block.content {
                BlockContent::Snippet { snippet_id, revision, .. }
                    if input.index.resolve(snippet_id, *revision).is_none() =>
                {
                    let reference = match revision {
                        Some(rev) => format!("{}@{}", snippet_id, rev),
                        None => snippet_id.clone(),
                    };
                    Some(
                        PreflightIssue::error(
                            codes::PREFLIGHT_SNIPPET_MISSING,
                            format!("Snippet block references missing snippet '{}'", reference),
                        )
                        .at(format!("blocks/{}", block.id))
                        .with_details(json!({ "snippetId": snippet_id, "revision": revision })),
                    )
                }
                _ => None,
            })
            .collect()
    }
}

pub struct DocumentGraphCheck;

impl PreflightCheck for DocumentGraphCheck {
    fn name(&self) -> &'static str { "document_graph" }

    fn check(&self, input: &PreflightInput<'_>) -> Vec<PreflightIssue> {
        document_cycles(&input.document.edges)
            .into_iter()
            .map(|cycle| {
                PreflightIssue::error(
                    codes::PREFLIGHT_GRAPH_CYCLE,
                    format!("Document graph contains a cycle at '{}'", cycle.node),
                )
                .at(format!("edges/{}", cycle.node))
                .with_details(json!({ "node": cycle.node, "path": cycle.path }))
            })
            .collect()
    }
}

pub struct FenceBalanceCheck;

impl PreflightCheck for FenceBalanceCheck {
    fn name(&self) -> &'static str { "fence_balance" }

    fn check(&self, input: &PreflightInput<'_>) -> Vec<PreflightIssue> {
        let mut issues = vec![];
        for source in input.all_sources() {
            for fence in unbalanced_fences(source.body) {
                issues.push(
                    PreflightIssue::error(
                        codes::PREFLIGHT_FENCE_UNBALANCED,
                        format!("Code fence opened at line {} is never closed", fence.line),
                    )
                    .at(source.path.clone())
                    .with_details(json!({ "line": fence.line, "fenceLength": fence.length })),
                );
            }
        }
        issues
    }
}

/// Tokens written directly in document Markdown blocks.
pub struct TransclusionTargetCheck;

impl PreflightCheck for TransclusionTargetCheck {
    fn name(&self) -> &'static str { "transclusion_targets" }

    fn check(&self, input: &PreflightInput<'_>) -> Vec<PreflightIssue> {
        let mut issues = vec![];
        for source in input.document_sources() {
            for token in scan_transclusions(source.body) {
                if input.index.resolve_token(&token).is_some() {
                    continue;
                }
                issues.push(
                    PreflightIssue::error(
                        codes::PREFLIGHT_TRANSCLUSION_MISSING,
                        format!("Transclusion target '{}' does not exist", token.reference()),
                    )
                    .at(source.path.clone())
                    .with_details(json!({ "reference": token.reference() })),
                );
            }
        }
        issues
    }
}

/// Snippet-to-snippet transclusion graph: missing targets and cycles.
pub struct SnippetGraphCheck;

impl PreflightCheck for SnippetGraphCheck {
    fn name(&self) -> &'static str { "snippet_graph" }

    fn check(&self, input: &PreflightInput<'_>) -> Vec<PreflightIssue> {
        let graph = SnippetGraph::build(input.index);
        let mut issues = vec![];

        for (snippet_id, reference) in &graph.missing {
            issues.push(
                PreflightIssue::error(
                    codes::PREFLIGHT_SNIPPET_DEPENDENCY_MISSING,
                    format!("Snippet '{}' transcludes missing snippet '{}'", snippet_id, reference),
                )
                .at(format!("snippets/{}", snippet_id))
                .with_details(json!({ "snippetId": snippet_id, "reference": reference })),
            );
        }

        for cycle in graph.cycles() {
            issues.push(
                PreflightIssue::error(
                    codes::PREFLIGHT_SNIPPET_CYCLE,
                    format!(
                        "Snippet transclusion cycle: {}",
                        cycle.path.join(" -> ")
                    ),
                )
                .at(format!("snippets/{}", cycle.node))
                .with_details(json!({ "node": cycle.node, "path": cycle.path })),
            );
        }

        issues
    }
}

pub struct GroupChildrenCheck;

impl PreflightCheck for GroupChildrenCheck {
    fn name(&self) -> &'static str { "group_children" }

    fn check(&self, input: &PreflightInput<'_>) -> Vec<PreflightIssue> {
        let mut issues = vec![];
        for block in input.document.ordered_blocks() {
            let BlockContent::Group { children } = &block.content else {
                continue;
            };
            for child in children {
                if input.document.block(child).is_none() {
                    issues.push(
                        PreflightIssue::warning(
                            codes::PREFLIGHT_GROUP_CHILD_MISSING,
                            format!("Group '{}' lists unknown child block '{}'", block.id, child),
                        )
                        .at(format!("blocks/{}", block.id))
                        .with_details(json!({ "child": child })),
                    );
                }
            }
        }
        issues
    }
}

pub struct SchemaVersionCheck;

impl PreflightCheck for SchemaVersionCheck {
    fn name(&self) -> &'static str { "schema_version" }

    fn check(&self, input: &PreflightInput<'_>) -> Vec<PreflightIssue> {
        let version = input.document.schema_version;
        if version <= SUPPORTED_SCHEMA_VERSION {
            return vec![];
        }
        vec![PreflightIssue::warning(
            codes::PREFLIGHT_SCHEMA_VERSION,
            format!(
                "Document schema version {} is newer than supported version {}",
                version, SUPPORTED_SCHEMA_VERSION
            ),
        )
        .at("schemaVersion")]
    }
}

/// Runs every check and merges the results into one sorted report.
pub struct PreflightValidator {
    checks: Vec<Box<dyn PreflightCheck>>,
}

impl PreflightValidator {
    pub fn new() -> Self {
        Self {
            checks: vec![
                Box::new(StatusGateCheck),
                Box::new(VariableCheck),
                Box::new(SnippetExistenceCheck),
                Box::new(DocumentGraphCheck),
                Box::new(FenceBalanceCheck),
                Box::new(TransclusionTargetCheck),
                Box::new(SnippetGraphCheck),
                Box::new(GroupChildrenCheck),
                Box::new(SchemaVersionCheck),
            ],
        }
    }

    pub fn validate(&self, input: &PreflightInput<'_>) -> PreflightReport {
        #[cfg(feature = "test-hooks")]
        PREFLIGHT_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

        let mut issues = vec![];
        for check in &self.checks {
            let found = check.check(input);
            if !found.is_empty() {
                debug!(check = check.name(), count = found.len(), "preflight check reported issues");
            }
            issues.extend(found);
        }

        let report = PreflightReport::from_issues(issues);
        info!(
            document = %input.document.id,
            errors = report.errors,
            warnings = report.warnings,
            "preflight complete"
        );
        report
    }
}

impl Default for PreflightValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Standalone preflight: builds its own index.
pub fn preflight(
    document: &DocumentModel,
    bundles: &[SnippetBundle],
    variables: &ResolvedVariables,
    allowed_statuses: &[String],
) -> PreflightReport {
    let index = SnippetIndex::build(bundles);
    PreflightValidator::new().validate(&PreflightInput {
        document,
        index: &index,
        variables,
        allowed_statuses,
    })
}
