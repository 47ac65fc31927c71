//! Transclusion Resolver
//!
//! Expands `{{> identifier[@rev]}}` recursively. The in-progress call stack
//! is threaded explicitly; a target already on the stack is left verbatim.
//! Cycle reporting proper belongs to preflight, this only guarantees
//! termination.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::diagnostics::{codes, CompilerDiagnostic};
use crate::index::{ResolvedSnippet, SnippetIndex};
use crate::model::TransclusionMode;
use crate::text::{scan_transclusions, TransclusionToken};

pub const DEFAULT_MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceEntry {
    pub snippet_id: String,
    pub revision: u32,
    pub hash: String,
    pub mode: TransclusionMode,
    pub path: String,
}

impl ProvenanceEntry {
    pub fn key(&self) -> String {
        format!("{}@{}:{}", self.snippet_id, self.revision, self.mode.as_str())
    }
}

/// Provenance accumulator owned by a single compile. First record wins.
#[derive(Debug, Default)]
pub struct ProvenanceLog {
    entries: BTreeMap<String, ProvenanceEntry>,
}

impl ProvenanceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, resolved: &ResolvedSnippet<'_>, mode: TransclusionMode) {
        let entry = ProvenanceEntry {
            snippet_id: resolved.id().to_string(),
            revision: resolved.version.rev,
            hash: resolved.version.hash.clone(),
            mode,
            path: resolved.path().to_string(),
        };
        self.entries.entry(entry.key()).or_insert(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Sorted by snippet id, then revision, then mode.
    pub fn into_sorted(self) -> Vec<ProvenanceEntry> {
        let mut list: Vec<_> = self.entries.into_values().collect();
        list.sort_by(|a, b| {
            a.snippet_id
                .cmp(&b.snippet_id)
                .then_with(|| a.revision.cmp(&b.revision))
                .then_with(|| a.mode.cmp(&b.mode))
        });
        list
    }
}

/// Literal left in place of a token that cannot be resolved.
pub fn missing_marker(reference: &str) -> String {
    format!("[missing snippet: {}]", reference)
}

pub struct Transcluder<'a> {
    index: &'a SnippetIndex,
    max_depth: usize,
}

/// Mutable state of one expansion run.
pub struct TransclusionState<'s> {
    pub provenance: &'s mut ProvenanceLog,
    pub diagnostics: &'s mut Vec<CompilerDiagnostic>,
    /// Diagnostic path of the block being expanded.
    pub origin: String,
}

impl<'a> Transcluder<'a> {
    pub fn new(index: &'a SnippetIndex, max_depth: usize) -> Self {
        Self {
            index,
            max_depth: max_depth.max(1),
        }
    }

    /// Expand all tokens in `text`. `stack` holds the snippet ids already
    /// being expanded by the caller.
    pub fn expand(&self, text: &str, stack: &mut Vec<String>, state: &mut TransclusionState<'_>) -> String {
        let tokens = scan_transclusions(text);
        if tokens.is_empty() {
            return text.to_string();
        }

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for token in tokens {
            out.push_str(&text[cursor..token.range.start]);
            out.push_str(&self.expand_token(&text[token.range.clone()], &token, stack, state));
            cursor = token.range.end;
        }
        out.push_str(&text[cursor..]);
        out
    }

    fn expand_token(
        &self,
        raw: &str,
        token: &TransclusionToken,
        stack: &mut Vec<String>,
        state: &mut TransclusionState<'_>,
    ) -> String {
        let Some(resolved) = self.index.resolve_token(token) else {
            state.diagnostics.push(
                CompilerDiagnostic::error(
                    codes::SNIPPET_UNRESOLVED,
                    format!("Transcluded snippet '{}' could not be resolved", token.reference()),
                )
                .at(state.origin.clone())
                .with_details(serde_json::json!({ "reference": token.reference() })),
            );
            return missing_marker(&token.reference());
        };

        let id = resolved.id().to_string();
        if stack.contains(&id) {
            debug!(snippet = %id, "transclusion cycle, leaving token unexpanded");
            state.diagnostics.push(
                CompilerDiagnostic::warning(
                    codes::TRANSCLUSION_CYCLE,
                    format!("Snippet '{}' transcludes itself; expansion stopped", id),
                )
                .at(state.origin.clone())
                .with_details(serde_json::json!({ "stack": stack.clone(), "snippetId": id })),
            );
            return raw.to_string();
        }

        if stack.len() >= self.max_depth {
            debug!(snippet = %id, depth = stack.len(), "transclusion depth limit reached");
            state.diagnostics.push(
                CompilerDiagnostic::warning(
                    codes::TRANSCLUSION_DEPTH,
                    format!(
                        "Transclusion of '{}' exceeds maximum depth {}; expansion stopped",
                        id, self.max_depth
                    ),
                )
                .at(state.origin.clone()),
            );
            return raw.to_string();
        }

        state.provenance.record(&resolved, TransclusionMode::Inline);

        stack.push(id);
        let body = self.expand(&resolved.version.body, stack, state);
        stack.pop();
        body
    }

    /// Expand a resolved snippet body as the snippet itself would, with its
    /// own id on the stack.
    pub fn expand_snippet(&self, resolved: &ResolvedSnippet<'_>, state: &mut TransclusionState<'_>) -> String {
        let mut stack = vec![resolved.id().to_string()];
        self.expand(&resolved.version.body, &mut stack, state)
    }
}
