//! Formatter and Filter Pipeline
//!
//! Formatters transform one block's text, in the order the block lists them.
//! Filters transform the joined document, in filter-id order.

use std::collections::{BTreeMap, BTreeSet};

use lazy_static::lazy_static;
use regex::Regex;

use crate::diagnostics::{codes, CompilerDiagnostic};
use crate::model::{Block, DocumentModel};
use crate::text::longest_backtick_run;
use crate::variables::ResolvedVariables;

lazy_static! {
    static ref HTML_COMMENT_RE: Regex = Regex::new(r"(?s)<!--.*?-->").unwrap();
    static ref ATX_HEADING_RE: Regex = Regex::new(r"^(#{1,6})([ \t].*)?$").unwrap();
    static ref BLANK_RUN_RE: Regex = Regex::new(r"\n{3,}").unwrap();
}

pub struct FormatContext<'a> {
    pub document: &'a DocumentModel,
    pub block: &'a Block,
    pub variables: &'a ResolvedVariables,
}

pub struct FilterContext<'a> {
    pub document: &'a DocumentModel,
    pub variables: &'a ResolvedVariables,
}

/// Per-block text transform.
pub trait BlockFormatter: Send + Sync {
    fn id(&self) -> &str;
    fn format(&self, text: &str, ctx: &FormatContext<'_>) -> String;
}

/// Whole-document text transform.
pub trait DocumentFilter: Send + Sync {
    fn id(&self) -> &str;
    fn apply(&self, text: &str, ctx: &FilterContext<'_>) -> String;
}

// --- Built-in formatters ---

/// Wraps the block in a fence longer than any backtick run inside it.
pub struct CodeBlockFormatter;

impl BlockFormatter for CodeBlockFormatter {
    fn id(&self) -> &str { "code-block" }

    fn format(&self, text: &str, ctx: &FormatContext<'_>) -> String {
        let fence = "`".repeat(longest_backtick_run(text).max(2) + 1);
        let language = ctx.block.language.as_deref().unwrap_or("");
        format!("{}{}\n{}\n{}", fence, language, text.trim_end_matches('\n'), fence)
    }
}

pub struct BlockquoteFormatter;

impl BlockFormatter for BlockquoteFormatter {
    fn id(&self) -> &str { "blockquote" }

    fn format(&self, text: &str, _ctx: &FormatContext<'_>) -> String {
        quote_lines(text)
    }
}

pub struct TrimFormatter;

impl BlockFormatter for TrimFormatter {
    fn id(&self) -> &str { "trim" }

    fn format(&self, text: &str, _ctx: &FormatContext<'_>) -> String {
        text.trim().to_string()
    }
}

/// Prefix every line with `> `; blank lines get a bare `>`.
pub fn quote_lines(text: &str) -> String {
    text.trim_end_matches('\n')
        .split('\n')
        .map(|line| if line.is_empty() { ">".to_string() } else { format!("> {}", line) })
        .collect::<Vec<_>>()
        .join("\n")
}

// --- Built-in filters ---

pub struct CollapseBlankLinesFilter;

impl DocumentFilter for CollapseBlankLinesFilter {
    fn id(&self) -> &str { "collapse-blank-lines" }

    fn apply(&self, text: &str, _ctx: &FilterContext<'_>) -> String {
        BLANK_RUN_RE.replace_all(text, "\n\n").into_owned()
    }
}

pub struct StripHtmlCommentsFilter;

impl DocumentFilter for StripHtmlCommentsFilter {
    fn id(&self) -> &str { "strip-html-comments" }

    fn apply(&self, text: &str, _ctx: &FilterContext<'_>) -> String {
        HTML_COMMENT_RE.replace_all(text, "").into_owned()
    }
}

/// Demotes ATX headings by `settings.headingOffset`, capped at level 6.
/// Fenced code is left alone.
pub struct HeadingOffsetFilter;

impl DocumentFilter for HeadingOffsetFilter {
    fn id(&self) -> &str { "heading-offset" }

    fn apply(&self, text: &str, ctx: &FilterContext<'_>) -> String {
        let offset = ctx.document.settings.heading_offset.min(5) as usize;
        if offset == 0 {
            return text.to_string();
        }

        let mut in_fence = false;
        text.split('\n')
            .map(|line| {
                if line.trim_start().starts_with("```") {
                    in_fence = !in_fence;
                    return line.to_string();
                }
                if in_fence {
                    return line.to_string();
                }
                match ATX_HEADING_RE.captures(line) {
                    Some(caps) => {
                        let level = (caps[1].len() + offset).min(6);
                        let rest = caps.get(2).map_or("", |m| m.as_str());
                        format!("{}{}", "#".repeat(level), rest)
                    }
                    None => line.to_string(),
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// --- Registries ---

pub struct FormatterRegistry {
    formatters: BTreeMap<String, Box<dyn BlockFormatter>>,
}

impl FormatterRegistry {
    pub fn empty() -> Self {
        Self { formatters: BTreeMap::new() }
    }

    pub fn register(&mut self, formatter: Box<dyn BlockFormatter>) {
        self.formatters.insert(formatter.id().to_string(), formatter);
    }

    pub fn get(&self, id: &str) -> Option<&dyn BlockFormatter> {
        self.formatters.get(id).map(|f| f.as_ref())
    }

    /// Run the block's formatters in declared order. Unknown ids are
    /// reported and skipped.
    pub fn apply(
        &self,
        text: String,
        ctx: &FormatContext<'_>,
        diagnostics: &mut Vec<CompilerDiagnostic>,
    ) -> String {
        let mut current = text;
        for id in &ctx.block.formatters {
            match self.get(id) {
                Some(formatter) => current = formatter.format(&current, ctx),
                None => diagnostics.push(
                    CompilerDiagnostic::warning(
                        codes::FORMATTER_UNKNOWN,
                        format!("Unknown formatter '{}' skipped", id),
                    )
                    .at(format!("blocks/{}", ctx.block.id)),
                ),
            }
        }
        current
    }
}

impl Default for FormatterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(CodeBlockFormatter));
        registry.register(Box::new(BlockquoteFormatter));
        registry.register(Box::new(TrimFormatter));
        registry
    }
}

pub struct FilterRegistry {
    filters: BTreeMap<String, Box<dyn DocumentFilter>>,
}

impl FilterRegistry {
    pub fn empty() -> Self {
        Self { filters: BTreeMap::new() }
    }

    pub fn register(&mut self, filter: Box<dyn DocumentFilter>) {
        self.filters.insert(filter.id().to_string(), filter);
    }

    pub fn get(&self, id: &str) -> Option<&dyn DocumentFilter> {
        self.filters.get(id).map(|f| f.as_ref())
    }

    /// Run the filters the document selects, sorted by id and deduplicated.
    pub fn apply(
        &self,
        text: String,
        ctx: &FilterContext<'_>,
        diagnostics: &mut Vec<CompilerDiagnostic>,
    ) -> String {
        let selected: BTreeSet<&str> = ctx
            .document
            .settings
            .filters
            .iter()
            .map(String::as_str)
            .collect();

        let mut current = text;
        for id in selected {
            match self.get(id) {
                Some(filter) => current = filter.apply(&current, ctx),
                None => diagnostics.push(
                    CompilerDiagnostic::warning(
                        codes::FILTER_UNKNOWN,
                        format!("Unknown document filter '{}' skipped", id),
                    )
                    .at("settings/filters"),
                ),
            }
        }
        current
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(CollapseBlankLinesFilter));
        registry.register(Box::new(HeadingOffsetFilter));
        registry.register(Box::new(StripHtmlCommentsFilter));
        registry
    }
}
