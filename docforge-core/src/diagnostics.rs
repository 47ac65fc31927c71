//! Diagnostics - Compiler Notes and Preflight Issues
//!
//! Two channels that never mix:
//! diagnostics ride along with compiled output, issues decide export eligibility.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

pub mod codes {
    pub const SNIPPET_UNRESOLVED: &str = "COMPILER_SNIPPET_UNRESOLVED";
    pub const VARIABLE_UNBOUND: &str = "COMPILER_VARIABLE_UNBOUND";
    pub const FORMATTER_UNKNOWN: &str = "COMPILER_FORMATTER_UNKNOWN";
    pub const FILTER_UNKNOWN: &str = "COMPILER_FILTER_UNKNOWN";
    pub const TRANSCLUSION_CYCLE: &str = "COMPILER_TRANSCLUSION_CYCLE";
    pub const TRANSCLUSION_DEPTH: &str = "COMPILER_TRANSCLUSION_DEPTH";

    pub const PREFLIGHT_STATUS_GATE: &str = "PREFLIGHT_STATUS_GATE";
    pub const PREFLIGHT_VARIABLE_REQUIRED: &str = "PREFLIGHT_VARIABLE_REQUIRED";
    pub const PREFLIGHT_VARIABLE_UNBOUND: &str = "PREFLIGHT_VARIABLE_UNBOUND";
    pub const PREFLIGHT_SNIPPET_MISSING: &str = "PREFLIGHT_SNIPPET_MISSING";
    pub const PREFLIGHT_GRAPH_CYCLE: &str = "PREFLIGHT_GRAPH_CYCLE";
    pub const PREFLIGHT_FENCE_UNBALANCED: &str = "PREFLIGHT_FENCE_UNBALANCED";
    pub const PREFLIGHT_TRANSCLUSION_MISSING: &str = "PREFLIGHT_TRANSCLUSION_MISSING";
    pub const PREFLIGHT_SNIPPET_DEPENDENCY_MISSING: &str = "PREFLIGHT_SNIPPET_DEPENDENCY_MISSING";
    pub const PREFLIGHT_SNIPPET_CYCLE: &str = "PREFLIGHT_SNIPPET_CYCLE";
    pub const PREFLIGHT_GROUP_CHILD_MISSING: &str = "PREFLIGHT_GROUP_CHILD_MISSING";
    pub const PREFLIGHT_SCHEMA_VERSION: &str = "PREFLIGHT_SCHEMA_VERSION";
}

/// Non-fatal compiler note attached to a compile result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompilerDiagnostic {
    pub code: String,
    pub message: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl CompilerDiagnostic {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::new(code, message, Severity::Error)
    }

    pub fn warning(code: &str, message: impl Into<String>) -> Self {
        Self::new(code, message, Severity::Warning)
    }

    fn new(code: &str, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            severity,
            path: None,
            details: None,
        }
    }

    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Policy-facing validation finding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreflightIssue {
    pub code: String,
    pub message: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl PreflightIssue {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            severity: Severity::Error,
            path: None,
            details: None,
        }
    }

    pub fn warning(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, message)
        }
    }

    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreflightReport {
    pub ok: bool,
    pub errors: usize,
    pub warnings: usize,
    pub issues: Vec<PreflightIssue>,
}

impl PreflightReport {
    /// Deduplicate, sort by code (then path, message) and tally.
    pub fn from_issues(mut issues: Vec<PreflightIssue>) -> Self {
        issues.sort_by(|a, b| {
            a.code
                .cmp(&b.code)
                .then_with(|| a.path.cmp(&b.path))
                .then_with(|| a.message.cmp(&b.message))
        });
        issues.dedup();

        let errors = issues.iter().filter(|i| i.severity == Severity::Error).count();
        let warnings = issues.len() - errors;

        Self {
            ok: errors == 0,
            errors,
            warnings,
            issues,
        }
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }

    pub fn issues_with_code<'a>(&'a self, code: &'a str) -> impl Iterator<Item = &'a PreflightIssue> + 'a {
        self.issues.iter().filter(move |i| i.code == code)
    }
}
