//! Text Utilities - Normalization and Token Scanning
//!
//! Everything here is pure and in-memory. Compiled output is hashed, so
//! identical logical text must always normalize to identical bytes.

use lazy_static::lazy_static;
use regex::Regex;
use std::ops::Range;

lazy_static! {
    /// `{{> identifier}}` or `{{> identifier@3}}`
    static ref TRANSCLUSION_RE: Regex =
        Regex::new(r"\{\{>\s*([^\s@{}]+)(?:@(\d+))?\s*\}\}").unwrap();

    /// `{{key}}` with optional inner whitespace. Never matches `{{> ...}}`.
    static ref PLACEHOLDER_RE: Regex =
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.\-]*)\s*\}\}").unwrap();

    /// Up to three spaces of indent; four or more is indented code.
    static ref FENCE_LINE_RE: Regex = Regex::new(r"^[ ]{0,3}(`{3,})").unwrap();

    static ref IMAGE_RE: Regex = Regex::new(r"!\[([^\]]*)\]\([^)]*\)").unwrap();
    static ref LINK_RE: Regex = Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap();
    static ref INLINE_CODE_RE: Regex = Regex::new(r"`([^`]*)`").unwrap();
    static ref HEADING_RE: Regex = Regex::new(r"(?m)^[ \t]{0,3}#{1,6}[ \t]+").unwrap();
    static ref BLOCKQUOTE_RE: Regex = Regex::new(r"(?m)^[ \t]*(?:>[ \t]?)+").unwrap();
    static ref LIST_MARKER_RE: Regex = Regex::new(r"(?m)^[ \t]*(?:[-*+]|\d+[.)])[ \t]+").unwrap();
    static ref INLINE_SPACE_RE: Regex = Regex::new(r"[ \t]+").unwrap();
    static ref BLANK_RUN_RE: Regex = Regex::new(r"\n{3,}").unwrap();
}

/// A `{{> identifier[@revision]}}` occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransclusionToken {
    pub identifier: String,
    pub revision: Option<u32>,
    /// `@rev` digits too large for a revision number. Such a token never
    /// resolves.
    pub invalid_revision: Option<String>,
    pub range: Range<usize>,
}

impl TransclusionToken {
    /// `identifier` or `identifier@rev`, as authors write it.
    pub fn reference(&self) -> String {
        match (&self.invalid_revision, self.revision) {
            (Some(raw), _) => format!("{}@{}", self.identifier, raw),
            (None, Some(rev)) => format!("{}@{}", self.identifier, rev),
            (None, None) => self.identifier.clone(),
        }
    }
}

/// A `{{key}}` occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub key: String,
    pub range: Range<usize>,
}

/// A fenced-code delimiter line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FenceMarker {
    /// 1-based line number.
    pub line: usize,
    pub length: usize,
}

/// Convert CRLF and lone CR to LF.
pub fn normalize_newlines(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

/// Trim trailing whitespace on every line. Expects LF line endings.
pub fn trim_trailing_whitespace(input: &str) -> String {
    input
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Exactly one terminal newline. Empty (or all-newline) text becomes empty.
pub fn ensure_terminal_newline(input: &str) -> String {
    let trimmed = input.trim_end_matches('\n');
    if trimmed.is_empty() {
        return String::new();
    }
    format!("{}\n", trimmed)
}

/// Swap LF for the requested newline sequence.
pub fn apply_newline(input: &str, newline: &str) -> String {
    if newline == "\n" {
        input.to_string()
    } else {
        input.replace('\n', newline)
    }
}

pub fn scan_transclusions(input: &str) -> Vec<TransclusionToken> {
    TRANSCLUSION_RE
        .captures_iter(input)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let (revision, invalid_revision) = match caps.get(2) {
                Some(m) => match m.as_str().parse::<u32>() {
                    Ok(rev) => (Some(rev), None),
                    Err(_) => (None, Some(m.as_str().to_string())),
                },
                None => (None, None),
            };
            Some(TransclusionToken {
                identifier: caps[1].to_string(),
                revision,
                invalid_revision,
                range: whole.range(),
            })
        })
        .collect()
}

pub fn scan_placeholders(input: &str) -> Vec<Placeholder> {
    PLACEHOLDER_RE
        .captures_iter(input)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(Placeholder {
                key: caps[1].to_string(),
                range: whole.range(),
            })
        })
        .collect()
}

/// Replace every placeholder for which `lookup` yields a value.
/// Placeholders without a value stay verbatim.
pub fn replace_placeholders<'a, F>(input: &str, mut lookup: F) -> String
where
    F: FnMut(&str) -> Option<&'a str>,
{
    PLACEHOLDER_RE
        .replace_all(input, |caps: &regex::Captures| match lookup(&caps[1]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

pub fn scan_fences(input: &str) -> Vec<FenceMarker> {
    normalize_newlines(input)
        .split('\n')
        .enumerate()
        .filter_map(|(idx, line)| {
            FENCE_LINE_RE.captures(line).map(|caps| FenceMarker {
                line: idx + 1,
                length: caps[1].len(),
            })
        })
        .collect()
}

/// Fences still open at end of input. A delimiter closes the innermost
/// open fence only when the backtick counts match exactly.
pub fn unbalanced_fences(input: &str) -> Vec<FenceMarker> {
    let mut stack: Vec<FenceMarker> = Vec::new();
    for marker in scan_fences(input) {
        match stack.last() {
            Some(open) if open.length == marker.length => {
                stack.pop();
            }
            _ => stack.push(marker),
        }
    }
    stack
}

/// Longest run of consecutive backticks in `input`.
pub fn longest_backtick_run(input: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for ch in input.chars() {
        if ch == '`' {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

/// Reduce Markdown to plain text.
///
/// Fence delimiter lines go, their contents stay untouched. Elsewhere inline
/// code, links and images keep their text, and heading, blockquote, list and
/// emphasis markers are stripped. Whitespace is collapsed everywhere.
pub fn markdown_to_text(markdown: &str) -> String {
    let normalized = normalize_newlines(markdown);

    let mut open_fence: Option<usize> = None;
    let mut lines: Vec<String> = Vec::new();
    for line in normalized.split('\n') {
        if let Some(caps) = FENCE_LINE_RE.captures(line) {
            let length = caps[1].len();
            match open_fence {
                None => {
                    open_fence = Some(length);
                    continue;
                }
                Some(open) if length >= open => {
                    open_fence = None;
                    continue;
                }
                Some(_) => {}
            }
        }

        let content = match open_fence {
            Some(_) => line.to_string(),
            None => strip_inline_markup(line),
        };
        lines.push(INLINE_SPACE_RE.replace_all(content.trim(), " ").into_owned());
    }

    let text = BLANK_RUN_RE.replace_all(&lines.join("\n"), "\n\n").into_owned();
    ensure_terminal_newline(text.trim())
}

fn strip_inline_markup(line: &str) -> String {
    let mut text = IMAGE_RE.replace_all(line, "$1").into_owned();
    text = LINK_RE.replace_all(&text, "$1").into_owned();
    text = INLINE_CODE_RE.replace_all(&text, "$1").into_owned();
    text = HEADING_RE.replace_all(&text, "").into_owned();
    text = BLOCKQUOTE_RE.replace_all(&text, "").into_owned();
    text = LIST_MARKER_RE.replace_all(&text, "").into_owned();
    strip_emphasis(&text)
}

/// Drop `*`, `_` and `~~` runs that can open or close emphasis. A run counts
/// only when it touches non-space on one side and is not wedged between
/// word characters, so `file_name` and `2 * 3` survive.
fn strip_emphasis(line: &str) -> String {
    let chars: Vec<char> = line.chars().collect();
    let is_word = |c: Option<char>| c.map_or(false, char::is_alphanumeric);
    let is_space = |c: Option<char>| c.map_or(true, char::is_whitespace);

    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if !matches!(c, '*' | '_' | '~') {
            out.push(c);
            i += 1;
            continue;
        }

        let mut j = i;
        while j < chars.len() && chars[j] == c {
            j += 1;
        }
        let before = i.checked_sub(1).map(|k| chars[k]);
        let after = chars.get(j).copied();
        let opens = !is_space(after) && !is_word(before);
        let closes = !is_space(before) && !is_word(after);
        let delimiter = (c != '~' || j - i == 2) && (opens || closes);

        if !delimiter {
            out.extend(&chars[i..j]);
        }
        i = j;
    }
    out
}
