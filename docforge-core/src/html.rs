//! HTML Rendering and Sanitization
//!
//! Markdown is rendered with pulldown-cmark, re-parsed with html5ever and
//! serialized back through a fixed allow-list. Anything not listed is
//! dropped. Output is deterministic: attribute order follows the source.

use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use lazy_static::lazy_static;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use pulldown_cmark::{html, Options, Parser};
use std::collections::{HashMap, HashSet};

lazy_static! {
    static ref ALLOWED_TAGS: HashSet<&'static str> = [
        "a", "abbr", "b", "blockquote", "br", "code", "dd", "del", "div", "dl", "dt",
        "em", "figcaption", "figure", "h1", "h2", "h3", "h4", "h5", "h6", "hr", "i",
        "img", "kbd", "li", "mark", "ol", "p", "pre", "s", "section", "span", "strong",
        "sub", "sup", "table", "tbody", "td", "tfoot", "th", "thead", "tr", "u", "ul",
    ]
    .into_iter()
    .collect();

    /// Dropped together with everything inside them.
    static ref STRIPPED_TAGS: HashSet<&'static str> = [
        "script", "style", "iframe", "object", "embed", "template", "noscript",
        "textarea", "title", "xmp", "noembed", "noframes", "frame", "frameset",
        "applet", "base", "link", "meta", "svg", "math", "select", "button", "form",
    ]
    .into_iter()
    .collect();

    static ref GLOBAL_ATTRS: HashSet<&'static str> = ["title", "lang", "dir"].into_iter().collect();

    static ref TAG_ATTRS: HashMap<&'static str, HashSet<&'static str>> = {
        let mut m = HashMap::new();
        m.insert("a", ["href", "name", "target", "rel"].into_iter().collect());
        m.insert("img", ["src", "alt", "width", "height"].into_iter().collect());
        m.insert("code", ["class"].into_iter().collect());
        m.insert("ol", ["start"].into_iter().collect());
        m.insert("td", ["align", "colspan", "rowspan"].into_iter().collect());
        m.insert("th", ["align", "colspan", "rowspan", "scope"].into_iter().collect());
        m
    };

    static ref URL_ATTRS: HashSet<&'static str> = ["href", "src"].into_iter().collect();

    static ref ALLOWED_SCHEMES: HashSet<&'static str> =
        ["http", "https", "mailto", "tel", "data"].into_iter().collect();
}

const VOID_TAGS: [&str; 3] = ["br", "hr", "img"];

/// Render Markdown to unsanitized HTML.
pub fn render_markdown(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(markdown, options);
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Render Markdown and sanitize the result.
pub fn render_sanitized(markdown: &str) -> String {
    sanitize_html(&render_markdown(markdown))
}

/// Reduce an HTML fragment to the allow-list.
pub fn sanitize_html(fragment: &str) -> String {
    let wrapped = format!("<!DOCTYPE html><html><head></head><body>{}</body></html>", fragment);
    let dom = parse_document(RcDom::default(), Default::default()).one(wrapped.as_str());

    let mut out = String::with_capacity(fragment.len());
    if let Some(body) = find_element(&dom.document, "body") {
        for child in body.children.borrow().iter() {
            write_node(child, &mut out);
        }
    }
    out
}

fn find_element(handle: &Handle, tag: &str) -> Option<Handle> {
    if let NodeData::Element { name, .. } = &handle.data {
        if &*name.local == tag {
            return Some(handle.clone());
        }
    }
    for child in handle.children.borrow().iter() {
        if let Some(found) = find_element(child, tag) {
            return Some(found);
        }
    }
    None
}

fn write_node(handle: &Handle, out: &mut String) {
    match &handle.data {
        NodeData::Text { contents } => {
            out.push_str(&escape_text(&contents.borrow()));
        }
        NodeData::Element { name, attrs, .. } => {
            let tag: &str = &name.local;

            if STRIPPED_TAGS.contains(tag) {
                return;
            }
            if !ALLOWED_TAGS.contains(tag) {
                // unwrap: keep the children, lose the element
                for child in handle.children.borrow().iter() {
                    write_node(child, out);
                }
                return;
            }

            let mut kept: Vec<(String, String)> = attrs
                .borrow()
                .iter()
                .filter_map(|attr| {
                    let attr_name: &str = &attr.name.local;
                    let value: &str = &attr.value;
                    if !attribute_allowed(tag, attr_name) {
                        return None;
                    }
                    if URL_ATTRS.contains(attr_name) && !url_allowed(value) {
                        return None;
                    }
                    Some((attr_name.to_string(), value.to_string()))
                })
                .collect();
            enforce_noopener(&mut kept);

            out.push('<');
            out.push_str(tag);
            for (attr_name, value) in &kept {
                out.push(' ');
                out.push_str(attr_name);
                out.push_str("=\"");
                out.push_str(&escape_attr(value));
                out.push('"');
            }
            out.push('>');

            if VOID_TAGS.contains(&tag) {
                return;
            }
            for child in handle.children.borrow().iter() {
                write_node(child, out);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
        NodeData::Document
        | NodeData::Doctype { .. }
        | NodeData::Comment { .. }
        | NodeData::ProcessingInstruction { .. } => {}
    }
}

fn attribute_allowed(tag: &str, attr: &str) -> bool {
    if attr.starts_with("on") {
        return false;
    }
    GLOBAL_ATTRS.contains(attr) || TAG_ATTRS.get(tag).map_or(false, |set| set.contains(attr))
}

/// Scheme-less (relative) URLs pass; otherwise the scheme must be listed.
pub fn url_allowed(url: &str) -> bool {
    let cleaned: String = url
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect();

    let scheme_end = cleaned.find(':');
    let path_start = cleaned.find(|c| c == '/' || c == '?' || c == '#');
    match (scheme_end, path_start) {
        (Some(colon), Some(path)) if path < colon => true,
        (Some(colon), _) => ALLOWED_SCHEMES.contains(cleaned[..colon].to_ascii_lowercase().as_str()),
        (None, _) => true,
    }
}

/// `target="_blank"` always travels with `rel="noopener noreferrer"`.
fn enforce_noopener(attrs: &mut Vec<(String, String)>) {
    let blank = attrs
        .iter()
        .any(|(name, value)| name == "target" && value.eq_ignore_ascii_case("_blank"));
    if !blank {
        return;
    }
    match attrs.iter_mut().find(|(name, _)| name == "rel") {
        Some((_, value)) => *value = "noopener noreferrer".to_string(),
        None => attrs.push(("rel".to_string(), "noopener noreferrer".to_string())),
    }
}

pub fn escape_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn escape_attr(input: &str) -> String {
    escape_text(input).replace('"', "&quot;").replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_removed_headings_kept() {
        let out = render_sanitized("# Title\n\n<script>alert(1)</script>\n\nBody text\n");
        assert!(!out.contains("<script"));
        assert!(!out.contains("alert(1)"));
        assert!(out.contains("<h1>Title</h1>"));
        assert!(out.contains("<p>Body text</p>"));
    }

    #[test]
    fn test_event_handlers_and_bad_schemes_dropped() {
        let out = sanitize_html(
            r#"<p onclick="x()">hi <a href="javascript:alert(1)">bad</a> <a href="https://ok.example/">good</a></p>"#,
        );
        assert_eq!(
            out,
            r#"<p>hi <a>bad</a> <a href="https://ok.example/">good</a></p>"#
        );
    }

    #[test]
    fn test_target_blank_gets_noopener() {
        let out = sanitize_html(r#"<a href="https://x.example" target="_blank" rel="opener">x</a>"#);
        assert_eq!(
            out,
            r#"<a href="https://x.example" target="_blank" rel="noopener noreferrer">x</a>"#
        );
    }

    #[test]
    fn test_unknown_elements_unwrapped() {
        let out = sanitize_html("<p><font color=\"red\">warm</font></p>");
        assert_eq!(out, "<p>warm</p>");
    }

    #[test]
    fn test_images_and_code_survive() {
        let out = render_sanitized("![logo](https://cdn.example/logo.png)\n\n```rust\nlet a = 1 < 2;\n```\n");
        assert!(out.contains(r#"<img src="https://cdn.example/logo.png" alt="logo">"#));
        assert!(out.contains(r#"<code class="language-rust">let a = 1 &lt; 2;"#));
    }

    #[test]
    fn test_url_allowed() {
        assert!(url_allowed("https://a.example"));
        assert!(url_allowed("mailto:a@b.example"));
        assert!(url_allowed("data:image/png;base64,AAAA"));
        assert!(url_allowed("/relative/path:with-colon"));
        assert!(url_allowed("#anchor"));
        assert!(!url_allowed("javascript:alert(1)"));
        assert!(!url_allowed(" java\tscript:alert(1)"));
        assert!(!url_allowed("vbscript:x"));
    }
}
