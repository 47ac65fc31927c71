//! Contract Invariant Tests
//!
//! These tests verify the non-negotiable guarantees.

use assert_matches::assert_matches;
use serde_json::json;

use docforge_core::{
    codes, ArtifactBuilder, CompilationPipeline, CompileRequest, ExportContext, ExportReceipt,
    ExportRecipe, PipelineError, RecipeKind,
};

fn request(value: serde_json::Value) -> CompileRequest {
    serde_json::from_value(value).unwrap()
}

fn document(blocks: serde_json::Value) -> serde_json::Value {
    json!({
        "id": "doc-1",
        "title": "Service Agreement",
        "statusKey": "draft",
        "blocks": blocks,
    })
}

fn bundle(id: &str, rev: u32, body: &str) -> serde_json::Value {
    json!({
        "snippet": { "id": id, "title": id, "path": format!("library/{}", id), "headRev": rev },
        "versions": [{ "rev": rev, "body": body, "hash": format!("{}@{}", id, rev) }],
    })
}

fn sample_request() -> CompileRequest {
    let mut doc = document(json!([
        { "id": "intro", "sequence": 1, "kind": "markdown", "body": "# Agreement for {{client}}\n\n{{> preamble}}" },
        { "id": "terms", "sequence": 2, "kind": "snippet", "snippetId": "terms", "revision": 2, "mode": "quote" },
        { "id": "rule", "sequence": 3, "kind": "divider" },
        { "id": "code", "sequence": 4, "kind": "markdown", "body": "fee = {{fee}}", "formatters": ["code-block"], "language": "ini" },
    ]));
    doc["variables"] = json!([
        { "key": "client", "required": true },
        { "key": "fee", "default": 1200 },
    ]);

    request(json!({
        "document": doc,
        "bundles": [
            bundle("preamble", 1, "This agreement is made with *{{client}}*."),
            bundle("terms", 2, "Payment is due in 30 days.\nLate fees apply."),
        ],
        "variables": { "client": "Acme Corp" },
    }))
}

#[test]
fn invariant_compile_is_deterministic() {
    let pipeline = CompilationPipeline::default();
    let request = sample_request();

    let first = pipeline.compile(&request);
    let second = pipeline.compile(&request);

    assert_eq!(first, second);
    assert_eq!(
        first.markdown,
        "# Agreement for Acme Corp\n\nThis agreement is made with *Acme Corp*.\n\n\
         > Payment is due in 30 days.\n> Late fees apply.\n\n---\n\n```ini\nfee = 1200\n```\n"
    );
    assert_eq!(first.hash.len(), 64);
    assert!(first.preflight.ok, "{:?}", first.preflight.issues);

    let ids: Vec<_> = first.provenance.iter().map(|p| p.snippet_id.as_str()).collect();
    assert_eq!(ids, vec!["preamble", "terms"]);
}

#[tokio::test]
async fn invariant_export_is_deterministic() {
    let pipeline = CompilationPipeline::default();
    let request = sample_request();
    let recipe = ExportRecipe::new("web", RecipeKind::Html);
    let builder = ArtifactBuilder::new();

    let (_, a) = pipeline.export(&request, &recipe, &builder, &ExportContext::default()).await.unwrap();
    let (_, b) = pipeline.export(&request, &recipe, &builder, &ExportContext::default()).await.unwrap();

    assert_eq!(a, b);
    for key in ["artifactHash", "compileHash", "documentId", "provenanceCount", "recipeId", "recipeKind"] {
        assert!(a.metadata.contains_key(key), "missing {}", key);
    }

    // Receipts carry run ids and timestamps; the artifact never does.
    let ra = ExportReceipt::new(&a);
    let rb = ExportReceipt::new(&b);
    assert_ne!(ra.run_id, rb.run_id);
    assert_eq!(ra.metadata, rb.metadata);
    assert_eq!(ra.body_base64, rb.body_base64);
}

#[test]
fn invariant_document_graph_cycle_flagged() {
    let mut doc = document(json!([
        { "id": "a", "sequence": 1, "kind": "markdown", "body": "A" },
        { "id": "b", "sequence": 2, "kind": "markdown", "body": "B" },
    ]));
    doc["edges"] = json!([
        { "id": "e1", "source": "a", "target": "b" },
        { "id": "e2", "source": "b", "target": "a" },
    ]);

    let result = CompilationPipeline::default().compile(&request(json!({ "document": doc })));

    assert!(!result.preflight.ok);
    assert!(result.preflight.has_code(codes::PREFLIGHT_GRAPH_CYCLE));
    // Compilation still produces output.
    assert_eq!(result.markdown, "A\n\nB\n");
}

#[test]
fn invariant_snippet_graph_cycle_flagged_and_terminates() {
    let req = request(json!({
        "document": document(json!([
            { "id": "s", "sequence": 1, "kind": "snippet", "snippetId": "ping" },
        ])),
        "bundles": [
            bundle("ping", 1, "ping {{> pong}}"),
            bundle("pong", 1, "pong {{> ping}}"),
        ],
    }));

    let result = CompilationPipeline::default().compile(&req);

    assert!(result.preflight.has_code(codes::PREFLIGHT_SNIPPET_CYCLE));
    assert_eq!(result.markdown, "ping pong {{> ping}}\n");
    assert!(result.diagnostics.iter().any(|d| d.code == codes::TRANSCLUSION_CYCLE));
}

#[test]
fn invariant_status_gate() {
    let pipeline = CompilationPipeline::default();
    let mut req = request(json!({
        "document": document(json!([{ "id": "a", "kind": "markdown", "body": "x" }])),
    }));

    assert!(pipeline.preflight(&req).ok);

    req.allowed_statuses = vec!["approved".into(), "published".into()];
    let report = pipeline.preflight(&req);
    assert_eq!(report.errors, 1);
    assert!(report.has_code(codes::PREFLIGHT_STATUS_GATE));

    req.document.status_key = "approved".into();
    assert!(pipeline.preflight(&req).ok);
}

#[tokio::test]
async fn invariant_export_blocked_by_recipe_status_gate() {
    let req = request(json!({
        "document": document(json!([{ "id": "a", "kind": "markdown", "body": "x" }])),
    }));
    let recipe = ExportRecipe::new("publish", RecipeKind::Markdown).with_allowed_statuses(&["approved"]);

    let err = CompilationPipeline::default()
        .export(&req, &recipe, &ArtifactBuilder::new(), &ExportContext::default())
        .await
        .unwrap_err();

    assert_matches!(err, PipelineError::PreflightFailed { errors: 1, .. });
}

#[test]
fn invariant_variable_resolution_order() {
    let mut doc = document(json!([
        { "id": "a", "kind": "markdown", "body": "{{region}} / {{currency}} / {{signer}} / {{notes}}" },
    ]));
    doc["variables"] = json!([
        { "key": "region", "default": "EU" },
        { "key": "currency", "default": "EUR" },
        { "key": "signer", "required": true },
        { "key": "notes" },
    ]);

    let result = CompilationPipeline::default().compile(&request(json!({
        "document": doc,
        "variables": { "currency": "USD" },
    })));

    // caller value > declared default > placeholder left verbatim
    assert_eq!(result.markdown, "EU / USD / {{signer}} / {{notes}}\n");

    let required: Vec<_> = result
        .preflight
        .issues_with_code(codes::PREFLIGHT_VARIABLE_REQUIRED)
        .collect();
    assert_eq!(required.len(), 1);
    assert_eq!(required[0].path.as_deref(), Some("variables/signer"));

    assert_eq!(result.preflight.issues_with_code(codes::PREFLIGHT_VARIABLE_UNBOUND).count(), 2);
    assert!(result.diagnostics.iter().any(|d| d.code == codes::VARIABLE_UNBOUND));
}

#[test]
fn invariant_unbalanced_fence_flagged() {
    let req = request(json!({
        "document": document(json!([
            { "id": "ok", "sequence": 1, "kind": "markdown", "body": "```\nclosed\n```" },
            { "id": "bad", "sequence": 2, "kind": "markdown", "body": "```rust\nfn open() {}" },
        ])),
        "bundles": [bundle("clip", 1, "~~~ not a fence ~~~\n````\nopen snippet fence")],
    }));

    let report = CompilationPipeline::default().preflight(&req);
    let paths: Vec<_> = report
        .issues_with_code(codes::PREFLIGHT_FENCE_UNBALANCED)
        .filter_map(|i| i.path.as_deref())
        .collect();

    assert_eq!(paths, vec!["blocks/bad", "snippets/clip@1"]);
}

#[test]
fn invariant_blocks_ordered_by_sequence_then_id() {
    let req = request(json!({
        "document": document(json!([
            { "id": "c", "sequence": 2, "kind": "markdown", "body": "third" },
            { "id": "b", "sequence": 1, "kind": "markdown", "body": "second" },
            { "id": "a", "sequence": 1, "kind": "markdown", "body": "first" },
            { "id": "z", "sequence": -5, "kind": "markdown", "body": "zeroth" },
        ])),
    }));

    let result = CompilationPipeline::default().compile(&req);

    assert_eq!(result.markdown, "zeroth\n\nfirst\n\nsecond\n\nthird\n");
}

#[test]
fn invariant_group_blocks_are_transparent() {
    let req = request(json!({
        "document": document(json!([
            { "id": "g", "sequence": 1, "kind": "group", "children": ["late", "early"] },
            { "id": "early", "sequence": 2, "kind": "markdown", "body": "early child" },
            { "id": "middle", "sequence": 3, "kind": "markdown", "body": "not grouped" },
            { "id": "late", "sequence": 4, "kind": "markdown", "body": "late child" },
        ])),
    }));

    let result = CompilationPipeline::default().compile(&req);

    assert_eq!(result.markdown, "early child\n\nnot grouped\n\nlate child\n");
    assert!(result.preflight.ok);
}

#[tokio::test]
async fn invariant_html_is_sanitized() {
    let req = request(json!({
        "document": document(json!([
            { "id": "a", "kind": "markdown", "body": concat!(
                "# Heading\n\n",
                "<img src=\"x.png\" onerror=\"alert(1)\">\n\n",
                "<iframe src=\"https://evil.example\"></iframe>\n\n",
                "[click](javascript:alert(1)) and [safe](https://docs.example/guide)\n\n",
                "<script>steal()</script>\n"
            ) },
        ])),
    }));

    let (_, artifact) = CompilationPipeline::default()
        .export(&req, &ExportRecipe::new("web", RecipeKind::Html), &ArtifactBuilder::new(), &ExportContext::default())
        .await
        .unwrap();
    let html = String::from_utf8(artifact.body).unwrap();

    assert!(html.contains("<h1>Heading</h1>"));
    assert!(html.contains(r#"<a href="https://docs.example/guide">safe</a>"#));
    assert!(!html.contains("onerror"));
    assert!(!html.contains("javascript:"));
    assert!(!html.contains("<iframe"));
    assert!(!html.contains("<script"));
    assert!(!html.contains("steal()"));
}

#[cfg(feature = "test-hooks")]
#[test]
fn invariant_compile_always_runs_preflight() {
    use docforge_core::preflight::{get_preflight_call_count, reset_preflight_call_count};

    reset_preflight_call_count();
    let pipeline = CompilationPipeline::default();
    let req = sample_request();

    pipeline.compile(&req);
    pipeline.compile(&req);

    assert!(get_preflight_call_count() >= 2);
}
