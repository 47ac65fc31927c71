//! Document Model - Read-Only Compiler Input
//!
//! The editor owns these structures. The engine only reads them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type BlockId = String;
pub type SnippetId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentModel {
    pub id: String,
    pub title: String,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub variables: Vec<VariableDecl>,
    /// Export recipe ids bound to this document.
    #[serde(default)]
    pub recipes: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status_key: String,
    #[serde(default)]
    pub settings: DocumentSettings,
}

fn default_schema_version() -> u32 { 1 }

impl DocumentModel {
    /// Blocks in compile order: `sequence`, then `id`.
    pub fn ordered_blocks(&self) -> Vec<&Block> {
        let mut blocks: Vec<&Block> = self.blocks.iter().collect();
        blocks.sort_by(|a, b| a.sequence.cmp(&b.sequence).then_with(|| a.id.cmp(&b.id)));
        blocks
    }

    pub fn block(&self, id: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSettings {
    /// Document-level filter ids. Run in id order, not in this order.
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub heading_offset: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: BlockId,
    #[serde(default)]
    pub sequence: i64,
    #[serde(default)]
    pub formatters: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(flatten)]
    pub content: BlockContent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BlockContent {
    Markdown {
        body: String,
    },
    #[serde(rename_all = "camelCase")]
    Snippet {
        snippet_id: SnippetId,
        #[serde(default)]
        revision: Option<u32>,
        #[serde(default)]
        mode: TransclusionMode,
    },
    /// Display nesting only. Children compile in their own sequence slot.
    Group {
        #[serde(default)]
        children: Vec<BlockId>,
    },
    Comment {
        body: String,
    },
    Divider,
}

impl BlockContent {
    pub fn kind_name(&self) -> &'static str {
        match self {
            BlockContent::Markdown { .. } => "markdown",
            BlockContent::Snippet { .. } => "snippet",
            BlockContent::Group { .. } => "group",
            BlockContent::Comment { .. } => "comment",
            BlockContent::Divider => "divider",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransclusionMode {
    #[default]
    Inline,
    /// Resolved body is rendered as a blockquote.
    Quote,
}

impl TransclusionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransclusionMode::Inline => "inline",
            TransclusionMode::Quote => "quote",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    pub source: BlockId,
    pub target: BlockId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDecl {
    pub key: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    pub id: SnippetId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub frontmatter: Map<String, Value>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub head_rev: Option<u32>,
}

/// Immutable revision of a snippet. The workspace store computed `hash`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnippetVersion {
    pub rev: u32,
    pub body: String,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnippetBundle {
    pub snippet: Snippet,
    #[serde(default)]
    pub versions: Vec<SnippetVersion>,
}
