//! Export Recipes - Enforceable Output Contracts

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

use crate::pdf::PdfSettings;

pub type RecipeId = String;

#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("Failed to read recipe {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse recipe {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRecipe {
    pub id: RecipeId,
    #[serde(default)]
    pub name: String,
    pub kind: RecipeKind,
    /// Empty means no status gate.
    #[serde(default)]
    pub allowed_statuses: Vec<String>,
    #[serde(default)]
    pub engine_min_version: Option<String>,
    #[serde(default)]
    pub pdf: Option<PdfSettings>,
}

impl ExportRecipe {
    pub fn new(id: impl Into<String>, kind: RecipeKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            allowed_statuses: vec![],
            engine_min_version: None,
            pdf: None,
        }
    }

    pub fn with_allowed_statuses(mut self, statuses: &[&str]) -> Self {
        self.allowed_statuses = statuses.iter().map(|s| s.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RecipeKind {
    Markdown,
    Text,
    Html,
    Pdf,
}

impl RecipeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipeKind::Markdown => "markdown",
            RecipeKind::Text => "text",
            RecipeKind::Html => "html",
            RecipeKind::Pdf => "pdf",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            RecipeKind::Markdown => "text/markdown; charset=utf-8",
            RecipeKind::Text => "text/plain; charset=utf-8",
            RecipeKind::Html => "text/html; charset=utf-8",
            RecipeKind::Pdf => "application/pdf",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            RecipeKind::Markdown => "md",
            RecipeKind::Text => "txt",
            RecipeKind::Html => "html",
            RecipeKind::Pdf => "pdf",
        }
    }
}

impl fmt::Display for RecipeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRecipeKind(pub String);

impl FromStr for RecipeKind {
    type Err = UnknownRecipeKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(RecipeKind::Markdown),
            "text" | "txt" => Ok(RecipeKind::Text),
            "html" => Ok(RecipeKind::Html),
            "pdf" => Ok(RecipeKind::Pdf),
            _ => Err(UnknownRecipeKind(s.to_string())),
        }
    }
}

/// Recipe registry - loads recipes from a directory of JSON files
pub struct RecipeRegistry {
    recipes: BTreeMap<RecipeId, ExportRecipe>,
}

impl RecipeRegistry {
    pub fn new() -> Self {
        Self { recipes: BTreeMap::new() }
    }

    pub fn load_file(path: &Path) -> Result<ExportRecipe, RecipeError> {
        let content = fs::read_to_string(path).map_err(|source| RecipeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| RecipeError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Unreadable or malformed files are skipped with a warning.
    pub fn load_from_dir(dir: &Path) -> Result<Self, RecipeError> {
        let mut registry = Self::new();
        if dir.exists() {
            let io_err = |source| RecipeError::Io {
                path: dir.display().to_string(),
                source,
            };
            let mut paths: Vec<_> = fs::read_dir(dir)
                .map_err(io_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(io_err)?
                .into_iter()
                .map(|entry| entry.path())
                .filter(|path| path.extension().map_or(false, |e| e == "json"))
                .collect();
            paths.sort();

            for path in paths {
                match Self::load_file(&path) {
                    Ok(recipe) => registry.register(recipe),
                    Err(error) => warn!(%error, "skipping recipe file"),
                }
            }
        }
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<&ExportRecipe> {
        self.recipes.get(id)
    }

    pub fn list(&self) -> Vec<&ExportRecipe> {
        self.recipes.values().collect()
    }

    pub fn register(&mut self, recipe: ExportRecipe) {
        self.recipes.insert(recipe.id.clone(), recipe);
    }
}

impl Default for RecipeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
