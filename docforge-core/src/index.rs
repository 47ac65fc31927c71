//! Snippet Index - Lookup by Id and by Path
//!
//! Rebuilt for every compile. Ordered maps keep iteration deterministic.

use std::collections::BTreeMap;

use crate::hashing::sha256_hex;
use crate::model::{Snippet, SnippetBundle, SnippetVersion};
use crate::text::TransclusionToken;

#[derive(Debug, Clone)]
pub struct SnippetIndexEntry {
    pub snippet: Snippet,
    pub versions: BTreeMap<u32, SnippetVersion>,
    pub head: SnippetVersion,
}

impl SnippetIndexEntry {
    pub fn from_bundle(bundle: &SnippetBundle) -> Self {
        let versions: BTreeMap<u32, SnippetVersion> = bundle
            .versions
            .iter()
            .map(|v| (v.rev, v.clone()))
            .collect();

        let head = select_head(&bundle.snippet, &versions);

        Self {
            snippet: bundle.snippet.clone(),
            versions,
            head,
        }
    }

    /// Pinned revision if given, head otherwise.
    pub fn version(&self, revision: Option<u32>) -> Option<&SnippetVersion> {
        match revision {
            Some(rev) if rev == self.head.rev => Some(&self.head),
            Some(rev) => self.versions.get(&rev),
            None => Some(&self.head),
        }
    }
}

/// Declared head if present, else the highest revision, else the snippet's
/// own body as a synthetic revision.
fn select_head(snippet: &Snippet, versions: &BTreeMap<u32, SnippetVersion>) -> SnippetVersion {
    if let Some(head) = snippet.head_rev.and_then(|rev| versions.get(&rev)) {
        return head.clone();
    }
    if let Some((_, highest)) = versions.iter().next_back() {
        return highest.clone();
    }
    SnippetVersion {
        rev: snippet.head_rev.unwrap_or(0),
        body: snippet.body.clone(),
        hash: sha256_hex(snippet.body.as_bytes()),
    }
}

/// A successful lookup.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedSnippet<'a> {
    pub entry: &'a SnippetIndexEntry,
    pub version: &'a SnippetVersion,
}

impl<'a> ResolvedSnippet<'a> {
    pub fn id(&self) -> &'a str {
        &self.entry.snippet.id
    }

    pub fn path(&self) -> &'a str {
        &self.entry.snippet.path
    }
}

#[derive(Debug, Clone, Default)]
pub struct SnippetIndex {
    by_id: BTreeMap<String, SnippetIndexEntry>,
    by_path: BTreeMap<String, String>,
}

impl SnippetIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(bundles: &[SnippetBundle]) -> Self {
        let mut index = Self::new();
        for bundle in bundles {
            index.insert(SnippetIndexEntry::from_bundle(bundle));
        }
        index
    }

    pub fn insert(&mut self, entry: SnippetIndexEntry) {
        if !entry.snippet.path.is_empty() {
            self.by_path
                .insert(entry.snippet.path.clone(), entry.snippet.id.clone());
        }
        self.by_id.insert(entry.snippet.id.clone(), entry);
    }

    pub fn get(&self, id: &str) -> Option<&SnippetIndexEntry> {
        self.by_id.get(id)
    }

    pub fn get_by_path(&self, path: &str) -> Option<&SnippetIndexEntry> {
        self.by_path.get(path).and_then(|id| self.by_id.get(id))
    }

    /// Id first, then logical path.
    pub fn lookup(&self, identifier: &str) -> Option<&SnippetIndexEntry> {
        self.get(identifier).or_else(|| self.get_by_path(identifier))
    }

    /// Lookup honoring an explicit revision pin.
    pub fn resolve(&self, identifier: &str, revision: Option<u32>) -> Option<ResolvedSnippet<'_>> {
        let entry = self.lookup(identifier)?;
        let version = entry.version(revision)?;
        Some(ResolvedSnippet { entry, version })
    }

    /// Resolve a scanned `{{> ...}}` token. Out-of-range pins never resolve.
    pub fn resolve_token(&self, token: &TransclusionToken) -> Option<ResolvedSnippet<'_>> {
        if token.invalid_revision.is_some() {
            return None;
        }
        self.resolve(&token.identifier, token.revision)
    }

    /// Entries in id order.
    pub fn entries(&self) -> impl Iterator<Item = &SnippetIndexEntry> {
        self.by_id.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn bundle(id: &str, path: &str, head_rev: Option<u32>, revs: &[u32]) -> SnippetBundle {
        SnippetBundle {
            snippet: Snippet {
                id: id.to_string(),
                title: id.to_string(),
                path: path.to_string(),
                frontmatter: Map::new(),
                body: format!("{} draft body", id),
                head_rev,
            },
            versions: revs
                .iter()
                .map(|rev| SnippetVersion {
                    rev: *rev,
                    body: format!("{} v{}", id, rev),
                    hash: format!("h{}", rev),
                })
                .collect(),
        }
    }

    #[test]
    fn test_head_prefers_declared_revision() {
        let index = SnippetIndex::build(&[bundle("s1", "a/s1", Some(2), &[1, 2, 3])]);
        assert_eq!(index.get("s1").unwrap().head.rev, 2);
    }

    #[test]
    fn test_head_falls_back_to_highest_revision() {
        let index = SnippetIndex::build(&[
            bundle("s1", "", Some(9), &[3, 1, 2]),
            bundle("s2", "", None, &[1, 5]),
        ]);
        assert_eq!(index.get("s1").unwrap().head.rev, 3);
        assert_eq!(index.get("s2").unwrap().head.rev, 5);
    }

    #[test]
    fn test_versionless_snippet_uses_own_body() {
        let index = SnippetIndex::build(&[bundle("s1", "", Some(4), &[])]);
        let head = &index.get("s1").unwrap().head;
        assert_eq!(head.rev, 4);
        assert_eq!(head.body, "s1 draft body");
        assert_eq!(head.hash, sha256_hex(b"s1 draft body"));
    }

    #[test]
    fn test_resolve_by_path_and_pin() {
        let index = SnippetIndex::build(&[bundle("s1", "legal/terms", None, &[1, 2])]);

        let by_path = index.resolve("legal/terms", None).unwrap();
        assert_eq!(by_path.id(), "s1");
        assert_eq!(by_path.version.rev, 2);

        let pinned = index.resolve("s1", Some(1)).unwrap();
        assert_eq!(pinned.version.body, "s1 v1");

        assert!(index.resolve("s1", Some(7)).is_none());
        assert!(index.resolve("nope", None).is_none());
    }
}
