//! Repository Search Boundary
//!
//! The retrieval backend is an opaque collaborator behind the `SearchIndex`
//! trait, injected by reference wherever it is needed. `StaticIndex` is a
//! small in-memory implementation used by the CLI and the tests; a real
//! vector store plugs in through the same trait.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

/// One search result. The metadata carries enough identity to deduplicate
/// hits by `(file_path, content_hash)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    pub metadata: HitMetadata,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HitMetadata {
    pub file_path: String,
    pub content_hash: String,
    pub score: f64,
}

/// Opaque `search(query, top_k)` boundary to the retrieval backend.
pub trait SearchIndex: Send + Sync {
    fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>>;
}

/// Content fingerprint used for deduplication across overlapping queries.
pub fn content_fingerprint(content: &str) -> String {
    let digest = Sha3_256::digest(content.as_bytes());
    hex::encode(&digest[..8])
}

// ─── Static In-Memory Index ──────────────────────────────────────

/// A file indexed for retrieval.
#[derive(Clone, Debug)]
struct IndexedFile {
    path: String,
    content: String,
    fingerprint: String,
}

/// In-memory index over a set of source files, scored by query-term
/// occurrence counts. Ranking quality is not the point; it exists so the
/// agent has a working `code_search` without an external vector store.
pub struct StaticIndex {
    files: Vec<IndexedFile>,
}

impl StaticIndex {
    /// Build an index from `(path, content)` pairs.
    pub fn from_files(files: Vec<(String, String)>) -> Self {
        let files = files
            .into_iter()
            .map(|(path, content)| {
                let fingerprint = content_fingerprint(&content);
                IndexedFile {
                    path,
                    content,
                    fingerprint,
                }
            })
            .collect();
        StaticIndex { files }
    }

    /// Recursively load every readable UTF-8 file under `root`. Hidden
    /// entries and `target/` build output are skipped.
    pub fn load_dir(root: &Path) -> Result<Self> {
        let mut files = Vec::new();
        collect_files(root, root, &mut files)
            .with_context(|| format!("Failed to index directory {}", root.display()))?;
        Ok(Self::from_files(files))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<(String, String)>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || name == "target" {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(content) = fs::read_to_string(&path) {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .to_string();
            out.push((rel, content));
        }
    }
    Ok(())
}

impl SearchIndex for StaticIndex {
    fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();

        let mut hits: Vec<SearchHit> = self
            .files
            .iter()
            .filter_map(|file| {
                let haystack = file.content.to_lowercase();
                let score: usize = terms.iter().map(|t| haystack.matches(t.as_str()).count()).sum();
                if score == 0 {
                    return None;
                }
                Some(SearchHit {
                    content: file.content.clone(),
                    metadata: HitMetadata {
                        file_path: file.path.clone(),
                        content_hash: file.fingerprint.clone(),
                        score: score as f64,
                    },
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.metadata
                .score
                .partial_cmp(&a.metadata.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}
