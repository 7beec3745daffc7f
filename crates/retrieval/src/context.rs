//! Context assembly for the answer generator.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tenantrag_cache::CacheLayer;
use tenantrag_core::{content_hash, keys, Result, SearchMatch};
use tracing::debug;

/// Generates the final answer from a query and its assembled context.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Answer `query` using only `context`.
    async fn generate(&self, query: &str, context: &str) -> Result<String>;
}

/// Text of a match used as context: parent window first, then chunk text.
fn match_text(m: &SearchMatch) -> Option<&str> {
    m.meta_str(keys::PARENT_TEXT).or_else(|| m.meta_str(keys::TEXT))
}

/// Chunk cache reference: vector id plus the hash of the text version it
/// stands for, so a re-ingested chunk never reads an older text.
fn chunk_reference(m: &SearchMatch) -> Option<String> {
    let version = match m.meta_str(keys::PARENT_TEXT) {
        Some(parent) => content_hash(parent),
        None => m.meta_str(keys::CONTENT_HASH)?.to_string(),
    };
    Some(format!("{}:{version}", m.id))
}

/// Concatenate numbered context blocks from `matches` up to `max_chars`.
///
/// Identical texts (children of the same parent) are included once. The
/// block that crosses the limit is cut at a character boundary.
pub fn assemble_context(matches: &[SearchMatch], max_chars: usize) -> String {
    let texts: Vec<Option<String>> = matches.iter().map(|m| match_text(m).map(str::to_string)).collect();
    assemble(matches, &texts, max_chars)
}

fn assemble(matches: &[SearchMatch], texts: &[Option<String>], max_chars: usize) -> String {
    let mut out = String::new();
    let mut used = 0;
    let mut seen: HashSet<&str> = HashSet::new();
    let mut n = 0;

    for (m, text) in matches.iter().zip(texts) {
        let Some(text) = text.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
            continue;
        };
        if !seen.insert(text) {
            continue;
        }

        n += 1;
        let source = m.meta_str(keys::DOCUMENT_ID).unwrap_or(m.id.as_str());
        let block = format!("[{n}] ({source})\n{text}\n\n");
        let len = block.chars().count();
        if used + len > max_chars {
            let room = max_chars.saturating_sub(used);
            out.extend(block.chars().take(room));
            break;
        }
        out.push_str(&block);
        used += len;
    }
    out.trim_end().to_string()
}

/// Context assembly backed by the chunk text cache.
pub struct ContextAssembler {
    cache: Arc<CacheLayer>,
}

impl ContextAssembler {
    /// Create a new assembler.
    pub fn new(cache: Arc<CacheLayer>) -> Self {
        Self { cache }
    }

    /// Like [`assemble_context`], reading texts through the chunk cache.
    ///
    /// Entries are keyed by id and content hash. Misses fall back to stored
    /// metadata and are written back; matches without a hash bypass the cache.
    pub async fn assemble_context(&self, matches: &[SearchMatch], max_chars: usize) -> String {
        let references: Vec<Option<String>> = matches.iter().map(chunk_reference).collect();
        let keyed: Vec<String> = references.iter().flatten().cloned().collect();
        let mut cached = self.cache.get_chunk_texts(&keyed).await.into_iter();

        let mut misses: Vec<(String, String)> = Vec::new();
        let texts: Vec<Option<String>> = matches
            .iter()
            .zip(&references)
            .map(|(m, reference)| {
                let Some(reference) = reference else {
                    return match_text(m).map(str::to_string);
                };
                cached.next().flatten().or_else(|| {
                    let text = match_text(m)?.to_string();
                    misses.push((reference.clone(), text.clone()));
                    Some(text)
                })
            })
            .collect();

        debug!(matches = matches.len(), cache_misses = misses.len(), "Assembling context");
        if !misses.is_empty() {
            self.cache.put_chunk_texts(&misses).await;
        }
        assemble(matches, &texts, max_chars)
    }
}
