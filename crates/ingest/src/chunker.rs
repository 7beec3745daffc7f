//! Splitting documents into chunks.
//!
//! Windows are measured in characters, not bytes, so Hangul text is never
//! cut inside a code point.

use tenantrag_core::{Chunk, ChunkMetadata, ChunkingMode, IngestionConfig, RagError, Result};

use crate::document::SourceDocument;

/// How a document is split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkingStrategy {
    /// Flat overlapping windows
    Fixed {
        /// Window size
        size: usize,
        /// Characters shared by neighbouring windows
        overlap: usize,
    },

    /// Non-overlapping parent windows, each split into overlapping children.
    /// Children are embedded; the parent text travels in metadata.
    ParentChild {
        /// Parent window size
        parent_size: usize,
        /// Child window size
        child_size: usize,
        /// Characters shared by neighbouring children
        child_overlap: usize,
    },
}

impl ChunkingStrategy {
    /// Strategy selected by `config`.
    pub fn from_config(config: &IngestionConfig) -> Result<Self> {
        let strategy = match config.chunking {
            ChunkingMode::Fixed => Self::Fixed {
                size: config.chunk_size,
                overlap: config.chunk_overlap,
            },
            ChunkingMode::ParentChild => Self::ParentChild {
                parent_size: config.parent_size,
                child_size: config.child_size,
                child_overlap: config.child_overlap,
            },
        };
        strategy.validate()?;
        Ok(strategy)
    }

    /// Reject windows that cannot make progress.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Fixed { size, overlap } if size == 0 || overlap >= size => Err(RagError::config(format!(
                "chunk overlap {overlap} must be smaller than chunk size {size}"
            ))),
            Self::ParentChild {
                parent_size,
                child_size,
                child_overlap,
            } if child_size == 0 || child_overlap >= child_size || child_size > parent_size => {
                Err(RagError::config(format!(
                    "child windows ({child_size}/{child_overlap}) must fit parent windows of {parent_size}"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Overlapping character windows over `text`.
///
/// The last window ends at the end of the text; no window is a suffix of
/// its predecessor. Blank windows are skipped.
pub fn split_windows(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() || size == 0 {
        return vec![];
    }
    let step = size.saturating_sub(overlap).max(1);

    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + size).min(chars.len());
        let window: String = chars[start..end].iter().collect();
        if !window.trim().is_empty() {
            windows.push(window);
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    windows
}

/// Turns source documents into chunks for one namespace.
#[derive(Debug, Clone)]
pub struct Chunker {
    strategy: ChunkingStrategy,
}

impl Chunker {
    /// Create a chunker, validating the strategy.
    pub fn new(strategy: ChunkingStrategy) -> Result<Self> {
        strategy.validate()?;
        Ok(Self { strategy })
    }

    /// Strategy in use.
    pub fn strategy(&self) -> ChunkingStrategy {
        self.strategy
    }

    /// Chunks of `document`, numbered from zero.
    pub fn chunk(&self, document: &SourceDocument, namespace: &str) -> Vec<Chunk> {
        let base = ChunkMetadata {
            owner_id: document.owner_id.clone(),
            tenant_id: document.tenant_id.clone(),
            clearance: document.clearance,
            document_id: document.id.clone(),
            chunk_index: 0,
            doc_type: document.doc_type.clone(),
            parent_id: None,
            parent_text: None,
            extra: document.metadata.clone(),
        };

        let pieces: Vec<(String, Option<(String, String)>)> = match self.strategy {
            ChunkingStrategy::Fixed { size, overlap } => split_windows(&document.content, size, overlap)
                .into_iter()
                .map(|text| (text, None))
                .collect(),
            ChunkingStrategy::ParentChild {
                parent_size,
                child_size,
                child_overlap,
            } => split_windows(&document.content, parent_size, 0)
                .into_iter()
                .enumerate()
                .flat_map(|(p, parent)| {
                    let parent_id = format!("{}#p{p}", document.id);
                    split_windows(&parent, child_size, child_overlap)
                        .into_iter()
                        .map(move |child| (child, Some((parent_id.clone(), parent.clone()))))
                        .collect::<Vec<_>>()
                })
                .collect(),
        };

        pieces
            .into_iter()
            .enumerate()
            .map(|(index, (text, parent))| {
                let mut metadata = base.clone();
                metadata.chunk_index = index;
                if let Some((parent_id, parent_text)) = parent {
                    metadata.parent_id = Some(parent_id);
                    metadata.parent_text = Some(parent_text);
                }
                Chunk::new(text, namespace, metadata)
            })
            .collect()
    }
}
