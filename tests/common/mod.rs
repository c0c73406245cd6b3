//! Common test utilities for codebook integration tests
//!
//! Builders for small hierarchies, quote generation, and a label-keyed mock
//! embedder.

#![allow(dead_code)]

use codebook::{Category, CodeDraft, CodeId, Codebook, Embedder, EmbeddingError, Evidence};
use std::collections::HashMap;

/// Evidence with one quote per `(document, quote)` pair
pub fn evidence(pairs: &[(&str, &str)]) -> Evidence {
    pairs.iter().copied().collect()
}

/// A problem-definition draft carrying a single quote
pub fn draft(label: &str, document: &str, quote: &str) -> CodeDraft {
    CodeDraft::new(label, Category::ProblemDefinition).with_quote(document, quote)
}

/// Ids of a three-level chain built by [`chain`]
#[derive(Debug, Clone, Copy)]
pub struct Chain {
    pub root: CodeId,
    pub middle: CodeId,
    pub leaf: CodeId,
}

/// Build root -> middle -> leaf, each with one quote from its own document.
pub fn chain(book: &mut Codebook) -> Chain {
    let root = book.add(draft("Social Problems", "article1", "Root level evidence"));
    let middle = book.add(draft("Urban Issues", "article2", "Urban problems overview").with_parent(root));
    let leaf = book.add(draft("Traffic Problems", "article3", "Traffic congestion data").with_parent(middle));
    Chain { root, middle, leaf }
}

/// Embedder returning preset vectors by label, `[0, 0, 1]` otherwise
pub struct MockEmbedder {
    vectors: HashMap<String, Vec<f32>>,
}

impl MockEmbedder {
    pub fn new(pairs: &[(&str, [f32; 3])]) -> Self {
        Self {
            vectors: pairs
                .iter()
                .map(|(label, v)| (label.to_string(), v.to_vec()))
                .collect(),
        }
    }
}

impl Embedder for MockEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|t| self.vectors.get(*t).cloned().unwrap_or_else(|| vec![0.0, 0.0, 1.0]))
            .collect())
    }
}
