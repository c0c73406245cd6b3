//! Similarity search over a codebook
//!
//! Ranks existing codes against a candidate. With an embedding, codes of the
//! same category are scored by cosine similarity and filtered by threshold.
//! Without one, a label substring heuristic stands in and every hit gets a
//! fixed score.

use crate::codebook::{Category, Code, CodeDraft, CodeId, Codebook};
use crate::config::SimilarityConfig;
use std::cmp::Ordering;

/// Default minimum cosine similarity for a match
pub const DEFAULT_THRESHOLD: f32 = 0.6;

/// Score given to label-substring matches
pub const FALLBACK_SCORE: f32 = 0.9;

/// What a code is compared by: identity, label, category and embedding.
#[derive(Debug, Clone, Copy)]
pub struct Query<'a> {
    /// Excluded from results when set (a code never matches itself)
    pub id: Option<CodeId>,
    pub label: &'a str,
    pub category: Category,
    pub embedding: Option<&'a [f32]>,
}

impl<'a> From<&'a Code> for Query<'a> {
    fn from(code: &'a Code) -> Self {
        Self {
            id: Some(code.id),
            label: &code.label,
            category: code.category,
            embedding: code.embedding.as_deref(),
        }
    }
}

impl<'a> From<&'a CodeDraft> for Query<'a> {
    fn from(draft: &'a CodeDraft) -> Self {
        Self {
            id: draft.id,
            label: &draft.label,
            category: draft.category,
            embedding: draft.embedding.as_deref(),
        }
    }
}

/// An existing code and how similar it is to the query
#[derive(Debug, Clone, Copy)]
pub struct Match<'a> {
    pub code: &'a Code,
    pub score: f32,
}

/// Ranks codebook entries by similarity to a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityEngine {
    threshold: f32,
    fallback_score: f32,
}

impl Default for SimilarityEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimilarityEngine {
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            fallback_score: FALLBACK_SCORE,
        }
    }

    pub fn from_config(config: &SimilarityConfig) -> Self {
        Self {
            threshold: config.threshold,
            fallback_score: config.fallback_score,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Rank codes similar to `query`, best first, using the configured threshold.
    pub fn rank<'a, 'q>(&self, codebook: &'a Codebook, query: impl Into<Query<'q>>) -> Vec<Match<'a>> {
        self.rank_with_threshold(codebook, query, self.threshold)
    }

    /// Rank codes similar to `query` against an explicit threshold.
    ///
    /// The threshold applies to cosine scores only; substring matches are
    /// always kept at the fallback score.
    pub fn rank_with_threshold<'a, 'q>(
        &self,
        codebook: &'a Codebook,
        query: impl Into<Query<'q>>,
        threshold: f32,
    ) -> Vec<Match<'a>> {
        let query = query.into();
        let candidates = codebook
            .codes()
            .filter(|c| Some(c.id) != query.id && c.category == query.category);

        let Some(probe) = query.embedding else {
            return candidates
                .filter(|c| labels_overlap(query.label, &c.label))
                .map(|code| Match {
                    code,
                    score: self.fallback_score,
                })
                .collect();
        };

        let mut matches: Vec<Match<'a>> = candidates
            .filter_map(|code| {
                let embedding = code.embedding.as_deref()?;
                let score = cosine_similarity(probe, embedding);
                (score >= threshold).then_some(Match { code, score })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.code.id.cmp(&b.code.id))
        });
        matches
    }
}

/// Case-insensitive containment of either label in the other.
///
/// Blank labels never match.
fn labels_overlap(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}

/// Cosine similarity between two vectors.
///
/// Vectors of different length, or with zero magnitude, score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codebook::Evidence;

    fn code(book: &mut Codebook, label: &str, category: Category, embedding: Option<Vec<f32>>) -> CodeId {
        let mut draft = CodeDraft::new(label, category).with_evidence(Evidence::from_quotes("d", [label]));
        draft.embedding = embedding;
        book.add(draft)
    }

    #[test]
    fn identical_vectors_match_and_orthogonal_do_not() {
        let mut book = Codebook::new();
        let same = code(&mut book, "same", Category::ProblemDefinition, Some(vec![1.0, 0.0]));
        code(&mut book, "orthogonal", Category::ProblemDefinition, Some(vec![0.0, 1.0]));

        let candidate = CodeDraft::new("candidate", Category::ProblemDefinition).with_embedding(vec![1.0, 0.0]);
        let ranked = SimilarityEngine::new().rank(&book, &candidate);

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].code.id, same);
        assert_eq!(ranked[0].score, 1.0);
    }

    #[test]
    fn results_sorted_by_descending_similarity() {
        let mut book = Codebook::new();
        let close = code(&mut book, "close", Category::MoralEvaluation, Some(vec![0.85, 0.35, 0.15]));
        let closest = code(&mut book, "closest", Category::MoralEvaluation, Some(vec![0.9, 0.3, 0.1]));
        code(&mut book, "far", Category::MoralEvaluation, Some(vec![0.1, 0.2, 0.95]));

        let candidate =
            CodeDraft::new("query", Category::MoralEvaluation).with_embedding(vec![0.9, 0.3, 0.1]);
        let ranked = SimilarityEngine::new().rank(&book, &candidate);

        let ids: Vec<CodeId> = ranked.iter().map(|m| m.code.id).collect();
        assert_eq!(ids, vec![closest, close]);
        assert!(ranked[0].score >= ranked[1].score);
    }

    #[test]
    fn other_categories_and_unembedded_codes_are_skipped() {
        let mut book = Codebook::new();
        code(&mut book, "other category", Category::CausalAttribution, Some(vec![1.0, 0.0]));
        code(&mut book, "no vector", Category::ProblemDefinition, None);

        let candidate = CodeDraft::new("no vector", Category::ProblemDefinition).with_embedding(vec![1.0, 0.0]);
        assert!(SimilarityEngine::new().rank(&book, &candidate).is_empty());
    }

    #[test]
    fn existing_code_never_matches_itself() {
        let mut book = Codebook::new();
        let id = code(&mut book, "self", Category::ProblemDefinition, Some(vec![1.0, 1.0]));
        let twin = code(&mut book, "twin", Category::ProblemDefinition, Some(vec![1.0, 1.0]));

        let query = book.get(id).unwrap();
        let ranked = SimilarityEngine::new().rank(&book, query);

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].code.id, twin);
    }

    #[test]
    fn mismatched_lengths_score_zero() {
        let mut book = Codebook::new();
        code(&mut book, "short", Category::ProblemDefinition, Some(vec![1.0]));

        let candidate = CodeDraft::new("long", Category::ProblemDefinition).with_embedding(vec![1.0, 0.0]);
        assert!(SimilarityEngine::new().rank(&book, &candidate).is_empty());
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn threshold_is_caller_tunable() {
        let mut book = Codebook::new();
        code(&mut book, "loose", Category::ProblemDefinition, Some(vec![1.0, 1.0]));
        let candidate = CodeDraft::new("probe", Category::ProblemDefinition).with_embedding(vec![1.0, 0.0]);

        // cos = 0.707...
        let engine = SimilarityEngine::new();
        assert_eq!(engine.rank(&book, &candidate).len(), 1);
        assert!(engine.with_threshold(0.8).rank(&book, &candidate).is_empty());
        assert_eq!(engine.rank_with_threshold(&book, &candidate, 0.7).len(), 1);
    }

    #[test]
    fn fallback_matches_label_substrings_within_category() {
        let mut book = Codebook::new();
        let housing = code(&mut book, "Housing crisis", Category::ProblemDefinition, Some(vec![1.0]));
        let short = code(&mut book, "crisis", Category::ProblemDefinition, None);
        code(&mut book, "Housing crisis", Category::TreatmentAdvocacy, None);
        code(&mut book, "Transit", Category::ProblemDefinition, None);

        let candidate = CodeDraft::new("housing CRISIS in cities", Category::ProblemDefinition);
        let ranked = SimilarityEngine::new().rank(&book, &candidate);

        let ids: Vec<CodeId> = ranked.iter().map(|m| m.code.id).collect();
        assert_eq!(ids, vec![housing, short]);
        assert!(ranked.iter().all(|m| m.score == FALLBACK_SCORE));
    }

    #[test]
    fn blank_labels_never_fallback_match() {
        let mut book = Codebook::new();
        code(&mut book, "Anything", Category::ProblemDefinition, None);
        let candidate = CodeDraft::new("   ", Category::ProblemDefinition);
        assert!(SimilarityEngine::new().rank(&book, &candidate).is_empty());
    }

    #[test]
    fn cosine_similarity_correct() {
        let a = [1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &[1.0, 0.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
    }
}
