//! Aggregate statistics over a codebook

use super::book::Codebook;
use super::code::Category;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Summary of a codebook's size and shape
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodebookStats {
    pub total_codes: usize,
    pub root_codes: usize,
    pub child_codes: usize,
    /// Deepest level reached; a lone root is depth 0
    pub max_depth: usize,
    /// Number of codes at each depth
    pub codes_by_level: BTreeMap<usize, usize>,
    /// Number of codes per category
    pub function_distribution: BTreeMap<Category, usize>,
    pub total_evidence_quotes: usize,
    /// Distinct source documents quoted anywhere in the codebook
    pub documents_cited: usize,
    pub codes_with_embedding: usize,
    pub orphan_codes: usize,
    pub next_id: u64,
}

impl Codebook {
    /// Compute aggregate statistics.
    pub fn statistics(&self) -> CodebookStats {
        let mut stats = CodebookStats {
            total_codes: self.len(),
            next_id: self.next_id().get(),
            ..Default::default()
        };
        let parents: HashSet<_> = self.codes().filter_map(|c| c.parent).collect();
        let mut documents = HashSet::new();

        for code in self.codes() {
            if code.is_root() {
                stats.root_codes += 1;
            } else {
                stats.child_codes += 1;
            }

            let depth = self.depth(code.id);
            stats.max_depth = stats.max_depth.max(depth);
            *stats.codes_by_level.entry(depth).or_default() += 1;
            *stats.function_distribution.entry(code.category).or_default() += 1;

            stats.total_evidence_quotes += code.evidence.quote_count();
            documents.extend(code.evidence.documents());
            if code.embedding.is_some() {
                stats.codes_with_embedding += 1;
            }
            if code.evidence.is_empty() && !parents.contains(&code.id) {
                stats.orphan_codes += 1;
            }
        }
        stats.documents_cited = documents.len();
        stats
    }
}
