//! Codebook: an evolving taxonomy for qualitative text analysis
//!
//! A codebook holds labelled codes, each tagged with an analytical function
//! and backed by verbatim quotes from source documents. Codes form a forest:
//! evidence added to a child is copied up to its parent, so broader codes
//! always see the quotes of their narrower ones.
//!
//! # Core Concepts
//!
//! - **Codes**: labelled units with a category, evidence and an optional embedding
//! - **Operations**: declarative mutations (create, delete, merge, create parent, split)
//!   applied atomically by `Codebook::execute`
//! - **Similarity**: cosine search over embeddings, with a label fallback
//! - **Exploration**: candidate codes from a document, judged by a `DecisionOracle`
//!   and turned into operations
//!
//! # Example
//!
//! ```
//! use codebook::{Category, CodePayload, Codebook, Evidence, Operation};
//!
//! let mut book = Codebook::new();
//! let op = Operation::create(
//!     CodePayload::new()
//!         .label("Housing crisis")
//!         .category(Category::ProblemDefinition)
//!         .evidence(Evidence::from_quotes("article-1", ["Rents doubled"])),
//! );
//! assert!(book.execute(&op));
//! assert_eq!(book.len(), 1);
//! ```

mod codebook;
pub mod config;
pub mod embedding;
pub mod exploration;
pub mod oracle;
pub mod similarity;
pub mod storage;

pub use codebook::{
    normalize_label, placeholder_label, Category, Code, CodeDraft, CodeId, CodePayload, Codebook,
    CodebookStats, Evidence, Operation, OperationError, OperationKind, Outcome, ParseCategoryError,
    UNNAMED_LABEL,
};
pub use config::{CodebookConfig, ConfigError};
pub use embedding::{Embedder, EmbeddingError};
pub use exploration::{BatchReport, Explorer, OperationRecord};
pub use oracle::{Decision, DecisionOracle, OracleError, Verdict};
pub use similarity::{cosine_similarity, Match, Query, SimilarityEngine};
pub use storage::{JsonFileStore, SnapshotError, SnapshotStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
