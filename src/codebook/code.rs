//! Code representation in the codebook

use super::evidence::Evidence;
use crate::storage::timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Label given to a code whose id is not known yet.
pub const UNNAMED_LABEL: &str = "Unnamed Code";

/// Unique identifier for a code within one codebook
///
/// Serializes as a plain integer (`"code_id": 7`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeId(u64);

impl CodeId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the inner integer value
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for CodeId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for CodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Analytical function a code performs (Entman's four frame functions).
///
/// Serialized under the snapshot key `function`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    ProblemDefinition,
    CausalAttribution,
    MoralEvaluation,
    TreatmentAdvocacy,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::ProblemDefinition,
        Category::CausalAttribution,
        Category::MoralEvaluation,
        Category::TreatmentAdvocacy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::ProblemDefinition => "PROBLEM_DEFINITION",
            Category::CausalAttribution => "CAUSAL_ATTRIBUTION",
            Category::MoralEvaluation => "MORAL_EVALUATION",
            Category::TreatmentAdvocacy => "TREATMENT_ADVOCACY",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Error returned when a string names no known category.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category `{0}` (expected one of PROBLEM_DEFINITION, CAUSAL_ATTRIBUTION, MORAL_EVALUATION, TREATMENT_ADVOCACY)")]
pub struct ParseCategoryError(String);

impl FromStr for Category {
    type Err = ParseCategoryError;

    /// Accepts `PROBLEM_DEFINITION`, `problem-definition`, `problem_definition`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| ParseCategoryError(s.to_string()))
    }
}

/// Placeholder label for a code whose label is blank.
pub fn placeholder_label(id: Option<CodeId>) -> String {
    match id {
        Some(id) => format!("Code {}", id),
        None => UNNAMED_LABEL.to_string(),
    }
}

/// Return `label` unless it is empty or whitespace-only, else the placeholder.
pub fn normalize_label(label: &str, id: Option<CodeId>) -> String {
    if label.trim().is_empty() {
        placeholder_label(id)
    } else {
        label.to_string()
    }
}

/// A node in the codebook taxonomy
///
/// Field names on the wire follow the snapshot format (`code_id`, `name`,
/// `function`, `parent_code_id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Code {
    /// Unique identifier
    #[serde(rename = "code_id")]
    pub id: CodeId,
    /// Display label, never blank
    #[serde(rename = "name")]
    pub label: String,
    /// Analytical function
    #[serde(rename = "function")]
    pub category: Category,
    /// Supporting quotes grouped by source document
    #[serde(default)]
    pub evidence: Evidence,
    /// Embedding of the label, absent until computed
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub updated_at: DateTime<Utc>,
    /// Parent code; `None` for roots
    #[serde(rename = "parent_code_id", default)]
    pub parent: Option<CodeId>,
}

impl Code {
    /// Whether this code has no parent.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Refresh the last modified timestamp
    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// A code that has not been added to a codebook yet.
///
/// Candidates extracted from a document, and the codes built from operation
/// payloads, start out as drafts. `Codebook::add` turns a draft into a
/// `Code`, assigning an id when none is given.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeDraft {
    pub id: Option<CodeId>,
    pub label: String,
    pub category: Category,
    pub evidence: Evidence,
    pub embedding: Option<Vec<f32>>,
    pub parent: Option<CodeId>,
}

impl CodeDraft {
    pub fn new(label: impl Into<String>, category: Category) -> Self {
        Self {
            id: None,
            label: label.into(),
            category,
            evidence: Evidence::new(),
            embedding: None,
            parent: None,
        }
    }

    pub fn with_id(mut self, id: CodeId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence = evidence;
        self
    }

    /// Add one quote for a document (deduplicated).
    pub fn with_quote(mut self, document: impl Into<String>, quote: impl Into<String>) -> Self {
        self.evidence.insert(document, quote);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_parent(mut self, parent: CodeId) -> Self {
        self.parent = Some(parent);
        self
    }
}
