//! Operations: intents to mutate the codebook

use super::code::{Category, CodeDraft, CodeId};
use super::evidence::Evidence;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// What an operation does to the codebook.
///
/// The older spellings (`CREATE_CODE`, `MERGE_TO_EXISTING`, ...) are
/// accepted on input; `UPDATE_CODE` is the same patch as
/// `MERGE_INTO_EXISTING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    #[serde(alias = "CREATE_CODE")]
    Create,
    #[serde(alias = "DELETE_CODE")]
    Delete,
    #[serde(alias = "MERGE_TO_EXISTING", alias = "UPDATE_CODE")]
    MergeIntoExisting,
    CreateParent,
    #[serde(alias = "SPLIT_CODE")]
    Split,
    NoAction,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "CREATE",
            OperationKind::Delete => "DELETE",
            OperationKind::MergeIntoExisting => "MERGE_INTO_EXISTING",
            OperationKind::CreateParent => "CREATE_PARENT",
            OperationKind::Split => "SPLIT",
            OperationKind::NoAction => "NO_ACTION",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Field mapping used to build or patch a code.
///
/// Unknown keys are rejected at deserialization, so a misspelled field
/// fails loudly instead of being dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodePayload {
    #[serde(rename = "code_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CodeId>,
    #[serde(rename = "name", alias = "label", default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "function", alias = "category", default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Evidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(rename = "parent_code_id", alias = "parent", default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<CodeId>,
}

impl CodePayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: CodeId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn evidence(mut self, evidence: Evidence) -> Self {
        self.evidence = Some(evidence);
        self
    }

    /// Add one quote to the payload evidence.
    pub fn quote(mut self, document: impl Into<String>, quote: impl Into<String>) -> Self {
        self.evidence.get_or_insert_with(Evidence::new).insert(document, quote);
        self
    }

    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn parent(mut self, parent: CodeId) -> Self {
        self.parent = Some(parent);
        self
    }
}

impl From<CodeDraft> for CodePayload {
    fn from(draft: CodeDraft) -> Self {
        Self {
            id: draft.id,
            label: Some(draft.label),
            category: Some(draft.category),
            evidence: Some(draft.evidence),
            embedding: draft.embedding,
            parent: draft.parent,
        }
    }
}

/// An intent to mutate the codebook, applied by `Codebook::execute`.
///
/// `confidence` and `rationale` record where the operation came from; they
/// never affect execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(alias = "operation_type")]
    pub kind: OperationKind,
    #[serde(rename = "target_id", alias = "target_code_id", default, skip_serializing_if = "Option::is_none")]
    pub target: Option<CodeId>,
    #[serde(rename = "source_id", alias = "source_code_id", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<CodeId>,
    #[serde(alias = "new_code_data", default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<CodePayload>,
    #[serde(default = "default_confidence", deserialize_with = "deserialize_confidence")]
    pub confidence: f32,
    #[serde(alias = "reasoning", default)]
    pub rationale: String,
}

fn default_confidence() -> f32 {
    1.0
}

/// Confidence is kept in [0, 1]; NaN counts as no confidence.
fn clamp_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

fn deserialize_confidence<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    f32::deserialize(deserializer).map(clamp_confidence)
}

impl Operation {
    fn bare(kind: OperationKind) -> Self {
        Self {
            kind,
            target: None,
            source: None,
            payload: None,
            confidence: default_confidence(),
            rationale: String::new(),
        }
    }

    /// Create a new code from `payload`.
    pub fn create(payload: CodePayload) -> Self {
        Self {
            payload: Some(payload),
            ..Self::bare(OperationKind::Create)
        }
    }

    pub fn delete(target: CodeId) -> Self {
        Self {
            target: Some(target),
            ..Self::bare(OperationKind::Delete)
        }
    }

    /// Patch `target` with the fields present in `payload`.
    pub fn merge_into(target: CodeId, payload: CodePayload) -> Self {
        Self {
            target: Some(target),
            payload: Some(payload),
            ..Self::bare(OperationKind::MergeIntoExisting)
        }
    }

    /// Insert a parent above `target` (and `source`, if given).
    pub fn create_parent(target: CodeId, source: Option<CodeId>, payload: CodePayload) -> Self {
        Self {
            target: Some(target),
            source,
            payload: Some(payload),
            ..Self::bare(OperationKind::CreateParent)
        }
    }

    /// Create a new code next to `target`, parented under it unless the
    /// payload names another parent.
    pub fn split(target: CodeId, payload: CodePayload) -> Self {
        Self {
            target: Some(target),
            payload: Some(payload),
            ..Self::bare(OperationKind::Split)
        }
    }

    pub fn no_action(target: Option<CodeId>) -> Self {
        Self {
            target,
            ..Self::bare(OperationKind::NoAction)
        }
    }

    /// Set the confidence, clamped to `[0, 1]`.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = clamp_confidence(confidence);
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }
}
