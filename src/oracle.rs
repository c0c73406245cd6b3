//! Decision oracle: what to do with a candidate code that resembles an
//! existing one
//!
//! The oracle is an external judge (typically an LLM behind some transport)
//! consulted by the exploration pipeline. It is reached through the
//! `DecisionOracle` trait so the pipeline does not care how. When the oracle
//! fails, `fallback_decision` gives a deterministic answer from label
//! overlap alone.

use crate::codebook::{Code, CodeDraft};
use crate::config::FallbackConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Possible answers from the oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Fold the candidate into the existing code
    Merge,
    /// Keep the existing code and add the candidate beneath it
    Split,
    /// Add the candidate as a separate code
    CreateNew,
    NoAction,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Merge => "MERGE",
            Verdict::Split => "SPLIT",
            Verdict::CreateNew => "CREATE_NEW",
            Verdict::NoAction => "NO_ACTION",
        };
        f.write_str(s)
    }
}

fn default_confidence() -> f32 {
    0.5
}

/// A verdict plus the oracle's confidence and reasoning.
///
/// Deserializes from the oracle's JSON answer:
/// `{"operation": "MERGE", "confidence": 0.8, "reasoning": "...", "new_name": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(rename = "operation")]
    pub verdict: Verdict,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default, alias = "reasoning")]
    pub rationale: String,
    /// Replacement label for the merged code, if the oracle proposes one
    #[serde(rename = "new_name", alias = "new_label", default, skip_serializing_if = "Option::is_none")]
    pub new_label: Option<String>,
}

impl Decision {
    pub fn new(verdict: Verdict, confidence: f32, rationale: impl Into<String>) -> Self {
        Self {
            verdict,
            confidence,
            rationale: rationale.into(),
            new_label: None,
        }
    }

    pub fn with_new_label(mut self, label: impl Into<String>) -> Self {
        self.new_label = Some(label.into());
        self
    }

    /// Parse an oracle's raw JSON answer.
    pub fn from_json(raw: &str) -> Result<Self, OracleError> {
        serde_json::from_str(raw).map_err(|e| OracleError::InvalidResponse(e.to_string()))
    }
}

/// Errors from oracle invocations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    #[error("oracle not available: {0}")]
    Unavailable(String),
    #[error("invalid oracle response: {0}")]
    InvalidResponse(String),
    #[error("oracle invocation failed: {0}")]
    InvocationFailed(String),
}

/// Judge consulted when a candidate has a similar existing code.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// Decide what to do with `candidate` given its closest neighbour `existing`.
    async fn decide(&self, existing: &Code, candidate: &CodeDraft) -> Result<Decision, OracleError>;
}

/// Share of the smaller label's words that also occur in the other label.
///
/// Case-insensitive, whitespace-tokenized. Zero when either label has no
/// words.
pub fn label_overlap(a: &str, b: &str) -> f32 {
    let words_a: HashSet<String> = a.split_whitespace().map(str::to_lowercase).collect();
    let words_b: HashSet<String> = b.split_whitespace().map(str::to_lowercase).collect();
    let min_words = words_a.len().min(words_b.len());
    if min_words == 0 {
        return 0.0;
    }
    words_a.intersection(&words_b).count() as f32 / min_words as f32
}

/// Deterministic decision used when the oracle cannot answer.
pub fn fallback_decision(existing: &Code, candidate: &CodeDraft, config: &FallbackConfig) -> Decision {
    if existing.category != candidate.category {
        return Decision::new(
            Verdict::CreateNew,
            0.8,
            "Different functions - should be separate codes",
        );
    }

    let overlap = label_overlap(&existing.label, &candidate.label);
    if overlap > config.strong_overlap {
        Decision::new(
            Verdict::Merge,
            0.7,
            format!("High name similarity ({overlap:.2}) - likely same concept"),
        )
    } else if overlap > config.weak_overlap {
        Decision::new(
            Verdict::Merge,
            0.6,
            format!("Moderate similarity ({overlap:.2}) - merge with existing evidence"),
        )
    } else {
        Decision::new(
            Verdict::CreateNew,
            0.8,
            format!("Low similarity ({overlap:.2}) - distinct concepts"),
        )
    }
}

/// Mock oracle for testing. Answers are keyed by candidate label.
pub struct MockOracle {
    default: Result<Decision, OracleError>,
    responses: HashMap<String, Result<Decision, OracleError>>,
}

impl MockOracle {
    /// An oracle that gives the same decision for every candidate.
    pub fn always(decision: Decision) -> Self {
        Self {
            default: Ok(decision),
            responses: HashMap::new(),
        }
    }

    /// An oracle whose every call fails.
    pub fn failing() -> Self {
        Self {
            default: Err(OracleError::Unavailable("mock oracle configured as unavailable".into())),
            responses: HashMap::new(),
        }
    }

    /// Register a decision for candidates with this label.
    pub fn with_response(mut self, candidate_label: impl Into<String>, decision: Decision) -> Self {
        self.responses.insert(candidate_label.into(), Ok(decision));
        self
    }

    /// Register a failure for candidates with this label.
    pub fn with_failure(mut self, candidate_label: impl Into<String>, error: OracleError) -> Self {
        self.responses.insert(candidate_label.into(), Err(error));
        self
    }
}

#[async_trait]
impl DecisionOracle for MockOracle {
    async fn decide(&self, _existing: &Code, candidate: &CodeDraft) -> Result<Decision, OracleError> {
        self.responses
            .get(&candidate.label)
            .unwrap_or(&self.default)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codebook::{Category, Codebook, CodeId};

    fn existing(label: &str, category: Category) -> Code {
        let mut book = Codebook::new();
        let id = book.add(CodeDraft::new(label, category).with_quote("d", "q"));
        book.get(id).cloned().unwrap()
    }

    #[test]
    fn overlap_is_relative_to_shorter_label() {
        assert_eq!(label_overlap("housing crisis", "The Housing Crisis in cities"), 1.0);
        assert_eq!(label_overlap("housing crisis", "housing policy"), 0.5);
        assert_eq!(label_overlap("housing", "transit"), 0.0);
        assert_eq!(label_overlap("", "anything"), 0.0);
    }

    #[test]
    fn fallback_different_category_creates_new() {
        let code = existing("Housing crisis", Category::ProblemDefinition);
        let candidate = CodeDraft::new("Housing crisis", Category::TreatmentAdvocacy);
        let decision = fallback_decision(&code, &candidate, &FallbackConfig::default());
        assert_eq!(decision.verdict, Verdict::CreateNew);
        assert_eq!(decision.confidence, 0.8);
    }

    #[test]
    fn fallback_grades_by_overlap() {
        let config = FallbackConfig::default();
        let code = existing("Housing affordability crisis", Category::ProblemDefinition);

        let strong = CodeDraft::new("housing affordability crisis now", Category::ProblemDefinition);
        let d = fallback_decision(&code, &strong, &config);
        assert_eq!((d.verdict, d.confidence), (Verdict::Merge, 0.7));

        // 1 of 2 words
        let moderate = CodeDraft::new("housing shortage", Category::ProblemDefinition);
        let d = fallback_decision(&code, &moderate, &config);
        assert_eq!((d.verdict, d.confidence), (Verdict::Merge, 0.6));

        let weak = CodeDraft::new("transit delays", Category::ProblemDefinition);
        let d = fallback_decision(&code, &weak, &config);
        assert_eq!((d.verdict, d.confidence), (Verdict::CreateNew, 0.8));
        assert!(d.rationale.contains("0.00"));
    }

    #[test]
    fn fallback_thresholds_are_configurable() {
        let config = FallbackConfig {
            strong_overlap: 0.9,
            weak_overlap: 0.6,
        };
        let code = existing("housing crisis", Category::ProblemDefinition);
        let candidate = CodeDraft::new("housing policy", Category::ProblemDefinition);
        assert_eq!(fallback_decision(&code, &candidate, &config).verdict, Verdict::CreateNew);
    }

    #[test]
    fn decision_parses_oracle_json() {
        let d = Decision::from_json(
            r#"{"operation": "MERGE", "confidence": 0.85, "reasoning": "same idea", "new_name": "Housing"}"#,
        )
        .unwrap();
        assert_eq!(d.verdict, Verdict::Merge);
        assert_eq!(d.confidence, 0.85);
        assert_eq!(d.rationale, "same idea");
        assert_eq!(d.new_label.as_deref(), Some("Housing"));

        let minimal = Decision::from_json(r#"{"operation": "CREATE_NEW"}"#).unwrap();
        assert_eq!(minimal.confidence, 0.5);
        assert!(minimal.new_label.is_none());
    }

    #[test]
    fn malformed_decision_is_invalid_response() {
        let err = Decision::from_json(r#"{"operation": "REWRITE"}"#).unwrap_err();
        assert!(matches!(err, OracleError::InvalidResponse(_)));
        assert!(Decision::from_json("not json").is_err());
    }

    #[tokio::test]
    async fn mock_returns_keyed_then_default() {
        let oracle = MockOracle::always(Decision::new(Verdict::CreateNew, 0.9, "default"))
            .with_response("Rent", Decision::new(Verdict::Merge, 0.8, "keyed"))
            .with_failure("Broken", OracleError::InvocationFailed("boom".into()));
        let code = existing("Housing", Category::ProblemDefinition);

        let keyed = oracle
            .decide(&code, &CodeDraft::new("Rent", Category::ProblemDefinition))
            .await
            .unwrap();
        assert_eq!(keyed.verdict, Verdict::Merge);

        let default = oracle
            .decide(&code, &CodeDraft::new("Other", Category::ProblemDefinition))
            .await
            .unwrap();
        assert_eq!(default.verdict, Verdict::CreateNew);

        let err = oracle
            .decide(&code, &CodeDraft::new("Broken", Category::ProblemDefinition))
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::InvocationFailed(_)));
    }

    #[tokio::test]
    async fn failing_mock_is_unavailable() {
        let code = existing("Housing", Category::ProblemDefinition);
        let err = MockOracle::failing()
            .decide(&code, &CodeDraft::new("x", Category::ProblemDefinition).with_id(CodeId::new(9)))
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::Unavailable(_)));
    }
}
