//! Exploration pipeline: turn candidate codes from a document into
//! codebook operations
//!
//! For each candidate the `Explorer` looks up the most similar existing code.
//! Without a neighbour the candidate is created outright. With one, the
//! `DecisionOracle` chooses between merging, splitting, creating a separate
//! code, or doing nothing; if the oracle fails the deterministic fallback
//! decides instead. `process_document` plans and applies one candidate at
//! a time, so later candidates see the codes earlier ones created or merged.

use crate::codebook::{
    Code, CodeDraft, CodeId, CodePayload, Codebook, Evidence, Operation, OperationKind,
};
use crate::config::{CodebookConfig, FallbackConfig};
use crate::embedding::{Embedder, EmbeddingError};
use crate::oracle::{fallback_decision, Decision, DecisionOracle, Verdict};
use crate::similarity::SimilarityEngine;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Confidence of a create planned because nothing similar exists
const UNMATCHED_CONFIDENCE: f32 = 0.9;

/// Result of applying one planned operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationRecord {
    /// Position in the applied batch
    pub index: usize,
    pub kind: OperationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<CodeId>,
    pub confidence: f32,
    pub succeeded: bool,
    /// Code created by the operation, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<CodeId>,
    /// Rejection reason for failed operations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of an applied batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub session_id: Uuid,
    pub records: Vec<OperationRecord>,
    pub succeeded: usize,
    pub failed: usize,
    /// Orphans removed after the batch, when pruning is enabled
    pub pruned: Vec<CodeId>,
}

impl BatchReport {
    /// Fraction of operations that succeeded; 0.0 for an empty batch.
    pub fn success_rate(&self) -> f32 {
        let total = self.succeeded + self.failed;
        if total == 0 {
            0.0
        } else {
            self.succeeded as f32 / total as f32
        }
    }
}

/// Drives a codebook through batches of candidate codes.
pub struct Explorer<O> {
    codebook: Codebook,
    oracle: O,
    embedder: Option<Box<dyn Embedder>>,
    similarity: SimilarityEngine,
    fallback: FallbackConfig,
    prune_after_batch: bool,
    session_id: Uuid,
}

impl<O: DecisionOracle> Explorer<O> {
    /// Create an explorer with default settings.
    pub fn new(codebook: Codebook, oracle: O) -> Self {
        Self::with_config(codebook, oracle, &CodebookConfig::default())
    }

    pub fn with_config(codebook: Codebook, oracle: O, config: &CodebookConfig) -> Self {
        Self {
            codebook,
            oracle,
            embedder: None,
            similarity: SimilarityEngine::from_config(&config.similarity),
            fallback: config.fallback.clone(),
            prune_after_batch: config.exploration.prune_orphans_after_batch,
            session_id: Uuid::new_v4(),
        }
    }

    /// Embed candidate labels before similarity search.
    pub fn with_embedder(mut self, embedder: Box<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn codebook(&self) -> &Codebook {
        &self.codebook
    }

    pub fn into_codebook(self) -> Codebook {
        self.codebook
    }

    /// Give every candidate without an embedding one, in a single batch.
    ///
    /// No-op without an embedder. Returns how many candidates were embedded.
    pub fn embed_candidates(&self, candidates: &mut [CodeDraft]) -> Result<usize, EmbeddingError> {
        let Some(embedder) = self.embedder.as_deref() else {
            return Ok(0);
        };
        let pending: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.embedding.is_none())
            .map(|(i, _)| i)
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let texts: Vec<&str> = pending.iter().map(|&i| candidates[i].label.as_str()).collect();
        let vectors = embedder.embed_batch(&texts)?;
        if vectors.len() != pending.len() {
            return Err(EmbeddingError::LengthMismatch {
                expected: pending.len(),
                actual: vectors.len(),
            });
        }
        for (i, vector) in pending.iter().zip(vectors) {
            candidates[*i].embedding = Some(vector);
        }
        Ok(pending.len())
    }

    /// Plan one operation per candidate against the current codebook.
    ///
    /// Nothing is applied, so every candidate is compared with the codebook
    /// as it stands before the batch. Merges planned into the same code build
    /// on each other's evidence.
    pub async fn plan(&self, candidates: &[CodeDraft]) -> Vec<Operation> {
        let mut merged: HashMap<CodeId, Evidence> = HashMap::new();
        let mut operations = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let operation = self.plan_candidate(candidate, &merged).await;
            if operation.kind == OperationKind::MergeIntoExisting {
                let evidence = operation.payload.as_ref().and_then(|p| p.evidence.clone());
                if let (Some(target), Some(evidence)) = (operation.target, evidence) {
                    merged.insert(target, evidence);
                }
            }
            operations.push(operation);
        }
        operations
    }

    /// `merged` holds evidence already planned for codes earlier in the batch.
    async fn plan_candidate(
        &self,
        candidate: &CodeDraft,
        merged: &HashMap<CodeId, Evidence>,
    ) -> Operation {
        let ranked = self.similarity.rank(&self.codebook, candidate);
        let Some(best) = ranked.first() else {
            return Operation::create(CodePayload::from(candidate.clone()))
                .with_confidence(UNMATCHED_CONFIDENCE)
                .with_rationale("No similar code in the codebook");
        };
        debug!(
            target: "codebook::exploration",
            candidate = %candidate.label,
            neighbour = %best.code.label,
            score = best.score,
            "similar code found"
        );
        let decision = self.decide(best.code, candidate).await;
        let current = merged.get(&best.code.id).unwrap_or(&best.code.evidence);
        operation_for(best.code, current, candidate, decision)
    }

    async fn decide(&self, existing: &Code, candidate: &CodeDraft) -> Decision {
        match self.oracle.decide(existing, candidate).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(
                    target: "codebook::exploration",
                    error = %err,
                    candidate = %candidate.label,
                    "oracle failed, using fallback decision"
                );
                fallback_decision(existing, candidate, &self.fallback)
            }
        }
    }

    /// Apply operations in order. A rejected operation does not stop the batch.
    pub fn apply(&mut self, operations: &[Operation]) -> BatchReport {
        let mut report = self.new_report();
        for (index, operation) in operations.iter().enumerate() {
            self.apply_recorded(index, operation, &mut report);
        }
        self.finish_batch(report)
    }

    /// Embed one document's candidates, then plan and apply each against
    /// the live codebook in turn.
    pub async fn process_document(
        &mut self,
        mut candidates: Vec<CodeDraft>,
    ) -> Result<BatchReport, EmbeddingError> {
        self.embed_candidates(&mut candidates)?;
        let mut report = self.new_report();
        for (index, candidate) in candidates.iter().enumerate() {
            let operation = self.plan_candidate(candidate, &HashMap::new()).await;
            self.apply_recorded(index, &operation, &mut report);
        }
        Ok(self.finish_batch(report))
    }

    fn new_report(&self) -> BatchReport {
        BatchReport {
            session_id: self.session_id,
            ..Default::default()
        }
    }

    fn apply_recorded(&mut self, index: usize, operation: &Operation, report: &mut BatchReport) {
        let result = self.codebook.try_execute(operation);
        let mut record = OperationRecord {
            index,
            kind: operation.kind,
            target: operation.target,
            confidence: operation.confidence,
            succeeded: result.is_ok(),
            created: None,
            error: None,
        };
        match result {
            Ok(outcome) => {
                record.created = outcome.created();
                report.succeeded += 1;
            }
            Err(err) => {
                warn!(
                    target: "codebook::exploration",
                    index,
                    kind = %operation.kind,
                    error = %err,
                    "operation rejected"
                );
                record.error = Some(err.to_string());
                report.failed += 1;
            }
        }
        report.records.push(record);
    }

    fn finish_batch(&mut self, mut report: BatchReport) -> BatchReport {
        if self.prune_after_batch {
            report.pruned = self.codebook.remove_orphans();
        }

        info!(
            target: "codebook::exploration",
            session = %self.session_id,
            succeeded = report.succeeded,
            failed = report.failed,
            pruned = report.pruned.len(),
            codes = self.codebook.len(),
            "batch applied"
        );
        report
    }
}

/// Translate an oracle decision about `candidate` and its neighbour
/// `existing` into an operation. A merge replaces `current`, the
/// neighbour's evidence as it will stand when the operation runs.
fn operation_for(
    existing: &Code,
    current: &Evidence,
    candidate: &CodeDraft,
    decision: Decision,
) -> Operation {
    let operation = match decision.verdict {
        Verdict::Merge => {
            let mut evidence = current.clone();
            evidence.merge(&candidate.evidence);
            let mut payload = CodePayload::new().evidence(evidence);
            if let Some(label) = decision.new_label.filter(|l| !l.trim().is_empty()) {
                payload = payload.label(label);
            }
            Operation::merge_into(existing.id, payload)
        }
        Verdict::Split => {
            let payload = CodePayload::from(candidate.clone().with_parent(existing.id));
            Operation::split(existing.id, payload)
        }
        Verdict::CreateNew => Operation::create(CodePayload::from(candidate.clone())),
        Verdict::NoAction => Operation::no_action(Some(existing.id)),
    };
    operation
        .with_confidence(decision.confidence)
        .with_rationale(decision.rationale)
}
