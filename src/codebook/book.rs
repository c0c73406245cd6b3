//! Codebook: owns the codes, assigns ids and keeps the hierarchy

use super::code::{normalize_label, Code, CodeDraft, CodeId};
use super::evidence::Evidence;
use crate::embedding::{Embedder, EmbeddingError};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// The full collection of codes plus id-assignment state.
///
/// All mutation goes through `&mut self`; callers sharing one codebook
/// between threads wrap it in a mutex.
#[derive(Debug, Clone)]
pub struct Codebook {
    codes: BTreeMap<CodeId, Code>,
    /// Smallest id never handed out; never decreases
    next_id: u64,
    created_at: DateTime<Utc>,
}

impl Default for Codebook {
    fn default() -> Self {
        Self::new()
    }
}

impl Codebook {
    /// Create an empty codebook. Ids start at 1.
    pub fn new() -> Self {
        Self {
            codes: BTreeMap::new(),
            next_id: 1,
            created_at: Utc::now(),
        }
    }

    /// Rebuild a codebook from stored parts (used by snapshot loading).
    pub(crate) fn from_parts(
        codes: BTreeMap<CodeId, Code>,
        next_id: u64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            codes,
            next_id,
            created_at,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The id the next `add` without an explicit id will receive.
    pub fn next_id(&self) -> CodeId {
        CodeId::new(self.next_id)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn contains(&self, id: CodeId) -> bool {
        self.codes.contains_key(&id)
    }

    pub fn get(&self, id: CodeId) -> Option<&Code> {
        self.codes.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: CodeId) -> Option<&mut Code> {
        self.codes.get_mut(&id)
    }

    /// All codes in id order
    pub fn codes(&self) -> impl Iterator<Item = &Code> {
        self.codes.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = CodeId> + '_ {
        self.codes.keys().copied()
    }

    /// Add a code and return its id.
    ///
    /// A draft without an id gets `next_id`. An explicit id is used as given
    /// and pushes `next_id` past it. Adding twice under the same id replaces
    /// the earlier code. The counter saturates at `u64::MAX` rather than wrap.
    pub fn add(&mut self, draft: CodeDraft) -> CodeId {
        let id = match draft.id {
            Some(id) => {
                self.next_id = self.next_id.max(id.get().saturating_add(1));
                id
            }
            None => {
                let id = CodeId::new(self.next_id);
                self.next_id = self.next_id.saturating_add(1);
                id
            }
        };

        if self.codes.contains_key(&id) {
            warn!(target: "codebook::book", %id, "replacing existing code with the same id");
        }

        let now = Utc::now();
        let code = Code {
            id,
            label: normalize_label(&draft.label, Some(id)),
            category: draft.category,
            evidence: draft.evidence.deduplicated(),
            embedding: draft.embedding,
            created_at: now,
            updated_at: now,
            parent: draft.parent,
        };
        self.codes.insert(id, code);
        id
    }

    /// Remove a code. Returns whether it existed.
    ///
    /// Children of the removed code are re-parented to its parent, so they
    /// become roots when a root is deleted.
    pub fn delete(&mut self, id: CodeId) -> bool {
        let Some(removed) = self.codes.remove(&id) else {
            return false;
        };

        let mut adopted = 0usize;
        for code in self.codes.values_mut() {
            if code.parent == Some(id) {
                code.parent = removed.parent;
                code.touch();
                adopted += 1;
            }
        }
        debug!(target: "codebook::book", %id, adopted, "deleted code");
        true
    }

    /// Whether the code has no evidence and no children.
    pub fn is_orphan(&self, id: CodeId) -> bool {
        match self.codes.get(&id) {
            Some(code) => code.evidence.is_empty() && self.children_of(id).next().is_none(),
            None => false,
        }
    }

    /// Remove every code with no evidence and no children, in one pass.
    ///
    /// A parent left without children by this call is not removed until the
    /// next call.
    pub fn remove_orphans(&mut self) -> Vec<CodeId> {
        let parents: HashSet<CodeId> = self.codes.values().filter_map(|c| c.parent).collect();
        let orphans: Vec<CodeId> = self
            .codes
            .values()
            .filter(|c| c.evidence.is_empty() && !parents.contains(&c.id))
            .map(|c| c.id)
            .collect();

        for id in &orphans {
            self.codes.remove(id);
        }
        if !orphans.is_empty() {
            debug!(target: "codebook::book", removed = orphans.len(), "pruned orphan codes");
        }
        orphans
    }

    /// Direct children of a code
    pub fn children_of(&self, id: CodeId) -> impl Iterator<Item = &Code> {
        self.codes.values().filter(move |c| c.parent == Some(id))
    }

    /// Codes without a parent
    pub fn roots(&self) -> impl Iterator<Item = &Code> {
        self.codes.values().filter(|c| c.is_root())
    }

    /// Ancestors of a code, nearest first.
    ///
    /// Stops at a dangling parent reference or when a cycle closes.
    pub fn ancestors(&self, id: CodeId) -> Vec<CodeId> {
        let mut chain = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut current = self.codes.get(&id).and_then(|c| c.parent);
        while let Some(parent) = current {
            if !seen.insert(parent) {
                break;
            }
            let Some(code) = self.codes.get(&parent) else {
                break;
            };
            chain.push(parent);
            current = code.parent;
        }
        chain
    }

    /// Number of resolvable ancestors; roots have depth 0.
    pub fn depth(&self, id: CodeId) -> usize {
        self.ancestors(id).len()
    }

    /// Whether `ancestor` appears on the parent chain of `id`.
    pub fn is_ancestor(&self, ancestor: CodeId, id: CodeId) -> bool {
        self.ancestors(id).contains(&ancestor)
    }

    /// Whether making `parent` the parent of `child` would close a cycle.
    pub(crate) fn would_cycle(&self, child: CodeId, parent: CodeId) -> bool {
        child == parent || self.is_ancestor(child, parent)
    }

    /// Merge evidence into a code without bubbling. Returns the quotes that
    /// were actually added, or `None` if the code does not exist.
    pub fn merge_evidence(&mut self, id: CodeId, evidence: &Evidence) -> Option<Evidence> {
        let code = self.codes.get_mut(&id)?;
        let added = code.evidence.merge(evidence);
        code.touch();
        Some(added)
    }

    /// Merge `evidence` into the immediate parent of `child`, one hop only.
    ///
    /// Returns the quotes added to the parent (empty when `child` is a root
    /// or its parent does not resolve).
    pub(crate) fn bubble(&mut self, child: CodeId, evidence: &Evidence) -> Evidence {
        let Some(parent) = self.codes.get(&child).and_then(|c| c.parent) else {
            return Evidence::new();
        };
        match self.merge_evidence(parent, evidence) {
            Some(added) => {
                debug!(
                    target: "codebook::book",
                    %child,
                    %parent,
                    quotes = added.quote_count(),
                    "bubbled evidence to parent"
                );
                added
            }
            None => {
                warn!(target: "codebook::book", %child, %parent, "parent not found; evidence not bubbled");
                Evidence::new()
            }
        }
    }

    /// Bubble a code's whole evidence to its parent.
    pub(crate) fn bubble_own(&mut self, child: CodeId) -> Evidence {
        let evidence = match self.codes.get(&child) {
            Some(code) => code.evidence.clone(),
            None => return Evidence::new(),
        };
        self.bubble(child, &evidence)
    }

    /// Store an embedding for a code. Returns whether the code exists.
    pub fn set_embedding(&mut self, id: CodeId, embedding: Vec<f32>) -> bool {
        match self.codes.get_mut(&id) {
            Some(code) => {
                code.embedding = Some(embedding);
                code.touch();
                true
            }
            None => false,
        }
    }

    /// Embed the labels of all codes lacking an embedding, in one batch.
    ///
    /// Returns how many codes received a vector. Nothing is stored when the
    /// embedder fails.
    pub fn embed_missing(&mut self, embedder: &dyn Embedder) -> Result<usize, EmbeddingError> {
        let pending: Vec<(CodeId, String)> = self
            .codes
            .values()
            .filter(|c| c.embedding.is_none())
            .map(|c| (c.id, c.label.clone()))
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let texts: Vec<&str> = pending.iter().map(|(_, label)| label.as_str()).collect();
        let vectors = embedder.embed_batch(&texts)?;
        if vectors.len() != pending.len() {
            return Err(EmbeddingError::LengthMismatch {
                expected: pending.len(),
                actual: vectors.len(),
            });
        }

        for ((id, _), vector) in pending.iter().zip(vectors) {
            self.set_embedding(*id, vector);
        }
        Ok(pending.len())
    }
}
