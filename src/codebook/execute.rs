//! Operation execution: the codebook's state machine
//!
//! Every operation validates all of its references before the first write,
//! so a rejected operation leaves the codebook untouched.

use super::book::Codebook;
use super::code::{normalize_label, Category, CodeDraft, CodeId};
use super::evidence::Evidence;
use super::operation::{CodePayload, Operation, OperationKind};
use thiserror::Error;
use tracing::{debug, warn};

/// Why an operation was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("{0} requires a target code")]
    MissingTarget(OperationKind),

    #[error("target code not found: {0}")]
    TargetNotFound(CodeId),

    #[error("source code not found: {0}")]
    SourceNotFound(CodeId),

    #[error("parent code not found: {0}")]
    ParentNotFound(CodeId),

    #[error("{0} requires a payload")]
    MissingPayload(OperationKind),

    #[error("{kind} payload is missing `{field}`")]
    MissingField {
        kind: OperationKind,
        field: &'static str,
    },

    #[error("{kind} cannot patch `{field}`")]
    UnpatchableField {
        kind: OperationKind,
        field: &'static str,
    },

    #[error("refusing to create a root code without evidence")]
    OrphanRoot,

    #[error("code id already in use: {0}")]
    IdCollision(CodeId),

    #[error("code id {0} leaves no room for further ids")]
    IdOutOfRange(CodeId),

    #[error("placing {child} under {parent} would create a cycle")]
    WouldCreateCycle { child: CodeId, parent: CodeId },
}

/// What a successful operation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created(CodeId),
    Deleted(CodeId),
    Merged(CodeId),
    Parented { parent: CodeId, reused: bool },
    Split(CodeId),
    NoAction,
}

impl Outcome {
    /// The code created by the operation, if any
    pub fn created(&self) -> Option<CodeId> {
        match self {
            Outcome::Created(id) | Outcome::Split(id) => Some(*id),
            Outcome::Parented {
                parent,
                reused: false,
            } => Some(*parent),
            _ => None,
        }
    }
}

impl Codebook {
    /// Apply an operation. Returns `false`, without mutating anything, when
    /// the operation is rejected.
    pub fn execute(&mut self, operation: &Operation) -> bool {
        match self.try_execute(operation) {
            Ok(outcome) => {
                debug!(
                    target: "codebook::execute",
                    kind = %operation.kind,
                    ?outcome,
                    confidence = operation.confidence,
                    "operation applied"
                );
                true
            }
            Err(err) => {
                warn!(
                    target: "codebook::execute",
                    kind = %operation.kind,
                    error = %err,
                    "operation rejected"
                );
                false
            }
        }
    }

    /// Apply an operation, reporting why it was rejected.
    pub fn try_execute(&mut self, operation: &Operation) -> Result<Outcome, OperationError> {
        match operation.kind {
            OperationKind::Create => self.apply_create(operation),
            OperationKind::Delete => self.apply_delete(operation),
            OperationKind::MergeIntoExisting => self.apply_merge(operation),
            OperationKind::CreateParent => self.apply_create_parent(operation),
            OperationKind::Split => self.apply_split(operation),
            OperationKind::NoAction => Ok(Outcome::NoAction),
        }
    }

    fn existing_target(&self, operation: &Operation) -> Result<CodeId, OperationError> {
        let target = operation
            .target
            .ok_or(OperationError::MissingTarget(operation.kind))?;
        if !self.contains(target) {
            return Err(OperationError::TargetNotFound(target));
        }
        Ok(target)
    }

    fn payload<'a>(&self, operation: &'a Operation) -> Result<&'a CodePayload, OperationError> {
        operation
            .payload
            .as_ref()
            .ok_or(OperationError::MissingPayload(operation.kind))
    }

    /// Build a draft for a new code, checking its parent and id.
    /// An explicit id must be unused and leave `next_id` representable.
    fn check_free_id(&self, id: CodeId) -> Result<(), OperationError> {
        if self.contains(id) {
            return Err(OperationError::IdCollision(id));
        }
        if id.get().checked_add(1).is_none() {
            return Err(OperationError::IdOutOfRange(id));
        }
        Ok(())
    }

    fn checked_draft(
        &self,
        kind: OperationKind,
        payload: &CodePayload,
        default_category: Option<Category>,
        default_parent: Option<CodeId>,
    ) -> Result<CodeDraft, OperationError> {
        let category = payload
            .category
            .or(default_category)
            .ok_or(OperationError::MissingField {
                kind,
                field: "function",
            })?;
        let parent = payload.parent.or(default_parent);
        if let Some(parent) = parent {
            if !self.contains(parent) {
                return Err(OperationError::ParentNotFound(parent));
            }
        }
        if let Some(id) = payload.id {
            self.check_free_id(id)?;
        }

        Ok(CodeDraft {
            id: payload.id,
            label: payload.label.clone().unwrap_or_default(),
            category,
            evidence: payload.evidence.clone().unwrap_or_default(),
            embedding: payload.embedding.clone(),
            parent,
        })
    }

    fn apply_create(&mut self, operation: &Operation) -> Result<Outcome, OperationError> {
        let payload = self.payload(operation)?;
        let draft = self.checked_draft(operation.kind, payload, None, None)?;
        if draft.evidence.is_empty() && draft.parent.is_none() {
            return Err(OperationError::OrphanRoot);
        }

        let id = self.add(draft);
        self.bubble_own(id);
        Ok(Outcome::Created(id))
    }

    fn apply_delete(&mut self, operation: &Operation) -> Result<Outcome, OperationError> {
        let target = self.existing_target(operation)?;
        self.delete(target);
        Ok(Outcome::Deleted(target))
    }

    /// Overwrite the allow-listed fields (label, evidence, category, parent)
    /// present in the payload, then bubble the target's evidence upward.
    fn apply_merge(&mut self, operation: &Operation) -> Result<Outcome, OperationError> {
        let target = self.existing_target(operation)?;
        let payload = self.payload(operation)?;
        let kind = operation.kind;

        if payload.id.is_some() {
            return Err(OperationError::UnpatchableField {
                kind,
                field: "code_id",
            });
        }
        if payload.embedding.is_some() {
            return Err(OperationError::UnpatchableField {
                kind,
                field: "embedding",
            });
        }
        if let Some(parent) = payload.parent {
            if !self.contains(parent) {
                return Err(OperationError::ParentNotFound(parent));
            }
            if self.would_cycle(target, parent) {
                return Err(OperationError::WouldCreateCycle {
                    child: target,
                    parent,
                });
            }
        }

        let code = self
            .get_mut(target)
            .ok_or(OperationError::TargetNotFound(target))?;
        if let Some(label) = &payload.label {
            code.label = normalize_label(label, Some(target));
        }
        if let Some(category) = payload.category {
            code.category = category;
        }
        if let Some(evidence) = &payload.evidence {
            code.evidence = evidence.deduplicated();
        }
        if let Some(parent) = payload.parent {
            code.parent = Some(parent);
        }
        code.touch();

        self.bubble_own(target);
        Ok(Outcome::Merged(target))
    }

    /// Insert a parent between the target and the target's original parent.
    ///
    /// An existing code is reused when its label matches case-insensitively
    /// and it hangs under that same original parent.
    fn apply_create_parent(&mut self, operation: &Operation) -> Result<Outcome, OperationError> {
        let target = self.existing_target(operation)?;
        let payload = self.payload(operation)?;
        let source = operation.source.filter(|s| *s != target);
        if let Some(source) = source {
            if !self.contains(source) {
                return Err(OperationError::SourceNotFound(source));
            }
        }

        let (original_parent, target_category) = match self.get(target) {
            Some(code) => (code.parent, code.category),
            None => return Err(OperationError::TargetNotFound(target)),
        };
        let label = payload.label.as_deref().unwrap_or_default();
        let reused = self.find_reusable_parent(label, original_parent, target, source);

        // The new link hangs below the reused parent, or below the original
        // parent when a fresh code is inserted.
        if let Some(anchor) = reused.or(original_parent) {
            for child in std::iter::once(target).chain(source) {
                if self.would_cycle(child, anchor) {
                    return Err(OperationError::WouldCreateCycle {
                        child,
                        parent: anchor,
                    });
                }
            }
        }

        let mut gathered = Evidence::new();
        let parent = match reused {
            Some(parent) => parent,
            None => {
                if let Some(id) = payload.id {
                    self.check_free_id(id)?;
                }
                let draft = CodeDraft {
                    id: payload.id,
                    label: label.to_string(),
                    category: payload.category.unwrap_or(target_category),
                    evidence: payload.evidence.clone().unwrap_or_default(),
                    embedding: payload.embedding.clone(),
                    parent: original_parent,
                };
                let id = self.add(draft);
                if let Some(code) = self.get(id) {
                    gathered.merge(&code.evidence);
                }
                id
            }
        };

        for child in source.into_iter().chain(std::iter::once(target)) {
            let evidence = match self.get_mut(child) {
                Some(code) => {
                    code.parent = Some(parent);
                    code.touch();
                    code.evidence.clone()
                }
                None => continue,
            };
            if let Some(added) = self.merge_evidence(parent, &evidence) {
                gathered.merge(&added);
            }
        }

        // Second hop: what the parent gained moves on to its own parent.
        self.bubble(parent, &gathered);

        Ok(Outcome::Parented {
            parent,
            reused: reused.is_some(),
        })
    }

    fn find_reusable_parent(
        &self,
        label: &str,
        original_parent: Option<CodeId>,
        target: CodeId,
        source: Option<CodeId>,
    ) -> Option<CodeId> {
        let wanted = label.trim().to_lowercase();
        if wanted.is_empty() {
            return None;
        }
        self.codes()
            .filter(|c| c.id != target && Some(c.id) != source)
            .find(|c| c.parent == original_parent && c.label.trim().to_lowercase() == wanted)
            .map(|c| c.id)
    }

    /// Create a new code from the payload, parented under the target unless
    /// the payload names a parent. The target itself is left as is.
    fn apply_split(&mut self, operation: &Operation) -> Result<Outcome, OperationError> {
        let target = self.existing_target(operation)?;
        let payload = self.payload(operation)?;
        let category = self.get(target).map(|c| c.category);
        let draft = self.checked_draft(operation.kind, payload, category, Some(target))?;

        let id = self.add(draft);
        self.bubble_own(id);
        Ok(Outcome::Split(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(doc: &str, q: &str) -> Evidence {
        Evidence::from_quotes(doc, [q])
    }

    fn seeded() -> (Codebook, CodeId, CodeId) {
        let mut book = Codebook::new();
        let a = book.add(
            CodeDraft::new("Government Issues", Category::ProblemDefinition)
                .with_evidence(quote("d1", "x")),
        );
        let b = book.add(
            CodeDraft::new("Corruption Cases", Category::ProblemDefinition)
                .with_evidence(quote("d2", "y"))
                .with_parent(a),
        );
        (book, a, b)
    }

    #[test]
    fn create_assigns_placeholder_label() {
        let mut book = Codebook::new();
        let op = Operation::create(
            CodePayload::new()
                .label("")
                .category(Category::ProblemDefinition)
                .quote("d1", "q1"),
        );

        assert_eq!(book.try_execute(&op), Ok(Outcome::Created(CodeId::new(1))));
        assert_eq!(book.get(CodeId::new(1)).unwrap().label, "Code 1");
    }

    #[test]
    fn create_rejects_root_without_evidence() {
        let mut book = Codebook::new();
        let op = Operation::create(CodePayload::new().label("Empty").category(Category::MoralEvaluation));

        assert!(!book.execute(&op));
        assert_eq!(book.try_execute(&op), Err(OperationError::OrphanRoot));
        assert!(book.is_empty());
        assert_eq!(book.next_id(), CodeId::new(1));
    }

    #[test]
    fn create_allows_empty_child() {
        let (mut book, a, _) = seeded();
        let op = Operation::create(
            CodePayload::new()
                .label("Placeholder child")
                .category(Category::ProblemDefinition)
                .parent(a),
        );
        assert!(book.execute(&op));
    }

    #[test]
    fn create_requires_category_and_payload() {
        let mut book = Codebook::new();
        let no_category = Operation::create(CodePayload::new().label("x").quote("d", "q"));
        assert_eq!(
            book.try_execute(&no_category),
            Err(OperationError::MissingField {
                kind: OperationKind::Create,
                field: "function"
            })
        );

        let mut no_payload = Operation::create(CodePayload::new());
        no_payload.payload = None;
        assert_eq!(
            book.try_execute(&no_payload),
            Err(OperationError::MissingPayload(OperationKind::Create))
        );
    }

    #[test]
    fn create_rejects_unknown_parent_and_taken_id() {
        let (mut book, a, _) = seeded();
        let unknown_parent = Operation::create(
            CodePayload::new()
                .category(Category::ProblemDefinition)
                .quote("d", "q")
                .parent(CodeId::new(77)),
        );
        assert_eq!(
            book.try_execute(&unknown_parent),
            Err(OperationError::ParentNotFound(CodeId::new(77)))
        );

        let taken = Operation::create(
            CodePayload::new()
                .id(a)
                .category(Category::ProblemDefinition)
                .quote("d", "q"),
        );
        assert_eq!(book.try_execute(&taken), Err(OperationError::IdCollision(a)));
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn create_rejects_id_at_u64_max() {
        let (mut book, a, _) = seeded();
        let next = book.next_id();
        let max = CodeId::new(u64::MAX);

        let create = Operation::create(
            CodePayload::new()
                .id(max)
                .category(Category::ProblemDefinition)
                .quote("d", "q"),
        );
        assert_eq!(book.try_execute(&create), Err(OperationError::IdOutOfRange(max)));
        assert!(!book.execute(&create));

        let parent = Operation::create_parent(a, None, CodePayload::new().label("Broader").id(max));
        assert_eq!(book.try_execute(&parent), Err(OperationError::IdOutOfRange(max)));

        assert_eq!(book.len(), 2);
        assert_eq!(book.next_id(), next);
    }

    #[test]
    fn create_bubbles_to_parent() {
        let (mut book, a, _) = seeded();
        let op = Operation::create(
            CodePayload::new()
                .label("Mental Health Issues")
                .category(Category::ProblemDefinition)
                .quote("d3", "depression statistics")
                .parent(a),
        );
        assert!(book.execute(&op));
        assert!(book.get(a).unwrap().evidence.contains("d3", "depression statistics"));
    }

    #[test]
    fn delete_requires_existing_target() {
        let (mut book, _, b) = seeded();
        assert!(!book.execute(&Operation::delete(CodeId::new(50))));
        assert!(book.execute(&Operation::delete(b)));
        assert!(!book.contains(b));
    }

    #[test]
    fn merge_overwrites_fields_and_bubbles() {
        let (mut book, a, b) = seeded();
        let op = Operation::merge_into(
            b,
            CodePayload::new()
                .label("Corruption & Bribery")
                .evidence(Evidence::from_quotes("d2", ["y", "z"])),
        );

        assert_eq!(book.try_execute(&op), Ok(Outcome::Merged(b)));

        let child = book.get(b).unwrap();
        assert_eq!(child.label, "Corruption & Bribery");
        assert_eq!(child.evidence.quotes("d2"), ["y", "z"]);

        let parent = book.get(a).unwrap();
        assert_eq!(parent.evidence.quotes("d1"), ["x"]);
        assert_eq!(parent.evidence.quotes("d2"), ["y", "z"]);
    }

    #[test]
    fn merge_with_blank_label_uses_placeholder() {
        let (mut book, _, b) = seeded();
        let op = Operation::merge_into(b, CodePayload::new().label("   "));
        assert!(book.execute(&op));
        assert_eq!(book.get(b).unwrap().label, format!("Code {}", b));
    }

    #[test]
    fn merge_rejects_cycles_and_unpatchable_fields() {
        let (mut book, a, b) = seeded();

        let cycle = Operation::merge_into(a, CodePayload::new().parent(b));
        assert_eq!(
            book.try_execute(&cycle),
            Err(OperationError::WouldCreateCycle { child: a, parent: b })
        );
        let self_parent = Operation::merge_into(a, CodePayload::new().parent(a));
        assert!(!book.execute(&self_parent));

        let id_patch = Operation::merge_into(b, CodePayload::new().id(CodeId::new(40)));
        assert!(matches!(
            book.try_execute(&id_patch),
            Err(OperationError::UnpatchableField { field: "code_id", .. })
        ));
        assert!(book.get(a).unwrap().is_root());
    }

    #[test]
    fn merge_can_move_code_under_new_parent() {
        let (mut book, a, b) = seeded();
        let other = book.add(
            CodeDraft::new("Policy Issues", Category::ProblemDefinition)
                .with_evidence(quote("d5", "p")),
        );
        assert!(book.execute(&Operation::merge_into(b, CodePayload::new().parent(other))));
        assert_eq!(book.get(b).unwrap().parent, Some(other));
        assert!(book.get(other).unwrap().evidence.contains("d2", "y"));
        assert!(book.children_of(a).next().is_none());
    }

    #[test]
    fn create_parent_inserts_between_target_and_original_parent() {
        let (mut book, a, b) = seeded();
        let candidate = book.add(
            CodeDraft::new("Bribery Scandals", Category::ProblemDefinition)
                .with_evidence(quote("d4", "bribe")),
        );

        let op = Operation::create_parent(
            b,
            Some(candidate),
            CodePayload::new().label("Corruption Subtypes").quote("initial", "parent quote"),
        );
        let outcome = book.try_execute(&op).unwrap();
        let Outcome::Parented { parent, reused } = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };

        assert!(!reused);
        let new_parent = book.get(parent).unwrap();
        assert_eq!(new_parent.parent, Some(a));
        assert_eq!(new_parent.category, Category::ProblemDefinition);
        assert_eq!(book.get(b).unwrap().parent, Some(parent));
        assert_eq!(book.get(candidate).unwrap().parent, Some(parent));

        assert!(new_parent.evidence.contains("d2", "y"));
        assert!(new_parent.evidence.contains("d4", "bribe"));
        assert!(new_parent.evidence.contains("initial", "parent quote"));

        // Second hop reached the original parent
        let grand = book.get(a).unwrap();
        assert!(grand.evidence.contains("d4", "bribe"));
        assert!(grand.evidence.contains("initial", "parent quote"));
    }

    #[test]
    fn create_parent_reuses_matching_sibling() {
        let (mut book, a, b) = seeded();
        let existing = book.add(
            CodeDraft::new("Corruption Subtypes", Category::ProblemDefinition)
                .with_evidence(quote("d7", "w"))
                .with_parent(a),
        );

        let op = Operation::create_parent(b, None, CodePayload::new().label("corruption SUBTYPES"));
        assert_eq!(
            book.try_execute(&op),
            Ok(Outcome::Parented {
                parent: existing,
                reused: true
            })
        );
        assert_eq!(book.len(), 3);
        assert_eq!(book.get(b).unwrap().parent, Some(existing));
    }

    #[test]
    fn create_parent_ignores_same_label_under_other_ancestor() {
        let (mut book, _, b) = seeded();
        let elsewhere = book.add(
            CodeDraft::new("Corruption Subtypes", Category::ProblemDefinition)
                .with_evidence(quote("d7", "w")),
        );

        let op = Operation::create_parent(b, None, CodePayload::new().label("Corruption Subtypes"));
        let outcome = book.try_execute(&op).unwrap();
        assert!(matches!(outcome, Outcome::Parented { reused: false, .. }));
        assert_ne!(book.get(b).unwrap().parent, Some(elsewhere));
    }

    #[test]
    fn create_parent_of_root_creates_root() {
        let (mut book, a, _) = seeded();
        let op = Operation::create_parent(a, None, CodePayload::new().label("Society"));
        let outcome = book.try_execute(&op).unwrap();
        let parent = outcome.created().unwrap();
        assert!(book.get(parent).unwrap().is_root());
        assert_eq!(book.get(a).unwrap().parent, Some(parent));
    }

    #[test]
    fn create_parent_fails_atomically() {
        let (mut book, a, b) = seeded();
        let before_len = book.len();

        let unknown_source =
            Operation::create_parent(b, Some(CodeId::new(99)), CodePayload::new().label("P"));
        assert_eq!(
            book.try_execute(&unknown_source),
            Err(OperationError::SourceNotFound(CodeId::new(99)))
        );

        // Making the root a child under its own descendant's new parent
        let cycle = Operation::create_parent(b, Some(a), CodePayload::new().label("P"));
        assert_eq!(
            book.try_execute(&cycle),
            Err(OperationError::WouldCreateCycle { child: a, parent: a })
        );

        let mut no_payload = Operation::create_parent(b, None, CodePayload::new());
        no_payload.payload = None;
        assert!(!book.execute(&no_payload));

        assert_eq!(book.len(), before_len);
        assert_eq!(book.get(b).unwrap().parent, Some(a));
        assert!(book.get(a).unwrap().is_root());
    }

    #[test]
    fn split_parents_new_code_under_target() {
        let (mut book, a, b) = seeded();
        let op = Operation::split(
            b,
            CodePayload::new().label("Kickbacks").quote("d8", "kickback scheme"),
        );
        let outcome = book.try_execute(&op).unwrap();
        let Outcome::Split(id) = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };

        let split = book.get(id).unwrap();
        assert_eq!(split.parent, Some(b));
        assert_eq!(split.category, Category::ProblemDefinition);
        assert_eq!(book.get(b).unwrap().label, "Corruption Cases");
        assert!(book.get(b).unwrap().evidence.contains("d8", "kickback scheme"));
        assert!(!book.get(a).unwrap().evidence.contains("d8", "kickback scheme"));
    }

    #[test]
    fn no_action_acknowledges() {
        let (mut book, _, _) = seeded();
        assert!(book.execute(&Operation::no_action(Some(CodeId::new(1000)))));
        assert_eq!(book.try_execute(&Operation::no_action(None)), Ok(Outcome::NoAction));
    }
}
