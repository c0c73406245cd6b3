//! Core codebook data structures and the operation engine

mod book;
mod code;
mod evidence;
mod execute;
mod operation;
mod stats;


pub use book::Codebook;
pub use code::{
    normalize_label, placeholder_label, Category, Code, CodeDraft, CodeId, ParseCategoryError,
    UNNAMED_LABEL,
};
pub use evidence::Evidence;
pub use execute::{OperationError, Outcome};
pub use operation::{CodePayload, Operation, OperationKind};
pub use stats::CodebookStats;
