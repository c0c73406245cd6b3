//! Codebook persistence
//!
//! A codebook is persisted as a single JSON snapshot: metadata plus every
//! code keyed by id. `SnapshotStore` is the seam for backends; `JsonFileStore`
//! writes snapshots to disk atomically.

mod snapshot;
pub(crate) mod timestamp;

pub use snapshot::{
    load, save, JsonFileStore, Snapshot, SnapshotError, SnapshotMetadata, SnapshotResult,
    SnapshotStore,
};
pub use timestamp::parse as parse_timestamp;
