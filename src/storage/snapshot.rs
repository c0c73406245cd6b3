//! JSON snapshots of a codebook

use super::timestamp;
use crate::codebook::{normalize_label, Code, CodeId, Codebook};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while saving or loading snapshots
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid snapshot: {0}")]
    Invalid(String),
}

/// Result type for snapshot operations
pub type SnapshotResult<T> = Result<T, SnapshotError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub total_codes: usize,
    pub next_id: u64,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
}

/// On-disk form of a codebook.
///
/// `codes` is keyed by the decimal id string in JSON; each key must match
/// the `code_id` of its record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub codes: BTreeMap<CodeId, Code>,
}

impl Codebook {
    /// Capture the full state, including `next_id`.
    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            metadata: SnapshotMetadata {
                total_codes: self.len(),
                next_id: self.next_id().get(),
                created_at: self.created_at(),
            },
            codes: self.codes().map(|c| (c.id, c.clone())).collect(),
        }
    }

    /// Rebuild a codebook from a snapshot.
    ///
    /// Labels are normalized and evidence deduplicated on the way in. A
    /// stored `next_id` that would reuse an existing id is raised past the
    /// largest one.
    pub fn from_snapshot(snapshot: Snapshot) -> SnapshotResult<Self> {
        let Snapshot { metadata, codes } = snapshot;

        let mut loaded = BTreeMap::new();
        for (key, mut code) in codes {
            if key != code.id {
                return Err(SnapshotError::Invalid(format!(
                    "code stored under key {key} has code_id {}",
                    code.id
                )));
            }
            code.label = normalize_label(&code.label, Some(code.id));
            code.evidence = code.evidence.deduplicated();
            loaded.insert(key, code);
        }

        if metadata.total_codes != loaded.len() {
            warn!(
                target: "codebook::storage",
                recorded = metadata.total_codes,
                actual = loaded.len(),
                "snapshot total_codes does not match stored codes"
            );
        }

        let floor = match loaded.keys().next_back() {
            Some(max) => max.get().checked_add(1).ok_or_else(|| {
                SnapshotError::Invalid(format!("code id {max} leaves no room for further ids"))
            })?,
            None => 1,
        };
        let next_id = if metadata.next_id < floor {
            warn!(
                target: "codebook::storage",
                stored = metadata.next_id,
                raised_to = floor,
                "snapshot next_id would reuse an existing id"
            );
            floor
        } else {
            metadata.next_id
        };

        let dangling = loaded
            .values()
            .filter(|c| c.parent.is_some_and(|p| !loaded.contains_key(&p)))
            .count();
        if dangling > 0 {
            warn!(target: "codebook::storage", dangling, "snapshot has codes with a missing parent");
        }

        Ok(Codebook::from_parts(loaded, next_id, metadata.created_at))
    }

    pub fn to_json(&self) -> SnapshotResult<String> {
        Ok(serde_json::to_string_pretty(&self.to_snapshot())?)
    }

    pub fn from_json(json: &str) -> SnapshotResult<Self> {
        let snapshot: Snapshot = serde_json::from_str(json)?;
        Self::from_snapshot(snapshot)
    }

    /// Write a snapshot to `path`, replacing any existing file atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> SnapshotResult<()> {
        save(self, path)
    }

    /// Read a codebook from a snapshot file.
    pub fn load(path: impl AsRef<Path>) -> SnapshotResult<Self> {
        load(path)
    }
}

/// Write `codebook` to `path` via a temp file in the same directory.
pub fn save(codebook: &Codebook, path: impl AsRef<Path>) -> SnapshotResult<()> {
    let path = path.as_ref();
    let json = codebook.to_json()?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| SnapshotError::Io(e.error))?;

    info!(target: "codebook::storage", path = %path.display(), codes = codebook.len(), "saved codebook snapshot");
    Ok(())
}

/// Read a codebook from the snapshot at `path`.
pub fn load(path: impl AsRef<Path>) -> SnapshotResult<Codebook> {
    let path = path.as_ref();
    let json = fs::read_to_string(path)?;
    let codebook = Codebook::from_json(&json)?;
    info!(target: "codebook::storage", path = %path.display(), codes = codebook.len(), "loaded codebook snapshot");
    Ok(codebook)
}

/// Trait for codebook persistence backends
pub trait SnapshotStore: Send + Sync {
    /// Persist the codebook, replacing any previous state
    fn save_codebook(&self, codebook: &Codebook) -> SnapshotResult<()>;

    /// Load the stored codebook, or `None` if nothing has been saved yet
    fn load_codebook(&self) -> SnapshotResult<Option<Codebook>>;
}

/// A snapshot file on the local filesystem
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for JsonFileStore {
    fn save_codebook(&self, codebook: &Codebook) -> SnapshotResult<()> {
        save(codebook, &self.path)
    }

    fn load_codebook(&self) -> SnapshotResult<Option<Codebook>> {
        if !self.path.exists() {
            debug!(target: "codebook::storage", path = %self.path.display(), "no snapshot on disk");
            return Ok(None);
        }
        load(&self.path).map(Some)
    }
}
