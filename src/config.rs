//! Tunable settings, loadable from YAML
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration.
//!
//! ```yaml
//! similarity:
//!   threshold: 0.6
//!   fallback_score: 0.9
//! fallback:
//!   strong_overlap: 0.7
//!   weak_overlap: 0.4
//! exploration:
//!   prune_orphans_after_batch: false
//! ```

use crate::similarity::{DEFAULT_THRESHOLD, FALLBACK_SCORE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodebookConfig {
    pub similarity: SimilarityConfig,
    pub fallback: FallbackConfig,
    pub exploration: ExplorationConfig,
}

/// Similarity search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimilarityConfig {
    /// Minimum cosine similarity for a neighbour
    pub threshold: f32,
    /// Score reported for label-substring matches
    pub fallback_score: f32,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            fallback_score: FALLBACK_SCORE,
        }
    }
}

/// Token-overlap cut-offs for the deterministic decision fallback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FallbackConfig {
    /// Overlap above which a merge is proposed with high confidence
    pub strong_overlap: f32,
    /// Overlap above which a merge is proposed with lower confidence
    pub weak_overlap: f32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            strong_overlap: 0.7,
            weak_overlap: 0.4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExplorationConfig {
    /// Drop orphan codes after each applied batch
    pub prune_orphans_after_batch: bool,
}

impl CodebookConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        // an empty document deserializes as unit, not as an empty map
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a YAML config file. A missing file is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let yaml = fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |name: &str, value: f32| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{name} must be within [0, 1], got {value}")))
            }
        };
        unit("similarity.threshold", self.similarity.threshold)?;
        unit("similarity.fallback_score", self.similarity.fallback_score)?;
        unit("fallback.strong_overlap", self.fallback.strong_overlap)?;
        unit("fallback.weak_overlap", self.fallback.weak_overlap)?;

        if self.fallback.weak_overlap > self.fallback.strong_overlap {
            return Err(ConfigError::Invalid(
                "fallback.weak_overlap must not exceed fallback.strong_overlap".into(),
            ));
        }
        Ok(())
    }
}
