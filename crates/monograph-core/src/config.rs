use crate::error::{MonographError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What `VersionStore::save` does when the new content hashes the same as the
/// stored content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnchangedSavePolicy {
    /// Fail with `UnchangedContent`; no version is created.
    #[default]
    Reject,
    /// Append a version whose hash equals the previous one.
    Record,
}

/// Configuration for near-duplicate clustering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Maximum normalized edit distance for two documents to share a cluster.
    /// 0.0 means exact content only.
    /// Default: 0.15
    pub threshold: f64,

    /// Pairwise comparisons allowed before the job stops with a partial report.
    /// Default: 5,000,000
    pub max_comparisons: u64,

    /// Wall-clock budget for one clustering run, in milliseconds.
    /// Default: 30,000
    pub max_time_ms: u64,

    /// Character n-gram size used to pick candidate pairs. Two documents are
    /// only compared when they share at least one n-gram.
    /// Default: 3
    pub ngram_size: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: 0.15,
            max_comparisons: 5_000_000,
            max_time_ms: 30_000,
            ngram_size: 3,
        }
    }
}

impl SimilarityConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the clustering threshold
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_comparisons(mut self, max: u64) -> Self {
        self.max_comparisons = max;
        self
    }

    pub fn with_max_time(mut self, max: Duration) -> Self {
        self.max_time_ms = max.as_millis() as u64;
        self
    }

    pub fn with_ngram_size(mut self, n: usize) -> Self {
        self.ngram_size = n;
        self
    }

    pub fn max_time(&self) -> Duration {
        Duration::from_millis(self.max_time_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(MonographError::Validation(format!(
                "threshold {} out of range [0.0, 1.0]",
                self.threshold
            )));
        }

        if self.max_comparisons == 0 {
            return Err(MonographError::Validation(
                "max_comparisons must be greater than 0".to_string(),
            ));
        }

        if self.max_time_ms == 0 {
            return Err(MonographError::Validation(
                "max_time_ms must be greater than 0".to_string(),
            ));
        }

        if self.ngram_size == 0 {
            return Err(MonographError::Validation(
                "ngram_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Engine-wide settings for embedded use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub unchanged_save: UnchangedSavePolicy,
    pub similarity: SimilarityConfig,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unchanged_save(mut self, policy: UnchangedSavePolicy) -> Self {
        self.unchanged_save = policy;
        self
    }

    pub fn with_similarity(mut self, similarity: SimilarityConfig) -> Self {
        self.similarity = similarity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.similarity.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.unchanged_save, UnchangedSavePolicy::Reject);
        assert_eq!(config.similarity.threshold, 0.15);
        assert_eq!(config.similarity.ngram_size, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_clamping() {
        let config = SimilarityConfig::new().with_threshold(1.5);
        assert_eq!(config.threshold, 1.0);
        let config = SimilarityConfig::new().with_threshold(-0.5);
        assert_eq!(config.threshold, 0.0);
    }

    #[test]
    fn test_invalid_config() {
        let config = SimilarityConfig::new().with_max_comparisons(0);
        assert!(config.validate().is_err());

        let mut config = SimilarityConfig::new();
        config.threshold = 2.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"unchanged_save":"record","similarity":{"threshold":0.3}}"#)
                .unwrap();
        assert_eq!(config.unchanged_save, UnchangedSavePolicy::Record);
        assert_eq!(config.similarity.threshold, 0.3);
        assert_eq!(config.similarity.max_comparisons, 5_000_000);
    }
}
