use anyhow::{Context, Result};
use monograph_core::{EngineConfig, Monograph};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Contents of `monograph.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Directory holding `monograph.redb`.
    pub data_dir: PathBuf,

    /// Default author recorded on saves, reverts and imports.
    pub author: String,

    pub engine: EngineConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            author: "monograph".to_string(),
            engine: EngineConfig::default(),
        }
    }
}

impl CliConfig {
    /// Parse a config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// `load`, falling back to defaults when the file is absent or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{:#}; using defaults", e);
                Self::default()
            }
        }
    }

    /// Every problem found, empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.data_dir.as_os_str().is_empty() {
            errors.push("data_dir must not be empty".to_string());
        }
        if self.author.trim().is_empty() {
            errors.push("author must not be empty".to_string());
        }
        if let Err(e) = self.engine.validate() {
            errors.push(format!("engine: {}", e));
        }
        errors
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("monograph.redb")
    }

    /// Author to record: the explicit one if given, else the configured one.
    pub fn author_or(&self, author: Option<String>) -> String {
        author.unwrap_or_else(|| self.author.clone())
    }

    pub fn open_engine(&self) -> Result<Monograph> {
        let path = self.db_path();
        Monograph::open(&path, self.engine.clone())
            .with_context(|| format!("Failed to open database at {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monograph_core::UnchangedSavePolicy;
    use tempfile::TempDir;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monograph.toml");
        std::fs::write(
            &path,
            r#"
author = "pharmacy"

[engine]
unchanged_save = "record"

[engine.similarity]
threshold = 0.2
"#,
        )
        .unwrap();

        let config = CliConfig::load(&path).unwrap();
        assert_eq!(config.author, "pharmacy");
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.engine.unchanged_save, UnchangedSavePolicy::Record);
        assert_eq!(config.engine.similarity.threshold, 0.2);
        assert_eq!(config.engine.similarity.ngram_size, 3);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = CliConfig::load_or_default(Path::new("/nonexistent/monograph.toml"));
        assert_eq!(config.author, "monograph");
        assert!(config.db_path().ends_with("monograph.redb"));
    }

    #[test]
    fn validation_collects_every_error() {
        let mut config = CliConfig::default();
        config.author = " ".to_string();
        config.engine.similarity.max_comparisons = 0;
        assert_eq!(config.validate().len(), 2);
    }

    #[test]
    fn show_output_parses_back() {
        let config = CliConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: CliConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.author, config.author);
    }
}
