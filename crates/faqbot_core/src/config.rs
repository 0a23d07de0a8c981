use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

pub const DEFAULT_THRESHOLD: f32 = 0.7;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MIN_SEGMENT_CHARS: usize = 20;
pub const DEFAULT_QUESTION_MIN_CHARS: usize = 30;
pub const DEFAULT_MAX_SEGMENTS: usize = 50;
pub const DEFAULT_GENERATION_CONFIDENCE: f32 = 0.8;
pub const DEFAULT_SOURCE_TAG: &str = "scraped_content";

/// Location of an all-MiniLM-L6-v2 checkpoint for semantic mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFiles {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub similarity_threshold: f32,
    pub fetch_timeout_secs: u64,
    pub min_segment_chars: usize,
    pub question_min_chars: usize,
    pub max_segments: usize,
    pub generation_confidence: f32,
    pub source_tag: String,
    pub user_agent: String,
    pub model: Option<ModelFiles>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_THRESHOLD,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            min_segment_chars: DEFAULT_MIN_SEGMENT_CHARS,
            question_min_chars: DEFAULT_QUESTION_MIN_CHARS,
            max_segments: DEFAULT_MAX_SEGMENTS,
            generation_confidence: DEFAULT_GENERATION_CONFIDENCE,
            source_tag: DEFAULT_SOURCE_TAG.to_string(),
            user_agent: concat!("faqbot/", env!("CARGO_PKG_VERSION")).to_string(),
            model: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| EngineError::Config(format!("open {}: {e}", path.display())))?;
        let config: EngineConfig = serde_json::from_reader(file)
            .map_err(|e| EngineError::Config(format!("parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(EngineError::Config(format!(
                "similarity_threshold must be within [0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.generation_confidence) {
            return Err(EngineError::Config(format!(
                "generation_confidence must be within [0, 1], got {}",
                self.generation_confidence
            )));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(EngineError::Config("fetch_timeout_secs must be > 0".into()));
        }
        if self.max_segments == 0 {
            return Err(EngineError::Config("max_segments must be > 0".into()));
        }
        if self.min_segment_chars == 0 {
            return Err(EngineError::Config("min_segment_chars must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.similarity_threshold, 0.7);
        assert_eq!(config.fetch_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_segments, 50);
        assert!(config.model.is_none());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let config = EngineConfig {
            similarity_threshold: 1.5,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn rejects_zero_timeout() {
        let config = EngineConfig {
            fetch_timeout_secs: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = std::env::temp_dir().join(format!("faqbot-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("engine.json");
        let mut file = File::create(&path).unwrap();
        write!(file, r#"{{"similarity_threshold": 0.5, "max_segments": 10}}"#).unwrap();

        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.similarity_threshold, 0.5);
        assert_eq!(config.max_segments, 10);
        assert_eq!(config.fetch_timeout_secs, DEFAULT_FETCH_TIMEOUT_SECS);
        assert_eq!(config.source_tag, DEFAULT_SOURCE_TAG);

        std::fs::remove_dir_all(&dir).ok();
    }
}
