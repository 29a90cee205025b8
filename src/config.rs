//! Pipeline configuration.
//!
//! Every field has a serde default so a partial JSON file (or `{}`) is a
//! valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_ANSWER_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Anthropic model id used for every stage.
    #[serde(default = "default_model")]
    pub model: String,
    /// Answers per classify-answers oracle call.
    #[serde(default = "default_answer_batch_size")]
    pub answer_batch_size: usize,
    /// Answer batches of one question in flight at once.
    #[serde(default = "default_concurrency")]
    pub batch_concurrency: usize,
    /// Questions processed concurrently by `run_survey`.
    #[serde(default = "default_concurrency")]
    pub question_concurrency: usize,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Per-attempt bound on one oracle call, in seconds.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_max_extracted_codes")]
    pub max_extracted_codes: usize,
    #[serde(default = "default_max_normalized_codes")]
    pub max_normalized_codes: usize,
    /// Run the summary stage after answer classification.
    #[serde(default)]
    pub summarize: bool,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_answer_batch_size() -> usize {
    DEFAULT_ANSWER_BATCH_SIZE
}
fn default_concurrency() -> usize {
    4
}
fn default_max_output_tokens() -> u32 {
    crate::gateway::DEFAULT_MAX_TOKENS
}
fn default_call_timeout_secs() -> u64 {
    120
}
fn default_max_extracted_codes() -> usize {
    30
}
fn default_max_normalized_codes() -> usize {
    15
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            answer_batch_size: default_answer_batch_size(),
            batch_concurrency: default_concurrency(),
            question_concurrency: default_concurrency(),
            max_output_tokens: default_max_output_tokens(),
            call_timeout_secs: default_call_timeout_secs(),
            max_extracted_codes: default_max_extracted_codes(),
            max_normalized_codes: default_max_normalized_codes(),
            summarize: false,
        }
    }
}

impl PipelineConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.answer_batch_size == 0 {
            return Err(ConfigError::Invalid("answer_batch_size must be >= 1".into()));
        }
        if self.batch_concurrency == 0 || self.question_concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be >= 1".into()));
        }
        if self.max_normalized_codes == 0 || self.max_extracted_codes == 0 {
            return Err(ConfigError::Invalid("code caps must be >= 1".into()));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let cfg: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.model, DEFAULT_MODEL);
        assert_eq!(cfg.answer_batch_size, 50);
        assert_eq!(cfg.max_output_tokens, 8192);
        assert_eq!(cfg.max_normalized_codes, 15);
        assert!(!cfg.summarize);
        assert_eq!(cfg.call_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let cfg = PipelineConfig {
            answer_batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }
}
