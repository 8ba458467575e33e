//! Probe run configuration, loaded from one TOML file per (relation, mode).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{FrequencySetting, TemplateType};

/// Settings for one probe run over a relation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProbeConfig {
    /// Relation identifier, e.g. `P19`.
    pub relation: String,
    /// Model identifier passed to the inference backend.
    pub model: String,
    /// Model used by the semantic-judgment pass. Falls back to `model`.
    #[serde(default)]
    pub eval_model: Option<String>,
    #[serde(default)]
    pub template_type: TemplateType,
    /// Frequency threshold for the "high" side of a slice.
    pub count_high: u64,
    /// Frequency threshold for the "low" side of a slice.
    pub count_low: u64,
    /// Triples file. Defaults to `data/cleaned/{relation}_triples.jsonl`.
    #[serde(default)]
    pub dataset: Option<PathBuf>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    pub template_forward: String,
    pub template_backward: String,
    pub relation_forward: String,
    pub relation_backward: String,
    /// Root for result files; a run writes under
    /// `{output_dir}/{relation}/{model_slug}`.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Number of items per slice in a test run.
    #[serde(default = "default_test_items")]
    pub test_items: usize,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
}

/// How completions are obtained.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// OpenAI-compatible chat completions server (vLLM, llama.cpp).
    Http {
        #[serde(default = "default_backend_url")]
        url: String,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    /// External program speaking JSON over stdin/stdout. It inherits the
    /// process environment, including `CUDA_VISIBLE_DEVICES`.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Http {
            url: default_backend_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Sampling parameters forwarded to the backend.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SamplingConfig {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// Number of top log-probabilities to request per token.
    #[serde(default = "default_logprobs")]
    pub logprobs: Option<u32>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: None,
            top_p: default_top_p(),
            logprobs: default_logprobs(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl SamplingConfig {
    /// Deterministic sampling used for judgments.
    #[must_use]
    pub fn greedy() -> Self {
        Self {
            temperature: Some(0.0),
            top_p: 1.0,
            logprobs: None,
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_batch_size() -> usize {
    10_000
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("experiments")
}

fn default_test_items() -> usize {
    100
}

fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_top_p() -> f32 {
    0.95
}

fn default_logprobs() -> Option<u32> {
    Some(10)
}

fn default_max_tokens() -> u32 {
    16
}

impl ProbeConfig {
    /// Load and validate a probe config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relation.trim().is_empty() {
            return Err(ConfigError::Invalid("relation must not be empty".into()));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be positive".into()));
        }
        if self.test_items == 0 {
            return Err(ConfigError::Invalid("test_items must be positive".into()));
        }
        Ok(())
    }

    /// Dataset path, explicit or derived from the relation.
    #[must_use]
    pub fn dataset_path(&self) -> PathBuf {
        self.dataset.clone().unwrap_or_else(|| {
            PathBuf::from(format!("data/cleaned/{}_triples.jsonl", self.relation))
        })
    }

    /// Directory receiving result and checkpoint files.
    ///
    /// Every model gets its own directory, so jobs that share a config file
    /// but differ in `--model` never touch each other's files.
    #[must_use]
    pub fn result_dir(&self, test: bool) -> PathBuf {
        let base = self.output_dir.join(&self.relation).join(self.model_slug());
        if test { base.join("test") } else { base }
    }

    /// `model` reduced to a single path component, e.g.
    /// `meta-llama/Meta-Llama-3-8B-Instruct` becomes
    /// `meta-llama_Meta-Llama-3-8B-Instruct`.
    #[must_use]
    pub fn model_slug(&self) -> String {
        let slug: String = self
            .model
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        // "." and ".." would escape the relation directory.
        if slug.chars().all(|c| c == '.') {
            slug.replace('.', "_")
        } else {
            slug
        }
    }

    /// Settings probed by a run.
    #[must_use]
    pub fn settings(run_all: bool) -> Vec<FrequencySetting> {
        if run_all {
            vec![FrequencySetting::All]
        } else {
            FrequencySetting::SPLIT.to_vec()
        }
    }

    /// Model for the judgment pass.
    #[must_use]
    pub fn judge_model(&self) -> &str {
        self.eval_model.as_deref().unwrap_or(&self.model)
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}
