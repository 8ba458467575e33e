//! Configuration parsing for the probe harness.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from TOML (raw, before merging).
#[derive(Debug, Clone, Deserialize)]
struct RawHarnessConfig {
    pub harness: HarnessSettings,
    #[serde(default = "empty_table")]
    pub defaults: toml::Value,
    #[serde(default)]
    pub models: Vec<toml::Value>,
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

/// Top-level configuration after merging defaults into model entries.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub harness: HarnessSettings,
    pub models: Vec<ModelEntry>,
}

/// Harness-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessSettings {
    /// Root holding `configs/{relation}_configs/{mode}.toml`.
    #[serde(default = "default_base_data_dir")]
    pub base_data_dir: PathBuf,
    pub relations: Vec<String>,
    pub modes: Vec<String>,
    /// Path to the `probe` binary (auto-detected if not set).
    #[serde(default)]
    pub probe_binary: Option<String>,
    /// Pass `--run-all` to every job.
    #[serde(default)]
    pub run_all: bool,
    /// Pass `--test` to every job.
    #[serde(default)]
    pub test_mode: bool,
    /// Maximum retry attempts per job.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// A device is eligible only with strictly more free memory than this (MiB).
    #[serde(default = "default_min_free_mib")]
    pub min_free_mib: u64,
    /// Reset a device with `nvidia-smi -r` before its failed job is retried.
    #[serde(default = "default_reset_devices")]
    pub reset_devices: bool,
    /// Path to the job ledger.
    #[serde(default = "default_state_file")]
    pub state_file: String,
    /// Directory for per-job stdout/stderr logs.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// `RUST_LOG` value to pass to child probe processes.
    #[serde(default)]
    pub rust_log: Option<String>,
}

/// A model to probe, after `[defaults]` has been merged in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Short name used in job labels.
    pub name: String,
    /// Model id passed to `probe run --model`.
    pub model: String,
    /// Extra arguments appended to every job for this model.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_base_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_max_retries() -> u32 {
    3
}

fn default_min_free_mib() -> u64 {
    40 * 1024
}

fn default_reset_devices() -> bool {
    true
}

fn default_state_file() -> String {
    "./harness_state.json".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}

/// Merge two TOML tables, with `overlay` values taking precedence.
fn merge_toml(base: &toml::Value, overlay: &toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(base_map), toml::Value::Table(overlay_map)) => {
            let mut merged = base_map.clone();
            for (k, v) in overlay_map {
                merged.insert(
                    k.clone(),
                    if let Some(base_v) = base_map.get(k) {
                        merge_toml(base_v, v)
                    } else {
                        v.clone()
                    },
                );
            }
            toml::Value::Table(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file, merging defaults into each model.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().display().to_string(), e))?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let raw: RawHarnessConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let models: Vec<ModelEntry> = raw
            .models
            .iter()
            .map(|entry| {
                let merged = merge_toml(&raw.defaults, entry);
                merged
                    .try_into()
                    .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))
            })
            .collect::<Result<_, _>>()?;

        let config = Self {
            harness: raw.harness,
            models,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.harness.relations.is_empty() {
            return Err(ConfigError::Invalid("no relations configured".into()));
        }
        if self.harness.modes.is_empty() {
            return Err(ConfigError::Invalid("no modes configured".into()));
        }
        if self.models.is_empty() {
            return Err(ConfigError::Invalid("no [[models]] configured".into()));
        }
        if let Some(dup) = self
            .models
            .iter()
            .enumerate()
            .find(|(i, m)| self.models[..*i].iter().any(|o| o.name == m.name))
        {
            return Err(ConfigError::Invalid(format!(
                "model name {:?} is used twice",
                dup.1.name
            )));
        }
        Ok(())
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

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn parse_config(toml_str: &str) -> HarnessConfig {
        let dir = tempdir().unwrap();
        let path = dir.path().join("harness.toml");
        std::fs::write(&path, toml_str).unwrap();
        HarnessConfig::load(&path).unwrap()
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = parse_config(
            r#"
[harness]
relations = ["P19"]
modes = ["qa"]

[[models]]
name = "llama"
model = "meta-llama/Llama-3.1-8B-Instruct"
"#,
        );
        assert_eq!(config.harness.max_retries, 3);
        assert_eq!(config.harness.min_free_mib, 40960);
        assert!(config.harness.reset_devices);
        assert_eq!(config.harness.base_data_dir, PathBuf::from("data"));
        assert_eq!(config.models.len(), 1);
        assert!(config.models[0].extra_args.is_empty());
    }

    #[test]
    fn test_defaults_applied() {
        let config = parse_config(
            r#"
[harness]
relations = ["P19", "P20"]
modes = ["qa", "fc"]

[defaults]
extra_args = ["--run-all"]

[[models]]
name = "a"
model = "org/a"

[[models]]
name = "b"
model = "org/b"
extra_args = []
"#,
        );
        assert_eq!(config.models[0].extra_args, vec!["--run-all".to_string()]);
        assert!(config.models[1].extra_args.is_empty()); // Overridden
    }

    #[test]
    fn test_rejects_empty_and_duplicate_models() {
        let missing = HarnessConfig::parse(
            r#"
[harness]
relations = ["P19"]
modes = ["qa"]
"#,
        );
        assert!(matches!(missing, Err(ConfigError::Invalid(_))));

        let duplicate = HarnessConfig::parse(
            r#"
[harness]
relations = ["P19"]
modes = ["qa"]

[[models]]
name = "a"
model = "org/a"

[[models]]
name = "a"
model = "org/b"
"#,
        );
        assert!(matches!(duplicate, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let err = HarnessConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(..)));
    }
}
