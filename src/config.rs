//! Transport settings and run configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

fn default_temperature() -> f64 {
    1.0
}

fn default_max_output_tokens() -> u32 {
    8192
}

fn default_max_retries() -> u32 {
    3
}

/// Settings for the LLM transport, typically loaded from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// API base URL
    pub url: String,
    /// API key
    pub key: String,
    /// Model identifier
    pub model: String,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Maximum tokens the model may generate
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Transport-internal retry count before sentinel degradation
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl LlmSettings {
    /// Create settings with defaults for the optional fields.
    pub fn new(url: impl Into<String>, key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key: key.into(),
            model: model.into(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            max_retries: default_max_retries(),
        }
    }

    /// Load and validate settings from a JSON file.
    ///
    /// Missing file, malformed JSON, or an empty `url`/`key` field are all
    /// configuration errors, fatal at startup.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        let settings: Self = serde_json::from_str(&raw)
            .map_err(|e| Error::config(format!("malformed {}: {e}", path.display())))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate that the required fields are present and non-empty.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::config("the 'url' field is missing or empty"));
        }
        if self.key.trim().is_empty() {
            return Err(Error::config("the 'key' field is missing or empty"));
        }
        Ok(())
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries.max(1);
        self
    }
}

/// Run configuration: retry bounds, step budget and scheduling knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Hard cap on combined Stage-1/Stage-2 iterations per question
    pub max_total_steps: u32,
    /// Repair attempts per failing statement (K)
    pub max_repair_attempts: u32,
    /// Outer parse/schema retries for the generation stages
    pub stage_parse_retries: u32,
    /// Outer parse retries for the exploration proposal
    pub exploration_parse_retries: u32,
    /// Outer attempts for the aggregation call
    pub aggregation_attempts: u32,
    /// Bound on concurrently running per-question workflows
    pub max_parallel: usize,
    /// Number of runs per question for multi-sample execution
    pub runs: u32,
    /// Wait applied once before concluding there is no pending work
    #[serde(with = "duration_secs")]
    pub wait_before_exit: Duration,
    /// Working directory for checkpoints, sinks and logs
    pub work_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_total_steps: 20,
            max_repair_attempts: 5,
            stage_parse_retries: 5,
            exploration_parse_retries: 5,
            aggregation_attempts: 3,
            max_parallel: 4,
            runs: 1,
            wait_before_exit: Duration::ZERO,
            work_dir: PathBuf::from("."),
        }
    }
}

impl RunConfig {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_max_total_steps(mut self, steps: u32) -> Self {
        self.max_total_steps = steps;
        self
    }

    pub fn with_max_repair_attempts(mut self, attempts: u32) -> Self {
        self.max_repair_attempts = attempts;
        self
    }

    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max.max(1);
        self
    }

    pub fn with_runs(mut self, runs: u32) -> Self {
        self.runs = runs.max(1);
        self
    }

    pub fn with_wait_before_exit(mut self, wait: Duration) -> Self {
        self.wait_before_exit = wait;
        self
    }

    /// Checkpoint directory under the working directory.
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.work_dir.join("checkpoints")
    }

    /// Shared result file under the working directory.
    pub fn result_path(&self) -> PathBuf {
        self.work_dir.join("results.json")
    }

    /// Status telemetry file under the working directory.
    pub fn status_log_path(&self) -> PathBuf {
        self.work_dir.join("status_log.jsonl")
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.max_total_steps, 20);
        assert_eq!(cfg.max_repair_attempts, 5);
        assert_eq!(cfg.wait_before_exit, Duration::ZERO);
    }

    #[test]
    fn test_settings_validation() {
        assert!(LlmSettings::new("https://api", "k", "m").validate().is_ok());
        assert!(LlmSettings::new("", "k", "m").validate().is_err());
        assert!(LlmSettings::new("https://api", " ", "m").validate().is_err());
    }

    #[test]
    fn test_settings_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("llm.json");
        std::fs::write(
            &path,
            r#"{"url": "https://api.example.com", "key": "secret", "model": "m1"}"#,
        )
        .unwrap();

        let settings = LlmSettings::from_file(&path).unwrap();
        assert_eq!(settings.model, "m1");
        assert_eq!(settings.max_retries, 3);

        assert!(LlmSettings::from_file(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_builder_clamps() {
        let cfg = RunConfig::default().with_max_parallel(0).with_runs(0);
        assert_eq!(cfg.max_parallel, 1);
        assert_eq!(cfg.runs, 1);
    }

    #[test]
    fn test_work_dir_layout() {
        let cfg = RunConfig::new("/tmp/run1");
        assert_eq!(cfg.checkpoint_dir(), PathBuf::from("/tmp/run1/checkpoints"));
        assert_eq!(cfg.result_path(), PathBuf::from("/tmp/run1/results.json"));
        assert_eq!(
            cfg.status_log_path(),
            PathBuf::from("/tmp/run1/status_log.jsonl")
        );
    }
}
