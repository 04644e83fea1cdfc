use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;

/// Top-level configuration loaded from `mailsense.toml`.
#[derive(Debug, Deserialize)]
pub struct MailsenseConfig {
    pub provider: ProviderSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    /// Template corpus location. Absent = run without a corpus: analysis
    /// offers the built-in category list and every reply is drafted
    /// free-form.
    pub corpus: Option<CorpusSettings>,
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

/// Chat-completions endpoint settings.
#[derive(Debug, Deserialize)]
pub struct ProviderSettings {
    /// Base URL of an OpenAI-compatible API, e.g. "https://api.openai.com/v1".
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key. The key itself never
    /// appears in the config file.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ProviderSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolve the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String, Error> {
        std::env::var(&self.api_key_env).map_err(|_| {
            Error::Config(format!(
                "environment variable {} is not set",
                self.api_key_env
            ))
        })
    }
}

fn default_api_key_env() -> String {
    "MAILSENSE_API_KEY".into()
}

fn default_timeout_secs() -> u64 {
    90
}

/// Retry settings for timed-out LLM calls.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed delay between attempts, in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_ms() -> u64 {
    1500
}

/// Template corpus source.
#[derive(Debug, Deserialize)]
pub struct CorpusSettings {
    pub path: PathBuf,
}

/// Batch processing settings.
#[derive(Debug, Deserialize)]
pub struct PipelineSettings {
    /// Emails processed concurrently within a batch.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    4
}

impl MailsenseConfig {
    /// Parse a TOML string into a `MailsenseConfig`.
    pub fn from_toml_str(content: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.provider.base_url.trim().is_empty() {
            return Err(Error::Config("provider.base_url must not be empty".into()));
        }
        if self.provider.model.trim().is_empty() {
            return Err(Error::Config("provider.model must not be empty".into()));
        }
        if self.provider.timeout_secs == 0 {
            return Err(Error::Config(
                "provider.timeout_secs must be at least 1".into(),
            ));
        }
        if self.pipeline.workers == 0 {
            return Err(Error::Config("pipeline.workers must be at least 1".into()));
        }
        Ok(())
    }
}
