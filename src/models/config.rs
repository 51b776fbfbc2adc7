//! Configuration model loaded from external sources.

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Default location of the optional YAML settings file.
pub const DEFAULT_CONFIG_PATH: &str = "config/settings.yaml";

#[derive(Clone, Debug, Deserialize)]
/// Settings shared by the crawlers, the matching core and the CLI.
pub struct AppConfig {
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub request_delay_ms: u64,
    pub batch_delay_ms: u64,
    pub max_search_attempts: usize,
    pub min_similarity_score: f32,
    pub semantic_matching: bool,
    pub embedding_cache_size: usize,
    pub primary_source: String,
    /// Empty disables the fallback source.
    pub fallback_source: String,
    pub output_dir: String,
    pub user_agent: String,
}

impl AppConfig {
    /// Builds the configuration from defaults, an optional YAML file and
    /// `HSCODE_*` environment variables, in that order of precedence.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));

        Config::builder()
            .set_default("request_timeout_secs", 10)?
            .set_default("max_retries", 3)?
            .set_default("retry_delay_ms", 2000)?
            .set_default("request_delay_ms", 1000)?
            .set_default("batch_delay_ms", 2000)?
            .set_default("max_search_attempts", crate::MAX_SEARCH_ATTEMPTS as u64)?
            .set_default("min_similarity_score", crate::MIN_SIMILARITY_SCORE as f64)?
            .set_default("semantic_matching", false)?
            .set_default("embedding_cache_size", 1000)?
            .set_default("primary_source", "i5a6")?
            .set_default("fallback_source", "hsciq")?
            .set_default("output_dir", "data/output")?
            .set_default("user_agent", DEFAULT_USER_AGENT)?
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix("HSCODE").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn fallback_enabled(&self) -> bool {
        !self.fallback_source.trim().is_empty()
    }
}
