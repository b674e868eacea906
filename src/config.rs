use crate::apis::camara::DEFAULT_BASE_URL;
use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub dashboard: DashboardConfig,
}

/// Upstream API settings, including the retry policy for transient failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Page size requested from listing and expense endpoints.
    pub page_size: u32,
    /// Extra attempts after a failed request. Zero disables retries.
    pub retry_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent attempt.
    pub retry_backoff_ms: u64,
    /// Upper bound on expense pages fetched per deputy/month.
    pub max_expense_pages: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub raw_dir: String,
    pub processed_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: 100,
            retry_attempts: 0,
            retry_backoff_ms: 500,
            max_expense_pages: 100,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            raw_dir: "data/raw".to_string(),
            processed_dir: "data/processed".to_string(),
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self { port: 8052 }
    }
}

impl Config {
    /// Loads `config.toml` from the working directory, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Config::default());
        }
        let config_content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: Config = toml::from_str(&config_content)?;
        Ok(config)
    }

    /// Resolved dashboard port: the `PORT` environment variable wins over the
    /// configured value.
    pub fn dashboard_port(&self) -> u16 {
        std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(self.dashboard.port)
    }
}
