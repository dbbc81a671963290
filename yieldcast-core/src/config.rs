//! Farm configuration and credential resolution.
//!
//! Secrets follow a two-layer precedence: environment variables override
//! values from `config.toml`. The file is the canonical source of farm
//! identity (name, state, county, geometry path); tokens and API keys are
//! expected to arrive via the environment in deployed settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Literal value a fresh config ships with before a real NOAA token is set.
/// The weather ingestor treats this as "no credentials" and goes straight
/// to its synthetic series.
pub const PLACEHOLDER_NOAA_TOKEN: &str = "YOUR_NOAA_TOKEN_HERE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    Missing(PathBuf),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Farm identity block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Farm {
    pub name: String,
    pub state: String,
    pub county: String,
    /// Path to the field-boundary GeoJSON.
    pub fields_path: PathBuf,
}

/// USDA Quick Stats credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsdaSource {
    pub api_key: String,
}

/// NOAA CDO credentials. `station_id` is optional; when absent the weather
/// ingestor discovers the nearest station itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoaaSource {
    pub token: String,
    #[serde(default)]
    pub station_id: Option<String>,
}

/// Copernicus / imagery backend credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelSource {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSources {
    pub usda: UsdaSource,
    pub noaa: NoaaSource,
    pub sentinel: SentinelSource,
}

/// Top-level configuration: farm identity plus per-source credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmConfig {
    pub farm: Farm,
    pub data_sources: DataSources,
}

impl FarmConfig {
    /// Load from a TOML file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_env(path, &|key| std::env::var(key).ok())
    }

    /// Load with an injected environment lookup, so override precedence is
    /// testable without mutating process state.
    pub fn load_with_env(
        path: &Path,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path)?;
        let mut config: FarmConfig = toml::from_str(&raw)?;
        config.apply_env_overrides(env);
        Ok(config)
    }

    /// Environment variables take precedence over file values. Each secret
    /// accepts two spellings for compatibility with older deployments.
    fn apply_env_overrides(&mut self, env: &dyn Fn(&str) -> Option<String>) {
        if let Some(key) = first_of(env, &["USDA_API_KEY", "USDA_KEY"]) {
            self.data_sources.usda.api_key = key;
        }
        if let Some(token) = first_of(env, &["NOAA_TOKEN", "NOAA_KEY"]) {
            self.data_sources.noaa.token = token;
        }
        if let Some(user) = env("COPERNICUS_USER") {
            self.data_sources.sentinel.username = user;
        }
        if let Some(pass) = env("COPERNICUS_PASS") {
            self.data_sources.sentinel.password = pass;
        }
    }

    /// True when the NOAA token is still the shipped placeholder.
    pub fn noaa_token_is_placeholder(&self) -> bool {
        self.data_sources.noaa.token == PLACEHOLDER_NOAA_TOKEN
    }
}

fn first_of(env: &dyn Fn(&str) -> Option<String>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| env(k))
}
