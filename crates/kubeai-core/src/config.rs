//! Host configuration
//!
//! `LlmConfig` is read from `<config dir>/kubeai/config.toml` (or an
//! explicit path), then overlaid with environment variables. Hosts turn it
//! into a [`ProviderConfig`] plus an optional [`RetryConfig`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ai::retry::RetryConfig;
use crate::ai::types::ProviderConfig;
use crate::constants;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    /// Empty selects the provider default
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    pub skip_tls_verify: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    pub max_iterations: usize,
    pub retry_enabled: bool,
    /// Total attempts, 0 means the default
    pub max_retries: u32,
    /// Seconds, 0 means the default
    pub max_backoff_secs: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: String::new(),
            endpoint: None,
            api_key: None,
            region: None,
            access_key_id: None,
            session_token: None,
            skip_tls_verify: false,
            reasoning_effort: None,
            max_iterations: constants::ai::DEFAULT_MAX_ITERATIONS,
            retry_enabled: false,
            max_retries: 0,
            max_backoff_secs: 0.0,
        }
    }
}

impl LlmConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| {
            dir.join(constants::config::CONFIG_DIR_NAME)
                .join(constants::config::CONFIG_FILE_NAME)
        })
    }

    /// Load from the default location, then apply the process environment
    ///
    /// A missing file yields defaults.
    pub fn load() -> Result<Self> {
        let mut config = match Self::default_path() {
            Some(path) => Self::load_from_path(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from a specific file; a missing file yields defaults
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// Fill unset values from the environment
    ///
    /// `KUBEAI_PROVIDER`, `KUBEAI_MODEL` and `KUBEAI_ENDPOINT` override the
    /// file. The API key is only filled when empty: `KUBEAI_API_KEY` first,
    /// then the provider's conventional variable.
    pub fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(provider) = get("KUBEAI_PROVIDER") {
            self.provider = provider;
        }
        if let Some(model) = get("KUBEAI_MODEL") {
            self.model = model;
        }
        if let Some(endpoint) = get("KUBEAI_ENDPOINT") {
            self.endpoint = Some(endpoint);
        }

        let has_key = self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty());
        if !has_key {
            self.api_key = get("KUBEAI_API_KEY").or_else(|| {
                provider_key_vars(&self.provider)
                    .iter()
                    .find_map(|var| get(var))
            });
        }
    }

    pub fn to_provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            provider: self.provider.clone(),
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            region: self.region.clone(),
            access_key_id: self.access_key_id.clone(),
            session_token: self.session_token.clone(),
            skip_tls_verify: self.skip_tls_verify,
            reasoning_effort: self.reasoning_effort.clone(),
            max_iterations: self.max_iterations,
        }
    }

    /// Retry settings when retries are enabled; zero values take defaults
    pub fn retry_config(&self) -> Option<RetryConfig> {
        if !self.retry_enabled {
            return None;
        }
        let mut config = RetryConfig::default();
        if self.max_retries > 0 {
            config.max_attempts = self.max_retries;
        }
        if self.max_backoff_secs > 0.0 {
            config.max_backoff = Duration::from_secs_f64(self.max_backoff_secs);
        }
        Some(config)
    }
}

/// Conventional API key variables per provider
fn provider_key_vars(provider: &str) -> &'static [&'static str] {
    match provider.to_lowercase().as_str() {
        "openai" => &["OPENAI_API_KEY"],
        "solar" => &["UPSTAGE_API_KEY"],
        "gemini" => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
        "bedrock" => &["AWS_SECRET_ACCESS_KEY"],
        _ => &[],
    }
}
