use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Model whitelist. Empty means every model is allowed.
    #[serde(default)]
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding a server-side upstream key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Ask the upstream to append a usage frame to streams.
    #[serde(default = "default_stream_usage")]
    pub stream_usage: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Client keys accepted by the bridge. Empty forwards the client key upstream.
    #[serde(default)]
    pub client_keys: Vec<String>,
}

fn default_port() -> u16 {
    4222
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_stream_usage() -> bool {
    true
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: None,
            timeout_secs: default_timeout_secs(),
            stream_usage: default_stream_usage(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            upstream: UpstreamConfig::default(),
            auth: AuthConfig::default(),
            models: Vec::new(),
        }
    }
}

impl ProxyConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file, falling back to defaults.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in &config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        tracing::info!("No config file found, using built-in defaults");
        Ok(Self::default())
    }

    /// Join the upstream base URL with an API path such as `/chat/completions`.
    pub fn upstream_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.upstream.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Server-side upstream key, if one is configured and present in the environment.
    pub fn server_api_key(&self) -> Option<String> {
        let var = self.upstream.api_key_env.as_deref()?;
        std::env::var(var).ok().filter(|k| !k.trim().is_empty())
    }

    pub fn is_model_allowed(&self, model: &str) -> bool {
        self.models.is_empty() || self.models.iter().any(|m| m == model)
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("claude-openai-bridge.toml"));

    // XDG / platform config dir
    if cfg!(target_os = "macos") {
        if let Some(home) = home_dir() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("claude-openai-bridge")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(
                PathBuf::from(xdg)
                    .join("claude-openai-bridge")
                    .join("config.toml"),
            );
        }
        if let Some(home) = home_dir() {
            paths.push(
                home.join(".config")
                    .join("claude-openai-bridge")
                    .join("config.toml"),
            );
        }
    }

    // Home directory fallback
    if let Some(home) = home_dir() {
        paths.push(home.join(".claude-openai-bridge.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
