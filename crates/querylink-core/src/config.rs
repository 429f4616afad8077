use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Top-level querylink configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Allow any origin to reach the API (the web UI is usually served elsewhere).
    #[serde(default = "default_cors_permissive")]
    pub cors_permissive: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_permissive: default_cors_permissive(),
        }
    }
}

fn default_bind() -> String { "127.0.0.1:18790".to_string() }
fn default_cors_permissive() -> bool { true }

/// Remote query bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Seconds to wait for the browser's callback before failing the query.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    /// Depth of each session's outbound frame queue.
    #[serde(default = "default_sink_buffer")]
    pub sink_buffer: usize,
    /// Interval between SSE keep-alive comments.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Upper bound on bound parameters per query.
    #[serde(default = "default_max_params")]
    pub max_params: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            query_timeout_secs: default_query_timeout_secs(),
            sink_buffer: default_sink_buffer(),
            keep_alive_secs: default_keep_alive_secs(),
            max_params: default_max_params(),
        }
    }
}

impl BridgeConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.query_timeout_secs == 0 {
            return Err(BridgeError::Config(
                "bridge.query_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.sink_buffer == 0 {
            return Err(BridgeError::Config(
                "bridge.sink_buffer must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_query_timeout_secs() -> u64 { 30 }
fn default_sink_buffer() -> usize { 64 }
fn default_keep_alive_secs() -> u64 { 15 }
fn default_max_params() -> usize { 256 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| BridgeError::ConfigNotFound(path.display().to_string()))?;

        let expanded = expand_env_vars(&content);

        let config: AppConfig =
            toml::from_str(&expanded).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.bridge.validate()
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Unset variables stay as written
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}
