use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::error::{ErrorEnvelope, RelayError};
use crate::relay::RelayOptions;
use crate::transcode::RelayMode;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RelayCfg {
    /// Trailer appended to every response; empty disables injection.
    #[serde(default)]
    pub fixed_content: String,
    /// Regexes over the model name; matching models have their
    /// non-streaming response text captured for logging.
    #[serde(default = "default_text_capture_models")]
    pub text_capture_models: Vec<String>,
}

impl Default for RelayCfg {
    fn default() -> Self {
        Self {
            fixed_content: String::new(),
            text_capture_models: default_text_capture_models(),
        }
    }
}

fn default_text_capture_models() -> Vec<String> {
    vec!["^gpt".to_string()]
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds (default 60000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayCfg,
    /// Upstream client timeouts and pooling. Missing → defaults.
    #[serde(default)]
    pub http: HttpCfg,
}

fn config_error(e: impl std::fmt::Display) -> ErrorEnvelope {
    ErrorEnvelope::internal(RelayError::Config(e.to_string()), "load_config_failed")
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| ErrorEnvelope::internal(e, "load_config_failed"))?;
        let s = std::str::from_utf8(&bytes).map_err(config_error)?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s).map_err(config_error)?,
            Some("toml") => toml::from_str::<Self>(s).map_err(config_error)?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(config_error)
                .or_else(|_| toml::from_str::<Self>(s).map_err(config_error))?,
        };
        Ok(cfg)
    }

    /// Per-request options seeded from this config.
    pub fn request_options(
        &self,
        gate: &ModelGate,
        relay_mode: RelayMode,
        model_name: &str,
        stream: bool,
    ) -> RelayOptions {
        RelayOptions::new(relay_mode, model_name)
            .stream(stream)
            .fixed_content(self.relay.fixed_content.clone())
            .capture_text(gate.matches(model_name))
    }
}

/// Compiled `text_capture_models` patterns.
#[derive(Debug)]
pub struct ModelGate {
    patterns: Vec<Regex>,
}

impl ModelGate {
    pub fn new(cfg: &RelayCfg) -> crate::error::CoreResult<Self> {
        let mut patterns = Vec::new();
        for p in &cfg.text_capture_models {
            let regex = Regex::new(p).map_err(|e| {
                ErrorEnvelope::internal(
                    RelayError::Config(format!("invalid model pattern '{p}': {e}")),
                    "load_config_failed",
                )
            })?;
            patterns.push(regex);
        }
        Ok(Self { patterns })
    }

    pub fn matches(&self, model: &str) -> bool {
        self.patterns.iter().any(|r| r.is_match(model))
    }
}
