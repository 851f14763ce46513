//! Server configuration, loaded from environment variables at startup.

use std::path::PathBuf;

use docchat_core::qa::DEFAULT_TOP_K;
use docchat_core::route::{AnswerMode, DEFAULT_MARKER};

pub const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Runtime configuration for docchat-server. Read once, never mutated.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:5000"`).
    pub bind_address: String,

    /// Store file, or a directory whose `*.json` stores are merged (default: `"/data/"`).
    pub store_path: PathBuf,

    /// Leading character that routes a question straight to the model.
    pub direct_marker: char,

    /// How unmarked questions are answered.
    pub mode: AnswerMode,

    /// Passages retrieved per question.
    pub top_k: usize,

    /// Ask the model to cite passage sources.
    pub with_sources: bool,

    /// Model used when a request leaves `model` empty; provider default when unset.
    pub default_model: Option<String>,

    /// Largest accepted chat request body in bytes (default: 32 MiB).
    pub max_body_bytes: usize,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(get: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_owned());
        let flag = |key: &str| {
            get(key)
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        };

        let mode = match get("DOCCHAT_MODE") {
            Some(v) => v.parse::<AnswerMode>()?,
            None => AnswerMode::default(),
        };
        let direct_marker = get("DOCCHAT_DIRECT_MARKER")
            .and_then(|v| v.chars().next())
            .unwrap_or(DEFAULT_MARKER);
        let top_k = match get("DOCCHAT_TOP_K") {
            Some(v) => v
                .parse::<usize>()
                .map_err(|e| anyhow::anyhow!("DOCCHAT_TOP_K='{}': {}", v, e))?,
            None => DEFAULT_TOP_K,
        };
        let max_body_bytes = match get("DOCCHAT_MAX_BODY_BYTES") {
            Some(v) => v
                .parse::<usize>()
                .map_err(|e| anyhow::anyhow!("DOCCHAT_MAX_BODY_BYTES='{}': {}", v, e))?,
            None => DEFAULT_MAX_BODY_BYTES,
        };

        Ok(Self {
            bind_address: env_or("DOCCHAT_BIND", "0.0.0.0:5000"),
            store_path: PathBuf::from(env_or("DOCCHAT_STORE", "/data/")),
            direct_marker,
            mode,
            top_k,
            with_sources: flag("DOCCHAT_WITH_SOURCES"),
            default_model: get("DOCCHAT_MODEL").filter(|m| !m.trim().is_empty()),
            max_body_bytes,
            log_level: env_or("DOCCHAT_LOG", "info"),
            log_json: flag("DOCCHAT_LOG_JSON"),
        })
    }
}
