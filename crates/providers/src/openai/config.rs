use directories::BaseDirs;
use serde::Deserialize;
use std::{env, fs, path::PathBuf, time::Duration};
use tracing::warn;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct OpenAiFileConfig {
    pub model: Option<String>,
    pub embedding_model: Option<String>,
    pub base_url: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub embed_batch_size: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    /// Only bounds connection setup; requests themselves run as long as upstream streams.
    pub connect_timeout: Duration,
    pub embed_batch_size: usize,
    pub proxy: Option<String>,
}

impl OpenAiConfig {
    pub fn new<K: Into<String>>(api_key: K) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            connect_timeout: Duration::from_secs(10),
            embed_batch_size: 64,
            proxy: None,
        }
    }

    pub fn from_env_and_file() -> anyhow::Result<Self> {
        let api_key =
            env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
        let mut cfg = Self::new(api_key);

        if let Some(path) = Self::config_path() {
            if path.exists() {
                match fs::read_to_string(&path) {
                    Ok(text) => match toml::from_str::<OpenAiFileConfig>(&text) {
                        Ok(file_cfg) => cfg.apply_file(file_cfg),
                        Err(e) => {
                            warn!(
                                target: "providers::openai",
                                path = %path.display(),
                                "ignoring unparsable config: {}",
                                e
                            )
                        }
                    },
                    Err(e) => {
                        warn!(
                            target: "providers::openai",
                            path = %path.display(),
                            "cannot read config: {}",
                            e
                        )
                    }
                }
            }
        }

        if let Ok(base) = env::var("OPENAI_BASE_URL") {
            cfg.base_url = base;
        }
        cfg.proxy = env::var("HTTPS_PROXY")
            .ok()
            .or_else(|| env::var("HTTP_PROXY").ok());

        url::Url::parse(&cfg.base_url)
            .map_err(|e| anyhow::anyhow!("invalid base url '{}': {}", cfg.base_url, e))?;
        Ok(cfg)
    }

    pub fn apply_file(&mut self, file_cfg: OpenAiFileConfig) {
        if let Some(m) = file_cfg.model {
            self.model = m;
        }
        if let Some(m) = file_cfg.embedding_model {
            self.embedding_model = m;
        }
        if let Some(b) = file_cfg.base_url {
            self.base_url = b;
        }
        if let Some(t) = file_cfg.connect_timeout_ms {
            self.connect_timeout = Duration::from_millis(t);
        }
        if let Some(n) = file_cfg.embed_batch_size {
            self.embed_batch_size = n.max(1);
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn config_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        let p = if cfg!(target_os = "windows") {
            base.home_dir().join(".docchat").join("config.toml")
        } else {
            base.config_dir().join("docchat").join("config.toml")
        };
        Some(p)
    }
}
