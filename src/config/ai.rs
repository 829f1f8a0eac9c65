// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, time::Duration};

fn default_provider() -> String {
    "anthropic".to_string()
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub enabled: bool,
    /// "anthropic" | "openai" (case-insensitive; "claude" is accepted for anthropic)
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// "ENV" means: read from ANTHROPIC_API_KEY / OPENAI_API_KEY (by provider)
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            model: None,
            api_key: String::new(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn key_var(provider: &str) -> anyhow::Result<&'static str> {
    match provider {
        "anthropic" => Ok("ANTHROPIC_API_KEY"),
        "openai" => Ok("OPENAI_API_KEY"),
        other => anyhow::bail!("Unsupported provider in config: {other}"),
    }
}

fn normalize_provider(raw: &str) -> String {
    match raw.trim().to_lowercase().as_str() {
        "claude" => "anthropic".to_string(),
        other => other.to_string(),
    }
}

impl AiConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let mut cfg: AiConfig = serde_json::from_str(&data)?;

        cfg.provider = normalize_provider(&cfg.provider);

        // Resolve api key if "ENV"
        if cfg.api_key.trim().eq_ignore_ascii_case("env") {
            let var = key_var(&cfg.provider)?;
            cfg.api_key = env::var(var).map_err(|_| anyhow::anyhow!("Missing {var} env var"))?;
        }
        cfg.sanitize();
        Ok(cfg)
    }

    /// `AI_PROVIDER` / `AI_MODEL` plus the provider's key variable.
    /// Enabled iff a key is present.
    pub fn from_env() -> anyhow::Result<Self> {
        let provider = normalize_provider(&env::var("AI_PROVIDER").unwrap_or_else(|_| default_provider()));
        let var = key_var(&provider)?;
        let api_key = env::var(var).unwrap_or_default();
        let mut cfg = AiConfig {
            enabled: !api_key.trim().is_empty(),
            provider,
            model: env::var("AI_MODEL").ok().filter(|m| !m.trim().is_empty()),
            api_key,
            ..AiConfig::default()
        };
        cfg.sanitize();
        Ok(cfg)
    }

    /// `AI_CONFIG_PATH`, else `config/ai.json`, else the environment.
    pub fn load_default() -> anyhow::Result<Self> {
        if let Ok(p) = env::var("AI_CONFIG_PATH") {
            return Self::load_from_file(p);
        }
        if Path::new("config/ai.json").exists() {
            return Self::load_from_file("config/ai.json");
        }
        Self::from_env()
    }

    pub fn model_or_default(&self) -> String {
        self.model.clone().unwrap_or_else(|| {
            match self.provider.as_str() {
                "openai" => "gpt-4o-mini",
                _ => "claude-3-5-haiku-latest",
            }
            .to_string()
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn sanitize(&mut self) {
        if !(256..=8192).contains(&self.max_tokens) {
            self.max_tokens = default_max_tokens();
        }
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
    }
}
