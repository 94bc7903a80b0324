// src/config/llm.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

pub const DEFAULT_LLM_CONFIG_PATH: &str = "config/llm.json";
pub const ENV_LLM_CONFIG_PATH: &str = "LLM_CONFIG_PATH";

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_draft_model() -> String {
    "gpt-4o".to_string()
}
fn default_keywords_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "openai" | "mock" | "disabled" (case-insensitive)
    pub provider: String,
    /// Any OpenAI-compatible chat-completions endpoint root.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// "ENV" means: read from LLM_API_KEY, then OPENAI_API_KEY
    #[serde(default)]
    pub api_key: String,
    /// Model for the focus draft.
    #[serde(default = "default_draft_model")]
    pub draft_model: String,
    /// Cheaper model for summaries, one-liners, clustering and dedupe checks.
    #[serde(default = "default_keywords_model")]
    pub keywords_model: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            base_url: default_base_url(),
            api_key: String::new(),
            draft_model: default_draft_model(),
            keywords_model: default_keywords_model(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: LlmConfig = serde_json::from_str(&data)?;
        cfg.resolved()
    }

    /// `$LLM_CONFIG_PATH` or `config/llm.json`; without a file, an OpenAI provider is
    /// assumed when an API key is present in the environment.
    pub fn load_default() -> anyhow::Result<Self> {
        let path = env::var(ENV_LLM_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_LLM_CONFIG_PATH.into());
        if Path::new(&path).exists() {
            return Self::load_from_file(&path);
        }
        let mut cfg = Self::default();
        if let Some(key) = key_from_env() {
            cfg.provider = "openai".to_string();
            cfg.api_key = key;
        }
        if let Ok(m) = env::var("LLM_DRAFT_MODEL") {
            cfg.draft_model = m;
        }
        if let Ok(m) = env::var("LLM_KEYWORDS_MODEL") {
            cfg.keywords_model = m;
        }
        if let Ok(u) = env::var("LLM_BASE_URL") {
            cfg.base_url = u;
        }
        Ok(cfg)
    }

    fn resolved(mut self) -> anyhow::Result<Self> {
        self.provider = self.provider.trim().to_lowercase();
        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = match self.provider.as_str() {
                "openai" => key_from_env()
                    .ok_or_else(|| anyhow::anyhow!("Missing LLM_API_KEY / OPENAI_API_KEY env var"))?,
                "mock" | "disabled" => String::new(),
                other => anyhow::bail!("Unsupported provider in config: {other}"),
            };
        }
        self.base_url = self.base_url.trim_end_matches('/').to_string();
        if self.connect_timeout_secs == 0 {
            self.connect_timeout_secs = default_connect_timeout_secs();
        }
        Ok(self)
    }
}

fn key_from_env() -> Option<String> {
    env::var("LLM_API_KEY")
        .or_else(|_| env::var("OPENAI_API_KEY"))
        .ok()
        .filter(|k| !k.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[serial_test::serial]
    #[test]
    fn env_key_is_resolved_and_url_trimmed() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("llm.json");
        fs::write(
            &p,
            r#"{"provider":"OpenAI","base_url":"https://llm.local/v1/","api_key":"ENV"}"#,
        )
        .unwrap();
        env::set_var("LLM_API_KEY", "sk-test");
        let cfg = LlmConfig::load_from_file(&p).unwrap();
        env::remove_var("LLM_API_KEY");

        assert_eq!(cfg.provider, "openai");
        assert_eq!(cfg.api_key, "sk-test");
        assert_eq!(cfg.base_url, "https://llm.local/v1");
        assert_eq!(cfg.keywords_model, "gpt-4o-mini");
    }

    #[test]
    fn unknown_provider_with_env_key_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("llm.json");
        fs::write(&p, r#"{"provider":"acme","api_key":"env"}"#).unwrap();
        assert!(LlmConfig::load_from_file(&p).is_err());
    }
}
