use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::error::MailMindError;

pub const DEFAULT_MODEL: &str = "llama-3.1-8b-instant";
pub const DEFAULT_MODEL_BASE_URL: &str = "https://api.groq.com/openai";
pub const DEFAULT_PROVIDER_API_BASE: &str = "https://www.googleapis.com/gmail/v1/users/me";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub pacing_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { pacing_ms: 1800 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model: String,
    pub base_url: String,
    pub summary_temperature: f64,
    pub reply_temperature: f64,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_MODEL_BASE_URL.to_string(),
            summary_temperature: 0.2,
            reply_temperature: 0.3,
            max_tokens: 512,
            request_timeout_secs: 45,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_base: String,
    pub token_command: Option<String>,
    pub token_command_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_PROVIDER_API_BASE.to_string(),
            token_command: None,
            token_command_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MailMindConfig {
    pub queue: QueueConfig,
    pub model: ModelConfig,
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialMailMindConfig {
    queue: Option<QueueConfig>,
    model: Option<ModelConfig>,
    provider: Option<ProviderConfig>,
}

fn env_or_f64(var: &str, fallback: f64) -> f64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<f64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

pub fn env_non_empty(var: &str) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

/// First non-empty key wins.
pub fn resolve_model_api_key() -> Option<String> {
    env_non_empty("MAILMIND_MODEL_API_KEY")
        .or_else(|| env_non_empty("GROQ_API_KEY"))
        .or_else(|| env_non_empty("AI_API_KEY"))
}

fn validate(cfg: &MailMindConfig) -> Result<()> {
    if cfg.queue.pacing_ms == 0 {
        return Err(anyhow!("invalid queue pacing: must be >= 1 ms"));
    }
    if cfg.model.model.trim().is_empty() {
        return Err(anyhow!("invalid model: cannot be empty"));
    }
    if !cfg.model.base_url.starts_with("http") {
        return Err(anyhow!(
            "invalid model base url `{}`: expected http(s) url",
            cfg.model.base_url
        ));
    }
    for (name, t) in [
        ("summary", cfg.model.summary_temperature),
        ("reply", cfg.model.reply_temperature),
    ] {
        if !(0.0..=2.0).contains(&t) {
            return Err(anyhow!(
                "invalid {name} temperature {t}: require 0.0 <= t <= 2.0"
            ));
        }
    }
    if cfg.model.max_tokens == 0 {
        return Err(anyhow!("invalid model max tokens: must be >= 1"));
    }
    if cfg.model.request_timeout_secs == 0 {
        return Err(anyhow!("invalid model request timeout: must be >= 1 second"));
    }
    if !cfg.provider.api_base.starts_with("http") {
        return Err(anyhow!(
            "invalid provider api base `{}`: expected http(s) url",
            cfg.provider.api_base
        ));
    }
    Ok(())
}

pub fn resolve_config_path() -> Option<PathBuf> {
    if let Some(custom) = env_non_empty("MAILMIND_CONFIG_PATH") {
        return Some(PathBuf::from(custom));
    }
    if let Some(home) = env_non_empty("MAILMIND_HOME") {
        return Some(PathBuf::from(home).join("mailmind.toml"));
    }

    let home = dirs::home_dir()?;
    Some(home.join(".mailmind").join("mailmind.toml"))
}

fn merge_toml(base: &mut MailMindConfig, raw: &str) -> Result<()> {
    let parsed: PartialMailMindConfig =
        toml::from_str(raw).map_err(|err| MailMindError::InvalidConfig(err.to_string()))?;
    if let Some(queue) = parsed.queue {
        base.queue = queue;
    }
    if let Some(model) = parsed.model {
        base.model = model;
    }
    if let Some(provider) = parsed.provider {
        base.provider = provider;
    }
    Ok(())
}

fn merge_file_config(base: &mut MailMindConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    merge_toml(base, &raw)
        .map_err(|err| anyhow!("failed to parse mailmind config {}: {err}", path.display()))
}

fn apply_env_overrides(cfg: &mut MailMindConfig) {
    cfg.queue.pacing_ms = env_or_u64("MAILMIND_QUEUE_PACING_MS", cfg.queue.pacing_ms);
    cfg.model.model = env_or_string("MAILMIND_MODEL", &cfg.model.model);
    cfg.model.base_url = env_or_string("MAILMIND_MODEL_BASE_URL", &cfg.model.base_url);
    cfg.model.summary_temperature = env_or_f64(
        "MAILMIND_SUMMARY_TEMPERATURE",
        cfg.model.summary_temperature,
    );
    cfg.model.reply_temperature =
        env_or_f64("MAILMIND_REPLY_TEMPERATURE", cfg.model.reply_temperature);
    cfg.model.max_tokens =
        env_or_u64("MAILMIND_MODEL_MAX_TOKENS", u64::from(cfg.model.max_tokens))
            .try_into()
            .unwrap_or(cfg.model.max_tokens);
    cfg.model.request_timeout_secs = env_or_u64(
        "MAILMIND_MODEL_TIMEOUT_SECS",
        cfg.model.request_timeout_secs,
    );
    cfg.provider.api_base = env_or_string("MAILMIND_PROVIDER_API_BASE", &cfg.provider.api_base);
    if let Some(command) = env_non_empty("MAILMIND_GMAIL_TOKEN_COMMAND") {
        cfg.provider.token_command = Some(command);
    }
}

pub fn load_config() -> Result<MailMindConfig> {
    let mut cfg = MailMindConfig::default();
    merge_file_config(&mut cfg)?;
    apply_env_overrides(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}
