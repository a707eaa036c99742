use crate::error::MailMindError;
use crate::mailmind::clean::{OutputKind, clean_output};
use crate::mailmind::config::{ModelConfig, resolve_model_api_key};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

const SUMMARY_SYSTEM_PROMPT: &str = "You are an email assistant. Output only the concise summary sentences. Do not include any preface such as 'Here is a summary', 'Summary:', or similar. No markdown, no labels, no headings.";
const REPLY_SYSTEM_PROMPT: &str = "You are an email assistant. Output only the direct reply body text. Do not include any preface, notes, labels, or explanations. Do not quote the original email. No markdown. Start directly with the greeting or the first sentence.";

/// The model side of the system. Implementations return cleaned text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, body: &str) -> Result<String>;
    async fn draft_reply(&self, body: &str) -> Result<String>;
}

fn build_summary_prompt(body: &str) -> String {
    format!(
        "Email content to summarize:\n\"\"\"\n{body}\n\"\"\"\nSummarize in 3–4 clear sentences. Output only the summary text."
    )
}

fn build_reply_prompt(body: &str) -> String {
    format!(
        "Email to reply to:\n\"\"\"\n{body}\n\"\"\"\nCompose a concise, professional reply. Output only the reply body text, with no preamble or labels."
    )
}

pub fn extract_chat_completion_text(json: &Value) -> Option<String> {
    let choices = json.get("choices").and_then(Value::as_array)?;
    let first = choices.first()?;
    let content = first.get("message")?.get("content")?;
    let text = match content {
        Value::String(s) => s.to_string(),
        Value::Array(parts) => {
            let chunks: Vec<&str> = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect();
            chunks.join("\n")
        }
        _ => return None,
    };
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// OpenAI-compatible chat completions client (Groq by default).
pub struct ChatCompletionsClient {
    http: Client,
    config: ModelConfig,
    api_key: Option<String>,
}

impl ChatCompletionsClient {
    pub fn new(config: ModelConfig, api_key: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build model http client")?;
        Ok(Self {
            http,
            config,
            api_key,
        })
    }

    /// A missing key is only an error once a call is actually made, so cached
    /// answers keep working without one.
    pub fn from_env(config: ModelConfig) -> Result<Self> {
        Self::new(config, resolve_model_api_key())
    }

    fn endpoint(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/v1/chat/completions")
    }

    async fn complete(&self, system: &str, prompt: String, temperature: f64) -> Result<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(MailMindError::Auth(
                "model API key missing; set MAILMIND_MODEL_API_KEY, GROQ_API_KEY or AI_API_KEY"
                    .to_string(),
            )
            .into());
        };
        let payload = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt}
            ],
            "temperature": temperature,
            "max_tokens": self.config.max_tokens
        });

        log::info!("model call starts model={}", self.config.model);
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .context("model request failed to send")?;
        let status = response.status();
        let json: Value = response.json().await.unwrap_or(Value::Null);
        log::debug!("model raw response: {json}");
        if !status.is_success() {
            return Err(MailMindError::Fetch {
                service: "model",
                status: status.as_u16(),
            }
            .into());
        }
        extract_chat_completion_text(&json).ok_or_else(|| MailMindError::EmptyResponse("model").into())
    }
}

#[async_trait]
impl Summarizer for ChatCompletionsClient {
    async fn summarize(&self, body: &str) -> Result<String> {
        let raw = self
            .complete(
                SUMMARY_SYSTEM_PROMPT,
                build_summary_prompt(body),
                self.config.summary_temperature,
            )
            .await?;
        Ok(clean_output(OutputKind::Summary, &raw))
    }

    async fn draft_reply(&self, body: &str) -> Result<String> {
        let raw = self
            .complete(
                REPLY_SYSTEM_PROMPT,
                build_reply_prompt(body),
                self.config.reply_temperature,
            )
            .await?;
        Ok(clean_output(OutputKind::Reply, &raw))
    }
}
