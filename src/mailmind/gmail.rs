use crate::error::MailMindError;
use crate::mailmind::auth::TokenSource;
use crate::mailmind::config::ProviderConfig;
use crate::mailmind::mime::{ProviderMessage, ProviderThread};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Days, Local, NaiveDate};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

const LIST_PAGE_SIZE: &str = "500";

/// The mail backend, seen only through the three calls the service needs.
#[async_trait]
pub trait MailProvider: Send + Sync {
    async fn fetch_message(&self, message_id: &str) -> Result<ProviderMessage>;
    async fn fetch_thread(&self, thread_id: &str) -> Result<ProviderThread>;
    async fn count_today(&self) -> Result<u64>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListPage {
    messages: Vec<Value>,
    next_page_token: Option<String>,
}

fn fmt_day(day: NaiveDate) -> String {
    day.format("%Y/%m/%d").to_string()
}

/// Search query for messages received on `today` (local calendar day).
pub fn today_query(today: NaiveDate) -> String {
    let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
    format!("after:{} before:{}", fmt_day(today), fmt_day(tomorrow))
}

pub struct GmailClient {
    http: Client,
    api_base: String,
    tokens: TokenSource,
}

impl GmailClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let http = Client::builder()
            .build()
            .context("failed to build provider http client")?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            tokens: TokenSource::new(
                config.token_command.clone(),
                config.token_command_timeout_secs,
            ),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Response> {
        let token = self.tokens.token().await?;
        let response = self
            .http
            .get(format!("{}{}", self.api_base, path))
            .bearer_auth(&token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("provider request to {path} failed to send"))?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate(&token);
        }
        Ok(response)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let response = self.get(path, query).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MailMindError::Fetch {
                service: "provider",
                status: status.as_u16(),
            }
            .into());
        }
        response
            .json::<T>()
            .await
            .with_context(|| format!("provider response for {path} is not valid json"))
    }
}

fn encode_path_segment(raw: &str) -> String {
    raw.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}

#[async_trait]
impl MailProvider for GmailClient {
    async fn fetch_message(&self, message_id: &str) -> Result<ProviderMessage> {
        log::info!("provider fetch starts message={message_id}");
        let path = format!("/messages/{}", encode_path_segment(message_id));
        let message: ProviderMessage = self.get_json(&path, &[("format", "full")]).await?;
        log::info!("provider fetch done message={message_id}");
        Ok(message)
    }

    async fn fetch_thread(&self, thread_id: &str) -> Result<ProviderThread> {
        log::info!("provider fetch starts thread={thread_id}");
        let path = format!("/threads/{}", encode_path_segment(thread_id));
        let thread: ProviderThread = self.get_json(&path, &[("format", "full")]).await?;
        log::info!(
            "provider fetch done thread={thread_id} messages={}",
            thread.messages.len()
        );
        Ok(thread)
    }

    async fn count_today(&self) -> Result<u64> {
        let q = today_query(Local::now().date_naive());
        let mut count = 0u64;
        let mut page_token: Option<String> = None;
        loop {
            let page: ListPage = {
                let mut query = vec![
                    ("q", q.as_str()),
                    ("includeSpamTrash", "false"),
                    ("maxResults", LIST_PAGE_SIZE),
                ];
                if let Some(token) = page_token.as_deref() {
                    query.push(("pageToken", token));
                }
                self.get_json("/messages", &query).await?
            };
            count += page.messages.len() as u64;
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }
        Ok(count)
    }
}
