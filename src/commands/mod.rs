pub mod digest;
pub mod reply;
pub mod serve;
pub mod status;
pub mod summarize;
pub mod today_count;

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::mailmind::audit::AuditLog;
use crate::mailmind::config::MailMindConfig;
use crate::mailmind::gmail::GmailClient;
use crate::mailmind::llm::ChatCompletionsClient;
use crate::mailmind::paths::MailMindPaths;
use crate::mailmind::protocol::{ChannelSink, Envelope, Event, SummarySource};
use crate::mailmind::resolve::CacheResolver;
use crate::mailmind::service::MailMindService;
use crate::mailmind::store::CacheStore;
use crate::mailmind::util::truncate_with_ellipsis;

const SUMMARY_PREVIEW_CHARS: usize = 240;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    /// One detail or issue line per emitted event.
    pub fn record_event(&mut self, envelope: &Envelope) {
        match &envelope.event {
            Event::SummaryResult {
                message_id,
                summary,
                source,
            } => self.detail(format!(
                "summary message={message_id} source={} text={}",
                source_label(*source),
                truncate_with_ellipsis(summary, SUMMARY_PREVIEW_CHARS)
            )),
            Event::SummaryError { message_id, error } => self.issue(format!(
                "summary message={} error={error}",
                message_id.as_deref().unwrap_or("-")
            )),
            Event::SingleResult {
                summary, source, ..
            } => {
                if let Some(source) = source {
                    self.detail(format!("source={}", source_label(*source)));
                }
                self.detail(summary.clone());
            }
            Event::SingleError { error, .. }
            | Event::TodayCountError { error }
            | Event::RequestError { error } => self.issue(error.clone()),
            Event::TodayCount { count } => self.detail(format!("today_count={count}")),
        }
    }
}

fn source_label(source: SummarySource) -> String {
    serde_json::to_value(source)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Request handlers and the drain interleave on one thread.
pub fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

/// Wire the real collaborators to a channel sink.
pub fn build_service(
    paths: &MailMindPaths,
    config: &MailMindConfig,
) -> Result<(Arc<MailMindService>, UnboundedReceiver<Envelope>)> {
    let provider = Arc::new(GmailClient::new(&config.provider)?);
    let summarizer = Arc::new(ChatCompletionsClient::from_env(config.model.clone())?);
    let (sink, rx) = ChannelSink::new();
    let service = MailMindService::new(
        provider,
        summarizer,
        Arc::new(sink),
        CacheResolver::new(CacheStore::for_paths(paths)),
        Duration::from_millis(config.queue.pacing_ms),
        AuditLog::new(paths.clone()),
    );
    Ok((Arc::new(service), rx))
}

/// Body text from a file, or stdin when no file is given.
pub fn read_body(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut body = String::new();
            std::io::stdin()
                .read_to_string(&mut body)
                .context("failed to read body from stdin")?;
            Ok(body)
        }
    }
}
