//! In-memory collaborators for unit tests.

use crate::error::MailMindError;
use crate::mailmind::clean::{OutputKind, clean_output};
use crate::mailmind::gmail::MailProvider;
use crate::mailmind::llm::Summarizer;
use crate::mailmind::mime::{Header, MessagePart, PartBody, ProviderMessage, ProviderThread};
use crate::mailmind::protocol::{Destination, Envelope, Event, EventSink};
use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::Instant;

/// Answers every call with a scripted reply run through the real cleaner.
/// Bodies listed with `failing_on` fail like a 500 from the model.
#[derive(Debug, Default)]
pub struct FakeSummarizer {
    reply: String,
    failing_bodies: Vec<String>,
    summary_calls: AtomicUsize,
    reply_calls: AtomicUsize,
}

impl FakeSummarizer {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            ..Self::default()
        }
    }

    pub fn failing_on(mut self, body: &str) -> Self {
        self.failing_bodies.push(body.to_string());
        self
    }

    pub fn summary_calls(&self) -> usize {
        self.summary_calls.load(Ordering::SeqCst)
    }

    pub fn reply_calls(&self) -> usize {
        self.reply_calls.load(Ordering::SeqCst)
    }

    fn answer(&self, kind: OutputKind, body: &str) -> Result<String> {
        if self.failing_bodies.iter().any(|b| b == body) {
            return Err(MailMindError::Fetch {
                service: "model",
                status: 500,
            }
            .into());
        }
        Ok(clean_output(kind, &self.reply))
    }
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, body: &str) -> Result<String> {
        self.summary_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(OutputKind::Summary, body)
    }

    async fn draft_reply(&self, body: &str) -> Result<String> {
        self.reply_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(OutputKind::Reply, body)
    }
}

/// Messages and threads keyed by provider id; anything else is a 404.
#[derive(Debug, Default)]
pub struct FakeProvider {
    messages: HashMap<String, ProviderMessage>,
    threads: HashMap<String, ProviderThread>,
    today: Option<u64>,
    fetches: AtomicUsize,
}

impl FakeProvider {
    pub fn with_message(mut self, message: ProviderMessage) -> Self {
        self.messages.insert(message.id.clone(), message);
        self
    }

    pub fn with_thread(mut self, thread: ProviderThread) -> Self {
        self.threads.insert(thread.id.clone(), thread);
        self
    }

    pub fn with_today_count(mut self, count: u64) -> Self {
        self.today = Some(count);
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn not_found() -> anyhow::Error {
        MailMindError::Fetch {
            service: "provider",
            status: 404,
        }
        .into()
    }
}

#[async_trait]
impl MailProvider for FakeProvider {
    async fn fetch_message(&self, message_id: &str) -> Result<ProviderMessage> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.messages
            .get(message_id)
            .cloned()
            .ok_or_else(Self::not_found)
    }

    async fn fetch_thread(&self, thread_id: &str) -> Result<ProviderThread> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.threads
            .get(thread_id)
            .cloned()
            .ok_or_else(Self::not_found)
    }

    async fn count_today(&self) -> Result<u64> {
        self.today.ok_or_else(|| {
            MailMindError::Fetch {
                service: "provider",
                status: 503,
            }
            .into()
        })
    }
}

/// A plain-text message, optionally carrying a Message-Id header.
pub fn plain_message(id: &str, body: &str, header_id: Option<&str>) -> ProviderMessage {
    let headers = header_id
        .map(|value| {
            vec![Header {
                name: "Message-Id".to_string(),
                value: value.to_string(),
            }]
        })
        .unwrap_or_default();
    ProviderMessage {
        id: id.to_string(),
        payload: Some(MessagePart {
            mime_type: "text/plain".to_string(),
            headers,
            body: Some(PartBody {
                data: Some(URL_SAFE_NO_PAD.encode(body)),
            }),
            parts: Vec::new(),
        }),
    }
}

/// Keeps every envelope along with the (tokio) instant it was emitted.
#[derive(Debug, Default)]
pub struct RecordingSink {
    seen: Mutex<Vec<(Instant, Envelope)>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<Envelope> {
        self.seen
            .lock()
            .map(|seen| seen.iter().map(|(_, e)| e.clone()).collect())
            .unwrap_or_default()
    }

    pub fn instants(&self) -> Vec<Instant> {
        self.seen
            .lock()
            .map(|seen| seen.iter().map(|(at, _)| *at).collect())
            .unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, destination: &Destination, event: Event) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push((
                Instant::now(),
                Envelope {
                    destination: destination.clone(),
                    event,
                },
            ));
        }
    }
}
