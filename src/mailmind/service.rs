//! Request coordinator: turns inbound requests into cache lookups, queue
//! entries and direct model calls, and reports every outcome to the sink.

use crate::error::MailMindError;
use crate::mailmind::audit::AuditLog;
use crate::mailmind::gmail::MailProvider;
use crate::mailmind::hasher::digest;
use crate::mailmind::llm::Summarizer;
use crate::mailmind::mime::{ProviderMessage, extract_plain_text, header_message_id};
use crate::mailmind::protocol::{
    Destination, Event, EventSink, ItemRef, Mode, RawItem, Request, SummarySource,
};
use crate::mailmind::queue::{Scheduler, WorkItem};
use crate::mailmind::resolve::CacheResolver;
use crate::mailmind::store::SummaryRecord;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of the multi path for one item, short of the model call.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ItemOutcome {
    Hit {
        message_id: String,
        summary: String,
        source: SummarySource,
    },
    Queued,
    AlreadyQueued,
}

pub struct MailMindService {
    provider: Arc<dyn MailProvider>,
    summarizer: Arc<dyn Summarizer>,
    sink: Arc<dyn EventSink>,
    resolver: CacheResolver,
    scheduler: Arc<Scheduler>,
    audit: AuditLog,
}

impl MailMindService {
    pub fn new(
        provider: Arc<dyn MailProvider>,
        summarizer: Arc<dyn Summarizer>,
        sink: Arc<dyn EventSink>,
        resolver: CacheResolver,
        pacing: Duration,
        audit: AuditLog,
    ) -> Self {
        let scheduler = Arc::new(Scheduler::new(
            pacing,
            resolver.clone(),
            Arc::clone(&summarizer),
            Arc::clone(&sink),
            audit.clone(),
        ));
        Self {
            provider,
            summarizer,
            sink,
            resolver,
            scheduler,
            audit,
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    pub async fn dispatch(&self, request: Request) {
        match request {
            Request::MultiSummarize { items, destination } => {
                self.handle_multi(&items, &destination).await
            }
            Request::SingleSummarize {
                body,
                provider_id,
                header_id,
                destination,
            } => {
                self.handle_single(
                    &body,
                    provider_id.as_deref(),
                    header_id.as_deref(),
                    &destination,
                )
                .await
            }
            Request::SingleReply { body, destination } => {
                self.handle_reply(&body, &destination).await
            }
            Request::TodayCount { destination } => self.handle_today_count(&destination).await,
        }
    }

    /// Per-item resolution; misses are queued and the drain is kicked once the
    /// batch is resolved. Item failures are reported individually and never
    /// stop the batch.
    pub async fn handle_multi(&self, items: &[RawItem], destination: &Destination) {
        log::info!("multi summarize request items={}", items.len());
        let mut queued_any = false;
        for raw in items {
            let item = match raw.parse() {
                Ok(item) => item,
                Err(err) => {
                    log::warn!("{err}");
                    self.sink.emit(
                        destination,
                        Event::SummaryError {
                            message_id: raw.id.clone(),
                            error: err.to_string(),
                        },
                    );
                    continue;
                }
            };
            let item_id = match &item {
                ItemRef::Message(id) | ItemRef::Thread(id) => id.clone(),
            };
            match self.resolve_item(&item, destination).await {
                Ok(ItemOutcome::Hit {
                    message_id,
                    summary,
                    source,
                }) => self.sink.emit(
                    destination,
                    Event::SummaryResult {
                        message_id,
                        summary,
                        source,
                    },
                ),
                Ok(ItemOutcome::Queued) => queued_any = true,
                Ok(ItemOutcome::AlreadyQueued) => {}
                Err(err) => {
                    log::warn!("item {item_id} failed: {err:#}");
                    self.sink.emit(
                        destination,
                        Event::SummaryError {
                            message_id: Some(item_id),
                            error: format!("{err:#}"),
                        },
                    );
                }
            }
        }
        if queued_any {
            self.scheduler.kick();
        }
    }

    async fn resolve_item(&self, item: &ItemRef, destination: &Destination) -> Result<ItemOutcome> {
        let message = match item {
            ItemRef::Message(id) => {
                if self.scheduler.is_enqueued(&WorkItem::dedup_key(id)) {
                    log::info!("message {id} already queued");
                    return Ok(ItemOutcome::AlreadyQueued);
                }
                // Provider id hash is known before any fetch.
                let early = self.resolver.resolve_by_stable_id(id).await?;
                if let Some(summary) = early.summary {
                    log::info!("cache hit by provider id hash message={id}");
                    return Ok(ItemOutcome::Hit {
                        message_id: id.clone(),
                        summary,
                        source: SummarySource::CacheId,
                    });
                }
                self.provider.fetch_message(id).await?
            }
            ItemRef::Thread(id) => self.last_message_of_thread(id).await?,
        };
        self.resolve_fetched(&message, item, destination).await
    }

    async fn last_message_of_thread(&self, thread_id: &str) -> Result<ProviderMessage> {
        let thread = self.provider.fetch_thread(thread_id).await?;
        let resolved_thread = if thread.id.is_empty() {
            thread_id.to_string()
        } else {
            thread.id
        };
        let last = thread.messages.into_iter().last().ok_or_else(|| {
            MailMindError::MalformedItem(format!("thread {resolved_thread} has no messages"))
        })?;
        log::info!("thread {resolved_thread} resolved to message {}", last.id);
        Ok(last)
    }

    async fn resolve_fetched(
        &self,
        message: &ProviderMessage,
        item: &ItemRef,
        destination: &Destination,
    ) -> Result<ItemOutcome> {
        let provider_id = match item {
            _ if !message.id.is_empty() => message.id.clone(),
            ItemRef::Message(id) | ItemRef::Thread(id) => id.clone(),
        };
        if matches!(item, ItemRef::Thread(_))
            && self.scheduler.is_enqueued(&WorkItem::dedup_key(&provider_id))
        {
            log::info!("message {provider_id} already queued");
            return Ok(ItemOutcome::AlreadyQueued);
        }

        let body = extract_plain_text(message);
        if body.is_empty() {
            return Err(MailMindError::EmptyResponse("provider message").into());
        }

        let stable_id = header_message_id(message).unwrap_or_else(|| provider_id.clone());
        let stable = self.resolver.resolve_by_stable_id(&stable_id).await?;
        if let Some(summary) = stable.summary {
            log::info!("cache hit by stable id message={provider_id}");
            self.resolver
                .backfill_stable_hit(&provider_id, &body, &summary)
                .await?;
            return Ok(ItemOutcome::Hit {
                message_id: provider_id,
                summary,
                source: SummarySource::CacheId,
            });
        }

        let full = self.resolver.resolve_full(&provider_id, &body).await?;
        if let Some(summary) = full.summary {
            log::info!("cache hit by provider id or content message={provider_id}");
            self.resolver
                .remember_stable_id(&stable.stable_id_hash, Some(&provider_id), &summary)
                .await?;
            return Ok(ItemOutcome::Hit {
                message_id: provider_id,
                summary,
                source: SummarySource::Cache,
            });
        }

        let queued = self.scheduler.enqueue(WorkItem::new(
            &provider_id,
            full.content_hash,
            body,
            Some(stable.stable_id_hash),
            destination.clone(),
        ));
        Ok(if queued {
            ItemOutcome::Queued
        } else {
            ItemOutcome::AlreadyQueued
        })
    }

    /// Direct summary of a body the caller already has. Not queued, not paced.
    pub async fn handle_single(
        &self,
        body: &str,
        provider_id: Option<&str>,
        header_id: Option<&str>,
        destination: &Destination,
    ) {
        let event = match self.single_summary(body, provider_id, header_id).await {
            Ok((summary, source)) => Event::SingleResult {
                mode: Mode::Summary,
                summary,
                source: Some(source),
            },
            Err(err) => {
                log::warn!("single summarize failed: {err:#}");
                Event::SingleError {
                    mode: Mode::Summary,
                    error: format!("{err:#}"),
                }
            }
        };
        self.sink.emit(destination, event);
    }

    async fn single_summary(
        &self,
        body: &str,
        provider_id: Option<&str>,
        header_id: Option<&str>,
    ) -> Result<(String, SummarySource)> {
        let body = body.trim();
        if body.is_empty() {
            return Err(MailMindError::MalformedItem("request has no body".to_string()).into());
        }
        let provider_id = provider_id.map(str::trim).filter(|id| !id.is_empty());
        let header_id = header_id.map(str::trim).filter(|id| !id.is_empty());

        let mut stable_id_hash = None;
        if let Some(stable_id) = header_id.or(provider_id) {
            let stable = self.resolver.resolve_by_stable_id(stable_id).await?;
            if let Some(summary) = stable.summary {
                match provider_id {
                    Some(id) => self.resolver.backfill_stable_hit(id, body, &summary).await?,
                    None => self.resolver.remember_body(body, &summary).await?,
                }
                return Ok((summary, SummarySource::CacheId));
            }
            stable_id_hash = Some(stable.stable_id_hash);
        }

        let by_body = self
            .resolver
            .resolve_body(body, provider_id, stable_id_hash.as_deref())
            .await?;
        if let Some(summary) = by_body.summary {
            return Ok((summary, SummarySource::CacheBody));
        }

        let summary = match self.summarizer.summarize(body).await {
            Ok(summary) => {
                self.audit.record("summarize", "ok", "single");
                summary
            }
            Err(err) => {
                self.audit
                    .record("summarize", "error", &format!("single error={err:#}"));
                return Err(err);
            }
        };
        let record = SummaryRecord {
            provider_id: provider_id.map(str::to_string),
            content_hash: by_body.content_hash,
            stable_id_hash: header_id.map(digest),
            summary: summary.clone(),
        };
        if let Err(err) = self.resolver.record_summary(&record).await {
            log::warn!("summary not cached: {err:#}");
        }
        Ok((summary, SummarySource::Model))
    }

    pub async fn handle_reply(&self, body: &str, destination: &Destination) {
        let event = match self.draft_reply(body).await {
            Ok(reply) => Event::SingleResult {
                mode: Mode::Reply,
                summary: reply,
                source: None,
            },
            Err(err) => {
                log::warn!("reply draft failed: {err:#}");
                Event::SingleError {
                    mode: Mode::Reply,
                    error: format!("{err:#}"),
                }
            }
        };
        self.sink.emit(destination, event);
    }

    async fn draft_reply(&self, body: &str) -> Result<String> {
        let body = body.trim();
        if body.is_empty() {
            return Err(MailMindError::MalformedItem("request has no body".to_string()).into());
        }
        let result = self.summarizer.draft_reply(body).await;
        match &result {
            Ok(_) => self.audit.record("reply", "ok", "single"),
            Err(err) => self
                .audit
                .record("reply", "error", &format!("single error={err:#}")),
        }
        result
    }

    pub async fn handle_today_count(&self, destination: &Destination) {
        let event = match self.provider.count_today().await {
            Ok(count) => Event::TodayCount { count },
            Err(err) => {
                log::warn!("today count failed: {err:#}");
                Event::TodayCountError {
                    error: format!("{err:#}"),
                }
            }
        };
        self.sink.emit(destination, event);
    }
}
