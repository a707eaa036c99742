use crate::mailmind::audit::AuditLog;
use crate::mailmind::llm::Summarizer;
use crate::mailmind::protocol::{Destination, Event, EventSink, SummarySource};
use crate::mailmind::resolve::{CacheResolver, RecheckHit};
use crate::mailmind::store::SummaryRecord;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// A cache miss waiting for a model call.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub key: String,
    pub provider_id: String,
    pub content_hash: String,
    pub body_text: String,
    pub stable_id_hash: Option<String>,
    pub destination: Destination,
}

impl WorkItem {
    pub fn dedup_key(provider_id: &str) -> String {
        format!("message:{provider_id}")
    }

    pub fn new(
        provider_id: &str,
        content_hash: String,
        body_text: String,
        stable_id_hash: Option<String>,
        destination: Destination,
    ) -> Self {
        Self {
            key: Self::dedup_key(provider_id),
            provider_id: provider_id.to_string(),
            content_hash,
            body_text,
            stable_id_hash,
            destination,
        }
    }
}

/// FIFO of pending items plus the set of keys currently in it.
///
/// A key leaves the set when its item is popped, not when processing ends.
#[derive(Debug, Default)]
pub struct WorkQueue {
    entries: VecDeque<WorkItem>,
    enqueued: HashSet<String>,
}

impl WorkQueue {
    pub fn enqueue(&mut self, item: WorkItem) -> bool {
        if !self.enqueued.insert(item.key.clone()) {
            return false;
        }
        self.entries.push_back(item);
        true
    }

    pub fn pop(&mut self) -> Option<WorkItem> {
        let item = self.entries.pop_front()?;
        self.enqueued.remove(&item.key);
        Some(item)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.enqueued.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Default)]
struct SchedulerState {
    queue: WorkQueue,
    draining: bool,
}

/// Owns the work queue and the single-flight drain.
///
/// The state lock is only ever held for synchronous bookkeeping, never across
/// an await, so the drain and request handlers interleave freely.
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    pacing: Duration,
    resolver: CacheResolver,
    summarizer: Arc<dyn Summarizer>,
    sink: Arc<dyn EventSink>,
    audit: AuditLog,
    idle: Notify,
}

impl Scheduler {
    pub fn new(
        pacing: Duration,
        resolver: CacheResolver,
        summarizer: Arc<dyn Summarizer>,
        sink: Arc<dyn EventSink>,
        audit: AuditLog,
    ) -> Self {
        Self {
            state: Mutex::new(SchedulerState::default()),
            pacing,
            resolver,
            summarizer,
            sink,
            audit,
            idle: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn enqueue(&self, item: WorkItem) -> bool {
        let mut state = self.state();
        let key = item.key.clone();
        let added = state.queue.enqueue(item);
        if added {
            log::info!("queue add key={key} size={}", state.queue.len());
        } else {
            log::info!("queue duplicate prevented key={key}");
        }
        added
    }

    pub fn is_enqueued(&self, key: &str) -> bool {
        self.state().queue.contains(key)
    }

    pub fn queue_len(&self) -> usize {
        self.state().queue.len()
    }

    #[cfg(test)]
    pub fn is_draining(&self) -> bool {
        self.state().draining
    }

    /// Start a drain unless one is already running or there is nothing to do.
    /// The handle is returned for callers that want to wait on completion.
    pub fn kick(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        {
            let mut state = self.state();
            if state.draining || state.queue.is_empty() {
                return None;
            }
            state.draining = true;
            log::info!("queue drain started size={}", state.queue.len());
        }
        let scheduler = Arc::clone(self);
        Some(tokio::spawn(async move { scheduler.drain().await }))
    }

    /// Resolves once no drain is active.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            // Same guard `drain` clears the flag under before notifying.
            let draining = self.state().draining;
            if !draining {
                return;
            }
            notified.await;
        }
    }

    async fn drain(self: Arc<Self>) {
        loop {
            // Empty check and flag reset share one critical section, so an
            // enqueue racing the end of a drain sees `draining == false`.
            let item = {
                let mut state = self.state();
                match state.queue.pop() {
                    Some(item) => {
                        log::info!(
                            "queue processing key={} remaining={}",
                            item.key,
                            state.queue.len()
                        );
                        Some(item)
                    }
                    None => {
                        state.draining = false;
                        None
                    }
                }
            };
            let Some(item) = item else {
                log::info!("queue drain ended");
                self.idle.notify_waiters();
                return;
            };

            self.process(&item).await;
            tokio::time::sleep(self.pacing).await;
        }
    }

    async fn process(&self, item: &WorkItem) {
        match self
            .resolver
            .recheck(
                &item.provider_id,
                &item.content_hash,
                item.stable_id_hash.as_deref(),
            )
            .await
        {
            Ok(Some((summary, hit))) => {
                let source = match hit {
                    RecheckHit::StableId => SummarySource::CacheId,
                    RecheckHit::ProviderId | RecheckHit::Content => SummarySource::Cache,
                };
                log::info!(
                    "cache hit during processing message={} source={source:?}",
                    item.provider_id
                );
                self.emit_result(item, summary, source);
                return;
            }
            Ok(None) => {}
            Err(err) => {
                self.emit_error(item, format!("{err:#}"));
                return;
            }
        }

        match self.summarize_and_store(item).await {
            Ok(summary) => {
                log::info!(
                    "summary stored message={} chars={}",
                    item.provider_id,
                    summary.chars().count()
                );
                self.emit_result(item, summary, SummarySource::Model);
            }
            Err(err) => {
                let text = format!("{err:#}");
                log::warn!("queue item failed key={} error={text}", item.key);
                self.emit_error(item, text);
            }
        }
    }

    async fn summarize_and_store(&self, item: &WorkItem) -> anyhow::Result<String> {
        let summary = match self.summarizer.summarize(&item.body_text).await {
            Ok(summary) => {
                self.audit
                    .record("summarize", "ok", &format!("message={}", item.provider_id));
                summary
            }
            Err(err) => {
                self.audit.record(
                    "summarize",
                    "error",
                    &format!("message={} error={err:#}", item.provider_id),
                );
                return Err(err);
            }
        };
        self.resolver
            .record_summary(&SummaryRecord {
                provider_id: Some(item.provider_id.clone()),
                content_hash: item.content_hash.clone(),
                stable_id_hash: item.stable_id_hash.clone(),
                summary: summary.clone(),
            })
            .await?;
        Ok(summary)
    }

    fn emit_result(&self, item: &WorkItem, summary: String, source: SummarySource) {
        self.sink.emit(
            &item.destination,
            Event::SummaryResult {
                message_id: item.provider_id.clone(),
                summary,
                source,
            },
        );
    }

    fn emit_error(&self, item: &WorkItem, error: String) {
        self.sink.emit(
            &item.destination,
            Event::SummaryError {
                message_id: Some(item.provider_id.clone()),
                error,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{Scheduler, WorkItem, WorkQueue};
    use crate::mailmind::audit::AuditLog;
    use crate::mailmind::hasher::digest;
    use crate::mailmind::protocol::{Destination, Event, SummarySource};
    use crate::mailmind::resolve::CacheResolver;
    use crate::mailmind::store::{CacheStore, SummaryCaches};
    use crate::mailmind::test_support::{FakeSummarizer, RecordingSink};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    const PACING: Duration = Duration::from_millis(1800);

    fn item(provider_id: &str, body: &str) -> WorkItem {
        WorkItem::new(
            provider_id,
            digest(body),
            body.to_string(),
            None,
            Destination::named("tab"),
        )
    }

    fn scheduler(
        summarizer: Arc<FakeSummarizer>,
    ) -> (TempDir, Arc<Scheduler>, Arc<RecordingSink>, CacheResolver) {
        let tmp = tempdir().expect("tempdir");
        let resolver = CacheResolver::new(CacheStore::new(tmp.path().join("cache.json")));
        let sink = Arc::new(RecordingSink::default());
        let scheduler = Arc::new(Scheduler::new(
            PACING,
            resolver.clone(),
            summarizer,
            sink.clone(),
            AuditLog::disabled(),
        ));
        (tmp, scheduler, sink, resolver)
    }

    #[test]
    fn work_queue_is_fifo_and_dedups_by_key() {
        let mut queue = WorkQueue::default();
        assert!(queue.enqueue(item("m1", "a")));
        assert!(queue.enqueue(item("m2", "b")));
        assert!(!queue.enqueue(item("m1", "a again")));
        assert_eq!(queue.len(), 2);
        assert!(queue.contains("message:m1"));

        assert_eq!(queue.pop().expect("first").provider_id, "m1");
        assert!(!queue.contains("message:m1"), "key leaves the set on pop");
        assert!(queue.enqueue(item("m1", "a")), "re-enqueue allowed after pop");
        assert_eq!(queue.pop().expect("second").provider_id, "m2");
        assert_eq!(queue.pop().expect("third").provider_id, "m1");
        assert!(queue.pop().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_enqueue_before_drain_yields_one_model_call() {
        let summarizer = Arc::new(FakeSummarizer::replying("Here is a summary: Meeting at 3pm."));
        let (_tmp, scheduler, sink, resolver) = scheduler(summarizer.clone());

        assert!(scheduler.enqueue(item("m1", "Hello world, meeting at 3pm.")));
        assert!(!scheduler.enqueue(item("m1", "Hello world, meeting at 3pm.")));
        assert_eq!(scheduler.queue_len(), 1);

        scheduler.kick().expect("drain starts").await.expect("join");
        assert_eq!(summarizer.summary_calls(), 1);
        assert!(!scheduler.is_draining());

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].event,
            Event::SummaryResult {
                message_id: "m1".to_string(),
                summary: "Meeting at 3pm.".to_string(),
                source: SummarySource::Model,
            }
        );

        let full = resolver
            .resolve_full("m1", "Hello world, meeting at 3pm.")
            .await
            .expect("resolve");
        assert_eq!(full.summary.as_deref(), Some("Meeting at 3pm."));
    }

    #[tokio::test(start_paused = true)]
    async fn completions_are_spaced_by_the_pacing_interval() {
        let summarizer = Arc::new(FakeSummarizer::replying("S"));
        let (_tmp, scheduler, sink, _resolver) = scheduler(summarizer);
        for (id, body) in [("m1", "one"), ("m2", "two"), ("m3", "three")] {
            scheduler.enqueue(item(id, body));
        }

        scheduler.kick().expect("drain").await.expect("join");

        let stamps = sink.instants();
        assert_eq!(stamps.len(), 3);
        for pair in stamps.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= PACING);
        }
        let order: Vec<String> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e.event {
                Event::SummaryResult { message_id, .. } => Some(message_id),
                _ => None,
            })
            .collect();
        assert_eq!(order, ["m1", "m2", "m3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn one_failure_does_not_stop_the_drain() {
        let summarizer = Arc::new(FakeSummarizer::replying("ok").failing_on("boom"));
        let (_tmp, scheduler, sink, _resolver) = scheduler(summarizer.clone());
        scheduler.enqueue(item("m1", "boom"));
        scheduler.enqueue(item("m2", "fine"));

        scheduler.kick().expect("drain").await.expect("join");

        let events = sink.events();
        assert_eq!(events.len(), 2);
        match &events[0].event {
            Event::SummaryError { message_id, error } => {
                assert_eq!(message_id.as_deref(), Some("m1"));
                assert!(error.contains("status 500"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            &events[1].event,
            Event::SummaryResult { message_id, .. } if message_id == "m2"
        ));
        assert_eq!(summarizer.summary_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn recheck_hit_skips_model_and_reports_cache_id() {
        let summarizer = Arc::new(FakeSummarizer::replying("never"));
        let (_tmp, scheduler, sink, resolver) = scheduler(summarizer.clone());
        let header_hash = digest("<h@x>");
        let mut caches = SummaryCaches::default();
        caches.backfill_stable(&header_hash, "already", None, 1);
        resolver.store().save(&caches).await.expect("seed");

        let mut queued = item("m1", "body");
        queued.stable_id_hash = Some(header_hash);
        scheduler.enqueue(queued);
        scheduler.kick().expect("drain").await.expect("join");

        assert_eq!(summarizer.summary_calls(), 0);
        assert_eq!(
            sink.events()[0].event,
            Event::SummaryResult {
                message_id: "m1".to_string(),
                summary: "already".to_string(),
                source: SummarySource::CacheId,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn content_entry_written_while_queued_skips_model() {
        let summarizer = Arc::new(FakeSummarizer::replying("model"));
        let (_tmp, scheduler, sink, resolver) = scheduler(summarizer.clone());
        scheduler.enqueue(item("m1", "same body"));

        let mut caches = SummaryCaches::default();
        caches.backfill_content(&digest("same body"), "from single", None, 1);
        resolver.store().save(&caches).await.expect("seed");

        scheduler.kick().expect("drain").await.expect("join");

        assert_eq!(summarizer.summary_calls(), 0);
        assert_eq!(
            sink.events()[0].event,
            Event::SummaryResult {
                message_id: "m1".to_string(),
                summary: "from single".to_string(),
                source: SummarySource::Cache,
            }
        );
        let after = resolver.store().load().await.expect("load");
        assert_eq!(after.content_summary(&digest("same body")), Some("from single"));
    }

    #[tokio::test(start_paused = true)]
    async fn kick_is_single_flight_and_restartable() {
        let summarizer = Arc::new(FakeSummarizer::replying("S"));
        let (_tmp, scheduler, sink, _resolver) = scheduler(summarizer);
        assert!(scheduler.kick().is_none(), "nothing queued");

        scheduler.enqueue(item("m1", "one"));
        let handle = scheduler.kick().expect("first drain");
        scheduler.enqueue(item("m2", "two"));
        assert!(scheduler.kick().is_none(), "drain already active");
        handle.await.expect("join");
        assert_eq!(sink.events().len(), 2, "item added mid-drain is picked up");

        scheduler.enqueue(item("m3", "three"));
        scheduler.kick().expect("fresh drain").await.expect("join");
        assert_eq!(sink.events().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_idle_covers_items_added_mid_drain() {
        let summarizer = Arc::new(FakeSummarizer::replying("S"));
        let (_tmp, scheduler, sink, _resolver) = scheduler(summarizer);
        scheduler.enqueue(item("m1", "one"));
        let _detached = scheduler.kick();

        let late = Arc::clone(&scheduler);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            late.enqueue(item("m2", "two"));
        });

        scheduler.wait_idle().await;
        assert_eq!(sink.events().len(), 2);
        assert_eq!(scheduler.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_idle_returns_after_drain_finishes() {
        let summarizer = Arc::new(FakeSummarizer::replying("S"));
        let (_tmp, scheduler, sink, _resolver) = scheduler(summarizer);
        scheduler.wait_idle().await;

        scheduler.enqueue(item("m1", "one"));
        scheduler.enqueue(item("m2", "two"));
        let _detached = scheduler.kick();
        scheduler.wait_idle().await;
        assert!(!scheduler.is_draining());
        assert_eq!(scheduler.queue_len(), 0);
        assert_eq!(sink.events().len(), 2);
    }
}
