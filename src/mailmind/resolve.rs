//! Cache resolution across the three key spaces.
//!
//! Lookup priority for an item is stable id hash (header id preferred over
//! provider id), then provider id guarded by content hash, then content hash.
//! Whatever map produces the hit, the maps behind it are backfilled so the
//! next lookup by any key converges on a hit.

use crate::mailmind::hasher::digest;
use crate::mailmind::store::{CacheStore, SummaryCaches, SummaryRecord};
use crate::mailmind::util::now_epoch_millis;
use anyhow::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StableLookup {
    pub summary: Option<String>,
    pub stable_id_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullLookup {
    pub summary: Option<String>,
    pub content_hash: String,
}

/// Which map answered a queue-time re-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecheckHit {
    StableId,
    ProviderId,
    Content,
}

#[derive(Debug, Clone)]
pub struct CacheResolver {
    store: CacheStore,
}

impl CacheResolver {
    pub fn new(store: CacheStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Read-only lookup of `digest(stable_id)`.
    pub async fn resolve_by_stable_id(&self, stable_id: &str) -> Result<StableLookup> {
        let stable_id_hash = digest(stable_id);
        let caches = self.store.load().await?;
        Ok(StableLookup {
            summary: caches.stable_summary(&stable_id_hash).map(str::to_string),
            stable_id_hash,
        })
    }

    pub async fn resolve_full(&self, provider_id: &str, body: &str) -> Result<FullLookup> {
        let content_hash = digest(body);
        let mut caches = self.store.load().await?;
        let (summary, changed) = resolve_full_in(&mut caches, provider_id, &content_hash);
        if changed {
            self.store.save(&caches).await?;
            log::info!("backfilled caches from content/provider hit message={provider_id}");
        }
        Ok(FullLookup {
            summary,
            content_hash,
        })
    }

    /// After a hit on a header-id hash, make the provider id, the body and
    /// `digest(provider_id)` resolve to the same summary.
    pub async fn backfill_stable_hit(
        &self,
        provider_id: &str,
        body: &str,
        summary: &str,
    ) -> Result<()> {
        let content_hash = digest(body);
        let mut caches = self.store.load().await?;
        let now = now_epoch_millis();
        let mut changed = caches.backfill_provider(provider_id, &content_hash, summary, now);
        changed |= caches.backfill_content(&content_hash, summary, Some(provider_id), now);
        changed |= caches.backfill_stable(&digest(provider_id), summary, Some(provider_id), now);
        if changed {
            self.store.save(&caches).await?;
            log::info!("backfilled caches from stable id hit message={provider_id}");
        }
        Ok(())
    }

    /// Persist a stable id hash that missed while a later map hit.
    pub async fn remember_stable_id(
        &self,
        stable_id_hash: &str,
        associated_id: Option<&str>,
        summary: &str,
    ) -> Result<()> {
        let mut caches = self.store.load().await?;
        if caches.backfill_stable(stable_id_hash, summary, associated_id, now_epoch_millis()) {
            self.store.save(&caches).await?;
        }
        Ok(())
    }

    /// Content-only backfill for a stable hit that carries no provider id.
    pub async fn remember_body(&self, body: &str, summary: &str) -> Result<()> {
        let mut caches = self.store.load().await?;
        if caches.backfill_content(&digest(body), summary, None, now_epoch_millis()) {
            self.store.save(&caches).await?;
        }
        Ok(())
    }

    /// Content hash lookup for requests that carry a body but maybe no id.
    /// A hit is backfilled under every id the request does carry.
    pub async fn resolve_body(
        &self,
        body: &str,
        provider_id: Option<&str>,
        stable_id_hash: Option<&str>,
    ) -> Result<FullLookup> {
        let content_hash = digest(body);
        let mut caches = self.store.load().await?;
        let Some(summary) = caches.content_summary(&content_hash).map(str::to_string) else {
            return Ok(FullLookup {
                summary: None,
                content_hash,
            });
        };
        let now = now_epoch_millis();
        let mut changed = false;
        if let Some(provider_id) = provider_id {
            changed |= caches.backfill_provider(provider_id, &content_hash, &summary, now);
            changed |= caches.backfill_stable(&digest(provider_id), &summary, Some(provider_id), now);
        }
        if let Some(hash) = stable_id_hash {
            changed |= caches.backfill_stable(hash, &summary, provider_id, now);
        }
        if changed {
            self.store.save(&caches).await?;
        }
        Ok(FullLookup {
            summary: Some(summary),
            content_hash,
        })
    }

    /// Queue-time re-check across all three maps: another path may have
    /// produced the summary while the entry waited.
    pub async fn recheck(
        &self,
        provider_id: &str,
        content_hash: &str,
        stable_id_hash: Option<&str>,
    ) -> Result<Option<(String, RecheckHit)>> {
        let mut caches = self.store.load().await?;
        let now = now_epoch_millis();
        let found = if let Some(summary) = stable_id_hash
            .and_then(|h| caches.stable_summary(h))
            .map(str::to_string)
        {
            Some((summary, RecheckHit::StableId))
        } else if let Some(summary) = caches.provider_summary(provider_id, content_hash) {
            Some((summary.to_string(), RecheckHit::ProviderId))
        } else {
            caches
                .content_summary(content_hash)
                .map(|s| (s.to_string(), RecheckHit::Content))
        };
        let Some((summary, source)) = found else {
            return Ok(None);
        };

        let mut changed = caches.backfill_provider(provider_id, content_hash, &summary, now);
        changed |= caches.backfill_content(content_hash, &summary, Some(provider_id), now);
        changed |= caches.backfill_stable(&digest(provider_id), &summary, Some(provider_id), now);
        if let Some(hash) = stable_id_hash {
            changed |= caches.backfill_stable(hash, &summary, Some(provider_id), now);
        }
        if changed {
            self.store.save(&caches).await?;
        }
        Ok(Some((summary, source)))
    }

    pub async fn record_summary(&self, record: &SummaryRecord) -> Result<()> {
        let mut caches = self.store.load().await?;
        caches.record(record, now_epoch_millis());
        self.store.save(&caches).await
    }
}

/// Provider id (content-consistent) then content hash, with backfill.
/// Returns the summary and whether `caches` changed.
pub fn resolve_full_in(
    caches: &mut SummaryCaches,
    provider_id: &str,
    content_hash: &str,
) -> (Option<String>, bool) {
    let now = now_epoch_millis();
    let provider_id_hash = digest(provider_id);

    if let Some(summary) = caches
        .provider_summary(provider_id, content_hash)
        .map(str::to_string)
    {
        let changed = caches.backfill_stable(&provider_id_hash, &summary, Some(provider_id), now);
        return (Some(summary), changed);
    }

    if let Some(summary) = caches.content_summary(content_hash).map(str::to_string) {
        let mut changed = caches.backfill_provider(provider_id, content_hash, &summary, now);
        changed |= caches.backfill_stable(&provider_id_hash, &summary, Some(provider_id), now);
        return (Some(summary), changed);
    }

    (None, false)
}

#[cfg(test)]
mod tests {
    use super::{CacheResolver, RecheckHit, resolve_full_in};
    use crate::mailmind::hasher::digest;
    use crate::mailmind::store::{CacheStore, SummaryCaches, SummaryRecord};
    use tempfile::{TempDir, tempdir};

    fn resolver() -> (TempDir, CacheResolver) {
        let tmp = tempdir().expect("tempdir");
        let store = CacheStore::new(tmp.path().join("state/summary_cache.json"));
        (tmp, CacheResolver::new(store))
    }

    const BODY: &str = "Hello world, meeting at 3pm.";

    #[tokio::test]
    async fn total_miss_reports_content_hash_of_body() {
        let (_tmp, resolver) = resolver();
        let got = resolver.resolve_full("m1", BODY).await.expect("resolve");
        assert!(got.summary.is_none());
        assert_eq!(got.content_hash, digest(BODY));
    }

    #[tokio::test]
    async fn resolving_twice_without_writes_is_idempotent() {
        let (_tmp, resolver) = resolver();
        let mut caches = SummaryCaches::default();
        caches.backfill_content(&digest(BODY), "Meeting at 3pm.", None, 1);
        resolver.store().save(&caches).await.expect("seed");

        let first = resolver.resolve_full("m1", BODY).await.expect("first");
        let second = resolver.resolve_full("m1", BODY).await.expect("second");
        assert_eq!(first, second);
        assert_eq!(first.summary.as_deref(), Some("Meeting at 3pm."));
    }

    #[tokio::test]
    async fn content_hit_backfills_provider_and_stable_maps() {
        let (_tmp, resolver) = resolver();
        let mut caches = SummaryCaches::default();
        caches.backfill_content(&digest(BODY), "S", None, 1);
        resolver.store().save(&caches).await.expect("seed");

        let got = resolver.resolve_full("m1", BODY).await.expect("resolve");
        assert_eq!(got.summary.as_deref(), Some("S"));

        let after = resolver.store().load().await.expect("load");
        assert_eq!(after.provider_summary("m1", &digest(BODY)), Some("S"));
        let stable = resolver.resolve_by_stable_id("m1").await.expect("stable");
        assert_eq!(stable.summary.as_deref(), Some("S"));
    }

    #[tokio::test]
    async fn header_hit_then_backfill_converges_for_provider_id() {
        let (_tmp, resolver) = resolver();
        let mut caches = SummaryCaches::default();
        caches.backfill_stable(&digest("<abc@mail>"), "S", None, 1);
        resolver.store().save(&caches).await.expect("seed");

        let stable = resolver
            .resolve_by_stable_id("<abc@mail>")
            .await
            .expect("stable");
        assert!(stable.summary.is_some());
        assert_eq!(stable.summary.as_deref(), Some("S"));
        assert!(
            !resolver.resolve_by_stable_id("m9").await.expect("by id").summary.is_some(),
            "stable lookup must not mutate state"
        );

        resolver
            .backfill_stable_hit("m9", BODY, "S")
            .await
            .expect("backfill");

        let after = resolver.store().load().await.expect("load");
        assert_eq!(after.provider_summary("m9", &digest(BODY)), Some("S"));
        assert_eq!(after.stable_summary(&digest("m9")), Some("S"));
        let full = resolver.resolve_full("m9", BODY).await.expect("full");
        assert_eq!(full.summary.as_deref(), Some("S"));
    }

    #[tokio::test]
    async fn changed_body_under_recycled_id_is_a_miss() {
        let (_tmp, resolver) = resolver();
        let mut caches = SummaryCaches::default();
        caches.backfill_provider("m1", &digest("old body"), "old", 1);
        resolver.store().save(&caches).await.expect("seed");

        let got = resolver.resolve_full("m1", "new body").await.expect("resolve");
        assert!(got.summary.is_none());
    }

    #[tokio::test]
    async fn recheck_prefers_stable_hash_and_backfills() {
        let (_tmp, resolver) = resolver();
        let header_hash = digest("<h@x>");
        let mut caches = SummaryCaches::default();
        caches.backfill_stable(&header_hash, "from header", None, 1);
        resolver.store().save(&caches).await.expect("seed");

        let got = resolver
            .recheck("m1", &digest(BODY), Some(&header_hash))
            .await
            .expect("recheck");
        assert_eq!(got, Some(("from header".to_string(), RecheckHit::StableId)));
        let after = resolver.store().load().await.expect("load");
        assert_eq!(after.provider_summary("m1", &digest(BODY)), Some("from header"));
        assert_eq!(after.content_summary(&digest(BODY)), Some("from header"));
    }

    #[tokio::test]
    async fn recheck_falls_back_to_content_hash() {
        let (_tmp, resolver) = resolver();
        let mut caches = SummaryCaches::default();
        caches.backfill_content(&digest(BODY), "from single", None, 1);
        resolver.store().save(&caches).await.expect("seed");

        let got = resolver
            .recheck("m1", &digest(BODY), None)
            .await
            .expect("recheck");
        assert_eq!(got, Some(("from single".to_string(), RecheckHit::Content)));
        let after = resolver.store().load().await.expect("load");
        assert_eq!(after.provider_summary("m1", &digest(BODY)), Some("from single"));
        assert_eq!(after.stable_summary(&digest("m1")), Some("from single"));
    }

    #[tokio::test]
    async fn recheck_misses_on_empty_caches() {
        let (_tmp, resolver) = resolver();
        let got = resolver
            .recheck("m1", &digest(BODY), None)
            .await
            .expect("recheck");
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn resolve_body_backfills_every_known_id() {
        let (_tmp, resolver) = resolver();
        let mut caches = SummaryCaches::default();
        caches.backfill_content(&digest(BODY), "S", None, 1);
        resolver.store().save(&caches).await.expect("seed");

        let header_hash = digest("<h@x>");
        let got = resolver
            .resolve_body(BODY, Some("m1"), Some(&header_hash))
            .await
            .expect("resolve");
        assert_eq!(got.summary.as_deref(), Some("S"));
        let after = resolver.store().load().await.expect("load");
        assert_eq!(after.stable_summary(&header_hash), Some("S"));
        assert_eq!(after.stable_summary(&digest("m1")), Some("S"));
        assert_eq!(after.provider_summary("m1", &digest(BODY)), Some("S"));
    }

    #[test]
    fn provider_hit_backfills_only_the_missing_stable_entry() {
        let mut caches = SummaryCaches::default();
        caches.record(
            &SummaryRecord {
                provider_id: Some("m1".to_string()),
                content_hash: digest(BODY),
                stable_id_hash: None,
                summary: "S".to_string(),
            },
            1,
        );
        let (summary, changed) = resolve_full_in(&mut caches, "m1", &digest(BODY));
        assert_eq!(summary.as_deref(), Some("S"));
        assert!(!changed, "every map already had the entry");

        caches.by_stable_id_hash.clear();
        let (_, changed) = resolve_full_in(&mut caches, "m1", &digest(BODY));
        assert!(changed);
        assert_eq!(caches.stable_summary(&digest("m1")), Some("S"));
    }
}
