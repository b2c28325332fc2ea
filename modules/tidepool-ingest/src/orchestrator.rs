//! The phased ingest pipeline. Prepare reads the store to decide reuse, tag
//! and embed fan out across entries (embedding as one batch call), persist
//! runs sequentially so series/category transactions stay simple. A failing
//! entry is counted as skipped and never takes the run down with it.

use std::ops::AddAssign;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{info, warn};

use tidepool_common::slug::filter_tags;
use tidepool_common::types::{CanonicalEvent, Classification, TagCandidate, PROPOSAL_TAG_CAP};
use tidepool_common::Window;
use tidepool_store::{
    AttachContext, EventStore, ProposalStore, SaveOutcome, SeriesStore,
};

use crate::adapter::{FetchWindow, NormalizedEvent, SourceAdapter};
use crate::categorizer::CategoryAssigner;
use crate::classifier::{enriched_text, ClassifierGateway};

/// Aggregated results of one ingest run (or one chunk of one).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct IngestStats {
    pub fetched: u32,
    pub created: u32,
    pub updated: u32,
    pub skipped: u32,
}

impl AddAssign for IngestStats {
    fn add_assign(&mut self, other: Self) {
        self.fetched += other.fetched;
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
    }
}

impl std::fmt::Display for IngestStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Ingest Run Complete ===")?;
        writeln!(f, "Fetched: {}", self.fetched)?;
        writeln!(f, "Created: {}", self.created)?;
        writeln!(f, "Updated: {}", self.updated)?;
        write!(f, "Skipped: {}", self.skipped)
    }
}

/// Everything the pipeline writes through.
pub struct IngestDeps {
    pub events: EventStore,
    pub series: SeriesStore,
    pub proposals: ProposalStore,
    pub gateway: ClassifierGateway,
    pub assigner: CategoryAssigner,
}

/// One event carried across the phases.
struct PreparedEvent {
    normalized: NormalizedEvent,
    existing: Option<CanonicalEvent>,
    reuse: bool,
    candidates: Vec<TagCandidate>,
    tags: Vec<String>,
    vector: Option<Vec<f32>>,
}

pub struct Ingestor {
    deps: IngestDeps,
}

impl Ingestor {
    pub fn new(deps: IngestDeps) -> Self {
        Self { deps }
    }

    /// Run the full pipeline for one adapter over one window.
    pub async fn run(
        &self,
        adapter: &dyn SourceAdapter,
        window: &FetchWindow,
        force_refresh: bool,
        now: DateTime<Utc>,
    ) -> Result<IngestStats> {
        let payloads = adapter.fetch_raw_events(window).await?;
        let mut stats = IngestStats {
            fetched: payloads.len() as u32,
            ..Default::default()
        };

        // Phase 0, prepare: normalize, load existing, decide reuse.
        let mut prepared: Vec<PreparedEvent> = Vec::with_capacity(payloads.len());
        for payload in &payloads {
            let normalized = match adapter.normalize(payload) {
                Ok(n) => n,
                Err(e) => {
                    warn!(
                        source_id = %payload.source_id,
                        source_event_id = %payload.source_event_id,
                        error = %e,
                        "normalization failed, skipping payload"
                    );
                    stats.skipped += 1;
                    continue;
                }
            };

            let existing = match self.deps.events.get_event(&normalized.event.id).await {
                Ok(existing) => existing,
                Err(e) => {
                    warn!(id = %normalized.event.id, error = %e, "event pre-read failed, skipping");
                    stats.skipped += 1;
                    continue;
                }
            };

            let reuse = !force_refresh
                && matches!(
                    (&normalized.event.last_updated_at, existing.as_ref().and_then(|e| e.last_updated_at)),
                    (Some(incoming), Some(stored)) if *incoming == stored
                );

            let (candidates, tags, vector) = if reuse {
                let stored = existing.as_ref().expect("reuse implies existing");
                (
                    stored
                        .classification
                        .as_ref()
                        .map(|c| c.candidates.clone())
                        .unwrap_or_default(),
                    stored.tags.clone(),
                    stored.vector.clone(),
                )
            } else {
                (Vec::new(), Vec::new(), None)
            };

            prepared.push(PreparedEvent {
                normalized,
                existing,
                reuse,
                candidates,
                tags,
                vector,
            });
        }

        // Phase 1, tag: fan out over the entries that need classification.
        let tag_futures: Vec<_> = prepared
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.reuse)
            .map(|(i, p)| {
                let gateway = &self.deps.gateway;
                let title = p.normalized.event.title.clone();
                let description = p.normalized.event.description.clone();
                async move { (i, gateway.suggest_tags(&title, description.as_deref()).await) }
            })
            .collect();
        for (i, result) in join_all(tag_futures).await {
            match result {
                Ok((candidates, tags)) => {
                    prepared[i].candidates = candidates;
                    prepared[i].tags = tags;
                }
                Err(e) => {
                    warn!(id = %prepared[i].normalized.event.id, error = %e, "tagging failed, continuing untagged");
                }
            }
        }

        // Phase 2, embed: one batch over entries with a non-empty tag list.
        let embed_targets: Vec<usize> = prepared
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.reuse && !p.tags.is_empty())
            .map(|(i, _)| i)
            .collect();
        if !embed_targets.is_empty() {
            let texts: Vec<String> = embed_targets
                .iter()
                .map(|&i| {
                    let event = &prepared[i].normalized.event;
                    enriched_text(&event.title, event.description.as_deref(), &prepared[i].tags)
                })
                .collect();
            match self.deps.gateway.embed_enriched(&texts).await {
                Ok(vectors) => {
                    for (&i, vector) in embed_targets.iter().zip(vectors) {
                        prepared[i].vector = Some(vector);
                    }
                }
                Err(e) => {
                    warn!(count = embed_targets.len(), error = %e, "embedding batch failed, persisting without vectors");
                }
            }
        }

        // Phase 3, persist: sequential per entry.
        for entry in prepared {
            match self.persist_entry(entry, force_refresh, now).await {
                Ok(SaveOutcome::Created) => stats.created += 1,
                Ok(SaveOutcome::Updated) => stats.updated += 1,
                Err(e) => {
                    warn!(error = %e, "persist failed, skipping entry");
                    stats.skipped += 1;
                }
            }
        }

        info!(
            source_id = adapter.source_id(),
            fetched = stats.fetched,
            created = stats.created,
            updated = stats.updated,
            skipped = stats.skipped,
            "ingest run complete"
        );
        Ok(stats)
    }

    async fn persist_entry(
        &self,
        entry: PreparedEvent,
        force_refresh: bool,
        now: DateTime<Utc>,
    ) -> Result<SaveOutcome> {
        let PreparedEvent {
            normalized,
            existing,
            reuse,
            candidates,
            tags,
            vector,
        } = entry;

        // Unchanged since last classification: refresh bookkeeping only.
        if reuse {
            self.deps
                .events
                .touch_event(&normalized.event.id, normalized.event.last_fetched_at)
                .await?;
            return Ok(SaveOutcome::Updated);
        }

        let mut event = normalized.event;

        // Record proposals for the classified slugs, then fold them together
        // with whatever tags the source itself carried.
        let proposal_slugs: Vec<String> =
            tags.iter().take(PROPOSAL_TAG_CAP).cloned().collect();
        if !proposal_slugs.is_empty() {
            if let Err(e) = self
                .deps
                .proposals
                .record_event_tags(
                    &event.id,
                    &event.title,
                    &event.source.source_id,
                    &proposal_slugs,
                    now,
                )
                .await
            {
                warn!(id = %event.id, error = %e, "tag proposal recording failed");
            }
        }
        event.tags = filter_tags(event.tags.iter().chain(proposal_slugs.iter()), &[]);
        event.vector = vector;
        event.classification = Some(Classification {
            tags: event.tags.clone(),
            candidates,
            metadata: None,
        });
        if let Some(stored) = &existing {
            event.created_at = stored.created_at;
            // Breadcrumbs are an append-only chain; keep the stored history
            // ahead of this fetch's crumb (the save path caps the length).
            let fresh = std::mem::take(&mut event.breadcrumbs);
            event.breadcrumbs = stored.breadcrumbs.clone();
            event.breadcrumbs.extend(fresh);
        }

        // Series attach, then category assignment (forced on creation or
        // explicit refresh). Failures here are logged; the event is still
        // written, just without the denormalized series fields.
        let attach = match self
            .deps
            .series
            .attach_event(
                &event,
                &AttachContext {
                    host_id: tidepool_common::types::build_host_id(&normalized.host.host_id_seed),
                    host_name: normalized.host.host_name.clone(),
                    organizer: normalized.host.organizer.clone(),
                    source_id: event.source.source_id.clone(),
                },
                now,
            )
            .await
        {
            Ok(attach) => Some(attach),
            Err(e) => {
                warn!(id = %event.id, error = %e, "series attach failed");
                None
            }
        };

        if let Some(attach) = &attach {
            event.series_id = Some(attach.series_id.clone());
            let force_assign = attach.created || force_refresh;
            match self
                .deps
                .assigner
                .assign_series(&attach.series_id, &attach.host, force_assign, now)
                .await
            {
                Ok(Some(assignment)) => {
                    event.series_category_id = Some(assignment.category_id);
                    event.series_category_name = Some(assignment.category_name);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(series_id = %attach.series_id, error = %e, "category assignment failed");
                }
            }
        }

        self.deps
            .events
            .save_event(&event, Some(&normalized.raw_snapshot), existing.as_ref())
            .await
    }

    /// Drive the pipeline over a long window in contiguous half-open chunks,
    /// aggregating stats.
    pub async fn run_chunked(
        &self,
        adapter: &dyn SourceAdapter,
        window: Window,
        chunk_days: i64,
        force_refresh: bool,
        now: DateTime<Utc>,
    ) -> Result<IngestStats> {
        let mut total = IngestStats::default();
        for chunk in window.chunks(chunk_days) {
            let stats = self
                .run(adapter, &FetchWindow::Range(chunk), force_refresh, now)
                .await?;
            total += stats;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassifierGateway;
    use crate::fixture::FixtureAdapter;
    use crate::testing::{MockEmbedder, MockTagModel, StaticCategoryModel};
    use crate::CategoryAssigner;
    use std::sync::Arc;
    use tidepool_common::types::{CandidateSource, TagCandidate};
    use tidepool_store::{CategoryStore, MemoryStore};

    fn candidates() -> Vec<TagCandidate> {
        [("yoga", 0.95), ("wellness", 0.8), ("outdoors", 0.7), ("free", 0.6), ("fitness", 0.5)]
            .into_iter()
            .map(|(tag, confidence)| TagCandidate {
                tag: tag.to_string(),
                confidence,
                rationale: None,
                source: CandidateSource::Llm,
            })
            .collect()
    }

    struct Fixture {
        ingestor: Ingestor,
        store: Arc<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let doc_store: Arc<dyn tidepool_store::DocumentStore> = store.clone();
        let events = EventStore::new(doc_store.clone());
        let series = SeriesStore::new(doc_store.clone());
        let categories = CategoryStore::new(doc_store.clone());
        let proposals = ProposalStore::new(doc_store.clone());

        let gateway = ClassifierGateway::new(
            Arc::new(MockTagModel::new(candidates())),
            Arc::new(MockEmbedder::with_dim(8)),
            vec![],
            false,
        );
        let assigner = CategoryAssigner::new(
            Arc::new(StaticCategoryModel::create_new("Outdoor Wellness")),
            categories,
            series.clone(),
            events.clone(),
        );

        Fixture {
            ingestor: Ingestor::new(IngestDeps {
                events,
                series,
                proposals,
                gateway,
                assigner,
            }),
            store,
        }
    }

    fn now() -> DateTime<Utc> {
        "2026-07-10T12:00:00Z".parse().unwrap()
    }

    fn events_store(f: &Fixture) -> EventStore {
        EventStore::new(f.store.clone())
    }

    #[tokio::test]
    async fn ingest_one_serve_one() {
        let f = fixture();
        let adapter = FixtureAdapter::demo(now());

        let stats = f
            .ingestor
            .run(&adapter, &FetchWindow::Default, false, now())
            .await
            .unwrap();
        assert_eq!(stats.fetched, 4);
        assert_eq!(stats.created, 4);
        assert_eq!(stats.skipped, 0);

        let event = events_store(&f)
            .get_event("fixture-cal:yoga-0")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.tags, vec!["fitness", "outdoors", "wellness", "yoga"]);
        assert!(event.vector.is_some());
        assert!(event.series_id.is_some());
        assert_eq!(event.series_category_name.as_deref(), Some("Outdoor Wellness"));

        // All three yoga occurrences share one series.
        let series = SeriesStore::new(f.store.clone())
            .get_series(event.series_id.as_ref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(series.stats.upcoming_count, 3);
        assert_eq!(series.category_name.as_deref(), Some("Outdoor Wellness"));
    }

    #[tokio::test]
    async fn second_pass_is_reuse_idempotent() {
        let f = fixture();
        let adapter = FixtureAdapter::demo(now());

        f.ingestor
            .run(&adapter, &FetchWindow::Default, false, now())
            .await
            .unwrap();

        let proposals_before = ProposalStore::new(f.store.clone())
            .top_proposals(50)
            .await
            .unwrap();
        let categories_before = f.store.dump("eventCategories");
        assert!(!categories_before.is_empty());

        let stats = f
            .ingestor
            .run(&adapter, &FetchWindow::Default, false, now())
            .await
            .unwrap();
        assert_eq!(stats.created, 0);
        assert_eq!(stats.updated, 4);
        assert_eq!(stats.skipped, 0);

        let proposals_after = ProposalStore::new(f.store.clone())
            .top_proposals(50)
            .await
            .unwrap();
        assert_eq!(
            proposals_before.iter().map(|p| p.occurrence_count).sum::<u64>(),
            proposals_after.iter().map(|p| p.occurrence_count).sum::<u64>(),
            "reuse pass must not record new proposals"
        );
        let categories_after = f.store.dump("eventCategories");
        let versions = |docs: &[(String, serde_json::Value)]| -> Vec<u64> {
            docs.iter()
                .filter_map(|(_, doc)| doc.get("version").and_then(|v| v.as_u64()))
                .collect()
        };
        assert_eq!(versions(&categories_before), versions(&categories_after));
    }

    #[tokio::test]
    async fn force_refresh_reclassifies() {
        let f = fixture();
        let adapter = FixtureAdapter::demo(now());
        f.ingestor
            .run(&adapter, &FetchWindow::Default, false, now())
            .await
            .unwrap();

        let stats = f
            .ingestor
            .run(&adapter, &FetchWindow::Default, true, now())
            .await
            .unwrap();
        // Full reclassification still reports updates, not creates.
        assert_eq!(stats.created, 0);
        assert_eq!(stats.updated, 4);
    }

    #[tokio::test]
    async fn chunked_run_covers_whole_window() {
        let f = fixture();
        let adapter = FixtureAdapter::demo(now());
        let window = Window::new(now(), now() + chrono::Duration::days(21)).unwrap();

        let stats = f
            .ingestor
            .run_chunked(&adapter, window, 7, false, now())
            .await
            .unwrap();
        // Every demo event starts inside 21 days; chunks must not lose or
        // double-count any of them.
        assert_eq!(stats.created, 4);
        assert_eq!(stats.fetched, 4);
    }

    #[tokio::test]
    async fn proposal_counts_match_ingested_tags() {
        let f = fixture();
        let adapter = FixtureAdapter::demo(now());
        f.ingestor
            .run(&adapter, &FetchWindow::Default, false, now())
            .await
            .unwrap();

        let proposals = ProposalStore::new(f.store.clone()).top_proposals(50).await.unwrap();
        // 4 events, 4 surviving slugs each ("free" is a stop word).
        assert_eq!(proposals.len(), 4);
        for p in proposals {
            assert_eq!(p.occurrence_count, 4);
            assert_eq!(p.occurrence_count, p.source_counts.values().sum::<u64>());
        }
    }
}
