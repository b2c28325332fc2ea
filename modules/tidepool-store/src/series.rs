//! Series aggregation: events sharing `(host, title)` roll into one series
//! document holding a bounded window of upcoming occurrences. The whole
//! attach is a single-document transaction, so concurrent attaches to the
//! same series serialize at the store.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::warn;

use tidepool_common::types::{
    build_series_id, Breadcrumb, CanonicalEvent, ContentType, EventSeries, Occurrence,
    SeriesHost, SeriesStats, BREADCRUMB_CAP, OCCURRENCE_CAP, OCCURRENCE_GRACE_HOURS,
};
use tidepool_common::Window;

use crate::docstore::{collections, Direction, DocQuery, DocumentStore, Filter};

/// Host identity resolved by the adapter, threaded into the attach.
#[derive(Debug, Clone)]
pub struct AttachContext {
    pub host_id: String,
    pub host_name: String,
    pub organizer: Option<String>,
    pub source_id: String,
}

#[derive(Debug, Clone)]
pub struct AttachOutcome {
    pub series_id: String,
    pub host: SeriesHost,
    pub created: bool,
}

#[derive(Clone)]
pub struct SeriesStore {
    store: Arc<dyn DocumentStore>,
}

impl SeriesStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn get_series(&self, id: &str) -> Result<Option<EventSeries>> {
        let Some(doc) = self.store.get(collections::EVENT_SERIES, id).await? else {
            return Ok(None);
        };
        match serde_json::from_value(doc) {
            Ok(series) => Ok(Some(series)),
            Err(e) => {
                warn!(id, error = %e, "malformed series document, treating as absent");
                Ok(None)
            }
        }
    }

    /// Attach one event occurrence to its `(hostId, titleSlug)` series,
    /// creating the series on first sight. Runs as one transaction on the
    /// series document.
    pub async fn attach_event(
        &self,
        event: &CanonicalEvent,
        ctx: &AttachContext,
        now: DateTime<Utc>,
    ) -> Result<AttachOutcome> {
        let series_id = build_series_id(&ctx.host_id, &event.title);
        let occurrence = occurrence_from_event(event);
        let horizon = now - Duration::hours(OCCURRENCE_GRACE_HOURS);

        let mut created = false;
        let written = self
            .store
            .update(collections::EVENT_SERIES, &series_id, &mut |current| {
                let mut series = match current {
                    Some(doc) => serde_json::from_value::<EventSeries>(doc)
                        .unwrap_or_else(|_| empty_series(&series_id, event, ctx, now)),
                    None => {
                        created = true;
                        empty_series(&series_id, event, ctx, now)
                    }
                };

                // Replace any stale copy of this event, evict past
                // occurrences, then re-sort and cap.
                series.upcoming_occurrences.retain(|o| {
                    o.event_id != occurrence.event_id && o.start_time >= horizon
                });
                series.upcoming_occurrences.push(occurrence.clone());
                series
                    .upcoming_occurrences
                    .sort_by(|a, b| (a.start_time, &a.event_id).cmp(&(b.start_time, &b.event_id)));
                series.upcoming_occurrences.truncate(OCCURRENCE_CAP);

                union_sorted(&mut series.tags, &event.tags);
                if !series.host.source_ids.contains(&ctx.source_id) {
                    series.host.source_ids.push(ctx.source_id.clone());
                }
                if series.host.organizer.is_none() {
                    series.host.organizer = ctx.organizer.clone();
                }

                push_breadcrumb(&mut series.breadcrumbs, event, now);

                if event.vector.is_some() {
                    series.vector = event.vector.clone();
                }
                if series.venue.is_none() {
                    series.venue = event.venue.clone();
                }
                if series.description.is_none() {
                    series.description = event.description.clone();
                }

                series.next_occurrence = series.upcoming_occurrences.first().cloned();
                series.next_start_time = series.next_occurrence.as_ref().map(|o| o.start_time);
                series.stats = SeriesStats {
                    upcoming_count: series.upcoming_occurrences.len() as u32,
                };
                series.updated_at = now;

                Ok(Some(serde_json::to_value(&series)?))
            })
            .await?;

        let host = written
            .as_ref()
            .and_then(|doc| doc.get("host").cloned())
            .and_then(|h| serde_json::from_value(h).ok())
            .unwrap_or_else(|| SeriesHost {
                id: ctx.host_id.clone(),
                name: ctx.host_name.clone(),
                organizer: ctx.organizer.clone(),
                source_ids: vec![ctx.source_id.clone()],
            });

        Ok(AttachOutcome {
            series_id,
            host,
            created,
        })
    }

    /// Merge patch applied after category assignment.
    pub async fn update_category_info(
        &self,
        series_id: &str,
        category_id: &str,
        category_name: &str,
        category_slug: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.store
            .merge(
                collections::EVENT_SERIES,
                series_id,
                json!({
                    "categoryId": category_id,
                    "categoryName": category_name,
                    "categorySlug": category_slug,
                    "updatedAt": now,
                }),
            )
            .await
    }

    /// Feed candidates: series whose next occurrence starts inside the window.
    pub async fn series_in_window(&self, window: Window) -> Result<Vec<EventSeries>> {
        let query = DocQuery::new()
            .filter(Filter::Gte("nextStartTime".into(), json!(window.start)))
            .filter(Filter::Lt("nextStartTime".into(), json!(window.end)))
            .order("nextStartTime", Direction::Asc);
        let rows = self.store.query(collections::EVENT_SERIES, query).await?;
        Ok(rows
            .into_iter()
            .filter_map(|(id, doc)| match serde_json::from_value(doc) {
                Ok(series) => Some(series),
                Err(e) => {
                    warn!(id, error = %e, "skipping malformed series document");
                    None
                }
            })
            .collect())
    }

    /// Hydrate a set of series by id, skipping ids that no longer resolve.
    pub async fn get_many(&self, ids: &[String]) -> Result<Vec<EventSeries>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(series) = self.get_series(id).await? {
                out.push(series);
            }
        }
        Ok(out)
    }
}

fn occurrence_from_event(event: &CanonicalEvent) -> Occurrence {
    Occurrence {
        event_id: event.id.clone(),
        title: event.title.clone(),
        start_time: event.start_time,
        end_time: event.end_time,
        location: event
            .venue
            .as_ref()
            .and_then(|v| v.name.clone().or_else(|| v.address.clone())),
        tags: event.tags.clone(),
    }
}

fn empty_series(
    series_id: &str,
    event: &CanonicalEvent,
    ctx: &AttachContext,
    now: DateTime<Utc>,
) -> EventSeries {
    EventSeries {
        id: series_id.to_string(),
        title: event.title.clone(),
        description: event.description.clone(),
        summary: None,
        content_type: ContentType::EventSeries,
        host: SeriesHost {
            id: ctx.host_id.clone(),
            name: ctx.host_name.clone(),
            organizer: ctx.organizer.clone(),
            source_ids: Vec::new(),
        },
        tags: Vec::new(),
        breadcrumbs: Vec::new(),
        source: event.source.clone(),
        venue: event.venue.clone(),
        category_id: None,
        category_name: None,
        category_slug: None,
        upcoming_occurrences: Vec::new(),
        next_occurrence: None,
        next_start_time: None,
        vector: None,
        stats: SeriesStats::default(),
        created_at: now,
        updated_at: now,
    }
}

fn union_sorted(target: &mut Vec<String>, extra: &[String]) {
    for tag in extra {
        if !target.contains(tag) {
            target.push(tag.clone());
        }
    }
    target.sort();
}

fn push_breadcrumb(breadcrumbs: &mut Vec<Breadcrumb>, event: &CanonicalEvent, now: DateTime<Utc>) {
    breadcrumbs.retain(|b| b.source_event_id != event.source.source_event_id);
    breadcrumbs.push(Breadcrumb {
        crumb_type: "series-attach".to_string(),
        source_id: event.source.source_id.clone(),
        source_event_id: event.source.source_event_id.clone(),
        fetched_at: now,
        metadata: None,
    });
    if breadcrumbs.len() > BREADCRUMB_CAP {
        let excess = breadcrumbs.len() - BREADCRUMB_CAP;
        breadcrumbs.drain(..excess);
    }
}
