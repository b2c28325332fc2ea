//! Canonical event persistence. Full-document rewrites with change detection
//! decided from the pre-read snapshot; a touch-only path for no-op updates;
//! merge patches for series back-fill.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::warn;

use tidepool_common::types::{CanonicalEvent, BREADCRUMB_CAP};
use tidepool_common::util::prune_nulls_deep;
use tidepool_common::Window;

use crate::docstore::{collections, Direction, DocQuery, DocumentStore, Filter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Created,
    Updated,
}

#[derive(Clone)]
pub struct EventStore {
    store: Arc<dyn DocumentStore>,
}

impl EventStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn get_event(&self, id: &str) -> Result<Option<CanonicalEvent>> {
        let Some(doc) = self.store.get(collections::EVENTS, id).await? else {
            return Ok(None);
        };
        match serde_json::from_value(doc) {
            Ok(event) => Ok(Some(event)),
            Err(e) => {
                warn!(id, error = %e, "malformed event document, treating as absent");
                Ok(None)
            }
        }
    }

    /// Write the full record. `existing` is the pre-read snapshot the caller
    /// already holds; its presence decides Created vs Updated, which stays
    /// correct under concurrent writers because the write is idempotent on
    /// the whole document.
    pub async fn save_event(
        &self,
        event: &CanonicalEvent,
        raw_snapshot: Option<&Value>,
        existing: Option<&CanonicalEvent>,
    ) -> Result<SaveOutcome> {
        let mut event = event.clone();
        event.tags = normalize_tags(&event.tags);
        cap_tail(&mut event.breadcrumbs, BREADCRUMB_CAP);

        let mut doc = prune_nulls_deep(serde_json::to_value(&event)?);
        if let (Some(raw), Some(obj)) = (raw_snapshot, doc.as_object_mut()) {
            obj.insert("rawSnapshot".to_string(), raw.clone());
        }

        self.store.set(collections::EVENTS, &event.id, doc).await?;

        Ok(if existing.is_some() {
            SaveOutcome::Updated
        } else {
            SaveOutcome::Created
        })
    }

    /// No-op update path: refresh fetch bookkeeping without touching the
    /// classification, tags, or vector.
    pub async fn touch_event(&self, id: &str, fetched_at: DateTime<Utc>) -> Result<()> {
        self.store
            .merge(
                collections::EVENTS,
                id,
                json!({
                    "lastFetchedAt": fetched_at,
                    "lastSeenAt": fetched_at,
                }),
            )
            .await
    }

    /// Merge patch applied after series attach / category assignment.
    pub async fn update_series_info(
        &self,
        event_id: &str,
        series_id: &str,
        category_id: Option<&str>,
        category_name: Option<&str>,
    ) -> Result<()> {
        self.store
            .merge(
                collections::EVENTS,
                event_id,
                json!({
                    "seriesId": series_id,
                    "seriesCategoryId": category_id,
                    "seriesCategoryName": category_name,
                }),
            )
            .await
    }

    /// Feed candidates: events starting inside the window, optionally
    /// restricted to any of `tags`, ascending by start time.
    pub async fn events_in_window(
        &self,
        window: Window,
        tags: Option<&[String]>,
    ) -> Result<Vec<CanonicalEvent>> {
        let mut query = DocQuery::new()
            .filter(Filter::Gte("startTime".into(), json!(window.start)))
            .filter(Filter::Lt("startTime".into(), json!(window.end)))
            .order("startTime", Direction::Asc);
        if let Some(tags) = tags.filter(|t| !t.is_empty()) {
            query = query.filter(Filter::ArrayContainsAny(
                "tags".into(),
                tags.iter().map(|t| json!(t)).collect(),
            ));
        }

        let rows = self.store.query(collections::EVENTS, query).await?;
        Ok(rows
            .into_iter()
            .filter_map(|(id, doc)| match serde_json::from_value(doc) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(id, error = %e, "skipping malformed event document");
                    None
                }
            })
            .collect())
    }
}

/// Lower-case, trim, drop empties, sorted-unique.
fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = tags
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

fn cap_tail<T>(items: &mut Vec<T>, cap: usize) {
    if items.len() > cap {
        items.drain(..items.len() - cap);
    }
}
