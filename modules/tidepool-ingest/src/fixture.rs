//! Canned source adapter for tests and the dev server: deterministic
//! payloads, no network.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tidepool_common::types::{event_doc_id, Breadcrumb, CanonicalEvent, EventSource, Venue};

use crate::adapter::{FetchWindow, HostContext, NormalizedEvent, RawEventPayload, SourceAdapter};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureEvent {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub organizer: Option<String>,
    pub location: Option<String>,
    pub updated: Option<DateTime<Utc>>,
}

pub struct FixtureAdapter {
    source_id: String,
    label: String,
    events: Vec<FixtureEvent>,
}

impl FixtureAdapter {
    pub fn new(source_id: impl Into<String>, label: impl Into<String>, events: Vec<FixtureEvent>) -> Self {
        Self {
            source_id: source_id.into(),
            label: label.into(),
            events,
        }
    }

    /// A small demo calendar anchored on `now`: a recurring yoga series and
    /// a one-off concert.
    pub fn demo(now: DateTime<Utc>) -> Self {
        let updated = Some(now - Duration::days(1));
        let mut events = Vec::new();
        for week in 0..3 {
            events.push(FixtureEvent {
                id: format!("yoga-{week}"),
                title: "Community Yoga in the Park".to_string(),
                description: Some("All levels welcome. Bring a mat.".to_string()),
                start_time: now + Duration::days(1 + week * 7),
                end_time: Some(now + Duration::days(1 + week * 7) + Duration::hours(1)),
                organizer: Some("Parks Department".to_string()),
                location: Some("Central Park Lawn".to_string()),
                updated,
            });
        }
        events.push(FixtureEvent {
            id: "concert-1".to_string(),
            title: "Sunset Jazz Concert".to_string(),
            description: Some("Live quartet on the waterfront stage.".to_string()),
            start_time: now + Duration::days(2),
            end_time: None,
            organizer: Some("Waterfront Arts".to_string()),
            location: Some("Pier 7".to_string()),
            updated,
        });
        Self::new("fixture-cal", "Demo Calendar", events)
    }
}

#[async_trait]
impl SourceAdapter for FixtureAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch_raw_events(&self, window: &FetchWindow) -> Result<Vec<RawEventPayload>> {
        let fetched_at = Utc::now();
        Ok(self
            .events
            .iter()
            .filter(|e| match window {
                FetchWindow::Range(w) => w.contains(e.start_time),
                FetchWindow::TargetDate(date) => e.start_time.date_naive() == *date,
                FetchWindow::Default => true,
            })
            .map(|e| RawEventPayload {
                source_id: self.source_id.clone(),
                source_event_id: e.id.clone(),
                fetched_at,
                raw: serde_json::to_value(e).unwrap_or(Value::Null),
            })
            .collect())
    }

    fn normalize(&self, payload: &RawEventPayload) -> Result<NormalizedEvent> {
        let fixture: FixtureEvent = serde_json::from_value(payload.raw.clone())
            .map_err(|e| anyhow!("malformed fixture payload: {e}"))?;

        let host = HostContext::derive(
            fixture.organizer.as_deref(),
            Some(&self.label),
            &self.source_id,
        );

        let event = CanonicalEvent {
            id: event_doc_id(&payload.source_id, &payload.source_event_id),
            title: fixture.title,
            description: fixture.description,
            start_time: fixture.start_time,
            end_time: fixture.end_time,
            time_zone: None,
            is_all_day: Some(false),
            venue: fixture.location.map(|loc| Venue {
                name: Some(loc),
                address: None,
                raw_location: None,
            }),
            organizer: fixture.organizer,
            price: None,
            status: None,
            tags: Vec::new(),
            classification: None,
            vector: None,
            breadcrumbs: vec![Breadcrumb {
                crumb_type: "fixture-fetch".to_string(),
                source_id: payload.source_id.clone(),
                source_event_id: payload.source_event_id.clone(),
                fetched_at: payload.fetched_at,
                metadata: None,
            }],
            source: EventSource {
                source_id: payload.source_id.clone(),
                source_event_id: payload.source_event_id.clone(),
                source_url: None,
            },
            last_fetched_at: payload.fetched_at,
            last_updated_at: fixture.updated,
            created_at: payload.fetched_at,
            series_id: None,
            series_category_id: None,
            series_category_name: None,
        };

        Ok(NormalizedEvent {
            event,
            raw_snapshot: payload.raw.clone(),
            host,
        })
    }
}
