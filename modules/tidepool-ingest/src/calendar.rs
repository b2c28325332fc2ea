//! Calendar-API adapter. Speaks a Google-Calendar-shaped JSON events API:
//! recurrences are expanded server-side (`singleEvents=true`), results come
//! ordered by start time, pagination via `nextPageToken`.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use tidepool_common::types::{event_doc_id, Breadcrumb, CanonicalEvent, EventSource, Venue};
use tidepool_common::util::redact_url;
use tidepool_common::Window;

use crate::adapter::{FetchWindow, HostContext, NormalizedEvent, RawEventPayload, SourceAdapter};

/// Retry policy for calendar HTTP fetches.
const FETCH_ATTEMPTS: u32 = 3;
const FETCH_BACKOFF_MS: u64 = 250;
/// Pagination bound per fetch.
const MAX_PAGES: usize = 25;
/// Default window when the caller doesn't specify one.
const DEFAULT_LOOKBACK_DAYS: i64 = 1;
const DEFAULT_LOOKAHEAD_DAYS: i64 = 30;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

pub struct CalendarAdapter {
    source_id: String,
    /// e.g. `https://www.googleapis.com/calendar/v3`
    api_base_url: String,
    calendar_id: String,
    api_key: String,
    /// IANA zone passed to the API for day-boundary resolution.
    time_zone: String,
    /// Calendar label used when an event declares no organizer.
    label: String,
    http: reqwest::Client,
}

impl CalendarAdapter {
    pub fn new(
        source_id: impl Into<String>,
        api_base_url: impl Into<String>,
        calendar_id: impl Into<String>,
        api_key: impl Into<String>,
        time_zone: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            api_base_url: api_base_url.into(),
            calendar_id: calendar_id.into(),
            api_key: api_key.into(),
            time_zone: time_zone.into(),
            label: label.into(),
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client"),
        }
    }

    fn resolve_window(&self, window: &FetchWindow, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        match window {
            FetchWindow::Range(w) => (w.start, w.end),
            FetchWindow::TargetDate(date) => {
                let start = date.and_hms_opt(0, 0, 0).expect("midnight").and_utc();
                (start, start + ChronoDuration::days(1))
            }
            FetchWindow::Default => (
                now - ChronoDuration::days(DEFAULT_LOOKBACK_DAYS),
                now + ChronoDuration::days(DEFAULT_LOOKAHEAD_DAYS),
            ),
        }
    }

    fn events_url(&self, time_min: DateTime<Utc>, time_max: DateTime<Utc>, page_token: Option<&str>) -> String {
        let mut url = format!(
            "{}/calendars/{}/events?singleEvents=true&orderBy=startTime&timeMin={}&timeMax={}&timeZone={}&key={}",
            self.api_base_url,
            self.calendar_id,
            time_min.to_rfc3339().replace('+', "%2B"),
            time_max.to_rfc3339().replace('+', "%2B"),
            self.time_zone,
            self.api_key,
        );
        if let Some(token) = page_token {
            url.push_str("&pageToken=");
            url.push_str(token);
        }
        url
    }

    /// GET with linear backoff: `attempt * 250ms`, 3 attempts.
    async fn fetch_json(&self, url: &str) -> Result<Value> {
        let mut last_err = None;
        for attempt in 1..=FETCH_ATTEMPTS {
            match self.http.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    return response.json().await.context("calendar response body");
                }
                Ok(response) => {
                    let status = response.status();
                    last_err = Some(anyhow!("calendar API returned {status}"));
                }
                Err(e) => {
                    last_err = Some(anyhow!(e));
                }
            }
            if attempt < FETCH_ATTEMPTS {
                let backoff = Duration::from_millis(FETCH_BACKOFF_MS * attempt as u64);
                debug!(
                    source_id = %self.source_id,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "calendar fetch failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("calendar fetch failed")))
    }
}

#[async_trait]
impl SourceAdapter for CalendarAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn chunk_days(&self) -> i64 {
        7
    }

    async fn fetch_raw_events(&self, window: &FetchWindow) -> Result<Vec<RawEventPayload>> {
        let now = Utc::now();
        let (time_min, time_max) = self.resolve_window(window, now);

        let mut payloads = Vec::new();
        let mut page_token: Option<String> = None;

        for page in 0..MAX_PAGES {
            let url = self.events_url(time_min, time_max, page_token.as_deref());
            let body = self.fetch_json(&url).await?;
            let page_data: EventsPage =
                serde_json::from_value(body.clone()).context("calendar page shape")?;

            let fetched_at = Utc::now();
            for item in page_data.items {
                let Some(id) = item.get("id").and_then(|v| v.as_str()) else {
                    warn!(source_id = %self.source_id, "calendar item without id, skipping");
                    continue;
                };
                payloads.push(RawEventPayload {
                    source_id: self.source_id.clone(),
                    source_event_id: id.to_string(),
                    fetched_at,
                    raw: with_fetched_url(item, &redact_url(&url)),
                });
            }

            page_token = page_data.next_page_token;
            if page_token.is_none() {
                break;
            }
            if page + 1 == MAX_PAGES {
                warn!(source_id = %self.source_id, "calendar pagination bound hit, truncating");
            }
        }

        debug!(source_id = %self.source_id, count = payloads.len(), "calendar fetch complete");
        Ok(payloads)
    }

    fn normalize(&self, payload: &RawEventPayload) -> Result<NormalizedEvent> {
        let item: CalendarItem = serde_json::from_value(payload.raw.clone())
            .context("calendar item shape")?;

        let (start_time, is_all_day) = parse_boundary(item.start.as_ref())
            .ok_or_else(|| anyhow!("calendar item {} has no start time", payload.source_event_id))?;
        let (end_time, _) = parse_boundary(item.end.as_ref()).unzip();

        let title = item
            .summary
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("Untitled Event")
            .to_string();

        let organizer = item
            .organizer
            .as_ref()
            .and_then(|o| o.display_name.clone().or_else(|| o.email.clone()));

        let host = HostContext::derive(organizer.as_deref(), Some(&self.label), &self.source_id);

        let fetched_url = payload
            .raw
            .get("fetchedUrl")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let event = CanonicalEvent {
            id: event_doc_id(&payload.source_id, &payload.source_event_id),
            title,
            description: item.description.filter(|d| !d.trim().is_empty()),
            start_time,
            end_time,
            time_zone: item
                .start
                .as_ref()
                .and_then(|b| b.time_zone.clone())
                .or_else(|| Some(self.time_zone.clone())),
            is_all_day: Some(is_all_day),
            venue: item.location.as_ref().map(|loc| Venue {
                name: None,
                address: None,
                raw_location: Some(loc.clone()),
            }),
            organizer: organizer.clone(),
            price: None,
            status: item.status,
            tags: Vec::new(),
            classification: None,
            vector: None,
            breadcrumbs: vec![Breadcrumb {
                crumb_type: "calendar-fetch".to_string(),
                source_id: payload.source_id.clone(),
                source_event_id: payload.source_event_id.clone(),
                fetched_at: payload.fetched_at,
                metadata: fetched_url.map(|u| serde_json::json!({ "fetchedUrl": u })),
            }],
            source: EventSource {
                source_id: payload.source_id.clone(),
                source_event_id: payload.source_event_id.clone(),
                source_url: item.html_link,
            },
            last_fetched_at: payload.fetched_at,
            last_updated_at: item.updated,
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

/// Convert a start/end boundary: `dateTime` for timed events, bare `date`
/// for all-day ones.
fn parse_boundary(boundary: Option<&EventBoundary>) -> Option<(DateTime<Utc>, bool)> {
    let boundary = boundary?;
    if let Some(dt) = &boundary.date_time {
        return DateTime::parse_from_rfc3339(dt)
            .ok()
            .map(|dt| (dt.with_timezone(&Utc), false));
    }
    if let Some(date) = &boundary.date {
        let date: NaiveDate = date.parse().ok()?;
        return Some((date.and_hms_opt(0, 0, 0)?.and_utc(), true));
    }
    None
}

fn with_fetched_url(mut item: Value, fetched_url: &str) -> Value {
    if let Some(obj) = item.as_object_mut() {
        obj.insert(
            "fetchedUrl".to_string(),
            Value::String(fetched_url.to_string()),
        );
    }
    item
}

// --- Wire shapes ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsPage {
    #[serde(default)]
    items: Vec<Value>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarItem {
    summary: Option<String>,
    description: Option<String>,
    status: Option<String>,
    location: Option<String>,
    start: Option<EventBoundary>,
    end: Option<EventBoundary>,
    organizer: Option<Organizer>,
    html_link: Option<String>,
    updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventBoundary {
    date_time: Option<String>,
    date: Option<String>,
    time_zone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Organizer {
    display_name: Option<String>,
    email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapter() -> CalendarAdapter {
        CalendarAdapter::new(
            "s1",
            "https://calendar.example.com/v3",
            "cal-id",
            "sk-secret",
            "America/Los_Angeles",
            "City Calendar",
        )
    }

    fn payload(raw: Value) -> RawEventPayload {
        RawEventPayload {
            source_id: "s1".to_string(),
            source_event_id: "e1".to_string(),
            fetched_at: "2026-07-10T12:00:00Z".parse().unwrap(),
            raw,
        }
    }

    #[test]
    fn normalize_timed_event() {
        let normalized = adapter()
            .normalize(&payload(json!({
                "id": "e1",
                "summary": "Community Yoga in the Park",
                "description": "Bring a mat",
                "status": "confirmed",
                "location": "Central Park Lawn",
                "start": {"dateTime": "2026-07-11T10:00:00-07:00"},
                "end": {"dateTime": "2026-07-11T11:00:00-07:00"},
                "organizer": {"displayName": "Parks Dept"},
                "htmlLink": "https://calendar.example.com/event?eid=e1",
                "updated": "2026-07-01T00:00:00Z"
            })))
            .unwrap();

        let event = &normalized.event;
        assert_eq!(event.id, "s1:e1");
        assert_eq!(event.title, "Community Yoga in the Park");
        assert_eq!(event.start_time, "2026-07-11T17:00:00Z".parse::<DateTime<Utc>>().unwrap());
        assert_eq!(event.is_all_day, Some(false));
        assert_eq!(event.organizer.as_deref(), Some("Parks Dept"));
        assert_eq!(normalized.host.host_name, "Parks Dept");
        assert_eq!(
            event.venue.as_ref().unwrap().raw_location.as_deref(),
            Some("Central Park Lawn")
        );
    }

    #[test]
    fn normalize_all_day_event() {
        let normalized = adapter()
            .normalize(&payload(json!({
                "id": "e1",
                "summary": "Street Fair",
                "start": {"date": "2026-07-11"},
                "end": {"date": "2026-07-12"}
            })))
            .unwrap();
        assert_eq!(normalized.event.is_all_day, Some(true));
        assert_eq!(
            normalized.event.start_time,
            "2026-07-11T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn normalize_untitled_fallback() {
        let normalized = adapter()
            .normalize(&payload(json!({
                "id": "e1",
                "summary": "  ",
                "start": {"dateTime": "2026-07-11T10:00:00Z"}
            })))
            .unwrap();
        assert_eq!(normalized.event.title, "Untitled Event");
    }

    #[test]
    fn normalize_without_start_fails() {
        let result = adapter().normalize(&payload(json!({"id": "e1", "summary": "No time"})));
        assert!(result.is_err());
    }

    #[test]
    fn normalize_falls_back_to_calendar_label() {
        let normalized = adapter()
            .normalize(&payload(json!({
                "id": "e1",
                "summary": "Mystery Event",
                "start": {"dateTime": "2026-07-11T10:00:00Z"}
            })))
            .unwrap();
        assert_eq!(normalized.host.host_name, "City Calendar");
    }

    #[test]
    fn events_url_carries_expansion_params() {
        let a = adapter();
        let url = a.events_url(
            "2026-07-01T00:00:00Z".parse().unwrap(),
            "2026-07-08T00:00:00Z".parse().unwrap(),
            Some("tok"),
        );
        assert!(url.contains("singleEvents=true"));
        assert!(url.contains("orderBy=startTime"));
        assert!(url.contains("timeZone=America/Los_Angeles"));
        assert!(url.contains("pageToken=tok"));
    }

    #[test]
    fn fetched_url_is_redacted_in_raw() {
        let url = adapter().events_url(
            "2026-07-01T00:00:00Z".parse().unwrap(),
            "2026-07-08T00:00:00Z".parse().unwrap(),
            None,
        );
        let raw = with_fetched_url(json!({"id": "e1"}), &redact_url(&url));
        let stored = raw.get("fetchedUrl").unwrap().as_str().unwrap();
        assert!(!stored.contains("sk-secret"));
        assert!(stored.contains("key=REDACTED"));
    }
}
