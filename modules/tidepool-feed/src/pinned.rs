//! Pinned events: direct pins, series pins, and the merged window read that
//! materializes series occurrences as derived entries.

use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::warn;

use tidepool_common::types::{ContentType, PinnedEvent, PinnedSeries};
use tidepool_common::{TidepoolError, Window};
use tidepool_store::{EventStore, PinStore, SeriesStore};

/// Default lookahead for the pinned window.
const DEFAULT_WINDOW_DAYS: i64 = 30;
pub const PIN_PAGE_SIZE_DEFAULT: usize = 10;
pub const PIN_PAGE_SIZE_MAX: usize = 30;

#[derive(Debug, Clone, Default)]
pub struct PinnedQuery {
    /// `"today"` selects the current local day.
    pub mode: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub page_size: Option<usize>,
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinnedPage {
    pub events: Vec<PinnedEvent>,
    pub next_page_token: Option<String>,
    pub window: Window,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PinnedEventsService {
    pins: PinStore,
    events: EventStore,
    series: SeriesStore,
    tz: Tz,
}

impl PinnedEventsService {
    pub fn new(pins: PinStore, events: EventStore, series: SeriesStore, tz: Tz) -> Self {
        Self {
            pins,
            events,
            series,
            tz,
        }
    }

    /// Pin or unpin a single event; the stored entry denormalizes everything
    /// the pinned view renders. Returns the entry when pinning.
    pub async fn set_event_pin(
        &self,
        user_id: &str,
        event_id: &str,
        pinned: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<PinnedEvent>, TidepoolError> {
        if !pinned {
            self.pins
                .remove_event_pin(user_id, event_id)
                .await
                .map_err(TidepoolError::Anyhow)?;
            return Ok(None);
        }

        let event = self
            .events
            .get_event(event_id)
            .await
            .map_err(TidepoolError::Anyhow)?
            .ok_or_else(|| TidepoolError::not_found(format!("event {event_id}")))?;

        let (series_title, host_name) = match &event.series_id {
            Some(series_id) => match self.series.get_series(series_id).await {
                Ok(Some(series)) => (Some(series.title), Some(series.host.name)),
                _ => (None, None),
            },
            None => (None, None),
        };

        let entry = PinnedEvent {
            event_id: event.id.clone(),
            title: event.title.clone(),
            location: event
                .venue
                .as_ref()
                .and_then(|v| v.name.clone().or_else(|| v.raw_location.clone())),
            tags: event.tags.clone(),
            event_start_time: event.start_time,
            event_end_time: event.end_time,
            content_type: ContentType::Event,
            source: event.source.clone(),
            series_id: event.series_id.clone(),
            series_title,
            host_name,
            pinned_at: now,
            derived: false,
        };
        self.pins
            .set_event_pin(user_id, &entry)
            .await
            .map_err(TidepoolError::Anyhow)?;
        Ok(Some(entry))
    }

    /// Pin or unpin a whole series; occurrences surface as derived entries
    /// in the window read.
    pub async fn set_series_pin(
        &self,
        user_id: &str,
        series_id: &str,
        pinned: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<PinnedSeries>, TidepoolError> {
        if !pinned {
            self.pins
                .remove_series_pin(user_id, series_id)
                .await
                .map_err(TidepoolError::Anyhow)?;
            return Ok(None);
        }

        let series = self
            .series
            .get_series(series_id)
            .await
            .map_err(TidepoolError::Anyhow)?
            .ok_or_else(|| TidepoolError::not_found(format!("series {series_id}")))?;

        let entry = PinnedSeries {
            series_id: series.id.clone(),
            title: series.title.clone(),
            host_name: Some(series.host.name.clone()),
            tags: series.tags.clone(),
            source: series.source.clone(),
            pinned_at: now,
        };
        self.pins
            .set_series_pin(user_id, &entry)
            .await
            .map_err(TidepoolError::Anyhow)?;
        Ok(Some(entry))
    }

    /// The merged pinned view: direct entries plus derived occurrences of
    /// pinned series, windowed, ordered, and offset-paginated.
    pub async fn get_pinned_events(
        &self,
        user_id: &str,
        query: &PinnedQuery,
        now: DateTime<Utc>,
    ) -> Result<PinnedPage, TidepoolError> {
        let window = self.build_window(query, now)?;
        let page_size = match query.page_size {
            None => PIN_PAGE_SIZE_DEFAULT,
            Some(n) if (1..=PIN_PAGE_SIZE_MAX).contains(&n) => n,
            Some(n) => {
                return Err(TidepoolError::validation(format!(
                    "pageSize must be between 1 and {PIN_PAGE_SIZE_MAX}, got {n}"
                )))
            }
        };

        let direct = self
            .pins
            .direct_pins_in_window(user_id, window)
            .await
            .map_err(TidepoolError::Anyhow)?;
        let direct_ids: Vec<&str> = direct.iter().map(|p| p.event_id.as_str()).collect();

        // Derived entries from pinned series, suppressing anything already
        // pinned directly.
        let mut merged = direct.clone();
        for series_pin in self
            .pins
            .all_series_pins(user_id)
            .await
            .map_err(TidepoolError::Anyhow)?
        {
            let series = match self.series.get_series(&series_pin.series_id).await {
                Ok(Some(series)) => series,
                Ok(None) => continue,
                Err(e) => {
                    warn!(series_id = %series_pin.series_id, error = %e, "series hydration failed");
                    continue;
                }
            };
            for occurrence in &series.upcoming_occurrences {
                if !window.contains(occurrence.start_time)
                    || direct_ids.contains(&occurrence.event_id.as_str())
                {
                    continue;
                }
                merged.push(PinnedEvent {
                    event_id: occurrence.event_id.clone(),
                    title: occurrence.title.clone(),
                    location: occurrence.location.clone(),
                    tags: occurrence.tags.clone(),
                    event_start_time: occurrence.start_time,
                    event_end_time: occurrence.end_time,
                    content_type: ContentType::Event,
                    source: series.source.clone(),
                    series_id: Some(series.id.clone()),
                    series_title: Some(series.title.clone()),
                    host_name: Some(series.host.name.clone()),
                    pinned_at: series_pin.pinned_at,
                    derived: true,
                });
            }
        }

        merged.sort_by(|a, b| {
            a.event_start_time
                .cmp(&b.event_start_time)
                .then_with(|| b.pinned_at.cmp(&a.pinned_at))
                .then_with(|| a.event_id.cmp(&b.event_id))
        });

        let (events, next_page_token) =
            crate::pagination::paginate(&merged, query.page_token.as_deref(), page_size)?;

        Ok(PinnedPage {
            events,
            next_page_token,
            window,
            updated_at: now,
        })
    }

    fn build_window(
        &self,
        query: &PinnedQuery,
        now: DateTime<Utc>,
    ) -> Result<Window, TidepoolError> {
        if query.mode.as_deref() == Some("today") {
            return Ok(Window::day_of(now, self.tz));
        }
        match (query.start, query.end) {
            (Some(start), Some(end)) => Window::new(start, end)
                .map_err(|e| TidepoolError::validation(e.to_string())),
            (None, None) => Ok(Window::from_now(now, DEFAULT_WINDOW_DAYS)),
            _ => Err(TidepoolError::validation(
                "start and end must be provided together".to_string(),
            )),
        }
    }
}
