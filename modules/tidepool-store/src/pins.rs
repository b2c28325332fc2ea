//! Pinned-event persistence: one denormalized sub-record per `(user, id)`,
//! split into direct event pins and series pins.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tracing::warn;

use tidepool_common::types::{PinnedEvent, PinnedSeries};
use tidepool_common::Window;

use crate::docstore::{collections, Direction, DocQuery, DocumentStore, Filter};

#[derive(Clone)]
pub struct PinStore {
    store: Arc<dyn DocumentStore>,
}

impl PinStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn set_event_pin(&self, user_id: &str, pin: &PinnedEvent) -> Result<()> {
        self.store
            .set(
                &collections::pinned_entries(user_id),
                &pin.event_id,
                serde_json::to_value(pin)?,
            )
            .await
    }

    pub async fn remove_event_pin(&self, user_id: &str, event_id: &str) -> Result<()> {
        self.store
            .delete(&collections::pinned_entries(user_id), event_id)
            .await
    }

    pub async fn get_event_pin(&self, user_id: &str, event_id: &str) -> Result<Option<PinnedEvent>> {
        let doc = self
            .store
            .get(&collections::pinned_entries(user_id), event_id)
            .await?;
        Ok(doc.and_then(|d| serde_json::from_value(d).ok()))
    }

    pub async fn set_series_pin(&self, user_id: &str, pin: &PinnedSeries) -> Result<()> {
        self.store
            .set(
                &collections::pinned_series(user_id),
                &pin.series_id,
                serde_json::to_value(pin)?,
            )
            .await
    }

    pub async fn remove_series_pin(&self, user_id: &str, series_id: &str) -> Result<()> {
        self.store
            .delete(&collections::pinned_series(user_id), series_id)
            .await
    }

    /// Direct pins whose event starts inside the window, ordered
    /// `(eventStartTime ASC, eventId ASC)`.
    pub async fn direct_pins_in_window(
        &self,
        user_id: &str,
        window: Window,
    ) -> Result<Vec<PinnedEvent>> {
        let query = DocQuery::new()
            .filter(Filter::Gte("eventStartTime".into(), json!(window.start)))
            .filter(Filter::Lt("eventStartTime".into(), json!(window.end)))
            .order("eventStartTime", Direction::Asc)
            .order("eventId", Direction::Asc);
        let rows = self
            .store
            .query(&collections::pinned_entries(user_id), query)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(id, doc)| match serde_json::from_value(doc) {
                Ok(pin) => Some(pin),
                Err(e) => {
                    warn!(id, error = %e, "skipping malformed pinned event");
                    None
                }
            })
            .collect())
    }

    pub async fn all_series_pins(&self, user_id: &str) -> Result<Vec<PinnedSeries>> {
        let rows = self
            .store
            .query(&collections::pinned_series(user_id), DocQuery::new())
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(id, doc)| match serde_json::from_value(doc) {
                Ok(pin) => Some(pin),
                Err(e) => {
                    warn!(id, error = %e, "skipping malformed pinned series");
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use chrono::{DateTime, Utc};
    use tidepool_common::types::{ContentType, EventSource};

    fn pin(event_id: &str, start: &str) -> PinnedEvent {
        let pinned_at: DateTime<Utc> = "2026-07-10T12:00:00Z".parse().unwrap();
        PinnedEvent {
            event_id: event_id.to_string(),
            title: "Pinned".to_string(),
            location: None,
            tags: vec![],
            event_start_time: start.parse().unwrap(),
            event_end_time: None,
            content_type: ContentType::Event,
            source: EventSource {
                source_id: "s1".to_string(),
                source_event_id: event_id.to_string(),
                source_url: None,
            },
            series_id: None,
            series_title: None,
            host_name: None,
            pinned_at,
            derived: false,
        }
    }

    #[tokio::test]
    async fn pin_round_trip_leaves_no_residue() {
        let pins = PinStore::new(Arc::new(MemoryStore::new()));
        let window = Window::new(
            "2026-07-10T00:00:00Z".parse().unwrap(),
            "2026-07-20T00:00:00Z".parse().unwrap(),
        )
        .unwrap();

        let before = pins.direct_pins_in_window("u1", window).await.unwrap();
        pins.set_event_pin("u1", &pin("s1:e1", "2026-07-11T17:00:00Z")).await.unwrap();
        assert_eq!(pins.direct_pins_in_window("u1", window).await.unwrap().len(), 1);

        pins.remove_event_pin("u1", "s1:e1").await.unwrap();
        let after = pins.direct_pins_in_window("u1", window).await.unwrap();
        assert_eq!(after.len(), before.len());
        assert!(pins.get_event_pin("u1", "s1:e1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn window_ordering_by_start_then_id() {
        let pins = PinStore::new(Arc::new(MemoryStore::new()));
        pins.set_event_pin("u1", &pin("s1:b", "2026-07-11T17:00:00Z")).await.unwrap();
        pins.set_event_pin("u1", &pin("s1:a", "2026-07-11T17:00:00Z")).await.unwrap();
        pins.set_event_pin("u1", &pin("s1:c", "2026-07-11T09:00:00Z")).await.unwrap();
        // Outside the window.
        pins.set_event_pin("u1", &pin("s1:d", "2026-08-01T09:00:00Z")).await.unwrap();

        let window = Window::new(
            "2026-07-11T00:00:00Z".parse().unwrap(),
            "2026-07-12T00:00:00Z".parse().unwrap(),
        )
        .unwrap();
        let listed = pins.direct_pins_in_window("u1", window).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|p| p.event_id.as_str()).collect();
        assert_eq!(ids, vec!["s1:c", "s1:a", "s1:b"]);
    }

    #[tokio::test]
    async fn pins_are_per_user() {
        let pins = PinStore::new(Arc::new(MemoryStore::new()));
        pins.set_event_pin("u1", &pin("s1:e1", "2026-07-11T17:00:00Z")).await.unwrap();
        let window = Window::new(
            "2026-07-11T00:00:00Z".parse().unwrap(),
            "2026-07-12T00:00:00Z".parse().unwrap(),
        )
        .unwrap();
        assert!(pins.direct_pins_in_window("u2", window).await.unwrap().is_empty());
    }
}
