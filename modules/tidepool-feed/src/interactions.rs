//! Interaction recording: validation, atomic batch writes, and the
//! post-commit fan-out that maintains pins and bundle read markers.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use tidepool_common::types::{
    ContentType, InteractionAction, InteractionContext, UserInteraction,
};
use tidepool_common::TidepoolError;
use tidepool_store::{BundleStateStore, InteractionStore};

use crate::pinned::PinnedEventsService;

pub const MAX_BATCH: usize = 100;

/// Client-supplied interaction body. The id is always server-assigned;
/// the timestamp defaults to now.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IncomingInteraction {
    pub user_id: String,
    pub content_id: String,
    pub content_type: ContentType,
    pub action: InteractionAction,
    pub dwell_time: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub context: InteractionContext,
    #[serde(default)]
    pub content_tags: Vec<String>,
    pub metadata: Option<Value>,
}

#[derive(Clone)]
pub struct InteractionService {
    interactions: InteractionStore,
    bundle_states: BundleStateStore,
    pinned: PinnedEventsService,
}

impl InteractionService {
    pub fn new(
        interactions: InteractionStore,
        bundle_states: BundleStateStore,
        pinned: PinnedEventsService,
    ) -> Self {
        Self {
            interactions,
            bundle_states,
            pinned,
        }
    }

    /// Parse and validate one raw interaction body.
    pub fn validate(value: &Value) -> Result<IncomingInteraction, TidepoolError> {
        let incoming: IncomingInteraction = serde_json::from_value(value.clone())
            .map_err(|e| TidepoolError::validation(format!("Invalid interaction: {e}")))?;

        if incoming.user_id.trim().is_empty() {
            return Err(TidepoolError::validation("userId must be non-empty"));
        }
        if incoming.content_id.trim().is_empty() {
            return Err(TidepoolError::validation("contentId must be non-empty"));
        }
        if let Some(metadata) = &incoming.metadata {
            if !metadata.is_object() {
                return Err(TidepoolError::validation("metadata must be an object"));
            }
        }
        if incoming.content_type == ContentType::EventCategoryBundle
            && bundle_state_of(&incoming).is_none()
        {
            return Err(TidepoolError::Validation(
                "metadata.bundleState must be provided with categoryId and version \
                 for event-category-bundle interactions"
                    .to_string(),
            ));
        }
        Ok(incoming)
    }

    /// Validate the whole batch, write it atomically, then fan out side
    /// effects (pins, bundle read markers) concurrently.
    pub async fn record_interactions(
        &self,
        bodies: &[Value],
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, TidepoolError> {
        if bodies.is_empty() {
            return Err(TidepoolError::validation("interactions must be non-empty"));
        }
        if bodies.len() > MAX_BATCH {
            return Err(TidepoolError::validation(format!(
                "at most {MAX_BATCH} interactions per batch, got {}",
                bodies.len()
            )));
        }

        let incoming: Vec<IncomingInteraction> = bodies
            .iter()
            .map(Self::validate)
            .collect::<Result<_, _>>()?;

        let records: Vec<UserInteraction> = incoming
            .iter()
            .map(|i| UserInteraction {
                id: Uuid::new_v4().to_string(),
                user_id: i.user_id.clone(),
                content_id: i.content_id.clone(),
                content_type: i.content_type,
                action: i.action,
                dwell_time: i.dwell_time,
                timestamp: i.timestamp.unwrap_or(now),
                context: i.context.clone(),
                content_tags: i.content_tags.clone(),
                metadata: i.metadata.clone(),
            })
            .collect();

        self.interactions
            .record_batch(&records)
            .await
            .map_err(TidepoolError::Anyhow)?;

        // Side effects only after the batch committed.
        let effects = incoming.iter().map(|i| self.apply_side_effects(i, now));
        join_all(effects).await;

        Ok(records.into_iter().map(|r| r.id).collect())
    }

    async fn apply_side_effects(&self, incoming: &IncomingInteraction, now: DateTime<Utc>) {
        match (incoming.content_type, incoming.action) {
            (ContentType::Event, InteractionAction::Bookmarked)
            | (ContentType::EventSeries, InteractionAction::Bookmarked) => {
                let active = incoming
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get("active"))
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                let result = match incoming.content_type {
                    ContentType::Event => self
                        .pinned
                        .set_event_pin(&incoming.user_id, &incoming.content_id, active, now)
                        .await
                        .map(|_| ()),
                    _ => self
                        .pinned
                        .set_series_pin(&incoming.user_id, &incoming.content_id, active, now)
                        .await
                        .map(|_| ()),
                };
                if let Err(e) = result {
                    // Content can legitimately disappear between interaction
                    // and fan-out; the interaction record stands either way.
                    warn!(
                        user_id = %incoming.user_id,
                        content_id = %incoming.content_id,
                        error = %e,
                        "pin toggle failed"
                    );
                }
            }
            (ContentType::EventCategoryBundle, _) => {
                let Some((category_id, version)) = bundle_state_of(incoming) else {
                    return; // validated earlier; unreachable in practice
                };
                if let Err(e) = self
                    .bundle_states
                    .mark_seen(&incoming.user_id, &category_id, version, now)
                    .await
                {
                    warn!(
                        user_id = %incoming.user_id,
                        category_id = %category_id,
                        error = %e,
                        "bundle mark-seen failed"
                    );
                }
            }
            _ => {}
        }
    }
}

/// Extract a well-formed `metadata.bundleState` if present.
fn bundle_state_of(incoming: &IncomingInteraction) -> Option<(String, u32)> {
    let state = incoming.metadata.as_ref()?.get("bundleState")?;
    let category_id = state.get("categoryId")?.as_str()?;
    let version = state.get("version")?.as_u64()?;
    if category_id.is_empty() {
        return None;
    }
    Some((category_id.to_string(), version as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;
    use serde_json::json;
    use std::sync::Arc;
    use tidepool_common::types::{event_doc_id, CanonicalEvent, EventSource};
    use tidepool_store::{DocumentStore, EventStore, MemoryStore, PinStore, SeriesStore};

    const LA: Tz = chrono_tz::America::Los_Angeles;

    fn now() -> DateTime<Utc> {
        "2026-07-10T21:00:00Z".parse().unwrap()
    }

    struct Fixture {
        service: InteractionService,
        interactions: InteractionStore,
        bundle_states: BundleStateStore,
        pinned: PinnedEventsService,
        events: EventStore,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let interactions = InteractionStore::new(store.clone());
        let bundle_states = BundleStateStore::new(store.clone());
        let events = EventStore::new(store.clone());
        let series = SeriesStore::new(store.clone());
        let pinned = PinnedEventsService::new(PinStore::new(store.clone()), events.clone(), series, LA);
        Fixture {
            service: InteractionService::new(
                interactions.clone(),
                bundle_states.clone(),
                pinned.clone(),
            ),
            interactions,
            bundle_states,
            pinned,
            events,
        }
    }

    fn body(action: &str, content_type: &str) -> Value {
        json!({
            "userId": "u1",
            "contentId": "s1:e1",
            "contentType": content_type,
            "action": action,
            "context": {
                "position": 3,
                "timeOfDay": "evening",
                "dayOfWeek": "friday"
            },
            "contentTags": ["yoga"]
        })
    }

    fn sample_event() -> CanonicalEvent {
        CanonicalEvent {
            id: event_doc_id("s1", "e1"),
            title: "Show".to_string(),
            description: None,
            start_time: "2026-07-12T17:00:00Z".parse().unwrap(),
            end_time: None,
            time_zone: None,
            is_all_day: None,
            venue: None,
            organizer: None,
            price: None,
            status: None,
            tags: vec![],
            classification: None,
            vector: None,
            breadcrumbs: vec![],
            source: EventSource {
                source_id: "s1".to_string(),
                source_event_id: "e1".to_string(),
                source_url: None,
            },
            last_fetched_at: now(),
            last_updated_at: None,
            created_at: now(),
            series_id: None,
            series_category_id: None,
            series_category_name: None,
        }
    }

    #[tokio::test]
    async fn records_and_reads_back() {
        let f = fixture();
        let ids = f
            .service
            .record_interactions(&[body("viewed", "event")], now())
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);

        let stored = f.interactions.recent_for_user("u1", 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].action, InteractionAction::Viewed);
        assert_eq!(stored[0].context.position, 3);
    }

    #[tokio::test]
    async fn rejects_unknown_action_and_type() {
        let f = fixture();
        let err = f
            .service
            .record_interactions(&[body("super-liked", "event")], now())
            .await
            .unwrap_err();
        assert!(matches!(err, TidepoolError::Validation(_)));

        let err = f
            .service
            .record_interactions(&[body("viewed", "mystery-type")], now())
            .await
            .unwrap_err();
        assert!(matches!(err, TidepoolError::Validation(_)));
    }

    #[tokio::test]
    async fn rejects_empty_ids_and_oversized_batch() {
        let f = fixture();
        let mut bad = body("viewed", "event");
        bad["userId"] = json!("");
        assert!(f.service.record_interactions(&[bad], now()).await.is_err());

        let batch: Vec<Value> = (0..101).map(|_| body("viewed", "event")).collect();
        assert!(f.service.record_interactions(&batch, now()).await.is_err());
    }

    #[tokio::test]
    async fn bundle_interaction_requires_bundle_state() {
        let f = fixture();
        // Scenario: bundle interaction with missing metadata.
        let err = f
            .service
            .record_interactions(&[body("viewed", "event-category-bundle")], now())
            .await
            .unwrap_err();
        let TidepoolError::Validation(message) = err else {
            panic!("expected validation error");
        };
        assert!(message.contains("metadata.bundleState must be provided"));

        // A failed batch writes nothing.
        assert!(f.interactions.recent_for_user("u1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bundle_interaction_marks_seen() {
        let f = fixture();
        let mut b = body("viewed", "event-category-bundle");
        b["metadata"] = json!({"bundleState": {"categoryId": "category:x", "version": 4}});
        f.service.record_interactions(&[b], now()).await.unwrap();

        let state = f
            .bundle_states
            .get("u1", "category:x")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.last_seen_version, 4);
    }

    #[tokio::test]
    async fn bookmark_pins_and_unpins() {
        let f = fixture();
        f.events.save_event(&sample_event(), None, None).await.unwrap();

        f.service
            .record_interactions(&[body("bookmarked", "event")], now())
            .await
            .unwrap();
        let page = f
            .pinned
            .get_pinned_events("u1", &crate::pinned::PinnedQuery::default(), now())
            .await
            .unwrap();
        assert_eq!(page.events.len(), 1);

        let mut unpin = body("bookmarked", "event");
        unpin["metadata"] = json!({"active": false});
        f.service.record_interactions(&[unpin], now()).await.unwrap();
        let page = f
            .pinned
            .get_pinned_events("u1", &crate::pinned::PinnedQuery::default(), now())
            .await
            .unwrap();
        assert!(page.events.is_empty());
    }

    #[tokio::test]
    async fn bookmark_of_missing_event_still_records() {
        let f = fixture();
        let ids = f
            .service
            .record_interactions(&[body("bookmarked", "event")], now())
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(f.interactions.recent_for_user("u1", 10).await.unwrap().len(), 1);
    }
}
