//! Feed assembly: gather event/series candidates for the window, fold
//! series into per-user category bundles, rank, mix, and paginate.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use rand::Rng;
use serde_json::Value;
use tracing::warn;

use tidepool_common::types::{ContentItem, ContentStats, Scorable};
use tidepool_common::{TidepoolError, Window};
use tidepool_store::{EventStore, SeriesStore};

use crate::bundler::Bundler;
use crate::pagination::paginate;
use crate::profile::ProfileBuilder;
use crate::ranker::{apply_exploration_mix, Ranker};

pub const FEED_DAYS_MAX: u32 = 31;
pub const FEED_PAGE_SIZE_DEFAULT: usize = 20;
pub const FEED_PAGE_SIZE_MAX: usize = 50;
pub const FEED_TAGS_MAX: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct FeedQuery {
    pub user_id: Option<String>,
    /// Local start date in the display time zone. Defaults to today.
    pub start: Option<NaiveDate>,
    pub days: Option<u32>,
    pub page_size: Option<usize>,
    pub page_token: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    pub count: usize,
    pub events: Vec<Value>,
    pub next_page_token: Option<String>,
    pub is_caught_up: bool,
    pub window: Window,
    pub personalized: bool,
}

#[derive(Clone)]
pub struct FeedService {
    events: EventStore,
    series: SeriesStore,
    bundler: Bundler,
    profiles: ProfileBuilder,
    ranker: Ranker,
    tz: Tz,
}

impl FeedService {
    pub fn new(
        events: EventStore,
        series: SeriesStore,
        bundler: Bundler,
        profiles: ProfileBuilder,
        ranker: Ranker,
        tz: Tz,
    ) -> Self {
        Self {
            events,
            series,
            bundler,
            profiles,
            ranker,
            tz,
        }
    }

    pub async fn feed<R: Rng>(
        &self,
        query: &FeedQuery,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<FeedPage, TidepoolError> {
        let days = match query.days {
            None => 1,
            Some(d) if (1..=FEED_DAYS_MAX).contains(&d) => d,
            Some(d) => {
                return Err(TidepoolError::validation(format!(
                    "days must be between 1 and {FEED_DAYS_MAX}, got {d}"
                )))
            }
        };
        let page_size = match query.page_size {
            None => FEED_PAGE_SIZE_DEFAULT,
            Some(n) if (1..=FEED_PAGE_SIZE_MAX).contains(&n) => n,
            Some(n) => {
                return Err(TidepoolError::validation(format!(
                    "pageSize must be between 1 and {FEED_PAGE_SIZE_MAX}, got {n}"
                )))
            }
        };
        if query.tags.len() > FEED_TAGS_MAX {
            return Err(TidepoolError::validation(format!(
                "at most {FEED_TAGS_MAX} tags, got {}",
                query.tags.len()
            )));
        }

        let start_date = query
            .start
            .unwrap_or_else(|| now.with_timezone(&self.tz).date_naive());
        let window = Window::days_from(start_date, days, self.tz);

        // Candidates: events plus series visible in the window.
        let tag_filter = (!query.tags.is_empty()).then_some(query.tags.as_slice());
        let events = self
            .events
            .events_in_window(window, tag_filter)
            .await
            .map_err(TidepoolError::Anyhow)?;
        let mut series = self
            .series
            .series_in_window(window)
            .await
            .map_err(TidepoolError::Anyhow)?;
        if let Some(tags) = tag_filter {
            series.retain(|s| s.tags.iter().any(|t| tags.contains(t)));
        }

        // Series fold into per-user category bundles; each candidate carries
        // its engagement stats so bundles can sum them.
        let series_candidates: Vec<_> = series
            .into_iter()
            .map(|s| (s, ContentStats::default()))
            .collect();
        let (bundles, ungrouped) = match &query.user_id {
            Some(user_id) => self
                .bundler
                .bundle_series(user_id, series_candidates, window)
                .await
                .map_err(TidepoolError::Anyhow)?,
            None => (Vec::new(), series_candidates),
        };

        let mut candidates: Vec<ContentItem> = Vec::new();
        candidates.extend(
            events
                .into_iter()
                .map(|e| ContentItem::Event(Box::new(e), ContentStats::default())),
        );
        candidates.extend(
            ungrouped
                .into_iter()
                .map(|(s, stats)| ContentItem::Series(Box::new(s), stats)),
        );
        candidates.extend(bundles);

        // Profile lookup; any failure degrades to the chronological feed.
        let profile = match &query.user_id {
            Some(user_id) => match self.profiles.build_user_profile(user_id).await {
                Ok(profile) => Some(profile),
                Err(e) => {
                    warn!(user_id, error = %e, "profile build failed, serving unpersonalized");
                    None
                }
            },
            None => None,
        };
        let personalized = Ranker::can_personalize(profile.as_ref());

        let mut ranked = self.ranker.rank(candidates, profile.as_ref(), now, self.tz);
        if personalized {
            ranked = apply_exploration_mix(ranked, self.ranker.exploit_ratio, rng);
        }

        let (page, next_page_token) = paginate(&ranked, query.page_token.as_deref(), page_size)?;
        let events: Vec<Value> = page.iter().map(render_item).collect();

        Ok(FeedPage {
            count: events.len(),
            events,
            is_caught_up: next_page_token.is_none(),
            next_page_token,
            window,
            personalized,
        })
    }
}

/// Flatten a scored item into its document shape plus score fields.
fn render_item(scored: &crate::ranker::ScoredItem) -> Value {
    let mut doc = match &scored.item {
        ContentItem::Event(event, _) => serde_json::to_value(event).unwrap_or(Value::Null),
        ContentItem::Series(series, _) => serde_json::to_value(series).unwrap_or(Value::Null),
        ContentItem::Bundle(bundle) => serde_json::to_value(bundle).unwrap_or(Value::Null),
    };
    if let Some(obj) = doc.as_object_mut() {
        obj.insert(
            "contentType".to_string(),
            Value::String(scored.item.content_type().to_string()),
        );
        obj.insert(
            "score".to_string(),
            serde_json::json!(scored.score),
        );
    }
    doc
}
