//! Derived user profiles: embedding centroid, content-type affinity,
//! time-of-day histogram, and engagement style, all computed from the most
//! recent interactions at read time.

use std::collections::HashMap;

use anyhow::Result;
use futures::future::join_all;

use tidepool_common::types::{
    ContentType, EngagementStyle, UserInteraction, UserProfile,
};
use tidepool_common::util::mean_vector;
use tidepool_store::{EventStore, InteractionStore, SeriesStore};

/// Users below this interaction count get the chronological feed.
pub const PERSONALIZATION_THRESHOLD: usize = 20;
/// Interactions considered when deriving a profile.
pub const PROFILE_INTERACTION_LIMIT: usize = 200;
/// Vector loads are issued in chunks of this size.
const VECTOR_CHUNK: usize = 10;

#[derive(Clone)]
pub struct ProfileBuilder {
    interactions: InteractionStore,
    events: EventStore,
    series: SeriesStore,
}

impl ProfileBuilder {
    pub fn new(interactions: InteractionStore, events: EventStore, series: SeriesStore) -> Self {
        Self {
            interactions,
            events,
            series,
        }
    }

    pub async fn has_enough_data(&self, user_id: &str) -> Result<bool> {
        let recent = self
            .interactions
            .recent_for_user(user_id, PERSONALIZATION_THRESHOLD)
            .await?;
        Ok(recent.len() >= PERSONALIZATION_THRESHOLD)
    }

    pub async fn build_user_profile(&self, user_id: &str) -> Result<UserProfile> {
        let recent = self
            .interactions
            .recent_for_user(user_id, PROFILE_INTERACTION_LIMIT)
            .await?;

        let embedding = self.positive_centroid(&recent).await?;
        let content_type_affinity = affinity(&recent);
        let time_of_day_patterns = time_histogram(&recent);
        let engagement_style = engagement(&recent);
        let last_active_at = recent.first().map(|i| i.timestamp);

        Ok(UserProfile {
            user_id: user_id.to_string(),
            embedding,
            content_type_affinity,
            time_of_day_patterns,
            engagement_style,
            total_interactions: recent.len(),
            last_active_at,
        })
    }

    /// Mean of the vectors behind positively-acted-on content, loaded in
    /// chunks to bound concurrent store reads.
    async fn positive_centroid(&self, recent: &[UserInteraction]) -> Result<Option<Vec<f32>>> {
        let targets: Vec<(&str, ContentType)> = recent
            .iter()
            .filter(|i| i.action.is_positive())
            .map(|i| (i.content_id.as_str(), i.content_type))
            .collect();

        let mut vectors: Vec<Vec<f32>> = Vec::new();
        for chunk in targets.chunks(VECTOR_CHUNK) {
            let loads = chunk.iter().map(|(content_id, content_type)| async move {
                match content_type {
                    ContentType::Event => self
                        .events
                        .get_event(content_id)
                        .await
                        .ok()
                        .flatten()
                        .and_then(|e| e.vector),
                    ContentType::EventSeries => self
                        .series
                        .get_series(content_id)
                        .await
                        .ok()
                        .flatten()
                        .and_then(|s| s.vector),
                    _ => None,
                }
            });
            vectors.extend(join_all(loads).await.into_iter().flatten());
        }

        Ok(mean_vector(&vectors))
    }
}

/// Per content type: sum of action weights, normalized by the count for that
/// type and scaled by 1/10, clamped to [-1, 1].
fn affinity(recent: &[UserInteraction]) -> HashMap<ContentType, f64> {
    let mut sums: HashMap<ContentType, (f64, usize)> = HashMap::new();
    for interaction in recent {
        let entry = sums.entry(interaction.content_type).or_insert((0.0, 0));
        entry.0 += interaction.action.weight();
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(content_type, (total, count))| {
            let score = (total / count as f64 / 10.0).clamp(-1.0, 1.0);
            (content_type, score)
        })
        .collect()
}

fn time_histogram(recent: &[UserInteraction]) -> HashMap<tidepool_common::TimeOfDay, u32> {
    let mut histogram = HashMap::new();
    for interaction in recent {
        *histogram.entry(interaction.context.time_of_day).or_insert(0) += 1;
    }
    histogram
}

fn engagement(recent: &[UserInteraction]) -> EngagementStyle {
    let dwells: Vec<f64> = recent.iter().filter_map(|i| i.dwell_time).collect();
    let avg_dwell_time = if dwells.is_empty() {
        0.0
    } else {
        dwells.iter().sum::<f64>() / dwells.len() as f64
    };

    let avg_position = if recent.is_empty() {
        0.0
    } else {
        recent.iter().map(|i| i.context.position as f64).sum::<f64>() / recent.len() as f64
    };

    EngagementStyle {
        is_deep_reader: avg_dwell_time > 10.0,
        quick_browser: avg_dwell_time < 3.0,
        scrolls_deep: avg_position > 20.0,
        avg_dwell_time,
        avg_position,
    }
}
