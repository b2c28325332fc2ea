//! The behavioral ranker: six weighted sub-scores per candidate, an
//! explore/exploit mix with an explicit RNG, and a cold-start fallback to
//! chronological order.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rand::Rng;

use tidepool_common::types::{ContentItem, Scorable, UserProfile};
use tidepool_common::util::cosine_similarity;
use tidepool_common::TimeOfDay;

use crate::profile::PERSONALIZATION_THRESHOLD;

/// Signal weights. Defaults are the tuned production values; callers may
/// override but the sum should stay 1.0.
#[derive(Debug, Clone, Copy)]
pub struct RankWeights {
    pub topic: f64,
    pub content_type: f64,
    pub time: f64,
    pub style: f64,
    pub recency: f64,
    pub popularity: f64,
}

impl Default for RankWeights {
    fn default() -> Self {
        Self {
            topic: 0.40,
            content_type: 0.25,
            time: 0.15,
            style: 0.10,
            recency: 0.05,
            popularity: 0.05,
        }
    }
}

/// Per-signal breakdown, kept for debugging and response metadata.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub topic: f64,
    pub content_type: f64,
    pub time: f64,
    pub style: f64,
    pub recency: f64,
    pub popularity: f64,
}

#[derive(Debug, Clone)]
pub struct ScoredItem {
    pub item: ContentItem,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, Copy)]
pub struct Ranker {
    weights: RankWeights,
    /// Fraction of the feed kept in ranked order by the exploration mix.
    pub exploit_ratio: f64,
}

impl Default for Ranker {
    fn default() -> Self {
        Self {
            weights: RankWeights::default(),
            exploit_ratio: 0.8,
        }
    }
}

impl Ranker {
    pub fn new(weights: RankWeights, exploit_ratio: f64) -> Self {
        Self {
            weights,
            exploit_ratio,
        }
    }

    /// True when the profile qualifies for behavioral ranking.
    pub fn can_personalize(profile: Option<&UserProfile>) -> bool {
        profile.is_some_and(|p| {
            p.total_interactions >= PERSONALIZATION_THRESHOLD && p.embedding.is_some()
        })
    }

    /// Score and sort candidates. Without a qualifying profile the feed is
    /// chronological (ascending createdAt) with zero scores.
    pub fn rank(
        &self,
        candidates: Vec<ContentItem>,
        profile: Option<&UserProfile>,
        now: DateTime<Utc>,
        tz: Tz,
    ) -> Vec<ScoredItem> {
        if !Self::can_personalize(profile) {
            let mut items: Vec<ScoredItem> = candidates
                .into_iter()
                .map(|item| ScoredItem {
                    item,
                    score: 0.0,
                    breakdown: ScoreBreakdown::default(),
                })
                .collect();
            items.sort_by(|a, b| {
                a.item
                    .created_at()
                    .cmp(&b.item.created_at())
                    .then_with(|| a.item.id().cmp(b.item.id()))
            });
            return items;
        }

        let profile = profile.expect("checked by can_personalize");
        let now_bucket = TimeOfDay::bucket(now, tz);

        let mut items: Vec<ScoredItem> = candidates
            .into_iter()
            .map(|item| {
                let breakdown = self.score_item(&item, profile, now, now_bucket);
                let score = self.weights.topic * breakdown.topic
                    + self.weights.content_type * breakdown.content_type
                    + self.weights.time * breakdown.time
                    + self.weights.style * breakdown.style
                    + self.weights.recency * breakdown.recency
                    + self.weights.popularity * breakdown.popularity;
                ScoredItem {
                    item,
                    score,
                    breakdown,
                }
            })
            .collect();

        items.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.item.id().cmp(b.item.id()))
        });
        items
    }

    fn score_item(
        &self,
        item: &ContentItem,
        profile: &UserProfile,
        now: DateTime<Utc>,
        now_bucket: TimeOfDay,
    ) -> ScoreBreakdown {
        // Topic: cosine against the profile centroid.
        let topic = match (item.embedding(), profile.embedding.as_deref()) {
            (Some(candidate), Some(centroid)) => {
                cosine_similarity(candidate, centroid).clamp(0.0, 1.0)
            }
            _ => 0.0,
        };

        // Content type: affinity rescaled from [-1, 1] to [0, 1].
        let content_type = profile
            .content_type_affinity
            .get(&item.content_type())
            .map(|a| (a + 1.0) / 2.0)
            .unwrap_or(0.5);

        // Time of day: share of the user's activity in the current bucket.
        let total: u32 = profile.time_of_day_patterns.values().sum();
        let time = if total == 0 {
            0.5
        } else {
            *profile.time_of_day_patterns.get(&now_bucket).unwrap_or(&0) as f64 / total as f64
        };

        // Style: long titles for deep readers, short for quick browsers.
        let title_len = item.title().chars().count() as f64;
        let style = if profile.engagement_style.is_deep_reader {
            (title_len / 200.0).min(1.0)
        } else if profile.engagement_style.quick_browser {
            (1.0 - title_len / 200.0).max(0.0)
        } else {
            0.5
        };

        // Recency: exponential decay over 24h of age.
        let age_hours = (now - item.created_at()).num_seconds() as f64 / 3600.0;
        let recency = (-age_hours / 24.0).exp().min(1.0);

        // Popularity: engagement per view, saturating at a 20% rate.
        let stats = item.stats();
        let popularity = if stats.views == 0 {
            0.0
        } else {
            let engagement =
                stats.likes as f64 + 2.0 * stats.shares as f64 + 1.5 * stats.bookmarks as f64;
            (engagement / stats.views as f64 / 0.2).min(1.0)
        };

        ScoreBreakdown {
            topic,
            content_type,
            time,
            style,
            recency,
            popularity,
        }
    }
}

/// Explore/exploit mix: keep the top `exploit` fraction, draw the remainder
/// from the tail in random order, and Fisher-Yates shuffle the union. The
/// RNG is explicit so tests can seed it.
pub fn apply_exploration_mix<R: Rng>(
    ranked: Vec<ScoredItem>,
    exploit_ratio: f64,
    rng: &mut R,
) -> Vec<ScoredItem> {
    let n = ranked.len();
    if n < 2 {
        return ranked;
    }
    let exploit_count = ((n as f64) * exploit_ratio.clamp(0.0, 1.0)).floor() as usize;

    let mut items = ranked;
    let mut tail: Vec<ScoredItem> = items.split_off(exploit_count);
    fisher_yates(&mut tail, rng);
    items.extend(tail.into_iter().take(n - exploit_count));

    fisher_yates(&mut items, rng);
    items
}

fn fisher_yates<T, R: Rng>(items: &mut [T], rng: &mut R) {
    for i in (1..items.len()).rev() {
        let j = rng.random_range(0..=i);
        items.swap(i, j);
    }
}
