//! Canonical records as they live in the document store, plus the shared
//! content capability surface the ranker reads. Stored field names are
//! camelCase to match the persisted layout; timestamps are UTC.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::slug::slugify;
use crate::util::hash12;

// --- Caps shared by the aggregators ---

/// Breadcrumb audit chains are append-only but bounded.
pub const BREADCRUMB_CAP: usize = 20;
/// Rolling window of upcoming occurrences per series.
pub const OCCURRENCE_CAP: usize = 20;
/// Occurrences older than this many hours are evicted on any series write.
pub const OCCURRENCE_GRACE_HOURS: i64 = 24;
/// Category change-log retention.
pub const CHANGELOG_CAP: usize = 25;
/// Category tag union cap.
pub const CATEGORY_TAG_CAP: usize = 50;
/// Category sample-title window.
pub const SAMPLE_TITLE_CAP: usize = 8;
/// Sample events retained per tag proposal.
pub const PROPOSAL_SAMPLE_CAP: usize = 5;
/// Tags recorded as proposals per event.
pub const PROPOSAL_TAG_CAP: usize = 10;

// --- Identity builders ---

/// Canonical event id: `{sourceId}:{sourceEventId}`.
pub fn event_doc_id(source_id: &str, source_event_id: &str) -> String {
    format!("{source_id}:{source_event_id}")
}

/// Host id from the deterministic host seed.
pub fn build_host_id(seed: &str) -> String {
    format!("host:{}", hash12(seed))
}

/// Series id: `{hostId}__{slug(title)}`, capped at 200 chars with a hashed
/// tail so distinct long titles stay distinct.
pub fn build_series_id(host_id: &str, title: &str) -> String {
    let mut slug = slugify(title);
    if slug.is_empty() {
        slug = "untitled-event".to_string();
    }
    let full = format!("{host_id}__{slug}");
    if full.len() <= 200 {
        return full;
    }
    let mut cut = 187;
    while !full.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}-{}", &full[..cut], hash12(&full))
}

/// Category id: `category:{hash12(hostId:name-lowercased)}`.
pub fn build_category_id(host_id: &str, name: &str) -> String {
    format!("category:{}", hash12(&format!("{host_id}:{}", name.to_lowercase())))
}

// --- Canonical event ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    pub source_id: String,
    pub source_event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Venue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_location: Option<String>,
}

/// One link in the append-only fetch audit chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breadcrumb {
    #[serde(rename = "type")]
    pub crumb_type: String,
    pub source_id: String,
    pub source_event_id: String,
    pub fetched_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateSource {
    Llm,
    Embedding,
    Keyword,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagCandidate {
    pub tag: String,
    /// In [0, 1].
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    pub source: CandidateSource,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub tags: Vec<String>,
    pub candidates: Vec<TagCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEvent {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_all_day: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue: Option<Venue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organizer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Sorted-unique slugs, stop-word filtered.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    /// Dense vector; length equals the deployment's embedding dimension.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(default)]
    pub breadcrumbs: Vec<Breadcrumb>,
    pub source: EventSource,
    pub last_fetched_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_category_name: Option<String>,
}

impl CanonicalEvent {
    pub fn doc_id(&self) -> String {
        event_doc_id(&self.source.source_id, &self.source.source_event_id)
    }
}

// --- Event series ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesHost {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organizer: Option<String>,
    #[serde(default)]
    pub source_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Occurrence {
    pub event_id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesStats {
    pub upcoming_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSeries {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Always `"event-series"`.
    pub content_type: ContentType,
    pub host: SeriesHost,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub breadcrumbs: Vec<Breadcrumb>,
    pub source: EventSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue: Option<Venue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_slug: Option<String>,
    /// Ascending by startTime, `(startTime, eventId)` tie-break, capped.
    #[serde(default)]
    pub upcoming_occurrences: Vec<Occurrence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_occurrence: Option<Occurrence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    pub stats: SeriesStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// --- Event category ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogEntry {
    pub version: u32,
    #[serde(default)]
    pub added_series_ids: Vec<String>,
    #[serde(default)]
    pub added_series_titles: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCategory {
    pub id: String,
    pub host_id: String,
    pub name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub sample_series_titles: Vec<String>,
    #[serde(default)]
    pub series_ids: Vec<String>,
    /// Monotonic, >= 1. Bumped exactly when a series new to the category
    /// is added, in the same transaction as the changeLog append.
    pub version: u32,
    #[serde(default)]
    pub change_log: Vec<ChangeLogEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// --- Interactions ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    Event,
    EventSeries,
    EventCategoryBundle,
    FlashOffer,
    Poll,
    Request,
    Photo,
    Announcement,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::EventSeries => "event-series",
            Self::EventCategoryBundle => "event-category-bundle",
            Self::FlashOffer => "flash-offer",
            Self::Poll => "poll",
            Self::Request => "request",
            Self::Photo => "photo",
            Self::Announcement => "announcement",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InteractionAction {
    Viewed,
    Liked,
    Shared,
    Bookmarked,
    Dismissed,
    NotInterested,
    Attended,
    Engaged,
    Commented,
}

impl InteractionAction {
    /// Per-action scalar fed into content-type affinity.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Viewed => 0.1,
            Self::Liked => 3.0,
            Self::Shared => 5.0,
            Self::Bookmarked => 4.0,
            Self::Dismissed => -2.0,
            Self::NotInterested => -5.0,
            Self::Attended => 10.0,
            Self::Engaged => 4.0,
            Self::Commented => 4.0,
        }
    }

    /// Actions whose content vectors contribute to the embedding centroid.
    pub fn is_positive(&self) -> bool {
        matches!(
            self,
            Self::Liked | Self::Bookmarked | Self::Shared | Self::Attended | Self::Engaged
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionContext {
    pub position: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub time_of_day: crate::time::TimeOfDay,
    pub day_of_week: crate::time::DayOfWeek,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInteraction {
    pub id: String,
    pub user_id: String,
    pub content_id: String,
    pub content_type: ContentType,
    pub action: InteractionAction,
    /// Seconds spent on the content, when the client measured it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dwell_time: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub context: InteractionContext,
    #[serde(default)]
    pub content_tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

// --- User profile (derived) ---

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementStyle {
    pub is_deep_reader: bool,
    pub quick_browser: bool,
    pub scrolls_deep: bool,
    pub avg_dwell_time: f64,
    pub avg_position: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    /// Centroid of positive-action content vectors.
    pub embedding: Option<Vec<f32>>,
    /// Per content type, scaled to [-1, 1].
    pub content_type_affinity: HashMap<ContentType, f64>,
    pub time_of_day_patterns: HashMap<crate::time::TimeOfDay, u32>,
    pub engagement_style: EngagementStyle,
    pub total_interactions: usize,
    pub last_active_at: Option<DateTime<Utc>>,
}

// --- Pins and bundle state ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinnedEvent {
    pub event_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub event_start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_end_time: Option<DateTime<Utc>>,
    pub content_type: ContentType,
    pub source: EventSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    pub pinned_at: DateTime<Utc>,
    /// True for occurrences materialized from a pinned series.
    #[serde(default)]
    pub derived: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinnedSeries {
    pub series_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub source: EventSource,
    pub pinned_at: DateTime<Utc>,
}

/// Per-user, per-category read marker driving the "what's new" diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCategoryBundleState {
    pub user_id: String,
    pub category_id: String,
    pub last_seen_version: u32,
    pub last_seen_at: DateTime<Utc>,
}

// --- Ranker capability surface ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStats {
    pub views: u64,
    pub likes: u64,
    pub shares: u64,
    pub bookmarks: u64,
}

impl ContentStats {
    pub fn sum(items: impl IntoIterator<Item = ContentStats>) -> ContentStats {
        items.into_iter().fold(ContentStats::default(), |acc, s| ContentStats {
            views: acc.views + s.views,
            likes: acc.likes + s.likes,
            shares: acc.shares + s.shares,
            bookmarks: acc.bookmarks + s.bookmarks,
        })
    }
}

/// The six fields the ranker reads off every candidate.
pub trait Scorable {
    fn id(&self) -> &str;
    fn title(&self) -> &str;
    fn content_type(&self) -> ContentType;
    fn tags(&self) -> &[String];
    fn embedding(&self) -> Option<&[f32]>;
    fn created_at(&self) -> DateTime<Utc>;
    fn stats(&self) -> ContentStats;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleStateRef {
    pub category_id: String,
    pub version: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleInfo {
    pub category_id: String,
    pub category_name: String,
    pub host_id: String,
    pub host_name: String,
    pub series_ids: Vec<String>,
    pub new_series_ids: Vec<String>,
    /// What the client should render: the new series, or the full set on
    /// first sight of the category.
    pub display_series: Vec<String>,
    pub total_series_count: usize,
    pub bundle_state: BundleStateRef,
}

/// Synthetic feed item standing in for "new items in category X".
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleItem {
    pub id: String,
    pub title: String,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub stats: ContentStats,
    pub bundle: BundleInfo,
}

/// Tagged candidate variant fed to the ranker. Each variant carries its own
/// engagement stats; edges between records stay ids, never pointers.
#[derive(Debug, Clone)]
pub enum ContentItem {
    Event(Box<CanonicalEvent>, ContentStats),
    Series(Box<EventSeries>, ContentStats),
    Bundle(Box<BundleItem>),
}

impl Scorable for ContentItem {
    fn id(&self) -> &str {
        match self {
            Self::Event(e, _) => &e.id,
            Self::Series(s, _) => &s.id,
            Self::Bundle(b) => &b.id,
        }
    }

    fn title(&self) -> &str {
        match self {
            Self::Event(e, _) => &e.title,
            Self::Series(s, _) => &s.title,
            Self::Bundle(b) => &b.title,
        }
    }

    fn content_type(&self) -> ContentType {
        match self {
            Self::Event(..) => ContentType::Event,
            Self::Series(..) => ContentType::EventSeries,
            Self::Bundle(..) => ContentType::EventCategoryBundle,
        }
    }

    fn tags(&self) -> &[String] {
        match self {
            Self::Event(e, _) => &e.tags,
            Self::Series(s, _) => &s.tags,
            Self::Bundle(b) => &b.tags,
        }
    }

    fn embedding(&self) -> Option<&[f32]> {
        match self {
            Self::Event(e, _) => e.vector.as_deref(),
            Self::Series(s, _) => s.vector.as_deref(),
            Self::Bundle(b) => b.embedding.as_deref(),
        }
    }

    fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Event(e, _) => e.created_at,
            Self::Series(s, _) => s.created_at,
            Self::Bundle(b) => b.created_at,
        }
    }

    fn stats(&self) -> ContentStats {
        match self {
            Self::Event(_, s) | Self::Series(_, s) => *s,
            Self::Bundle(b) => b.stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_doc_id_reverses_source() {
        assert_eq!(event_doc_id("s1", "e1"), "s1:e1");
    }

    #[test]
    fn series_id_shape() {
        let id = build_series_id("host:abc123def456", "Community Yoga in the Park");
        assert_eq!(id, "host:abc123def456__community-yoga-in-the-park");
    }

    #[test]
    fn series_id_untitled_fallback() {
        let id = build_series_id("host:abc123def456", "!!");
        assert_eq!(id, "host:abc123def456__untitled-event");
    }

    #[test]
    fn series_id_long_titles_tail_hashed() {
        let long_title = "a ".repeat(300);
        let id = build_series_id("host:abc123def456", &long_title);
        assert_eq!(id.len(), 200);

        let other = build_series_id("host:abc123def456", &format!("{long_title} b"));
        assert_eq!(other.len(), 200);
        assert_ne!(id, other, "distinct long titles must not collide");
    }

    #[test]
    fn category_id_case_insensitive() {
        let a = build_category_id("host:x", "Yoga Classes");
        let b = build_category_id("host:x", "yoga classes");
        assert_eq!(a, b);
        assert!(a.starts_with("category:"));
    }

    #[test]
    fn action_weights_match_policy() {
        assert_eq!(InteractionAction::Viewed.weight(), 0.1);
        assert_eq!(InteractionAction::Attended.weight(), 10.0);
        assert_eq!(InteractionAction::NotInterested.weight(), -5.0);
        assert!(InteractionAction::Bookmarked.is_positive());
        assert!(!InteractionAction::Dismissed.is_positive());
        assert!(!InteractionAction::Viewed.is_positive());
    }

    #[test]
    fn content_type_wire_names() {
        let json = serde_json::to_string(&ContentType::EventCategoryBundle).unwrap();
        assert_eq!(json, "\"event-category-bundle\"");
        let back: ContentType = serde_json::from_str("\"event-series\"").unwrap();
        assert_eq!(back, ContentType::EventSeries);
    }

    #[test]
    fn action_wire_names() {
        let json = serde_json::to_string(&InteractionAction::NotInterested).unwrap();
        assert_eq!(json, "\"not-interested\"");
    }

    #[test]
    fn stats_sum() {
        let total = ContentStats::sum([
            ContentStats { views: 1, likes: 2, shares: 0, bookmarks: 1 },
            ContentStats { views: 3, likes: 0, shares: 2, bookmarks: 0 },
        ]);
        assert_eq!(total, ContentStats { views: 4, likes: 2, shares: 2, bookmarks: 1 });
    }
}
