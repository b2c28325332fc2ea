//! The source-adapter seam: fetch raw items for a time window from a
//! pluggable backend and normalize each into the canonical event shape plus
//! host context. Adapters never talk to the stores.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use tidepool_common::slug::slugify;
use tidepool_common::types::CanonicalEvent;
use tidepool_common::Window;

/// What span of time to fetch. `Default` is adapter-defined lookback plus
/// lookahead.
#[derive(Debug, Clone, Copy)]
pub enum FetchWindow {
    /// A single local calendar date.
    TargetDate(NaiveDate),
    /// Explicit half-open UTC range.
    Range(Window),
    Default,
}

/// One raw item as fetched, before normalization. `raw` is kept opaque and
/// stored alongside the canonical event as an audit snapshot.
#[derive(Debug, Clone)]
pub struct RawEventPayload {
    pub source_id: String,
    pub source_event_id: String,
    pub fetched_at: DateTime<Utc>,
    pub raw: Value,
}

/// Host identity attached to a normalized event. `host_id_seed` is stable
/// for a given organizer on a given source, so recurring events land in the
/// same host bucket.
#[derive(Debug, Clone)]
pub struct HostContext {
    pub host_id_seed: String,
    pub host_name: String,
    pub organizer: Option<String>,
}

impl HostContext {
    /// Prefer the declared organizer, fall back to the calendar/feed label,
    /// fall back to a stable slug of the source id.
    pub fn derive(organizer: Option<&str>, label: Option<&str>, source_id: &str) -> Self {
        let organizer = organizer.map(str::trim).filter(|s| !s.is_empty());
        let label = label.map(str::trim).filter(|s| !s.is_empty());

        match (organizer, label) {
            (Some(org), _) => Self {
                host_id_seed: format!("{source_id}:{}", seed_slug(org)),
                host_name: org.to_string(),
                organizer: Some(org.to_string()),
            },
            (None, Some(label)) => Self {
                host_id_seed: format!("{source_id}:{}", seed_slug(label)),
                host_name: label.to_string(),
                organizer: None,
            },
            (None, None) => Self {
                host_id_seed: format!("{source_id}:{}", seed_slug(source_id)),
                host_name: source_id.to_string(),
                organizer: None,
            },
        }
    }
}

/// Seed slugs must never be empty; short names fall through slugify's
/// minimum length, so keep a raw-lowercase fallback.
fn seed_slug(name: &str) -> String {
    let slug = slugify(name);
    if slug.is_empty() {
        name.to_lowercase().replace(char::is_whitespace, "-")
    } else {
        slug
    }
}

/// The result of normalizing one payload.
#[derive(Debug, Clone)]
pub struct NormalizedEvent {
    pub event: CanonicalEvent,
    pub raw_snapshot: Value,
    pub host: HostContext,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &str;

    /// Days per ingest chunk for this adapter family.
    fn chunk_days(&self) -> i64 {
        7
    }

    async fn fetch_raw_events(&self, window: &FetchWindow) -> Result<Vec<RawEventPayload>>;

    /// Pure transformation; a failure here skips the one payload.
    fn normalize(&self, payload: &RawEventPayload) -> Result<NormalizedEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_context_prefers_organizer() {
        let ctx = HostContext::derive(Some("Parks Dept"), Some("City Calendar"), "s1");
        assert_eq!(ctx.host_name, "Parks Dept");
        assert_eq!(ctx.host_id_seed, "s1:parks-dept");
        assert_eq!(ctx.organizer.as_deref(), Some("Parks Dept"));
    }

    #[test]
    fn host_context_falls_back_to_label() {
        let ctx = HostContext::derive(None, Some("City Calendar"), "s1");
        assert_eq!(ctx.host_name, "City Calendar");
        assert_eq!(ctx.host_id_seed, "s1:city-calendar");
        assert!(ctx.organizer.is_none());
    }

    #[test]
    fn host_context_falls_back_to_source() {
        let ctx = HostContext::derive(None, None, "community-cal");
        assert_eq!(ctx.host_id_seed, "community-cal:community-cal");
    }

    #[test]
    fn same_organizer_same_seed() {
        let a = HostContext::derive(Some("Parks Dept"), None, "s1");
        let b = HostContext::derive(Some("Parks Dept"), Some("other label"), "s1");
        assert_eq!(a.host_id_seed, b.host_id_seed);
    }

    #[test]
    fn blank_organizer_is_ignored() {
        let ctx = HostContext::derive(Some("  "), Some("Label"), "s1");
        assert_eq!(ctx.host_name, "Label");
    }
}
