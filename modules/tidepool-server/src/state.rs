use std::sync::Arc;

use chrono_tz::Tz;

use tidepool_feed::{FeedService, InteractionService, PinnedEventsService};
use tidepool_ingest::{Ingestor, SourceAdapter};
use tidepool_store::ProposalStore;

pub struct AppState {
    pub api_key: String,
    pub display_timezone: Tz,
    pub feed: FeedService,
    pub interactions: InteractionService,
    pub pinned: PinnedEventsService,
    pub proposals: ProposalStore,
    pub ingestor: Arc<Ingestor>,
    pub sources: Vec<Arc<dyn SourceAdapter>>,
    /// Shown by `/status`.
    pub store_backend: &'static str,
}
