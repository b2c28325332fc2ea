//! The serving side: derived user profiles, the multi-signal ranker, per-user
//! category bundles, interaction recording, and pinned events.

pub mod bundler;
pub mod feed;
pub mod interactions;
pub mod pagination;
pub mod pinned;
pub mod profile;
pub mod ranker;

pub use bundler::Bundler;
pub use feed::{FeedPage, FeedQuery, FeedService};
pub use interactions::{IncomingInteraction, InteractionService};
pub use pagination::paginate;
pub use pinned::{PinnedEventsService, PinnedPage, PinnedQuery};
pub use profile::{ProfileBuilder, PERSONALIZATION_THRESHOLD};
pub use ranker::{RankWeights, Ranker, ScoredItem};
