//! Tidepool API server. Wires the in-process document store, the provider
//! clients, and the core services behind the HTTP surface.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ai_client::OpenAi;
use tidepool_common::Config;
use tidepool_feed::{
    Bundler, FeedService, InteractionService, PinnedEventsService, ProfileBuilder, Ranker,
};
use tidepool_ingest::{
    CalendarAdapter, CategoryAssigner, ClassifierGateway, ClaudeCategoryModel, ClaudeTagModel,
    FixtureAdapter, IngestDeps, Ingestor, SourceAdapter,
};
use tidepool_server::{build_router, AppState};
use tidepool_store::{
    BundleStateStore, CategoryStore, DocumentStore, EventStore, InteractionStore, MemoryStore,
    PinStore, ProposalStore, SeriesStore,
};

#[derive(Parser)]
#[command(name = "tidepool-server", about = "Tidepool community feed server")]
struct Cli {}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();
    let _cli = Cli::parse();

    let config = Config::from_env();
    config.log_redacted();

    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let events = EventStore::new(store.clone());
    let series = SeriesStore::new(store.clone());
    let categories = CategoryStore::new(store.clone());
    let proposals = ProposalStore::new(store.clone());
    let interactions = InteractionStore::new(store.clone());
    let pins = PinStore::new(store.clone());
    let bundle_states = BundleStateStore::new(store.clone());

    let embedder = OpenAi::new(&config.voyage_api_key, "voyage-3-large")
        .with_base_url("https://api.voyageai.com/v1");
    let gateway = ClassifierGateway::new(
        Arc::new(ClaudeTagModel::new(&config.anthropic_api_key)),
        Arc::new(embedder),
        Vec::new(),
        config.debug_classification,
    );
    let assigner = CategoryAssigner::new(
        Arc::new(ClaudeCategoryModel::new(&config.anthropic_api_key)),
        categories.clone(),
        series.clone(),
        events.clone(),
    );
    let ingestor = Arc::new(Ingestor::new(IngestDeps {
        events: events.clone(),
        series: series.clone(),
        proposals: proposals.clone(),
        gateway,
        assigner,
    }));

    // Configured sources: a real calendar when the env names one, the demo
    // fixture otherwise.
    let mut sources: Vec<Arc<dyn SourceAdapter>> = Vec::new();
    match (
        std::env::var("CALENDAR_ID").ok(),
        std::env::var("CALENDAR_API_KEY").ok(),
    ) {
        (Some(calendar_id), Some(api_key)) => {
            sources.push(Arc::new(CalendarAdapter::new(
                format!("cal-{calendar_id}"),
                std::env::var("CALENDAR_API_BASE")
                    .unwrap_or_else(|_| "https://www.googleapis.com/calendar/v3".to_string()),
                calendar_id.clone(),
                api_key,
                config.display_timezone.to_string(),
                calendar_id,
            )));
        }
        _ => {
            sources.push(Arc::new(FixtureAdapter::demo(chrono::Utc::now())));
        }
    }

    let pinned = PinnedEventsService::new(
        pins,
        events.clone(),
        series.clone(),
        config.display_timezone,
    );
    let profiles = ProfileBuilder::new(interactions.clone(), events.clone(), series.clone());
    let bundler = Bundler::new(categories, series.clone(), bundle_states.clone());
    let feed = FeedService::new(
        events,
        series,
        bundler,
        profiles,
        Ranker::default(),
        config.display_timezone,
    );
    let interaction_service =
        InteractionService::new(interactions, bundle_states, pinned.clone());

    let state = Arc::new(AppState {
        api_key: config.api_key.clone(),
        display_timezone: config.display_timezone,
        feed,
        interactions: interaction_service,
        pinned,
        proposals,
        ingestor,
        sources,
        store_backend: "memory",
    });

    let router = build_router(state);
    let addr = format!("{}:{}", config.web_host, config.web_port);
    tracing::info!(addr = %addr, "tidepool-server listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
