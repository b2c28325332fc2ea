//! Ingest runner. Drives the phased pipeline for a configured source over a
//! chunked window and prints the aggregated stats. Exit code 0 on success,
//! 1 on fatal error.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ai_client::OpenAi;
use tidepool_common::{Config, Window};
use tidepool_ingest::{
    CalendarAdapter, CategoryAssigner, ClassifierGateway, ClaudeCategoryModel, ClaudeTagModel,
    FixtureAdapter, IngestDeps, Ingestor, SourceAdapter,
};
use tidepool_store::{
    CategoryStore, DocumentStore, EventStore, MemoryStore, ProposalStore, SeriesStore,
};

#[derive(Parser)]
#[command(name = "tidepool-ingest", about = "Run the tidepool ingest pipeline for a source")]
struct Cli {
    /// Source to ingest: "fixture" or a calendar id.
    #[arg(long, default_value = "fixture")]
    source: String,

    /// Window start date (local, display time zone). Defaults to today.
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Window span in days.
    #[arg(long, default_value_t = 7)]
    days: u32,

    /// Days per chunk. Defaults to the adapter's preference.
    #[arg(long)]
    chunk_days: Option<i64>,

    /// Re-classify even when the source item is unchanged.
    #[arg(long)]
    force_refresh: bool,

    /// Calendar API base URL (calendar sources only).
    #[arg(long, default_value = "https://www.googleapis.com/calendar/v3")]
    calendar_api: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    if let Err(e) = run(Cli::parse()).await {
        tracing::error!(error = %e, "ingest run failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::ingest_from_env();
    config.log_redacted();

    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let events = EventStore::new(store.clone());
    let series = SeriesStore::new(store.clone());
    let categories = CategoryStore::new(store.clone());
    let proposals = ProposalStore::new(store.clone());

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
        categories,
        series.clone(),
        events.clone(),
    );

    let ingestor = Ingestor::new(IngestDeps {
        events,
        series,
        proposals,
        gateway,
        assigner,
    });

    let now = Utc::now();
    let adapter: Box<dyn SourceAdapter> = if cli.source == "fixture" {
        Box::new(FixtureAdapter::demo(now))
    } else {
        let api_key = std::env::var("CALENDAR_API_KEY")
            .context("CALENDAR_API_KEY is required for calendar sources")?;
        Box::new(CalendarAdapter::new(
            format!("cal-{}", cli.source),
            cli.calendar_api.clone(),
            cli.source.clone(),
            api_key,
            config.display_timezone.to_string(),
            cli.source.clone(),
        ))
    };

    let start_date = cli
        .start
        .unwrap_or_else(|| now.with_timezone(&config.display_timezone).date_naive());
    let window = Window::days_from(start_date, cli.days.max(1), config.display_timezone);
    let chunk_days = cli.chunk_days.unwrap_or_else(|| adapter.chunk_days());

    let stats = ingestor
        .run_chunked(adapter.as_ref(), window, chunk_days, cli.force_refresh, now)
        .await?;

    println!("{stats}");
    Ok(())
}
