use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use makerfeed_common::{file_config, Config};
use makerfeed_ingest::feed::HttpFeedSource;
use makerfeed_ingest::search::{NoopSearcher, SerperSearcher, WebSearcher};
use makerfeed_ingest::{IngestPipeline, MatcherSettings, PgStore, ProfileCache, ProfileMatcher};

#[derive(Parser)]
#[command(name = "makerfeed", about = "Launch feed ingestion and maker profile enrichment")]
struct Cli {
    /// Optional TOML config layered over the environment
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest every configured category
    Run,
    /// Ingest a single category
    RunCategory { category: String },
    /// Fetch a category feed and show what would be ingested
    Preview { category: String },
    /// Look up profiles for stored records that were never checked
    Enrich,
    /// Inspect or maintain the profile cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Configured categories and stored record counts
    Status,
}

#[derive(Subcommand)]
enum CacheAction {
    Stats,
    Cleanup,
    Clear,
    Entries,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env().add_directive("makerfeed=info".parse()?);
    if cli.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config = Config::from_env()?;
    if let Some(path) = &cli.config {
        info!(config = %path.display(), "Loading config file");
        let file = file_config::load_config(path)?;
        config = config.with_file(&file)?;
    }

    let store = Arc::new(
        PgStore::connect(&config.database_url)
            .await
            .context("Failed to connect to Postgres")?,
    );
    store.migrate().await.context("Failed to run migrations")?;

    let searcher: Arc<dyn WebSearcher> = match &config.serper_api_key {
        Some(key) => Arc::new(SerperSearcher::new(key)?),
        None => {
            warn!("SERPER_API_KEY not set, profile lookups will find nothing");
            Arc::new(NoopSearcher)
        }
    };

    let cache = Arc::new(ProfileCache::new(
        config.cache_ttl(),
        config.max_cache_size,
        store.clone(),
    ));
    let settings = MatcherSettings::builder()
        .profile_site(config.profile_site.clone())
        .max_results(config.max_results)
        .query_delay(config.query_delay())
        .build();
    let matcher = Arc::new(ProfileMatcher::new(searcher, cache.clone(), settings));

    let feeds = Arc::new(HttpFeedSource::new(&config.feed_base_url)?);
    let pipeline = IngestPipeline::new(feeds, store.clone(), matcher, config.categories.clone());

    match cli.command {
        Command::Run => {
            let summary = pipeline.run_all().await?;
            info!(%summary, "Run finished");
            emit(&summary)
        }
        Command::RunCategory { category } => emit(&pipeline.run_category(&category).await?),
        Command::Preview { category } => emit(&pipeline.preview_category(&category).await?),
        Command::Enrich => emit(&pipeline.enrich_pending().await?),
        Command::Status => emit(&pipeline.status().await?),
        Command::Cache { action } => match action {
            CacheAction::Stats => emit(&cache.stats().await),
            CacheAction::Cleanup => emit(&cache.cleanup().await),
            CacheAction::Clear => emit(&cache.clear().await),
            CacheAction::Entries => emit(&cache.entries().await),
        },
    }
}

fn emit<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
