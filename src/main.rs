use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use std::{fs, path::Path};
use tracing_subscriber::EnvFilter;

use r2_broker::cli::{self, Broker};
use r2_broker::config::{Args, DEFAULT_SNAPSHOT_LIFETIME_SECS, Settings};
use r2_broker::crypto::CredentialCipher;
use r2_broker::db;
use r2_broker::services::listing_cache::ListingCache;
use r2_broker::services::rate_limit::RateLimiter;
use r2_broker::services::snapshot::SnapshotStore;
use r2_broker::services::store_client::StoreClient;

/// Timeout applied to every remote store call.
const REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let args = Args::parse();
    let settings = Settings::from_env_and_args(&args)?;

    tracing::info!("starting r2-broker with config: {}", settings.redacted());

    // --- Ensure cache directory exists ---
    if !settings.cache_dir.exists() {
        fs::create_dir_all(&settings.cache_dir)?;
        tracing::info!("created cache directory at {}", settings.cache_dir.display());
    }

    // --- Initialize SQLite connection ---
    let db_path = settings
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("created missing directory {:?}", parent);
        }
    }

    let pool = db::connect(&settings.database_url).await?;

    // --- Handle migration mode ---
    if args.migrate {
        db::run_migrations(&pool).await?;
        tracing::info!("database migration complete");
        return Ok(());
    }

    let Some(command) = args.command else {
        anyhow::bail!("no command given; run with --help for the available commands");
    };

    // --- Initialize core services ---
    let cipher = CredentialCipher::new(&settings.deployment_secret);
    let credentials = settings.credentials.resolve(&cipher)?;
    let cache = ListingCache::new(&settings.cache_dir);
    let client = StoreClient::new(&settings, &credentials, cache.clone(), REMOTE_TIMEOUT)?;
    let snapshot = SnapshotStore::new(pool.clone(), DEFAULT_SNAPSHOT_LIFETIME_SECS);
    let limiter = RateLimiter::new(pool);

    let broker = Broker {
        settings,
        cipher,
        client,
        snapshot,
        cache,
        limiter,
    };

    let actor = std::env::var("R2_BROKER_ACTOR").unwrap_or_else(|_| "cli".into());
    cli::run(&broker, command, &actor).await
}
