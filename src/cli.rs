//! Admin command surface: the thin glue the web storefront would otherwise
//! provide. Mutating commands pass through the rate limiter the same way the
//! upload UI does.

use anyhow::{Context as _, Result, bail};
use clap::Subcommand;
use std::path::PathBuf;
use tokio_util::io::ReaderStream;

use crate::config::{DEFAULT_LIST_CACHE_TTL_SECS, Settings};
use crate::crypto::CredentialCipher;
use crate::services::listing_cache::ListingCache;
use crate::services::rate_limit::{Operation, RateLimiter};
use crate::services::resolver::{AllowAll, Resolution, ResolutionCache, Resolver};
use crate::services::snapshot::SnapshotStore;
use crate::services::store_client::{MAX_UPLOAD_BYTES, StoreClient};

/// Uploads allowed per actor per hour.
const UPLOAD_LIMIT: u32 = 20;

/// Forced resyncs allowed per actor per hour.
const FORCE_SYNC_LIMIT: u32 = 5;

const RATE_WINDOW_SECS: u64 = 3600;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reconcile the local snapshot against the remote bucket
    Sync {
        /// Resync even if the snapshot is still fresh
        #[arg(long)]
        force: bool,
    },
    /// Search the snapshot by file name
    Search {
        term: String,
        /// Restrict to an exact folder path ("" for root)
        #[arg(long)]
        folder: Option<String>,
    },
    /// Print the folder tree derived from object keys
    Tree,
    /// List objects under a prefix (through the fast-tier cache)
    List {
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long, default_value_t = 100)]
        max_keys: usize,
    },
    /// Mint a presigned download URL
    Presign {
        key: String,
        /// Expiry in seconds (defaults to the configured expiration)
        #[arg(long)]
        expires: Option<u64>,
    },
    /// Resolve a file-pointer tag the way the storefront would
    Resolve {
        text: String,
        #[arg(long, default_value = "cli")]
        requester: String,
    },
    /// Upload a local file to the bucket
    Upload {
        file: PathBuf,
        key: String,
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Encrypt plaintext credentials for storage
    ///
    /// Reads R2_BROKER_PLAIN_ACCESS_KEY_ID and
    /// R2_BROKER_PLAIN_SECRET_ACCESS_KEY and prints their envelopes.
    EncryptCredentials,
}

/// Everything a command needs, assembled once in `main`.
pub struct Broker {
    pub settings: Settings,
    pub cipher: CredentialCipher,
    pub client: StoreClient,
    pub snapshot: SnapshotStore,
    pub cache: ListingCache,
    pub limiter: RateLimiter,
}

pub async fn run(broker: &Broker, command: Command, actor: &str) -> Result<()> {
    match command {
        Command::Sync { force } => {
            if force
                && !broker
                    .limiter
                    .check_and_increment(actor, Operation::ForceSync, FORCE_SYNC_LIMIT, RATE_WINDOW_SECS)
                    .await?
            {
                bail!("forced resync limit reached; try again later");
            }
            let result = broker.snapshot.sync(&broker.client, force).await?;
            println!(
                "synced={} updated={} deleted={} total={}",
                result.synced, result.updated, result.deleted, result.total
            );
        }
        Command::Search { term, folder } => {
            let records = broker.snapshot.search(&term, folder.as_deref()).await?;
            for record in records {
                println!(
                    "{}\t{}\t{}",
                    record.object_key,
                    record.file_size,
                    record.mime_type.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Tree => {
            let tree = broker
                .snapshot
                .folder_tree(&broker.client, &broker.cache)
                .await?;
            println!("{}", serde_json::to_string_pretty(&tree)?);
        }
        Command::List { prefix, max_keys } => {
            let objects = broker
                .client
                .list_objects(prefix.as_deref(), max_keys, true, DEFAULT_LIST_CACHE_TTL_SECS)
                .await?;
            for object in objects {
                println!("{}\t{}", object.key, object.size);
            }
        }
        Command::Presign { key, expires } => {
            let expires = expires.unwrap_or(broker.settings.url_expiration_default);
            let url = broker.client.get_presigned_url(&key, expires)?;
            println!("{url}");
        }
        Command::Resolve { text, requester } => {
            let resolver = Resolver::new(&broker.client, &broker.settings);
            let mut cache = ResolutionCache::new();
            match resolver.resolve_download(&text, &requester, &AllowAll, &mut cache)? {
                Resolution::Url(url) => println!("{url}"),
                Resolution::Name(name) => println!("{name}"),
                Resolution::Denied => bail!("download not permitted"),
            }
        }
        Command::Upload {
            file,
            key,
            content_type,
        } => {
            if !broker
                .limiter
                .check_and_increment(actor, Operation::Upload, UPLOAD_LIMIT, RATE_WINDOW_SECS)
                .await?
            {
                bail!("upload limit reached; try again later");
            }

            let metadata = tokio::fs::metadata(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            if metadata.len() as i64 > MAX_UPLOAD_BYTES {
                bail!("{} exceeds the upload size limit", file.display());
            }

            let handle = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("opening {}", file.display()))?;
            let url = broker
                .client
                .upload_stream(ReaderStream::new(handle), &key, content_type.as_deref())
                .await?;
            println!("{url}");

            // Keep the snapshot in step with the bucket we just changed.
            let result = broker.snapshot.sync(&broker.client, true).await?;
            tracing::info!(total = result.total, "snapshot refreshed after upload");
        }
        Command::EncryptCredentials => {
            let access_key = std::env::var("R2_BROKER_PLAIN_ACCESS_KEY_ID")
                .context("R2_BROKER_PLAIN_ACCESS_KEY_ID is not set")?;
            let secret_key = std::env::var("R2_BROKER_PLAIN_SECRET_ACCESS_KEY")
                .context("R2_BROKER_PLAIN_SECRET_ACCESS_KEY is not set")?;
            println!(
                "R2_BROKER_ACCESS_KEY_ID={}",
                broker.cipher.sanitize_for_storage(&access_key)
            );
            println!(
                "R2_BROKER_SECRET_ACCESS_KEY={}",
                broker.cipher.sanitize_for_storage(&secret_key)
            );
        }
    }
    Ok(())
}
