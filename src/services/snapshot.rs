//! Snapshot tier: a persisted mirror of the remote object listing.
//!
//! The snapshot exists because the remote listing API can neither substring-
//! search nor decompose folders without a full re-list per query. An explicit
//! reconciliation pass (`sync`) upserts every listed key and purges rows
//! whose keys vanished, so the table is always an exact mirror of the
//! bucket's current object set. Search and browse never touch the remote.

use chrono::{Duration, Utc};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::FOLDER_TREE_TTL_SECS;
use crate::models::folder::{FolderTree, file_name_of, folder_path_of};
use crate::models::{FileRecord, SyncResult};
use crate::services::listing_cache::{CacheError, ListingCache};
use crate::services::store_client::{ObjectSummary, StoreClient, StoreError, guess_content_type};

/// Upper bound on one reconciliation listing.
const SYNC_MAX_KEYS: usize = 10_000;

/// Search responses are bounded; the admin UI pages by refining the term.
const SEARCH_LIMIT: i64 = 50;

/// Rows deleted per statement during the reconciliation purge.
const PURGE_CHUNK: usize = 500;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Persisted object snapshot with search, browse, and reconciliation.
#[derive(Clone)]
pub struct SnapshotStore {
    db: Arc<SqlitePool>,
    /// Seconds after which the snapshot counts as stale.
    lifetime_secs: u64,
}

impl SnapshotStore {
    pub fn new(db: Arc<SqlitePool>, lifetime_secs: u64) -> Self {
        Self { db, lifetime_secs }
    }

    /// Freshness test: stale when the newest `cached_at` is older than the
    /// configured lifetime, or the snapshot is empty.
    pub async fn is_expired(&self) -> Result<bool, SnapshotError> {
        let newest: Option<chrono::DateTime<Utc>> =
            sqlx::query_scalar("SELECT MAX(cached_at) FROM r2_files")
                .fetch_one(&*self.db)
                .await?;
        match newest {
            Some(cached_at) => {
                Ok(Utc::now() - cached_at > Duration::seconds(self.lifetime_secs as i64))
            }
            None => Ok(true),
        }
    }

    /// Reconcile the snapshot against the remote store.
    ///
    /// Skipped when the snapshot is still fresh and `force` is false. Two
    /// concurrent forced syncs both converge to the same end state; they only
    /// waste remote calls, so callers wanting single-flight behavior add
    /// their own lock.
    pub async fn sync(&self, client: &StoreClient, force: bool) -> Result<SyncResult, SnapshotError> {
        if !force && !self.is_expired().await? {
            let total = self.count().await?;
            tracing::debug!(total, "snapshot still fresh, skipping sync");
            return Ok(SyncResult {
                total,
                ..SyncResult::default()
            });
        }

        let sync_id = Uuid::new_v4();
        tracing::info!(%sync_id, force, "starting snapshot reconciliation");

        let remote = client.list_objects(None, SYNC_MAX_KEYS, false, 0).await?;
        let result = self.reconcile(&remote).await?;

        tracing::info!(
            %sync_id,
            synced = result.synced,
            updated = result.updated,
            deleted = result.deleted,
            total = result.total,
            "snapshot reconciliation finished"
        );
        Ok(result)
    }

    /// Apply one full remote listing to the snapshot.
    ///
    /// Each upsert and delete is a single primary-key-scoped statement, so a
    /// concurrent reader observes stale-or-updated rows but never torn ones.
    async fn reconcile(&self, remote: &[ObjectSummary]) -> Result<SyncResult, SnapshotError> {
        let existing: HashSet<String> =
            sqlx::query_scalar::<_, String>("SELECT object_key FROM r2_files")
                .fetch_all(&*self.db)
                .await?
                .into_iter()
                .collect();

        let now = Utc::now();
        let mut synced = 0u64;
        let mut updated = 0u64;
        let mut remote_keys: HashSet<&str> = HashSet::with_capacity(remote.len());

        for object in remote {
            // Folder markers shape the tree but are not files.
            if object.key.ends_with('/') {
                continue;
            }
            remote_keys.insert(object.key.as_str());

            sqlx::query(
                r#"
                INSERT INTO r2_files (
                    object_key, file_name, file_size, mime_type,
                    last_modified, folder_path, cached_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(object_key) DO UPDATE SET
                    file_name = excluded.file_name,
                    file_size = excluded.file_size,
                    mime_type = excluded.mime_type,
                    last_modified = excluded.last_modified,
                    folder_path = excluded.folder_path,
                    cached_at = excluded.cached_at
                "#,
            )
            .bind(&object.key)
            .bind(file_name_of(&object.key))
            .bind(object.size)
            .bind(guess_content_type(&object.key))
            .bind(object.last_modified)
            .bind(folder_path_of(&object.key))
            .bind(now)
            .execute(&*self.db)
            .await?;

            if existing.contains(object.key.as_str()) {
                updated += 1;
            } else {
                synced += 1;
            }
        }

        // NOT-IN purge: whatever the remote no longer lists is hard-deleted.
        let stale: Vec<&String> = existing
            .iter()
            .filter(|key| !remote_keys.contains(key.as_str()))
            .collect();
        for chunk in stale.chunks(PURGE_CHUNK) {
            let mut builder =
                QueryBuilder::<Sqlite>::new("DELETE FROM r2_files WHERE object_key IN (");
            let mut separated = builder.separated(", ");
            for key in chunk {
                separated.push_bind(key.as_str());
            }
            builder.push(")");
            builder.build().execute(&*self.db).await?;
        }

        Ok(SyncResult {
            synced,
            updated,
            deleted: stale.len() as u64,
            total: self.count().await?,
        })
    }

    /// Substring search on file name with optional exact folder match.
    /// Served entirely from the snapshot; the remote store is never hit.
    pub async fn search(
        &self,
        term: &str,
        folder_path: Option<&str>,
    ) -> Result<Vec<FileRecord>, SnapshotError> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT object_key, file_name, file_size, mime_type, last_modified, \
             folder_path, cached_at FROM r2_files WHERE file_name LIKE ",
        );
        builder.push_bind(format!("%{}%", escape_like(term)));
        builder.push(" ESCAPE '\\'");
        if let Some(folder) = folder_path {
            builder.push(" AND folder_path = ");
            builder.push_bind(folder.to_string());
        }
        builder.push(" ORDER BY file_name ASC LIMIT ");
        builder.push_bind(SEARCH_LIMIT);

        Ok(builder.build_query_as().fetch_all(&*self.db).await?)
    }

    /// Fetch a single record by key.
    pub async fn get(&self, object_key: &str) -> Result<Option<FileRecord>, SnapshotError> {
        Ok(sqlx::query_as::<_, FileRecord>(
            "SELECT object_key, file_name, file_size, mime_type, last_modified, \
             folder_path, cached_at FROM r2_files WHERE object_key = ?",
        )
        .bind(object_key)
        .fetch_optional(&*self.db)
        .await?)
    }

    pub async fn count(&self) -> Result<u64, SnapshotError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM r2_files")
            .fetch_one(&*self.db)
            .await?;
        Ok(count as u64)
    }

    /// Folder tree for the bucket, served from the file-backed cache when
    /// fresh. Rebuilding requires a full bucket enumeration, hence the much
    /// longer TTL than the fast listing tier.
    pub async fn folder_tree(
        &self,
        client: &StoreClient,
        cache: &ListingCache,
    ) -> Result<FolderTree, SnapshotError> {
        let cache_key = ListingCache::folder_tree_key(client.bucket());
        if let Some(tree) = cache.get::<FolderTree>(&cache_key).await {
            return Ok(tree);
        }

        let remote = client.list_objects(None, SYNC_MAX_KEYS, false, 0).await?;
        let mut tree = FolderTree::new();
        for object in &remote {
            tree.insert_key(&object.key);
        }

        cache.put(&cache_key, &tree, FOLDER_TREE_TTL_SECS).await?;
        Ok(tree)
    }
}

/// Escape LIKE wildcards so a search term matches literally.
fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
