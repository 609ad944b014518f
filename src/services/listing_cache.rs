//! Fast-tier cache fronting remote listing calls.
//!
//! One serialized JSON blob per query key, stored on disk under the cache
//! directory. Entries carry their own expiry; a `get` past the deadline
//! behaves as a miss and evicts the file. Writes are whole-file overwrites,
//! so concurrent readers never observe a torn entry beyond a failed parse,
//! which is also treated as a miss.

use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, de::DeserializeOwned};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("cache entry serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(serde::Serialize, serde::Deserialize)]
struct CacheEntry {
    expires_at: DateTime<Utc>,
    payload: serde_json::Value,
}

/// Disk-backed TTL cache keyed by opaque strings.
#[derive(Debug, Clone)]
pub struct ListingCache {
    dir: PathBuf,
}

impl ListingCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache key for a listing query. Hashing keeps file names flat and
    /// bounded regardless of prefix contents.
    pub fn listing_key(bucket: &str, prefix: Option<&str>, max_keys: usize) -> String {
        let digest = md5::compute(format!(
            "list/{}/{}/{}",
            bucket,
            prefix.unwrap_or(""),
            max_keys
        ));
        format!("{:x}", digest)
    }

    /// Cache key for the folder tree of a bucket.
    pub fn folder_tree_key(bucket: &str) -> String {
        let digest = md5::compute(format!("tree/{}", bucket));
        format!("{:x}", digest)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Fetch a live entry, evicting it when expired or unreadable.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.entry_path(key);
        let raw = fs::read(&path).await.ok()?;
        let entry: CacheEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(_) => {
                self.evict(&path).await;
                return None;
            }
        };
        if entry.expires_at <= Utc::now() {
            self.evict(&path).await;
            return None;
        }
        serde_json::from_value(entry.payload).ok()
    }

    /// Store `value` under `key` for `ttl_secs` seconds. Overwrites any
    /// previous entry for the key.
    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir).await?;
        let entry = CacheEntry {
            expires_at: Utc::now() + Duration::seconds(ttl_secs as i64),
            payload: serde_json::to_value(value)?,
        };
        fs::write(self.entry_path(key), serde_json::to_vec(&entry)?).await?;
        Ok(())
    }

    /// Drop a single entry, if present.
    pub async fn invalidate(&self, key: &str) {
        self.evict(&self.entry_path(key)).await;
    }

    async fn evict(&self, path: &Path) {
        if let Err(err) = fs::remove_file(path).await {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::debug!("failed to evict cache entry {}: {}", path.display(), err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache() -> (TempDir, ListingCache) {
        let dir = TempDir::new().unwrap();
        let cache = ListingCache::new(dir.path());
        (dir, cache)
    }

    #[tokio::test]
    async fn round_trips_within_ttl() {
        let (_dir, cache) = cache();
        cache.put("k", &vec!["a", "b"], 60).await.unwrap();
        let value: Vec<String> = cache.get("k").await.unwrap();
        assert_eq!(value, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss_and_is_evicted() {
        let (dir, cache) = cache();
        cache.put("k", &42u32, 0).await.unwrap();
        let got: Option<u32> = cache.get("k").await;
        assert_eq!(got, None);
        assert!(!dir.path().join("k.json").exists());
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_miss() {
        let (dir, cache) = cache();
        tokio::fs::create_dir_all(dir.path()).await.unwrap();
        tokio::fs::write(dir.path().join("bad.json"), b"{not json")
            .await
            .unwrap();
        let got: Option<u32> = cache.get("bad").await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn missing_key_is_a_miss() {
        let (_dir, cache) = cache();
        let got: Option<u32> = cache.get("absent").await;
        assert_eq!(got, None);
    }

    #[test]
    fn listing_key_depends_on_all_query_parameters() {
        let a = ListingCache::listing_key("b", Some("docs/"), 100);
        let b = ListingCache::listing_key("b", Some("docs/"), 200);
        let c = ListingCache::listing_key("b", None, 100);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let (_dir, cache) = cache();
        cache.put("k", &1u8, 60).await.unwrap();
        cache.invalidate("k").await;
        let got: Option<u8> = cache.get("k").await;
        assert_eq!(got, None);
    }
}
