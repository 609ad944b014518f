//! Thin client for the remote S3-compatible API.
//!
//! Three remote operations: list objects (paginated ListObjectsV2), mint
//! presigned download URLs, and upload blobs. Every remote call is wrapped
//! into a typed per-operation failure; nothing is retried here, since a
//! retried presign or upload is not idempotent-safe without the caller
//! knowing about side effects.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use reqwest::header;
use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::{Credentials, Settings};
use crate::services::listing_cache::ListingCache;
use crate::services::signer::{Presigner, SignError, encode_key};

/// Hard bound on one ListObjectsV2 page, per the S3 API.
const LIST_PAGE_LIMIT: usize = 1000;

/// Expiry for internally presigned list/exists requests; these are consumed
/// immediately, not handed out.
const INTERNAL_URL_EXPIRY_SECS: u64 = 300;

/// Uploads above this size are rejected before any remote call.
pub const MAX_UPLOAD_BYTES: i64 = 100 * 1024 * 1024;

/// Extensions accepted for upload.
const ALLOWED_UPLOAD_EXTENSIONS: [&str; 28] = [
    "zip", "rar", "7z", "tar", "gz", "pdf", "png", "jpg", "jpeg", "gif", "webp", "svg", "mp3",
    "wav", "ogg", "mp4", "mov", "webm", "txt", "csv", "md", "doc", "docx", "xls", "xlsx", "ppt",
    "pptx", "epub",
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store configuration invalid: {0}")]
    Config(String),
    #[error("listing objects failed: {0}")]
    ListFailed(String),
    #[error("presigning URL failed: {0}")]
    PresignFailed(String),
    #[error("upload failed: {0}")]
    UploadFailed(String),
    #[error("existence check failed: {0}")]
    ExistsCheckFailed(String),
    #[error("upload rejected: {0}")]
    InvalidUpload(String),
}

/// One object as reported by the remote listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Root element of a ListObjectsV2 XML response.
#[derive(Debug, Deserialize)]
#[serde(rename = "ListBucketResult")]
struct ListBucketResult {
    #[serde(rename = "IsTruncated", default)]
    is_truncated: bool,
    #[serde(rename = "Contents", default)]
    contents: Vec<ListedObject>,
    #[serde(rename = "NextContinuationToken")]
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Size", default)]
    size: i64,
    #[serde(rename = "LastModified")]
    last_modified: Option<DateTime<Utc>>,
}

/// `<Error>` XML returned by S3 for bucket-level failures; parsed so callers
/// see `NoSuchBucket: ...` instead of an opaque deserialization error.
#[derive(Debug, Deserialize)]
#[serde(rename = "Error")]
struct RemoteError {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message")]
    message: Option<String>,
}

/// Client for one endpoint/bucket, holding resolved credentials inside its
/// presigner and a fast-tier cache in front of listing calls.
#[derive(Debug, Clone)]
pub struct StoreClient {
    http: reqwest::Client,
    presigner: Presigner,
    custom_domain: Option<String>,
    cache: ListingCache,
}

impl StoreClient {
    /// Build a client from validated settings and resolved credentials.
    ///
    /// Missing endpoint, bucket, or credential material is fatal here, never
    /// silently degraded. `timeout` bounds every remote call; a timed-out
    /// call surfaces as the corresponding typed failure.
    pub fn new(
        settings: &Settings,
        credentials: &Credentials,
        cache: ListingCache,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        if credentials.access_key_id.trim().is_empty()
            || credentials.secret_access_key.trim().is_empty()
        {
            return Err(StoreError::Config("credentials are not configured".into()));
        }

        let presigner = Presigner::new(
            credentials,
            &settings.endpoint,
            &settings.region,
            &settings.bucket,
        )
        .map_err(|err| StoreError::Config(err.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| StoreError::Config(err.to_string()))?;

        Ok(Self {
            http,
            presigner,
            custom_domain: settings.custom_domain.clone(),
            cache,
        })
    }

    pub fn bucket(&self) -> &str {
        self.presigner.bucket()
    }

    /// List objects under `prefix`, paginating until `max_keys` entries are
    /// collected or the listing is exhausted.
    ///
    /// With `use_cache`, a fresh fast-tier entry for the same
    /// (bucket, prefix, max_keys) query short-circuits the remote call, and a
    /// successful remote listing is written back with `cache_ttl_secs`.
    pub async fn list_objects(
        &self,
        prefix: Option<&str>,
        max_keys: usize,
        use_cache: bool,
        cache_ttl_secs: u64,
    ) -> Result<Vec<ObjectSummary>, StoreError> {
        let cache_key = ListingCache::listing_key(self.bucket(), prefix, max_keys);
        if use_cache {
            if let Some(cached) = self.cache.get::<Vec<ObjectSummary>>(&cache_key).await {
                tracing::debug!(prefix, max_keys, "listing served from fast-tier cache");
                return Ok(cached);
            }
        }

        let mut collected: Vec<ObjectSummary> = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page_size = (max_keys - collected.len()).min(LIST_PAGE_LIMIT);
            let mut query: Vec<(&str, String)> = vec![
                ("list-type", "2".to_string()),
                ("max-keys", page_size.to_string()),
            ];
            if let Some(prefix) = prefix {
                query.push(("prefix", prefix.to_string()));
            }
            if let Some(token) = &continuation {
                query.push(("continuation-token", token.clone()));
            }

            let url = self
                .presigner
                .presign("GET", "", INTERNAL_URL_EXPIRY_SECS, &query, None)
                .map_err(|err| StoreError::ListFailed(err.to_string()))?;

            let response = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|err| StoreError::ListFailed(err.to_string()))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|err| StoreError::ListFailed(err.to_string()))?;
            if !status.is_success() {
                return Err(StoreError::ListFailed(remote_failure(&body, status)));
            }

            let page = parse_list_response(&body)?;
            collected.extend(page.objects);

            match page.next_continuation_token {
                Some(token) if page.is_truncated && collected.len() < max_keys => {
                    continuation = Some(token);
                }
                _ => break,
            }
        }

        collected.truncate(max_keys);

        if use_cache {
            if let Err(err) = self.cache.put(&cache_key, &collected, cache_ttl_secs).await {
                tracing::warn!("failed to write listing cache entry: {err}");
            }
        }

        Ok(collected)
    }

    /// Mint a signed download URL for `key`, valid `expiration_seconds` from
    /// issuance. Pure computation; the network is only touched when the URL
    /// is later used.
    pub fn get_presigned_url(
        &self,
        key: &str,
        expiration_seconds: u64,
    ) -> Result<Url, StoreError> {
        self.presigner
            .presign("GET", key, expiration_seconds, &[], None)
            .map_err(|err| StoreError::PresignFailed(err.to_string()))
    }

    /// Same as [`get_presigned_url`](Self::get_presigned_url) but against a
    /// bucket override from a file pointer.
    pub fn get_presigned_url_in(
        &self,
        bucket: Option<&str>,
        key: &str,
        expiration_seconds: u64,
    ) -> Result<Url, StoreError> {
        match bucket {
            Some(other) if other != self.bucket() => self
                .presigner
                .for_bucket(other)
                .presign("GET", key, expiration_seconds, &[], None)
                .map_err(|err| StoreError::PresignFailed(err.to_string())),
            _ => self.get_presigned_url(key, expiration_seconds),
        }
    }

    /// Upload a blob to `key`. Validation runs before any remote call; the
    /// returned string is the object's public URL.
    pub async fn upload(
        &self,
        body: Bytes,
        key: &str,
        content_type: Option<&str>,
    ) -> Result<String, StoreError> {
        let size = body.len() as i64;
        self.validate_upload(key, size)?;
        let stream = futures::stream::once(async move { Ok::<_, io::Error>(body) });
        self.upload_stream(stream, key, content_type).await
    }

    /// Streaming upload for sources too large to buffer. The key must pass
    /// the same validation; size is enforced by the remote store in this path.
    pub async fn upload_stream<S>(
        &self,
        stream: S,
        key: &str,
        content_type: Option<&str>,
    ) -> Result<String, StoreError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + Sync + 'static,
    {
        self.validate_upload(key, 0)?;

        let url = self
            .presigner
            .presign("PUT", key, INTERNAL_URL_EXPIRY_SECS, &[], None)
            .map_err(|err| StoreError::UploadFailed(err.to_string()))?;

        let content_type = content_type
            .map(str::to_string)
            .or_else(|| guess_content_type(key).map(str::to_string))
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let response = self
            .http
            .put(url)
            .header(header::CONTENT_TYPE, content_type)
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await
            .map_err(|err| StoreError::UploadFailed(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::UploadFailed(remote_failure(&body, status)));
        }

        tracing::info!(key, "uploaded object");
        Ok(self.object_url(key))
    }

    /// HEAD the object behind `key`. A clean 404 is `false`, not an error.
    pub async fn object_exists(&self, key: &str) -> Result<bool, StoreError> {
        let url = self
            .presigner
            .presign("HEAD", key, INTERNAL_URL_EXPIRY_SECS, &[], None)
            .map_err(|err| StoreError::ExistsCheckFailed(err.to_string()))?;

        let response = self
            .http
            .head(url)
            .send()
            .await
            .map_err(|err| StoreError::ExistsCheckFailed(err.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            status => Err(StoreError::ExistsCheckFailed(format!(
                "unexpected status {status}"
            ))),
        }
    }

    /// Public URL for `key`; no network call and no signing.
    ///
    /// A configured custom domain wins; otherwise the conventional public URL
    /// for the endpoint/bucket is returned.
    pub fn object_url(&self, key: &str) -> String {
        match &self.custom_domain {
            Some(domain) => format!("https://{}/{}", domain, encode_key(key)),
            None => self
                .presigner
                .object_url(key)
                .map(|url| url.to_string())
                .unwrap_or_default(),
        }
    }

    fn validate_upload(&self, key: &str, size: i64) -> Result<(), StoreError> {
        if key.is_empty() || key.starts_with('/') || key.contains("..") {
            return Err(StoreError::InvalidUpload("invalid object key".into()));
        }
        let extension = key.rsplit('.').next().map(str::to_ascii_lowercase);
        let allowed = extension
            .as_deref()
            .map(|ext| ALLOWED_UPLOAD_EXTENSIONS.contains(&ext))
            .unwrap_or(false);
        if !allowed {
            return Err(StoreError::InvalidUpload(format!(
                "file type not allowed for `{key}`"
            )));
        }
        if size > MAX_UPLOAD_BYTES {
            return Err(StoreError::InvalidUpload(format!(
                "file exceeds the {MAX_UPLOAD_BYTES} byte limit"
            )));
        }
        Ok(())
    }
}

/// Page of listing results after XML decoding.
#[derive(Debug)]
struct ListPage {
    objects: Vec<ObjectSummary>,
    is_truncated: bool,
    next_continuation_token: Option<String>,
}

/// Decode a ListObjectsV2 XML body.
///
/// quick-xml is lenient and deserializes unrelated XML into defaults, so the
/// root element is checked explicitly; `<Error>` responses are surfaced with
/// their remote code and message.
fn parse_list_response(xml: &str) -> Result<ListPage, StoreError> {
    if let Ok(error) = quick_xml::de::from_str::<RemoteError>(xml) {
        return Err(StoreError::ListFailed(format!(
            "{}: {}",
            error.code,
            error.message.unwrap_or_default()
        )));
    }
    if !xml.contains("<ListBucketResult") {
        return Err(StoreError::ListFailed(
            "unexpected XML response: missing ListBucketResult element".into(),
        ));
    }

    let result: ListBucketResult = quick_xml::de::from_str(xml)
        .map_err(|err| StoreError::ListFailed(format!("failed to parse XML: {err}")))?;

    Ok(ListPage {
        objects: result
            .contents
            .into_iter()
            .map(|entry| ObjectSummary {
                key: entry.key,
                size: entry.size,
                last_modified: entry.last_modified,
            })
            .collect(),
        is_truncated: result.is_truncated,
        next_continuation_token: result.next_continuation_token,
    })
}

fn remote_failure(body: &str, status: reqwest::StatusCode) -> String {
    match quick_xml::de::from_str::<RemoteError>(body) {
        Ok(error) => format!("{}: {}", error.code, error.message.unwrap_or_default()),
        Err(_) => format!("remote returned status {status}"),
    }
}

/// Guess a MIME type from the key's extension.
pub fn guess_content_type(key: &str) -> Option<&'static str> {
    let extension = key.rsplit('.').next()?.to_ascii_lowercase();
    let mime = match extension.as_str() {
        "zip" => "application/zip",
        "rar" => "application/vnd.rar",
        "7z" => "application/x-7z-compressed",
        "tar" => "application/x-tar",
        "gz" => "application/gzip",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "epub" => "application/epub+zip",
        _ => return None,
    };
    Some(mime)
}
