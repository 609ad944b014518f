//! Represents one remote object mirrored into the local snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A snapshot row for a single remote object.
///
/// At most one record exists per `object_key`. Records absent from the latest
/// full remote listing are hard-deleted during reconciliation, so the table is
/// always an exact mirror of the bucket's current object set.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct FileRecord {
    /// Remote object key (path-like, unique).
    pub object_key: String,

    /// Display name, the last path segment of the key.
    pub file_name: String,

    /// Size in bytes as reported by the remote listing.
    pub file_size: i64,

    /// MIME type guessed from the file extension.
    pub mime_type: Option<String>,

    /// Last-modified timestamp from the remote listing.
    pub last_modified: Option<DateTime<Utc>>,

    /// All path segments of the key except the last, joined by `/`.
    pub folder_path: String,

    /// When this row was last written by a reconciliation pass.
    pub cached_at: DateTime<Utc>,
}

/// Counters returned by a reconciliation pass, for observability.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct SyncResult {
    /// Rows inserted for keys not previously known.
    pub synced: u64,
    /// Rows refreshed for keys already present.
    pub updated: u64,
    /// Rows purged because their key vanished from the remote listing.
    pub deleted: u64,
    /// Total rows in the snapshot after the pass.
    pub total: u64,
}
