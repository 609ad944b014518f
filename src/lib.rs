//! Secure download broker for S3-compatible object stores.
//!
//! Brokers time-limited access to files a storefront sells: credentials are
//! encrypted at rest with a derived key, download URLs are presigned with a
//! bounded expiry, and a local snapshot of the remote listing powers search
//! and folder browsing without repeated remote list calls. Authorization
//! decisions stay with the storefront, reached through a trait seam.

pub mod cli;
pub mod config;
pub mod crypto;
pub mod db;
pub mod logging;
pub mod models;
pub mod services;

pub use config::{CredentialSource, Credentials, Settings};
pub use crypto::CredentialCipher;
pub use models::{FilePointer, FileRecord, FolderTree, SyncResult};
pub use services::resolver::{EntitlementCheck, Resolution, ResolutionCache, Resolver};
pub use services::store_client::{ObjectSummary, StoreClient, StoreError};
