//! Core data models for the download broker.
//!
//! These entities map the persisted object snapshot via `sqlx::FromRow`,
//! carry parsed file-pointer attributes, and model the derived read-only
//! folder tree. They serialize naturally as JSON via `serde`.

pub mod file_record;
pub mod folder;
pub mod pointer;

pub use file_record::{FileRecord, SyncResult};
pub use folder::FolderTree;
pub use pointer::{FilePointer, ReturnMode};
