//! Read-only folder tree derived from object keys.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Nested mapping from folder name to its children.
///
/// Built by decomposing every object key (and explicit folder-marker keys
/// ending in `/`) into cumulative path segments. Leaves are empty maps;
/// files themselves are not represented, only the folders containing them.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FolderTree(pub BTreeMap<String, FolderTree>);

impl FolderTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one object key into the tree.
    ///
    /// For `docs/2024/report.pdf` the folders `docs` and `docs/2024` are
    /// created; the file segment is dropped. A trailing `/` marks an explicit
    /// folder key, so every segment counts as a folder.
    pub fn insert_key(&mut self, key: &str) {
        let is_folder_marker = key.ends_with('/');
        let mut segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
        if !is_folder_marker {
            segments.pop();
        }

        let mut node = self;
        for segment in segments {
            node = node.0.entry(segment.to_string()).or_default();
        }
    }

    /// Look up a nested folder by its path segments.
    pub fn get(&self, path: &[&str]) -> Option<&FolderTree> {
        let mut node = self;
        for segment in path {
            node = node.0.get(*segment)?;
        }
        Some(node)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Folder path of an object key: all segments except the last, joined by `/`.
/// Root-level keys map to the empty string.
pub fn folder_path_of(key: &str) -> String {
    match key.rfind('/') {
        Some(pos) => key[..pos].to_string(),
        None => String::new(),
    }
}

/// Display name of an object key: its last path segment.
pub fn file_name_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
