//! The compact textual file reference embedded in caller-provided text.
//!
//! Two equivalent bracketed forms are recognized, the primary tag and a
//! legacy alias kept for content written against the old tag name:
//!
//! ```text
//! [r2_file object="path/to/file.zip"]
//! [r2_file object="path/to/file.zip" filename="Download.zip" expires="7200"]
//! [r2_download bucket="other-bucket" object="path/to/file.zip"]
//! ```

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Matches the bracketed tag and captures its attribute list.
fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"\[(?:r2_file|r2_download)\s+([^\]]*)\]"#)
            .expect("tag pattern is valid")
    })
}

/// Matches one `key="value"` attribute pair.
fn attr_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"(\w+)\s*=\s*"([^"]*)""#).expect("attr pattern is valid"))
}

/// What the caller wants back from resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnMode {
    #[default]
    Url,
    Name,
}

/// Parsed attributes of a file pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePointer {
    /// Remote object key. The only required attribute.
    pub object: String,
    /// Bucket override; the configured bucket applies when absent.
    pub bucket: Option<String>,
    /// Display-name override for the download.
    pub filename: Option<String>,
    /// Expiry override in seconds for the presigned URL.
    pub expires: Option<u64>,
    /// Public objects skip signing when a custom domain is configured.
    pub public: bool,
    pub return_mode: ReturnMode,
}

impl FilePointer {
    /// Extract the first file pointer from `text`, if any.
    ///
    /// Returns `None` when no tag matches or when the matched tag lacks the
    /// required `object` attribute. Unknown attributes are ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let captures = tag_pattern().captures(text)?;
        let attr_text = captures.get(1)?.as_str();

        let mut attrs: BTreeMap<&str, &str> = BTreeMap::new();
        for pair in attr_pattern().captures_iter(attr_text) {
            attrs.insert(
                pair.get(1).map(|m| m.as_str())?,
                pair.get(2).map(|m| m.as_str())?,
            );
        }

        let object = attrs.get("object")?.trim();
        if object.is_empty() {
            return None;
        }

        Some(Self {
            object: object.to_string(),
            bucket: attrs.get("bucket").map(|v| v.to_string()),
            filename: attrs.get("filename").map(|v| v.to_string()),
            expires: attrs.get("expires").and_then(|v| v.parse().ok()),
            public: attrs
                .get("public")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            return_mode: match attrs.get("return") {
                Some(v) if v.eq_ignore_ascii_case("name") => ReturnMode::Name,
                _ => ReturnMode::Url,
            },
        })
    }

    /// Stable key over the normalized attribute set, used for per-request
    /// memoization of resolved URLs.
    pub fn memo_key(&self) -> String {
        format!(
            "object={}|bucket={}|expires={}|public={}",
            self.object,
            self.bucket.as_deref().unwrap_or(""),
            self.expires.map(|e| e.to_string()).unwrap_or_default(),
            self.public,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_primary_form_with_only_object() {
        let ptr = FilePointer::parse(r#"see [r2_file object="path/to/file.zip"] above"#).unwrap();
        assert_eq!(ptr.object, "path/to/file.zip");
        assert_eq!(ptr.bucket, None);
        assert!(!ptr.public);
        assert_eq!(ptr.return_mode, ReturnMode::Url);
    }

    #[test]
    fn parses_all_attributes() {
        let text = r#"[r2_file object="a/b.zip" filename="Download.zip" expires="7200" public="true" return="name"]"#;
        let ptr = FilePointer::parse(text).unwrap();
        assert_eq!(ptr.filename.as_deref(), Some("Download.zip"));
        assert_eq!(ptr.expires, Some(7200));
        assert!(ptr.public);
        assert_eq!(ptr.return_mode, ReturnMode::Name);
    }

    #[test]
    fn parses_legacy_alias_with_bucket_override() {
        let text = r#"[r2_download bucket="other-bucket" object="path/to/file.zip"]"#;
        let ptr = FilePointer::parse(text).unwrap();
        assert_eq!(ptr.bucket.as_deref(), Some("other-bucket"));
        assert_eq!(ptr.object, "path/to/file.zip");
    }

    #[test]
    fn rejects_text_without_tag() {
        assert!(FilePointer::parse("no pointer here").is_none());
        assert!(FilePointer::parse(r#"[other_tag object="x"]"#).is_none());
    }

    #[test]
    fn rejects_tag_missing_object() {
        assert!(FilePointer::parse(r#"[r2_file filename="x.zip"]"#).is_none());
        assert!(FilePointer::parse(r#"[r2_file object=""]"#).is_none());
    }

    #[test]
    fn invalid_expires_is_ignored() {
        let ptr = FilePointer::parse(r#"[r2_file object="x.zip" expires="soon"]"#).unwrap();
        assert_eq!(ptr.expires, None);
    }

    #[test]
    fn memo_key_ignores_display_only_attributes() {
        let a = FilePointer::parse(r#"[r2_file object="x.zip" filename="A.zip"]"#).unwrap();
        let b = FilePointer::parse(r#"[r2_file object="x.zip" filename="B.zip"]"#).unwrap();
        assert_eq!(a.memo_key(), b.memo_key());
    }
}
