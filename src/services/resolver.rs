//! File pointer resolution: from embedded tag text to a usable URL.
//!
//! Resolution is pure computation over the settings and the presigner, so it
//! is synchronous. Results are memoized per request through an explicit
//! [`ResolutionCache`] value owned by the caller; there is no process-global
//! state, which keeps concurrent request handling safe.

use std::collections::HashMap;
use thiserror::Error;

use crate::config::Settings;
use crate::models::folder::file_name_of;
use crate::models::{FilePointer, ReturnMode};
use crate::services::store_client::{StoreClient, StoreError};

/// Entitlement decisions are delegated to the storefront; this seam is all
/// the broker knows about authorization.
pub trait EntitlementCheck: Send + Sync {
    fn is_requester_authorized(&self, requester: &str, object_key: &str) -> bool;
}

/// Entitlement check that admits everyone. Used when permission checks are
/// disabled and in tests.
pub struct AllowAll;

impl EntitlementCheck for AllowAll {
    fn is_requester_authorized(&self, _requester: &str, _object_key: &str) -> bool {
        true
    }
}

/// Per-request memo of resolved URLs, keyed by normalized pointer attributes.
/// The same pointer is commonly resolved several times within one request.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    urls: HashMap<String, String>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn preload(&mut self, key: String, url: String) {
        self.urls.insert(key, url);
    }
}

/// Outcome of a download resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A URL the requester can be redirected to.
    Url(String),
    /// The pointer asked for its display name instead of a URL.
    Name(String),
    /// The requester is not entitled to this file. Deliberately carries no
    /// detail on why.
    Denied,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no file pointer found in input")]
    NoPointer,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Stateless resolver over a client and settings.
pub struct Resolver<'a> {
    client: &'a StoreClient,
    settings: &'a Settings,
}

impl<'a> Resolver<'a> {
    pub fn new(client: &'a StoreClient, settings: &'a Settings) -> Self {
        Self { client, settings }
    }

    /// Display name for a pointer: the configured generic label, else the
    /// pointer's explicit filename, else the basename of the object key.
    pub fn display_name(&self, pointer: &FilePointer) -> String {
        if let Some(label) = &self.settings.download_label {
            return label.clone();
        }
        if let Some(filename) = &pointer.filename {
            return filename.clone();
        }
        file_name_of(&pointer.object).to_string()
    }

    /// Resolve a pointer to a URL, consulting and filling the per-request
    /// memo.
    ///
    /// Public pointers with a configured custom domain get a static,
    /// publicly cacheable URL with no signature or expiry. The custom domain
    /// fronts only the configured bucket, so a pointer carrying a bucket
    /// override never takes this path. Everything else gets a presigned URL
    /// expiring after the pointer's `expires` override or the configured
    /// default.
    pub fn resolve_url(
        &self,
        pointer: &FilePointer,
        cache: &mut ResolutionCache,
    ) -> Result<String, ResolveError> {
        let memo_key = pointer.memo_key();
        if let Some(url) = cache.urls.get(&memo_key) {
            return Ok(url.clone());
        }

        let url = if pointer.public
            && self.settings.custom_domain.is_some()
            && pointer.bucket.is_none()
        {
            self.client.object_url(&pointer.object)
        } else {
            let expires = pointer
                .expires
                .unwrap_or(self.settings.url_expiration_default);
            self.client
                .get_presigned_url_in(pointer.bucket.as_deref(), &pointer.object, expires)?
                .to_string()
        };

        cache.urls.insert(memo_key, url.clone());
        Ok(url)
    }

    /// Resolve a pointer according to its `return` mode.
    pub fn resolve(
        &self,
        pointer: &FilePointer,
        cache: &mut ResolutionCache,
    ) -> Result<String, ResolveError> {
        match pointer.return_mode {
            ReturnMode::Name => Ok(self.display_name(pointer)),
            ReturnMode::Url => self.resolve_url(pointer, cache),
        }
    }

    /// The single most important exposed operation: parse a pointer out of
    /// caller text and resolve it for `requester`.
    ///
    /// Protected pointers are gated on the entitlement seam before any URL is
    /// minted; denial is a normal outcome carrying no explanation.
    pub fn resolve_download(
        &self,
        pointer_text: &str,
        requester: &str,
        entitlements: &dyn EntitlementCheck,
        cache: &mut ResolutionCache,
    ) -> Result<Resolution, ResolveError> {
        let pointer = FilePointer::parse(pointer_text).ok_or(ResolveError::NoPointer)?;

        if !pointer.public
            && self.settings.check_permissions
            && !entitlements.is_requester_authorized(requester, &pointer.object)
        {
            tracing::info!(requester, object = pointer.object, "download denied");
            return Ok(Resolution::Denied);
        }

        match pointer.return_mode {
            ReturnMode::Name => Ok(Resolution::Name(self.display_name(&pointer))),
            ReturnMode::Url => Ok(Resolution::Url(self.resolve_url(&pointer, cache)?)),
        }
    }
}

/// What to render when resolution fails: a visible marker for privileged
/// operators, an empty string for everyone else. Information-disclosure
/// control, not a crash path.
pub fn fallback_output(err: &ResolveError, privileged: bool) -> String {
    if privileged {
        format!("[download unavailable: {err}]")
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CredentialSource, Credentials};
    use crate::services::listing_cache::ListingCache;
    use std::path::PathBuf;
    use std::time::Duration;

    struct DenyAll;
    impl EntitlementCheck for DenyAll {
        fn is_requester_authorized(&self, _requester: &str, _object_key: &str) -> bool {
            false
        }
    }

    fn settings(custom_domain: Option<&str>) -> Settings {
        Settings {
            endpoint: "https://account.r2.cloudflarestorage.com".into(),
            bucket: "downloads".into(),
            region: "auto".into(),
            credentials: CredentialSource::Stored {
                access_key_id: "id".into(),
                secret_access_key: "secret".into(),
            },
            custom_domain: custom_domain.map(str::to_string),
            url_expiration_default: 3600,
            check_permissions: true,
            download_label: None,
            cache_dir: PathBuf::from("/tmp/r2-broker-resolver-test"),
            database_url: "sqlite::memory:".into(),
            deployment_secret: "secret".into(),
        }
    }

    fn client(settings: &Settings) -> StoreClient {
        StoreClient::new(
            settings,
            &Credentials {
                access_key_id: "AKIA".into(),
                secret_access_key: "shhh".into(),
            },
            ListingCache::new(&settings.cache_dir),
            Duration::from_secs(30),
        )
        .unwrap()
    }

    #[test]
    fn display_name_precedence() {
        let mut settings = settings(None);
        let store = client(&settings);

        let pointer =
            FilePointer::parse(r#"[r2_file object="docs/report.pdf" filename="My.pdf"]"#).unwrap();

        let resolver = Resolver::new(&store, &settings);
        assert_eq!(resolver.display_name(&pointer), "My.pdf");

        let bare = FilePointer::parse(r#"[r2_file object="docs/report.pdf"]"#).unwrap();
        assert_eq!(resolver.display_name(&bare), "report.pdf");

        settings.download_label = Some("Download".into());
        let store = client(&settings);
        let resolver = Resolver::new(&store, &settings);
        assert_eq!(resolver.display_name(&pointer), "Download");
    }

    #[test]
    fn public_pointer_with_custom_domain_is_unsigned() {
        let settings = settings(Some("cdn.example.com"));
        let client = client(&settings);
        let resolver = Resolver::new(&client, &settings);
        let pointer = FilePointer::parse(r#"[r2_file object="x.zip" public="true"]"#).unwrap();

        let url = resolver
            .resolve_url(&pointer, &mut ResolutionCache::new())
            .unwrap();
        assert_eq!(url, "https://cdn.example.com/x.zip");
    }

    #[test]
    fn bucket_override_bypasses_custom_domain() {
        let settings = settings(Some("cdn.example.com"));
        let client = client(&settings);
        let resolver = Resolver::new(&client, &settings);
        let pointer =
            FilePointer::parse(r#"[r2_file object="x.zip" public="true" bucket="other-bucket"]"#)
                .unwrap();

        let url = resolver
            .resolve_url(&pointer, &mut ResolutionCache::new())
            .unwrap();
        assert!(url.contains("X-Amz-Signature="));
        assert!(url.contains("other-bucket"));
        assert!(!url.contains("cdn.example.com"));
    }

    #[test]
    fn protected_pointer_gets_signed_url_with_override_expiry() {
        let settings = settings(None);
        let client = client(&settings);
        let resolver = Resolver::new(&client, &settings);
        let pointer = FilePointer::parse(r#"[r2_file object="x.zip" expires="60"]"#).unwrap();

        let url = resolver
            .resolve_url(&pointer, &mut ResolutionCache::new())
            .unwrap();
        assert!(url.contains("X-Amz-Signature="));
        assert!(url.contains("X-Amz-Expires=60"));
    }

    #[test]
    fn resolution_is_memoized_per_cache() {
        let settings = settings(None);
        let client = client(&settings);
        let resolver = Resolver::new(&client, &settings);
        let pointer = FilePointer::parse(r#"[r2_file object="x.zip"]"#).unwrap();

        let mut cache = ResolutionCache::new();
        cache.preload(pointer.memo_key(), "memoized://url".into());
        let url = resolver.resolve_url(&pointer, &mut cache).unwrap();
        assert_eq!(url, "memoized://url");
    }

    #[test]
    fn resolve_download_denies_unentitled_requesters() {
        let settings = settings(None);
        let client = client(&settings);
        let resolver = Resolver::new(&client, &settings);

        let outcome = resolver
            .resolve_download(
                r#"[r2_file object="x.zip"]"#,
                "user-1",
                &DenyAll,
                &mut ResolutionCache::new(),
            )
            .unwrap();
        assert_eq!(outcome, Resolution::Denied);
    }

    #[test]
    fn public_pointer_skips_entitlement_check() {
        let settings = settings(Some("cdn.example.com"));
        let client = client(&settings);
        let resolver = Resolver::new(&client, &settings);

        let outcome = resolver
            .resolve_download(
                r#"[r2_file object="x.zip" public="true"]"#,
                "user-1",
                &DenyAll,
                &mut ResolutionCache::new(),
            )
            .unwrap();
        assert_eq!(outcome, Resolution::Url("https://cdn.example.com/x.zip".into()));
    }

    #[test]
    fn missing_pointer_is_an_error() {
        let settings = settings(None);
        let client = client(&settings);
        let resolver = Resolver::new(&client, &settings);

        let err = resolver
            .resolve_download("plain text", "user", &AllowAll, &mut ResolutionCache::new())
            .unwrap_err();
        assert!(matches!(err, ResolveError::NoPointer));
    }

    #[test]
    fn name_mode_returns_display_name() {
        let settings = settings(None);
        let client = client(&settings);
        let resolver = Resolver::new(&client, &settings);

        let outcome = resolver
            .resolve_download(
                r#"[r2_file object="docs/guide.pdf" return="name"]"#,
                "user",
                &AllowAll,
                &mut ResolutionCache::new(),
            )
            .unwrap();
        assert_eq!(outcome, Resolution::Name("guide.pdf".into()));
    }

    #[test]
    fn fallback_is_empty_for_unprivileged_viewers() {
        let err = ResolveError::NoPointer;
        assert!(fallback_output(&err, false).is_empty());
        assert!(fallback_output(&err, true).contains("no file pointer"));
    }
}
