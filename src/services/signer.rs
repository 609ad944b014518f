//! SigV4 query-string presigning for S3-compatible endpoints.
//!
//! Presigning is pure computation (HMAC chains over a canonical request); no
//! network call happens here. The produced URL is valid for exactly the
//! requested number of seconds from the signing timestamp, and any tampering
//! with bucket, key, query, or expiry invalidates the signature remotely.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use thiserror::Error;
use url::Url;

use crate::config::Credentials;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
const SERVICE: &str = "s3";
const SCOPE_SUFFIX: &str = "aws4_request";

#[derive(Debug, Error)]
pub enum SignError {
    #[error("invalid endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("failed to build object URL: {0}")]
    UrlBuild(#[from] url::ParseError),
}

/// Signs requests against one endpoint/bucket/credential set.
///
/// Virtual-host addressing (`https://{bucket}.{host}/{key}`) is used for DNS
/// endpoints; IP and localhost endpoints fall back to path-style
/// (`https://{host}/{bucket}/{key}`).
#[derive(Debug, Clone)]
pub struct Presigner {
    access_key_id: String,
    secret_access_key: String,
    scheme: String,
    host: String,
    port: Option<u16>,
    region: String,
    bucket: String,
    path_style: bool,
}

impl Presigner {
    pub fn new(
        credentials: &Credentials,
        endpoint: &str,
        region: &str,
        bucket: &str,
    ) -> Result<Self, SignError> {
        let parsed = Url::parse(endpoint).map_err(|err| SignError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: err.to_string(),
        })?;
        let host = parsed
            .host_str()
            .ok_or_else(|| SignError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: "missing host".into(),
            })?
            .to_string();

        let path_style = host == "localhost" || host.parse::<std::net::IpAddr>().is_ok();

        Ok(Self {
            access_key_id: credentials.access_key_id.clone(),
            secret_access_key: credentials.secret_access_key.clone(),
            scheme: parsed.scheme().to_string(),
            host,
            port: parsed.port(),
            region: region.to_string(),
            bucket: bucket.to_string(),
            path_style,
        })
    }

    /// Same endpoint and credentials, different bucket. Used for pointer
    /// bucket overrides.
    pub fn for_bucket(&self, bucket: &str) -> Self {
        let mut other = self.clone();
        other.bucket = bucket.to_string();
        other
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Unsigned URL for an object; base for both public access and signing.
    /// An empty key addresses the bucket itself (used for listing).
    pub fn object_url(&self, key: &str) -> Result<Url, SignError> {
        let authority = match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        };
        let raw = if self.path_style {
            format!(
                "{}://{}/{}/{}",
                self.scheme,
                authority,
                self.bucket,
                encode_key(key)
            )
        } else {
            format!(
                "{}://{}.{}/{}",
                self.scheme,
                self.bucket,
                authority,
                encode_key(key)
            )
        };
        Ok(Url::parse(raw.trim_end_matches('/'))?)
    }

    /// Produce a presigned URL for `method` on `key`, valid `expires_secs`
    /// seconds from `at` (now when `None`). Extra query pairs participate in
    /// the signature, which is how listing parameters get covered.
    pub fn presign(
        &self,
        method: &str,
        key: &str,
        expires_secs: u64,
        query: &[(&str, String)],
        at: Option<DateTime<Utc>>,
    ) -> Result<Url, SignError> {
        let datetime = at.unwrap_or_else(Utc::now);
        let amz_date = datetime.format("%Y%m%dT%H%M%SZ").to_string();
        let scope_date = &amz_date[..8];
        let scope = format!(
            "{}/{}/{}/{}",
            scope_date, self.region, SERVICE, SCOPE_SUFFIX
        );

        let mut url = self.object_url(key)?;

        let mut pairs: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        pairs.push(("X-Amz-Algorithm".into(), ALGORITHM.into()));
        pairs.push(("X-Amz-Content-Sha256".into(), UNSIGNED_PAYLOAD.into()));
        pairs.push((
            "X-Amz-Credential".into(),
            format!("{}/{}", self.access_key_id, scope),
        ));
        pairs.push(("X-Amz-Date".into(), amz_date.clone()));
        pairs.push(("X-Amz-Expires".into(), expires_secs.to_string()));
        pairs.push(("X-Amz-SignedHeaders".into(), "host".into()));
        pairs.sort();

        {
            let mut editor = url.query_pairs_mut();
            editor.clear();
            for (k, v) in &pairs {
                editor.append_pair(k, v);
            }
        }

        let host_value = match url.port() {
            Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
            None => url.host_str().unwrap_or_default().to_string(),
        };

        let canonical_query = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
            .collect::<Vec<_>>()
            .join("&");
        let canonical_request = format!(
            "{}\n{}\n{}\nhost:{}\n\nhost\n{}",
            method,
            url.path(),
            canonical_query,
            host_value,
            UNSIGNED_PAYLOAD
        );

        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            hex(&Sha256::digest(canonical_request.as_bytes()))
        );

        let signing_key = self.signing_key(scope_date);
        let signature = hex(&hmac_sha256(&signing_key, string_to_sign.as_bytes()));
        url.query_pairs_mut()
            .append_pair("X-Amz-Signature", &signature);

        Ok(url)
    }

    /// SigV4 key chain: HMAC over date, region, service, terminator in turn.
    fn signing_key(&self, scope_date: &str) -> Vec<u8> {
        let seed = format!("AWS4{}", self.secret_access_key);
        let k_date = hmac_sha256(seed.as_bytes(), scope_date.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
        hmac_sha256(&k_service, SCOPE_SUFFIX.as_bytes())
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Percent-encode a single query component with the SigV4 unreserved set.
fn encode_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => {
                let _ = write!(out, "%{:02X}", byte);
            }
        }
    }
    out
}

/// Percent-encode an object key, keeping `/` as the segment separator.
pub fn encode_key(key: &str) -> String {
    key.split('/')
        .map(encode_component)
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn credentials() -> Credentials {
        Credentials {
            access_key_id: "my-id".into(),
            secret_access_key: "top secret".into(),
        }
    }

    fn presigner() -> Presigner {
        Presigner::new(
            &credentials(),
            "https://2c5a882977b89ac2.r2.cloudflarestorage.com",
            "auto",
            "pale",
        )
        .unwrap()
    }

    #[test]
    fn dns_endpoints_use_virtual_host_addressing() {
        let url = presigner().object_url("file/path").unwrap();
        assert_eq!(
            url.host_str().unwrap(),
            "pale.2c5a882977b89ac2.r2.cloudflarestorage.com"
        );
        assert_eq!(url.path(), "/file/path");
    }

    #[test]
    fn ip_and_localhost_endpoints_use_path_style() {
        let signer =
            Presigner::new(&credentials(), "http://localhost:9000", "auto", "pale").unwrap();
        let url = signer.object_url("file/path").unwrap();
        assert_eq!(url.host_str().unwrap(), "localhost");
        assert_eq!(url.port(), Some(9000));
        assert_eq!(url.path(), "/pale/file/path");
    }

    #[test]
    fn keys_are_segment_encoded() {
        assert_eq!(encode_key("a b/c+d.zip"), "a%20b/c%2Bd.zip");
        assert_eq!(encode_component("a b+c"), "a%20b%2Bc");
    }

    #[test]
    fn presigned_url_carries_requested_expiry_and_scope() {
        let fixed = Utc.with_ymd_and_hms(2025, 5, 7, 5, 48, 59).unwrap();
        let url = presigner()
            .presign("GET", "file/path", 86400, &[], Some(fixed))
            .unwrap();

        let params: HashMap<_, _> = url.query_pairs().collect();
        assert_eq!(params.get("X-Amz-Algorithm").unwrap(), ALGORITHM);
        assert_eq!(
            params.get("X-Amz-Credential").unwrap(),
            "my-id/20250507/auto/s3/aws4_request"
        );
        assert_eq!(params.get("X-Amz-Date").unwrap(), "20250507T054859Z");
        assert_eq!(params.get("X-Amz-Expires").unwrap(), "86400");
        assert_eq!(params.get("X-Amz-SignedHeaders").unwrap(), "host");
        assert!(!params.get("X-Amz-Signature").unwrap().is_empty());
    }

    #[test]
    fn signing_is_deterministic_for_fixed_time() {
        let fixed = Utc.with_ymd_and_hms(2025, 5, 7, 5, 48, 59).unwrap();
        let a = presigner()
            .presign("GET", "file/path", 3600, &[], Some(fixed))
            .unwrap();
        let b = presigner()
            .presign("GET", "file/path", 3600, &[], Some(fixed))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn extra_query_pairs_are_signed() {
        let fixed = Utc.with_ymd_and_hms(2025, 5, 7, 5, 48, 59).unwrap();
        let plain = presigner()
            .presign("GET", "", 300, &[], Some(fixed))
            .unwrap();
        let listed = presigner()
            .presign(
                "GET",
                "",
                300,
                &[("list-type", "2".to_string()), ("prefix", "docs/".to_string())],
                Some(fixed),
            )
            .unwrap();

        let sig = |url: &Url| {
            url.query_pairs()
                .find(|(k, _)| k == "X-Amz-Signature")
                .map(|(_, v)| v.into_owned())
                .unwrap()
        };
        assert_ne!(sig(&plain), sig(&listed));
        assert!(listed.as_str().contains("list-type=2"));
    }

    #[test]
    fn bucket_override_changes_host_only() {
        let other = presigner().for_bucket("other-bucket");
        let url = other.object_url("x.zip").unwrap();
        assert!(url.host_str().unwrap().starts_with("other-bucket."));
        assert_eq!(url.path(), "/x.zip");
    }
}
