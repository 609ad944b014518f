use crate::crypto::CredentialCipher;
use clap::Parser;
use std::{env, path::PathBuf};
use thiserror::Error;

/// Default expiry (seconds) for presigned URLs when a pointer carries none.
pub const DEFAULT_URL_EXPIRATION_SECS: u64 = 3600;

/// Fast-tier listing cache TTL.
pub const DEFAULT_LIST_CACHE_TTL_SECS: u64 = 300;

/// Snapshot tier freshness lifetime.
pub const DEFAULT_SNAPSHOT_LIFETIME_SECS: u64 = 900;

/// Folder tree cache TTL; rebuilt only after a full bucket enumeration.
pub const FOLDER_TREE_TTL_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid value for `{name}`: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("environment variable `{0}` is not set")]
    EnvVar(String),
}

/// A fully-resolved credential pair, ready to sign requests.
///
/// Only ever built transiently from a [`CredentialSource`]; never persisted.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Where credentials come from at rest.
///
/// `Stored` values carry the encrypted envelopes (or legacy plaintext) saved
/// by the admin configuration flow; `Environment` names the variables holding
/// plaintext keys on deployments that keep secrets out of the database.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    Stored {
        access_key_id: String,
        secret_access_key: String,
    },
    Environment {
        access_key_var: String,
        secret_key_var: String,
    },
}

impl CredentialSource {
    /// Resolve into a plain credential pair, decrypting stored envelopes.
    ///
    /// Resolution happens once, before client construction, so no mode checks
    /// leak into client logic.
    pub fn resolve(&self, cipher: &CredentialCipher) -> Result<Credentials, SettingsError> {
        match self {
            Self::Stored {
                access_key_id,
                secret_access_key,
            } => Ok(Credentials {
                access_key_id: cipher.decrypt(access_key_id),
                secret_access_key: cipher.decrypt(secret_access_key),
            }),
            Self::Environment {
                access_key_var,
                secret_key_var,
            } => Ok(Credentials {
                access_key_id: env::var(access_key_var)
                    .map_err(|_| SettingsError::EnvVar(access_key_var.clone()))?,
                secret_access_key: env::var(secret_key_var)
                    .map_err(|_| SettingsError::EnvVar(secret_key_var.clone()))?,
            }),
        }
    }
}

/// Centralized broker configuration.
/// Combines environment variables and CLI arguments, validated once.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL of the S3-compatible endpoint, e.g. `https://<account>.r2.cloudflarestorage.com`.
    pub endpoint: String,
    /// Bucket holding the protected files.
    pub bucket: String,
    /// Signing region; R2 uses `auto`.
    pub region: String,
    /// Credential material (encrypted at rest or environment-sourced).
    pub credentials: CredentialSource,
    /// Optional CDN domain for public objects; skips signing entirely.
    pub custom_domain: Option<String>,
    /// Default presigned-URL expiry in seconds.
    pub url_expiration_default: u64,
    /// Whether protected pointers require an entitlement check.
    pub check_permissions: bool,
    /// Generic display label overriding pointer filenames, when set.
    pub download_label: Option<String>,
    /// Directory for fast-tier and folder-tree cache blobs.
    pub cache_dir: PathBuf,
    /// SQLite database URL for the snapshot tier and rate-limit counters.
    pub database_url: String,
    /// Deployment-wide secret the credential key is derived from.
    pub deployment_secret: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Secure download broker for S3-compatible object stores")]
pub struct Args {
    /// Object store endpoint URL (overrides R2_BROKER_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Bucket name (overrides R2_BROKER_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Custom CDN domain for public objects (overrides R2_BROKER_CUSTOM_DOMAIN)
    #[arg(long)]
    pub custom_domain: Option<String>,

    /// Cache directory (overrides R2_BROKER_CACHE_DIR)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Database URL (overrides R2_BROKER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    #[command(subcommand)]
    pub command: Option<crate::cli::Command>,
}

impl Settings {
    /// Parse environment variables + CLI args into validated settings.
    pub fn from_env_and_args(args: &Args) -> Result<Self, SettingsError> {
        let endpoint = args
            .endpoint
            .clone()
            .or_else(|| env::var("R2_BROKER_ENDPOINT").ok())
            .ok_or(SettingsError::Missing("endpoint"))?;
        let bucket = args
            .bucket
            .clone()
            .or_else(|| env::var("R2_BROKER_BUCKET").ok())
            .ok_or(SettingsError::Missing("bucket"))?;
        let region = env::var("R2_BROKER_REGION").unwrap_or_else(|_| "auto".into());

        let credentials = match (
            env::var("R2_BROKER_ACCESS_KEY_ID").ok(),
            env::var("R2_BROKER_SECRET_ACCESS_KEY").ok(),
        ) {
            (Some(access_key_id), Some(secret_access_key)) => CredentialSource::Stored {
                access_key_id,
                secret_access_key,
            },
            _ => CredentialSource::Environment {
                access_key_var: "AWS_ACCESS_KEY_ID".into(),
                secret_key_var: "AWS_SECRET_ACCESS_KEY".into(),
            },
        };

        let url_expiration_default = match env::var("R2_BROKER_URL_EXPIRATION") {
            Ok(value) => value.parse::<u64>().map_err(|err| SettingsError::Invalid {
                name: "url_expiration",
                reason: err.to_string(),
            })?,
            Err(_) => DEFAULT_URL_EXPIRATION_SECS,
        };

        let settings = Self {
            endpoint,
            bucket,
            region,
            credentials,
            custom_domain: args
                .custom_domain
                .clone()
                .or_else(|| env::var("R2_BROKER_CUSTOM_DOMAIN").ok()),
            url_expiration_default,
            check_permissions: env::var("R2_BROKER_CHECK_PERMISSIONS")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            download_label: env::var("R2_BROKER_DOWNLOAD_LABEL").ok(),
            cache_dir: args
                .cache_dir
                .clone()
                .or_else(|| env::var("R2_BROKER_CACHE_DIR").ok().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("./data/cache")),
            database_url: args
                .database_url
                .clone()
                .or_else(|| env::var("R2_BROKER_DATABASE_URL").ok())
                .unwrap_or_else(|| "sqlite://./data/meta/r2_broker.db".into()),
            deployment_secret: env::var("R2_BROKER_DEPLOYMENT_SECRET")
                .map_err(|_| SettingsError::Missing("deployment_secret"))?,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.endpoint.trim().is_empty() {
            return Err(SettingsError::Missing("endpoint"));
        }
        if self.bucket.trim().is_empty() {
            return Err(SettingsError::Missing("bucket"));
        }
        if self.url_expiration_default == 0 {
            return Err(SettingsError::Invalid {
                name: "url_expiration",
                reason: "must be at least 1 second".into(),
            });
        }
        Ok(())
    }

    /// Loggable view of the settings with secret material masked.
    pub fn redacted(&self) -> serde_json::Value {
        let raw = serde_json::json!({
            "endpoint": self.endpoint,
            "bucket": self.bucket,
            "region": self.region,
            "custom_domain": self.custom_domain,
            "url_expiration_default": self.url_expiration_default,
            "check_permissions": self.check_permissions,
            "cache_dir": self.cache_dir.display().to_string(),
            "database_url": self.database_url,
            "deployment_secret": self.deployment_secret,
        });
        crate::logging::redact(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_settings() -> Settings {
        Settings {
            endpoint: "https://account.r2.cloudflarestorage.com".into(),
            bucket: "downloads".into(),
            region: "auto".into(),
            credentials: CredentialSource::Stored {
                access_key_id: "id".into(),
                secret_access_key: "secret".into(),
            },
            custom_domain: None,
            url_expiration_default: DEFAULT_URL_EXPIRATION_SECS,
            check_permissions: true,
            download_label: None,
            cache_dir: PathBuf::from("/tmp/cache"),
            database_url: "sqlite::memory:".into(),
            deployment_secret: "s3cret".into(),
        }
    }

    #[test]
    fn validation_rejects_blank_endpoint_and_bucket() {
        let mut settings = base_settings();
        settings.endpoint = "  ".into();
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Missing("endpoint"))
        ));

        let mut settings = base_settings();
        settings.bucket = String::new();
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Missing("bucket"))
        ));
    }

    #[test]
    fn stored_credentials_resolve_through_cipher() {
        let cipher = CredentialCipher::new("deploy-secret");
        let sealed_id = cipher.encrypt("AKIA-test").unwrap();
        let sealed_key = cipher.encrypt("shhh").unwrap();
        let source = CredentialSource::Stored {
            access_key_id: sealed_id,
            secret_access_key: sealed_key,
        };
        let creds = source.resolve(&cipher).unwrap();
        assert_eq!(creds.access_key_id, "AKIA-test");
        assert_eq!(creds.secret_access_key, "shhh");
    }

    #[test]
    fn legacy_plaintext_credentials_resolve_unchanged() {
        let cipher = CredentialCipher::new("deploy-secret");
        let source = CredentialSource::Stored {
            access_key_id: "plain-id".into(),
            secret_access_key: "plain-key".into(),
        };
        let creds = source.resolve(&cipher).unwrap();
        assert_eq!(creds.access_key_id, "plain-id");
        assert_eq!(creds.secret_access_key, "plain-key");
    }

    #[test]
    fn redacted_view_masks_secrets() {
        let view = base_settings().redacted();
        assert_eq!(view["deployment_secret"], crate::logging::REDACTED);
        assert_eq!(view["bucket"], "downloads");
    }
}
