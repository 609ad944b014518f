//! Credential protection primitives.
//!
//! The broker stores long-lived object-store credentials at rest. They are
//! sealed with AES-256-GCM under a key derived (HKDF-SHA256) from a
//! deployment-wide secret; the key itself is never persisted.

pub mod cipher;

pub use cipher::{CipherError, CredentialCipher};
