//! Service layer: object store access, caching, resolution, rate limiting.

pub mod listing_cache;
pub mod rate_limit;
pub mod resolver;
pub mod signer;
pub mod snapshot;
pub mod store_client;
