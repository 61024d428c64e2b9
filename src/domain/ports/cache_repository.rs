use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::CacheEntry;

/// Storage for the content-addressed pass cache.
#[async_trait]
pub trait CacheRepository: Send + Sync {
    /// Fetch an entry that has not expired at `now`.
    async fn get(&self, cache_key: &str, now: DateTime<Utc>) -> DomainResult<Option<CacheEntry>>;

    /// Insert or overwrite an entry. Last writer wins.
    async fn put(&self, entry: &CacheEntry) -> DomainResult<()>;

    /// Delete entries expired at `now`, returning how many were removed.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> DomainResult<u64>;
}
