//! Content-addressed cache of pass outputs.
//!
//! Keys are `sha256(pass_type ‖ normalized input)`. The cache is non-strict:
//! two concurrent computations of the same key both run and the later write
//! wins.

use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::models::{CacheConfig, CacheEntry, PassType};
use crate::domain::ports::CacheRepository;
use crate::domain::text::normalize_whitespace;

/// Ten years; longer TTLs are clamped.
const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Cache key for a pass input.
pub fn cache_key(pass_type: PassType, input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pass_type.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(normalize_whitespace(input).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Usage and payload of a freshly computed pass, ready to be cached.
#[derive(Debug, Clone)]
pub struct CachedOutput {
    pub payload: serde_json::Value,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

#[derive(Clone)]
pub struct PassCache {
    repo: Arc<dyn CacheRepository>,
    ttl: Duration,
    enabled: bool,
}

impl PassCache {
    pub fn new(repo: Arc<dyn CacheRepository>, config: &CacheConfig) -> Self {
        Self {
            repo,
            ttl: Duration::seconds(config.ttl_secs.min(MAX_TTL_SECS) as i64),
            enabled: config.enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Unexpired entry for `key`, if any.
    pub async fn lookup(&self, key: &str) -> DomainResult<Option<CacheEntry>> {
        if !self.enabled {
            return Ok(None);
        }
        self.repo.get(key, Utc::now()).await
    }

    /// Store (or overwrite) the output for `key`.
    pub async fn store(&self, key: &str, pass_type: PassType, output: CachedOutput) -> DomainResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let now = Utc::now();
        let entry = CacheEntry {
            cache_key: key.to_string(),
            pass_type,
            payload: output.payload,
            model: output.model,
            input_tokens: output.input_tokens,
            output_tokens: output.output_tokens,
            created_at: now,
            expires_at: now + self.ttl,
        };
        self.repo.put(&entry).await?;
        tracing::debug!(cache_key = %key, pass_type = pass_type.as_str(), "pass output cached");
        Ok(())
    }
}
