//! Content-addressed pass cache entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pass::PassType;

/// A previously computed pass output keyed by `hash(pass_type, normalized input)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub cache_key: String,
    pub pass_type: PassType,
    pub payload: serde_json::Value,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
