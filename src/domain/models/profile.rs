//! Per-user defaults created at account provisioning time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub default_lane: String,
    pub budget_cap_nanos: i64,
    /// Who performed the provisioning (recorded for audit).
    pub provisioned_by: String,
    pub created_at: DateTime<Utc>,
}
