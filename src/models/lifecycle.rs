//! Retention rules applied to noncurrent object versions.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const NONCURRENT_RULE_ID: &str = "Non_current_version_rules";
pub const INFREQUENT_ACCESS: &str = "STANDARD_IA";
pub const STANDARD: &str = "STANDARD";

/// A bucket-wide lifecycle rule for superseded versions.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleRule {
    pub rule_id: String,
    pub enabled: bool,

    /// Days a version must be noncurrent before moving to `transition_storage_class`.
    pub transition_days: i64,
    pub transition_storage_class: String,

    /// Days a version must be noncurrent before it may be expired.
    pub expiration_days: i64,

    /// Number of newer noncurrent versions that must exist before expiry applies.
    pub newer_noncurrent_versions: i64,
}

impl LifecycleRule {
    /// The rolling-history rule installed on every studio bucket: move to
    /// infrequent access after 30 days, expire after 60 once 5 newer
    /// noncurrent versions exist.
    pub fn rolling_history() -> Self {
        Self {
            rule_id: NONCURRENT_RULE_ID.to_string(),
            enabled: true,
            transition_days: 30,
            transition_storage_class: INFREQUENT_ACCESS.to_string(),
            expiration_days: 60,
            newer_noncurrent_versions: 5,
        }
    }
}

/// Outcome of one lifecycle enforcement pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleReport {
    pub transitioned: usize,
    pub expired: usize,
}
