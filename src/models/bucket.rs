//! Represents a logical bucket, the backing container of one studio.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A storage bucket owned by a studio.
///
/// The name is generated from the studio's human name plus a random suffix, so
/// it is globally unique and never changes after creation.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    /// Globally unique bucket name (DNS-style naming rules).
    pub name: String,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,

    /// Whether every write creates a new retrievable version.
    pub versioning_enabled: bool,
}

/// One page of buckets plus the token needed to fetch the next one.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct BucketPage {
    /// Opaque token for the following page; `None` on the last page.
    pub continuation_token: Option<String>,

    /// Buckets in backend order.
    pub buckets: Vec<Bucket>,
}
