//! Represents objects, their versions and delete markers.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use std::{collections::HashMap, fmt, io, path::PathBuf};

/// One entry in the version history of a key.
///
/// An entry is either a real object version (payload on disk) or a delete
/// marker. The newest entry decides whether the key is currently visible.
#[derive(Serialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ObjectVersion {
    /// Monotonic write order across the whole store.
    #[serde(skip)]
    pub seq: i64,

    pub bucket: String,
    pub key: String,

    /// Opaque version identifier (`null` in unversioned buckets).
    pub version_id: String,

    pub is_delete_marker: bool,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub etag: Option<String>,
    pub storage_class: String,

    /// User metadata (`genre`, `version`, ...).
    pub metadata: Json<HashMap<String, String>>,

    pub last_modified: DateTime<Utc>,
}

/// Address of one version or delete marker, used by batch deletes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectIdentifier {
    pub key: String,
    pub version_id: String,
}

/// Result of deleting an object or a single version.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub key: String,

    /// The marker created (soft delete) or the entry removed (versioned delete).
    pub version_id: String,

    /// Whether the created or removed entry is a delete marker.
    pub delete_marker: bool,
}

/// Paging parameters for version listings.
#[derive(Clone, Debug, Default)]
pub struct ListVersionsParams {
    pub key_marker: Option<String>,
    pub version_id_marker: Option<String>,
    pub max_keys: usize,
}

/// One page of a version listing. Versions and markers keep listing order.
#[derive(Debug, Default)]
pub struct VersionListing {
    pub versions: Vec<ObjectVersion>,
    pub delete_markers: Vec<ObjectVersion>,
    pub is_truncated: bool,
    pub next_key_marker: Option<String>,
    pub next_version_id_marker: Option<String>,
}

/// An object version together with a stream over its payload.
pub struct ObjectBody {
    pub version: ObjectVersion,
    pub body: BoxStream<'static, io::Result<Bytes>>,
}

impl fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBody")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// An object version written to the local download directory.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DownloadedObject {
    pub bucket: String,
    pub key: String,
    pub version_id: String,
    pub content_type: Option<String>,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Result of any upload that produced a new object version.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutcome {
    pub bucket: String,
    pub key: String,
    pub version_id: String,
    pub etag: Option<String>,
}
