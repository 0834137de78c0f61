//! Represents multipart upload sessions, their parts and the request/response
//! shapes of the client-driven (presigned) upload flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use std::collections::HashMap;

/// A multipart upload session, alive until completed or aborted.
#[derive(Serialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MultipartUpload {
    /// Unique upload ID (returned to client).
    pub upload_id: String,

    pub bucket: String,

    /// Object key being uploaded.
    pub key: String,

    pub content_type: Option<String>,

    /// User metadata applied to the object on completion.
    pub metadata: Json<HashMap<String, String>>,

    /// Timestamp when upload was initiated.
    pub initiated_at: DateTime<Utc>,
}

/// Represents a single staged part in a multipart upload session.
#[derive(Serialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MultipartPart {
    pub upload_id: String,

    /// Part number (1-based).
    pub part_number: i64,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 hex digest of the part payload.
    pub etag: String,

    pub uploaded_at: DateTime<Utc>,
}

/// A part the caller reports as uploaded: its number and integrity tag.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Body of `POST /studios/{id}/uploads/initiate`.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadRequest {
    /// Object key; the game's name.
    pub key: String,
    pub file_size: u64,
    pub content_type: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// One planned part with the URL the client must PUT its bytes to.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresignedPart {
    pub part_number: u32,
    pub signed_url: String,
    pub part_size: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadResponse {
    pub upload_id: String,
    pub key: String,
    pub parts: Vec<PresignedPart>,
}

/// Body of `POST /studios/{id}/uploads/complete`.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub upload_id: String,
    pub key: String,
    pub parts: Vec<CompletedPart>,
}
