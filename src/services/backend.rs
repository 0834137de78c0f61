//! The capability set the gateway needs from a versioned object store.
//!
//! Implementations report failures as [`BackendError`] codes; the gateway maps
//! those onto its own closed taxonomy in one place and never inspects
//! implementation-specific errors.

use crate::models::{
    bucket::{Bucket, BucketPage},
    lifecycle::LifecycleRule,
    multipart::{CompletedPart, MultipartUpload},
    object::{
        DeleteOutcome, ListVersionsParams, ObjectBody, ObjectIdentifier,
        ObjectVersion, VersionListing,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{collections::HashMap, io, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("bucket `{0}` not found")]
    NoSuchBucket(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{0}` is not empty")]
    BucketNotEmpty(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NoSuchKey { bucket: String, key: String },
    #[error("version `{version_id}` of `{key}` not found in bucket `{bucket}`")]
    NoSuchVersion {
        bucket: String,
        key: String,
        version_id: String,
    },
    #[error("multipart upload `{0}` not found")]
    NoSuchUpload(String),
    #[error("part {part_number} is missing or its etag does not match")]
    InvalidPart { part_number: u32 },
    #[error("parts must be listed in strictly ascending order")]
    InvalidPartOrder,
    #[error("part {part_number} is smaller than the minimum allowed size")]
    EntityTooSmall { part_number: u32 },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("request signature does not match")]
    SignatureDoesNotMatch,
    #[error("signed request has expired")]
    RequestExpired,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Versioned, bucket-based object storage.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // --- buckets ---

    async fn create_bucket(&self, name: &str) -> BackendResult<Bucket>;

    /// List buckets whose names start with `prefix`, in backend order.
    async fn list_buckets(
        &self,
        prefix: &str,
        limit: usize,
        continuation_token: Option<&str>,
    ) -> BackendResult<BucketPage>;

    /// Fails with `BucketNotEmpty` while any version or delete marker remains.
    async fn delete_bucket(&self, name: &str) -> BackendResult<()>;

    async fn put_bucket_versioning(&self, name: &str, enabled: bool) -> BackendResult<()>;

    async fn put_bucket_lifecycle(&self, name: &str, rule: &LifecycleRule) -> BackendResult<()>;

    async fn get_bucket_lifecycle(&self, name: &str) -> BackendResult<Option<LifecycleRule>>;

    // --- objects ---

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<String>,
        metadata: HashMap<String, String>,
    ) -> BackendResult<ObjectVersion>;

    /// Current version when `version_id` is `None`, otherwise that exact version.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> BackendResult<ObjectBody>;

    /// Metadata of the current version, without payload.
    async fn head_object(&self, bucket: &str, key: &str) -> BackendResult<ObjectVersion>;

    /// Without `version_id` a delete marker is appended; with one, exactly
    /// that entry is removed for good.
    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> BackendResult<DeleteOutcome>;

    /// Permanently remove many entries at once. Missing entries are skipped.
    async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[ObjectIdentifier],
    ) -> BackendResult<Vec<DeleteOutcome>>;

    async fn list_object_versions(
        &self,
        bucket: &str,
        params: ListVersionsParams,
    ) -> BackendResult<VersionListing>;

    /// Copy the current version of the source with `metadata` replacing its
    /// user metadata; always produces a new version.
    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
        metadata: HashMap<String, String>,
    ) -> BackendResult<ObjectVersion>;

    // --- multipart ---

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        metadata: HashMap<String, String>,
    ) -> BackendResult<MultipartUpload>;

    /// Stage one part and return its etag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> BackendResult<String>;

    /// `parts` must already be sorted ascending by part number.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> BackendResult<ObjectVersion>;

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> BackendResult<()>;

    async fn list_multipart_uploads(&self, bucket: &str) -> BackendResult<Vec<MultipartUpload>>;

    // --- signing ---

    /// A URL that lets its holder upload exactly this part until `ttl` elapses.
    async fn presign_upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        ttl: Duration,
    ) -> BackendResult<String>;
}
