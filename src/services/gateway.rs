//! ObjectStorageGateway, the one entry point studio, game and upload
//! handlers call. It owns no state between calls; identity and durability
//! live entirely in the [`StorageBackend`].

use crate::{
    models::{
        bucket::{Bucket, BucketPage},
        metadata::{GameInfo, GameMetadataPatch},
        multipart::{CompleteUploadRequest, InitiateUploadRequest, InitiateUploadResponse},
        object::{DeleteOutcome, DownloadedObject, UploadOutcome},
    },
    services::{
        backend::{BackendError, StorageBackend},
        bucket_lifecycle::{BucketDeletePolicy, BucketLifecycleManager},
        multipart_orchestrator::{MultipartUploadOrchestrator, PRESIGNED_URL_TTL},
        object_versions::ObjectVersionManager,
    },
};
use bytes::Bytes;
use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{info, warn};

/// Payloads at or above this size go through server-driven multipart.
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 100 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("bucket name `{0}` already exists")]
    BucketNameConflict(String),
    #[error("bucket `{0}` does not exist")]
    BucketNotFound(String),
    #[error("bucket `{0}` is not empty")]
    BucketNotEmpty(String),
    #[error("object `{key}` does not exist in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("multipart upload `{upload_id}` of `{key}` failed: {source}")]
    MultipartUploadFailed {
        key: String,
        upload_id: String,
        #[source]
        source: Box<GatewayError>,
    },
    #[error("storage failure: {0}")]
    Storage(#[source] BackendError),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<BackendError> for GatewayError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NoSuchBucket(name) => GatewayError::BucketNotFound(name),
            BackendError::BucketAlreadyExists(name) => GatewayError::BucketNameConflict(name),
            BackendError::BucketNotEmpty(name) => GatewayError::BucketNotEmpty(name),
            BackendError::NoSuchKey { bucket, key }
            | BackendError::NoSuchVersion { bucket, key, .. } => {
                GatewayError::ObjectNotFound { bucket, key }
            }
            err @ (BackendError::InvalidBucketName { .. }
            | BackendError::InvalidObjectKey
            | BackendError::NoSuchUpload(_)
            | BackendError::InvalidPart { .. }
            | BackendError::InvalidPartOrder
            | BackendError::EntityTooSmall { .. }
            | BackendError::InvalidArgument(_)) => GatewayError::InvalidRequest(err.to_string()),
            other => GatewayError::Storage(other),
        }
    }
}

/// How a payload the gateway receives in full is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    /// One put request.
    SinglePart,
    /// Gateway slices the payload and drives a multipart session itself.
    ServerDriven,
}

impl UploadStrategy {
    pub fn for_payload(size: u64, threshold: u64) -> Self {
        if size >= threshold {
            UploadStrategy::ServerDriven
        } else {
            UploadStrategy::SinglePart
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Prefix of every managed bucket name (`dev` yields `dev.` names).
    pub namespace: String,
    pub download_dir: PathBuf,
    pub multipart_threshold: u64,
    pub delete_policy: BucketDeletePolicy,
    pub presign_ttl: Duration,
    /// Presigned sessions older than this are aborted by sweeps.
    pub stale_upload_after: chrono::Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            namespace: "dev".into(),
            download_dir: PathBuf::from("downloads"),
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            delete_policy: BucketDeletePolicy::Purge,
            presign_ttl: PRESIGNED_URL_TTL,
            stale_upload_after: chrono::Duration::hours(24),
        }
    }
}

#[derive(Clone)]
pub struct ObjectStorageGateway {
    backend: Arc<dyn StorageBackend>,
    buckets: BucketLifecycleManager,
    objects: ObjectVersionManager,
    uploads: MultipartUploadOrchestrator,
    multipart_threshold: u64,
}

impl ObjectStorageGateway {
    pub fn new(backend: Arc<dyn StorageBackend>, options: GatewayOptions) -> Self {
        let objects = ObjectVersionManager::new(backend.clone(), options.download_dir);
        let buckets = BucketLifecycleManager::new(
            backend.clone(),
            objects.clone(),
            options.namespace,
            options.delete_policy,
        );
        let uploads = MultipartUploadOrchestrator::new(
            backend.clone(),
            options.presign_ttl,
            options.stale_upload_after,
        );

        Self {
            backend,
            buckets,
            objects,
            uploads,
            multipart_threshold: options.multipart_threshold,
        }
    }

    pub async fn create_bucket(&self, name: &str) -> GatewayResult<Bucket> {
        self.buckets.create_bucket(name).await
    }

    pub async fn fetch_buckets(
        &self,
        limit: usize,
        continuation_token: Option<&str>,
    ) -> GatewayResult<BucketPage> {
        self.buckets.fetch_buckets(limit, continuation_token).await
    }

    pub async fn delete_bucket(&self, name: &str) -> GatewayResult<()> {
        self.buckets.delete_bucket(name).await
    }

    /// Store a payload with a single put.
    pub async fn put_object_small(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<String>,
    ) -> GatewayResult<UploadOutcome> {
        let version = self
            .backend
            .put_object(bucket, key, body, content_type, HashMap::new())
            .await?;

        info!(
            "Stored {}/{} as version {}",
            bucket, key, version.version_id
        );
        Ok(UploadOutcome {
            bucket: bucket.to_string(),
            key: key.to_string(),
            version_id: version.version_id,
            etag: version.etag,
        })
    }

    /// Store a payload through a server-driven multipart session.
    pub async fn put_object_large(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<String>,
    ) -> GatewayResult<UploadOutcome> {
        self.uploads
            .upload_server_driven(bucket, key, body, content_type)
            .await
    }

    /// Store a payload, choosing the strategy from its size.
    pub async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<String>,
    ) -> GatewayResult<UploadOutcome> {
        match UploadStrategy::for_payload(body.len() as u64, self.multipart_threshold) {
            UploadStrategy::SinglePart => {
                self.put_object_small(bucket, key, body, content_type).await
            }
            UploadStrategy::ServerDriven => {
                self.put_object_large(bucket, key, body, content_type).await
            }
        }
    }

    pub async fn initiate_upload(
        &self,
        bucket: &str,
        request: &InitiateUploadRequest,
    ) -> GatewayResult<InitiateUploadResponse> {
        self.uploads.initiate_presigned(bucket, request).await
    }

    pub async fn complete_upload(
        &self,
        bucket: &str,
        request: &CompleteUploadRequest,
    ) -> GatewayResult<UploadOutcome> {
        self.uploads.complete_presigned(bucket, request).await
    }

    pub async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> GatewayResult<DownloadedObject> {
        self.objects.get_object(bucket, key, version_id).await
    }

    pub async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> GatewayResult<DeleteOutcome> {
        self.objects.delete_object(bucket, key, version_id).await
    }

    pub async fn fetch_metadata(&self, bucket: &str, key: &str) -> GatewayResult<GameInfo> {
        self.objects.fetch_metadata(bucket, key).await
    }

    pub async fn modify_metadata(
        &self,
        bucket: &str,
        key: &str,
        patch: &GameMetadataPatch,
    ) -> GatewayResult<GameInfo> {
        self.objects.modify_metadata(bucket, key, patch).await
    }

    /// Abort stale presigned sessions in every managed bucket.
    pub async fn sweep_stale_uploads(&self) -> GatewayResult<usize> {
        let mut aborted = 0;
        let mut token: Option<String> = None;
        loop {
            let page = self.buckets.fetch_buckets(100, token.as_deref()).await?;
            for bucket in &page.buckets {
                match self.uploads.expire_stale_uploads(&bucket.name).await {
                    Ok(count) => aborted += count,
                    Err(err) => warn!("Could not sweep uploads of {}: {}", bucket.name, err),
                }
            }
            match page.continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(aborted)
    }
}
