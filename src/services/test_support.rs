//! Fixtures shared by service and handler tests.

use crate::{
    models::{
        bucket::{Bucket, BucketPage},
        lifecycle::LifecycleRule,
        multipart::{CompletedPart, MultipartUpload},
        object::{
            DeleteOutcome, ListVersionsParams, ObjectBody, ObjectIdentifier,
            ObjectVersion, VersionListing,
        },
    },
    services::{
        backend::{BackendError, BackendResult, StorageBackend},
        local_store::LocalBackend,
        part_signer::PartSigner,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;

pub const TEST_SECRET: &str = "test-secret";
pub const TEST_PUBLIC_URL: &str = "http://localhost:3000";

/// A migrated [`LocalBackend`] living in its own temp directory.
pub struct TestContext {
    pub store: Arc<LocalBackend>,
    download_dir: PathBuf,
    _dir: TempDir,
}

impl TestContext {
    pub fn backend(&self) -> Arc<dyn StorageBackend> {
        self.store.clone()
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }
}

pub async fn local_backend() -> TestContext {
    let dir = tempfile::tempdir().unwrap();
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("metadata.db"))
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();

    let store = LocalBackend::new(
        Arc::new(pool),
        dir.path().join("objects"),
        PartSigner::new(TEST_SECRET, TEST_PUBLIC_URL),
    );
    store.migrate().await.unwrap();

    TestContext {
        store: Arc::new(store),
        download_dir: dir.path().join("downloads"),
        _dir: dir,
    }
}

/// Create `name` directly on the backend with versioning switched on.
pub async fn versioned_bucket(ctx: &TestContext, name: &str) -> String {
    ctx.store.create_bucket(name).await.unwrap();
    ctx.store.put_bucket_versioning(name, true).await.unwrap();
    name.to_string()
}

/// Delegates to a [`LocalBackend`] but can fail chosen multipart calls.
pub struct FaultyBackend {
    inner: Arc<LocalBackend>,
    fail_part: Option<u32>,
    fail_abort: bool,
    aborted: AtomicUsize,
    completed_orders: Mutex<Vec<Vec<u32>>>,
}

impl FaultyBackend {
    pub fn new(inner: Arc<LocalBackend>) -> Self {
        Self {
            inner,
            fail_part: None,
            fail_abort: false,
            aborted: AtomicUsize::new(0),
            completed_orders: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_part(mut self, part_number: u32) -> Self {
        self.fail_part = Some(part_number);
        self
    }

    pub fn fail_abort(mut self) -> Self {
        self.fail_abort = true;
        self
    }

    /// Number of aborts that reached the store.
    pub fn aborted(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Part numbers of every completion request, in the order received.
    pub fn completed_orders(&self) -> Vec<Vec<u32>> {
        self.completed_orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageBackend for FaultyBackend {
    async fn create_bucket(&self, name: &str) -> BackendResult<Bucket> {
        self.inner.create_bucket(name).await
    }

    async fn list_buckets(
        &self,
        prefix: &str,
        limit: usize,
        continuation_token: Option<&str>,
    ) -> BackendResult<BucketPage> {
        self.inner.list_buckets(prefix, limit, continuation_token).await
    }

    async fn delete_bucket(&self, name: &str) -> BackendResult<()> {
        self.inner.delete_bucket(name).await
    }

    async fn put_bucket_versioning(&self, name: &str, enabled: bool) -> BackendResult<()> {
        self.inner.put_bucket_versioning(name, enabled).await
    }

    async fn put_bucket_lifecycle(&self, name: &str, rule: &LifecycleRule) -> BackendResult<()> {
        self.inner.put_bucket_lifecycle(name, rule).await
    }

    async fn get_bucket_lifecycle(&self, name: &str) -> BackendResult<Option<LifecycleRule>> {
        self.inner.get_bucket_lifecycle(name).await
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<String>,
        metadata: HashMap<String, String>,
    ) -> BackendResult<ObjectVersion> {
        self.inner
            .put_object(bucket, key, body, content_type, metadata)
            .await
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> BackendResult<ObjectBody> {
        self.inner.get_object(bucket, key, version_id).await
    }

    async fn head_object(&self, bucket: &str, key: &str) -> BackendResult<ObjectVersion> {
        self.inner.head_object(bucket, key).await
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> BackendResult<DeleteOutcome> {
        self.inner.delete_object(bucket, key, version_id).await
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[ObjectIdentifier],
    ) -> BackendResult<Vec<DeleteOutcome>> {
        self.inner.delete_objects(bucket, objects).await
    }

    async fn list_object_versions(
        &self,
        bucket: &str,
        params: ListVersionsParams,
    ) -> BackendResult<VersionListing> {
        self.inner.list_object_versions(bucket, params).await
    }

    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
        metadata: HashMap<String, String>,
    ) -> BackendResult<ObjectVersion> {
        self.inner
            .copy_object(source_bucket, source_key, dest_bucket, dest_key, metadata)
            .await
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        metadata: HashMap<String, String>,
    ) -> BackendResult<MultipartUpload> {
        self.inner
            .create_multipart_upload(bucket, key, content_type, metadata)
            .await
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> BackendResult<String> {
        if self.fail_part == Some(part_number) {
            return Err(BackendError::Io(std::io::Error::other(format!(
                "injected failure on part {part_number}"
            ))));
        }
        self.inner
            .upload_part(bucket, key, upload_id, part_number, body)
            .await
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> BackendResult<ObjectVersion> {
        self.completed_orders
            .lock()
            .unwrap()
            .push(parts.iter().map(|p| p.part_number).collect());
        self.inner
            .complete_multipart_upload(bucket, key, upload_id, parts)
            .await
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> BackendResult<()> {
        if self.fail_abort {
            return Err(BackendError::Io(std::io::Error::other(
                "injected abort failure",
            )));
        }
        self.inner
            .abort_multipart_upload(bucket, key, upload_id)
            .await?;
        self.aborted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_multipart_uploads(&self, bucket: &str) -> BackendResult<Vec<MultipartUpload>> {
        self.inner.list_multipart_uploads(bucket).await
    }

    async fn presign_upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        ttl: Duration,
    ) -> BackendResult<String> {
        self.inner
            .presign_upload_part(bucket, key, upload_id, part_number, ttl)
            .await
    }
}
