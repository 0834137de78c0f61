//! src/services/local_store.rs
//!
//! LocalBackend is a versioned object store backed by SQLite for metadata and
//! local disk for payloads. Every version of a key lives in its own file
//! beneath `base_path/{bucket}/{shard}/{shard}/{key}/{version_id}`; staged
//! multipart parts live beneath `base_path/.uploads/{upload_id}/`.

use crate::{
    models::{
        bucket::{Bucket, BucketPage},
        lifecycle::{LifecycleReport, LifecycleRule, STANDARD},
        multipart::{CompletedPart, MultipartPart, MultipartUpload},
        object::{
            DeleteOutcome, ListVersionsParams, ObjectBody, ObjectIdentifier,
            ObjectVersion, VersionListing,
        },
    },
    services::{
        backend::{BackendError, BackendResult, StorageBackend},
        part_signer::{PartSigner, SignedPartQuery},
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, pin_mut, stream};
use md5::Context;
use sqlx::{FromRow, QueryBuilder, SqlitePool, sqlite::Sqlite, types::Json};
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use uuid::Uuid;

/// Smallest size allowed for any part except the last one.
pub const MIN_NON_FINAL_PART_SIZE: i64 = 5 * 1024 * 1024;
pub const MAX_PART_NUMBER: u32 = 10_000;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const NULL_VERSION_ID: &str = "null";
const UPLOADS_DIR: &str = ".uploads";
const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const VERSION_COLUMNS: &str = "seq, bucket, key, version_id, is_delete_marker, content_type, \
     size_bytes, etag, storage_class, metadata, last_modified";
const UPLOAD_COLUMNS: &str = "upload_id, bucket, key, content_type, metadata, initiated_at";
const RULE_COLUMNS: &str = "rule_id, enabled, transition_days, transition_storage_class, \
     expiration_days, newer_noncurrent_versions";

/// Attributes of a version about to be committed.
struct NewVersion {
    content_type: Option<String>,
    size_bytes: i64,
    etag: String,
    metadata: HashMap<String, String>,
}

#[derive(FromRow)]
struct BucketRule {
    bucket: String,
    #[sqlx(flatten)]
    rule: LifecycleRule,
}

/// LocalBackend implements [`StorageBackend`] on one machine:
/// - bucket rows, version history and upload sessions in SQLite
/// - payload files written to a temp file, fsynced, then renamed into place
/// - direct part uploads authorised by [`PartSigner`] URLs
#[derive(Clone)]
pub struct LocalBackend {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    signer: PartSigner,
}

impl LocalBackend {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>, signer: PartSigner) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            signer,
        }
    }

    /// Apply the embedded schema. Statements are idempotent.
    pub async fn migrate(&self) -> BackendResult<usize> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        for stmt in &statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(statements.len())
    }

    /// Rejects keys that are empty, too long, absolute, contain `..`, or
    /// carry control characters and backslashes.
    fn ensure_key_safe(&self, key: &str) -> BackendResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(BackendError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(BackendError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(BackendError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// Enforces S3-like naming rules:
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    /// - cannot look like an IPv4 address
    fn ensure_bucket_name_safe(&self, name: &str) -> BackendResult<()> {
        let invalid = |reason: &str| -> BackendResult<()> {
            Err(BackendError::InvalidBucketName {
                name: name.to_string(),
                reason: reason.to_string(),
            })
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return invalid("must be between 3 and 63 characters");
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return invalid("allowed characters are lowercase letters, digits, dots, and hyphens");
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return invalid("must start and end with a lowercase letter or digit");
        }
        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return invalid("cannot contain consecutive dots or dot-hyphen combinations");
        }
        if is_ipv4_like(name) {
            return invalid("must not be formatted like an IP address");
        }
        Ok(())
    }

    fn ensure_part_number(part_number: u32) -> BackendResult<()> {
        if (1..=MAX_PART_NUMBER).contains(&part_number) {
            Ok(())
        } else {
            Err(BackendError::InvalidArgument(format!(
                "part number must be between 1 and {MAX_PART_NUMBER}, got {part_number}"
            )))
        }
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Two-level shard identifiers from MD5(bucket/key), as lowercase hex.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Directory holding every version of one key.
    fn object_dir(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn version_path(&self, bucket_name: &str, key: &str, version_id: &str) -> PathBuf {
        self.object_dir(bucket_name, key).join(version_id)
    }

    fn upload_dir(&self, upload_id: &str) -> PathBuf {
        self.base_path.join(UPLOADS_DIR).join(upload_id)
    }

    fn part_path(&self, upload_id: &str, part_number: u32) -> PathBuf {
        self.upload_dir(upload_id).join(format!("{part_number:05}"))
    }

    async fn fetch_bucket(&self, bucket: &str) -> BackendResult<Bucket> {
        sqlx::query_as::<_, Bucket>(
            "SELECT name, created_at, versioning_enabled FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| BackendError::NoSuchBucket(bucket.to_string()))
    }

    /// Newest entry for a key, delete markers included.
    async fn latest_entry(&self, bucket: &str, key: &str) -> BackendResult<Option<ObjectVersion>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM object_versions
             WHERE bucket = ? AND key = ? ORDER BY seq DESC LIMIT 1"
        );
        Ok(sqlx::query_as::<_, ObjectVersion>(&sql)
            .bind(bucket)
            .bind(key)
            .fetch_optional(&*self.db)
            .await?)
    }

    /// The visible version of a key: its newest entry unless that is a delete marker.
    async fn current_version(&self, bucket: &str, key: &str) -> BackendResult<ObjectVersion> {
        match self.latest_entry(bucket, key).await? {
            Some(version) if !version.is_delete_marker => Ok(version),
            _ => Err(BackendError::NoSuchKey {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
        }
    }

    async fn find_version(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
    ) -> BackendResult<Option<ObjectVersion>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM object_versions
             WHERE bucket = ? AND key = ? AND version_id = ?"
        );
        Ok(sqlx::query_as::<_, ObjectVersion>(&sql)
            .bind(bucket)
            .bind(key)
            .bind(version_id)
            .fetch_optional(&*self.db)
            .await?)
    }

    async fn fetch_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> BackendResult<MultipartUpload> {
        let sql = format!(
            "SELECT {UPLOAD_COLUMNS} FROM multipart_uploads
             WHERE upload_id = ? AND bucket = ? AND key = ?"
        );
        sqlx::query_as::<_, MultipartUpload>(&sql)
            .bind(upload_id)
            .bind(bucket)
            .bind(key)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| BackendError::NoSuchUpload(upload_id.to_string()))
    }

    /// Stream bytes into a fresh temp file inside `dir`.
    ///
    /// Returns the temp path, the byte count and the MD5 digest. The temp file
    /// is removed again on any error.
    async fn write_temp<S>(&self, dir: &Path, stream: S) -> BackendResult<(PathBuf, i64, String)>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        fs::create_dir_all(dir).await?;
        let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(BackendError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(BackendError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BackendError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BackendError::Io(err));
        }

        Ok((tmp_path, size_bytes, format!("{:x}", digest.compute())))
    }

    /// Move a temp file into place, replacing any file already there.
    async fn promote(tmp_path: &Path, final_path: &Path) -> BackendResult<()> {
        if let Err(err) = fs::rename(tmp_path, final_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(final_path).await?;
                fs::rename(tmp_path, final_path).await?;
            } else {
                let _ = fs::remove_file(tmp_path).await;
                return Err(BackendError::Io(err));
            }
        }
        Ok(())
    }

    /// Turn a temp payload into a new version row of `key`.
    ///
    /// Versioned buckets append; unversioned buckets replace the whole history
    /// of the key with a single `null` version.
    async fn commit_version(
        &self,
        bucket: &Bucket,
        key: &str,
        tmp_path: &Path,
        new: NewVersion,
    ) -> BackendResult<ObjectVersion> {
        let version_id = if bucket.versioning_enabled {
            Uuid::new_v4().simple().to_string()
        } else {
            NULL_VERSION_ID.to_string()
        };
        let final_path = self.version_path(&bucket.name, key, &version_id);
        Self::promote(tmp_path, &final_path).await?;

        let insert = async {
            let mut tx = self.db.begin().await?;
            if !bucket.versioning_enabled {
                sqlx::query("DELETE FROM object_versions WHERE bucket = ? AND key = ?")
                    .bind(&bucket.name)
                    .bind(key)
                    .execute(&mut *tx)
                    .await?;
            }
            let sql = format!(
                "INSERT INTO object_versions (
                    bucket, key, version_id, is_delete_marker, content_type, size_bytes,
                    etag, storage_class, metadata, last_modified
                 ) VALUES (?, ?, ?, 0, ?, ?, ?, ?, ?, ?)
                 RETURNING {VERSION_COLUMNS}"
            );
            let version = sqlx::query_as::<_, ObjectVersion>(&sql)
                .bind(&bucket.name)
                .bind(key)
                .bind(&version_id)
                .bind(&new.content_type)
                .bind(new.size_bytes)
                .bind(&new.etag)
                .bind(STANDARD)
                .bind(Json(&new.metadata))
                .bind(Utc::now())
                .fetch_one(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok::<_, sqlx::Error>(version)
        };

        match insert.await {
            Ok(version) => Ok(version),
            Err(err) => {
                let _ = fs::remove_file(&final_path).await;
                Err(BackendError::Sqlx(err))
            }
        }
    }

    /// Remove the payload file of a version and prune emptied directories.
    async fn remove_version_file(&self, bucket: &str, key: &str, version_id: &str) {
        let file_path = self.version_path(bucket, key, version_id);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => debug!("failed to remove {}: {}", file_path.display(), err),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(bucket);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }
    }

    /// Recursively remove empty directories up to bucket root.
    ///
    /// Stops when:
    /// - directory not empty
    /// - directory not found
    /// - reached root
    /// - encountered unexpected I/O errors
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }

    async fn discard_upload_dir(&self, upload_id: &str) {
        let dir = self.upload_dir(upload_id);
        if let Err(err) = fs::remove_dir_all(&dir).await {
            if err.kind() != ErrorKind::NotFound {
                debug!("failed to remove upload directory {}: {}", dir.display(), err);
            }
        }
    }

    /// Accept a part PUT against a signed URL.
    pub async fn upload_signed_part(
        &self,
        bucket: &str,
        key: &str,
        query: &SignedPartQuery,
        body: Bytes,
    ) -> BackendResult<String> {
        self.signer.verify(bucket, key, query, Utc::now())?;
        self.upload_part(bucket, key, &query.upload_id, query.part_number, body)
            .await
    }

    /// Apply every enabled lifecycle rule as of `now`.
    ///
    /// An entry becomes noncurrent when the next newer entry of its key is
    /// written. Noncurrent versions past `transition_days` move to the
    /// rule's storage class; noncurrent entries past `expiration_days` with at
    /// least `newer_noncurrent_versions` newer noncurrent entries are removed.
    pub async fn enforce_lifecycle(&self, now: DateTime<Utc>) -> BackendResult<LifecycleReport> {
        let sql = format!(
            "SELECT bucket, {RULE_COLUMNS} FROM bucket_lifecycle_rules WHERE enabled = 1"
        );
        let rules = sqlx::query_as::<_, BucketRule>(&sql)
            .fetch_all(&*self.db)
            .await?;

        let mut report = LifecycleReport::default();
        for BucketRule { bucket, rule } in rules {
            let sql = format!(
                "SELECT {VERSION_COLUMNS} FROM object_versions
                 WHERE bucket = ? ORDER BY key ASC, seq DESC"
            );
            let entries = sqlx::query_as::<_, ObjectVersion>(&sql)
                .bind(&bucket)
                .fetch_all(&*self.db)
                .await?;

            let mut expired = Vec::new();
            for history in entries.chunk_by(|a, b| a.key == b.key) {
                for (index, entry) in history.iter().enumerate().skip(1) {
                    let noncurrent_days = (now - history[index - 1].last_modified).num_days();
                    let newer_noncurrent = (index - 1) as i64;

                    if noncurrent_days >= rule.expiration_days
                        && newer_noncurrent >= rule.newer_noncurrent_versions
                    {
                        expired.push(ObjectIdentifier {
                            key: entry.key.clone(),
                            version_id: entry.version_id.clone(),
                        });
                    } else if !entry.is_delete_marker
                        && noncurrent_days >= rule.transition_days
                        && entry.storage_class != rule.transition_storage_class
                    {
                        sqlx::query("UPDATE object_versions SET storage_class = ? WHERE seq = ?")
                            .bind(&rule.transition_storage_class)
                            .bind(entry.seq)
                            .execute(&*self.db)
                            .await?;
                        report.transitioned += 1;
                    }
                }
            }

            if !expired.is_empty() {
                report.expired += self.delete_objects(&bucket, &expired).await?.len();
            }
        }

        info!(
            "Lifecycle pass transitioned {} and expired {} versions",
            report.transitioned, report.expired
        );
        Ok(report)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    /// Insert the bucket row and create its directory.
    async fn create_bucket(&self, name: &str) -> BackendResult<Bucket> {
        self.ensure_bucket_name_safe(name)?;

        let bucket = Bucket {
            name: name.to_string(),
            created_at: Utc::now(),
            versioning_enabled: false,
        };

        match sqlx::query(
            "INSERT INTO buckets (name, created_at, versioning_enabled) VALUES (?, ?, ?)",
        )
        .bind(&bucket.name)
        .bind(bucket.created_at)
        .bind(bucket.versioning_enabled)
        .execute(&*self.db)
        .await
        {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(BackendError::BucketAlreadyExists(name.to_string()));
            }
            Err(err) => return Err(BackendError::Sqlx(err)),
        }

        fs::create_dir_all(self.bucket_root(name)).await?;
        Ok(bucket)
    }

    /// Buckets ordered by name; the continuation token is the last name served.
    async fn list_buckets(
        &self,
        prefix: &str,
        limit: usize,
        continuation_token: Option<&str>,
    ) -> BackendResult<BucketPage> {
        let limit = limit.clamp(1, 1000);
        let fetch_limit = limit + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT name, created_at, versioning_enabled FROM buckets WHERE substr(name, 1, ",
        );
        builder.push_bind(prefix.chars().count() as i64);
        builder.push(") = ");
        builder.push_bind(prefix.to_string());
        if let Some(token) = continuation_token {
            builder.push(" AND name > ");
            builder.push_bind(token.to_string());
        }
        builder.push(" ORDER BY name ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut buckets: Vec<Bucket> = builder.build_query_as().fetch_all(&*self.db).await?;

        let mut continuation_token = None;
        if buckets.len() == fetch_limit {
            buckets.pop();
            continuation_token = buckets.last().map(|b| b.name.clone());
        }

        Ok(BucketPage {
            continuation_token,
            buckets,
        })
    }

    /// Delete an empty bucket together with its staged uploads and directory.
    async fn delete_bucket(&self, name: &str) -> BackendResult<()> {
        let bucket = self.fetch_bucket(name).await?;

        let remaining: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM object_versions WHERE bucket = ?")
                .bind(&bucket.name)
                .fetch_one(&*self.db)
                .await?;
        if remaining > 0 {
            return Err(BackendError::BucketNotEmpty(bucket.name));
        }

        let upload_ids: Vec<String> =
            sqlx::query_scalar("SELECT upload_id FROM multipart_uploads WHERE bucket = ?")
                .bind(&bucket.name)
                .fetch_all(&*self.db)
                .await?;

        let mut tx = self.db.begin().await?;
        sqlx::query(
            "DELETE FROM multipart_parts WHERE upload_id IN
             (SELECT upload_id FROM multipart_uploads WHERE bucket = ?)",
        )
        .bind(&bucket.name)
        .execute(&mut *tx)
        .await?;
        for table in ["multipart_uploads", "bucket_lifecycle_rules"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE bucket = ?"))
                .bind(&bucket.name)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM buckets WHERE name = ?")
            .bind(&bucket.name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        for upload_id in &upload_ids {
            self.discard_upload_dir(upload_id).await;
        }

        let bucket_path = self.bucket_root(&bucket.name);
        if let Err(err) = fs::remove_dir_all(&bucket_path).await {
            if err.kind() != ErrorKind::NotFound {
                debug!(
                    "failed to remove bucket directory {} after delete: {}",
                    bucket_path.display(),
                    err
                );
            }
        }

        Ok(())
    }

    async fn put_bucket_versioning(&self, name: &str, enabled: bool) -> BackendResult<()> {
        let result = sqlx::query("UPDATE buckets SET versioning_enabled = ? WHERE name = ?")
            .bind(enabled)
            .bind(name)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(BackendError::NoSuchBucket(name.to_string()));
        }
        Ok(())
    }

    async fn put_bucket_lifecycle(&self, name: &str, rule: &LifecycleRule) -> BackendResult<()> {
        let bucket = self.fetch_bucket(name).await?;
        sqlx::query(&format!(
            "INSERT INTO bucket_lifecycle_rules (bucket, {RULE_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(bucket) DO UPDATE SET
                rule_id = excluded.rule_id,
                enabled = excluded.enabled,
                transition_days = excluded.transition_days,
                transition_storage_class = excluded.transition_storage_class,
                expiration_days = excluded.expiration_days,
                newer_noncurrent_versions = excluded.newer_noncurrent_versions"
        ))
        .bind(&bucket.name)
        .bind(&rule.rule_id)
        .bind(rule.enabled)
        .bind(rule.transition_days)
        .bind(&rule.transition_storage_class)
        .bind(rule.expiration_days)
        .bind(rule.newer_noncurrent_versions)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn get_bucket_lifecycle(&self, name: &str) -> BackendResult<Option<LifecycleRule>> {
        let bucket = self.fetch_bucket(name).await?;
        let sql = format!("SELECT {RULE_COLUMNS} FROM bucket_lifecycle_rules WHERE bucket = ?");
        Ok(sqlx::query_as::<_, LifecycleRule>(&sql)
            .bind(&bucket.name)
            .fetch_optional(&*self.db)
            .await?)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<String>,
        metadata: HashMap<String, String>,
    ) -> BackendResult<ObjectVersion> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let dir = self.object_dir(&bucket_rec.name, key);
        let (tmp_path, size_bytes, etag) = self
            .write_temp(&dir, stream::once(async { Ok(body) }))
            .await?;

        self.commit_version(
            &bucket_rec,
            key,
            &tmp_path,
            NewVersion {
                content_type,
                size_bytes,
                etag,
                metadata,
            },
        )
        .await
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> BackendResult<ObjectBody> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let version = match version_id {
            None => self.current_version(&bucket_rec.name, key).await?,
            Some(id) => match self.find_version(&bucket_rec.name, key, id).await? {
                Some(version) if !version.is_delete_marker => version,
                Some(_) => {
                    return Err(BackendError::NoSuchKey {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    });
                }
                None => {
                    return Err(BackendError::NoSuchVersion {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                        version_id: id.to_string(),
                    });
                }
            },
        };

        let file_path = self.version_path(&bucket_rec.name, key, &version.version_id);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BackendError::NoSuchKey {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                BackendError::Io(err)
            }
        })?;

        Ok(ObjectBody {
            version,
            body: ReaderStream::new(file).boxed(),
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> BackendResult<ObjectVersion> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.current_version(&bucket_rec.name, key).await
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> BackendResult<DeleteOutcome> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let Some(version_id) = version_id else {
            if self.latest_entry(&bucket_rec.name, key).await?.is_none() {
                return Err(BackendError::NoSuchKey {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                });
            }

            if !bucket_rec.versioning_enabled {
                sqlx::query("DELETE FROM object_versions WHERE bucket = ? AND key = ?")
                    .bind(&bucket_rec.name)
                    .bind(key)
                    .execute(&*self.db)
                    .await?;
                self.remove_version_file(&bucket_rec.name, key, NULL_VERSION_ID)
                    .await;
                return Ok(DeleteOutcome {
                    key: key.to_string(),
                    version_id: NULL_VERSION_ID.to_string(),
                    delete_marker: false,
                });
            }

            let marker_id = Uuid::new_v4().simple().to_string();
            sqlx::query(
                "INSERT INTO object_versions (
                    bucket, key, version_id, is_delete_marker, size_bytes, storage_class,
                    metadata, last_modified
                 ) VALUES (?, ?, ?, 1, 0, ?, '{}', ?)",
            )
            .bind(&bucket_rec.name)
            .bind(key)
            .bind(&marker_id)
            .bind(STANDARD)
            .bind(Utc::now())
            .execute(&*self.db)
            .await?;

            debug!("Placed delete marker {} on {}/{}", marker_id, bucket, key);
            return Ok(DeleteOutcome {
                key: key.to_string(),
                version_id: marker_id,
                delete_marker: true,
            });
        };

        let entry = self
            .find_version(&bucket_rec.name, key, version_id)
            .await?
            .ok_or_else(|| BackendError::NoSuchVersion {
                bucket: bucket.to_string(),
                key: key.to_string(),
                version_id: version_id.to_string(),
            })?;

        sqlx::query("DELETE FROM object_versions WHERE seq = ?")
            .bind(entry.seq)
            .execute(&*self.db)
            .await?;
        if !entry.is_delete_marker {
            self.remove_version_file(&bucket_rec.name, key, &entry.version_id)
                .await;
        }

        Ok(DeleteOutcome {
            key: entry.key,
            version_id: entry.version_id,
            delete_marker: entry.is_delete_marker,
        })
    }

    /// Remove all listed entries in one transaction, then their payload files.
    async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[ObjectIdentifier],
    ) -> BackendResult<Vec<DeleteOutcome>> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM object_versions
             WHERE bucket = ? AND key = ? AND version_id = ?"
        );

        let mut removed = Vec::with_capacity(objects.len());
        let mut tx = self.db.begin().await?;
        for object in objects {
            let entry = sqlx::query_as::<_, ObjectVersion>(&sql)
                .bind(&bucket_rec.name)
                .bind(&object.key)
                .bind(&object.version_id)
                .fetch_optional(&mut *tx)
                .await?;
            if let Some(entry) = entry {
                sqlx::query("DELETE FROM object_versions WHERE seq = ?")
                    .bind(entry.seq)
                    .execute(&mut *tx)
                    .await?;
                removed.push(entry);
            }
        }
        tx.commit().await?;

        let mut outcomes = Vec::with_capacity(removed.len());
        for entry in removed {
            if !entry.is_delete_marker {
                self.remove_version_file(&bucket_rec.name, &entry.key, &entry.version_id)
                    .await;
            }
            outcomes.push(DeleteOutcome {
                key: entry.key,
                version_id: entry.version_id,
                delete_marker: entry.is_delete_marker,
            });
        }
        Ok(outcomes)
    }

    /// Versions and delete markers ordered by key, newest first within a key.
    async fn list_object_versions(
        &self,
        bucket: &str,
        params: ListVersionsParams,
    ) -> BackendResult<VersionListing> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let max_keys = params.max_keys.clamp(1, 1000);
        let fetch_limit = max_keys + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {VERSION_COLUMNS} FROM object_versions WHERE bucket = "
        ));
        builder.push_bind(bucket_rec.name.clone());

        if let Some(key_marker) = &params.key_marker {
            let marker_seq = match &params.version_id_marker {
                Some(version_id) => self
                    .find_version(&bucket_rec.name, key_marker, version_id)
                    .await?
                    .map(|v| v.seq),
                None => None,
            };
            match marker_seq {
                Some(seq) => {
                    builder.push(" AND (key > ");
                    builder.push_bind(key_marker.clone());
                    builder.push(" OR (key = ");
                    builder.push_bind(key_marker.clone());
                    builder.push(" AND seq < ");
                    builder.push_bind(seq);
                    builder.push("))");
                }
                None => {
                    builder.push(" AND key > ");
                    builder.push_bind(key_marker.clone());
                }
            }
        }

        builder.push(" ORDER BY key ASC, seq DESC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut rows: Vec<ObjectVersion> = builder.build_query_as().fetch_all(&*self.db).await?;

        let mut listing = VersionListing::default();
        if rows.len() == fetch_limit {
            rows.pop();
            listing.is_truncated = true;
            if let Some(last) = rows.last() {
                listing.next_key_marker = Some(last.key.clone());
                listing.next_version_id_marker = Some(last.version_id.clone());
            }
        }

        let (delete_markers, versions) = rows.into_iter().partition(|v| v.is_delete_marker);
        listing.delete_markers = delete_markers;
        listing.versions = versions;
        Ok(listing)
    }

    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
        metadata: HashMap<String, String>,
    ) -> BackendResult<ObjectVersion> {
        self.ensure_key_safe(source_key)?;
        self.ensure_key_safe(dest_key)?;
        let source_rec = self.fetch_bucket(source_bucket).await?;
        let dest_rec = if dest_bucket == source_bucket {
            source_rec.clone()
        } else {
            self.fetch_bucket(dest_bucket).await?
        };

        let source = self.current_version(&source_rec.name, source_key).await?;
        let source_path = self.version_path(&source_rec.name, source_key, &source.version_id);

        let dir = self.object_dir(&dest_rec.name, dest_key);
        fs::create_dir_all(&dir).await?;
        let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(err) = fs::copy(&source_path, &tmp_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(if err.kind() == ErrorKind::NotFound {
                BackendError::NoSuchKey {
                    bucket: source_bucket.to_string(),
                    key: source_key.to_string(),
                }
            } else {
                BackendError::Io(err)
            });
        }

        self.commit_version(
            &dest_rec,
            dest_key,
            &tmp_path,
            NewVersion {
                content_type: source.content_type.clone(),
                size_bytes: source.size_bytes,
                etag: source.etag.clone().unwrap_or_default(),
                metadata,
            },
        )
        .await
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        metadata: HashMap<String, String>,
    ) -> BackendResult<MultipartUpload> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let sql = format!(
            "INSERT INTO multipart_uploads ({UPLOAD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)
             RETURNING {UPLOAD_COLUMNS}"
        );
        let upload = sqlx::query_as::<_, MultipartUpload>(&sql)
            .bind(Uuid::new_v4().simple().to_string())
            .bind(&bucket_rec.name)
            .bind(key)
            .bind(content_type)
            .bind(Json(&metadata))
            .bind(Utc::now())
            .fetch_one(&*self.db)
            .await?;

        fs::create_dir_all(self.upload_dir(&upload.upload_id)).await?;
        Ok(upload)
    }

    /// Stage a part; re-uploading a part number replaces the earlier bytes.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> BackendResult<String> {
        Self::ensure_part_number(part_number)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let upload = self.fetch_upload(&bucket_rec.name, key, upload_id).await?;

        let dir = self.upload_dir(&upload.upload_id);
        let (tmp_path, size_bytes, etag) = self
            .write_temp(&dir, stream::once(async { Ok(body) }))
            .await?;
        Self::promote(&tmp_path, &self.part_path(&upload.upload_id, part_number)).await?;

        sqlx::query(
            "INSERT INTO multipart_parts (upload_id, part_number, size_bytes, etag, uploaded_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(upload_id, part_number) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                uploaded_at = excluded.uploaded_at",
        )
        .bind(&upload.upload_id)
        .bind(part_number as i64)
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        Ok(etag)
    }

    /// Validate the part list against staged parts and assemble the object.
    ///
    /// The list must be non-empty and strictly ascending; each part must be
    /// staged with the same etag; all but the last must reach the minimum
    /// part size. The object's etag is the MD5 of the part digests plus `-N`.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> BackendResult<ObjectVersion> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let upload = self.fetch_upload(&bucket_rec.name, key, upload_id).await?;

        if parts.is_empty() {
            return Err(BackendError::InvalidArgument(
                "at least one part is required".into(),
            ));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(BackendError::InvalidPartOrder);
        }

        let staged: HashMap<i64, MultipartPart> = sqlx::query_as::<_, MultipartPart>(
            "SELECT upload_id, part_number, size_bytes, etag, uploaded_at
             FROM multipart_parts WHERE upload_id = ?",
        )
        .bind(&upload.upload_id)
        .fetch_all(&*self.db)
        .await?
        .into_iter()
        .map(|part| (part.part_number, part))
        .collect();

        let mut combined_digest = Vec::with_capacity(parts.len() * 16);
        let mut size_bytes: i64 = 0;
        for (index, part) in parts.iter().enumerate() {
            let stored = staged
                .get(&(part.part_number as i64))
                .filter(|stored| stored.etag == part.etag.trim_matches('"'))
                .ok_or(BackendError::InvalidPart {
                    part_number: part.part_number,
                })?;
            if index + 1 < parts.len() && stored.size_bytes < MIN_NON_FINAL_PART_SIZE {
                return Err(BackendError::EntityTooSmall {
                    part_number: part.part_number,
                });
            }
            combined_digest.extend(hex::decode(&stored.etag).map_err(|_| {
                BackendError::InvalidPart {
                    part_number: part.part_number,
                }
            })?);
            size_bytes += stored.size_bytes;
        }

        let dir = self.object_dir(&bucket_rec.name, key);
        fs::create_dir_all(&dir).await?;
        let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let assemble = async {
            let mut out = File::create(&tmp_path).await?;
            for part in parts {
                let mut part_file =
                    File::open(self.part_path(&upload.upload_id, part.part_number)).await?;
                tokio::io::copy(&mut part_file, &mut out).await?;
            }
            out.flush().await?;
            out.sync_all().await
        };
        if let Err(err) = assemble.await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BackendError::Io(err));
        }

        let etag = format!("{:x}-{}", md5::compute(&combined_digest), parts.len());
        let version = self
            .commit_version(
                &bucket_rec,
                key,
                &tmp_path,
                NewVersion {
                    content_type: upload.content_type.clone(),
                    size_bytes,
                    etag,
                    metadata: upload.metadata.0.clone(),
                },
            )
            .await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM multipart_parts WHERE upload_id = ?")
            .bind(&upload.upload_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM multipart_uploads WHERE upload_id = ?")
            .bind(&upload.upload_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.discard_upload_dir(&upload.upload_id).await;

        Ok(version)
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> BackendResult<()> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let upload = self.fetch_upload(&bucket_rec.name, key, upload_id).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM multipart_parts WHERE upload_id = ?")
            .bind(&upload.upload_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM multipart_uploads WHERE upload_id = ?")
            .bind(&upload.upload_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.discard_upload_dir(&upload.upload_id).await;
        Ok(())
    }

    async fn list_multipart_uploads(&self, bucket: &str) -> BackendResult<Vec<MultipartUpload>> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let sql = format!(
            "SELECT {UPLOAD_COLUMNS} FROM multipart_uploads
             WHERE bucket = ? ORDER BY initiated_at ASC"
        );
        Ok(sqlx::query_as::<_, MultipartUpload>(&sql)
            .bind(&bucket_rec.name)
            .fetch_all(&*self.db)
            .await?)
    }

    async fn presign_upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        ttl: Duration,
    ) -> BackendResult<String> {
        Self::ensure_part_number(part_number)?;
        self.signer
            .sign(bucket, key, upload_id, part_number, ttl, Utc::now())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Check if a string matches IPv4-like dotted decimal form.
/// Rejects names formatted like `1.2.3.4`.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|segment| {
        !segment.is_empty()
            && segment.len() <= 3
            && segment.chars().all(|c| c.is_ascii_digit())
            && segment.parse::<u8>().is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        part_signer::parse_signed_url,
        test_support::{local_backend, versioned_bucket},
    };

    const MIB: usize = 1024 * 1024;

    fn list_all() -> ListVersionsParams {
        ListVersionsParams {
            max_keys: 1000,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn bucket_names_are_validated_and_unique() {
        let ctx = local_backend().await;

        for bad in ["ab", "Upper-Case", "-leading", "dots..inside", "192.168.1.1"] {
            let err = ctx.store.create_bucket(bad).await.unwrap_err();
            assert!(
                matches!(err, BackendError::InvalidBucketName { .. }),
                "{bad} should be rejected"
            );
        }

        ctx.store.create_bucket("dev.studio-a").await.unwrap();
        let err = ctx.store.create_bucket("dev.studio-a").await.unwrap_err();
        assert!(matches!(err, BackendError::BucketAlreadyExists(_)));
    }

    #[tokio::test]
    async fn unsafe_keys_are_rejected() {
        let ctx = local_backend().await;
        let bucket = versioned_bucket(&ctx, "dev.studio-a").await;

        for key in ["", "/absolute", "../escape", "back\\slash"] {
            let err = ctx
                .store
                .put_object(&bucket, key, Bytes::from_static(b"x"), None, HashMap::new())
                .await
                .unwrap_err();
            assert!(matches!(err, BackendError::InvalidObjectKey), "{key:?}");
        }
    }

    #[tokio::test]
    async fn unversioned_bucket_keeps_single_null_version() {
        let ctx = local_backend().await;
        ctx.store.create_bucket("dev.plain").await.unwrap();

        for body in [&b"first"[..], &b"second"[..]] {
            let version = ctx
                .store
                .put_object("dev.plain", "game", Bytes::copy_from_slice(body), None, HashMap::new())
                .await
                .unwrap();
            assert_eq!(version.version_id, NULL_VERSION_ID);
        }

        let listing = ctx.store.list_object_versions("dev.plain", list_all()).await.unwrap();
        assert_eq!(listing.versions.len(), 1);
        assert_eq!(listing.versions[0].size_bytes, 6);

        let outcome = ctx.store.delete_object("dev.plain", "game", None).await.unwrap();
        assert!(!outcome.delete_marker);
        ctx.store.delete_bucket("dev.plain").await.unwrap();
    }

    #[tokio::test]
    async fn version_listing_pages_by_key_then_newest_first() {
        let ctx = local_backend().await;
        let bucket = versioned_bucket(&ctx, "dev.studio-a").await;

        let a1 = ctx
            .store
            .put_object(&bucket, "a", Bytes::from_static(b"a1"), None, HashMap::new())
            .await
            .unwrap();
        let a2 = ctx
            .store
            .put_object(&bucket, "a", Bytes::from_static(b"a2"), None, HashMap::new())
            .await
            .unwrap();
        ctx.store
            .put_object(&bucket, "b", Bytes::from_static(b"b1"), None, HashMap::new())
            .await
            .unwrap();
        let marker = ctx.store.delete_object(&bucket, "b", None).await.unwrap();

        let first = ctx
            .store
            .list_object_versions(
                &bucket,
                ListVersionsParams {
                    max_keys: 2,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let ids: Vec<_> = first.versions.iter().map(|v| v.version_id.clone()).collect();
        assert_eq!(ids, vec![a2.version_id, a1.version_id.clone()]);
        assert!(first.is_truncated);
        assert_eq!(first.next_key_marker.as_deref(), Some("a"));
        assert_eq!(first.next_version_id_marker, Some(a1.version_id));

        let second = ctx
            .store
            .list_object_versions(
                &bucket,
                ListVersionsParams {
                    key_marker: first.next_key_marker,
                    version_id_marker: first.next_version_id_marker,
                    max_keys: 2,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!second.is_truncated);
        assert_eq!(second.versions.len(), 1);
        assert_eq!(second.delete_markers.len(), 1);
        assert_eq!(second.delete_markers[0].version_id, marker.version_id);
    }

    #[tokio::test]
    async fn populated_bucket_cannot_be_deleted() {
        let ctx = local_backend().await;
        let bucket = versioned_bucket(&ctx, "dev.studio-a").await;
        ctx.store
            .put_object(&bucket, "game", Bytes::from_static(b"v1"), None, HashMap::new())
            .await
            .unwrap();
        let marker = ctx.store.delete_object(&bucket, "game", None).await.unwrap();

        let err = ctx.store.delete_bucket(&bucket).await.unwrap_err();
        assert!(matches!(err, BackendError::BucketNotEmpty(_)));

        let listing = ctx.store.list_object_versions(&bucket, list_all()).await.unwrap();
        let mut identifiers: Vec<ObjectIdentifier> = listing
            .versions
            .iter()
            .map(|v| ObjectIdentifier {
                key: v.key.clone(),
                version_id: v.version_id.clone(),
            })
            .collect();
        identifiers.push(ObjectIdentifier {
            key: "game".into(),
            version_id: marker.version_id,
        });
        identifiers.push(ObjectIdentifier {
            key: "game".into(),
            version_id: "missing".into(),
        });

        let removed = ctx.store.delete_objects(&bucket, &identifiers).await.unwrap();
        assert_eq!(removed.len(), 2);
        ctx.store.delete_bucket(&bucket).await.unwrap();
        assert!(!ctx.store.base_path.join(&bucket).exists());
    }

    #[tokio::test]
    async fn multipart_etag_is_digest_of_part_digests() {
        let ctx = local_backend().await;
        let bucket = versioned_bucket(&ctx, "dev.studio-a").await;
        let upload = ctx
            .store
            .create_multipart_upload(&bucket, "game", None, HashMap::new())
            .await
            .unwrap();

        let first = vec![1u8; 5 * MIB];
        let second = vec![2u8; 10];
        let etag1 = ctx
            .store
            .upload_part(&bucket, "game", &upload.upload_id, 1, Bytes::from(first.clone()))
            .await
            .unwrap();
        let etag2 = ctx
            .store
            .upload_part(&bucket, "game", &upload.upload_id, 2, Bytes::from(second.clone()))
            .await
            .unwrap();

        let version = ctx
            .store
            .complete_multipart_upload(
                &bucket,
                "game",
                &upload.upload_id,
                &[
                    CompletedPart { part_number: 1, etag: format!("\"{etag1}\"") },
                    CompletedPart { part_number: 2, etag: etag2 },
                ],
            )
            .await
            .unwrap();

        let mut digests = md5::compute(&first).0.to_vec();
        digests.extend_from_slice(&md5::compute(&second).0);
        assert_eq!(
            version.etag.as_deref(),
            Some(format!("{:x}-2", md5::compute(&digests)).as_str())
        );
        assert_eq!(version.size_bytes, (5 * MIB + 10) as i64);
        assert!(!ctx.store.upload_dir(&upload.upload_id).exists());

        let err = ctx
            .store
            .abort_multipart_upload(&bucket, "game", &upload.upload_id)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NoSuchUpload(_)));
    }

    #[tokio::test]
    async fn completion_rejects_bad_part_lists() {
        let ctx = local_backend().await;
        let bucket = versioned_bucket(&ctx, "dev.studio-a").await;
        let upload = ctx
            .store
            .create_multipart_upload(&bucket, "game", None, HashMap::new())
            .await
            .unwrap();
        let etag1 = ctx
            .store
            .upload_part(&bucket, "game", &upload.upload_id, 1, Bytes::from_static(b"tiny"))
            .await
            .unwrap();
        let etag2 = ctx
            .store
            .upload_part(&bucket, "game", &upload.upload_id, 2, Bytes::from_static(b"tail"))
            .await
            .unwrap();
        let part = |part_number: u32, etag: &str| CompletedPart {
            part_number,
            etag: etag.to_string(),
        };

        let complete = |parts: Vec<CompletedPart>| {
            let store = ctx.store.clone();
            let bucket = bucket.clone();
            let upload_id = upload.upload_id.clone();
            async move {
                store
                    .complete_multipart_upload(&bucket, "game", &upload_id, &parts)
                    .await
            }
        };

        assert!(matches!(
            complete(vec![]).await,
            Err(BackendError::InvalidArgument(_))
        ));
        assert!(matches!(
            complete(vec![part(2, &etag2), part(1, &etag1)]).await,
            Err(BackendError::InvalidPartOrder)
        ));
        assert!(matches!(
            complete(vec![part(1, "deadbeef")]).await,
            Err(BackendError::InvalidPart { part_number: 1 })
        ));
        assert!(matches!(
            complete(vec![part(1, &etag1), part(2, &etag2)]).await,
            Err(BackendError::EntityTooSmall { part_number: 1 })
        ));

        // A single short part is allowed: it is the last one.
        let version = complete(vec![part(1, &etag1)]).await.unwrap();
        assert_eq!(version.size_bytes, 4);
    }

    #[tokio::test]
    async fn signed_part_upload_checks_signature() {
        let ctx = local_backend().await;
        let bucket = versioned_bucket(&ctx, "dev.studio-a").await;
        let upload = ctx
            .store
            .create_multipart_upload(&bucket, "games/doom", None, HashMap::new())
            .await
            .unwrap();
        let url = ctx
            .store
            .presign_upload_part(&bucket, "games/doom", &upload.upload_id, 1, Duration::from_secs(60))
            .await
            .unwrap();
        let (_, query) = parse_signed_url(&url);

        let err = ctx
            .store
            .upload_signed_part(&bucket, "games/other", &query, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::SignatureDoesNotMatch));

        let etag = ctx
            .store
            .upload_signed_part(&bucket, "games/doom", &query, Bytes::from_static(b"part"))
            .await
            .unwrap();
        assert_eq!(etag, format!("{:x}", md5::compute(b"part")));

        let err = ctx
            .store
            .presign_upload_part(&bucket, "games/doom", &upload.upload_id, 0, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn lifecycle_transitions_and_expires_noncurrent_versions() {
        let ctx = local_backend().await;
        let bucket = versioned_bucket(&ctx, "dev.studio-a").await;
        ctx.store
            .put_bucket_lifecycle(&bucket, &LifecycleRule::rolling_history())
            .await
            .unwrap();

        for round in 0..8 {
            ctx.store
                .put_object(&bucket, "game", Bytes::from(format!("v{round}")), None, HashMap::new())
                .await
                .unwrap();
        }
        sqlx::query("UPDATE object_versions SET last_modified = ? WHERE bucket = ?")
            .bind(Utc::now() - chrono::Duration::days(100))
            .bind(&bucket)
            .execute(&*ctx.store.db)
            .await
            .unwrap();

        let report = ctx.store.enforce_lifecycle(Utc::now()).await.unwrap();
        assert_eq!(report, LifecycleReport { transitioned: 5, expired: 2 });

        let listing = ctx.store.list_object_versions(&bucket, list_all()).await.unwrap();
        assert_eq!(listing.versions.len(), 6);
        assert_eq!(listing.versions[0].storage_class, STANDARD);
        assert!(listing.versions[1..]
            .iter()
            .all(|v| v.storage_class == "STANDARD_IA"));

        let again = ctx.store.enforce_lifecycle(Utc::now()).await.unwrap();
        assert_eq!(again, LifecycleReport::default());
    }

    #[tokio::test]
    async fn recent_history_is_left_alone() {
        let ctx = local_backend().await;
        let bucket = versioned_bucket(&ctx, "dev.studio-a").await;
        ctx.store
            .put_bucket_lifecycle(&bucket, &LifecycleRule::rolling_history())
            .await
            .unwrap();
        for round in 0..3 {
            ctx.store
                .put_object(&bucket, "game", Bytes::from(format!("v{round}")), None, HashMap::new())
                .await
                .unwrap();
        }

        let report = ctx.store.enforce_lifecycle(Utc::now()).await.unwrap();
        assert_eq!(report, LifecycleReport::default());
    }

    #[test]
    fn ipv4_shaped_names_are_detected() {
        assert!(is_ipv4_like("10.0.0.1"));
        assert!(!is_ipv4_like("10.0.0"));
        assert!(!is_ipv4_like("dev.studio.1.2"));
        assert!(!is_ipv4_like("300.1.1.1"));
    }
}
