//! Versioned reads, deletes and metadata rewrites of stored games.

use crate::{
    models::{
        metadata::{GameInfo, GameMetadataPatch},
        object::{
            DeleteOutcome, DownloadedObject, ListVersionsParams, ObjectBody, ObjectIdentifier,
        },
    },
    services::{
        backend::{BackendError, StorageBackend},
        gateway::{GatewayError, GatewayResult},
    },
};
use futures::StreamExt;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{error, info};
use uuid::Uuid;

const PURGE_PAGE_SIZE: usize = 1000;

#[derive(Clone)]
pub struct ObjectVersionManager {
    backend: Arc<dyn StorageBackend>,
    download_dir: PathBuf,
    purge_page_size: usize,
}

/// Classify a backend failure, logging the not-found kinds the way callers
/// expect to see them in the service log.
fn classify(err: BackendError, bucket: &str, key: &str) -> GatewayError {
    let err = GatewayError::from(err);
    match &err {
        GatewayError::ObjectNotFound { .. } => {
            error!("The object: {}/{} does not exist", bucket, key);
        }
        GatewayError::BucketNotFound(_) => error!("Bucket ({}) does not exist", bucket),
        _ => {}
    }
    err
}

impl ObjectVersionManager {
    pub fn new(backend: Arc<dyn StorageBackend>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            download_dir: download_dir.into(),
            purge_page_size: PURGE_PAGE_SIZE,
        }
    }

    #[cfg(test)]
    pub fn with_purge_page_size(mut self, page_size: usize) -> Self {
        self.purge_page_size = page_size;
        self
    }

    /// Local file for one version of one key. Keys are hashed into a single
    /// directory name so nested keys never collide with their parents.
    fn download_path(&self, bucket: &str, key: &str, version_id: &str) -> PathBuf {
        self.download_dir
            .join(bucket)
            .join(format!("{:x}", md5::compute(key)))
            .join(version_id)
    }

    /// Fetch the current (or the given) version and write it to
    /// `{download_dir}/{bucket}/{key digest}/{version_id}`. A repeated
    /// download of the same version replaces the earlier file.
    pub async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> GatewayResult<DownloadedObject> {
        let ObjectBody { version, mut body } = self
            .backend
            .get_object(bucket, key, version_id)
            .await
            .map_err(|err| classify(err, bucket, key))?;

        let local_path = self.download_path(bucket, key, &version.version_id);
        let parent = local_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.download_dir.clone());
        fs::create_dir_all(&parent).await.map_err(BackendError::Io)?;

        let tmp_path = parent.join(format!(".download-{}", Uuid::new_v4()));
        let copy = async {
            let mut file = File::create(&tmp_path).await?;
            let mut size_bytes = 0u64;
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                size_bytes += chunk.len() as u64;
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            fs::rename(&tmp_path, &local_path).await?;
            Ok::<_, std::io::Error>(size_bytes)
        };
        let size_bytes = match copy.await {
            Ok(size) => size,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(BackendError::Io(err).into());
            }
        };

        info!(
            "Successfully downloaded {} with version id {} in {}",
            key,
            version.version_id,
            local_path.display()
        );
        Ok(DownloadedObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            version_id: version.version_id,
            content_type: version.content_type,
            path: local_path,
            size_bytes,
        })
    }

    /// Soft delete without a version id (a new delete marker); permanent
    /// removal of exactly one entry with one.
    pub async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> GatewayResult<DeleteOutcome> {
        let outcome = self
            .backend
            .delete_object(bucket, key, version_id)
            .await
            .map_err(|err| classify(err, bucket, key))?;

        info!(
            "Deleted {}/{} (version {}, delete marker: {})",
            bucket, key, outcome.version_id, outcome.delete_marker
        );
        Ok(outcome)
    }

    /// Remove every version and delete marker of a bucket in one batch.
    ///
    /// Not transactional against concurrent writers: entries written after
    /// the listing survive.
    pub async fn purge_all_versions(&self, bucket: &str) -> GatewayResult<usize> {
        let mut identifiers = Vec::new();
        let mut params = ListVersionsParams {
            max_keys: self.purge_page_size,
            ..Default::default()
        };

        loop {
            let page = self
                .backend
                .list_object_versions(bucket, params.clone())
                .await
                .map_err(GatewayError::from)?;

            info!("Found {} previous versions", page.versions.len());
            info!("Found {} delete markers", page.delete_markers.len());
            identifiers.extend(
                page.versions
                    .iter()
                    .chain(&page.delete_markers)
                    .map(|entry| ObjectIdentifier {
                        key: entry.key.clone(),
                        version_id: entry.version_id.clone(),
                    }),
            );

            if !page.is_truncated {
                break;
            }
            params.key_marker = page.next_key_marker;
            params.version_id_marker = page.next_version_id_marker;
        }

        if identifiers.is_empty() {
            return Ok(0);
        }

        info!(
            "Deleting {} previous versions/delete markers in bucket {}",
            identifiers.len(),
            bucket
        );
        let removed = self.backend.delete_objects(bucket, &identifiers).await?;
        Ok(removed.len())
    }

    /// Read genre and version label of the current version without its payload.
    pub async fn fetch_metadata(&self, bucket: &str, key: &str) -> GatewayResult<GameInfo> {
        let head = self
            .backend
            .head_object(bucket, key)
            .await
            .map_err(|err| classify(err, bucket, key))?;

        Ok(GameInfo::from_metadata(
            bucket,
            key,
            &head.metadata.0,
            Some(head.version_id),
        ))
    }

    /// Merge `patch` into the current metadata and copy the object onto
    /// itself with the merged set. This always creates a new version.
    pub async fn modify_metadata(
        &self,
        bucket: &str,
        key: &str,
        patch: &GameMetadataPatch,
    ) -> GatewayResult<GameInfo> {
        let head = self
            .backend
            .head_object(bucket, key)
            .await
            .map_err(|err| classify(err, bucket, key))?;

        let mut metadata = head.metadata.0.clone();
        patch.apply(&mut metadata);

        let copied = self
            .backend
            .copy_object(bucket, key, bucket, key, metadata)
            .await
            .map_err(|err| classify(err, bucket, key))?;

        info!(
            "Rewrote metadata of {}/{} as version {}",
            bucket, key, copied.version_id
        );
        Ok(GameInfo::from_metadata(
            bucket,
            key,
            &copied.metadata.0,
            Some(copied.version_id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::metadata::{GENRE, VERSION};
    use crate::services::test_support::{local_backend, versioned_bucket};
    use bytes::Bytes;
    use std::collections::HashMap;

    #[tokio::test]
    async fn soft_delete_then_removing_marker_restores_object() {
        let ctx = local_backend().await;
        let bucket = versioned_bucket(&ctx, "dev.studio-a").await;
        let manager = ObjectVersionManager::new(ctx.backend(), ctx.download_dir());
        ctx.store
            .put_object(&bucket, "doom", Bytes::from_static(b"rip and tear"), None, HashMap::new())
            .await
            .unwrap();

        let marker = manager.delete_object(&bucket, "doom", None).await.unwrap();
        assert!(marker.delete_marker);
        let err = manager.get_object(&bucket, "doom", None).await.unwrap_err();
        assert!(matches!(err, GatewayError::ObjectNotFound { .. }));

        let removed = manager
            .delete_object(&bucket, "doom", Some(&marker.version_id))
            .await
            .unwrap();
        assert!(removed.delete_marker);

        let restored = manager.get_object(&bucket, "doom", None).await.unwrap();
        assert_eq!(fs::read(&restored.path).await.unwrap(), b"rip and tear");
    }

    #[tokio::test]
    async fn permanent_delete_twice_reports_not_found() {
        let ctx = local_backend().await;
        let bucket = versioned_bucket(&ctx, "dev.studio-a").await;
        let manager = ObjectVersionManager::new(ctx.backend(), ctx.download_dir());
        let version = ctx
            .store
            .put_object(&bucket, "doom", Bytes::from_static(b"v1"), None, HashMap::new())
            .await
            .unwrap();

        let first = manager
            .delete_object(&bucket, "doom", Some(&version.version_id))
            .await
            .unwrap();
        assert!(!first.delete_marker);

        let second = manager
            .delete_object(&bucket, "doom", Some(&version.version_id))
            .await
            .unwrap_err();
        assert!(matches!(second, GatewayError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn explicit_version_is_still_readable_after_overwrite() {
        let ctx = local_backend().await;
        let bucket = versioned_bucket(&ctx, "dev.studio-a").await;
        let manager = ObjectVersionManager::new(ctx.backend(), ctx.download_dir());
        let first = ctx
            .store
            .put_object(&bucket, "doom", Bytes::from_static(b"v1"), None, HashMap::new())
            .await
            .unwrap();
        ctx.store
            .put_object(&bucket, "doom", Bytes::from_static(b"v2"), None, HashMap::new())
            .await
            .unwrap();

        let current = manager.get_object(&bucket, "doom", None).await.unwrap();
        assert_eq!(fs::read(&current.path).await.unwrap(), b"v2");

        let old = manager
            .get_object(&bucket, "doom", Some(&first.version_id))
            .await
            .unwrap();
        assert_eq!(old.version_id, first.version_id);
        assert_eq!(old.size_bytes, 2);
        assert_eq!(fs::read(&old.path).await.unwrap(), b"v1");
        assert!(old.path.starts_with(ctx.download_dir()));
    }

    #[tokio::test]
    async fn each_download_keeps_its_own_version_bytes() {
        let ctx = local_backend().await;
        let bucket = versioned_bucket(&ctx, "dev.studio-a").await;
        let manager = ObjectVersionManager::new(ctx.backend(), ctx.download_dir());
        let first = ctx
            .store
            .put_object(&bucket, "doom", Bytes::from_static(b"first cut"), None, HashMap::new())
            .await
            .unwrap();
        ctx.store
            .put_object(&bucket, "doom", Bytes::from_static(b"v2"), None, HashMap::new())
            .await
            .unwrap();

        let old = manager
            .get_object(&bucket, "doom", Some(&first.version_id))
            .await
            .unwrap();
        let current = manager.get_object(&bucket, "doom", None).await.unwrap();

        assert_ne!(old.path, current.path);
        assert_eq!(old.size_bytes, 9);
        assert_eq!(fs::read(&old.path).await.unwrap(), b"first cut");
        assert_eq!(fs::read(&current.path).await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn key_and_nested_key_download_side_by_side() {
        let ctx = local_backend().await;
        let bucket = versioned_bucket(&ctx, "dev.studio-a").await;
        let manager = ObjectVersionManager::new(ctx.backend(), ctx.download_dir());
        for (key, body) in [("games", "index"), ("games/doom", "rip and tear")] {
            ctx.store
                .put_object(&bucket, key, Bytes::from(body), None, HashMap::new())
                .await
                .unwrap();
        }

        let parent = manager.get_object(&bucket, "games", None).await.unwrap();
        let nested = manager.get_object(&bucket, "games/doom", None).await.unwrap();

        assert_eq!(fs::read(&parent.path).await.unwrap(), b"index");
        assert_eq!(fs::read(&nested.path).await.unwrap(), b"rip and tear");
    }

    #[tokio::test]
    async fn missing_bucket_and_key_are_classified() {
        let ctx = local_backend().await;
        let bucket = versioned_bucket(&ctx, "dev.studio-a").await;
        let manager = ObjectVersionManager::new(ctx.backend(), ctx.download_dir());

        let err = manager.get_object("dev.nowhere", "doom", None).await.unwrap_err();
        assert!(matches!(err, GatewayError::BucketNotFound(_)));

        let err = manager.fetch_metadata(&bucket, "doom").await.unwrap_err();
        assert!(matches!(err, GatewayError::ObjectNotFound { .. }));

        let err = manager.delete_object(&bucket, "doom", None).await.unwrap_err();
        assert!(matches!(err, GatewayError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn modify_metadata_merges_patch_and_creates_version() {
        let ctx = local_backend().await;
        let bucket = versioned_bucket(&ctx, "dev.studio-a").await;
        let manager = ObjectVersionManager::new(ctx.backend(), ctx.download_dir());
        let original = ctx
            .store
            .put_object(
                &bucket,
                "the-last-of-us",
                Bytes::from_static(b"payload"),
                Some("application/octet-stream".into()),
                HashMap::from([
                    (GENRE.to_string(), "adventure".to_string()),
                    (VERSION.to_string(), "v1.0".to_string()),
                ]),
            )
            .await
            .unwrap();

        let patch = GameMetadataPatch {
            genre: Some("stealth".into()),
            version: None,
        };
        let updated = manager
            .modify_metadata(&bucket, "the-last-of-us", &patch)
            .await
            .unwrap();
        assert_eq!(updated.genre.as_deref(), Some("stealth"));
        assert_eq!(updated.version.as_deref(), Some("v1.0"));
        assert_ne!(updated.version_id.as_deref(), Some(original.version_id.as_str()));

        let fetched = manager.fetch_metadata(&bucket, "the-last-of-us").await.unwrap();
        assert_eq!(fetched, updated);

        let listing = ctx
            .store
            .list_object_versions(
                &bucket,
                ListVersionsParams {
                    max_keys: 100,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(listing.versions.len(), 2);

        let copy = manager.get_object(&bucket, "the-last-of-us", None).await.unwrap();
        assert_eq!(fs::read(&copy.path).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn purge_removes_every_version_and_marker() {
        let ctx = local_backend().await;
        let bucket = versioned_bucket(&ctx, "dev.studio-a").await;
        let manager = ObjectVersionManager::new(ctx.backend(), ctx.download_dir());

        for key in ["a", "b", "c"] {
            for round in 0..3 {
                ctx.store
                    .put_object(
                        &bucket,
                        key,
                        Bytes::from(format!("{key}{round}")),
                        None,
                        HashMap::new(),
                    )
                    .await
                    .unwrap();
            }
            ctx.store.delete_object(&bucket, key, None).await.unwrap();
        }

        let removed = manager.purge_all_versions(&bucket).await.unwrap();
        assert_eq!(removed, 12);
        assert_eq!(manager.purge_all_versions(&bucket).await.unwrap(), 0);
        ctx.store.delete_bucket(&bucket).await.unwrap();
    }

    #[tokio::test]
    async fn purge_follows_markers_across_pages() {
        let ctx = local_backend().await;
        let bucket = versioned_bucket(&ctx, "dev.studio-a").await;
        let manager =
            ObjectVersionManager::new(ctx.backend(), ctx.download_dir()).with_purge_page_size(2);

        for round in 0..5 {
            ctx.store
                .put_object(&bucket, "doom", Bytes::from(format!("doom{round}")), None, HashMap::new())
                .await
                .unwrap();
        }
        ctx.store.delete_object(&bucket, "doom", None).await.unwrap();
        ctx.store
            .put_object(&bucket, "quake", Bytes::from_static(b"q"), None, HashMap::new())
            .await
            .unwrap();

        assert_eq!(manager.purge_all_versions(&bucket).await.unwrap(), 7);

        let listing = ctx
            .store
            .list_object_versions(
                &bucket,
                ListVersionsParams {
                    max_keys: 100,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(listing.versions.is_empty());
        assert!(listing.delete_markers.is_empty());
        ctx.store.delete_bucket(&bucket).await.unwrap();
    }
}
