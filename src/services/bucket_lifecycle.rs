//! Studio bucket creation, listing and teardown.

use crate::{
    models::{
        bucket::{Bucket, BucketPage},
        lifecycle::LifecycleRule,
    },
    services::{
        backend::StorageBackend,
        gateway::{GatewayError, GatewayResult},
        object_versions::ObjectVersionManager,
    },
};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Length of the random suffix appended to every generated bucket name.
const SUFFIX_LEN: usize = 16;

const BUCKET_NAME_MAX_LEN: usize = 63;

/// Lowercase `human_name`, turn every run of characters outside `[a-z0-9]`
/// into a single `-`, and cut the result to `max_len` without a dangling `-`.
fn slugify(human_name: &str, max_len: usize) -> String {
    let mut slug = String::with_capacity(human_name.len());
    for c in human_name.trim().chars().map(|c| c.to_ascii_lowercase()) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.truncate(max_len);
    slug.trim_end_matches('-').to_string()
}

/// What `delete_bucket` does with a bucket that still holds versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketDeletePolicy {
    /// Purge every version and delete marker, then delete the bucket.
    Purge,
    /// Leave content alone; a populated bucket fails with `BucketNotEmpty`.
    RejectNonEmpty,
}

#[derive(Clone)]
pub struct BucketLifecycleManager {
    backend: Arc<dyn StorageBackend>,
    versions: ObjectVersionManager,
    namespace: String,
    delete_policy: BucketDeletePolicy,
}

impl BucketLifecycleManager {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        versions: ObjectVersionManager,
        namespace: impl Into<String>,
        delete_policy: BucketDeletePolicy,
    ) -> Self {
        Self {
            backend,
            versions,
            namespace: namespace.into(),
            delete_policy,
        }
    }

    /// Prefix shared by every bucket this service manages, e.g. `dev.`.
    pub fn namespace_prefix(&self) -> String {
        format!("{}.", self.namespace)
    }

    /// `{namespace}.{slug of human-name}-{random suffix}`, at most 63 bytes.
    fn generate_name(&self, human_name: &str) -> GatewayResult<String> {
        let prefix = self.namespace_prefix();
        let budget = BUCKET_NAME_MAX_LEN.saturating_sub(prefix.len() + 1 + SUFFIX_LEN);
        let slug = slugify(human_name, budget);
        if slug.is_empty() {
            return Err(GatewayError::InvalidRequest(format!(
                "bucket name `{}` has no letters or digits",
                human_name.trim()
            )));
        }

        let suffix = Uuid::new_v4().simple().to_string();
        Ok(format!("{prefix}{slug}-{}", &suffix[..SUFFIX_LEN]))
    }

    /// Create a uniquely named, versioned bucket carrying the rolling-history
    /// lifecycle rule.
    pub async fn create_bucket(&self, human_name: &str) -> GatewayResult<Bucket> {
        let name = self.generate_name(human_name)?;
        let mut bucket = self.backend.create_bucket(&name).await.map_err(|err| {
            match GatewayError::from(err) {
                GatewayError::BucketNameConflict(_) => {
                    error!("Bucket ({}) already exists", human_name);
                    GatewayError::BucketNameConflict(human_name.to_string())
                }
                other => other,
            }
        })?;

        self.backend.put_bucket_versioning(&name, true).await?;
        bucket.versioning_enabled = true;

        self.backend
            .put_bucket_lifecycle(&name, &LifecycleRule::rolling_history())
            .await?;

        info!("Created bucket {} for {}", bucket.name, human_name);
        Ok(bucket)
    }

    /// One page of managed buckets in backend order.
    pub async fn fetch_buckets(
        &self,
        limit: usize,
        continuation_token: Option<&str>,
    ) -> GatewayResult<BucketPage> {
        Ok(self
            .backend
            .list_buckets(&self.namespace_prefix(), limit, continuation_token)
            .await?)
    }

    /// Delete a bucket according to the configured [`BucketDeletePolicy`].
    pub async fn delete_bucket(&self, name: &str) -> GatewayResult<()> {
        if self.delete_policy == BucketDeletePolicy::Purge {
            self.versions.purge_all_versions(name).await?;
        }
        self.backend.delete_bucket(name).await.map_err(|err| {
            let err = GatewayError::from(err);
            if let GatewayError::BucketNotFound(_) = err {
                error!("Bucket ({}) does not exist", name);
            }
            err
        })?;

        info!("Deleted bucket {}", name);
        Ok(())
    }
}
