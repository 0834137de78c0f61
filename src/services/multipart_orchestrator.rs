//! Multipart upload sessions: server-driven uploads of payloads the gateway
//! holds in full, and presigned sessions where clients PUT parts directly.

use crate::{
    models::{
        multipart::{
            CompleteUploadRequest, CompletedPart, InitiateUploadRequest, InitiateUploadResponse,
            PresignedPart,
        },
        object::{ObjectVersion, UploadOutcome},
    },
    services::{
        backend::StorageBackend,
        gateway::{GatewayError, GatewayResult},
        part_planner::{self, MAX_PARTS, PartPlan},
    },
};
use bytes::Bytes;
use chrono::Utc;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{error, info, warn};

/// Lifetime of every presigned part URL.
pub const PRESIGNED_URL_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct MultipartUploadOrchestrator {
    backend: Arc<dyn StorageBackend>,
    presign_ttl: Duration,
    stale_after: chrono::Duration,
}

/// Plan parts for `size` bytes, rejecting empty and oversized payloads.
fn checked_plan(size: u64) -> GatewayResult<PartPlan> {
    if size == 0 {
        return Err(GatewayError::InvalidRequest(
            "file size must be greater than zero".into(),
        ));
    }
    let plan = part_planner::plan(size);
    if !plan.within_limits() {
        return Err(GatewayError::InvalidRequest(format!(
            "a {size} byte payload needs {} parts, more than the {MAX_PARTS} allowed",
            plan.part_count
        )));
    }
    Ok(plan)
}

/// Parts in ascending part-number order. Empty lists, part number zero and
/// repeated part numbers are rejected.
pub fn sort_parts(parts: &[CompletedPart]) -> GatewayResult<Vec<CompletedPart>> {
    if parts.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "at least one part is required".into(),
        ));
    }

    let mut sorted = parts.to_vec();
    sorted.sort_by_key(|part| part.part_number);

    if sorted[0].part_number == 0 {
        return Err(GatewayError::InvalidRequest(
            "part numbers start at 1".into(),
        ));
    }
    if let Some(pair) = sorted
        .windows(2)
        .find(|pair| pair[0].part_number == pair[1].part_number)
    {
        return Err(GatewayError::InvalidRequest(format!(
            "part {} is listed more than once",
            pair[0].part_number
        )));
    }
    Ok(sorted)
}

impl MultipartUploadOrchestrator {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        presign_ttl: Duration,
        stale_after: chrono::Duration,
    ) -> Self {
        Self {
            backend,
            presign_ttl,
            stale_after,
        }
    }

    /// Upload a payload part by part and assemble it.
    ///
    /// If anything fails after the session exists, the session is aborted
    /// (best effort) and the failure comes back as `MultipartUploadFailed`.
    pub async fn upload_server_driven(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<String>,
    ) -> GatewayResult<UploadOutcome> {
        let plan = checked_plan(body.len() as u64)?;

        let upload = self
            .backend
            .create_multipart_upload(bucket, key, content_type, HashMap::new())
            .await?;
        info!("Multipart upload created. Upload ID: {}", upload.upload_id);

        match self
            .upload_and_complete(bucket, key, &upload.upload_id, &body, plan)
            .await
        {
            Ok(version) => {
                info!(
                    "Completed multipart upload {} of {}/{}",
                    upload.upload_id, bucket, key
                );
                Ok(UploadOutcome {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    version_id: version.version_id,
                    etag: version.etag,
                })
            }
            Err(err) => {
                error!("Multipart upload {} failed: {}", upload.upload_id, err);
                self.abort_quietly(bucket, key, &upload.upload_id).await;
                Err(GatewayError::MultipartUploadFailed {
                    key: key.to_string(),
                    upload_id: upload.upload_id,
                    source: Box::new(err),
                })
            }
        }
    }

    async fn upload_and_complete(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        body: &Bytes,
        plan: PartPlan,
    ) -> GatewayResult<ObjectVersion> {
        info!("Number of parts: {}", plan.part_count);
        info!("Parts size: {}", plan.part_size);

        let mut completed = Vec::with_capacity(plan.part_count as usize);
        for span in plan.parts() {
            let start = span.offset as usize;
            let end = start + span.len as usize;
            let etag = self
                .backend
                .upload_part(bucket, key, upload_id, span.part_number, body.slice(start..end))
                .await?;
            info!(
                "Upload part ({}) successful. Etag: {}",
                span.part_number, etag
            );
            completed.push(CompletedPart {
                part_number: span.part_number,
                etag,
            });
        }

        let parts = sort_parts(&completed)?;
        Ok(self
            .backend
            .complete_multipart_upload(bucket, key, upload_id, &parts)
            .await?)
    }

    async fn abort_quietly(&self, bucket: &str, key: &str, upload_id: &str) {
        match self
            .backend
            .abort_multipart_upload(bucket, key, upload_id)
            .await
        {
            Ok(()) => warn!("Aborted multipart upload {}", upload_id),
            Err(err) => error!("Could not abort multipart upload {}: {}", upload_id, err),
        }
    }

    /// Open a session the client uploads into directly, with one signed URL
    /// per planned part.
    pub async fn initiate_presigned(
        &self,
        bucket: &str,
        request: &InitiateUploadRequest,
    ) -> GatewayResult<InitiateUploadResponse> {
        let plan = checked_plan(request.file_size)?;

        match self.expire_stale_uploads(bucket).await {
            Ok(0) => {}
            Ok(count) => info!("Aborted {} stale uploads in {}", count, bucket),
            Err(err) => warn!("Could not sweep stale uploads in {}: {}", bucket, err),
        }

        let upload = self
            .backend
            .create_multipart_upload(
                bucket,
                &request.key,
                request.content_type.clone(),
                request.metadata.clone(),
            )
            .await?;
        info!("Multipart upload created. Upload ID: {}", upload.upload_id);
        info!("Number of parts: {}", plan.part_count);

        let mut parts = Vec::with_capacity(plan.part_count as usize);
        for span in plan.parts() {
            let signed = self
                .backend
                .presign_upload_part(
                    bucket,
                    &request.key,
                    &upload.upload_id,
                    span.part_number,
                    self.presign_ttl,
                )
                .await;
            match signed {
                Ok(signed_url) => parts.push(PresignedPart {
                    part_number: span.part_number,
                    signed_url,
                    part_size: span.len,
                }),
                Err(err) => {
                    self.abort_quietly(bucket, &request.key, &upload.upload_id)
                        .await;
                    return Err(err.into());
                }
            }
        }

        Ok(InitiateUploadResponse {
            upload_id: upload.upload_id,
            key: request.key.clone(),
            parts,
        })
    }

    /// Finish a presigned session with the parts the client reports, in any order.
    pub async fn complete_presigned(
        &self,
        bucket: &str,
        request: &CompleteUploadRequest,
    ) -> GatewayResult<UploadOutcome> {
        let parts = sort_parts(&request.parts)?;
        let version = self
            .backend
            .complete_multipart_upload(bucket, &request.key, &request.upload_id, &parts)
            .await?;

        info!(
            "Completed multipart upload {} of {}/{} with {} parts",
            request.upload_id,
            bucket,
            request.key,
            parts.len()
        );
        Ok(UploadOutcome {
            bucket: bucket.to_string(),
            key: request.key.clone(),
            version_id: version.version_id,
            etag: version.etag,
        })
    }

    /// Abort every session in `bucket` initiated before the staleness cutoff.
    pub async fn expire_stale_uploads(&self, bucket: &str) -> GatewayResult<usize> {
        let cutoff = Utc::now() - self.stale_after;
        let uploads = self.backend.list_multipart_uploads(bucket).await?;

        let mut aborted = 0;
        for upload in uploads.iter().filter(|u| u.initiated_at < cutoff) {
            match self
                .backend
                .abort_multipart_upload(bucket, &upload.key, &upload.upload_id)
                .await
            {
                Ok(()) => aborted += 1,
                Err(err) => warn!(
                    "Could not abort stale upload {}: {}",
                    upload.upload_id, err
                ),
            }
        }
        Ok(aborted)
    }
}
