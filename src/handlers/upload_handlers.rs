//! Target of presigned part URLs.

use crate::{errors::AppError, handlers::AppState, services::part_signer::SignedPartQuery};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::IntoResponse,
};
use tracing::debug;

/// PUT `/uploads/{bucket}/{*key}?uploadId=&partNumber=&expires=&signature=`
///
/// Responds with the part's etag in the `ETag` header; the client reports it
/// back when completing the upload.
pub async fn put_signed_part(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<SignedPartQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let etag = state
        .store
        .upload_signed_part(&bucket, &key, &query, body)
        .await?;
    debug!(
        "Stored part {} of upload {} ({}/{})",
        query.part_number, query.upload_id, bucket, key
    );

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
        headers.insert(header::ETAG, value);
    }
    Ok((StatusCode::OK, headers))
}
