//! Game (object) endpoints beneath `/studios/{studio_id}/games`.
//! Download responses stream the file the gateway wrote to the download
//! directory instead of buffering it.

use crate::{
    errors::AppError,
    handlers::AppState,
    models::{
        metadata::{GameInfo, GameMetadataPatch},
        multipart::{CompleteUploadRequest, InitiateUploadRequest, InitiateUploadResponse},
        object::{DeleteOutcome, UploadOutcome},
    },
};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

const VERSION_ID_HEADER: &str = "x-version-id";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionQuery {
    pub version_id: Option<String>,
}

/// PUT `/studios/{studio_id}/games/{game}` with the raw payload as body.
pub async fn upload_game(
    State(state): State<AppState>,
    Path((studio_id, game)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let outcome = state
        .gateway
        .upload_object(&studio_id, &game, body, content_type)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// GET `/studios/{studio_id}/games/{game}?versionId=`
pub async fn download_game(
    State(state): State<AppState>,
    Path((studio_id, game)): Path<(String, String)>,
    Query(q): Query<VersionQuery>,
) -> Result<Response, AppError> {
    let download = state
        .gateway
        .get_object(&studio_id, &game, q.version_id.as_deref())
        .await?;
    let file = File::open(&download.path)
        .await
        .map_err(|err| AppError::internal(format!("reading download: {err}")))?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    let content_type = download
        .content_type
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(download.size_bytes));
    if let Ok(value) = HeaderValue::from_str(&download.version_id) {
        headers.insert(HeaderName::from_static(VERSION_ID_HEADER), value);
    }
    Ok(response)
}

/// DELETE `/studios/{studio_id}/games/{game}?versionId=`
///
/// Without a version id this hides the game behind a delete marker.
pub async fn delete_game(
    State(state): State<AppState>,
    Path((studio_id, game)): Path<(String, String)>,
    Query(q): Query<VersionQuery>,
) -> Result<Json<DeleteOutcome>, AppError> {
    let outcome = state
        .gateway
        .delete_object(&studio_id, &game, q.version_id.as_deref())
        .await?;
    Ok(Json(outcome))
}

/// GET `/studios/{studio_id}/games/{game}/metadata`
pub async fn get_game_metadata(
    State(state): State<AppState>,
    Path((studio_id, game)): Path<(String, String)>,
) -> Result<Json<GameInfo>, AppError> {
    Ok(Json(state.gateway.fetch_metadata(&studio_id, &game).await?))
}

/// PATCH `/studios/{studio_id}/games/{game}/metadata`
pub async fn patch_game_metadata(
    State(state): State<AppState>,
    Path((studio_id, game)): Path<(String, String)>,
    Json(patch): Json<GameMetadataPatch>,
) -> Result<Json<GameInfo>, AppError> {
    if patch.is_empty() {
        return Err(AppError::bad_request(
            "patch must set at least one of genre or version",
        ));
    }
    Ok(Json(
        state
            .gateway
            .modify_metadata(&studio_id, &game, &patch)
            .await?,
    ))
}

/// POST `/studios/{studio_id}/uploads/initiate`
pub async fn initiate_upload(
    State(state): State<AppState>,
    Path(studio_id): Path<String>,
    Json(request): Json<InitiateUploadRequest>,
) -> Result<Json<InitiateUploadResponse>, AppError> {
    Ok(Json(
        state.gateway.initiate_upload(&studio_id, &request).await?,
    ))
}

/// POST `/studios/{studio_id}/uploads/complete`
pub async fn complete_upload(
    State(state): State<AppState>,
    Path(studio_id): Path<String>,
    Json(request): Json<CompleteUploadRequest>,
) -> Result<Json<UploadOutcome>, AppError> {
    Ok(Json(
        state.gateway.complete_upload(&studio_id, &request).await?,
    ))
}
