//! Studio (bucket) endpoints.

use crate::{errors::AppError, handlers::AppState, models::bucket::BucketPage};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use base64::{Engine as _, engine::general_purpose};
use serde::Deserialize;

const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListStudiosQuery {
    pub limit: Option<usize>,
    pub continuation_token: Option<String>,
}

/// POST `/studios/{studio_name}`
pub async fn create_studio(
    State(state): State<AppState>,
    Path(studio_name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let bucket = state.gateway.create_bucket(&studio_name).await?;
    Ok((StatusCode::CREATED, Json(bucket)))
}

/// GET `/studios?limit=&continuationToken=`
pub async fn list_studios(
    State(state): State<AppState>,
    Query(q): Query<ListStudiosQuery>,
) -> Result<Json<BucketPage>, AppError> {
    let token = q
        .continuation_token
        .as_deref()
        .map(decode_continuation_token)
        .transpose()?;
    let limit = q.limit.unwrap_or(DEFAULT_PAGE_SIZE);

    let mut page = state
        .gateway
        .fetch_buckets(limit, token.as_deref())
        .await?;
    page.continuation_token = page
        .continuation_token
        .as_deref()
        .map(encode_continuation_token);
    Ok(Json(page))
}

/// DELETE `/studios/{studio_id}`
pub async fn delete_studio(
    State(state): State<AppState>,
    Path(studio_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.gateway.delete_bucket(&studio_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn encode_continuation_token(token: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(token)
}

fn decode_continuation_token(token: &str) -> Result<String, AppError> {
    general_purpose::URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| AppError::bad_request("malformed continuation token"))
}
