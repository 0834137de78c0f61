//! Defines routes for studio, game and upload operations.
//!
//! ## Structure
//! - **Studio endpoints**
//!   - `GET    /studios` - list studios (supports limit, continuationToken)
//!   - `POST   /studios/{studio}` - create studio bucket from a human name
//!   - `DELETE /studios/{studio}` - delete studio bucket
//!
//! - **Game endpoints** (`{studio}` is the bucket name returned at creation)
//!   - `PUT    /studios/{studio}/games/{game}` - upload game payload
//!   - `GET    /studios/{studio}/games/{game}` - download (optional versionId)
//!   - `DELETE /studios/{studio}/games/{game}` - soft or permanent delete
//!   - `GET    /studios/{studio}/games/{game}/metadata` - read genre/version
//!   - `PATCH  /studios/{studio}/games/{game}/metadata` - rewrite genre/version
//!
//! - **Presigned upload sessions**
//!   - `POST   /studios/{studio}/uploads/initiate` - open a presigned upload
//!   - `POST   /studios/{studio}/uploads/complete` - finish a presigned upload
//!
//! - **Signed part uploads**
//!   - `PUT    /uploads/{bucket}/{*key}` - target of presigned part URLs

use crate::handlers::{
    AppState,
    game_handlers::{
        complete_upload, delete_game, download_game, get_game_metadata, initiate_upload,
        patch_game_metadata, upload_game,
    },
    health_handlers::{healthz, readyz},
    studio_handlers::{create_studio, delete_studio, list_studios},
    upload_handlers::put_signed_part,
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build and return the router for all gateway routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Studio routes
        .route("/studios", get(list_studios))
        .route("/studios/{studio}", post(create_studio).delete(delete_studio))
        // Presigned upload sessions
        .route("/studios/{studio}/uploads/initiate", post(initiate_upload))
        .route("/studios/{studio}/uploads/complete", post(complete_upload))
        // Game routes
        .route(
            "/studios/{studio}/games/{game}",
            put(upload_game).get(download_game).delete(delete_game),
        )
        .route(
            "/studios/{studio}/games/{game}/metadata",
            get(get_game_metadata).patch(patch_game_metadata),
        )
        .route("/uploads/{bucket}/{*key}", put(put_signed_part))
}
