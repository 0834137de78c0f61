//! Core data models for the game storage service.
//!
//! Rows that live in SQLite derive `sqlx::FromRow`; request and response
//! shapes serialize as camelCase JSON via `serde`.

pub mod bucket;
pub mod lifecycle;
pub mod metadata;
pub mod multipart;
pub mod object;
