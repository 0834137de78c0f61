//! HTTP handlers. Each one translates a request into one gateway call and
//! its result into JSON; no storage decisions are made here.

use crate::services::{gateway::ObjectStorageGateway, local_store::LocalBackend};
use std::sync::Arc;

pub mod game_handlers;
pub mod health_handlers;
pub mod studio_handlers;
pub mod upload_handlers;

/// Shared router state.
#[derive(Clone)]
pub struct AppState {
    pub gateway: ObjectStorageGateway,

    /// Concrete store, for readiness checks and signed part uploads.
    pub store: Arc<LocalBackend>,
}
