//! Game metadata carried as user metadata on stored objects.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata key holding the game's genre.
pub const GENRE: &str = "genre";

/// Metadata key holding the game's release label (e.g. `v1.0`).
pub const VERSION: &str = "version";

/// Projection of an object's metadata onto the game domain.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameInfo {
    pub bucket: String,
    pub key: String,
    pub genre: Option<String>,
    pub version: Option<String>,

    /// Object version this projection was read from or written as.
    pub version_id: Option<String>,
}

impl GameInfo {
    pub fn from_metadata(
        bucket: &str,
        key: &str,
        metadata: &HashMap<String, String>,
        version_id: Option<String>,
    ) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            genre: metadata.get(GENRE).cloned(),
            version: metadata.get(VERSION).cloned(),
            version_id,
        }
    }
}

/// Partial update of game metadata. Absent fields keep their stored value.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameMetadataPatch {
    pub genre: Option<String>,
    pub version: Option<String>,
}

impl GameMetadataPatch {
    pub fn is_empty(&self) -> bool {
        self.genre.is_none() && self.version.is_none()
    }

    /// Overwrite the fields present in the patch; everything else is kept.
    pub fn apply(&self, metadata: &mut HashMap<String, String>) {
        if let Some(genre) = &self.genre {
            metadata.insert(GENRE.to_string(), genre.clone());
        }
        if let Some(version) = &self.version {
            metadata.insert(VERSION.to_string(), version.clone());
        }
    }
}
