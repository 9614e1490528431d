use serde::{Deserialize, Serialize};

use crate::common::types::StationId;

/// A radio station record, owned by the CRUD layer and read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    pub id: StationId,
    pub name: String,
    /// Playable media locator; may point at a PLS/M3U playlist.
    pub url: String,
    #[serde(default)]
    pub genre: Option<String>,
    /// Bitrate tag such as "128kbps".
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub artwork: Option<String>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub listeners: u32,
}

fn default_true() -> bool {
    true
}

impl Station {
    pub fn new(id: impl Into<StationId>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            genre: None,
            quality: None,
            artwork: None,
            is_favorite: false,
            is_active: true,
            listeners: 0,
        }
    }
}

/// Persisted "last played" record for a guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastPlayed {
    pub station_id: StationId,
    pub was_playing: bool,
}
