use serde::Serialize;

use crate::common::types::{GuildId, StationId};

/// Outward notifications consumed by the dashboard layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BotEvent {
    #[serde(rename_all = "camelCase")]
    StatusChanged {
        guild_id: GuildId,
        is_playing: bool,
        current_station_id: Option<StationId>,
    },
    #[serde(rename_all = "camelCase")]
    GuildConnectivityChanged {
        guild_id: GuildId,
        is_connected: bool,
        member_count: u64,
    },
    #[serde(rename_all = "camelCase")]
    StreamError {
        guild_id: GuildId,
        station_id: StationId,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    BotStatus { is_online: bool },
}

impl BotEvent {
    pub fn guild_id(&self) -> Option<GuildId> {
        match self {
            Self::StatusChanged { guild_id, .. }
            | Self::GuildConnectivityChanged { guild_id, .. }
            | Self::StreamError { guild_id, .. } => Some(*guild_id),
            Self::BotStatus { .. } => None,
        }
    }
}
