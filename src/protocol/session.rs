use serde::Serialize;

use crate::common::types::{ChannelId, GuildId, StationId};

/// Lifecycle state of a guild's voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready,
    Playing,
    Paused,
    Reconnecting,
}

impl SessionState {
    /// States in which the voice transport is expected to be live.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Ready | Self::Playing | Self::Paused)
    }
}

/// Point-in-time view of a session handed to the API layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub guild_id: GuildId,
    pub state: SessionState,
    pub is_playing: bool,
    pub current_station: Option<StationId>,
    pub volume: u8,
    pub voice_channel_id: Option<ChannelId>,
    pub control_channel_id: Option<ChannelId>,
    /// Unix milliseconds of the last playback state change.
    pub last_activity: u64,
}
