use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::{
    common::{
        errors::RadioResult,
        types::{ChannelId, GuildId, StationId},
    },
    protocol::Station,
    voice::VoiceTransport,
};

pub mod connector;
pub mod constants;
pub mod heartbeat;
pub mod interactions;
pub mod messages;
pub mod shard;
pub mod types;

pub use connector::DiscordConnector;
pub use shard::DiscordShard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelKind {
    Voice,
    Text,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
    pub kind: ChannelKind,
}

/// Cached view of a guild as delivered by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildInfo {
    pub id: GuildId,
    pub name: String,
    pub member_count: u64,
    pub channels: Vec<ChannelInfo>,
}

impl GuildInfo {
    pub fn channel(&self, id: ChannelId) -> Option<&ChannelInfo> {
        self.channels.iter().find(|c| c.id == id)
    }

    pub fn has_voice_channel(&self, id: ChannelId) -> bool {
        self.channel(id).is_some_and(|c| c.kind == ChannelKind::Voice)
    }

    /// The voice channel whose name contains `preferred`, else the first one.
    pub fn pick_voice_channel(&self, preferred: &str) -> Option<ChannelId> {
        self.pick(ChannelKind::Voice, preferred)
    }

    /// The text channel whose name contains `preferred`, else the first one.
    pub fn pick_control_channel(&self, preferred: &str) -> Option<ChannelId> {
        self.pick(ChannelKind::Text, preferred)
    }

    fn pick(&self, kind: ChannelKind, preferred: &str) -> Option<ChannelId> {
        let preferred = preferred.to_lowercase();
        let mut of_kind = self.channels.iter().filter(|c| c.kind == kind);
        of_kind
            .clone()
            .find(|c| !preferred.is_empty() && c.name.to_lowercase().contains(&preferred))
            .or_else(|| of_kind.next())
            .map(|c| c.id)
    }
}

/// Remote control request delivered through the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    SelectStation(StationId),
    Pause,
    Resume,
    Stop,
    SetVolume(i64),
    Setup {
        voice: Option<ChannelId>,
        control: ChannelId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// Identify completed and the initial guild list has been received.
    Ready,
    /// A guild became available after `Ready` (bot invited, outage over).
    GuildCreate(GuildInfo),
    /// The bot was removed from a guild.
    GuildDelete(GuildId),
    Command {
        guild: GuildId,
        command: ControlCommand,
    },
    /// The connection is gone; no further events follow.
    Disconnected,
}

/// The single control-plane connection shared by every session.
#[async_trait]
pub trait Gateway: Send + Sync {
    fn guilds(&self) -> Vec<GuildInfo>;

    fn guild(&self, id: GuildId) -> Option<GuildInfo>;

    fn is_connected(&self) -> bool;

    /// Connected and still acknowledging heartbeats.
    fn is_responsive(&self) -> bool;

    /// Joins `channel` and returns a transport that is still connecting.
    async fn join_voice(
        &self,
        guild: GuildId,
        channel: ChannelId,
    ) -> RadioResult<Box<dyn VoiceTransport>>;

    async fn leave_voice(&self, guild: GuildId);

    /// Posts a "now playing" card for `station` into `channel`. Best effort.
    async fn announce_now_playing(&self, guild: GuildId, channel: ChannelId, station: &Station);

    async fn close(&self);
}

pub type GatewayEvents = mpsc::UnboundedReceiver<GatewayEvent>;

/// Creates gateway connections; only the supervisor calls this.
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    async fn connect(&self) -> RadioResult<(Arc<dyn Gateway>, GatewayEvents)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guild() -> GuildInfo {
        let ch = |id, name: &str, kind| ChannelInfo {
            id: ChannelId(id),
            name: name.into(),
            kind,
        };
        GuildInfo {
            id: GuildId(1),
            name: "Test".into(),
            member_count: 4,
            channels: vec![
                ch(10, "general", ChannelKind::Text),
                ch(11, "Lounge", ChannelKind::Voice),
                ch(12, "📻 Radio Hub", ChannelKind::Voice),
                ch(13, "radio-control", ChannelKind::Text),
            ],
        }
    }

    #[test]
    fn prefers_named_channels() {
        let g = guild();
        assert_eq!(g.pick_voice_channel("radio hub"), Some(ChannelId(12)));
        assert_eq!(g.pick_control_channel("radio-control"), Some(ChannelId(13)));
    }

    #[test]
    fn falls_back_to_first_of_kind() {
        let g = guild();
        assert_eq!(g.pick_voice_channel("Jazz Bar"), Some(ChannelId(11)));
        assert_eq!(g.pick_control_channel(""), Some(ChannelId(10)));
    }

    #[test]
    fn voice_channel_check() {
        let g = guild();
        assert!(g.has_voice_channel(ChannelId(11)));
        assert!(!g.has_voice_channel(ChannelId(10)));
        assert!(!g.has_voice_channel(ChannelId(99)));
    }
}
