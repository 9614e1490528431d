use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::Supervisor;
use crate::{
    common::errors::ErrorKind,
    gateway::{Gateway, GuildInfo},
    protocol::BotEvent,
    session::VoiceSession,
};

impl Supervisor {
    /// Auto-setup for every guild the gateway knows, then, after the settle
    /// delay, resumes every guild whose stored state says it was playing.
    pub(crate) async fn run_startup(self: Arc<Self>, gateway: Arc<dyn Gateway>) {
        let guilds = gateway.guilds();
        info!("Startup scan over {} guilds", guilds.len());

        join_all(guilds.iter().map(|info| {
            self.ctx.bus.publish(BotEvent::GuildConnectivityChanged {
                guild_id: info.id,
                is_connected: true,
                member_count: info.member_count,
            });
            self.setup_guild(info)
        }))
        .await;

        if !self.pause_for(self.ctx.config.health.settle_delay_ms).await {
            return;
        }
        let sessions = self.registry.all();
        join_all(sessions.iter().map(|s| self.resume_guild(s))).await;
        info!("Startup finished, {} active sessions", self.registry.len());
    }

    /// Same as the startup scan, for one guild that appeared later.
    pub(crate) async fn setup_new_guild(self: Arc<Self>, info: GuildInfo) {
        self.ctx.bus.publish(BotEvent::GuildConnectivityChanged {
            guild_id: info.id,
            is_connected: true,
            member_count: info.member_count,
        });
        let Some(session) = self.setup_guild(&info).await else {
            return;
        };
        if self.pause_for(self.ctx.config.health.settle_delay_ms).await {
            self.resume_guild(&session).await;
        }
    }

    async fn setup_guild(&self, info: &GuildInfo) -> Option<Arc<VoiceSession>> {
        let names = &self.ctx.config.voice;
        let control = info.pick_control_channel(&names.control_channel_name);

        if let Some(session) = self.registry.get(info.id) {
            if let Some(control) = control {
                session.set_control_channel(control).await;
            }
            return Some(session);
        }

        let Some(voice) = info.pick_voice_channel(&names.hub_channel_name) else {
            warn!("[{}] No voice channel available, skipping auto-setup", info.id);
            return None;
        };

        match self.join_and_setup(info.id, voice, control).await {
            Ok(session) => Some(session),
            Err(err) => {
                warn!("[{}] Auto-setup failed: {}", info.id, err);
                // A timed-out join stays registered for the health scan.
                self.registry.get(info.id)
            }
        }
    }

    /// Restarts the stored station of one guild. Failures stay local to it.
    async fn resume_guild(&self, session: &Arc<VoiceSession>) {
        let guild = session.guild_id();
        let last = match self.ctx.store.get_last_station(guild).await {
            Ok(Some(last)) if last.was_playing => last,
            Ok(_) => return,
            Err(err) => {
                warn!("[{}] Could not read last station: {}", guild, err);
                return;
            }
        };
        if session.snapshot().is_playing {
            debug!("[{}] Already playing, nothing to resume", guild);
            return;
        }

        match session.select_station(last.station_id).await {
            Ok(()) => info!("[{}] Resumed station {}", guild, last.station_id),
            Err(err) if err.kind() == ErrorKind::StationNotFound => {
                warn!("[{}] Stored station {} no longer exists", guild, last.station_id)
            }
            Err(err) => warn!("[{}] Resume failed: {}", guild, err),
        }
    }
}
