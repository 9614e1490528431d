use std::{sync::Arc, time::Duration};

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod dispatch;
pub mod health;
pub mod startup;

pub use health::HealthRecord;

use crate::{
    common::{
        errors::{ErrorKind, RadioError, RadioResult},
        types::{ChannelId, GuildId, StationId},
    },
    gateway::GatewayConnector,
    protocol::{BotEvent, SessionSnapshot},
    session::{Context, SessionRegistry, VoiceSession},
};

/// Entry point of the core: owns the session registry and the gateway
/// connection, and exposes the operations the command layer calls.
pub struct Supervisor {
    ctx: Arc<Context>,
    registry: SessionRegistry,
    connector: Arc<dyn GatewayConnector>,
    health: HealthRecord,
    restart_lock: Mutex<()>,
    /// Wakes the deep scan ahead of schedule.
    scan_now: Notify,
    /// Cancelled when the current gateway connection is retired.
    connection: parking_lot::Mutex<CancellationToken>,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(ctx: Arc<Context>, connector: Arc<dyn GatewayConnector>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            registry: SessionRegistry::new(),
            connector,
            health: HealthRecord::default(),
            restart_lock: Mutex::new(()),
            scan_now: Notify::new(),
            connection: parking_lot::Mutex::new(CancellationToken::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Connects the gateway and starts the health monitor.
    pub async fn start(self: &Arc<Self>) -> RadioResult<()> {
        self.connect_gateway().await?;
        self.spawn_health();
        Ok(())
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub fn health(&self) -> &HealthRecord {
        &self.health
    }

    pub fn is_online(&self) -> bool {
        self.ctx.gateway().is_some_and(|g| g.is_connected())
    }

    pub async fn join_and_setup(
        &self,
        guild: GuildId,
        voice: ChannelId,
        control: Option<ChannelId>,
    ) -> RadioResult<Arc<VoiceSession>> {
        let gateway = self
            .ctx
            .gateway()
            .ok_or_else(|| RadioError::Gateway("gateway is not connected".into()))?;
        if !gateway
            .guild(guild)
            .is_some_and(|info| info.has_voice_channel(voice))
        {
            return Err(RadioError::ChannelUnavailable {
                guild,
                channel: voice,
            });
        }

        let (session, created) = self
            .registry
            .get_or_create(guild, || VoiceSession::new(guild, self.ctx.clone()));
        if created {
            match self.ctx.store.get_last_station(guild).await {
                Ok(Some(last)) => session.restore(last).await,
                Ok(None) => {}
                Err(err) => warn!("[{}] Could not read last station: {}", guild, err),
            }
        }

        match session.join(voice, control).await {
            Ok(()) => Ok(session),
            Err(err) => {
                let gone = matches!(
                    err.kind(),
                    ErrorKind::ChannelUnavailable | ErrorKind::SessionNotFound
                );
                if created && gone && self.registry.remove_if_same(guild, &session) {
                    session.teardown().await;
                }
                Err(err)
            }
        }
    }

    pub async fn select_station(&self, guild: GuildId, station: StationId) -> RadioResult<()> {
        self.session(guild)?.select_station(station).await
    }

    pub async fn set_volume(&self, guild: GuildId, volume: i64) -> RadioResult<()> {
        let volume = u8::try_from(volume)
            .ok()
            .filter(|v| *v <= 100)
            .ok_or(RadioError::InvalidVolume(volume))?;
        self.session(guild)?.set_volume(volume).await
    }

    pub async fn pause(&self, guild: GuildId) -> RadioResult<()> {
        self.session(guild)?.pause().await
    }

    pub async fn resume(&self, guild: GuildId) -> RadioResult<()> {
        self.session(guild)?.resume().await
    }

    pub async fn stop(&self, guild: GuildId) -> RadioResult<()> {
        self.session(guild)?.stop().await
    }

    pub fn session_snapshot(&self, guild: GuildId) -> Option<SessionSnapshot> {
        self.registry.get(guild).map(|s| s.snapshot())
    }

    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut all: Vec<SessionSnapshot> =
            self.registry.all().iter().map(|s| s.snapshot()).collect();
        all.sort_by_key(|s| s.guild_id);
        all
    }

    pub fn active_guilds(&self) -> Vec<GuildId> {
        self.registry.guild_ids()
    }

    /// Tears down the guild's session after the bot left the guild.
    pub async fn remove_guild(&self, guild: GuildId) {
        if let Some(session) = self.registry.remove(guild) {
            session.teardown().await;
        }
        self.ctx.bus.publish(BotEvent::GuildConnectivityChanged {
            guild_id: guild,
            is_connected: false,
            member_count: 0,
        });
        info!("[{}] Guild removed", guild);
    }

    /// Stops every background task, tears down all sessions and closes the
    /// gateway.
    pub async fn shutdown(&self) {
        info!("Shutting down supervisor");
        self.shutdown.cancel();
        self.connection.lock().cancel();
        self.teardown_all().await;
        if let Some(gateway) = self.ctx.replace_gateway(None) {
            gateway.close().await;
        }
        self.ctx.bus.publish(BotEvent::BotStatus { is_online: false });
    }

    fn session(&self, guild: GuildId) -> RadioResult<Arc<VoiceSession>> {
        self.registry
            .get(guild)
            .ok_or(RadioError::SessionNotFound(guild))
    }

    async fn teardown_all(&self) {
        let sessions: Vec<Arc<VoiceSession>> = self
            .registry
            .guild_ids()
            .into_iter()
            .filter_map(|guild| self.registry.remove(guild))
            .collect();
        futures::future::join_all(sessions.iter().map(|s| s.teardown())).await;
    }

    /// Sleeps unless the supervisor shuts down first. Returns `false` on
    /// shutdown.
    async fn pause_for(&self, ms: u64) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(Duration::from_millis(ms)) => true,
        }
    }
}
