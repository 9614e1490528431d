use std::sync::{Arc, Weak};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::Supervisor;
use crate::{
    common::{errors::RadioResult, types::GuildId},
    gateway::{ControlCommand, Gateway, GatewayEvent, GatewayEvents},
    protocol::BotEvent,
};

fn same_gateway(a: &Arc<dyn Gateway>, b: &Arc<dyn Gateway>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl Supervisor {
    /// Opens a new gateway connection and starts consuming its events.
    pub(crate) async fn connect_gateway(self: &Arc<Self>) -> RadioResult<()> {
        let (gateway, events) = self.connector.connect().await?;

        let token = self.shutdown.child_token();
        let previous = std::mem::replace(&mut *self.connection.lock(), token.clone());
        previous.cancel();
        if let Some(old) = self.ctx.replace_gateway(Some(gateway.clone())) {
            old.close().await;
        }
        self.health.beat();
        info!("Gateway connection established");

        tokio::spawn(event_loop(Arc::downgrade(self), gateway, events, token));
        Ok(())
    }

    async fn handle_command(&self, guild: GuildId, command: ControlCommand) {
        debug!("[{}] Control command {:?}", guild, command);
        let result = match command.clone() {
            ControlCommand::SelectStation(id) => self.select_station(guild, id).await,
            ControlCommand::Pause => self.pause(guild).await,
            ControlCommand::Resume => self.resume(guild).await,
            ControlCommand::Stop => self.stop(guild).await,
            ControlCommand::SetVolume(volume) => self.set_volume(guild, volume).await,
            ControlCommand::Setup { voice, control } => {
                let hub = &self.ctx.config.voice.hub_channel_name;
                let voice = voice.or_else(|| {
                    self.ctx
                        .gateway()
                        .and_then(|g| g.guild(guild))
                        .and_then(|info| info.pick_voice_channel(hub))
                });
                match voice {
                    Some(voice) => self
                        .join_and_setup(guild, voice, Some(control))
                        .await
                        .map(|_| ()),
                    None => {
                        warn!("[{}] Setup requested but the guild has no voice channel", guild);
                        Ok(())
                    }
                }
            }
        };

        if let Err(err) = result {
            warn!("[{}] Command {:?} failed: {}", guild, command, err);
        }
    }
}

async fn event_loop(
    supervisor: Weak<Supervisor>,
    gateway: Arc<dyn Gateway>,
    mut events: GatewayEvents,
    retired: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = retired.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let Some(sup) = supervisor.upgrade() else {
            break;
        };
        if !sup.ctx.gateway().is_some_and(|g| same_gateway(&g, &gateway)) {
            debug!("Dropping event from a retired gateway");
            break;
        }
        sup.health.beat();

        match event {
            GatewayEvent::Ready => {
                info!("Gateway ready with {} guilds", gateway.guilds().len());
                sup.ctx.bus.publish(BotEvent::BotStatus { is_online: true });
                tokio::spawn(sup.clone().run_startup(gateway.clone()));
            }
            GatewayEvent::GuildCreate(info) => {
                info!("[{}] Joined guild {}", info.id, info.name);
                tokio::spawn(sup.clone().setup_new_guild(info));
            }
            GatewayEvent::GuildDelete(guild) => {
                tokio::spawn(async move { sup.remove_guild(guild).await });
            }
            GatewayEvent::Command { guild, command } => {
                tokio::spawn(async move { sup.handle_command(guild, command).await });
            }
            GatewayEvent::Disconnected => {
                error!("Gateway connection lost, scheduling a health scan");
                sup.scan_now.notify_one();
                break;
            }
        }
    }
    debug!("Gateway event loop finished");
}
