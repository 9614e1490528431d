use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::{self, protocol::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    Gateway, GatewayEvent, GuildInfo,
    constants::{READY_GUILD_WAIT_MS, VOICE_HANDSHAKE_TIMEOUT_MS},
    interactions::{acknowledge, parse_interaction},
    messages::{ChannelMessenger, presence_update},
    types::{GatewayPayload, is_fatal_close, parse_channel, parse_guild, snowflake},
};
use crate::{
    common::{
        errors::{RadioError, RadioResult},
        types::{ChannelId, GuildId, UserId, now_ms},
    },
    protocol::Station,
    voice::{VoiceConnection, VoiceServerInfo, VoiceTransport},
};

#[derive(Default)]
struct PendingVoice {
    channel_id: Option<ChannelId>,
    session_id: Option<String>,
    server: Option<(String, String)>,
    done: Option<oneshot::Sender<VoiceServerInfo>>,
}

/// One gateway v10 connection and the guild cache it maintains.
pub struct DiscordShard {
    http: reqwest::Client,
    messenger: ChannelMessenger,
    activity: String,
    tx: mpsc::UnboundedSender<Message>,
    guilds: DashMap<GuildId, GuildInfo>,
    pending_voice: DashMap<GuildId, PendingVoice>,
    user_id: AtomicU64,
    connected: AtomicBool,
    closing: AtomicBool,
    last_ack: AtomicU64,
    heartbeat_interval: AtomicU64,
    cancel: CancellationToken,
}

impl DiscordShard {
    pub(super) fn new(
        http: reqwest::Client,
        messenger: ChannelMessenger,
        activity: String,
        tx: mpsc::UnboundedSender<Message>,
        heartbeat_interval: u64,
    ) -> Self {
        Self {
            http,
            messenger,
            activity,
            tx,
            guilds: DashMap::new(),
            pending_voice: DashMap::new(),
            user_id: AtomicU64::new(0),
            connected: AtomicBool::new(true),
            closing: AtomicBool::new(false),
            last_ack: AtomicU64::new(now_ms()),
            heartbeat_interval: AtomicU64::new(heartbeat_interval),
            cancel: CancellationToken::new(),
        }
    }

    pub(super) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(super) fn last_ack(&self) -> u64 {
        self.last_ack.load(Ordering::Acquire)
    }

    pub(super) fn mark_zombied(&self) {
        self.connected.store(false, Ordering::Release);
        self.cancel.cancel();
    }

    fn send(&self, op: u8, d: Value) {
        match serde_json::to_string(&GatewayPayload::new(op, d)) {
            Ok(json) => {
                if self.tx.send(Message::Text(json.into())).is_err() {
                    debug!("Gateway writer is gone, dropping op {}", op);
                }
            }
            Err(e) => warn!("Failed to encode gateway op {}: {}", op, e),
        }
    }

    fn update_voice_state(&self, guild: GuildId, channel: Option<ChannelId>) {
        self.send(
            4,
            json!({
                "guild_id": guild,
                "channel_id": channel,
                "self_mute": false,
                "self_deaf": true,
            }),
        );
    }

    /// Completes a pending join once both halves of the handshake arrived.
    fn try_complete_voice(&self, guild: GuildId) {
        let Some((_, mut pending)) = self.pending_voice.remove_if(&guild, |_, p| {
            p.session_id.is_some() && p.server.is_some()
        }) else {
            return;
        };

        let (Some(channel_id), Some(session_id), Some((token, endpoint)), Some(done)) = (
            pending.channel_id,
            pending.session_id.take(),
            pending.server.take(),
            pending.done.take(),
        ) else {
            return;
        };

        let info = VoiceServerInfo {
            guild_id: guild,
            channel_id,
            user_id: UserId(self.user_id.load(Ordering::Acquire)),
            session_id,
            token,
            endpoint,
        };
        let _ = done.send(info);
    }

    fn handle_voice_state(&self, d: &Value) {
        let (Some(guild), Some(user)) = (snowflake(&d["guild_id"]), snowflake(&d["user_id"])) else {
            return;
        };
        if user != self.user_id.load(Ordering::Acquire) {
            return;
        }
        let guild = GuildId(guild);
        if let Some(mut pending) = self.pending_voice.get_mut(&guild) {
            pending.session_id = d["session_id"].as_str().map(str::to_string);
        }
        self.try_complete_voice(guild);
    }

    fn handle_voice_server(&self, d: &Value) {
        let Some(guild) = snowflake(&d["guild_id"]).map(GuildId) else {
            return;
        };
        // A null endpoint means the voice server is being reallocated; a
        // second update follows.
        let (Some(token), Some(endpoint)) = (d["token"].as_str(), d["endpoint"].as_str()) else {
            return;
        };
        if let Some(mut pending) = self.pending_voice.get_mut(&guild) {
            pending.server = Some((token.to_string(), endpoint.to_string()));
        }
        self.try_complete_voice(guild);
    }

    fn upsert_channel(&self, d: &Value) {
        let (Some(guild), Some(channel)) = (snowflake(&d["guild_id"]).map(GuildId), parse_channel(d))
        else {
            return;
        };
        if let Some(mut info) = self.guilds.get_mut(&guild) {
            match info.channels.iter_mut().find(|c| c.id == channel.id) {
                Some(existing) => *existing = channel,
                None => info.channels.push(channel),
            }
        }
    }

    fn remove_channel(&self, d: &Value) {
        let (Some(guild), Some(channel)) = (snowflake(&d["guild_id"]), snowflake(&d["id"])) else {
            return;
        };
        if let Some(mut info) = self.guilds.get_mut(&GuildId(guild)) {
            info.channels.retain(|c| c.id.0 != channel);
        }
    }

    /// Reads dispatches until the connection ends, translating them into
    /// [`GatewayEvent`]s.
    pub(super) async fn run_reader<S>(
        self: Arc<Self>,
        mut read: S,
        seq: Arc<AtomicI64>,
        events: mpsc::UnboundedSender<GatewayEvent>,
    ) where
        S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        let mut expected: HashSet<GuildId> = HashSet::new();
        let mut ready_sent = false;
        let mut ready_deadline: Option<tokio::time::Instant> = None;

        loop {
            let deadline = ready_deadline;
            let msg = tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                } => {
                    warn!("{} guilds did not arrive in time, reporting ready", expected.len());
                    ready_deadline = None;
                    ready_sent = true;
                    let _ = events.send(GatewayEvent::Ready);
                    continue;
                }
                msg = read.next() => msg,
            };

            let text = match msg {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.as_ref().map(|f| u16::from(f.code)).unwrap_or(1000);
                    if is_fatal_close(code) {
                        error!("Gateway closed with fatal code {}: {:?}", code, frame);
                    } else {
                        info!("Gateway closed with code {}", code);
                    }
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("Gateway read error: {}", e);
                    break;
                }
                None => {
                    info!("Gateway stream ended");
                    break;
                }
            };

            let payload: GatewayPayload = match serde_json::from_str(text.as_str()) {
                Ok(p) => p,
                Err(e) => {
                    warn!("Failed to parse gateway payload: {}", e);
                    continue;
                }
            };

            if let Some(s) = payload.s {
                seq.store(s, Ordering::Relaxed);
            }

            match payload.op {
                0 => {}
                1 => {
                    let s = seq.load(Ordering::Relaxed);
                    self.send(1, if s < 0 { Value::Null } else { s.into() });
                    continue;
                }
                7 | 9 => {
                    info!("Gateway asked for a new session (op {})", payload.op);
                    break;
                }
                11 => {
                    self.last_ack.store(now_ms(), Ordering::Release);
                    continue;
                }
                op => {
                    debug!("Gateway op {} ignored", op);
                    continue;
                }
            }

            let d = &payload.d;
            match payload.t.as_deref().unwrap_or_default() {
                "READY" => {
                    if let Some(user) = snowflake(&d["user"]["id"]) {
                        self.user_id.store(user, Ordering::Release);
                    }
                    expected = d["guilds"]
                        .as_array()
                        .map(|list| list.iter().filter_map(|g| snowflake(&g["id"]).map(GuildId)).collect())
                        .unwrap_or_default();
                    info!(
                        "Gateway ready as {}, waiting for {} guilds",
                        d["user"]["username"].as_str().unwrap_or("unknown"),
                        expected.len()
                    );
                    self.send(3, presence_update(&self.activity));
                    if expected.is_empty() {
                        ready_sent = true;
                        let _ = events.send(GatewayEvent::Ready);
                    } else {
                        ready_deadline = Some(
                            tokio::time::Instant::now() + Duration::from_millis(READY_GUILD_WAIT_MS),
                        );
                    }
                }
                "GUILD_CREATE" => {
                    let Some(guild) = parse_guild(d) else {
                        continue;
                    };
                    debug!("[{}] Guild available: {}", guild.id, guild.name);
                    self.guilds.insert(guild.id, guild.clone());
                    if ready_sent {
                        let _ = events.send(GatewayEvent::GuildCreate(guild));
                    } else {
                        expected.remove(&guild.id);
                        if expected.is_empty() && ready_deadline.is_some() {
                            ready_deadline = None;
                            ready_sent = true;
                            let _ = events.send(GatewayEvent::Ready);
                        }
                    }
                }
                "GUILD_UPDATE" => {
                    if let Some(id) = snowflake(&d["id"]) {
                        if let Some(mut info) = self.guilds.get_mut(&GuildId(id)) {
                            if let Some(name) = d["name"].as_str() {
                                info.name = name.to_string();
                            }
                        }
                    }
                }
                "GUILD_DELETE" => {
                    let Some(id) = snowflake(&d["id"]).map(GuildId) else {
                        continue;
                    };
                    if d["unavailable"].as_bool() == Some(true) {
                        warn!("[{}] Guild became unavailable", id);
                        continue;
                    }
                    self.guilds.remove(&id);
                    self.pending_voice.remove(&id);
                    let _ = events.send(GatewayEvent::GuildDelete(id));
                }
                "CHANNEL_CREATE" | "CHANNEL_UPDATE" => self.upsert_channel(d),
                "CHANNEL_DELETE" => self.remove_channel(d),
                "VOICE_STATE_UPDATE" => self.handle_voice_state(d),
                "VOICE_SERVER_UPDATE" => self.handle_voice_server(d),
                "INTERACTION_CREATE" => {
                    if let Some(interaction) = parse_interaction(d) {
                        let _ = events.send(GatewayEvent::Command {
                            guild: interaction.guild,
                            command: interaction.command.clone(),
                        });
                        let http = self.http.clone();
                        tokio::spawn(async move { acknowledge(&http, &interaction).await });
                    }
                }
                _ => {}
            }
        }

        self.connected.store(false, Ordering::Release);
        self.cancel.cancel();
        self.pending_voice.clear();
        if !self.closing.load(Ordering::Acquire) {
            let _ = events.send(GatewayEvent::Disconnected);
        }
    }
}

#[async_trait]
impl Gateway for DiscordShard {
    fn guilds(&self) -> Vec<GuildInfo> {
        let mut guilds: Vec<GuildInfo> = self.guilds.iter().map(|g| g.clone()).collect();
        guilds.sort_by_key(|g| g.id);
        guilds
    }

    fn guild(&self, id: GuildId) -> Option<GuildInfo> {
        self.guilds.get(&id).map(|g| g.clone())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn is_responsive(&self) -> bool {
        let window = self.heartbeat_interval.load(Ordering::Relaxed).saturating_mul(2) + 5_000;
        self.is_connected() && now_ms().saturating_sub(self.last_ack()) <= window
    }

    async fn join_voice(
        &self,
        guild: GuildId,
        channel: ChannelId,
    ) -> RadioResult<Box<dyn VoiceTransport>> {
        if !self.guild(guild).is_some_and(|g| g.has_voice_channel(channel)) {
            return Err(RadioError::ChannelUnavailable { guild, channel });
        }
        if !self.is_connected() {
            return Err(RadioError::Gateway("gateway is not connected".into()));
        }

        let (done_tx, done_rx) = oneshot::channel();
        self.pending_voice.insert(
            guild,
            PendingVoice {
                channel_id: Some(channel),
                done: Some(done_tx),
                ..Default::default()
            },
        );
        debug!("[{}] Requesting voice channel {}", guild, channel);
        self.update_voice_state(guild, Some(channel));

        let info = match tokio::time::timeout(
            Duration::from_millis(VOICE_HANDSHAKE_TIMEOUT_MS),
            done_rx,
        )
        .await
        {
            Ok(Ok(info)) => info,
            Ok(Err(_)) => {
                return Err(RadioError::Gateway(
                    "voice handshake abandoned by gateway".into(),
                ));
            }
            Err(_) => {
                self.pending_voice.remove(&guild);
                return Err(RadioError::JoinTimeout {
                    guild,
                    timeout_ms: VOICE_HANDSHAKE_TIMEOUT_MS,
                });
            }
        };

        debug!("[{}] Voice server assigned: {}", guild, info.endpoint);
        Ok(Box::new(VoiceConnection::connect(info)))
    }

    async fn leave_voice(&self, guild: GuildId) {
        self.pending_voice.remove(&guild);
        if self.is_connected() {
            self.update_voice_state(guild, None);
        }
    }

    async fn announce_now_playing(&self, guild: GuildId, channel: ChannelId, station: &Station) {
        self.messenger.announce_now_playing(guild, channel, station).await;
    }

    async fn close(&self) {
        self.closing.store(true, Ordering::Release);
        self.connected.store(false, Ordering::Release);
        let _ = self.tx.send(Message::Close(None));
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    fn shard() -> (Arc<DiscordShard>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let http = reqwest::Client::new();
        let messenger = ChannelMessenger::new(http.clone(), "test-token");
        let shard = DiscordShard::new(http, messenger, "24/7 Radio".into(), tx, 41_250);
        (Arc::new(shard), rx)
    }

    fn dispatch(t: &str, s: i64, d: Value) -> Result<Message, tungstenite::Error> {
        let payload = json!({ "op": 0, "t": t, "s": s, "d": d });
        Ok(Message::Text(payload.to_string().into()))
    }

    #[tokio::test]
    async fn ready_sets_listening_presence() {
        let (shard, mut outbound) = shard();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let read = stream::iter(vec![dispatch(
            "READY",
            1,
            json!({ "user": { "id": "42", "username": "radio" }, "guilds": [] }),
        )]);

        shard
            .clone()
            .run_reader(read, Arc::new(AtomicI64::new(-1)), events_tx)
            .await;

        assert_eq!(events.recv().await, Some(GatewayEvent::Ready));
        assert_eq!(events.recv().await, Some(GatewayEvent::Disconnected));

        let Some(Message::Text(text)) = outbound.recv().await else {
            panic!("no presence update sent");
        };
        let payload: GatewayPayload = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(payload.op, 3);
        assert_eq!(payload.d["activities"][0]["name"], "24/7 Radio");
        assert_eq!(payload.d["activities"][0]["type"], 2);
        assert!(!shard.is_connected());
    }

    #[tokio::test]
    async fn guilds_from_ready_are_cached_before_ready_fires() {
        let (shard, _outbound) = shard();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let guild = json!({
            "id": "7",
            "name": "Lounge",
            "member_count": 3,
            "channels": [{ "id": "702", "name": "Radio Hub", "type": 2 }],
        });
        let read = stream::iter(vec![
            dispatch("READY", 1, json!({ "user": { "id": "42" }, "guilds": [{ "id": "7" }] })),
            dispatch("GUILD_CREATE", 2, guild),
        ]);

        shard
            .clone()
            .run_reader(read, Arc::new(AtomicI64::new(-1)), events_tx)
            .await;

        assert_eq!(events.recv().await, Some(GatewayEvent::Ready));
        assert!(shard.guild(GuildId(7)).is_some_and(|g| g.has_voice_channel(ChannelId(702))));
    }
}
