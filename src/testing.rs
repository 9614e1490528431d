//! In-process fakes for the gateway, voice transport, stream resolver and
//! event bus.

use std::{
    collections::{HashMap, HashSet},
    io::Cursor,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::{
    audio::{PipelineOutput, StreamResolver, StreamSource},
    common::{
        errors::{RadioError, RadioResult},
        types::{ChannelId, GuildId, StationId},
    },
    configs::Config,
    events::EventBus,
    gateway::{
        ChannelInfo, ChannelKind, Gateway, GatewayConnector, GatewayEvent, GatewayEvents,
        GuildInfo,
    },
    protocol::{BotEvent, Station},
    session::Context,
    storage::{MemoryStore, StationStore},
    voice::{TransportState, VoiceTransport},
};

/// 16-bit PCM WAV file holding a quiet sine tone.
pub fn wav_bytes(sample_rate: u32, channels: u16, frames: usize) -> Vec<u8> {
    let data_len = frames as u32 * channels as u32 * 2;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVEfmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * channels as u32 * 2).to_le_bytes());
    out.extend_from_slice(&(channels * 2).to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let sample = ((t * 440.0 * std::f32::consts::TAU).sin() * 4_000.0) as i16;
        for _ in 0..channels {
            out.extend_from_slice(&sample.to_le_bytes());
        }
    }
    out
}

/// Configuration with every interval shortened for real-time tests.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.bot.token = "test-token".into();
    config.player.ready_timeout_ms = 300;
    config.player.swap_grace_ms = 10;
    config.health.heartbeat_interval_ms = 20;
    config.health.deep_scan_interval_ms = 60;
    config.health.stale_threshold_ms = 200;
    config.health.restart_cooldown_ms = 20;
    config.health.settle_delay_ms = 50;
    config.health.backoff_base_ms = 20;
    config
}

pub fn guild(id: u64, member_count: u64) -> GuildInfo {
    let channel = |offset: u64, name: &str, kind| ChannelInfo {
        id: ChannelId(id * 100 + offset),
        name: name.into(),
        kind,
    };
    GuildInfo {
        id: GuildId(id),
        name: format!("guild-{}", id),
        member_count,
        channels: vec![
            channel(1, "general", ChannelKind::Text),
            channel(2, "Radio Hub", ChannelKind::Voice),
            channel(3, "radio-control", ChannelKind::Text),
        ],
    }
}

/// Voice channel id of a guild built by [`guild`].
pub fn hub_channel(id: u64) -> ChannelId {
    ChannelId(id * 100 + 2)
}

pub fn control_channel(id: u64) -> ChannelId {
    ChannelId(id * 100 + 3)
}

pub fn stations() -> MemoryStore {
    MemoryStore::with_stations([
        Station::new(5, "Lo-Fi Beats", "http://radio.test/lofi.mp3"),
        Station::new(7, "Jazz FM", "http://radio.test/jazz.pls"),
        Station::new(9, "Synthwave", "http://radio.test/synth.aac"),
        Station::new(11, "Dead Air", "http://radio.test/offline.mp3"),
    ])
}

pub struct Harness {
    pub ctx: Arc<Context>,
    pub store: Arc<MemoryStore>,
    pub bus: Arc<RecordingBus>,
    pub resolver: Arc<StaticResolver>,
}

pub fn harness(config: Config) -> Harness {
    let store = Arc::new(stations());
    let bus = Arc::new(RecordingBus::default());
    let resolver = Arc::new(StaticResolver::default());
    let ctx = Arc::new(Context::new(
        Arc::new(config),
        resolver.clone(),
        store.clone() as Arc<dyn StationStore>,
        bus.clone(),
    ));
    Harness {
        ctx,
        store,
        bus,
        resolver,
    }
}

/// Polls `check` until it holds or five seconds pass.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[derive(Default)]
pub struct RecordingBus {
    events: Mutex<Vec<BotEvent>>,
}

impl RecordingBus {
    pub fn events(&self) -> Vec<BotEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// `(is_playing, station)` pairs of the guild's `statusChanged` events.
    pub fn statuses(&self, guild: GuildId) -> Vec<(bool, Option<StationId>)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                BotEvent::StatusChanged {
                    guild_id,
                    is_playing,
                    current_station_id,
                } if *guild_id == guild => Some((*is_playing, *current_station_id)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&BotEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }
}

impl EventBus for RecordingBus {
    fn publish(&self, event: BotEvent) {
        self.events.lock().push(event);
    }
}

/// Serves generated audio for every station except the ones marked down.
#[derive(Default)]
pub struct StaticResolver {
    unreachable: Mutex<HashSet<StationId>>,
    open_delay: Mutex<Duration>,
    opens: AtomicUsize,
}

impl StaticResolver {
    pub fn set_unreachable(&self, id: StationId, down: bool) {
        let mut set = self.unreachable.lock();
        if down {
            set.insert(id);
        } else {
            set.remove(&id);
        }
    }

    /// Makes every `open` take `delay` before answering.
    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock() = delay;
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamResolver for StaticResolver {
    async fn open(&self, station: &Station) -> RadioResult<StreamSource> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let delay = *self.open_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable.lock().contains(&station.id) {
            return Err(RadioError::StreamUnreachable {
                station: station.id,
                reason: "connection refused".into(),
            });
        }
        let audio = wav_bytes(48_000, 2, 48_000 * 10);
        Ok(StreamSource::new(Box::new(Cursor::new(audio)), Some("wav")))
    }
}

pub struct FakeTransport {
    state: watch::Sender<TransportState>,
    output: Mutex<Option<PipelineOutput>>,
    shut_down: AtomicBool,
}

impl FakeTransport {
    fn new(initial: TransportState) -> Arc<Self> {
        let (state, _) = watch::channel(initial);
        Arc::new(Self {
            state,
            output: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Simulates the voice backend dropping the connection.
    pub fn drop_connection(&self) {
        self.state.send_replace(TransportState::Disconnected);
    }

    pub fn is_attached(&self) -> bool {
        self.output.lock().is_some()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

struct TransportHandle(Arc<FakeTransport>);

impl VoiceTransport for TransportHandle {
    fn watch(&self) -> watch::Receiver<TransportState> {
        self.0.state.subscribe()
    }

    fn attach(&self, output: PipelineOutput) {
        *self.0.output.lock() = Some(output);
    }

    fn detach(&self) {
        self.0.output.lock().take();
    }

    fn shutdown(&self) {
        self.0.shut_down.store(true, Ordering::SeqCst);
        self.0.state.send_replace(TransportState::Disconnected);
    }
}

pub struct FakeGateway {
    guilds: Mutex<Vec<GuildInfo>>,
    connected: AtomicBool,
    responsive: AtomicBool,
    /// New transports stay in `Connecting` forever.
    hang_joins: AtomicBool,
    /// The voice handshake itself never completes.
    stall_handshakes: AtomicBool,
    transports: Mutex<HashMap<GuildId, Arc<FakeTransport>>>,
    joins: AtomicUsize,
    leaves: Mutex<Vec<GuildId>>,
    announcements: Mutex<Vec<(ChannelId, StationId)>>,
    events: mpsc::UnboundedSender<GatewayEvent>,
}

impl FakeGateway {
    pub fn new(guilds: Vec<GuildInfo>) -> (Arc<Self>, GatewayEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let gateway = Arc::new(Self {
            guilds: Mutex::new(guilds),
            connected: AtomicBool::new(true),
            responsive: AtomicBool::new(true),
            hang_joins: AtomicBool::new(false),
            stall_handshakes: AtomicBool::new(false),
            transports: Mutex::new(HashMap::new()),
            joins: AtomicUsize::new(0),
            leaves: Mutex::new(Vec::new()),
            announcements: Mutex::new(Vec::new()),
            events,
        });
        (gateway, rx)
    }

    pub fn emit(&self, event: GatewayEvent) {
        let _ = self.events.send(event);
    }

    pub fn add_guild(&self, info: GuildInfo) {
        self.guilds.lock().push(info);
    }

    pub fn remove_guild(&self, id: GuildId) {
        self.guilds.lock().retain(|g| g.id != id);
    }

    pub fn set_responsive(&self, responsive: bool) {
        self.responsive.store(responsive, Ordering::SeqCst);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn hang_joins(&self, hang: bool) {
        self.hang_joins.store(hang, Ordering::SeqCst);
    }

    pub fn stall_handshakes(&self, stall: bool) {
        self.stall_handshakes.store(stall, Ordering::SeqCst);
    }

    pub fn transport(&self, guild: GuildId) -> Option<Arc<FakeTransport>> {
        self.transports.lock().get(&guild).cloned()
    }

    pub fn joins(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    pub fn leaves(&self) -> Vec<GuildId> {
        self.leaves.lock().clone()
    }

    /// `(channel, station)` of every "now playing" card posted.
    pub fn announcements(&self) -> Vec<(ChannelId, StationId)> {
        self.announcements.lock().clone()
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    fn guilds(&self) -> Vec<GuildInfo> {
        self.guilds.lock().clone()
    }

    fn guild(&self, id: GuildId) -> Option<GuildInfo> {
        self.guilds.lock().iter().find(|g| g.id == id).cloned()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_responsive(&self) -> bool {
        self.is_connected() && self.responsive.load(Ordering::SeqCst)
    }

    async fn join_voice(
        &self,
        guild: GuildId,
        channel: ChannelId,
    ) -> RadioResult<Box<dyn VoiceTransport>> {
        let known = self
            .guild(guild)
            .is_some_and(|info| info.has_voice_channel(channel));
        if !known {
            return Err(RadioError::ChannelUnavailable { guild, channel });
        }

        self.joins.fetch_add(1, Ordering::SeqCst);
        if self.stall_handshakes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let initial = if self.hang_joins.load(Ordering::SeqCst) {
            TransportState::Connecting
        } else {
            TransportState::Ready
        };
        let transport = FakeTransport::new(initial);
        self.transports.lock().insert(guild, transport.clone());
        Ok(Box::new(TransportHandle(transport)))
    }

    async fn leave_voice(&self, guild: GuildId) {
        self.leaves.lock().push(guild);
    }

    async fn announce_now_playing(&self, _guild: GuildId, channel: ChannelId, station: &Station) {
        self.announcements.lock().push((channel, station.id));
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Hands out a fresh [`FakeGateway`] per connect, each announcing `Ready`.
pub struct FakeConnector {
    guilds: Mutex<Vec<GuildInfo>>,
    connects: AtomicUsize,
    fail: AtomicBool,
    current: Mutex<Option<Arc<FakeGateway>>>,
}

impl FakeConnector {
    pub fn new(guilds: Vec<GuildInfo>) -> Arc<Self> {
        Arc::new(Self {
            guilds: Mutex::new(guilds),
            connects: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            current: Mutex::new(None),
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> Arc<FakeGateway> {
        self.current.lock().clone().expect("no gateway connected yet")
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl GatewayConnector for FakeConnector {
    async fn connect(&self) -> RadioResult<(Arc<dyn Gateway>, GatewayEvents)> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RadioError::Gateway("connection refused".into()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (gateway, events) = FakeGateway::new(self.guilds.lock().clone());
        gateway.emit(GatewayEvent::Ready);
        *self.current.lock() = Some(gateway.clone());
        Ok((gateway, events))
    }
}
