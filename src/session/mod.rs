use std::{
    future::Future,
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::RwLock;
use tokio::{sync::Mutex, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod backoff;
pub mod context;
pub mod link;
pub mod registry;

pub use backoff::Backoff;
pub use context::Context;
pub use link::VoiceLink;
pub use registry::SessionRegistry;

use crate::{
    audio::PlaybackState,
    common::{
        errors::{ErrorKind, RadioError, RadioResult},
        types::{ChannelId, GuildId, StationId, now_ms},
    },
    protocol::{BotEvent, LastPlayed, SessionSnapshot, SessionState, Station},
    voice::TransportState,
};

/// Result of one health-driven repair pass over a session.
#[derive(Debug)]
pub enum RepairOutcome {
    /// Transport is live or there is nothing to reconnect.
    Healthy,
    /// Another operation holds the session; try on the next scan.
    Busy,
    /// Still inside the backoff window of a previous failure.
    Deferred,
    Repaired,
    Failed(RadioError),
}

struct SessionInner {
    state: SessionState,
    link: Option<VoiceLink>,
    generation: u64,
    current_station: Option<StationId>,
    /// Playback intent; survives transport loss so a reconnect resumes it.
    is_playing: bool,
    volume: u8,
    voice_channel: Option<ChannelId>,
    control_channel: Option<ChannelId>,
    last_activity: u64,
    /// Last `(is_playing, station)` pair sent as `statusChanged`.
    published: (bool, Option<StationId>),
    backoff: Backoff,
    retry_at: Option<Instant>,
}

impl SessionInner {
    fn snapshot(&self, guild_id: GuildId) -> SessionSnapshot {
        SessionSnapshot {
            guild_id,
            state: self.state,
            is_playing: self.is_playing,
            current_station: self.current_station,
            volume: self.volume,
            voice_channel_id: self.voice_channel,
            control_channel_id: self.control_channel,
            last_activity: self.last_activity,
        }
    }
}

/// Per-guild aggregate of voice link and playback state.
///
/// Every mutation runs under one operation lock, so a station select never
/// interleaves with a reconnect of the same guild. Readers use the snapshot
/// mirror and never wait on that lock.
pub struct VoiceSession {
    guild_id: GuildId,
    ctx: Arc<Context>,
    me: Weak<VoiceSession>,
    inner: Mutex<SessionInner>,
    snapshot: RwLock<SessionSnapshot>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSession")
            .field("guild_id", &self.guild_id)
            .finish_non_exhaustive()
    }
}

impl VoiceSession {
    pub fn new(guild_id: GuildId, ctx: Arc<Context>) -> Arc<Self> {
        let inner = SessionInner {
            state: SessionState::Disconnected,
            link: None,
            generation: 0,
            current_station: None,
            is_playing: false,
            volume: ctx.config.player.default_volume.min(100),
            voice_channel: None,
            control_channel: None,
            last_activity: now_ms(),
            published: (false, None),
            backoff: Backoff::new(ctx.config.health.backoff_base_ms),
            retry_at: None,
        };
        let snapshot = inner.snapshot(guild_id);

        Arc::new_cyclic(|me| Self {
            guild_id,
            ctx,
            me: me.clone(),
            inner: Mutex::new(inner),
            snapshot: RwLock::new(snapshot),
            cancel: CancellationToken::new(),
        })
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.read().clone()
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.read().state
    }

    /// Seeds the last station from storage without starting playback.
    pub async fn restore(&self, last: LastPlayed) {
        let mut inner = self.inner.lock().await;
        if inner.current_station.is_none() {
            inner.current_station = Some(last.station_id);
            self.sync(&inner);
        }
    }

    pub async fn set_control_channel(&self, channel: ChannelId) {
        let mut inner = self.inner.lock().await;
        inner.control_channel = Some(channel);
        self.sync(&inner);
    }

    /// Connects to `voice` and waits until the transport is ready. A session
    /// already live in that channel is left untouched.
    pub async fn join(&self, voice: ChannelId, control: Option<ChannelId>) -> RadioResult<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_open()?;

        if let Some(control) = control {
            inner.control_channel = Some(control);
        }

        let live = inner
            .link
            .as_ref()
            .is_some_and(|link| link.transport.state() == TransportState::Ready);
        if live && inner.voice_channel == Some(voice) && inner.state.is_connected() {
            self.sync(&inner);
            return Ok(());
        }

        inner.voice_channel = Some(voice);
        self.establish(&mut inner, voice).await?;
        inner.backoff.reset();
        inner.retry_at = None;
        Ok(())
    }

    pub async fn select_station(&self, id: StationId) -> RadioResult<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_open()?;

        let station = self
            .ctx
            .store
            .get_station(id)
            .await?
            .ok_or(RadioError::StationNotFound(id))?;

        if inner.link.is_none() {
            debug!(
                "[{}] No live transport, station {} will start after reconnect",
                self.guild_id, id
            );
            inner.current_station = Some(id);
            inner.is_playing = true;
            self.persist(id, true).await;
            self.sync(&inner);
            return Ok(());
        }

        self.play(&mut inner, station).await
    }

    /// Suspends playback. Pausing a session that is not playing is a no-op.
    pub async fn pause(&self) -> RadioResult<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_open()?;

        if !inner.is_playing {
            return Ok(());
        }

        if inner.state == SessionState::Playing {
            if let Some(link) = &inner.link {
                link.pipeline.pause();
            }
            self.transition(&mut inner, SessionState::Paused);
        }
        inner.is_playing = false;
        inner.last_activity = now_ms();
        self.publish_status(&mut inner);
        if let Some(station) = inner.current_station {
            self.persist(station, false).await;
        }
        info!("[{}] Playback paused", self.guild_id);
        Ok(())
    }

    pub async fn resume(&self) -> RadioResult<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_open()?;

        if inner.is_playing {
            return Ok(());
        }
        let Some(id) = inner.current_station else {
            return Ok(());
        };

        let suspended = inner.state == SessionState::Paused
            && inner
                .link
                .as_ref()
                .is_some_and(|link| link.pipeline.state() == PlaybackState::Paused);
        if suspended {
            if let Some(link) = &inner.link {
                link.pipeline.resume();
            }
            inner.is_playing = true;
            inner.last_activity = now_ms();
            self.transition(&mut inner, SessionState::Playing);
            self.publish_status(&mut inner);
            self.persist(id, true).await;
            info!("[{}] Playback resumed", self.guild_id);
            return Ok(());
        }

        if inner.link.is_none() {
            inner.is_playing = true;
            self.persist(id, true).await;
            self.sync(&inner);
            return Ok(());
        }

        let station = self
            .ctx
            .store
            .get_station(id)
            .await?
            .ok_or(RadioError::StationNotFound(id))?;
        self.play(&mut inner, station).await
    }

    /// Stops playback but keeps the voice connection.
    pub async fn stop(&self) -> RadioResult<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_open()?;

        if let Some(link) = &inner.link {
            link.pipeline.stop();
        }
        let was_playing = std::mem::replace(&mut inner.is_playing, false);
        if matches!(inner.state, SessionState::Playing | SessionState::Paused) {
            inner.last_activity = now_ms();
            self.transition(&mut inner, SessionState::Ready);
        }
        self.publish_status(&mut inner);
        if was_playing {
            if let Some(station) = inner.current_station {
                self.persist(station, false).await;
            }
            info!("[{}] Playback stopped", self.guild_id);
        }
        Ok(())
    }

    pub async fn set_volume(&self, volume: u8) -> RadioResult<()> {
        if volume > 100 {
            return Err(RadioError::InvalidVolume(volume as i64));
        }
        let mut inner = self.inner.lock().await;
        self.ensure_open()?;

        inner.volume = volume;
        if let Some(link) = &inner.link {
            link.pipeline.set_volume(volume);
        }
        self.sync(&inner);
        debug!("[{}] Volume set to {}", self.guild_id, volume);
        Ok(())
    }

    /// Reconnects a session whose transport is gone. Never waits for an
    /// operation in flight and honours the backoff window of earlier failures.
    pub async fn repair(&self) -> RepairOutcome {
        let Ok(mut inner) = self.inner.try_lock() else {
            return RepairOutcome::Busy;
        };
        if self.cancel.is_cancelled() {
            return RepairOutcome::Healthy;
        }

        let live = inner
            .link
            .as_ref()
            .is_some_and(|link| link.transport.state() != TransportState::Disconnected);
        if live {
            return RepairOutcome::Healthy;
        }
        let Some(channel) = inner.voice_channel else {
            return RepairOutcome::Healthy;
        };
        if inner.retry_at.is_some_and(|at| Instant::now() < at) {
            return RepairOutcome::Deferred;
        }

        info!(
            "[{}] Reconnecting to voice channel {} (attempt {})",
            self.guild_id,
            channel,
            inner.backoff.attempts() + 1
        );
        self.transition(&mut inner, SessionState::Reconnecting);
        match self.establish(&mut inner, channel).await {
            Ok(()) => {
                inner.backoff.reset();
                inner.retry_at = None;
                RepairOutcome::Repaired
            }
            Err(err) => {
                let delay = inner.backoff.next();
                inner.retry_at = Some(Instant::now() + delay);
                warn!(
                    "[{}] Reconnect failed, next attempt in {:?}: {}",
                    self.guild_id, delay, err
                );
                RepairOutcome::Failed(err)
            }
        }
    }

    /// Destroys the session: aborts pending waits, drops the voice link and
    /// leaves the channel. Storage is left as is.
    pub async fn teardown(&self) {
        self.cancel.cancel();
        let mut inner = self.inner.lock().await;

        if inner.link.take().is_some() {
            if let Some(gateway) = self.ctx.gateway() {
                gateway.leave_voice(self.guild_id).await;
            }
        }
        inner.is_playing = false;
        self.transition(&mut inner, SessionState::Disconnected);
        self.publish_status(&mut inner);
        info!("[{}] Session torn down", self.guild_id);
    }

    async fn establish(&self, inner: &mut SessionInner, channel: ChannelId) -> RadioResult<()> {
        let guild = self.guild_id;
        inner.link = None;

        let Some(gateway) = self.ctx.gateway() else {
            self.transition(inner, SessionState::Reconnecting);
            return Err(RadioError::Gateway("gateway is not connected".into()));
        };
        self.transition(inner, SessionState::Connecting);

        // One deadline covers the voice handshake and the transport becoming ready.
        let timeout_ms = self.ctx.config.player.ready_timeout_ms;
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        let joined = self
            .guarded(tokio::time::timeout_at(deadline, gateway.join_voice(guild, channel)))
            .await
            .ok_or_else(|| self.closed())?;
        let transport = match joined {
            Ok(Ok(transport)) => transport,
            Err(_) => {
                gateway.leave_voice(guild).await;
                self.transition(inner, SessionState::Reconnecting);
                return Err(RadioError::JoinTimeout { guild, timeout_ms });
            }
            Ok(Err(err)) => {
                let next = match err {
                    RadioError::ChannelUnavailable { .. } => SessionState::Disconnected,
                    _ => SessionState::Reconnecting,
                };
                self.transition(inner, next);
                return Err(err);
            }
        };

        let mut states = transport.watch();
        let ready = tokio::time::timeout_at(deadline, async {
            states
                .wait_for(|s| *s != TransportState::Connecting)
                .await
                .map(|s| *s)
        });

        match self.guarded(ready).await {
            None => {
                transport.shutdown();
                return Err(self.closed());
            }
            Some(Ok(Ok(TransportState::Ready))) => {}
            Some(Err(_)) => {
                transport.shutdown();
                gateway.leave_voice(guild).await;
                self.transition(inner, SessionState::Reconnecting);
                return Err(RadioError::JoinTimeout { guild, timeout_ms });
            }
            Some(Ok(_)) => {
                transport.shutdown();
                self.transition(inner, SessionState::Reconnecting);
                return Err(RadioError::TransportDropped(guild));
            }
        }

        inner.generation += 1;
        let link = VoiceLink::new(transport, inner.volume, inner.generation, &self.cancel);
        self.spawn_watchers(&link);
        inner.link = Some(link);
        self.transition(inner, SessionState::Ready);
        info!("[{}] Voice connected to channel {}", guild, channel);

        if let (true, Some(id)) = (inner.is_playing, inner.current_station) {
            self.resume_after_connect(inner, id).await?;
        }
        Ok(())
    }

    /// Restarts the station that was playing before the link was replaced.
    /// Stream failures are reported through events and do not fail the
    /// reconnect itself.
    async fn resume_after_connect(&self, inner: &mut SessionInner, id: StationId) -> RadioResult<()> {
        match self.ctx.store.get_station(id).await {
            Ok(Some(station)) => match self.play(inner, station).await {
                Err(err) if err.kind() == ErrorKind::SessionNotFound => Err(err),
                _ => Ok(()),
            },
            Ok(None) => {
                warn!("[{}] Station {} no longer exists, not resuming", self.guild_id, id);
                inner.is_playing = false;
                self.publish_status(inner);
                Ok(())
            }
            Err(err) => {
                warn!("[{}] Could not load station {}: {}", self.guild_id, id, err);
                Ok(())
            }
        }
    }

    async fn play(&self, inner: &mut SessionInner, station: Station) -> RadioResult<()> {
        let guild = self.guild_id;

        let busy = inner
            .link
            .as_ref()
            .is_some_and(|link| link.pipeline.state() != PlaybackState::Idle);
        if busy {
            if let Some(link) = &inner.link {
                link.pipeline.stop();
            }
            let grace = Duration::from_millis(self.ctx.config.player.swap_grace_ms);
            self.guarded(tokio::time::sleep(grace))
                .await
                .ok_or_else(|| self.closed())?;
        }

        inner.current_station = Some(station.id);
        let opened = self
            .guarded(self.ctx.resolver.open(&station))
            .await
            .ok_or_else(|| self.closed())?;

        match opened {
            Ok(source) => {
                if let Some(link) = &inner.link {
                    link.pipeline.set_volume(inner.volume);
                    link.pipeline.start(source);
                }
                inner.is_playing = true;
                inner.last_activity = now_ms();
                self.transition(inner, SessionState::Playing);
                self.publish_status(inner);
                self.persist(station.id, true).await;
                info!("[{}] Playing station {} ({})", guild, station.id, station.name);
                self.announce(inner.control_channel, station);
                Ok(())
            }
            Err(err) => {
                self.fail_stream(inner, err.to_string());
                Err(err)
            }
        }
    }

    /// Posts the "now playing" card without holding up the operation.
    fn announce(&self, channel: Option<ChannelId>, station: Station) {
        let (Some(channel), Some(gateway)) = (channel, self.ctx.gateway()) else {
            return;
        };
        let guild = self.guild_id;
        tokio::spawn(async move {
            gateway.announce_now_playing(guild, channel, &station).await;
        });
    }

    /// Marks playback failed while keeping the transport.
    fn fail_stream(&self, inner: &mut SessionInner, message: String) {
        warn!("[{}] Stream failed: {}", self.guild_id, message);
        if let Some(link) = &inner.link {
            link.pipeline.stop();
        }
        inner.is_playing = false;
        inner.last_activity = now_ms();
        let next = if inner.link.is_some() {
            SessionState::Ready
        } else {
            inner.state
        };
        self.transition(inner, next);

        if let Some(station_id) = inner.current_station {
            self.ctx.bus.publish(BotEvent::StreamError {
                guild_id: self.guild_id,
                station_id,
                message,
            });
        }
        self.publish_status(inner);
    }

    fn spawn_watchers(&self, link: &VoiceLink) {
        let generation = link.generation;

        let mut transport = link.transport.watch();
        let stop = link.watchers.clone();
        let me = self.me.clone();
        tokio::spawn(async move {
            loop {
                if *transport.borrow_and_update() == TransportState::Disconnected {
                    break;
                }
                tokio::select! {
                    _ = stop.cancelled() => return,
                    changed = transport.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            if let Some(session) = me.upgrade() {
                session.on_transport_lost(generation).await;
            }
        });

        let mut playback = link.pipeline.subscribe();
        let stop = link.watchers.clone();
        let me = self.me.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    changed = playback.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
                let Some(session) = me.upgrade() else {
                    return;
                };
                session.on_playback_change(generation).await;
            }
        });
    }

    async fn on_transport_lost(&self, generation: u64) {
        let mut inner = self.inner.lock().await;
        if inner.link.as_ref().map(|link| link.generation) != Some(generation) {
            return;
        }

        warn!("[{}] {}", self.guild_id, RadioError::TransportDropped(self.guild_id));
        inner.link = None;
        self.transition(&mut inner, SessionState::Reconnecting);
    }

    async fn on_playback_change(&self, generation: u64) {
        let mut inner = self.inner.lock().await;
        // Re-read under the lock; the signal that woke us may be stale.
        let Some(playback) = inner
            .link
            .as_ref()
            .filter(|link| link.generation == generation)
            .map(|link| link.pipeline.state())
        else {
            return;
        };

        let active = matches!(inner.state, SessionState::Playing | SessionState::Paused);
        match playback {
            PlaybackState::Playing if inner.state == SessionState::Playing => {
                inner.last_activity = now_ms();
                self.sync(&inner);
            }
            PlaybackState::Errored(message) if active => self.fail_stream(&mut inner, message),
            PlaybackState::Idle if inner.state == SessionState::Playing => {
                self.fail_stream(&mut inner, "stream ended".into())
            }
            _ => {}
        }
    }

    fn transition(&self, inner: &mut SessionInner, next: SessionState) {
        if inner.state != next {
            debug!("[{}] {:?} -> {:?}", self.guild_id, inner.state, next);
            inner.state = next;
        }
        self.sync(inner);
    }

    /// Emits `statusChanged` when the playing status differs from the last
    /// one published.
    fn publish_status(&self, inner: &mut SessionInner) {
        let status = (inner.is_playing, inner.current_station);
        if inner.published != status {
            inner.published = status;
            self.ctx.bus.publish(BotEvent::StatusChanged {
                guild_id: self.guild_id,
                is_playing: status.0,
                current_station_id: status.1,
            });
        }
        self.sync(inner);
    }

    fn sync(&self, inner: &SessionInner) {
        *self.snapshot.write() = inner.snapshot(self.guild_id);
    }

    async fn persist(&self, station: StationId, was_playing: bool) {
        if let Err(err) = self
            .ctx
            .store
            .set_last_station(self.guild_id, station, was_playing)
            .await
        {
            warn!("[{}] Failed to persist last station: {}", self.guild_id, err);
        }
    }

    async fn guarded<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }

    fn ensure_open(&self) -> RadioResult<()> {
        if self.cancel.is_cancelled() {
            Err(self.closed())
        } else {
            Ok(())
        }
    }

    fn closed(&self) -> RadioError {
        RadioError::SessionNotFound(self.guild_id)
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        storage::StationStore,
        testing::{FakeGateway, Harness, control_channel, eventually, fast_config, guild, harness, hub_channel},
    };

    const GUILD: GuildId = GuildId(1);

    fn setup() -> (Harness, Arc<FakeGateway>, Arc<VoiceSession>) {
        let h = harness(fast_config());
        let (gateway, _events) = FakeGateway::new(vec![guild(1, 3)]);
        h.ctx.replace_gateway(Some(gateway.clone()));
        let session = VoiceSession::new(GUILD, h.ctx.clone());
        (h, gateway, session)
    }

    async fn connected() -> (Harness, Arc<FakeGateway>, Arc<VoiceSession>) {
        let (h, gateway, session) = setup();
        session
            .join(hub_channel(1), Some(control_channel(1)))
            .await
            .unwrap();
        (h, gateway, session)
    }

    #[tokio::test]
    async fn join_then_select_plays_station() {
        let (h, gateway, session) = connected().await;
        let snap = session.snapshot();
        assert_eq!(snap.state, SessionState::Ready);
        assert_eq!(snap.voice_channel_id, Some(hub_channel(1)));
        assert_eq!(snap.control_channel_id, Some(control_channel(1)));
        assert_eq!(snap.volume, 75);

        session.select_station(StationId(5)).await.unwrap();
        let snap = session.snapshot();
        assert_eq!(snap.state, SessionState::Playing);
        assert!(snap.is_playing);
        assert_eq!(snap.current_station, Some(StationId(5)));
        assert_eq!(h.bus.statuses(GUILD), vec![(true, Some(StationId(5)))]);
        assert!(gateway.transport(GUILD).unwrap().is_attached());

        let last = h.store.get_last_station(GUILD).await.unwrap().unwrap();
        assert_eq!(last, LastPlayed { station_id: StationId(5), was_playing: true });
    }

    #[tokio::test]
    async fn joining_the_same_channel_twice_keeps_the_link() {
        let (_h, gateway, session) = connected().await;
        session.join(hub_channel(1), None).await.unwrap();
        assert_eq!(gateway.joins(), 1);
    }

    #[tokio::test]
    async fn swapping_stations_publishes_each_change_once() {
        let (h, _gateway, session) = connected().await;
        session.select_station(StationId(5)).await.unwrap();
        session.select_station(StationId(9)).await.unwrap();
        assert_eq!(session.snapshot().current_station, Some(StationId(9)));
        assert_eq!(
            h.bus.statuses(GUILD),
            vec![(true, Some(StationId(5))), (true, Some(StationId(9)))]
        );
        assert_eq!(h.resolver.opens(), 2);
    }

    #[tokio::test]
    async fn pause_twice_is_a_noop() {
        let (h, _gateway, session) = connected().await;
        session.select_station(StationId(5)).await.unwrap();
        session.pause().await.unwrap();
        session.pause().await.unwrap();

        assert_eq!(session.state(), SessionState::Paused);
        assert_eq!(
            h.bus.statuses(GUILD),
            vec![(true, Some(StationId(5))), (false, Some(StationId(5)))]
        );
        let last = h.store.get_last_station(GUILD).await.unwrap().unwrap();
        assert!(!last.was_playing);
    }

    #[tokio::test]
    async fn resume_continues_paused_stream() {
        let (h, _gateway, session) = connected().await;
        session.select_station(StationId(5)).await.unwrap();
        session.pause().await.unwrap();
        session.resume().await.unwrap();

        assert_eq!(session.state(), SessionState::Playing);
        assert_eq!(h.resolver.opens(), 1);
        assert_eq!(h.bus.statuses(GUILD).last(), Some(&(true, Some(StationId(5)))));
    }

    #[tokio::test]
    async fn stop_keeps_the_voice_connection() {
        let (h, gateway, session) = connected().await;
        session.select_station(StationId(5)).await.unwrap();
        session.stop().await.unwrap();

        assert_eq!(session.state(), SessionState::Ready);
        assert!(!session.snapshot().is_playing);
        assert!(!gateway.transport(GUILD).unwrap().is_shut_down());
        assert_eq!(h.bus.statuses(GUILD).last(), Some(&(false, Some(StationId(5)))));
    }

    #[tokio::test]
    async fn unknown_station_changes_nothing() {
        let (h, _gateway, session) = connected().await;
        let err = session.select_station(StationId(404)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StationNotFound);
        assert_eq!(session.state(), SessionState::Ready);
        assert!(h.bus.events().is_empty());
    }

    #[tokio::test]
    async fn unreachable_stream_keeps_transport() {
        let (h, gateway, session) = connected().await;
        h.resolver.set_unreachable(StationId(11), true);

        let err = session.select_station(StationId(11)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamUnreachable);

        let snap = session.snapshot();
        assert_eq!(snap.state, SessionState::Ready);
        assert!(!snap.is_playing);
        assert!(!gateway.transport(GUILD).unwrap().is_shut_down());
        assert_eq!(
            h.bus.count(|e| matches!(e, BotEvent::StreamError { station_id, .. } if *station_id == StationId(11))),
            1
        );

        session.select_station(StationId(5)).await.unwrap();
        assert_eq!(session.state(), SessionState::Playing);
    }

    #[tokio::test]
    async fn volume_out_of_range_is_rejected() {
        let (_h, _gateway, session) = connected().await;
        let err = session.set_volume(101).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidVolume);
        assert_eq!(session.snapshot().volume, 75);

        session.set_volume(30).await.unwrap();
        assert_eq!(session.snapshot().volume, 30);
    }

    #[tokio::test]
    async fn dropped_transport_is_repaired_with_same_station() {
        let (h, gateway, session) = connected().await;
        session.select_station(StationId(7)).await.unwrap();
        let first = gateway.transport(GUILD).unwrap();

        first.drop_connection();
        eventually("reconnecting", || session.state() == SessionState::Reconnecting).await;
        let snap = session.snapshot();
        assert!(snap.is_playing);
        assert_eq!(snap.current_station, Some(StationId(7)));

        assert!(matches!(session.repair().await, RepairOutcome::Repaired));
        let snap = session.snapshot();
        assert_eq!(snap.state, SessionState::Playing);
        assert_eq!(snap.current_station, Some(StationId(7)));
        assert_eq!(gateway.joins(), 2);
        assert!(gateway.transport(GUILD).unwrap().is_attached());
        // Intent never changed, so no second status event.
        assert_eq!(h.bus.statuses(GUILD), vec![(true, Some(StationId(7)))]);
    }

    #[tokio::test]
    async fn healthy_session_needs_no_repair() {
        let (_h, gateway, session) = connected().await;
        assert!(matches!(session.repair().await, RepairOutcome::Healthy));
        assert_eq!(gateway.joins(), 1);
    }

    #[tokio::test]
    async fn failed_repair_waits_for_backoff() {
        let (h, gateway, session) = connected().await;
        gateway.transport(GUILD).unwrap().drop_connection();
        eventually("reconnecting", || session.state() == SessionState::Reconnecting).await;

        h.ctx.replace_gateway(None);
        assert!(matches!(session.repair().await, RepairOutcome::Failed(_)));
        assert!(matches!(session.repair().await, RepairOutcome::Deferred));

        h.ctx.replace_gateway(Some(gateway.clone()));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(matches!(session.repair().await, RepairOutcome::Repaired));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn join_times_out_when_transport_never_readies() {
        let (_h, gateway, session) = setup();
        gateway.hang_joins(true);

        let err = session.join(hub_channel(1), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::JoinTimeout);
        assert_eq!(session.state(), SessionState::Reconnecting);
        assert!(gateway.transport(GUILD).unwrap().is_shut_down());
    }

    #[tokio::test]
    async fn stalled_handshake_counts_against_ready_timeout() {
        let (h, gateway, session) = setup();
        gateway.stall_handshakes(true);

        let started = Instant::now();
        let err = session.join(hub_channel(1), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::JoinTimeout);
        let bound = Duration::from_millis(h.ctx.config.player.ready_timeout_ms + 150);
        assert!(started.elapsed() < bound);
        assert_eq!(session.state(), SessionState::Reconnecting);
        assert_eq!(gateway.leaves(), vec![GUILD]);
    }

    #[tokio::test]
    async fn repair_yields_to_select_in_flight() {
        let (h, gateway, session) = connected().await;
        h.resolver.set_open_delay(Duration::from_millis(200));

        let select = {
            let session = session.clone();
            tokio::spawn(async move { session.select_station(StationId(5)).await })
        };
        eventually("stream open", || h.resolver.opens() == 1).await;
        let first = gateway.transport(GUILD).unwrap();
        first.drop_connection();

        assert!(matches!(session.repair().await, RepairOutcome::Busy));
        assert_eq!(gateway.joins(), 1);
        assert!(!first.is_shut_down());

        select.await.unwrap().unwrap();
        eventually("reconnecting", || session.state() == SessionState::Reconnecting).await;

        h.resolver.set_open_delay(Duration::ZERO);
        assert!(matches!(session.repair().await, RepairOutcome::Repaired));
        assert_eq!(gateway.joins(), 2);
        let snap = session.snapshot();
        assert_eq!(snap.state, SessionState::Playing);
        assert_eq!(snap.current_station, Some(StationId(5)));
    }

    #[tokio::test]
    async fn playing_posts_now_playing_card() {
        let (_h, gateway, session) = connected().await;
        session.select_station(StationId(5)).await.unwrap();
        eventually("card", || gateway.announcements().len() == 1).await;

        gateway.transport(GUILD).unwrap().drop_connection();
        eventually("reconnecting", || session.state() == SessionState::Reconnecting).await;
        assert!(matches!(session.repair().await, RepairOutcome::Repaired));

        eventually("card after resume", || gateway.announcements().len() == 2).await;
        assert_eq!(
            gateway.announcements(),
            vec![(control_channel(1), StationId(5)), (control_channel(1), StationId(5))]
        );
    }

    #[tokio::test]
    async fn no_card_without_control_channel() {
        let (_h, gateway, session) = setup();
        session.join(hub_channel(1), None).await.unwrap();
        session.select_station(StationId(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(gateway.announcements().is_empty());
    }

    #[tokio::test]
    async fn missing_channel_is_reported() {
        let (_h, _gateway, session) = setup();
        let err = session.join(ChannelId(999), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChannelUnavailable);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn teardown_aborts_pending_join() {
        let (_h, gateway, session) = setup();
        gateway.hang_joins(true);

        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.join(hub_channel(1), None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.teardown().await;

        let err = tokio::time::timeout(Duration::from_millis(200), pending)
            .await
            .expect("join still pending")
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.select_station(StationId(5)).await.is_err());
    }

    #[tokio::test]
    async fn teardown_reports_stop_and_leaves_channel() {
        let (h, gateway, session) = connected().await;
        session.select_station(StationId(5)).await.unwrap();
        session.teardown().await;

        assert_eq!(gateway.leaves(), vec![GUILD]);
        assert_eq!(h.bus.statuses(GUILD).last(), Some(&(false, Some(StationId(5)))));
        // Restart resumes from storage, so teardown leaves it alone.
        let last = h.store.get_last_station(GUILD).await.unwrap().unwrap();
        assert!(last.was_playing);
    }

    #[tokio::test]
    async fn select_without_transport_resumes_after_reconnect() {
        let (h, gateway, session) = connected().await;
        gateway.transport(GUILD).unwrap().drop_connection();
        eventually("reconnecting", || session.state() == SessionState::Reconnecting).await;

        session.select_station(StationId(9)).await.unwrap();
        assert!(h.bus.statuses(GUILD).is_empty());

        assert!(matches!(session.repair().await, RepairOutcome::Repaired));
        assert_eq!(session.state(), SessionState::Playing);
        assert_eq!(h.bus.statuses(GUILD), vec![(true, Some(StationId(9)))]);
    }
}
