use std::sync::{Arc, atomic::AtomicI64};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    TransportState, VoiceTransport,
    constants::{VOICE_GATEWAY_VERSION, WRITE_TASK_SHUTDOWN_MS},
    handler::SocketState,
    speaker::OutputSlot,
    types::{CloseKind, VoiceGatewayMessage, classify_close, map_boxed_err},
};
use crate::{
    audio::PipelineOutput,
    common::types::{AnyResult, ChannelId, GuildId, UserId},
};

/// Credentials collected from the gateway's voice state/server handshake.
#[derive(Debug, Clone)]
pub struct VoiceServerInfo {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub session_id: String,
    pub token: String,
    pub endpoint: String,
}

/// How a single voice websocket ended.
pub enum SocketOutcome {
    Closed { code: u16, kind: CloseKind },
    Failed(String),
    Shutdown,
}

/// Runner for one voice websocket; lives inside the spawned task.
pub struct VoiceSocket {
    info: VoiceServerInfo,
    state_tx: watch::Sender<TransportState>,
    pub(super) output: OutputSlot,
    pub(super) cancel: CancellationToken,
}

impl VoiceSocket {
    pub fn guild_id(&self) -> GuildId {
        self.info.guild_id
    }

    pub(super) fn set_state(&self, state: TransportState) {
        self.state_tx.send_replace(state);
    }

    async fn run(self) {
        match self.connect().await {
            Ok(SocketOutcome::Shutdown) => {
                debug!("[{}] Voice connection shut down", self.info.guild_id)
            }
            Ok(SocketOutcome::Closed { code, kind }) => info!(
                "[{}] Voice connection closed: code={} ({:?})",
                self.info.guild_id, code, kind
            ),
            Ok(SocketOutcome::Failed(reason)) => {
                warn!("[{}] Voice connection failed: {}", self.info.guild_id, reason)
            }
            Err(e) => warn!("[{}] Voice connection error: {}", self.info.guild_id, e),
        }

        self.cancel.cancel();
        self.set_state(TransportState::Disconnected);
    }

    async fn connect(&self) -> AnyResult<SocketOutcome> {
        let host = self
            .info
            .endpoint
            .trim_start_matches("wss://")
            .trim_end_matches('/');
        let url = format!("wss://{}/?v={}", host, VOICE_GATEWAY_VERSION);
        debug!("[{}] Connecting to voice gateway {}", self.info.guild_id, url);

        let (ws_stream, _) = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(SocketOutcome::Shutdown),
            res = tokio_tungstenite::connect_async(&url) => res.map_err(map_boxed_err)?,
        };
        let (mut write, mut read) = ws_stream.split();

        let identify = serde_json::to_string(&self.identify_message()).map_err(map_boxed_err)?;
        write
            .send(Message::Text(identify.into()))
            .await
            .map_err(map_boxed_err)?;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Message>();
        let cancel = self.cancel.clone();
        let guild_id = self.info.guild_id;
        let write_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    msg = rx.recv() => {
                        let Some(msg) = msg else { break };
                        if let Err(e) = write.send(msg).await {
                            warn!("[{}] Voice WS write error: {}", guild_id, e);
                            break;
                        }
                    }
                }
            }
        });

        let seq_ack = Arc::new(AtomicI64::new(-1));
        let mut state = SocketState::new(self, tx.clone(), seq_ack);

        let outcome = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break SocketOutcome::Shutdown,
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => break SocketOutcome::Failed(format!("read error: {}", e)),
                        None => break SocketOutcome::Failed("stream ended".into()),
                    };

                    match msg {
                        Message::Text(text) => {
                            if let Some(outcome) = state.handle_text(text.as_str()).await {
                                break outcome;
                            }
                        }
                        Message::Close(frame) => {
                            let code = frame.map(|cf| u16::from(cf.code)).unwrap_or(1000);
                            break SocketOutcome::Closed { code, kind: classify_close(code) };
                        }
                        _ => {}
                    }
                }
            }
        };

        drop(state);
        self.cancel.cancel();
        drop(tx);
        let _ = tokio::time::timeout(
            std::time::Duration::from_millis(WRITE_TASK_SHUTDOWN_MS),
            write_task,
        )
        .await;

        Ok(outcome)
    }

    fn identify_message(&self) -> VoiceGatewayMessage {
        VoiceGatewayMessage {
            op: 0,
            d: serde_json::json!({
                "server_id": self.info.guild_id,
                "user_id": self.info.user_id,
                "session_id": self.info.session_id,
                "token": self.info.token,
            }),
        }
    }
}

/// Handle to a live voice connection, owned by a guild session.
pub struct VoiceConnection {
    guild_id: GuildId,
    state_rx: watch::Receiver<TransportState>,
    output: OutputSlot,
    cancel: CancellationToken,
}

impl VoiceConnection {
    /// Opens the voice websocket in the background; progress is observed
    /// through [`VoiceTransport::watch`].
    pub fn connect(info: VoiceServerInfo) -> Self {
        let (state_tx, state_rx) = watch::channel(TransportState::Connecting);
        let output: OutputSlot = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();
        let guild_id = info.guild_id;

        let socket = VoiceSocket {
            info,
            state_tx,
            output: output.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(socket.run());

        Self {
            guild_id,
            state_rx,
            output,
            cancel,
        }
    }
}

impl VoiceTransport for VoiceConnection {
    fn watch(&self) -> watch::Receiver<TransportState> {
        self.state_rx.clone()
    }

    fn attach(&self, output: PipelineOutput) {
        *self.output.lock() = Some(output);
    }

    fn detach(&self) {
        self.output.lock().take();
    }

    fn shutdown(&self) {
        debug!("[{}] Shutting down voice connection", self.guild_id);
        self.output.lock().take();
        self.cancel.cancel();
    }
}

impl Drop for VoiceConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
