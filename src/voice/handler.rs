use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicI64, AtomicU64, Ordering},
    },
};

use serde_json::Value;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, trace, warn};

use super::{
    TransportState, UdpBackend,
    connection::{SocketOutcome, VoiceSocket},
    constants::{DEFAULT_VOICE_MODE, SUPPORTED_MODES},
    heartbeat::spawn_heartbeat,
    speaker::{discover_ip, speak_loop},
    types::VoiceGatewayMessage,
};
use crate::common::types::now_ms;

/// Per-websocket protocol state of a voice connection.
pub struct SocketState<'a> {
    socket: &'a VoiceSocket,
    tx: tokio::sync::mpsc::UnboundedSender<Message>,
    seq_ack: Arc<AtomicI64>,
    ssrc: u32,
    udp_addr: Option<SocketAddr>,
    udp_socket: Option<Arc<tokio::net::UdpSocket>>,
    selected_mode: String,
    heartbeat_handle: Option<tokio::task::JoinHandle<()>>,
    last_heartbeat: Arc<AtomicU64>,
}

impl<'a> SocketState<'a> {
    pub fn new(
        socket: &'a VoiceSocket,
        tx: tokio::sync::mpsc::UnboundedSender<Message>,
        seq_ack: Arc<AtomicI64>,
    ) -> Self {
        Self {
            socket,
            tx,
            seq_ack,
            ssrc: 0,
            udp_addr: None,
            udp_socket: None,
            selected_mode: DEFAULT_VOICE_MODE.to_string(),
            heartbeat_handle: None,
            last_heartbeat: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn handle_text(&mut self, text: &str) -> Option<SocketOutcome> {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    "[{}] Failed to parse voice gateway message: {}",
                    self.socket.guild_id(),
                    e
                );
                return None;
            }
        };

        if let Some(seq) = value["seq"].as_i64() {
            self.seq_ack.store(seq, Ordering::Relaxed);
        }

        let msg: VoiceGatewayMessage = match serde_json::from_value(value) {
            Ok(m) => m,
            Err(e) => {
                warn!("[{}] Malformed voice payload: {}", self.socket.guild_id(), e);
                return None;
            }
        };

        match msg.op {
            8 => self.handle_hello(&msg.d),
            2 => self.handle_ready(&msg.d).await,
            4 => self.handle_session_description(&msg.d),
            6 => self.handle_heartbeat_ack(),
            _ => {
                debug!("[{}] Voice op {} ignored", self.socket.guild_id(), msg.op);
                None
            }
        }
    }

    fn handle_hello(&mut self, d: &Value) -> Option<SocketOutcome> {
        let interval = d["heartbeat_interval"].as_f64().unwrap_or(30_000.0) as u64;
        if let Some(h) = self.heartbeat_handle.take() {
            h.abort();
        }

        debug!(
            "[{}] Voice heartbeat interval {}ms",
            self.socket.guild_id(),
            interval
        );
        self.heartbeat_handle = Some(spawn_heartbeat(
            self.tx.clone(),
            self.seq_ack.clone(),
            self.last_heartbeat.clone(),
            interval,
        ));
        None
    }

    async fn handle_ready(&mut self, d: &Value) -> Option<SocketOutcome> {
        self.ssrc = d["ssrc"].as_u64().unwrap_or(0) as u32;
        let ip = d["ip"].as_str().unwrap_or("");
        let port = d["port"].as_u64().unwrap_or(0) as u16;

        let Ok(addr) = format!("{}:{}", ip, port).parse::<SocketAddr>() else {
            return Some(SocketOutcome::Failed(format!(
                "invalid voice server address {}:{}",
                ip, port
            )));
        };
        self.udp_addr = Some(addr);

        if let Some(modes) = d["modes"].as_array() {
            if let Some(found) = SUPPORTED_MODES
                .iter()
                .find(|&&p| modes.iter().any(|m| m.as_str() == Some(p)))
            {
                self.selected_mode = found.to_string();
            }
        }

        debug!(
            "[{}] Voice ready: {}:{} ssrc={} mode={}",
            self.socket.guild_id(),
            ip,
            port,
            self.ssrc,
            self.selected_mode
        );

        let udp = match tokio::net::UdpSocket::bind("0.0.0.0:0").await {
            Ok(socket) => Arc::new(socket),
            Err(e) => return Some(SocketOutcome::Failed(format!("UDP bind failed: {}", e))),
        };

        match discover_ip(&udp, addr, self.ssrc).await {
            Ok((my_ip, my_port)) => {
                self.udp_socket = Some(udp);
                self.send_json(
                    1,
                    serde_json::json!({
                        "protocol": "udp",
                        "data": { "address": my_ip, "port": my_port, "mode": self.selected_mode }
                    }),
                );
                None
            }
            Err(e) => {
                error!("[{}] IP discovery failed: {}", self.socket.guild_id(), e);
                Some(SocketOutcome::Failed(format!("IP discovery failed: {}", e)))
            }
        }
    }

    fn handle_session_description(&mut self, d: &Value) -> Option<SocketOutcome> {
        if let Some(m) = d["mode"].as_str() {
            self.selected_mode = m.to_string();
        }

        let Some(key) = parse_secret_key(&d["secret_key"]) else {
            return Some(SocketOutcome::Failed(
                "missing or invalid secret_key in session description".into(),
            ));
        };

        let (Some(addr), Some(udp_socket)) = (self.udp_addr, self.udp_socket.clone()) else {
            return Some(SocketOutcome::Failed(
                "session description before ready".into(),
            ));
        };

        debug!(
            "[{}] Starting speak loop with mode {}",
            self.socket.guild_id(),
            self.selected_mode
        );

        let udp = UdpBackend::new(udp_socket, addr, self.ssrc, key, &self.selected_mode);
        let output = self.socket.output.clone();
        let cancel = self.socket.cancel.clone();
        let guild_id = self.socket.guild_id();
        tokio::spawn(async move {
            if let Err(e) = speak_loop(output, udp, cancel.clone()).await {
                error!("[{}] Speak loop failed: {}", guild_id, e);
                cancel.cancel();
            }
        });

        self.send_json(
            5,
            serde_json::json!({ "speaking": 1, "delay": 0, "ssrc": self.ssrc }),
        );
        self.socket.set_state(TransportState::Ready);
        None
    }

    fn handle_heartbeat_ack(&self) -> Option<SocketOutcome> {
        let sent = self.last_heartbeat.load(Ordering::Relaxed);
        if sent > 0 {
            trace!(
                "[{}] Voice heartbeat ack after {}ms",
                self.socket.guild_id(),
                now_ms().saturating_sub(sent)
            );
        }
        None
    }

    fn send_json(&self, op: u8, d: Value) {
        let msg = VoiceGatewayMessage { op, d };
        if let Ok(json) = serde_json::to_string(&msg) {
            let _ = self.tx.send(Message::Text(json.into()));
        }
    }
}

impl Drop for SocketState<'_> {
    fn drop(&mut self) {
        if let Some(h) = self.heartbeat_handle.take() {
            h.abort();
        }
    }
}

fn parse_secret_key(value: &Value) -> Option<[u8; 32]> {
    let bytes = value.as_array()?;
    if bytes.len() < 32 {
        return None;
    }
    let mut key = [0u8; 32];
    for (slot, v) in key.iter_mut().zip(bytes) {
        *slot = u8::try_from(v.as_u64()?).ok()?;
    }
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_key_requires_32_bytes() {
        let key: Vec<u8> = (0..32).collect();
        let parsed = parse_secret_key(&serde_json::json!(key)).unwrap();
        assert_eq!(parsed[31], 31);
        assert!(parse_secret_key(&serde_json::json!([1, 2, 3])).is_none());
        assert!(parse_secret_key(&serde_json::json!("nope")).is_none());
    }
}
