use std::sync::{
    Arc,
    atomic::{AtomicI64, AtomicU64, Ordering},
};

use tokio_tungstenite::tungstenite::protocol::Message;

use super::types::VoiceGatewayMessage;
use crate::common::types::now_ms;

pub fn spawn_heartbeat(
    tx_hb: tokio::sync::mpsc::UnboundedSender<Message>,
    seq_ack: Arc<AtomicI64>,
    last_heartbeat: Arc<AtomicU64>,
    interval_ms: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(interval_ms));
        loop {
            interval.tick().await;
            let sent_at = now_ms();
            last_heartbeat.store(sent_at, Ordering::Relaxed);

            let hb = VoiceGatewayMessage {
                op: 3,
                d: serde_json::json!({
                    "t": sent_at,
                    "seq_ack": seq_ack.load(Ordering::Relaxed),
                }),
            };
            if let Ok(json) = serde_json::to_string(&hb) {
                if tx_hb.send(Message::Text(json.into())).is_err() {
                    break;
                }
            }
        }
    })
}
