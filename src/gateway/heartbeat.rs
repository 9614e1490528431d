use std::{
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{trace, warn};

use super::{shard::DiscordShard, types::GatewayPayload};
use crate::common::types::now_ms;

/// Heartbeats the gateway until the shard closes. The first beat is jittered
/// across one interval; a beat that finds the previous one unacknowledged
/// declares the connection zombied and closes it.
pub fn spawn_heartbeat(
    shard: Arc<DiscordShard>,
    tx: tokio::sync::mpsc::UnboundedSender<Message>,
    seq: Arc<AtomicI64>,
    interval_ms: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let cancel = shard.cancel_token();
        let jitter = (interval_ms as f64 * rand::random::<f64>()) as u64;

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_millis(jitter)) => {}
        }

        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        let mut last_sent = 0u64;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            if last_sent > 0 && shard.last_ack() < last_sent {
                warn!("Gateway heartbeat was not acknowledged, closing zombied connection");
                shard.mark_zombied();
                break;
            }

            let seq = seq.load(Ordering::Relaxed);
            let payload = GatewayPayload::new(1, if seq < 0 { serde_json::Value::Null } else { seq.into() });
            let Ok(json) = serde_json::to_string(&payload) else {
                continue;
            };
            last_sent = now_ms();
            trace!("Sending gateway heartbeat (seq {})", seq);
            if tx.send(Message::Text(json.into())).is_err() {
                break;
            }
        }
    })
}
