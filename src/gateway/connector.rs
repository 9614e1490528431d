use std::{
    sync::{Arc, atomic::AtomicI64},
    time::Duration,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use super::{
    Gateway, GatewayConnector, GatewayEvent, GatewayEvents,
    constants::{GATEWAY_INTENTS, GATEWAY_URL, HELLO_TIMEOUT_MS, WRITE_TASK_SHUTDOWN_MS},
    heartbeat::spawn_heartbeat,
    messages::ChannelMessenger,
    shard::DiscordShard,
    types::GatewayPayload,
};
use crate::{
    common::{
        errors::{RadioError, RadioResult},
        http::HttpClient,
    },
    configs::BotConfig,
};

/// Opens fresh gateway v10 sessions with the bot token.
pub struct DiscordConnector {
    token: String,
    activity: String,
    http: reqwest::Client,
}

impl DiscordConnector {
    pub fn new(bot: &BotConfig) -> RadioResult<Self> {
        let http = HttpClient::api()
            .map_err(|e| RadioError::Gateway(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            token: bot.token.clone(),
            activity: bot.activity.clone(),
            http,
        })
    }

    fn identify(&self) -> GatewayPayload {
        GatewayPayload::new(
            2,
            json!({
                "token": self.token,
                "intents": GATEWAY_INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "valkyrion",
                    "device": "valkyrion",
                },
            }),
        )
    }
}

fn gateway_err(e: impl std::fmt::Display) -> RadioError {
    RadioError::Gateway(e.to_string())
}

#[async_trait]
impl GatewayConnector for DiscordConnector {
    async fn connect(&self) -> RadioResult<(Arc<dyn Gateway>, GatewayEvents)> {
        debug!("Connecting to gateway {}", GATEWAY_URL);
        let (ws_stream, _) = tokio_tungstenite::connect_async(GATEWAY_URL)
            .await
            .map_err(gateway_err)?;
        let (mut write, mut read) = ws_stream.split();

        let hello = tokio::time::timeout(Duration::from_millis(HELLO_TIMEOUT_MS), async {
            while let Some(msg) = read.next().await {
                if let Message::Text(text) = msg.map_err(gateway_err)? {
                    let payload: GatewayPayload =
                        serde_json::from_str(text.as_str()).map_err(gateway_err)?;
                    if payload.op == 10 {
                        return Ok(payload);
                    }
                }
            }
            Err(RadioError::Gateway("gateway closed before hello".into()))
        })
        .await
        .map_err(|_| RadioError::Gateway("timed out waiting for hello".into()))??;

        let interval = hello.d["heartbeat_interval"].as_u64().unwrap_or(41_250);
        debug!("Gateway heartbeat interval {}ms", interval);

        let identify = serde_json::to_string(&self.identify()).map_err(gateway_err)?;
        write
            .send(Message::Text(identify.into()))
            .await
            .map_err(gateway_err)?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let messenger = ChannelMessenger::new(self.http.clone(), &self.token);
        let shard = Arc::new(DiscordShard::new(
            self.http.clone(),
            messenger,
            self.activity.clone(),
            tx.clone(),
            interval,
        ));
        let cancel = shard.cancel_token();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = rx.recv() => {
                        let Some(msg) = msg else { break };
                        let closing = matches!(msg, Message::Close(_));
                        if let Err(e) = write.send(msg).await {
                            warn!("Gateway write error: {}", e);
                            break;
                        }
                        if closing {
                            break;
                        }
                    }
                }
            }
            // Flush a queued close frame if cancellation raced it.
            while let Ok(msg) = rx.try_recv() {
                if matches!(msg, Message::Close(_)) {
                    let _ = tokio::time::timeout(
                        Duration::from_millis(WRITE_TASK_SHUTDOWN_MS),
                        write.send(msg),
                    )
                    .await;
                    break;
                }
            }
        });

        let seq = Arc::new(AtomicI64::new(-1));
        let (events_tx, events_rx) = mpsc::unbounded_channel::<GatewayEvent>();
        spawn_heartbeat(shard.clone(), tx, seq.clone(), interval);
        tokio::spawn(shard.clone().run_reader(read, seq, events_tx));

        info!("Gateway connection established");
        Ok((shard as Arc<dyn Gateway>, events_rx))
    }
}
