use std::time::Duration;

use dashmap::DashMap;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::constants::{API_BASE, EMBED_COLOR, MAX_RATE_LIMIT_WAIT_MS};
use crate::{
    common::types::{ChannelId, GuildId},
    protocol::Station,
};

/// Posts the "now playing" card into control channels, replacing the
/// previous card of the same channel.
pub struct ChannelMessenger {
    http: reqwest::Client,
    authorization: String,
    now_playing: DashMap<ChannelId, String>,
}

impl ChannelMessenger {
    pub fn new(http: reqwest::Client, token: &str) -> Self {
        Self {
            http,
            authorization: format!("Bot {}", token),
            now_playing: DashMap::new(),
        }
    }

    /// Best effort: failures and long rate limits are logged and dropped.
    pub async fn announce_now_playing(&self, guild: GuildId, channel: ChannelId, station: &Station) {
        if let Some((_, previous)) = self.now_playing.remove(&channel) {
            let url = format!("{}/channels/{}/messages/{}", API_BASE, channel, previous);
            self.send(guild, || self.http.delete(&url)).await;
        }

        let url = format!("{}/channels/{}/messages", API_BASE, channel);
        let body = json!({ "embeds": [now_playing_embed(station)] });
        let Some(resp) = self.send(guild, || self.http.post(&url).json(&body)).await else {
            return;
        };

        match resp.json::<Value>().await {
            Ok(message) => {
                if let Some(id) = message["id"].as_str() {
                    self.now_playing.insert(channel, id.to_string());
                }
                debug!("[{}] Now playing card posted for station {}", guild, station.id);
            }
            Err(e) => warn!("[{}] Now playing response unreadable: {}", guild, e),
        }
    }

    /// Sends a request, waiting out one short rate limit.
    async fn send(&self, guild: GuildId, request: impl Fn() -> RequestBuilder) -> Option<Response> {
        for _ in 0..2 {
            let resp = match request()
                .header("Authorization", &self.authorization)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    warn!("[{}] Channel message request failed: {}", guild, e);
                    return None;
                }
            };

            if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                let wait_ms = retry_after_ms(&resp.json::<Value>().await.unwrap_or_default());
                if wait_ms > MAX_RATE_LIMIT_WAIT_MS {
                    warn!("[{}] Rate limited for {}ms, skipping channel message", guild, wait_ms);
                    return None;
                }
                debug!("[{}] Rate limited, retrying in {}ms", guild, wait_ms);
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                continue;
            }
            if !resp.status().is_success() {
                warn!("[{}] Channel message rejected: HTTP {}", guild, resp.status());
                return None;
            }
            return Some(resp);
        }
        warn!("[{}] Still rate limited, skipping channel message", guild);
        None
    }
}

/// `retry_after` of a 429 body, in milliseconds. Defaults to one second.
pub fn retry_after_ms(body: &Value) -> u64 {
    body["retry_after"]
        .as_f64()
        .map(|secs| (secs.max(0.0) * 1000.0).ceil() as u64)
        .unwrap_or(1_000)
}

pub fn now_playing_embed(station: &Station) -> Value {
    let field = |name: &str, value: String| json!({ "name": name, "value": value, "inline": true });
    let mut embed = json!({
        "color": EMBED_COLOR,
        "title": "🎵 Now Playing",
        "description": format!("**{}**", station.name),
        "fields": [
            field("🎼 Genre", station.genre.clone().unwrap_or_else(|| "Unknown".into())),
            field("📡 Quality", station.quality.clone().unwrap_or_else(|| "Unknown".into())),
            field("👥 Listeners", station.listeners.to_string()),
        ],
    });
    if let Some(artwork) = &station.artwork {
        embed["thumbnail"] = json!({ "url": artwork });
    }
    embed
}

/// Op 3 payload: online, "Listening to `activity`".
pub fn presence_update(activity: &str) -> Value {
    json!({
        "since": null,
        "activities": [{ "name": activity, "type": 2 }],
        "status": "online",
        "afk": false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_lists_station_details() {
        let mut station = Station::new(7, "Jazz FM", "http://radio.test/jazz.pls");
        station.genre = Some("Jazz".into());
        station.listeners = 12;

        let embed = now_playing_embed(&station);
        assert_eq!(embed["description"], "**Jazz FM**");
        assert_eq!(embed["fields"][0]["value"], "Jazz");
        assert_eq!(embed["fields"][1]["value"], "Unknown");
        assert_eq!(embed["fields"][2]["value"], "12");
        assert!(embed.get("thumbnail").is_none());

        station.artwork = Some("http://radio.test/jazz.png".into());
        assert_eq!(now_playing_embed(&station)["thumbnail"]["url"], "http://radio.test/jazz.png");
    }

    #[test]
    fn retry_after_is_read_in_seconds() {
        assert_eq!(retry_after_ms(&json!({ "retry_after": 0.25 })), 250);
        assert_eq!(retry_after_ms(&json!({ "message": "You are being rate limited." })), 1_000);
    }

    #[test]
    fn presence_is_listening_activity() {
        let presence = presence_update("24/7 Radio");
        assert_eq!(presence["activities"][0]["type"], 2);
        assert_eq!(presence["activities"][0]["name"], "24/7 Radio");
        assert_eq!(presence["status"], "online");
    }
}
