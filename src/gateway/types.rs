use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    ChannelInfo, ChannelKind, GuildInfo,
    constants::{CHANNEL_TYPE_GUILD_STAGE_VOICE, CHANNEL_TYPE_GUILD_TEXT, CHANNEL_TYPE_GUILD_VOICE},
};
use crate::common::types::{ChannelId, GuildId};

#[derive(Serialize, Deserialize, Debug)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayPayload {
    pub fn new(op: u8, d: Value) -> Self {
        Self {
            op,
            d,
            s: None,
            t: None,
        }
    }
}

/// Close codes after which reconnecting with the same settings is pointless.
///
/// - `4004`: authentication failed
/// - `4010..=4014`: invalid shard, sharding required, bad API version,
///   invalid or disallowed intents
pub fn is_fatal_close(code: u16) -> bool {
    matches!(code, 4004 | 4010..=4014)
}

pub fn snowflake(v: &Value) -> Option<u64> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

pub fn parse_channel(d: &Value) -> Option<ChannelInfo> {
    let kind = match d["type"].as_u64()? {
        CHANNEL_TYPE_GUILD_VOICE | CHANNEL_TYPE_GUILD_STAGE_VOICE => ChannelKind::Voice,
        CHANNEL_TYPE_GUILD_TEXT => ChannelKind::Text,
        _ => ChannelKind::Other,
    };
    Some(ChannelInfo {
        id: ChannelId(snowflake(&d["id"])?),
        name: d["name"].as_str().unwrap_or_default().to_string(),
        kind,
    })
}

/// Parses a GUILD_CREATE payload; `None` for unavailable guilds.
pub fn parse_guild(d: &Value) -> Option<GuildInfo> {
    if d["unavailable"].as_bool() == Some(true) {
        return None;
    }

    let mut positioned: Vec<(i64, ChannelInfo)> = d["channels"]
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|raw| {
                    let position = raw["position"].as_i64().unwrap_or(i64::MAX);
                    parse_channel(raw).map(|c| (position, c))
                })
                .collect()
        })
        .unwrap_or_default();
    positioned.sort_by_key(|(position, c)| (*position, c.id));
    let channels = positioned.into_iter().map(|(_, c)| c).collect();

    Some(GuildInfo {
        id: GuildId(snowflake(&d["id"])?),
        name: d["name"].as_str().unwrap_or_default().to_string(),
        member_count: d["member_count"].as_u64().unwrap_or(0),
        channels,
    })
}
