use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{
    ControlCommand,
    constants::{
        API_BASE, CALLBACK_CHANNEL_MESSAGE, CALLBACK_DEFERRED_UPDATE,
        INTERACTION_APPLICATION_COMMAND, INTERACTION_MESSAGE_COMPONENT,
    },
    types::snowflake,
};
use crate::common::types::{ChannelId, GuildId, StationId};

pub const STATION_SELECT_ID: &str = "radio_station_select";
const STATION_BUTTON_PREFIX: &str = "radio_select_";
const VOLUME_PREFIX: &str = "radio_volume_";

/// A control interaction with what is needed to acknowledge it.
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedInteraction {
    pub id: String,
    pub token: String,
    pub guild: GuildId,
    pub command: ControlCommand,
    pub callback_type: u8,
}

/// Maps a component custom id (plus select-menu values) onto a command.
pub fn parse_component(custom_id: &str, values: &[Value]) -> Option<ControlCommand> {
    match custom_id {
        STATION_SELECT_ID => values
            .first()
            .and_then(Value::as_str)
            .and_then(|v| v.parse::<StationId>().ok())
            .map(ControlCommand::SelectStation),
        "radio_pause" => Some(ControlCommand::Pause),
        "radio_resume" => Some(ControlCommand::Resume),
        "radio_stop" => Some(ControlCommand::Stop),
        id if id.starts_with(STATION_BUTTON_PREFIX) => id[STATION_BUTTON_PREFIX.len()..]
            .parse::<StationId>()
            .ok()
            .map(ControlCommand::SelectStation),
        id if id.starts_with(VOLUME_PREFIX) => id[VOLUME_PREFIX.len()..]
            .parse::<i64>()
            .ok()
            .map(ControlCommand::SetVolume),
        _ => None,
    }
}

/// Parses an INTERACTION_CREATE payload into a control command, if it is one
/// of ours.
pub fn parse_interaction(d: &Value) -> Option<ParsedInteraction> {
    let guild = GuildId(snowflake(&d["guild_id"])?);
    let id = d["id"].as_str()?.to_string();
    let token = d["token"].as_str()?.to_string();
    let data = &d["data"];

    let (command, callback_type) = match d["type"].as_u64()? {
        INTERACTION_MESSAGE_COMPONENT => {
            let values = data["values"].as_array().map(Vec::as_slice).unwrap_or(&[]);
            let command = parse_component(data["custom_id"].as_str()?, values)?;
            (command, CALLBACK_DEFERRED_UPDATE)
        }
        INTERACTION_APPLICATION_COMMAND if data["name"].as_str() == Some("setup") => {
            let option = |name: &str| {
                data["options"]
                    .as_array()?
                    .iter()
                    .find(|o| o["name"].as_str() == Some(name))
                    .and_then(|o| snowflake(&o["value"]))
                    .map(ChannelId)
            };
            let control = option("control").or_else(|| snowflake(&d["channel_id"]).map(ChannelId))?;
            let command = ControlCommand::Setup {
                voice: option("voice"),
                control,
            };
            (command, CALLBACK_CHANNEL_MESSAGE)
        }
        _ => return None,
    };

    Some(ParsedInteraction {
        id,
        token,
        guild,
        command,
        callback_type,
    })
}

/// Acknowledges an interaction so the client does not show a failure.
pub async fn acknowledge(http: &reqwest::Client, interaction: &ParsedInteraction) {
    let url = format!(
        "{}/interactions/{}/{}/callback",
        API_BASE, interaction.id, interaction.token
    );
    let body = if interaction.callback_type == CALLBACK_CHANNEL_MESSAGE {
        json!({
            "type": CALLBACK_CHANNEL_MESSAGE,
            "data": { "content": "Setting up the radio in this server.", "flags": 64 }
        })
    } else {
        json!({ "type": interaction.callback_type })
    };

    match http.post(&url).json(&body).send().await {
        Ok(resp) if resp.status().is_success() => {
            debug!("[{}] Acknowledged interaction {}", interaction.guild, interaction.id)
        }
        Ok(resp) => warn!(
            "[{}] Interaction ack rejected: HTTP {}",
            interaction.guild,
            resp.status()
        ),
        Err(e) => warn!("[{}] Interaction ack failed: {}", interaction.guild, e),
    }
}
