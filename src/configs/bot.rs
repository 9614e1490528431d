use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct BotConfig {
    /// Bot token; `DISCORD_TOKEN` takes precedence when set.
    pub token: String,
    /// "Listening to ..." presence shown once the gateway is ready.
    pub activity: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            activity: "24/7 Radio".to_string(),
        }
    }
}

/// Channel names looked up when a guild is set up automatically.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct VoiceConfig {
    pub hub_channel_name: String,
    pub control_channel_name: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            hub_channel_name: "Radio Hub".to_string(),
            control_channel_name: "radio-control".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "./data/radio.json".to_string(),
        }
    }
}
