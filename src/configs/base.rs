use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{common::types::AnyResult, configs::*};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load() -> AnyResult<Self> {
        let config_path = if Path::new("config.toml").exists() {
            "config.toml"
        } else if Path::new("config.default.toml").exists() {
            "config.default.toml"
        } else {
            return Err("config.toml or config.default.toml not found".into());
        };

        crate::log_println!("Loading configuration from: {}", config_path);

        let config_str = std::fs::read_to_string(config_path)?;
        if config_str.trim().is_empty() {
            return Err(format!("{} is empty", config_path).into());
        }

        let mut config = Self::parse(&config_str)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> AnyResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub(crate) fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("DISCORD_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.bot.token = token.trim().to_string();
        }
    }

    fn validate(&self) -> AnyResult<()> {
        if self.bot.token.is_empty() {
            return Err("bot.token is empty and DISCORD_TOKEN is not set".into());
        }
        if self.player.default_volume > 100 {
            return Err(format!(
                "player.default_volume must be within 0..=100, got {}",
                self.player.default_volume
            )
            .into());
        }
        if self.health.max_reconnect_attempts == 0 {
            return Err("health.max_reconnect_attempts must be at least 1".into());
        }
        Ok(())
    }
}
