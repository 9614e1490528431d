use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PlayerConfig {
    pub default_volume: u8,
    /// Upper bound for a voice transport to report ready after a join.
    pub ready_timeout_ms: u64,
    /// Pause between stopping one stream and starting the next.
    pub swap_grace_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_volume: 75,
            ready_timeout_ms: 30_000,
            swap_grace_ms: 100,
        }
    }
}
