use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct HealthConfig {
    pub heartbeat_interval_ms: u64,
    pub deep_scan_interval_ms: u64,
    /// Heartbeat age after which the gateway is presumed dead.
    pub stale_threshold_ms: u64,
    pub restart_cooldown_ms: u64,
    /// Delay between a gateway ready and the automatic resume of playback.
    pub settle_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            deep_scan_interval_ms: 120_000,
            stale_threshold_ms: 120_000,
            restart_cooldown_ms: 5_000,
            settle_delay_ms: 3_000,
            max_reconnect_attempts: 5,
            backoff_base_ms: 1_000,
        }
    }
}
