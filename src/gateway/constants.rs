pub const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

pub const API_BASE: &str = "https://discord.com/api/v10";

/// GUILDS | GUILD_VOICE_STATES
pub const GATEWAY_INTENTS: u64 = (1 << 0) | (1 << 7);

/// How long to wait for the guilds announced in READY before reporting
/// ready anyway.
pub const READY_GUILD_WAIT_MS: u64 = 5_000;

/// Time allowed for the voice state + voice server updates after a join.
pub const VOICE_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Longest 429 `retry_after` a best-effort channel message waits out.
pub const MAX_RATE_LIMIT_WAIT_MS: u64 = 5_000;

pub const EMBED_COLOR: u32 = 0x5865F2;

pub const HELLO_TIMEOUT_MS: u64 = 10_000;

pub const WRITE_TASK_SHUTDOWN_MS: u64 = 500;

pub const CHANNEL_TYPE_GUILD_TEXT: u64 = 0;
pub const CHANNEL_TYPE_GUILD_VOICE: u64 = 2;
pub const CHANNEL_TYPE_GUILD_STAGE_VOICE: u64 = 13;

pub const INTERACTION_APPLICATION_COMMAND: u64 = 2;
pub const INTERACTION_MESSAGE_COMPONENT: u64 = 3;

pub const CALLBACK_CHANNEL_MESSAGE: u8 = 4;
pub const CALLBACK_DEFERRED_UPDATE: u8 = 6;
