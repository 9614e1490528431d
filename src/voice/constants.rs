/// Voice gateway protocol version in the websocket URL.
pub const VOICE_GATEWAY_VERSION: u8 = 8;

/// Encryption modes we can speak, most preferred first.
pub const SUPPORTED_MODES: [&str; 2] = ["aead_aes256_gcm_rtpsize", "xsalsa20_poly1305"];

pub const DEFAULT_VOICE_MODE: &str = "xsalsa20_poly1305";

pub const DISCOVERY_PACKET_SIZE: usize = 74;

pub const IP_DISCOVERY_TIMEOUT_SECS: u64 = 2;

pub const FRAME_DURATION_MS: u64 = 20;

/// Upper bound for one encoded Opus packet.
pub const MAX_OPUS_FRAME_SIZE: usize = 4_000;

/// Silent frames sent after audio stops, so the decoder on the other end
/// does not interpolate.
pub const MAX_SILENCE_FRAMES: u32 = 5;

pub const RTP_VERSION_BYTE: u8 = 0x80;

pub const RTP_OPUS_PAYLOAD_TYPE: u8 = 0x78;

/// RTP timestamp advance per 20 ms frame at 48 kHz.
pub const RTP_TIMESTAMP_STEP: u32 = 960;

pub const UDP_PACKET_BUF_CAPACITY: usize = 1_460;

pub const WRITE_TASK_SHUTDOWN_MS: u64 = 500;
