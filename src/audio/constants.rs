//! Audio format constants shared by the decoder, the pipeline and the
//! voice speak loop.

/// Output sample rate sent to the voice backend (Hz).
pub const TARGET_SAMPLE_RATE: u32 = 48_000;

/// Stereo channel count used for every outbound frame.
pub const CHANNELS: usize = 2;

/// Samples per channel in one 20 ms frame at 48 kHz.
pub const FRAME_SAMPLES_PER_CHANNEL: usize = 960;

/// Interleaved samples in one 20 ms stereo frame.
pub const FRAME_SIZE_SAMPLES: usize = FRAME_SAMPLES_PER_CHANNEL * CHANNELS;

/// Decoded PCM buffered between the decoder thread and the speak loop,
/// roughly 170 ms of stereo audio.
pub const PCM_CHANNEL_CAPACITY: usize = 4096 * 4;

/// Chunks of raw network bytes buffered ahead of the decoder.
pub const BYTE_CHANNEL_CAPACITY: usize = 64;

/// Maximum depth of nested playlists followed while resolving a station.
pub const MAX_PLAYLIST_DEPTH: usize = 3;

/// Playlist bodies larger than this are not parsed.
pub const MAX_PLAYLIST_BYTES: usize = 64 * 1024;
