use audiopus::{Application, Bitrate, Channels, SampleRate, coder::Encoder as OpusEncoder};

use crate::common::types::AnyResult;

/// Opus encoder for 48 kHz stereo voice frames.
pub struct Encoder {
    encoder: OpusEncoder,
}

impl Encoder {
    pub fn new() -> AnyResult<Self> {
        let mut encoder =
            OpusEncoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)?;
        encoder.set_bitrate(Bitrate::BitsPerSecond(128_000))?;
        Ok(Self { encoder })
    }

    pub fn encode(&mut self, input: &[i16], output: &mut [u8]) -> AnyResult<usize> {
        Ok(self.encoder.encode(input, output)?)
    }
}
