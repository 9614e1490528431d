use tokio_util::sync::CancellationToken;

use crate::{audio::AudioPipeline, voice::VoiceTransport};

/// A voice transport and the pipeline feeding it. The two are built together
/// and torn down together; a reconnect replaces the whole link.
pub struct VoiceLink {
    pub transport: Box<dyn VoiceTransport>,
    pub pipeline: AudioPipeline,
    pub generation: u64,
    /// Stops the watcher tasks bound to this link.
    pub watchers: CancellationToken,
}

impl VoiceLink {
    pub fn new(
        transport: Box<dyn VoiceTransport>,
        volume: u8,
        generation: u64,
        parent: &CancellationToken,
    ) -> Self {
        let pipeline = AudioPipeline::new(volume);
        transport.attach(pipeline.output());
        Self {
            transport,
            pipeline,
            generation,
            watchers: parent.child_token(),
        }
    }
}

impl Drop for VoiceLink {
    fn drop(&mut self) {
        self.watchers.cancel();
        self.pipeline.stop();
        self.transport.detach();
        self.transport.shutdown();
    }
}
