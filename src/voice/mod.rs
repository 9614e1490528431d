use tokio::sync::watch;

use crate::audio::PipelineOutput;

pub mod connection;
pub mod constants;
pub mod handler;
pub mod heartbeat;
pub mod speaker;
pub mod types;
pub mod udp;

pub use connection::{VoiceConnection, VoiceServerInfo};
pub use udp::UdpBackend;

/// Connection state reported by a voice transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connecting,
    Ready,
    Disconnected,
}

/// One live connection to a guild's voice backend.
///
/// A transport never reconnects by itself: once it reports `Disconnected` it
/// is finished and its owner replaces it.
pub trait VoiceTransport: Send + Sync {
    fn state(&self) -> TransportState {
        *self.watch().borrow()
    }

    fn watch(&self) -> watch::Receiver<TransportState>;

    /// Routes frames from `output` to the backend, replacing any previous
    /// source.
    fn attach(&self, output: PipelineOutput);

    fn detach(&self);

    fn shutdown(&self);
}
