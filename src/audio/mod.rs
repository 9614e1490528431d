pub mod constants;
pub mod decoder;
pub mod encoder;
pub mod pipeline;
pub mod reader;
pub mod resampler;
pub mod resolver;

pub use encoder::Encoder;
pub use pipeline::{AudioPipeline, PipelineOutput, PlaybackState};
pub use resolver::{HttpResolver, StreamResolver, StreamSource};
