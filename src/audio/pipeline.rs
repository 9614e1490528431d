use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{constants::PCM_CHANNEL_CAPACITY, decoder::start_decoding, resolver::StreamSource};

/// Playback signal published by a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    /// Stream opened, no audio consumed yet.
    Buffering,
    Playing,
    Paused,
    Errored(String),
}

struct ActiveJob {
    id: u64,
    rx: flume::Receiver<i16>,
    stop: Arc<AtomicBool>,
    cancel: CancellationToken,
    started: bool,
}

impl ActiveJob {
    fn halt(&self) {
        self.stop.store(true, Ordering::Release);
        self.cancel.cancel();
    }
}

struct Shared {
    state: watch::Sender<PlaybackState>,
    job_seq: AtomicU64,
    current: Mutex<Option<ActiveJob>>,
    paused: AtomicBool,
    /// f32 bits of the linear gain.
    volume: AtomicU32,
}

impl Shared {
    fn set_state(&self, next: PlaybackState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }

    fn gain(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }
}

/// Per-guild audio pipeline: decodes one stream at a time into PCM that the
/// voice transport pulls in 20 ms frames.
pub struct AudioPipeline {
    shared: Arc<Shared>,
}

impl AudioPipeline {
    pub fn new(volume: u8) -> Self {
        let (state, _) = watch::channel(PlaybackState::Idle);
        Self {
            shared: Arc::new(Shared {
                state,
                job_seq: AtomicU64::new(0),
                current: Mutex::new(None),
                paused: AtomicBool::new(false),
                volume: AtomicU32::new(volume_to_gain(volume).to_bits()),
            }),
        }
    }

    /// Replaces whatever is playing with `source`.
    pub fn start(&self, source: StreamSource) {
        let id = self.shared.job_seq.fetch_add(1, Ordering::AcqRel) + 1;
        let (tx, rx) = flume::bounded::<i16>(PCM_CHANNEL_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));
        let cancel = source.cancel.clone();

        {
            let mut current = self.shared.current.lock();
            if let Some(old) = current.take() {
                old.halt();
            }
            *current = Some(ActiveJob {
                id,
                rx,
                stop: stop.clone(),
                cancel,
                started: false,
            });
        }
        self.shared.paused.store(false, Ordering::Release);
        self.shared.set_state(PlaybackState::Buffering);
        debug!("Pipeline job {} started", id);

        let shared = Arc::downgrade(&self.shared);
        start_decoding(source, tx, stop, move |message| {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let mut current = shared.current.lock();
            if current.as_ref().is_some_and(|job| job.id == id) {
                *current = None;
                drop(current);
                shared.set_state(PlaybackState::Errored(message));
            }
        });
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
        if self.shared.current.lock().is_some() {
            self.shared.set_state(PlaybackState::Paused);
        }
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
        let current = self.shared.current.lock();
        if let Some(job) = current.as_ref() {
            let next = if job.started {
                PlaybackState::Playing
            } else {
                PlaybackState::Buffering
            };
            drop(current);
            self.shared.set_state(next);
        }
    }

    /// Stops the current job; late signals from it are ignored.
    pub fn stop(&self) {
        if let Some(job) = self.shared.current.lock().take() {
            job.halt();
            debug!("Pipeline job {} stopped", job.id);
        }
        self.shared.paused.store(false, Ordering::Release);
        self.shared.set_state(PlaybackState::Idle);
    }

    pub fn set_volume(&self, volume: u8) {
        self.shared
            .volume
            .store(volume_to_gain(volume).to_bits(), Ordering::Relaxed);
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.shared.state.subscribe()
    }

    pub fn output(&self) -> PipelineOutput {
        PipelineOutput {
            shared: self.shared.clone(),
        }
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        if let Some(job) = self.shared.current.lock().take() {
            job.halt();
        }
    }
}

/// Consumer side of a pipeline, held by the voice transport.
#[derive(Clone)]
pub struct PipelineOutput {
    shared: Arc<Shared>,
}

impl PipelineOutput {
    /// Fills one interleaved stereo frame. Returns `false` when there is
    /// nothing to send (paused, idle or starved).
    pub fn fill_frame(&self, buf: &mut [i16]) -> bool {
        if self.shared.paused.load(Ordering::Acquire) {
            return false;
        }

        let mut current = self.shared.current.lock();
        let Some(job) = current.as_mut() else {
            return false;
        };

        let gain = self.shared.gain();
        let mut filled = 0;
        let mut finished = false;
        while filled < buf.len() {
            match job.rx.try_recv() {
                Ok(sample) => {
                    buf[filled] = (sample as f32 * gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                    filled += 1;
                }
                Err(flume::TryRecvError::Empty) => break,
                Err(flume::TryRecvError::Disconnected) => {
                    finished = true;
                    break;
                }
            }
        }

        if filled == 0 {
            if finished {
                debug!("Pipeline job {} reached end of stream", job.id);
                *current = None;
                drop(current);
                self.shared.set_state(PlaybackState::Idle);
            }
            return false;
        }

        buf[filled..].fill(0);
        if !job.started {
            job.started = true;
            drop(current);
            self.shared.set_state(PlaybackState::Playing);
        }
        true
    }
}

fn volume_to_gain(volume: u8) -> f32 {
    volume.min(100) as f32 / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{audio::constants::FRAME_SIZE_SAMPLES, testing::wav_bytes};
    use std::{io::Cursor, time::Duration};

    fn wav_source(frames: usize) -> StreamSource {
        StreamSource::new(Box::new(Cursor::new(wav_bytes(48_000, 2, frames))), Some("wav"))
    }

    fn garbage_source() -> StreamSource {
        StreamSource::new(Box::new(Cursor::new(vec![0u8; 1024])), None)
    }

    async fn wait_for(rx: &mut watch::Receiver<PlaybackState>, want: impl Fn(&PlaybackState) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| want(s)))
            .await
            .expect("state not reached")
            .expect("pipeline dropped");
    }

    #[tokio::test]
    async fn frames_flow_until_end_of_stream() {
        let pipeline = AudioPipeline::new(100);
        let mut states = pipeline.subscribe();
        pipeline.start(wav_source(960 * 3));
        assert_eq!(pipeline.state(), PlaybackState::Buffering);

        let output = pipeline.output();
        let mut frame = vec![0i16; FRAME_SIZE_SAMPLES];
        let mut frames = 0;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while pipeline.state() != PlaybackState::Idle && tokio::time::Instant::now() < deadline {
            if output.fill_frame(&mut frame) {
                frames += 1;
            } else {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        assert!(frames >= 3, "only {} frames", frames);
        wait_for(&mut states, |s| *s == PlaybackState::Idle).await;
    }

    #[tokio::test]
    async fn paused_output_yields_nothing() {
        let pipeline = AudioPipeline::new(75);
        pipeline.start(wav_source(960 * 10));
        pipeline.pause();
        assert_eq!(pipeline.state(), PlaybackState::Paused);

        let mut frame = vec![0i16; FRAME_SIZE_SAMPLES];
        assert!(!pipeline.output().fill_frame(&mut frame));

        pipeline.resume();
        assert_ne!(pipeline.state(), PlaybackState::Paused);
    }

    #[tokio::test]
    async fn decode_failure_is_signalled() {
        let pipeline = AudioPipeline::new(75);
        let mut states = pipeline.subscribe();
        pipeline.start(garbage_source());
        wait_for(&mut states, |s| matches!(s, PlaybackState::Errored(_))).await;
    }

    #[tokio::test]
    async fn stale_job_errors_are_ignored_after_swap() {
        let pipeline = AudioPipeline::new(75);
        pipeline.start(garbage_source());
        pipeline.stop();
        pipeline.start(wav_source(960 * 50));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pipeline.state(), PlaybackState::Buffering);
    }

    #[test]
    fn volume_maps_to_gain() {
        assert_eq!(volume_to_gain(75), 0.75);
        assert_eq!(volume_to_gain(200), 1.0);
    }
}
