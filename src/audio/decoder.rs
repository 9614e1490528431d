use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use flume::Sender;
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{CODEC_TYPE_NULL, DecoderOptions},
    errors::Error,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, warn};

use super::{
    constants::{CHANNELS, TARGET_SAMPLE_RATE},
    resampler::{Resampler, to_stereo},
    resolver::StreamSource,
};
use crate::common::types::AnyResult;

/// Consecutive corrupt packets tolerated before the stream is abandoned.
const MAX_CONSECUTIVE_DECODE_ERRORS: u32 = 50;

/// Decodes `source` on a dedicated thread, pushing 48 kHz stereo PCM into
/// `tx`. `on_error` is invoked once if decoding fails; a clean end of stream
/// simply drops `tx`.
pub fn start_decoding(
    source: StreamSource,
    tx: Sender<i16>,
    stop: Arc<AtomicBool>,
    on_error: impl FnOnce(String) + Send + 'static,
) {
    let spawned = thread::Builder::new()
        .name("radio-decoder".into())
        .spawn(move || {
            let cancel = source.cancel.clone();
            if let Err(e) = decode_loop(source, &tx, &stop) {
                if !stop.load(Ordering::Acquire) && !tx.is_disconnected() {
                    warn!("Decoding error: {}", e);
                    on_error(e.to_string());
                }
            }
            cancel.cancel();
        });

    if let Err(e) = spawned {
        warn!("Failed to spawn decoder thread: {}", e);
    }
}

fn decode_loop(source: StreamSource, tx: &Sender<i16>, stop: &AtomicBool) -> AnyResult<()> {
    let mut hint = Hint::new();
    if let Some(ext) = source.hint.as_deref() {
        hint.with_extension(ext);
    }
    debug!("Probing stream (hint: {:?})", source.hint);

    let mss = MediaSourceStream::new(source.source, Default::default());
    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or("no audio track found")?;

    let track_id = track.id;
    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let source_rate = track.codec_params.sample_rate.unwrap_or(TARGET_SAMPLE_RATE);
    let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2);
    debug!(
        "Source: {}Hz {} channels, target: {}Hz",
        source_rate, channels, TARGET_SAMPLE_RATE
    );

    let mut resampler = Resampler::new(source_rate, TARGET_SAMPLE_RATE, CHANNELS);
    let mut sample_buf: Option<SampleBuffer<i16>> = None;
    let mut stereo = Vec::new();
    let mut resampled = Vec::new();
    let mut decode_errors = 0u32;

    while !stop.load(Ordering::Acquire) {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(Error::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(Box::new(e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let audio_buf = match decoder.decode(&packet) {
            Ok(buf) => buf,
            Err(Error::DecodeError(e)) => {
                decode_errors += 1;
                if decode_errors > MAX_CONSECUTIVE_DECODE_ERRORS {
                    return Err(format!("too many decode errors, last: {}", e).into());
                }
                debug!("Skipping corrupt packet: {}", e);
                continue;
            }
            Err(Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(Box::new(e)),
        };
        decode_errors = 0;

        let spec = *audio_buf.spec();
        let buf = sample_buf.get_or_insert_with(|| {
            SampleBuffer::<i16>::new(audio_buf.capacity() as u64, spec)
        });
        if buf.capacity() < audio_buf.frames() * spec.channels.count() {
            *buf = SampleBuffer::<i16>::new(audio_buf.capacity() as u64, spec);
        }
        buf.copy_interleaved_ref(audio_buf);

        stereo.clear();
        to_stereo(buf.samples(), channels, &mut stereo);

        let out = if resampler.is_passthrough() {
            &stereo
        } else {
            resampled.clear();
            resampler.process(&stereo, &mut resampled);
            &resampled
        };

        for &s in out {
            if tx.send(s).is_err() {
                return Ok(());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::wav_bytes;
    use std::io::Cursor;

    #[test]
    fn decodes_wav_to_stereo_48k() {
        let source = StreamSource::new(Box::new(Cursor::new(wav_bytes(48_000, 1, 4_800))), Some("wav"));
        let (tx, rx) = flume::unbounded();
        let (err_tx, err_rx) = flume::unbounded();
        start_decoding(source, tx, Arc::new(AtomicBool::new(false)), move |e| {
            let _ = err_tx.send(e);
        });

        let samples: Vec<i16> = rx.iter().collect();
        assert_eq!(samples.len(), 4_800 * 2);
        assert!(err_rx.try_recv().is_err());
    }

    #[test]
    fn garbage_reports_an_error() {
        let source = StreamSource::new(Box::new(Cursor::new(vec![0u8; 2048])), None);
        let (tx, rx) = flume::unbounded();
        let (err_tx, err_rx) = flume::unbounded();
        start_decoding(source, tx, Arc::new(AtomicBool::new(false)), move |e| {
            let _ = err_tx.send(e);
        });

        assert!(err_rx.recv_timeout(std::time::Duration::from_secs(5)).is_ok());
        assert!(rx.recv().is_err());
    }
}
