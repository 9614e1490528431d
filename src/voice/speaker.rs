use std::{net::SocketAddr, sync::Arc};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use super::{
    UdpBackend,
    constants::{
        DISCOVERY_PACKET_SIZE, FRAME_DURATION_MS, IP_DISCOVERY_TIMEOUT_SECS, MAX_OPUS_FRAME_SIZE,
        MAX_SILENCE_FRAMES,
    },
    types::map_boxed_err,
};
use crate::{
    audio::{Encoder, PipelineOutput, constants::FRAME_SIZE_SAMPLES},
    common::types::AnyResult,
};

/// Slot the speak loop pulls audio from; swapped when a pipeline is attached.
pub type OutputSlot = Arc<Mutex<Option<PipelineOutput>>>;

pub async fn discover_ip(
    socket: &tokio::net::UdpSocket,
    addr: SocketAddr,
    ssrc: u32,
) -> AnyResult<(String, u16)> {
    let mut packet = [0u8; DISCOVERY_PACKET_SIZE];
    packet[0..2].copy_from_slice(&1u16.to_be_bytes());
    packet[2..4].copy_from_slice(&70u16.to_be_bytes());
    packet[4..8].copy_from_slice(&ssrc.to_be_bytes());

    socket.send_to(&packet, addr).await.map_err(map_boxed_err)?;

    let mut buf = [0u8; DISCOVERY_PACKET_SIZE];
    let received = tokio::time::timeout(
        tokio::time::Duration::from_secs(IP_DISCOVERY_TIMEOUT_SECS),
        socket.recv(&mut buf),
    )
    .await
    .map_err(|_| map_boxed_err("IP discovery timed out"))?
    .map_err(map_boxed_err)?;

    if received < DISCOVERY_PACKET_SIZE {
        return Err(map_boxed_err("Malformed IP discovery response"));
    }
    parse_discovery_response(&buf)
}

fn parse_discovery_response(buf: &[u8; DISCOVERY_PACKET_SIZE]) -> AnyResult<(String, u16)> {
    let ip = std::str::from_utf8(&buf[8..72])
        .map_err(map_boxed_err)?
        .trim_matches('\0')
        .to_string();
    let port = u16::from_be_bytes([buf[72], buf[73]]);
    Ok((ip, port))
}

/// Sends one Opus frame every 20 ms until cancelled.
pub async fn speak_loop(
    output: OutputSlot,
    mut udp: UdpBackend,
    cancel: CancellationToken,
) -> AnyResult<()> {
    let mut encoder = Encoder::new()?;
    let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(FRAME_DURATION_MS));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut pcm_buf = vec![0i16; FRAME_SIZE_SAMPLES];
    let mut opus_buf = vec![0u8; MAX_OPUS_FRAME_SIZE];
    let mut silence_frames = MAX_SILENCE_FRAMES;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let source = output.lock().clone();
                let has_audio = source.is_some_and(|o| o.fill_frame(&mut pcm_buf));

                if has_audio {
                    silence_frames = 0;
                } else {
                    if silence_frames >= MAX_SILENCE_FRAMES {
                        continue;
                    }
                    silence_frames += 1;
                    pcm_buf.fill(0);
                }

                let size = match encoder.encode(&pcm_buf, &mut opus_buf) {
                    Ok(size) => size,
                    Err(e) => {
                        error!("Encoding failure: {}", e);
                        continue;
                    }
                };

                if let Err(e) = udp.send_opus_packet(&opus_buf[..size]).await {
                    trace!("Voice packet dropped: {}", e);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_discovery_response() {
        let mut buf = [0u8; DISCOVERY_PACKET_SIZE];
        buf[8..17].copy_from_slice(b"127.0.0.1");
        buf[72..74].copy_from_slice(&50004u16.to_be_bytes());
        assert_eq!(
            parse_discovery_response(&buf).unwrap(),
            ("127.0.0.1".to_string(), 50004)
        );
    }
}
