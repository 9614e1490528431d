use std::io::{self, Read, Seek, SeekFrom};

use bytes::Bytes;
use futures::StreamExt;
use symphonia::core::io::MediaSource;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::audio::constants::BYTE_CHANNEL_CAPACITY;

/// Blocking `Read` over byte chunks pushed by an async producer.
///
/// Lives on the decoder thread; the producer side is a tokio task that pumps
/// an HTTP body into the channel. Dropping the reader cancels the pump.
pub struct ChannelReader {
    rx: flume::Receiver<io::Result<Bytes>>,
    current: Bytes,
    _pump: tokio_util::sync::DropGuard,
}

impl ChannelReader {
    pub fn new(
        rx: flume::Receiver<io::Result<Bytes>>,
        pump_token: CancellationToken,
    ) -> Self {
        Self {
            rx,
            current: Bytes::new(),
            _pump: pump_token.drop_guard(),
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.current.is_empty() {
            match self.rx.recv() {
                Ok(Ok(chunk)) => self.current = chunk,
                Ok(Err(e)) => return Err(e),
                // Producer finished: end of stream.
                Err(flume::RecvError::Disconnected) => return Ok(0),
            }
        }

        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current.split_to(n));
        Ok(n)
    }
}

impl Seek for ChannelReader {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "live streams are not seekable",
        ))
    }
}

impl MediaSource for ChannelReader {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// Spawns a task pumping `response`'s body into a [`ChannelReader`].
pub fn spawn_body_pump(response: reqwest::Response, cancel: CancellationToken) -> ChannelReader {
    let (tx, rx) = flume::bounded::<io::Result<Bytes>>(BYTE_CHANNEL_CAPACITY);
    let token = cancel.child_token();
    let pump_token = token.clone();

    tokio::spawn(async move {
        let mut body = response.bytes_stream();
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => break,
                next = body.next() => next,
            };

            let item = match next {
                Some(Ok(chunk)) => Ok(chunk),
                Some(Err(e)) => {
                    warn!("Stream body error: {}", e);
                    Err(io::Error::other(e))
                }
                None => {
                    debug!("Stream body finished");
                    break;
                }
            };
            let failed = item.is_err();

            tokio::select! {
                _ = token.cancelled() => break,
                sent = tx.send_async(item) => if sent.is_err() { break },
            }

            if failed {
                break;
            }
        }
    });

    ChannelReader::new(rx, pump_token)
}
