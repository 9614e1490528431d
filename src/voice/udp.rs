use std::{net::SocketAddr, sync::Arc};

use aes_gcm::{
    Aes256Gcm,
    aead::{AeadInPlace, KeyInit},
};
use xsalsa20poly1305::XSalsa20Poly1305;

use super::{
    constants::{RTP_OPUS_PAYLOAD_TYPE, RTP_TIMESTAMP_STEP, RTP_VERSION_BYTE, UDP_PACKET_BUF_CAPACITY},
    types::map_boxed_err,
};
use crate::common::types::AnyResult;

enum ActiveCipher {
    XSalsa20Poly1305(XSalsa20Poly1305),
    Aes256Gcm(Aes256Gcm),
}

/// Packetises Opus frames into encrypted RTP datagrams.
pub struct UdpBackend {
    socket: Arc<tokio::net::UdpSocket>,
    ssrc: u32,
    address: SocketAddr,
    cipher: ActiveCipher,
    sequence: u16,
    timestamp: u32,
    nonce: u32,
    packet_buf: Vec<u8>,
}

impl UdpBackend {
    pub fn new(
        socket: Arc<tokio::net::UdpSocket>,
        address: SocketAddr,
        ssrc: u32,
        secret_key: [u8; 32],
        mode_name: &str,
    ) -> Self {
        let cipher = match mode_name {
            "aead_aes256_gcm_rtpsize" => ActiveCipher::Aes256Gcm(Aes256Gcm::new(&secret_key.into())),
            _ => ActiveCipher::XSalsa20Poly1305(XSalsa20Poly1305::new(&secret_key.into())),
        };

        Self {
            socket,
            ssrc,
            address,
            cipher,
            sequence: 0,
            timestamp: 0,
            nonce: 0,
            packet_buf: Vec::with_capacity(UDP_PACKET_BUF_CAPACITY),
        }
    }

    fn rtp_header(&mut self) -> [u8; 12] {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        let timestamp = self.timestamp;
        self.timestamp = self.timestamp.wrapping_add(RTP_TIMESTAMP_STEP);

        let mut header = [0u8; 12];
        header[0] = RTP_VERSION_BYTE;
        header[1] = RTP_OPUS_PAYLOAD_TYPE;
        header[2..4].copy_from_slice(&sequence.to_be_bytes());
        header[4..8].copy_from_slice(&timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        header
    }

    /// Builds the encrypted datagram for `payload` into the packet buffer.
    fn seal(&mut self, payload: &[u8]) -> AnyResult<()> {
        let header = self.rtp_header();
        self.packet_buf.clear();
        self.packet_buf.extend_from_slice(&header);

        match &self.cipher {
            ActiveCipher::XSalsa20Poly1305(cipher) => {
                // Nonce is the RTP header zero-padded to 24 bytes; the tag
                // precedes the ciphertext.
                let mut nonce = [0u8; 24];
                nonce[0..12].copy_from_slice(&header);

                let mut body = payload.to_vec();
                let tag = cipher
                    .encrypt_in_place_detached(&nonce.into(), b"", &mut body)
                    .map_err(|e| map_boxed_err(format!("XSalsa20 encryption error: {e:?}")))?;
                self.packet_buf.extend_from_slice(&tag);
                self.packet_buf.extend_from_slice(&body);
            }
            ActiveCipher::Aes256Gcm(cipher) => {
                self.nonce = self.nonce.wrapping_add(1);
                let counter = self.nonce.to_be_bytes();
                let mut nonce = [0u8; 12];
                nonce[0..4].copy_from_slice(&counter);

                self.packet_buf.extend_from_slice(payload);
                let tag = cipher
                    .encrypt_in_place_detached(&nonce.into(), &header, &mut self.packet_buf[12..])
                    .map_err(|e| map_boxed_err(format!("AES-GCM encryption error: {e:?}")))?;
                self.packet_buf.extend_from_slice(&tag);
                self.packet_buf.extend_from_slice(&counter);
            }
        }
        Ok(())
    }

    pub async fn send_opus_packet(&mut self, payload: &[u8]) -> AnyResult<()> {
        self.seal(payload)?;
        self.socket
            .send_to(&self.packet_buf, self.address)
            .await
            .map_err(map_boxed_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend(mode: &str) -> UdpBackend {
        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        UdpBackend::new(Arc::new(socket), addr, 0xABCD, [7u8; 32], mode)
    }

    #[tokio::test]
    async fn aes_gcm_packet_layout() {
        let mut udp = backend("aead_aes256_gcm_rtpsize").await;
        udp.seal(&[1, 2, 3]).unwrap();
        // header + payload + 16 byte tag + 4 byte nonce counter
        assert_eq!(udp.packet_buf.len(), 12 + 3 + 16 + 4);
        assert_eq!(&udp.packet_buf[8..12], &0xABCDu32.to_be_bytes());
        assert_eq!(&udp.packet_buf[udp.packet_buf.len() - 4..], &1u32.to_be_bytes());
    }

    #[tokio::test]
    async fn sequence_and_timestamp_advance() {
        let mut udp = backend("xsalsa20_poly1305").await;
        udp.seal(&[0; 10]).unwrap();
        udp.seal(&[0; 10]).unwrap();
        assert_eq!(&udp.packet_buf[2..4], &1u16.to_be_bytes());
        assert_eq!(&udp.packet_buf[4..8], &960u32.to_be_bytes());
        assert_eq!(udp.packet_buf.len(), 12 + 16 + 10);
    }
}
