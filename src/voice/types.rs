use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::types::AnyError;

#[derive(Serialize, Deserialize, Debug)]
pub struct VoiceGatewayMessage {
    pub op: u8,
    pub d: Value,
}

/// How a voice websocket close should be read by the owner of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Backend-side hiccup; a fresh connection will likely succeed.
    Transient,
    /// Session is no longer valid and needs a new voice state handshake.
    SessionInvalid,
    /// Kicked, channel deleted or authentication rejected.
    Fatal,
}

pub fn classify_close(code: u16) -> CloseKind {
    match code {
        4004 | 4014 => CloseKind::Fatal,
        4006 | 4009 => CloseKind::SessionInvalid,
        _ => CloseKind::Transient,
    }
}

/// Converts any `Display`-able value into the boxed error type.
#[inline]
pub fn map_boxed_err<E: std::fmt::Display>(e: E) -> AnyError {
    Box::new(std::io::Error::other(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes() {
        assert_eq!(classify_close(4014), CloseKind::Fatal);
        assert_eq!(classify_close(4004), CloseKind::Fatal);
        assert_eq!(classify_close(4006), CloseKind::SessionInvalid);
        assert_eq!(classify_close(4015), CloseKind::Transient);
        assert_eq!(classify_close(1000), CloseKind::Transient);
    }
}
