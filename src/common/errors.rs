use serde::Serialize;

use crate::common::types::{ChannelId, GuildId, StationId, now_ms};

/// Machine-readable error classification handed to the API layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    ChannelUnavailable,
    JoinTimeout,
    StreamUnreachable,
    TransportDropped,
    GatewayUnresponsive,
    SessionNotFound,
    StationNotFound,
    InvalidVolume,
    Gateway,
    Storage,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RadioError {
    #[error("voice channel {channel} is unavailable in guild {guild}")]
    ChannelUnavailable { guild: GuildId, channel: ChannelId },

    #[error("voice transport for guild {guild} was not ready within {timeout_ms}ms")]
    JoinTimeout { guild: GuildId, timeout_ms: u64 },

    #[error("stream of station {station} is unreachable: {reason}")]
    StreamUnreachable { station: StationId, reason: String },

    #[error("voice transport for guild {0} dropped")]
    TransportDropped(GuildId),

    #[error("gateway has not delivered a heartbeat for {stale_ms}ms")]
    GatewayUnresponsive { stale_ms: u64 },

    #[error("no active session for guild {0}")]
    SessionNotFound(GuildId),

    #[error("station {0} not found")]
    StationNotFound(StationId),

    #[error("volume {0} is outside 0..=100")]
    InvalidVolume(i64),

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl RadioError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ChannelUnavailable { .. } => ErrorKind::ChannelUnavailable,
            Self::JoinTimeout { .. } => ErrorKind::JoinTimeout,
            Self::StreamUnreachable { .. } => ErrorKind::StreamUnreachable,
            Self::TransportDropped(_) => ErrorKind::TransportDropped,
            Self::GatewayUnresponsive { .. } => ErrorKind::GatewayUnresponsive,
            Self::SessionNotFound(_) => ErrorKind::SessionNotFound,
            Self::StationNotFound(_) => ErrorKind::StationNotFound,
            Self::InvalidVolume(_) => ErrorKind::InvalidVolume,
            Self::Gateway(_) => ErrorKind::Gateway,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Caller errors never change session state.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SessionNotFound | ErrorKind::StationNotFound | ErrorKind::InvalidVolume
        )
    }
}

pub type RadioResult<T> = std::result::Result<T, RadioError>;

/// JSON error body returned by the HTTP surface.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    pub status: u16,
    /// HTTP status reason phrase (e.g. "Bad Request").
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    pub message: String,
    pub path: String,
}

impl ErrorResponse {
    pub fn new(status: u16, error: impl Into<String>, message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            timestamp: now_ms(),
            status,
            error: error.into(),
            kind: None,
            message: message.into(),
            path: path.into(),
        }
    }

    pub fn from_radio(err: &RadioError, path: impl Into<String>) -> Self {
        let (status, reason) = match err.kind() {
            ErrorKind::SessionNotFound | ErrorKind::StationNotFound => (404, "Not Found"),
            ErrorKind::InvalidVolume | ErrorKind::ChannelUnavailable => (400, "Bad Request"),
            ErrorKind::JoinTimeout => (504, "Gateway Timeout"),
            ErrorKind::StreamUnreachable => (502, "Bad Gateway"),
            _ => (503, "Service Unavailable"),
        };
        Self {
            kind: Some(err.kind()),
            ..Self::new(status, reason, err.to_string(), path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_errors_are_flagged() {
        assert!(RadioError::SessionNotFound(GuildId(1)).is_caller_error());
        assert!(RadioError::InvalidVolume(101).is_caller_error());
        assert!(!RadioError::TransportDropped(GuildId(1)).is_caller_error());
    }

    #[test]
    fn error_response_carries_kind() {
        let body = ErrorResponse::from_radio(&RadioError::StationNotFound(StationId(9)), "/v1/x");
        assert_eq!(body.status, 404);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["kind"], "StationNotFound");
    }
}
