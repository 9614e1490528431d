use std::sync::LazyLock;

use async_trait::async_trait;
use futures::{StreamExt, future::BoxFuture};
use regex::Regex;
use symphonia::core::io::MediaSource;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    audio::{
        constants::{MAX_PLAYLIST_BYTES, MAX_PLAYLIST_DEPTH},
        reader::spawn_body_pump,
    },
    common::{
        errors::{RadioError, RadioResult},
        http::HttpClient,
        types::StationId,
    },
    protocol::Station,
};

static PLS_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^\s*File\d+\s*=\s*(\S+)\s*$").expect("static regex")
});

/// A decodable byte stream for one station, ready for the decoder thread.
pub struct StreamSource {
    pub source: Box<dyn MediaSource>,
    /// Container/codec hint as a file extension ("mp3", "aac", ...).
    pub hint: Option<String>,
    /// Cancels the network producer feeding `source`, if any.
    pub cancel: CancellationToken,
}

impl StreamSource {
    pub fn new(source: Box<dyn MediaSource>, hint: Option<&str>) -> Self {
        Self {
            source,
            hint: hint.map(str::to_string),
            cancel: CancellationToken::new(),
        }
    }
}

/// Turns a station record into an audio byte stream.
#[async_trait]
pub trait StreamResolver: Send + Sync {
    async fn open(&self, station: &Station) -> RadioResult<StreamSource>;
}

pub struct HttpResolver {
    client: reqwest::Client,
}

impl HttpResolver {
    pub fn new() -> RadioResult<Self> {
        let client = HttpClient::streaming()
            .map_err(|e| RadioError::Gateway(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn open_url<'a>(
        &'a self,
        id: StationId,
        url: &'a str,
        depth: usize,
    ) -> BoxFuture<'a, RadioResult<StreamSource>> {
        Box::pin(async move { self.open_once(id, url, depth).await })
    }

    async fn open_once(&self, id: StationId, url: &str, depth: usize) -> RadioResult<StreamSource> {
        let unreachable = |reason: String| RadioError::StreamUnreachable {
            station: id,
            reason,
        };

        debug!("Opening stream {} for station {}", url, id);
        let response = self
            .client
            .get(url)
            .header("Icy-MetaData", "0")
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unreachable(format!("HTTP {}", status)));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase());

        let kind = classify(content_type.as_deref(), url);
        if kind == ContentKind::Playlist {
            if depth >= MAX_PLAYLIST_DEPTH {
                return Err(unreachable("playlist nesting too deep".into()));
            }
            let body = read_limited(response, MAX_PLAYLIST_BYTES)
                .await
                .map_err(|e| unreachable(e.to_string()))?;
            let text = String::from_utf8_lossy(&body);
            if is_hls(&text) {
                return Err(unreachable("HLS playlists are not supported".into()));
            }

            let entries = parse_playlist(&text);
            debug!("Playlist {} lists {} entries", url, entries.len());
            for entry in entries {
                match self.open_url(id, &entry, depth + 1).await {
                    Ok(source) => return Ok(source),
                    Err(e) => debug!("Playlist entry {} failed: {}", entry, e),
                }
            }
            return Err(unreachable("playlist has no playable entries".into()));
        }

        let hint = match kind {
            ContentKind::Audio(ext) => Some(ext),
            _ => extension_hint(url),
        };
        let cancel = CancellationToken::new();
        let reader = spawn_body_pump(response, cancel.clone());
        Ok(StreamSource {
            source: Box::new(reader),
            hint: hint.map(str::to_string),
            cancel,
        })
    }
}

#[async_trait]
impl StreamResolver for HttpResolver {
    async fn open(&self, station: &Station) -> RadioResult<StreamSource> {
        self.open_url(station.id, station.url.trim(), 0).await
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ContentKind {
    Playlist,
    Audio(&'static str),
    Unknown,
}

fn classify(content_type: Option<&str>, url: &str) -> ContentKind {
    let mime = content_type
        .and_then(|c| c.split(';').next())
        .map(str::trim)
        .unwrap_or("");

    match mime {
        "audio/x-scpls" | "audio/x-mpegurl" | "audio/mpegurl" | "application/x-mpegurl"
        | "application/vnd.apple.mpegurl" | "application/pls+xml" => ContentKind::Playlist,
        "audio/mpeg" | "audio/mp3" => ContentKind::Audio("mp3"),
        "audio/aac" | "audio/aacp" | "audio/x-aac" => ContentKind::Audio("aac"),
        "audio/mp4" | "audio/x-m4a" => ContentKind::Audio("m4a"),
        "audio/ogg" | "application/ogg" | "audio/opus" => ContentKind::Audio("ogg"),
        "audio/flac" | "audio/x-flac" => ContentKind::Audio("flac"),
        "audio/wav" | "audio/x-wav" | "audio/wave" => ContentKind::Audio("wav"),
        _ => match extension_hint(url) {
            Some("pls" | "m3u" | "m3u8") => ContentKind::Playlist,
            _ => ContentKind::Unknown,
        },
    }
}

fn extension_hint(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit_once('.').map(|(_, ext)| ext)?;
    if ext.contains('/') {
        return None;
    }
    match ext.to_ascii_lowercase().as_str() {
        "mp3" => Some("mp3"),
        "aac" | "aacp" => Some("aac"),
        "m4a" | "mp4" => Some("m4a"),
        "ogg" | "oga" | "opus" => Some("ogg"),
        "flac" => Some("flac"),
        "wav" => Some("wav"),
        "pls" => Some("pls"),
        "m3u" => Some("m3u"),
        "m3u8" => Some("m3u8"),
        _ => None,
    }
}

fn is_hls(body: &str) -> bool {
    body.contains("#EXT-X-TARGETDURATION") || body.contains("#EXT-X-STREAM-INF")
}

/// Stream URLs listed by a PLS or M3U playlist, in order.
pub fn parse_playlist(body: &str) -> Vec<String> {
    let pls: Vec<String> = PLS_ENTRY
        .captures_iter(body)
        .map(|c| c[1].to_string())
        .collect();
    if !pls.is_empty() {
        return pls;
    }

    body.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter(|l| l.starts_with("http://") || l.starts_with("https://"))
        .map(str::to_string)
        .collect()
}

async fn read_limited(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, reqwest::Error> {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk?);
        if body.len() >= limit {
            body.truncate(limit);
            break;
        }
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pls_entries() {
        let body = "[playlist]\nNumberOfEntries=2\nFile1=http://a.example/stream\nTitle1=A\nFile2=http://b.example/live\n";
        assert_eq!(
            parse_playlist(body),
            vec!["http://a.example/stream", "http://b.example/live"]
        );
    }

    #[test]
    fn parses_m3u_entries() {
        let body = "#EXTM3U\n#EXTINF:-1,Radio\nhttps://radio.example/mp3\n\nnot-a-url\n";
        assert_eq!(parse_playlist(body), vec!["https://radio.example/mp3"]);
    }

    #[test]
    fn detects_hls() {
        assert!(is_hls("#EXTM3U\n#EXT-X-TARGETDURATION:6\nseg1.ts"));
        assert!(!is_hls("#EXTM3U\nhttp://x/stream"));
    }

    #[test]
    fn classifies_by_content_type_then_extension() {
        assert_eq!(
            classify(Some("audio/mpeg"), "http://x/stream"),
            ContentKind::Audio("mp3")
        );
        assert_eq!(
            classify(Some("audio/x-scpls; charset=utf-8"), "http://x/a"),
            ContentKind::Playlist
        );
        assert_eq!(
            classify(Some("text/plain"), "http://x/listen.pls?id=3"),
            ContentKind::Playlist
        );
        assert_eq!(classify(None, "http://x/live"), ContentKind::Unknown);
    }

    #[test]
    fn extension_ignores_host_dots() {
        assert_eq!(extension_hint("http://radio.example.com/live"), None);
        assert_eq!(extension_hint("http://radio.example.com/live.aac?x=1"), Some("aac"));
    }
}
