//! Media proxy and transcoding pipeline.
//!
//! The proxy fronts an upstream blob store through the [`MediaSource`]
//! trait, rewriting client seeks into upstream byte-range reads. Media the
//! browser can play natively is passed through; everything else goes
//! through the process-based [`transcode`] pipeline, which multiplexes one
//! encoder across every client watching the same media.

mod http_source;
pub mod proxy;
mod range;
pub mod transcode;

pub use http_source::HttpMediaSource;
pub use range::{parse_range_header, RangeSpec, SatisfiedRange};
pub use transcode::{FfmpegTranscoder, Transcoder};

use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use thiserror::Error;

/// MIME types browsers play natively; everything else is transcoded.
const BROWSER_FRIENDLY_MIME: [&str; 3] = ["video/mp4", "video/webm", "video/ogg"];

/// Errors from the media pipeline.
#[derive(Debug, Error)]
pub enum MediaError {
    /// Upstream answered with an error status (404, 403, ...).
    #[error("upstream returned {status}: {message}")]
    UpstreamStatus { status: u16, message: String },

    /// The upstream request failed before a response arrived.
    #[error("upstream request failed: {0}")]
    Request(String),

    /// Media exceeds the configured size cap.
    #[error("media size {size} exceeds cap {cap}")]
    TooLarge { size: u64, cap: u64 },

    /// A `Range` header was malformed or unsatisfiable.
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// The encoder process could not be started or attached to.
    #[error("transcode failed: {0}")]
    Transcode(String),
}

/// Result alias for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Boxed byte stream yielded by a media source or transcode client.
pub type MediaStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Descriptive metadata for one upstream media object.
#[derive(Debug, Clone)]
pub struct MediaMetadata {
    /// Opaque media identity; for HTTP sources this is the upstream URL.
    pub id: String,
    pub name: String,
    pub mime_type: String,
    /// Total size in bytes.
    pub size: u64,
}

impl MediaMetadata {
    /// Whether the browser needs this media re-encoded to play it.
    #[must_use]
    pub fn needs_transcoding(&self) -> bool {
        !BROWSER_FRIENDLY_MIME.contains(&self.mime_type.as_str())
    }

    /// Matroska containers get special lifecycle budgets: they demux slowly
    /// and players reconnect more aggressively while probing them.
    #[must_use]
    pub fn is_mkv(&self) -> bool {
        self.mime_type == "video/x-matroska" || self.name.to_ascii_lowercase().ends_with(".mkv")
    }
}

/// An opened upstream read.
pub struct OpenedMedia {
    /// Body bytes, never buffered whole.
    pub stream: MediaStream,
    /// The satisfied range when the upstream answered 206.
    pub range: Option<SatisfiedRange>,
    /// Total object size.
    pub total_size: u64,
}

/// Upstream blob store interface.
///
/// Implementations must forward ranges upstream rather than slicing a full
/// download, and must surface upstream failures as [`MediaError`] so the
/// proxy can map them onto client-facing statuses. The configured media
/// size cap is enforced here, not in the proxy: both metadata probes and
/// opens reject oversized media with [`MediaError::TooLarge`].
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Resolves metadata without fetching the body.
    async fn metadata(&self, url: &str) -> MediaResult<MediaMetadata>;

    /// Opens the object, optionally at a byte range.
    async fn open(&self, url: &str, range: Option<RangeSpec>) -> MediaResult<OpenedMedia>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str, mime: &str) -> MediaMetadata {
        MediaMetadata {
            id: "u".into(),
            name: name.into(),
            mime_type: mime.into(),
            size: 1024,
        }
    }

    #[test]
    fn browser_friendly_mime_is_passthrough() {
        assert!(!meta("a.mp4", "video/mp4").needs_transcoding());
        assert!(!meta("a.webm", "video/webm").needs_transcoding());
        assert!(!meta("a.ogv", "video/ogg").needs_transcoding());
        assert!(meta("a.mkv", "video/x-matroska").needs_transcoding());
        assert!(meta("a.avi", "video/x-msvideo").needs_transcoding());
    }

    #[test]
    fn mkv_detection_uses_mime_and_extension() {
        assert!(meta("a.mkv", "video/x-matroska").is_mkv());
        assert!(meta("a.MKV", "application/octet-stream").is_mkv());
        assert!(!meta("a.avi", "video/x-msvideo").is_mkv());
    }
}
