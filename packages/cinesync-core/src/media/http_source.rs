//! HTTP-backed media source.
//!
//! Fronts any blob host that speaks ranged GETs. Metadata is probed with a
//! one-byte range request because many blob stores reject HEAD; name and
//! MIME fall back to URL inference when the upstream omits headers.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header;

use crate::config::MediaConfig;

use super::range::{parse_content_range, RangeSpec, SatisfiedRange};
use super::{MediaError, MediaMetadata, MediaResult, MediaSource, OpenedMedia};

/// Media source reading from an upstream HTTP blob store.
pub struct HttpMediaSource {
    client: reqwest::Client,
    bearer_token: Option<String>,
    size_cap: u64,
    probe_timeout: Duration,
}

impl HttpMediaSource {
    /// Builds a source from the media configuration.
    pub fn new(config: &MediaConfig) -> MediaResult<Self> {
        // No overall timeout: stream reads are long-lived by design. The
        // connect timeout still bounds dead upstreams.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MediaError::Request(e.to_string()))?;
        Ok(Self {
            client,
            bearer_token: config.upstream_bearer_token.clone(),
            size_cap: config.size_cap_bytes,
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
        })
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.get(url);
        if let Some(token) = &self.bearer_token {
            req = req.bearer_auth(token);
        }
        req
    }
}

#[async_trait]
impl MediaSource for HttpMediaSource {
    async fn metadata(&self, url: &str) -> MediaResult<MediaMetadata> {
        // One-byte probe instead of HEAD: the 206 Content-Range carries the
        // total size, and headers arrive without pulling the body.
        let response = self
            .request(url)
            .header(header::RANGE, "bytes=0-0")
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| MediaError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::UpstreamStatus {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("upstream error").to_string(),
            });
        }

        let size = response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range)
            .map(|(_, _, total)| total)
            .or_else(|| {
                // Upstream ignored the range; fall back to the full length.
                response
                    .headers()
                    .get(header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
            })
            .unwrap_or(0);

        let name = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(disposition_filename)
            .unwrap_or_else(|| name_from_url(url));

        let mime_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty() && v != "application/octet-stream")
            .unwrap_or_else(|| mime_from_name(&name).to_string());

        ensure_within_cap(size, self.size_cap)?;

        Ok(MediaMetadata {
            id: url.to_string(),
            name,
            mime_type,
            size,
        })
    }

    async fn open(&self, url: &str, range: Option<RangeSpec>) -> MediaResult<OpenedMedia> {
        let mut req = self.request(url);
        if let Some(range) = &range {
            req = req.header(header::RANGE, range.to_header_value());
        }
        let response = req
            .send()
            .await
            .map_err(|e| MediaError::Request(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::RANGE_NOT_SATISFIABLE {
            return Err(MediaError::InvalidRange(
                range.map(|r| r.to_header_value()).unwrap_or_default(),
            ));
        }
        if !status.is_success() {
            return Err(MediaError::UpstreamStatus {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("upstream error").to_string(),
            });
        }

        let satisfied = response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range)
            .map(|(start, end, total)| SatisfiedRange { start, end, total });

        let total_size = satisfied.map(|r| r.total).unwrap_or_else(|| {
            response
                .headers()
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        });

        ensure_within_cap(total_size, self.size_cap)?;

        let stream = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));

        Ok(OpenedMedia {
            stream: Box::pin(stream),
            range: satisfied,
            total_size,
        })
    }
}

/// Rejects media past the configured cap before any body bytes flow.
/// A size of 0 means the upstream declared no length and is let through.
fn ensure_within_cap(size: u64, cap: u64) -> MediaResult<()> {
    if size > cap {
        return Err(MediaError::TooLarge { size, cap });
    }
    Ok(())
}

/// Extracts `filename="..."` from a `Content-Disposition` header.
fn disposition_filename(value: &str) -> Option<String> {
    let idx = value.find("filename=")?;
    let raw = value[idx + "filename=".len()..]
        .split(';')
        .next()?
        .trim()
        .trim_matches('"');
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

/// Derives a display name from the URL path.
fn name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').next().unwrap_or("");
    if segment.is_empty() {
        "media".to_string()
    } else {
        segment.to_string()
    }
}

/// Guesses a MIME type from a file extension.
fn mime_from_name(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "ogg" | "ogv" => "video/ogg",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "ts" => "video/mp2t",
        "flv" => "video/x-flv",
        "wmv" => "video/x-ms-wmv",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_name_strips_query_and_fragment() {
        assert_eq!(name_from_url("https://host/path/movie.mkv?sig=abc"), "movie.mkv");
        assert_eq!(name_from_url("https://host/a/b/c.mp4#t=10"), "c.mp4");
        assert_eq!(name_from_url("https://host/"), "media");
    }

    #[test]
    fn disposition_filename_variants() {
        assert_eq!(
            disposition_filename("attachment; filename=\"movie.mkv\""),
            Some("movie.mkv".to_string())
        );
        assert_eq!(
            disposition_filename("attachment; filename=plain.mp4"),
            Some("plain.mp4".to_string())
        );
        assert_eq!(disposition_filename("inline"), None);
        assert_eq!(disposition_filename("attachment; filename=\"\""), None);
    }

    #[test]
    fn size_cap_rejects_oversized_media() {
        assert!(ensure_within_cap(1024, 2048).is_ok());
        assert!(ensure_within_cap(2048, 2048).is_ok());
        assert!(matches!(
            ensure_within_cap(2049, 2048),
            Err(MediaError::TooLarge { size: 2049, cap: 2048 })
        ));
        // Unknown length (no Content-Length/Content-Range upstream)
        assert!(ensure_within_cap(0, 2048).is_ok());
    }

    #[test]
    fn mime_inference_covers_common_containers() {
        assert_eq!(mime_from_name("a.mp4"), "video/mp4");
        assert_eq!(mime_from_name("a.MKV"), "video/x-matroska");
        assert_eq!(mime_from_name("a.webm"), "video/webm");
        assert_eq!(mime_from_name("a.unknown"), "application/octet-stream");
        assert_eq!(mime_from_name("noext"), "application/octet-stream");
    }
}
