//! Range-capable media proxy handlers.
//!
//! Thin axum handlers over two response builders: passthrough (browser can
//! play the container; upstream range reads are forwarded byte for byte) and
//! encode (everything else; clients share one encoder through the
//! [`Transcoder`] registry).

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::error::{CinesyncError, CinesyncResult};

use super::transcode::TranscodeClient;
use super::{parse_range_header, MediaMetadata, MediaSource, RangeSpec, Transcoder};

/// Span of the synthetic `Content-Range` used in encode mode, where the true
/// encoded length is unknown until the encoder finishes: 1 TiB is far past
/// any real output while keeping the header RFC-shaped.
const ENCODED_RANGE_SPAN: u64 = 1 << 40;

/// Query string for all media endpoints.
#[derive(Debug, Deserialize)]
pub struct MediaQuery {
    pub url: String,
}

/// Response body for `metadata` and `info`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub needs_transcoding: bool,
    #[serde(rename = "isMKV")]
    pub is_mkv: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
}

impl MediaInfo {
    fn from_meta(meta: &MediaMetadata, stream_url: Option<String>) -> Self {
        Self {
            name: meta.name.clone(),
            mime_type: meta.mime_type.clone(),
            size: meta.size,
            needs_transcoding: meta.needs_transcoding(),
            is_mkv: meta.is_mkv(),
            stream_url,
        }
    }
}

/// `GET /api/video/metadata?url=U`
pub async fn metadata_handler(
    State(state): State<AppState>,
    Query(query): Query<MediaQuery>,
) -> CinesyncResult<Json<MediaInfo>> {
    let meta = state.media_source.metadata(&query.url).await?;
    Ok(Json(MediaInfo::from_meta(&meta, None)))
}

/// `GET /api/video/info?url=U`
pub async fn info_handler(
    State(state): State<AppState>,
    Query(query): Query<MediaQuery>,
) -> CinesyncResult<Json<MediaInfo>> {
    let meta = state.media_source.metadata(&query.url).await?;
    let stream_url = format!(
        "/api/video/stream?url={}",
        urlencode(&query.url)
    );
    Ok(Json(MediaInfo::from_meta(&meta, Some(stream_url))))
}

/// `GET /api/video/stream?url=U` with optional `Range`.
pub async fn stream_handler(
    State(state): State<AppState>,
    Query(query): Query<MediaQuery>,
    headers: HeaderMap,
) -> CinesyncResult<Response> {
    // The MediaSource enforces the size cap on both probes and opens.
    let meta = state.media_source.metadata(&query.url).await?;

    let range = match headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        Some(value) => Some(parse_range_header(value)?),
        None => None,
    };

    if meta.needs_transcoding() {
        log::info!(
            "[Proxy] encode stream: {} ({}, {} bytes)",
            meta.name,
            meta.mime_type,
            meta.size
        );
        encode_response(&*state.transcoder, &meta, range).await
    } else {
        log::info!(
            "[Proxy] passthrough stream: {} ({}, range {:?})",
            meta.name,
            meta.mime_type,
            range
        );
        passthrough_response(Arc::clone(&state.media_source), &meta, range).await
    }
}

/// Serves upstream bytes directly, echoing the upstream's range response.
async fn passthrough_response(
    source: Arc<dyn MediaSource>,
    meta: &MediaMetadata,
    range: Option<RangeSpec>,
) -> CinesyncResult<Response> {
    let opened = source.open(&meta.id, range).await?;

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, meta.mime_type.as_str())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "no-cache");

    builder = match opened.range {
        Some(satisfied) => builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_RANGE, satisfied.content_range())
            .header(header::CONTENT_LENGTH, satisfied.len().to_string()),
        None if opened.total_size > 0 => builder
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, opened.total_size.to_string()),
        None => builder.status(StatusCode::OK),
    };

    builder
        // Dropping the body on client disconnect cancels the upstream read.
        .body(Body::from_stream(opened.stream))
        .map_err(|e| CinesyncError::Internal(e.to_string()))
}

/// Serves the shared encoder's monotonic MP4 stream. A range start of `a`
/// discards the first `a` bytes; the total length is unknowable, so the 206
/// carries a synthetic `Content-Range` with a `*` complete-length.
async fn encode_response(
    transcoder: &dyn Transcoder,
    meta: &MediaMetadata,
    range: Option<RangeSpec>,
) -> CinesyncResult<Response> {
    let start_offset = match range {
        None => 0,
        Some(spec) => spec.start().ok_or_else(|| {
            // Suffix ranges would need the final encoded length, which does
            // not exist until the encode completes.
            CinesyncError::RangeNotSatisfiable(
                "suffix ranges are not supported for transcoded media".to_string(),
            )
        })?,
    };

    let client = transcoder.attach(meta, start_offset).await?;

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, TranscodeClient::CONTENT_TYPE)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "no-cache");

    builder = if start_offset > 0 {
        builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_RANGE, synthetic_content_range(start_offset))
    } else {
        builder.status(StatusCode::OK)
    };

    builder
        // Dropping the body detaches this client without touching the
        // shared encoder.
        .body(Body::from_stream(client.into_stream()))
        .map_err(|e| CinesyncError::Internal(e.to_string()))
}

fn synthetic_content_range(start: u64) -> String {
    format!("bytes {}-{}/*", start, start + ENCODED_RANGE_SPAN - 1)
}

/// Minimal query-component escaping for the echoed stream URL.
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaResult, OpenedMedia, SatisfiedRange};
    use async_trait::async_trait;
    use bytes::Bytes;

    /// In-memory upstream serving a fixed byte blob with real range support.
    struct FakeSource {
        data: Bytes,
        mime: &'static str,
    }

    impl FakeSource {
        fn new(len: usize, mime: &'static str) -> Self {
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            Self {
                data: Bytes::from(data),
                mime,
            }
        }

        fn meta(&self) -> MediaMetadata {
            MediaMetadata {
                id: "https://blob/movie".to_string(),
                name: "movie".to_string(),
                mime_type: self.mime.to_string(),
                size: self.data.len() as u64,
            }
        }
    }

    #[async_trait]
    impl MediaSource for FakeSource {
        async fn metadata(&self, _url: &str) -> MediaResult<MediaMetadata> {
            Ok(self.meta())
        }

        async fn open(&self, _url: &str, range: Option<RangeSpec>) -> MediaResult<OpenedMedia> {
            let total = self.data.len() as u64;
            match range {
                Some(spec) => {
                    let satisfied = spec.satisfy(total)?;
                    let body = self
                        .data
                        .slice(satisfied.start as usize..=satisfied.end as usize);
                    Ok(OpenedMedia {
                        stream: Box::pin(futures::stream::once(async move { Ok(body) })),
                        range: Some(satisfied),
                        total_size: total,
                    })
                }
                None => Ok(OpenedMedia {
                    stream: Box::pin(futures::stream::once({
                        let body = self.data.clone();
                        async move { Ok(body) }
                    })),
                    range: None,
                    total_size: total,
                }),
            }
        }
    }

    async fn body_bytes(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn passthrough_range_echoes_upstream_partial() {
        // S6: first MiB of a 10 MiB object.
        let source = Arc::new(FakeSource::new(10 * 1024 * 1024, "video/mp4"));
        let meta = source.meta();
        let response = passthrough_response(
            source.clone() as Arc<dyn MediaSource>,
            &meta,
            Some(RangeSpec::Bounded(0, 1048575)),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers()[header::CONTENT_RANGE],
            "bytes 0-1048575/10485760"
        );
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "1048576");
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");

        let body = body_bytes(response).await;
        assert_eq!(body.len(), 1048576);
        assert_eq!(body, source.data.slice(..1048576));
    }

    #[tokio::test]
    async fn passthrough_without_range_is_full_200() {
        let source = Arc::new(FakeSource::new(4096, "video/webm"));
        let meta = source.meta();
        let response = passthrough_response(source as Arc<dyn MediaSource>, &meta, None)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "4096");
        assert!(response.headers().get(header::CONTENT_RANGE).is_none());
        assert_eq!(body_bytes(response).await.len(), 4096);
    }

    #[tokio::test]
    async fn passthrough_unsatisfiable_range_propagates() {
        let source = Arc::new(FakeSource::new(100, "video/mp4"));
        let meta = source.meta();
        let result = passthrough_response(
            source as Arc<dyn MediaSource>,
            &meta,
            Some(RangeSpec::From(500)),
        )
        .await;
        assert!(matches!(
            result,
            Err(CinesyncError::RangeNotSatisfiable(_))
        ));
    }

    #[test]
    fn synthetic_content_range_has_unknown_total() {
        let header = synthetic_content_range(1_000_000);
        assert!(header.starts_with("bytes 1000000-"));
        assert!(header.ends_with("/*"));
        // The satisfied SatisfiedRange form stays distinct from this one.
        let real = SatisfiedRange {
            start: 0,
            end: 9,
            total: 10,
        };
        assert_eq!(real.content_range(), "bytes 0-9/10");
    }

    #[test]
    fn urlencode_escapes_reserved_characters() {
        assert_eq!(urlencode("abc-_.~123"), "abc-_.~123");
        assert_eq!(
            urlencode("https://host/a b?c=d"),
            "https%3A%2F%2Fhost%2Fa%20b%3Fc%3Dd"
        );
    }
}
