//! Process-based transcoding with multi-client fan-out.
//!
//! One encoder process serves every client watching the same media with the
//! same profile. Entries are keyed by `(media id, profile fingerprint)` and
//! ref-counted; an entry that loses its last client lingers through a grace
//! period before the encoder is stopped, which absorbs browser reconnects
//! without paying for a fresh encode.
//!
//! Lifecycle per entry: `Starting -> Running -> Draining -> Terminating ->
//! Dead`, driven by attach, detach, grace expiry, process exit, and
//! shutdown. Graceful stop closes the encoder's stdin and lets it drain;
//! a kill follows if it overstays the escalation window.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use super::{MediaError, MediaMetadata, MediaResult, MediaSource, MediaStream};

/// Output chunk size read from the encoder.
const CHUNK_SIZE: usize = 64 * 1024;

/// Fan-out buffer per client: 16 chunks of 64 KiB, about 1 MiB. A client
/// that falls further behind is detached rather than allowed to stall the
/// encoder.
const BROADCAST_CAPACITY: usize = 16;

/// Time allowed between the graceful stop signal and a forced kill.
const KILL_ESCALATION: Duration = Duration::from_secs(8);

/// Protected run time when the encoder already exited cleanly.
const CLEAN_EXIT_PROTECTED: Duration = Duration::from_secs(2);

/// Registry linger after a clean encoder exit.
const CLEAN_EXIT_GRACE: Duration = Duration::from_secs(5);

/// Heuristic stream rate used to estimate duration from size when the
/// upstream provides no duration metadata.
const ESTIMATED_BYTES_PER_SEC: u64 = 1_500_000;

/// Duration below which a video gets the short-video profile.
const SHORT_VIDEO_SECS: u64 = 10;

/// Size above which a video gets the large-input profile.
const LARGE_INPUT_BYTES: u64 = 2 * 1024 * 1024 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Profiles
// ─────────────────────────────────────────────────────────────────────────────

/// Input size class driving encoder settings and lifecycle budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    /// Estimated duration under ten seconds.
    Short,
    /// Over 2 GiB in a Matroska container.
    LargeMkv,
    /// Over 2 GiB otherwise.
    Large,
    Medium,
}

impl SizeClass {
    /// Classifies media by declared size and container.
    #[must_use]
    pub fn classify(meta: &MediaMetadata) -> Self {
        if meta.size < SHORT_VIDEO_SECS * ESTIMATED_BYTES_PER_SEC {
            Self::Short
        } else if meta.size > LARGE_INPUT_BYTES {
            if meta.is_mkv() {
                Self::LargeMkv
            } else {
                Self::Large
            }
        } else {
            Self::Medium
        }
    }

    /// Minimum encoder uptime before any teardown is considered.
    #[must_use]
    pub const fn protected_run_time(self) -> Duration {
        match self {
            Self::Short => Duration::from_secs(20),
            Self::LargeMkv => Duration::from_secs(60),
            Self::Large => Duration::from_secs(45),
            Self::Medium => Duration::from_secs(25),
        }
    }

    /// Linger after the last client detaches.
    #[must_use]
    pub const fn grace_period(self) -> Duration {
        match self {
            Self::Short => Duration::from_secs(30),
            Self::LargeMkv => Duration::from_secs(90),
            Self::Large => Duration::from_secs(60),
            Self::Medium => Duration::from_secs(25),
        }
    }
}

/// Encoder settings for one transcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeProfile {
    pub preset: &'static str,
    pub crf: u8,
    pub maxrate_kbps: u32,
    pub keyint: u32,
    pub tune_film: bool,
    pub mux_queue_size: Option<u32>,
}

impl EncodeProfile {
    /// Picks settings from the input's size class.
    #[must_use]
    pub fn select(meta: &MediaMetadata) -> Self {
        match SizeClass::classify(meta) {
            SizeClass::Short => Self {
                preset: "ultrafast",
                crf: 30,
                maxrate_kbps: 1000,
                keyint: 5,
                tune_film: false,
                mux_queue_size: None,
            },
            SizeClass::Large | SizeClass::LargeMkv => Self {
                preset: "ultrafast",
                crf: 28,
                maxrate_kbps: 3500,
                keyint: 15,
                tune_film: true,
                mux_queue_size: Some(1024),
            },
            SizeClass::Medium => Self {
                preset: "veryfast",
                crf: 26,
                maxrate_kbps: 8000,
                keyint: 15,
                tune_film: false,
                mux_queue_size: None,
            },
        }
    }

    /// Stable identity of the settings, used in the registry key.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        format!(
            "{}-crf{}-{}k-g{}{}",
            self.preset,
            self.crf,
            self.maxrate_kbps,
            self.keyint,
            if self.tune_film { "-film" } else { "" }
        )
    }

    /// Encoder arguments: stdin in, fragmented MP4 on stdout so playback can
    /// start before the encode finishes.
    #[must_use]
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            "pipe:0".into(),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            self.preset.into(),
            "-crf".into(),
            self.crf.to_string(),
            "-maxrate".into(),
            format!("{}k", self.maxrate_kbps),
            "-bufsize".into(),
            format!("{}k", self.maxrate_kbps * 2),
            "-g".into(),
            self.keyint.to_string(),
        ];
        if self.tune_film {
            args.push("-tune".into());
            args.push("film".into());
        }
        if let Some(size) = self.mux_queue_size {
            args.push("-max_muxing_queue_size".into());
            args.push(size.to_string());
        }
        args.extend(
            [
                "-c:a",
                "aac",
                "-b:a",
                "128k",
                "-movflags",
                "frag_keyframe+empty_moov+faststart",
                "-f",
                "mp4",
                "pipe:1",
            ]
            .map(String::from),
        );
        args
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle states of a transcode entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeState {
    Starting,
    Running,
    Draining,
    Terminating,
    Dead,
}

/// Registry key: one encoder per media and profile.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct TranscodeKey {
    pub media_id: String,
    pub fingerprint: String,
}

struct Lifecycle {
    state: TranscodeState,
    refcount: usize,
    grace_cancel: Option<CancellationToken>,
}

struct TranscodeEntry {
    key: TranscodeKey,
    size_class: SizeClass,
    started_at: Instant,
    bytes_out: AtomicU64,
    clean_exit: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    /// Graceful stop signal observed by the input pump and the supervisor.
    stop: CancellationToken,
    /// Fan-out sender. Taken (dropped) when the encoder's output ends so
    /// client streams terminate after draining their buffers.
    tx: Mutex<Option<broadcast::Sender<Bytes>>>,
}

impl TranscodeEntry {
    /// Attaches a client if the entry is still usable, bumping the refcount
    /// and cancelling any pending grace timer.
    fn try_attach(self: &Arc<Self>) -> Option<broadcast::Receiver<Bytes>> {
        let mut lifecycle = self.lifecycle.lock();
        if !matches!(
            lifecycle.state,
            TranscodeState::Starting | TranscodeState::Running
        ) {
            return None;
        }
        let rx = self.tx.lock().as_ref()?.subscribe();
        lifecycle.refcount += 1;
        if let Some(token) = lifecycle.grace_cancel.take() {
            token.cancel();
        }
        log::debug!(
            "[Transcode {}] client attached (refcount {})",
            self.key.media_id,
            lifecycle.refcount
        );
        Some(rx)
    }

    /// Detaches a client; the last one out arms the grace timer.
    fn detach(self: &Arc<Self>) {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.refcount = lifecycle.refcount.saturating_sub(1);
        log::debug!(
            "[Transcode {}] client detached (refcount {})",
            self.key.media_id,
            lifecycle.refcount
        );
        if lifecycle.refcount == 0
            && matches!(
                lifecycle.state,
                TranscodeState::Starting | TranscodeState::Running
            )
            && lifecycle.grace_cancel.is_none()
        {
            let token = CancellationToken::new();
            lifecycle.grace_cancel = Some(token.clone());
            let entry = Arc::clone(self);
            tokio::spawn(async move { entry.grace_task(token).await });
        }
    }

    /// Waits out the grace period (bounded below by the protected run time),
    /// then requests a drain unless a client re-attached.
    async fn grace_task(self: Arc<Self>, cancel: CancellationToken) {
        let clean = self.clean_exit.load(Ordering::SeqCst);
        let protected = if clean {
            CLEAN_EXIT_PROTECTED
        } else {
            self.size_class.protected_run_time()
        };
        let grace = if clean {
            CLEAN_EXIT_GRACE
        } else {
            self.size_class.grace_period()
        };
        let deadline = (Instant::now() + grace).max(self.started_at + protected);

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            _ = cancel.cancelled() => return,
        }

        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.refcount == 0
            && matches!(
                lifecycle.state,
                TranscodeState::Starting | TranscodeState::Running
            )
        {
            lifecycle.state = TranscodeState::Draining;
            lifecycle.grace_cancel = None;
            drop(lifecycle);
            log::info!(
                "[Transcode {}] grace elapsed, draining encoder",
                self.key.media_id
            );
            self.stop.cancel();
        }
    }

    fn mark_running(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == TranscodeState::Starting {
            lifecycle.state = TranscodeState::Running;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client handle
// ─────────────────────────────────────────────────────────────────────────────

/// RAII detach: dropping the client stream decrements the entry refcount.
struct DetachGuard {
    entry: Arc<TranscodeEntry>,
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        self.entry.detach();
    }
}

/// One client's view of an encode.
pub struct TranscodeClient {
    rx: broadcast::Receiver<Bytes>,
    guard: DetachGuard,
    skip: u64,
}

impl TranscodeClient {
    /// Output container type. The pipeline always produces fragmented MP4.
    pub const CONTENT_TYPE: &'static str = "video/mp4";

    /// Consumes the client into a byte stream for the HTTP body.
    ///
    /// The first `skip` bytes of received output are discarded, serving
    /// seek-style range requests against the monotonic encoded stream. A
    /// client that lags past its fan-out buffer ends with an error, which
    /// detaches it without touching the encoder.
    #[must_use]
    pub fn into_stream(self) -> MediaStream {
        let guard = self.guard;
        let mut skip = self.skip;
        Box::pin(BroadcastStream::new(self.rx).filter_map(move |item| {
            let _held = &guard;
            let out = match item {
                Ok(chunk) => apply_skip(&mut skip, chunk).map(Ok),
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    log::warn!("[Transcode] client lagged by {n} chunks, detaching");
                    Some(Err(io::Error::new(
                        io::ErrorKind::Other,
                        format!("client lagged by {n} chunks"),
                    )))
                }
            };
            futures::future::ready(out)
        }))
    }
}

/// Drops the prefix of the stream covered by `skip`, slicing the chunk that
/// straddles the boundary.
fn apply_skip(skip: &mut u64, chunk: Bytes) -> Option<Bytes> {
    if *skip == 0 {
        return Some(chunk);
    }
    let len = chunk.len() as u64;
    if len <= *skip {
        *skip -= len;
        None
    } else {
        let at = *skip as usize;
        *skip = 0;
        Some(chunk.slice(at..))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transcoder
// ─────────────────────────────────────────────────────────────────────────────

/// Shared-encoder transcoding interface.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Attaches a client to the encode for `meta`, starting an encoder when
    /// none is live. `start_offset` bytes of encoded output are discarded
    /// for the attaching client.
    async fn attach(&self, meta: &MediaMetadata, start_offset: u64)
        -> MediaResult<TranscodeClient>;

    /// Signals every encoder to stop. Protected run times are waived; the
    /// kill escalation still applies.
    fn shutdown(&self);
}

struct TranscoderInner {
    entries: Mutex<HashMap<TranscodeKey, Arc<TranscodeEntry>>>,
}

/// Default [`Transcoder`] spawning an `ffmpeg` child per entry.
pub struct FfmpegTranscoder {
    inner: Arc<TranscoderInner>,
    source: Arc<dyn MediaSource>,
    ffmpeg_bin: String,
    shutdown: CancellationToken,
}

impl FfmpegTranscoder {
    /// Creates a transcoder reading input through `source`.
    pub fn new(source: Arc<dyn MediaSource>) -> Self {
        Self {
            inner: Arc::new(TranscoderInner {
                entries: Mutex::new(HashMap::new()),
            }),
            source,
            ffmpeg_bin: "ffmpeg".to_string(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Number of live entries, for diagnostics.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.inner.entries.lock().len()
    }

    fn spawn_entry(&self, meta: &MediaMetadata, profile: &EncodeProfile, key: TranscodeKey)
        -> MediaResult<Arc<TranscodeEntry>> {
        let mut command = Command::new(&self.ffmpeg_bin);
        command
            .args(profile.ffmpeg_args())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| MediaError::Transcode(format!("failed to spawn encoder: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::Transcode("encoder stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::Transcode("encoder stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::Transcode("encoder stderr unavailable".to_string()))?;

        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let entry = Arc::new(TranscodeEntry {
            key: key.clone(),
            size_class: SizeClass::classify(meta),
            started_at: Instant::now(),
            bytes_out: AtomicU64::new(0),
            clean_exit: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle {
                state: TranscodeState::Starting,
                refcount: 0,
                grace_cancel: None,
            }),
            stop: CancellationToken::new(),
            tx: Mutex::new(Some(tx)),
        });

        log::info!(
            "[Transcode {}] starting encoder ({:?}, {})",
            key.media_id,
            entry.size_class,
            key.fingerprint
        );

        tokio::spawn(input_pump(
            Arc::clone(&self.source),
            meta.id.clone(),
            stdin,
            entry.stop.clone(),
        ));
        tokio::spawn(output_pump(Arc::clone(&entry), stdout));
        tokio::spawn(stderr_logger(key.media_id.clone(), stderr));
        tokio::spawn(supervise(
            Arc::clone(&self.inner),
            Arc::clone(&entry),
            child,
        ));

        Ok(entry)
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn attach(
        &self,
        meta: &MediaMetadata,
        start_offset: u64,
    ) -> MediaResult<TranscodeClient> {
        if self.shutdown.is_cancelled() {
            return Err(MediaError::Transcode("transcoder shutting down".to_string()));
        }
        let profile = EncodeProfile::select(meta);
        let key = TranscodeKey {
            media_id: meta.id.clone(),
            fingerprint: profile.fingerprint(),
        };

        let mut entries = self.inner.entries.lock();
        if let Some(entry) = entries.get(&key) {
            if let Some(rx) = entry.try_attach() {
                // Bytes emitted before this attach cannot be replayed; the
                // skip covers whatever remains of the requested offset.
                let skip = start_offset.saturating_sub(entry.bytes_out.load(Ordering::SeqCst));
                return Ok(TranscodeClient {
                    rx,
                    guard: DetachGuard {
                        entry: Arc::clone(entry),
                    },
                    skip,
                });
            }
        }

        // No entry, or a dead one: allocate a replacement in place.
        let entry = self.spawn_entry(meta, &profile, key.clone())?;
        let rx = entry
            .try_attach()
            .ok_or_else(|| MediaError::Transcode("encoder refused attach".to_string()))?;
        entries.insert(key, Arc::clone(&entry));
        Ok(TranscodeClient {
            rx,
            guard: DetachGuard { entry },
            skip: start_offset,
        })
    }

    fn shutdown(&self) {
        self.shutdown.cancel();
        let entries = self.inner.entries.lock();
        log::info!("[Transcode] shutdown: stopping {} encoder(s)", entries.len());
        for entry in entries.values() {
            let mut lifecycle = entry.lifecycle.lock();
            if matches!(
                lifecycle.state,
                TranscodeState::Starting | TranscodeState::Running
            ) {
                lifecycle.state = TranscodeState::Draining;
            }
            if let Some(token) = lifecycle.grace_cancel.take() {
                token.cancel();
            }
            drop(lifecycle);
            entry.stop.cancel();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pump tasks
// ─────────────────────────────────────────────────────────────────────────────

/// Copies upstream bytes into the encoder's stdin. Dropping stdin on exit
/// signals EOF, which is also how a graceful stop begins.
async fn input_pump(
    source: Arc<dyn MediaSource>,
    media_id: String,
    mut stdin: tokio::process::ChildStdin,
    stop: CancellationToken,
) {
    let opened = match source.open(&media_id, None).await {
        Ok(opened) => opened,
        Err(e) => {
            log::warn!("[Transcode {}] upstream open failed: {}", media_id, e);
            return;
        }
    };
    let mut stream = opened.stream;
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    if stdin.write_all(&bytes).await.is_err() {
                        // Encoder went away; its exit path handles cleanup.
                        break;
                    }
                }
                Some(Err(e)) => {
                    log::warn!("[Transcode {}] upstream read failed: {}", media_id, e);
                    break;
                }
                None => break,
            },
        }
    }
    let _ = stdin.shutdown().await;
}

/// Fans encoder output out to attached clients.
async fn output_pump(entry: Arc<TranscodeEntry>, mut stdout: tokio::process::ChildStdout) {
    let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
    loop {
        buf.reserve(CHUNK_SIZE);
        match stdout.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                entry.mark_running();
                entry.bytes_out.fetch_add(n as u64, Ordering::SeqCst);
                let chunk = buf.split().freeze();
                match entry.tx.lock().as_ref() {
                    // A send error only means no client is attached right now.
                    Some(tx) => {
                        let _ = tx.send(chunk);
                    }
                    None => break,
                }
            }
            Err(e) => {
                log::warn!("[Transcode {}] output read failed: {}", entry.key.media_id, e);
                break;
            }
        }
    }
    // Ends every client stream once their buffers drain.
    entry.tx.lock().take();
    log::debug!(
        "[Transcode {}] output ended after {} bytes",
        entry.key.media_id,
        entry.bytes_out.load(Ordering::SeqCst)
    );
}

/// Surfaces encoder diagnostics in our logs.
async fn stderr_logger(media_id: String, stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log::debug!("[Transcode {}] ffmpeg: {}", media_id, line);
    }
}

/// Owns the child process: waits for exit, escalates a graceful stop to a
/// kill, and retires the registry entry.
async fn supervise(
    inner: Arc<TranscoderInner>,
    entry: Arc<TranscodeEntry>,
    mut child: tokio::process::Child,
) {
    let first = tokio::select! {
        status = child.wait() => Some(status),
        _ = entry.stop.cancelled() => None,
    };

    let status = match first {
        Some(status) => status,
        None => {
            // Drain requested: stdin is closing via the input pump. Give the
            // encoder the escalation window to flush, then kill it.
            match tokio::time::timeout(KILL_ESCALATION, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    entry.lifecycle.lock().state = TranscodeState::Terminating;
                    log::warn!(
                        "[Transcode {}] encoder ignored drain, killing",
                        entry.key.media_id
                    );
                    let _ = child.kill().await;
                    child.wait().await
                }
            }
        }
    };

    let clean = matches!(&status, Ok(s) if s.success());
    entry.clean_exit.store(clean, Ordering::SeqCst);
    match &status {
        Ok(s) => log::info!(
            "[Transcode {}] encoder exited ({})",
            entry.key.media_id,
            s
        ),
        Err(e) => log::warn!(
            "[Transcode {}] encoder wait failed: {}",
            entry.key.media_id,
            e
        ),
    }

    // End client streams and block further attaches to this entry.
    entry.tx.lock().take();
    {
        let mut lifecycle = entry.lifecycle.lock();
        lifecycle.state = TranscodeState::Dead;
        if let Some(token) = lifecycle.grace_cancel.take() {
            token.cancel();
        }
    }

    // Clean exits linger in the registry briefly so the attach path observes
    // the finished entry (and replaces it in place) instead of racing the
    // removal; failures are dropped immediately so the next open re-allocates.
    if clean {
        let linger = (entry.started_at + CLEAN_EXIT_PROTECTED)
            .max(Instant::now() + CLEAN_EXIT_GRACE);
        tokio::time::sleep_until(linger).await;
    }
    let mut entries = inner.entries.lock();
    if let Some(current) = entries.get(&entry.key) {
        if Arc::ptr_eq(current, &entry) {
            entries.remove(&entry.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(size: u64, name: &str, mime: &str) -> MediaMetadata {
        MediaMetadata {
            id: "u".into(),
            name: name.into(),
            mime_type: mime.into(),
            size,
        }
    }

    #[test]
    fn size_classification_tiers() {
        assert_eq!(
            SizeClass::classify(&meta(5 * 1024 * 1024, "clip.avi", "video/x-msvideo")),
            SizeClass::Short
        );
        assert_eq!(
            SizeClass::classify(&meta(500 * 1024 * 1024, "film.avi", "video/x-msvideo")),
            SizeClass::Medium
        );
        assert_eq!(
            SizeClass::classify(&meta(3 * 1024 * 1024 * 1024, "film.avi", "video/x-msvideo")),
            SizeClass::Large
        );
        assert_eq!(
            SizeClass::classify(&meta(3 * 1024 * 1024 * 1024, "film.mkv", "video/x-matroska")),
            SizeClass::LargeMkv
        );
    }

    #[test]
    fn lifecycle_budgets_scale_with_size() {
        assert_eq!(SizeClass::Short.protected_run_time(), Duration::from_secs(20));
        assert_eq!(SizeClass::LargeMkv.protected_run_time(), Duration::from_secs(60));
        assert_eq!(SizeClass::Large.grace_period(), Duration::from_secs(60));
        assert_eq!(SizeClass::LargeMkv.grace_period(), Duration::from_secs(90));
        assert_eq!(SizeClass::Medium.grace_period(), Duration::from_secs(25));
    }

    #[test]
    fn profile_selection_matches_tiers() {
        let short = EncodeProfile::select(&meta(1024 * 1024, "c.avi", "video/x-msvideo"));
        assert_eq!(short.preset, "ultrafast");
        assert_eq!(short.crf, 30);
        assert_eq!(short.keyint, 5);

        let medium = EncodeProfile::select(&meta(500 * 1024 * 1024, "f.avi", "video/x-msvideo"));
        assert_eq!(medium.preset, "veryfast");
        assert_eq!(medium.crf, 26);
        assert_eq!(medium.maxrate_kbps, 8000);
        assert!(!medium.tune_film);

        let large = EncodeProfile::select(&meta(
            3 * 1024 * 1024 * 1024,
            "f.mkv",
            "video/x-matroska",
        ));
        assert_eq!(large.preset, "ultrafast");
        assert!(large.tune_film);
        assert_eq!(large.mux_queue_size, Some(1024));
    }

    #[test]
    fn fingerprint_distinguishes_profiles() {
        let a = EncodeProfile::select(&meta(1024, "a.avi", "video/x-msvideo")).fingerprint();
        let b = EncodeProfile::select(&meta(500 * 1024 * 1024, "b.avi", "video/x-msvideo"))
            .fingerprint();
        assert_ne!(a, b);
        // Same inputs, same fingerprint
        let c = EncodeProfile::select(&meta(1024, "a.avi", "video/x-msvideo")).fingerprint();
        assert_eq!(a, c);
    }

    #[test]
    fn args_always_produce_fragmented_mp4() {
        for size in [1024, 500 * 1024 * 1024, 3 * 1024 * 1024 * 1024] {
            let args = EncodeProfile::select(&meta(size, "f.avi", "video/x-msvideo")).ffmpeg_args();
            let joined = args.join(" ");
            assert!(joined.contains("-movflags frag_keyframe+empty_moov+faststart"));
            assert!(joined.contains("-i pipe:0"));
            assert!(joined.ends_with("-f mp4 pipe:1"));
        }
    }

    #[test]
    fn skip_discards_exact_prefix() {
        let mut skip = 10u64;
        assert!(apply_skip(&mut skip, Bytes::from_static(b"1234")).is_none());
        assert_eq!(skip, 6);
        assert!(apply_skip(&mut skip, Bytes::from_static(b"123456")).is_none());
        assert_eq!(skip, 0);
        assert_eq!(
            apply_skip(&mut skip, Bytes::from_static(b"abc")).unwrap(),
            Bytes::from_static(b"abc")
        );

        let mut skip = 2u64;
        assert_eq!(
            apply_skip(&mut skip, Bytes::from_static(b"abcdef")).unwrap(),
            Bytes::from_static(b"cdef")
        );
        assert_eq!(skip, 0);
    }
}
