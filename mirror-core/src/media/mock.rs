//! Synthetic encoders and capture for tests and the demo server.
//!
//! [`MockCodec`] behaves like a hardware encoder: once started it emits a
//! codec-config buffer followed by media buffers from its own OS thread,
//! through the [`CodecCallback`] bridge. Surface-input codecs (video) emit
//! frames on a timer; buffer-input codecs (audio) emit one output per
//! queued input.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{CodecError, MirrorError};
use crate::flags::BufferFlags;
use crate::media::capture::AudioCapture;
use crate::media::codec::{CodecCallback, CodecFactory, InputSurface, MediaCodec, MediaFormat, keys};
use crate::media::types::{BufferInfo, Size};
use crate::options::OptionValue;

/// Input buffers a buffer-mode mock codec exposes.
const INPUT_SLOTS: usize = 4;
const INPUT_CAPACITY: usize = 4096;
const FRAME_DURATION_US: u64 = 16_666;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Configuration / statistics ───────────────────────────────────

/// Behaviour of every codec created by a [`MockCodecFactory`].
#[derive(Debug, Clone)]
pub struct MockCodecConfig {
    /// Delay between two video frames.
    pub frame_interval: Duration,
    /// Stop emitting after this many media frames (video).
    pub max_frames: Option<usize>,
    /// Reject configurations whose larger side exceeds this.
    pub reject_above: Option<u32>,
    pub key_frame_interval: usize,
    /// Raw timestamp of the first media frame.
    pub pts_start_us: u64,
    pub frame_size: usize,
    /// Report an asynchronous I/O error after this many media frames.
    pub error_after: Option<usize>,
}

impl Default for MockCodecConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(16),
            max_frames: None,
            reject_above: None,
            key_frame_interval: 60,
            pts_start_us: 1_000_000,
            frame_size: 128,
            error_after: None,
        }
    }
}

/// Counters shared by a factory and all of its codecs.
#[derive(Debug, Default)]
pub struct MockCodecStats {
    created: AtomicUsize,
    started: AtomicUsize,
    released: AtomicUsize,
    frames: AtomicUsize,
    configured: Mutex<Vec<Size>>,
}

impl MockCodecStats {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Video frames emitted by every codec so far.
    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    /// Sizes passed to `configure`, rejected ones included.
    pub fn configured_sizes(&self) -> Vec<Size> {
        lock(&self.configured).clone()
    }
}

// ── MockCodec ────────────────────────────────────────────────────

pub struct MockCodec {
    name: String,
    mime: String,
    config: MockCodecConfig,
    stats: Arc<MockCodecStats>,
    running: Arc<AtomicBool>,
    outputs: Arc<Mutex<HashMap<usize, Bytes>>>,
    input_tx: Mutex<Option<std_mpsc::Sender<(usize, Bytes, u64)>>>,
    configured: AtomicBool,
}

impl MockCodec {
    pub fn new(name: &str, mime: &str, config: MockCodecConfig, stats: Arc<MockCodecStats>) -> Self {
        stats.created.fetch_add(1, Ordering::SeqCst);
        Self {
            name: name.to_string(),
            mime: mime.to_string(),
            config,
            stats,
            running: Arc::new(AtomicBool::new(false)),
            outputs: Arc::new(Mutex::new(HashMap::new())),
            input_tx: Mutex::new(None),
            configured: AtomicBool::new(false),
        }
    }

    fn is_audio(&self) -> bool {
        self.mime.starts_with("audio/")
    }

    fn emitter(&self, callback: CodecCallback) -> Emitter {
        Emitter {
            callback,
            outputs: Arc::clone(&self.outputs),
            running: Arc::clone(&self.running),
            next_index: 0,
        }
    }
}

/// Output side of the codec thread.
struct Emitter {
    callback: CodecCallback,
    outputs: Arc<Mutex<HashMap<usize, Bytes>>>,
    running: Arc<AtomicBool>,
    next_index: usize,
}

impl Emitter {
    fn alive(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.callback.is_closed()
    }

    fn emit(&mut self, data: Bytes, pts_us: u64, flags: BufferFlags) -> bool {
        let index = self.next_index;
        self.next_index += 1;
        let size = data.len();
        lock(&self.outputs).insert(index, data);
        self.callback.on_output_available(index, BufferInfo { pts_us, size, flags })
    }

    fn emit_config(&mut self) -> bool {
        self.emit(Bytes::from_static(&[0x00, 0x00, 0x00, 0x01, 0x67, 0x42]), 0, BufferFlags::CODEC_CONFIG)
    }
}

impl MediaCodec for MockCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&self, format: &MediaFormat) -> Result<(), CodecError> {
        if let Some(size) = format.size() {
            lock(&self.stats.configured).push(size);
            if let Some(limit) = self.config.reject_above {
                if size.max() > limit {
                    return Err(CodecError::Rejected(format!("{size} exceeds {limit}")));
                }
            }
            if size.width == 0 || size.height == 0 {
                return Err(CodecError::Rejected(format!("invalid size {size}")));
            }
        }
        match format.get(keys::MIME) {
            Some(OptionValue::String(mime)) if *mime == self.mime => {}
            _ => return Err(CodecError::Unsupported(format!("{} only encodes {}", self.name, self.mime))),
        }
        self.configured.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn create_input_surface(&self) -> Result<InputSurface, CodecError> {
        if self.is_audio() || !self.configured.load(Ordering::SeqCst) {
            return Err(CodecError::Unsupported("no input surface".into()));
        }
        Ok(InputSurface(self.stats.created() as u64))
    }

    fn start(&self, callback: CodecCallback) -> Result<(), CodecError> {
        if !self.configured.load(Ordering::SeqCst) {
            return Err(CodecError::Rejected("start before configure".into()));
        }
        self.running.store(true, Ordering::SeqCst);
        self.stats.started.fetch_add(1, Ordering::SeqCst);

        let mut emitter = self.emitter(callback);
        let config = self.config.clone();

        if self.is_audio() {
            let (tx, rx) = std_mpsc::channel::<(usize, Bytes, u64)>();
            *lock(&self.input_tx) = Some(tx);
            thread::spawn(move || {
                if !emitter.emit_config() {
                    return;
                }
                for slot in 0..INPUT_SLOTS {
                    if !emitter.callback.on_input_available(slot) {
                        return;
                    }
                }
                while emitter.alive() {
                    match rx.recv_timeout(Duration::from_millis(20)) {
                        Ok((slot, data, pts)) => {
                            let encoded = data.slice(..data.len().min(config.frame_size));
                            if !emitter.emit(encoded, pts, BufferFlags::empty())
                                || !emitter.callback.on_input_available(slot)
                            {
                                return;
                            }
                        }
                        Err(std_mpsc::RecvTimeoutError::Timeout) => {}
                        Err(std_mpsc::RecvTimeoutError::Disconnected) => return,
                    }
                }
            });
        } else {
            let stats = Arc::clone(&self.stats);
            thread::spawn(move || {
                if !emitter.emit_config() {
                    return;
                }
                let mut n = 0usize;
                while emitter.alive() && config.max_frames.is_none_or(|max| n < max) {
                    thread::sleep(config.frame_interval);
                    if !emitter.alive() {
                        return;
                    }
                    if config.error_after == Some(n) {
                        emitter
                            .callback
                            .on_error(CodecError::Io(std::io::Error::other("mock encoder failure")));
                        return;
                    }
                    let flags = if n % config.key_frame_interval.max(1) == 0 {
                        BufferFlags::KEY_FRAME
                    } else {
                        BufferFlags::empty()
                    };
                    // one clock across restarts, like a display's vsync timeline
                    let seq = stats.frames.fetch_add(1, Ordering::SeqCst);
                    let pts = config.pts_start_us + seq as u64 * FRAME_DURATION_US;
                    let data = Bytes::from(vec![(n % 251) as u8; config.frame_size]);
                    if !emitter.emit(data, pts, flags) {
                        return;
                    }
                    n += 1;
                }
            });
        }
        Ok(())
    }

    fn input_capacity(&self, index: usize) -> Result<usize, CodecError> {
        if !self.is_audio() || index >= INPUT_SLOTS {
            return Err(CodecError::InvalidBuffer(index));
        }
        Ok(INPUT_CAPACITY)
    }

    fn queue_input(&self, index: usize, data: &[u8], pts_us: u64, _flags: BufferFlags) -> Result<(), CodecError> {
        if index >= INPUT_SLOTS {
            return Err(CodecError::InvalidBuffer(index));
        }
        let tx = lock(&self.input_tx);
        let tx = tx.as_ref().ok_or(CodecError::InvalidBuffer(index))?;
        tx.send((index, Bytes::copy_from_slice(data), pts_us))
            .map_err(|_| CodecError::Io(std::io::Error::other("encoder stopped")))
    }

    fn output_buffer(&self, index: usize) -> Result<Bytes, CodecError> {
        lock(&self.outputs)
            .get(&index)
            .cloned()
            .ok_or(CodecError::InvalidBuffer(index))
    }

    fn release_output_buffer(&self, index: usize) -> Result<(), CodecError> {
        lock(&self.outputs)
            .remove(&index)
            .map(|_| ())
            .ok_or(CodecError::InvalidBuffer(index))
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        lock(&self.input_tx).take();
    }

    fn release(&self) {
        self.stop();
        lock(&self.outputs).clear();
        self.stats.released.fetch_add(1, Ordering::SeqCst);
    }
}

// ── MockCodecFactory ─────────────────────────────────────────────

/// Encoder catalogue of the synthetic device.
pub struct MockCodecFactory {
    encoders: Vec<(String, String)>,
    config: MockCodecConfig,
    stats: Arc<MockCodecStats>,
}

impl MockCodecFactory {
    pub fn new(config: MockCodecConfig) -> Self {
        let encoders = [
            ("mock.avc.encoder", "video/avc"),
            ("mock.hevc.encoder", "video/hevc"),
            ("mock.av1.encoder", "video/av01"),
            ("mock.opus.encoder", "audio/opus"),
            ("mock.aac.encoder", "audio/mp4a-latm"),
        ]
        .iter()
        .map(|(n, m)| (n.to_string(), m.to_string()))
        .collect();
        Self {
            encoders,
            config,
            stats: Arc::new(MockCodecStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<MockCodecStats> {
        Arc::clone(&self.stats)
    }

    fn create(&self, name: &str, mime: &str) -> Arc<dyn MediaCodec> {
        Arc::new(MockCodec::new(name, mime, self.config.clone(), Arc::clone(&self.stats)))
    }
}

impl Default for MockCodecFactory {
    fn default() -> Self {
        Self::new(MockCodecConfig::default())
    }
}

impl CodecFactory for MockCodecFactory {
    fn create_by_name(&self, name: &str) -> Result<Arc<dyn MediaCodec>, CodecError> {
        self.encoders
            .iter()
            .find(|(n, _)| n == name)
            .map(|(n, m)| self.create(n, m))
            .ok_or_else(|| CodecError::Unsupported(format!("no encoder named {name}")))
    }

    fn create_by_type(&self, mime: &str) -> Result<Arc<dyn MediaCodec>, CodecError> {
        self.encoders
            .iter()
            .find(|(_, m)| m == mime)
            .map(|(n, m)| self.create(n, m))
            .ok_or_else(|| CodecError::Unsupported(format!("no encoder for {mime}")))
    }

    fn list_encoders(&self, mime: &str) -> Vec<String> {
        self.encoders
            .iter()
            .filter(|(_, m)| m == mime)
            .map(|(n, _)| n.clone())
            .collect()
    }
}

// ── MockAudioCapture ─────────────────────────────────────────────

/// PCM source producing a fixed pattern at roughly real-time pace.
pub struct MockAudioCapture {
    compatible: bool,
    reads_before_eof: Option<usize>,
    block_delay: Duration,
    reads: usize,
    started: bool,
    stopped: Arc<AtomicBool>,
}

impl MockAudioCapture {
    pub fn new() -> Self {
        Self {
            compatible: true,
            reads_before_eof: None,
            block_delay: Duration::from_millis(10),
            reads: 0,
            started: false,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A capture whose platform cannot record audio.
    pub fn unsupported() -> Self {
        Self {
            compatible: false,
            ..Self::new()
        }
    }

    /// Return 0 bytes after `reads` successful reads.
    pub fn with_eof_after(mut self, reads: usize) -> Self {
        self.reads_before_eof = Some(reads);
        self
    }

    /// Flag set once `stop` has been called.
    pub fn stopped_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stopped)
    }
}

impl Default for MockAudioCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioCapture for MockAudioCapture {
    fn check_compatibility(&self) -> Result<(), MirrorError> {
        if self.compatible {
            Ok(())
        } else {
            Err(MirrorError::Unsupported("audio capture requires API 30".into()))
        }
    }

    async fn start(&mut self) -> Result<(), MirrorError> {
        self.started = true;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if !self.started {
            return Err(std::io::Error::other("capture not started"));
        }
        if self.reads_before_eof.is_some_and(|max| self.reads >= max) {
            return Ok(0);
        }
        tokio::time::sleep(self.block_delay).await;
        // 10 ms of 48 kHz stereo s16
        let len = buf.len().min(1920);
        for (i, b) in buf[..len].iter_mut().enumerate() {
            *b = (i + self.reads) as u8;
        }
        self.reads += 1;
        Ok(len)
    }

    async fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::codec::create_encoder;

    #[test]
    fn unknown_encoder_lists_available() {
        let factory = MockCodecFactory::default();
        let err = create_encoder(&factory, "video/avc", Some("bogus")).err().unwrap();
        match err {
            MirrorError::InvalidEncoder { name, available } => {
                assert_eq!(name, "bogus");
                assert_eq!(available, vec!["mock.avc.encoder".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(create_encoder(&factory, "video/avc", Some("mock.avc.encoder")).is_ok());
        assert!(create_encoder(&factory, "video/vp9", None).is_err());
    }

    #[test]
    fn rejects_sizes_above_limit() {
        let factory = MockCodecFactory::new(MockCodecConfig {
            reject_above: Some(1920),
            ..MockCodecConfig::default()
        });
        let codec = factory.create_by_type("video/avc").unwrap();
        let mut format = MediaFormat::video("video/avc", 8_000_000, 0, &[]);
        format.set_size(Size::new(1440, 2560));
        assert!(matches!(codec.configure(&format), Err(CodecError::Rejected(_))));
        format.set_size(Size::new(1080, 1920));
        assert!(codec.configure(&format).is_ok());
        assert_eq!(factory.stats().configured_sizes().len(), 2);
    }

    #[tokio::test]
    async fn capture_eof_after_reads() {
        let mut capture = MockAudioCapture::new().with_eof_after(1);
        capture.start().await.unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(capture.read(&mut buf).await.unwrap(), 64);
        assert_eq!(capture.read(&mut buf).await.unwrap(), 0);
    }
}
