//! Narrow contract with the platform's hardware encoders.
//!
//! The encoder itself is a black box. The pipeline only configures it,
//! starts it, feeds it (audio) and drains it. Buffer availability is
//! reported from the platform's own thread through a [`CodecCallback`],
//! which forwards buffer indices into two bounded queues read by the
//! pipeline task.
//!
//! ```text
//!  platform thread                      pipeline task
//!  ───────────────                      ─────────────
//!  on_input_available(i)  ──queue──▶  CodecEvents::input.take()
//!  on_output_available(i) ──queue──▶  CodecEvents::output.take()
//!  on_error(e)            ──token──▶  CodecEvents::failed()
//! ```

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{CodecError, MirrorError};
use crate::flags::BufferFlags;
use crate::media::queue::{QueueConsumer, QueueProducer, task_queue};
use crate::media::types::{BufferInfo, Size};
use crate::options::{CodecOption, OptionValue};

/// Well-known format keys.
pub mod keys {
    pub const MIME: &str = "mime";
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    pub const BIT_RATE: &str = "bitrate";
    pub const FRAME_RATE: &str = "frame-rate";
    pub const I_FRAME_INTERVAL: &str = "i-frame-interval";
    pub const REPEAT_PREVIOUS_FRAME_AFTER: &str = "repeat-previous-frame-after";
    pub const MAX_FPS_TO_ENCODER: &str = "max-fps-to-encoder";
    pub const CHANNEL_COUNT: &str = "channel-count";
    pub const SAMPLE_RATE: &str = "sample-rate";
}

pub const DEFAULT_FRAME_RATE: i32 = 60;
/// Seconds between key frames.
pub const DEFAULT_I_FRAME_INTERVAL: i32 = 10;
/// Repeat the previous frame after 100 ms without screen updates.
pub const REPEAT_FRAME_DELAY_US: i64 = 100_000;

// ── MediaFormat ──────────────────────────────────────────────────

/// Ordered key/value encoder configuration.
///
/// Setting an existing key overwrites its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaFormat {
    entries: Vec<(String, OptionValue)>,
}

/// Encoders take the bit rate as a signed int. Saturates instead of wrapping.
fn bit_rate_value(bit_rate: u32) -> i32 {
    i32::try_from(bit_rate).unwrap_or(i32::MAX)
}

impl MediaFormat {
    pub fn new(mime: &str) -> Self {
        let mut format = Self::default();
        format.set(keys::MIME, OptionValue::String(mime.to_string()));
        format
    }

    /// Base video format, followed by the user codec options in order.
    pub fn video(mime: &str, bit_rate: u32, max_fps: u16, options: &[CodecOption]) -> Self {
        let mut format = Self::new(mime);
        format.set(keys::BIT_RATE, OptionValue::Int(bit_rate_value(bit_rate)));
        format.set(keys::FRAME_RATE, OptionValue::Int(DEFAULT_FRAME_RATE));
        format.set(keys::I_FRAME_INTERVAL, OptionValue::Int(DEFAULT_I_FRAME_INTERVAL));
        format.set(keys::REPEAT_PREVIOUS_FRAME_AFTER, OptionValue::Long(REPEAT_FRAME_DELAY_US));
        if max_fps > 0 {
            format.set(keys::MAX_FPS_TO_ENCODER, OptionValue::Float(max_fps as f32));
        }
        format.apply_options(options);
        format
    }

    /// Base audio format, followed by the user codec options in order.
    pub fn audio(mime: &str, bit_rate: u32, sample_rate: u32, channels: u8, options: &[CodecOption]) -> Self {
        let mut format = Self::new(mime);
        format.set(keys::BIT_RATE, OptionValue::Int(bit_rate_value(bit_rate)));
        format.set(keys::CHANNEL_COUNT, OptionValue::Int(channels as i32));
        format.set(keys::SAMPLE_RATE, OptionValue::Int(sample_rate as i32));
        format.apply_options(options);
        format
    }

    pub fn apply_options(&mut self, options: &[CodecOption]) {
        for option in options {
            tracing::debug!("Codec option set: {}={}", option.key, option.value);
            self.set(&option.key, option.value.clone());
        }
    }

    pub fn set(&mut self, key: &str, value: OptionValue) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn set_size(&mut self, size: Size) {
        self.set(keys::WIDTH, OptionValue::Int(size.width as i32));
        self.set(keys::HEIGHT, OptionValue::Int(size.height as i32));
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_int(&self, key: &str) -> Option<i32> {
        match self.get(key)? {
            OptionValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Configured frame size, when both dimensions are set.
    pub fn size(&self) -> Option<Size> {
        let w = self.get_int(keys::WIDTH)?;
        let h = self.get_int(keys::HEIGHT)?;
        Some(Size::new(w.max(0) as u32, h.max(0) as u32))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

// ── MediaCodec ───────────────────────────────────────────────────

/// Opaque handle to the surface an encoder reads its frames from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputSurface(pub u64);

/// One hardware encoder instance.
///
/// Every method may be called from the pipeline task while the platform
/// thread is delivering callbacks, so implementations are internally
/// synchronised.
pub trait MediaCodec: Send + Sync {
    fn name(&self) -> &str;

    fn configure(&self, format: &MediaFormat) -> Result<(), CodecError>;

    /// Surface-input mode (video). Valid between configure and start.
    fn create_input_surface(&self) -> Result<InputSurface, CodecError>;

    /// Start encoding; callbacks begin arriving on the platform thread.
    fn start(&self, callback: CodecCallback) -> Result<(), CodecError>;

    /// Size of the input buffer `index` (buffer-input mode only).
    fn input_capacity(&self, index: usize) -> Result<usize, CodecError>;

    fn queue_input(&self, index: usize, data: &[u8], pts_us: u64, flags: BufferFlags) -> Result<(), CodecError>;

    /// Payload of the output buffer `index`.
    fn output_buffer(&self, index: usize) -> Result<Bytes, CodecError>;

    fn release_output_buffer(&self, index: usize) -> Result<(), CodecError>;

    fn stop(&self);

    fn release(&self);
}

/// Source of encoder instances on this device.
pub trait CodecFactory: Send + Sync {
    fn create_by_name(&self, name: &str) -> Result<Arc<dyn MediaCodec>, CodecError>;

    /// Default encoder for a MIME type.
    fn create_by_type(&self, mime: &str) -> Result<Arc<dyn MediaCodec>, CodecError>;

    /// Names of every encoder handling `mime`.
    fn list_encoders(&self, mime: &str) -> Vec<String>;
}

/// Create an encoder, by name when one is requested.
///
/// An unknown name is a configuration error listing what is available.
pub fn create_encoder(
    factory: &dyn CodecFactory,
    mime: &str,
    name: Option<&str>,
) -> Result<Arc<dyn MediaCodec>, MirrorError> {
    let codec = match name {
        Some(name) => {
            let available = factory.list_encoders(mime);
            if !available.iter().any(|n| n == name) {
                return Err(MirrorError::InvalidEncoder {
                    name: name.to_string(),
                    available,
                });
            }
            factory.create_by_name(name)
        }
        None => factory.create_by_type(mime),
    }
    .map_err(|e| MirrorError::Configuration(format!("could not create {mime} encoder: {e}")))?;

    info!("Using encoder: '{}'", codec.name());
    Ok(codec)
}

// ── Callback bridge ──────────────────────────────────────────────

/// An output buffer ready to be drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputBuffer {
    pub index: usize,
    pub info: BufferInfo,
}

/// Platform-side half of the callback bridge, handed to
/// [`MediaCodec::start`].
#[derive(Clone)]
pub struct CodecCallback {
    input: QueueProducer<usize>,
    output: QueueProducer<OutputBuffer>,
    failure: CodecFailure,
}

impl CodecCallback {
    /// Create a callback and the pipeline-side events it feeds.
    pub fn channel(capacity: usize) -> (CodecCallback, CodecEvents) {
        let (input_tx, input_rx) = task_queue(capacity);
        let (output_tx, output_rx) = task_queue(capacity);
        let failure = CodecFailure::default();
        let callback = CodecCallback {
            input: input_tx,
            output: output_tx,
            failure: failure.clone(),
        };
        let events = CodecEvents {
            input: input_rx,
            output: output_rx,
            failure,
        };
        (callback, events)
    }

    /// Input buffer `index` can be filled. Blocks while the queue is full.
    ///
    /// Returns `false` once the pipeline is no longer listening.
    pub fn on_input_available(&self, index: usize) -> bool {
        self.input.blocking_push(index).is_ok()
    }

    /// Output buffer `index` is ready. Blocks while the queue is full.
    pub fn on_output_available(&self, index: usize, info: BufferInfo) -> bool {
        self.output.blocking_push(OutputBuffer { index, info }).is_ok()
    }

    /// Only the first error is kept.
    pub fn on_error(&self, error: CodecError) {
        self.failure.record(error);
    }

    pub fn is_closed(&self) -> bool {
        self.output.is_closed()
    }
}

/// Pipeline-side half of the callback bridge.
pub struct CodecEvents {
    pub input: QueueConsumer<usize>,
    pub output: QueueConsumer<OutputBuffer>,
    pub failure: CodecFailure,
}

impl CodecEvents {
    /// Close both queues, discarding anything not yet consumed.
    pub fn close(&mut self) {
        let discarded = self.input.close() + self.output.close();
        if discarded > 0 {
            tracing::debug!("Discarded {discarded} pending encoder buffers");
        }
    }
}

/// First asynchronous encoder error, shared between both halves.
#[derive(Clone, Default)]
pub struct CodecFailure {
    error: Arc<Mutex<Option<CodecError>>>,
    token: CancellationToken,
}

impl CodecFailure {
    fn record(&self, error: CodecError) {
        if let Ok(mut slot) = self.error.lock() {
            if slot.is_none() {
                warn!("Encoder error: {error}");
                *slot = Some(error);
            }
        }
        self.token.cancel();
    }

    /// Resolves once the encoder has reported an error.
    pub async fn failed(&self) {
        self.token.cancelled().await
    }

    /// The recorded error as a pipeline error.
    pub fn take_error(&self) -> MirrorError {
        let error = self.error.lock().ok().and_then(|mut slot| slot.take());
        match error {
            Some(e) => MirrorError::Codec(e),
            None => MirrorError::Codec(CodecError::Rejected("unspecified encoder failure".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_follow_base_keys_and_overwrite() {
        let options = CodecOption::parse_list("profile=8,bitrate=4000000,i-frame-interval=2").unwrap();
        let format = MediaFormat::video("video/avc", 8_000_000, 0, &options);

        assert_eq!(format.get_int(keys::BIT_RATE), Some(4_000_000));
        assert_eq!(format.get_int(keys::I_FRAME_INTERVAL), Some(2));
        assert_eq!(format.get_int("profile"), Some(8));
        assert!(format.get(keys::MAX_FPS_TO_ENCODER).is_none());

        // overwritten keys keep their original position
        let keys: Vec<&str> = format.iter().map(|(k, _)| k).collect();
        assert_eq!(keys[0], keys::MIME);
        assert_eq!(keys[1], keys::BIT_RATE);
        assert_eq!(*keys.last().unwrap(), "profile");
    }

    #[test]
    fn max_fps_only_when_set() {
        let format = MediaFormat::video("video/avc", 8_000_000, 30, &[]);
        assert_eq!(format.get(keys::MAX_FPS_TO_ENCODER), Some(&OptionValue::Float(30.0)));
    }

    #[test]
    fn audio_format_keys() {
        let format = MediaFormat::audio("audio/opus", 128_000, 48000, 2, &[]);
        assert_eq!(format.get_int(keys::SAMPLE_RATE), Some(48000));
        assert_eq!(format.get_int(keys::CHANNEL_COUNT), Some(2));
        assert_eq!(format.size(), None);
    }

    #[test]
    fn huge_bit_rate_never_turns_negative() {
        let format = MediaFormat::video("video/avc", u32::MAX, 0, &[]);
        assert_eq!(format.get_int(keys::BIT_RATE), Some(i32::MAX));
        let format = MediaFormat::audio("audio/opus", 3_000_000_000, 48000, 2, &[]);
        assert_eq!(format.get_int(keys::BIT_RATE), Some(i32::MAX));
    }

    #[tokio::test]
    async fn first_error_wins() {
        let (callback, events) = CodecCallback::channel(4);
        callback.on_error(CodecError::Rejected("too big".into()));
        callback.on_error(CodecError::Unsupported("later".into()));

        events.failure.failed().await;
        match events.failure.take_error() {
            MirrorError::Codec(CodecError::Rejected(msg)) => assert_eq!(msg, "too big"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
