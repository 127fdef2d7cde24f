//! Audio capture source contract.
//!
//! Every source delivers 48 kHz stereo signed 16-bit PCM. Presentation
//! timestamps are derived from the number of bytes read so far, see
//! [`PcmClock`].

use async_trait::async_trait;

use crate::error::MirrorError;
use crate::stream::{AUDIO_BYTES_PER_SAMPLE, AUDIO_CHANNELS, AUDIO_SAMPLE_RATE};

/// Bytes of one PCM frame (all channels of one sample).
pub const PCM_FRAME_SIZE: u32 = AUDIO_CHANNELS as u32 * AUDIO_BYTES_PER_SAMPLE;

/// Microphone or playback capture.
#[async_trait]
pub trait AudioCapture: Send {
    /// Fails with [`MirrorError::Unsupported`] when this platform version
    /// cannot capture audio at all.
    fn check_compatibility(&self) -> Result<(), MirrorError>;

    async fn start(&mut self) -> Result<(), MirrorError>;

    /// Read up to `buf.len()` bytes of PCM. Returns the number of bytes read.
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    async fn stop(&mut self);
}

/// Running presentation clock for a PCM byte stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct PcmClock {
    bytes: u64,
}

impl PcmClock {
    /// Timestamp of the next block, then advance past `len` bytes.
    pub fn advance(&mut self, len: usize) -> u64 {
        let pts = self.pts_us();
        self.bytes += len as u64;
        pts
    }

    pub fn pts_us(&self) -> u64 {
        let frames = self.bytes / PCM_FRAME_SIZE as u64;
        frames * 1_000_000 / AUDIO_SAMPLE_RATE as u64
    }
}
