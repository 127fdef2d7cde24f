//! Media pipelines: encoder contract, capture sources and the stream
//! processors built on them.

pub mod audio;
pub mod capture;
pub mod codec;
pub mod mock;
pub mod queue;
pub mod screen;
pub mod types;

pub use audio::{AudioConfig, AudioEncoder, AudioRawRecorder};
pub use capture::{AudioCapture, PcmClock};
pub use codec::{CodecCallback, CodecEvents, CodecFactory, MediaCodec, MediaFormat};
pub use screen::{ScreenEncoder, VideoConfig};
pub use types::{AccessUnit, BufferInfo, Point, Rect, Size};
