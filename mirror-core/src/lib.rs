//! # mirror-core
//!
//! Device-side core of a screen mirroring server: captures the screen and
//! audio, encodes them through the platform's hardware encoders, streams
//! them to a desktop client over local sockets, and injects the input
//! events the desktop sends back.
//!
//! This crate contains:
//! - **Media**: `ScreenEncoder`, `AudioEncoder`, `AudioRawRecorder` and the
//!   `MediaCodec` / `AudioCapture` contracts they drive
//! - **Stream**: `Streamer`, the per-channel packet framer
//! - **Network**: `DesktopConnection` over up to three Unix sockets
//! - **Control**: control-message codecs, `Controller`, `DeviceMessageSender`
//! - **Device**: `Device` facade over the `Services` capability context
//! - **Task**: `AsyncProcessor` contract and the `Completion` barrier
//! - **Server**: `Server`, one mirroring session end to end
//! - **Error**: `MirrorError`, `CodecError`, `ProtocolError`

pub mod control;
pub mod device;
pub mod error;
pub mod flags;
pub mod media;
pub mod network;
pub mod options;
pub mod server;
pub mod stream;
pub mod task;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use control::{ControlMessage, ControlMessageCodec, Controller, DeviceMessage, DeviceMessageCodec, DeviceMessageSender};
pub use device::Device;
pub use device::services::Services;
pub use error::{CodecError, MirrorError, ProtocolError};
pub use flags::BufferFlags;
pub use media::{AudioCapture, AudioEncoder, AudioRawRecorder, CodecFactory, MediaCodec, ScreenEncoder};
pub use network::{ConnectionOptions, DesktopConnection};
pub use options::{AudioCodec, CodecOption, LockOrientation, Options, VideoCodec};
pub use server::Server;
pub use stream::Streamer;
pub use task::{AsyncProcessor, Completion, ProcessorTask};
