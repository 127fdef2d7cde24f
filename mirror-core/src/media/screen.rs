//! Screen encoder: virtual display → hardware encoder → video channel.
//!
//! ```text
//!            ┌──────────── restart (rotation / rejected size) ───────────┐
//!            ▼                                                           │
//!   configure ──▶ bind display ──▶ start ──▶ drain output ──▶ teardown ──┘
//!                                                 │
//!                                                 └──▶ stop / EOS / error
//! ```
//!
//! Each attempt owns exactly one encoder and one virtual display, both
//! released before the next attempt creates new ones. When the encoder
//! rejects the geometry, the next attempt uses the first entry of
//! [`MAX_SIZE_FALLBACK`] smaller than the rejected size.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::device::services::{API_SECURE_DISPLAY_MAX, DisplayService, Projection, VirtualDisplay};
use crate::error::{CodecError, MirrorError};
use crate::flags::BufferFlags;
use crate::media::codec::{CodecCallback, CodecEvents, CodecFactory, MediaCodec, MediaFormat, OutputBuffer, create_encoder};
use crate::media::queue::QUEUE_CAPACITY;
use crate::media::types::{AccessUnit, Size};
use crate::options::{CodecOption, Options, VideoCodec};
use crate::stream::Streamer;
use crate::task::{AsyncProcessor, ProcessorTask, TerminationListener};

/// Maximum sizes retried, in order, when the encoder rejects a geometry.
pub const MAX_SIZE_FALLBACK: [u32; 6] = [2560, 1920, 1600, 1280, 1024, 800];

const DISPLAY_NAME: &str = "mirror";

/// The next maximum size to try after `failed_size` was rejected.
pub fn choose_max_size_fallback(failed_size: Size) -> Option<u32> {
    let current = failed_size.max();
    MAX_SIZE_FALLBACK.iter().copied().find(|&size| size < current)
}

/// Encoder settings of the video stream.
#[derive(Debug, Clone)]
pub struct VideoConfig {
    pub codec: VideoCodec,
    pub encoder_name: Option<String>,
    pub bit_rate: u32,
    pub max_fps: u16,
    pub codec_options: Vec<CodecOption>,
    /// Retry with a smaller size when the encoder rejects the current one.
    pub downsize_on_error: bool,
}

impl From<&Options> for VideoConfig {
    fn from(o: &Options) -> Self {
        Self {
            codec: o.video_codec,
            encoder_name: o.video_encoder.clone(),
            bit_rate: o.video_bit_rate,
            max_fps: o.max_fps,
            codec_options: o.video_codec_options.clone(),
            downsize_on_error: true,
        }
    }
}

// ── Attempt ──────────────────────────────────────────────────────

/// Why an encoding attempt ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Stopped,
    EndOfStream,
    Restart,
}

/// Resources of one attempt, torn down in order on drop: queues first so
/// a callback thread blocked on a full queue is released, then the
/// encoder, then the display.
struct Capture {
    events: CodecEvents,
    codec: Arc<dyn MediaCodec>,
    displays: Arc<dyn DisplayService>,
    display: VirtualDisplay,
}

impl Drop for Capture {
    fn drop(&mut self) {
        self.events.close();
        self.codec.stop();
        self.codec.release();
        self.displays.destroy_display(self.display);
    }
}

struct ScreenSession<W> {
    device: Arc<Device>,
    factory: Arc<dyn CodecFactory>,
    config: VideoConfig,
    streamer: Streamer<W>,
    rotation: watch::Receiver<u8>,
    stop: CancellationToken,
}

impl<W> ScreenSession<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn run(&mut self) -> Result<(), MirrorError> {
        let mime = self.config.codec.mime_type();
        let base_format = MediaFormat::video(mime, self.config.bit_rate, self.config.max_fps, &self.config.codec_options);

        loop {
            // changes before this point are reflected in the geometry below
            self.rotation.borrow_and_update();
            let video_size = self.device.screen_info().video_size();

            match self.encode_once(mime, &base_format, video_size).await {
                Ok(Attempt::Stopped) => return Ok(()),
                Ok(Attempt::EndOfStream) => {
                    debug!("Video encoder reached end of stream");
                    return Ok(());
                }
                Ok(Attempt::Restart) => {
                    debug!("Restarting video encoder");
                }
                Err(MirrorError::Codec(CodecError::Rejected(reason))) if self.config.downsize_on_error => {
                    warn!("Encoder rejected {video_size}: {reason}");
                    let Some(max_size) = choose_max_size_fallback(video_size) else {
                        return Err(MirrorError::FallbackExhausted {
                            last_max_size: video_size.max(),
                        });
                    };
                    info!("Retrying with max size {max_size}...");
                    self.device.set_max_size(max_size);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn encode_once(&mut self, mime: &str, base_format: &MediaFormat, video_size: Size) -> Result<Attempt, MirrorError> {
        let codec = create_encoder(self.factory.as_ref(), mime, self.config.encoder_name.as_deref())?;

        let displays = Arc::clone(&self.device.services().display);
        let secure = self.device.api_level() <= API_SECURE_DISPLAY_MAX;
        let display = match displays.create_virtual_display(DISPLAY_NAME, secure) {
            Ok(display) => display,
            Err(e) => {
                codec.release();
                return Err(e);
            }
        };

        let (callback, events) = CodecCallback::channel(QUEUE_CAPACITY);
        let mut capture = Capture {
            events,
            codec,
            displays,
            display,
        };

        let mut format = base_format.clone();
        format.set_size(video_size);
        capture.codec.configure(&format)?;

        let surface = capture.codec.create_input_surface()?;
        let screen_info = self.device.screen_info();
        let projection = Projection {
            orientation: screen_info.video_rotation(),
            content_rect: screen_info.content_rect(),
            video_rect: screen_info.unlocked_video_size().to_rect(),
            layer_stack: self.device.layer_stack(),
        };
        capture
            .displays
            .set_display_surface(capture.display, surface, &projection)?;
        capture.codec.start(callback)?;
        debug!("Video encoder started at {video_size}");

        loop {
            let output = tokio::select! {
                _ = self.stop.cancelled() => return Ok(Attempt::Stopped),
                _ = capture.events.failure.failed() => return Err(capture.events.failure.take_error()),
                changed = self.rotation.changed() => {
                    return Ok(match changed {
                        Ok(()) => Attempt::Restart,
                        // device released
                        Err(_) => Attempt::Stopped,
                    });
                }
                output = capture.events.output.take() => output,
            };
            let Some(output) = output else {
                return Err(MirrorError::ChannelClosed);
            };
            // a stalled desktop must not hold the encoder past stop
            let last = tokio::select! {
                _ = self.stop.cancelled() => return Ok(Attempt::Stopped),
                last = Self::forward(&mut self.streamer, capture.codec.as_ref(), output, video_size) => last?,
            };
            if last {
                return Ok(Attempt::EndOfStream);
            }
        }
    }

    /// Write one output buffer and give it back. Returns whether it was the
    /// last one.
    async fn forward(
        streamer: &mut Streamer<W>,
        codec: &dyn MediaCodec,
        output: OutputBuffer,
        video_size: Size,
    ) -> Result<bool, MirrorError> {
        let OutputBuffer { index, info } = output;
        let result: Result<(), MirrorError> = async {
            if info.size == 0 {
                return Ok(());
            }
            let data = codec.output_buffer(index)?;
            if !streamer.header_sent() {
                streamer.write_video_header(video_size).await?;
            }
            let unit = AccessUnit::new(data.slice(..info.size.min(data.len())), info.pts_us, info.flags);
            streamer.write_packet(&unit).await
        }
        .await;
        codec.release_output_buffer(index)?;
        result?;
        Ok(info.flags.contains(BufferFlags::END_OF_STREAM))
    }
}

async fn stream_screen<W>(mut session: ScreenSession<W>) -> Result<(), MirrorError>
where
    W: AsyncWrite + Unpin + Send,
{
    let result = session.run().await;
    if let Err(e) = &result {
        if !e.is_broken_pipe() && !session.streamer.header_sent() {
            // best effort, the desktop may already be gone
            let _ = session.streamer.write_disable_stream(true).await;
        }
    }
    result
}

// ── ScreenEncoder ────────────────────────────────────────────────

/// Video stream processor.
pub struct ScreenEncoder<W> {
    device: Arc<Device>,
    factory: Arc<dyn CodecFactory>,
    config: VideoConfig,
    streamer: Option<Streamer<W>>,
    task: ProcessorTask,
}

impl<W> ScreenEncoder<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(device: Arc<Device>, factory: Arc<dyn CodecFactory>, config: VideoConfig, streamer: Streamer<W>) -> Self {
        Self {
            device,
            factory,
            config,
            streamer: Some(streamer),
            task: ProcessorTask::new("Screen encoder"),
        }
    }
}

#[async_trait]
impl<W> AsyncProcessor for ScreenEncoder<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.task.name()
    }

    fn start(&mut self, listener: TerminationListener) {
        let Some(streamer) = self.streamer.take() else {
            warn!("Screen encoder already started");
            return;
        };
        let session = ScreenSession {
            device: Arc::clone(&self.device),
            factory: Arc::clone(&self.factory),
            config: self.config.clone(),
            streamer,
            rotation: self.device.subscribe_rotation(),
            stop: self.task.stop_token(),
        };
        self.task.spawn(stream_screen(session), listener);
    }

    fn stop(&self) {
        self.task.stop();
    }

    async fn join(&mut self) {
        self.task.join().await;
    }
}
