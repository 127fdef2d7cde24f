//! Audio stream processors.
//!
//! [`AudioEncoder`] feeds captured PCM to a hardware encoder through two
//! loops bridged by the codec callback queues:
//!
//! ```text
//!   input queue ──▶ capture.read ──▶ codec.queue_input
//!   output queue ──▶ streamer.write_packet ──▶ codec.release_output_buffer
//! ```
//!
//! [`AudioRawRecorder`] skips the encoder and streams PCM blocks as they
//! are read.
//!
//! When the platform cannot capture audio, the desktop is told the stream
//! is disabled and the processor ends without a fatal error.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::MirrorError;
use crate::flags::BufferFlags;
use crate::media::capture::{AudioCapture, PCM_FRAME_SIZE, PcmClock};
use crate::media::codec::{CodecCallback, CodecFactory, MediaCodec, MediaFormat, OutputBuffer, create_encoder};
use crate::media::queue::{QUEUE_CAPACITY, QueueConsumer};
use crate::media::types::AccessUnit;
use crate::options::{AudioCodec, CodecOption, Options};
use crate::stream::{AUDIO_CHANNELS, AUDIO_SAMPLE_RATE, Streamer};
use crate::task::{AsyncProcessor, ProcessorTask, TerminationListener};

/// PCM bytes per raw packet.
const RAW_READ_SIZE: usize = 1024 * PCM_FRAME_SIZE as usize;

/// Encoder settings of the audio stream.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub codec: AudioCodec,
    pub encoder_name: Option<String>,
    pub bit_rate: u32,
    pub codec_options: Vec<CodecOption>,
}

impl From<&Options> for AudioConfig {
    fn from(o: &Options) -> Self {
        Self {
            codec: o.audio_codec,
            encoder_name: o.audio_encoder.clone(),
            bit_rate: o.audio_bit_rate,
            codec_options: o.audio_codec_options.clone(),
        }
    }
}

fn read_failed(n: usize) -> MirrorError {
    io::Error::other(format!("could not read audio: {n}")).into()
}

/// Disable the stream when the platform cannot capture audio.
async fn disable_if_incompatible<W>(check: Result<(), MirrorError>, streamer: &mut Streamer<W>) -> Result<(), MirrorError>
where
    W: AsyncWrite + Unpin + Send,
{
    if let Err(e) = check {
        warn!("Audio disabled: {e}");
        let unsupported = matches!(e, MirrorError::Unsupported(_));
        streamer.write_disable_stream(!unsupported).await?;
        return Err(e);
    }
    Ok(())
}

// ── Encoder loops ────────────────────────────────────────────────

async fn input_loop(
    codec: &dyn MediaCodec,
    capture: &mut dyn AudioCapture,
    input: &mut QueueConsumer<usize>,
) -> Result<(), MirrorError> {
    let mut clock = PcmClock::default();
    let mut buf = Vec::new();
    while let Some(index) = input.take().await {
        let capacity = codec.input_capacity(index)?;
        buf.resize(capacity, 0);
        let n = capture.read(&mut buf).await?;
        if n == 0 {
            return Err(read_failed(n));
        }
        let pts = clock.advance(n);
        codec.queue_input(index, &buf[..n], pts, BufferFlags::empty())?;
    }
    Err(MirrorError::ChannelClosed)
}

async fn output_loop<W>(
    codec: &dyn MediaCodec,
    streamer: &mut Streamer<W>,
    output: &mut QueueConsumer<OutputBuffer>,
) -> Result<(), MirrorError>
where
    W: AsyncWrite + Unpin + Send,
{
    streamer.write_audio_header().await?;
    while let Some(OutputBuffer { index, info }) = output.take().await {
        let result = match codec.output_buffer(index) {
            Ok(_) if info.size == 0 => Ok(()),
            Ok(data) => {
                let unit = AccessUnit::new(data.slice(..info.size.min(data.len())), info.pts_us, info.flags);
                streamer.write_packet(&unit).await
            }
            Err(e) => Err(e.into()),
        };
        codec.release_output_buffer(index)?;
        result?;
        if info.flags.contains(BufferFlags::END_OF_STREAM) {
            debug!("Audio encoder reached end of stream");
            return Ok(());
        }
    }
    Err(MirrorError::ChannelClosed)
}

struct AudioSession<W> {
    capture: Box<dyn AudioCapture>,
    factory: Arc<dyn CodecFactory>,
    config: AudioConfig,
    streamer: Streamer<W>,
    stop: CancellationToken,
}

async fn encode_audio<W>(session: AudioSession<W>) -> Result<(), MirrorError>
where
    W: AsyncWrite + Unpin + Send,
{
    let AudioSession {
        mut capture,
        factory,
        config,
        mut streamer,
        stop,
    } = session;

    disable_if_incompatible(capture.check_compatibility(), &mut streamer).await?;

    let mime = config.codec.mime_type();
    let codec = match create_encoder(factory.as_ref(), mime, config.encoder_name.as_deref()) {
        Ok(codec) => codec,
        Err(e) => {
            let _ = streamer.write_disable_stream(true).await;
            return Err(e);
        }
    };

    let format = MediaFormat::audio(
        mime,
        config.bit_rate,
        AUDIO_SAMPLE_RATE,
        AUDIO_CHANNELS,
        &config.codec_options,
    );
    let (callback, mut events) = CodecCallback::channel(QUEUE_CAPACITY);

    let result: Result<(), MirrorError> = async {
        let setup: Result<(), MirrorError> = async {
            codec.configure(&format)?;
            capture.start().await?;
            codec.start(callback)?;
            Ok(())
        }
        .await;
        if let Err(e) = setup {
            let _ = streamer.write_disable_stream(true).await;
            return Err(e);
        }

        let failure = events.failure.clone();
        tokio::select! {
            _ = stop.cancelled() => Ok(()),
            _ = failure.failed() => Err(failure.take_error()),
            r = input_loop(codec.as_ref(), capture.as_mut(), &mut events.input) => r,
            r = output_loop(codec.as_ref(), &mut streamer, &mut events.output) => r,
        }
    }
    .await;

    events.close();
    codec.stop();
    codec.release();
    capture.stop().await;
    result
}

async fn record_raw<W>(
    mut capture: Box<dyn AudioCapture>,
    mut streamer: Streamer<W>,
    stop: CancellationToken,
) -> Result<(), MirrorError>
where
    W: AsyncWrite + Unpin + Send,
{
    disable_if_incompatible(capture.check_compatibility(), &mut streamer).await?;
    if let Err(e) = capture.start().await {
        let _ = streamer.write_disable_stream(true).await;
        return Err(e);
    }

    let result: Result<(), MirrorError> = async {
        streamer.write_audio_header().await?;
        let mut clock = PcmClock::default();
        let mut buf = vec![0u8; RAW_READ_SIZE];
        loop {
            let n = tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                n = capture.read(&mut buf) => n?,
            };
            if n == 0 {
                return Err(read_failed(n));
            }
            let pts = clock.advance(n);
            let unit = AccessUnit::new(Bytes::copy_from_slice(&buf[..n]), pts, BufferFlags::empty());
            tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                written = streamer.write_packet(&unit) => written?,
            }
        }
    }
    .await;

    capture.stop().await;
    result
}

// ── AudioEncoder ─────────────────────────────────────────────────

/// Encoded audio stream processor (Opus, AAC).
pub struct AudioEncoder<W> {
    capture: Option<Box<dyn AudioCapture>>,
    factory: Arc<dyn CodecFactory>,
    config: AudioConfig,
    streamer: Option<Streamer<W>>,
    task: ProcessorTask,
}

impl<W> AudioEncoder<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        capture: Box<dyn AudioCapture>,
        factory: Arc<dyn CodecFactory>,
        config: AudioConfig,
        streamer: Streamer<W>,
    ) -> Self {
        Self {
            capture: Some(capture),
            factory,
            config,
            streamer: Some(streamer),
            task: ProcessorTask::new("Audio encoder"),
        }
    }
}

#[async_trait]
impl<W> AsyncProcessor for AudioEncoder<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.task.name()
    }

    fn start(&mut self, listener: TerminationListener) {
        let (Some(capture), Some(streamer)) = (self.capture.take(), self.streamer.take()) else {
            warn!("Audio encoder already started");
            return;
        };
        let session = AudioSession {
            capture,
            factory: Arc::clone(&self.factory),
            config: self.config.clone(),
            streamer,
            stop: self.task.stop_token(),
        };
        self.task.spawn(encode_audio(session), listener);
    }

    fn stop(&self) {
        self.task.stop();
    }

    async fn join(&mut self) {
        self.task.join().await;
    }
}

// ── AudioRawRecorder ─────────────────────────────────────────────

/// Uncompressed PCM stream processor.
pub struct AudioRawRecorder<W> {
    capture: Option<Box<dyn AudioCapture>>,
    streamer: Option<Streamer<W>>,
    task: ProcessorTask,
}

impl<W> AudioRawRecorder<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(capture: Box<dyn AudioCapture>, streamer: Streamer<W>) -> Self {
        Self {
            capture: Some(capture),
            streamer: Some(streamer),
            task: ProcessorTask::new("Audio recorder"),
        }
    }
}

#[async_trait]
impl<W> AsyncProcessor for AudioRawRecorder<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.task.name()
    }

    fn start(&mut self, listener: TerminationListener) {
        let (Some(capture), Some(streamer)) = (self.capture.take(), self.streamer.take()) else {
            warn!("Audio recorder already started");
            return;
        };
        self.task
            .spawn(record_raw(capture, streamer, self.task.stop_token()), listener);
    }

    fn stop(&self) {
        self.task.stop();
    }

    async fn join(&mut self) {
        self.task.join().await;
    }
}
