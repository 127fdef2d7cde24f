//! Mirroring session: wires the device, the desktop connection and one
//! processor per enabled channel.
//!
//! ```text
//!   Device::new ──▶ DesktopConnection::open ──▶ device meta
//!        │
//!        ▼
//!   start { Controller, audio processor, ScreenEncoder } ──▶ Completion::wait
//!        │
//!        ▼
//!   stop all ──▶ shutdown sockets ──▶ join all ──▶ close ──▶ Device::release
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::control::Controller;
use crate::device::Device;
use crate::device::services::Services;
use crate::error::MirrorError;
use crate::media::audio::{AudioConfig, AudioEncoder, AudioRawRecorder};
use crate::media::capture::AudioCapture;
use crate::media::codec::CodecFactory;
use crate::media::screen::{ScreenEncoder, VideoConfig};
use crate::network::{ConnectionOptions, DesktopConnection};
use crate::options::{AudioCodec, Options};
use crate::stream::Streamer;
use crate::task::{AsyncProcessor, Completion};

/// One mirroring session over the platform collaborators.
pub struct Server {
    options: Options,
    services: Services,
    codecs: Arc<dyn CodecFactory>,
    audio_capture: Option<Box<dyn AudioCapture>>,
    stop: CancellationToken,
}

impl Server {
    pub fn new(
        options: Options,
        services: Services,
        codecs: Arc<dyn CodecFactory>,
        audio_capture: Box<dyn AudioCapture>,
    ) -> Self {
        Self {
            options,
            services,
            codecs,
            audio_capture: Some(audio_capture),
            stop: CancellationToken::new(),
        }
    }

    /// Cancelling the returned token ends the session as if the processors
    /// had all terminated.
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Run the session to completion.
    ///
    /// Returns [`MirrorError::SessionFailed`] when a processor terminated
    /// with a fatal error.
    pub async fn run(self) -> Result<(), MirrorError> {
        let Server {
            options,
            services,
            codecs,
            audio_capture,
            stop,
        } = self;

        let device = Device::new(&options, services)?;
        let result = Session {
            options: &options,
            device: &device,
            codecs,
            audio_capture,
            stop,
        }
        .run()
        .await;
        device.release();
        result
    }
}

struct Session<'a> {
    options: &'a Options,
    device: &'a Arc<Device>,
    codecs: Arc<dyn CodecFactory>,
    audio_capture: Option<Box<dyn AudioCapture>>,
    stop: CancellationToken,
}

impl Session<'_> {
    async fn run(mut self) -> Result<(), MirrorError> {
        let connection_options = ConnectionOptions::from(self.options);
        let mut connection = tokio::select! {
            _ = self.stop.cancelled() => {
                info!("Stopped before the desktop connected");
                return Ok(());
            }
            connection = DesktopConnection::open(&connection_options) => connection?,
        };

        if self.options.send_device_meta {
            let name = self.device.services().device_name.clone();
            connection.send_device_meta(&name).await?;
        }

        let mut processors = self.processors(&mut connection)?;
        let completion = Completion::new(processors.len());
        for processor in &mut processors {
            debug!("Starting {}", processor.name());
            processor.start(completion.listener());
        }

        let fatal = tokio::select! {
            fatal = completion.wait() => fatal,
            _ = self.stop.cancelled() => {
                info!("Stop requested");
                false
            }
        };

        for processor in &processors {
            processor.stop();
        }
        connection.shutdown();
        for processor in &mut processors {
            processor.join().await;
        }
        connection.close();

        if fatal || completion.is_fatal() {
            return Err(MirrorError::SessionFailed);
        }
        info!("Session ended");
        Ok(())
    }

    /// One processor per connected channel.
    fn processors(&mut self, connection: &mut DesktopConnection) -> Result<Vec<Box<dyn AsyncProcessor>>, MirrorError> {
        let o = self.options;
        let mut processors: Vec<Box<dyn AsyncProcessor>> = Vec::new();

        if let Some(stream) = connection.take_control() {
            let controller = Controller::new(Arc::clone(self.device), stream, o.clipboard_autosync, o.power_on);
            processors.push(Box::new(controller));
        }

        if let Some(stream) = connection.take_audio() {
            let capture = self
                .audio_capture
                .take()
                .ok_or_else(|| MirrorError::Configuration("audio capture already in use".into()))?;
            let streamer = Streamer::new(stream, o.audio_codec, o.send_codec_meta, o.send_frame_meta);
            if o.audio_codec == AudioCodec::Raw {
                processors.push(Box::new(AudioRawRecorder::new(capture, streamer)));
            } else {
                let encoder = AudioEncoder::new(capture, Arc::clone(&self.codecs), AudioConfig::from(o), streamer);
                processors.push(Box::new(encoder));
            }
        }

        if let Some(stream) = connection.take_video() {
            let streamer = Streamer::new(stream, o.video_codec, o.send_codec_meta, o.send_frame_meta);
            let encoder = ScreenEncoder::new(
                Arc::clone(self.device),
                Arc::clone(&self.codecs),
                VideoConfig::from(o),
                streamer,
            );
            processors.push(Box::new(encoder));
        }

        Ok(processors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{MOCK_DEVICE_NAME, MockPlatform};
    use crate::media::mock::{MockAudioCapture, MockCodecFactory};
    use crate::media::types::Size;
    use crate::network::connection::{DEVICE_NAME_FIELD_LENGTH, SOCKET_NAME_CONTROL, SOCKET_NAME_VIDEO};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn options(dir: &std::path::Path) -> Options {
        Options {
            audio: false,
            tunnel_forward: false,
            socket_dir: dir.to_path_buf(),
            ..Options::default()
        }
    }

    fn server(options: Options, platform: &MockPlatform) -> Server {
        Server::new(
            options,
            platform.services(),
            Arc::new(MockCodecFactory::default()),
            Box::new(MockAudioCapture::new()),
        )
    }

    #[tokio::test]
    async fn stop_before_connect_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let platform = MockPlatform::new(Size::new(1080, 1920));
        let server = server(
            Options {
                tunnel_forward: true,
                ..options(dir.path())
            },
            &platform,
        );
        let stop = server.stop_handle();
        let session = tokio::spawn(server.run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), session).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert!(!platform.has_rotation_watcher());
    }

    #[tokio::test]
    async fn desktop_disconnect_ends_session() {
        let dir = tempfile::tempdir().unwrap();
        let video_listener = tokio::net::UnixListener::bind(dir.path().join(SOCKET_NAME_VIDEO)).unwrap();
        let control_listener = tokio::net::UnixListener::bind(dir.path().join(SOCKET_NAME_CONTROL)).unwrap();

        let platform = MockPlatform::new(Size::new(1080, 1920));
        let session = tokio::spawn(server(options(dir.path()), &platform).run());

        let (mut video, _) = video_listener.accept().await.unwrap();
        let (control, _) = control_listener.accept().await.unwrap();

        let mut meta = [0u8; DEVICE_NAME_FIELD_LENGTH];
        video.read_exact(&mut meta).await.unwrap();
        assert!(meta.starts_with(MOCK_DEVICE_NAME.as_bytes()));
        assert_eq!(meta[MOCK_DEVICE_NAME.len()], 0);

        // codec id of the video header
        assert_eq!(video.read_u32().await.unwrap(), 0x6832_3634);

        drop(control);
        drop(video);

        let result = tokio::time::timeout(Duration::from_secs(5), session).await.unwrap().unwrap();
        assert!(result.is_ok(), "{result:?}");
        assert!(!platform.has_rotation_watcher());
    }
}
