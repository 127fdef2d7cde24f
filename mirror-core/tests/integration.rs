//! Integration tests: full sessions over real Unix sockets, the video
//! pipeline end to end, and control-channel framing.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use mirror_core::device::input::{ACTION_DOWN, KEYCODE_POWER};
use mirror_core::device::mock::MockPlatform;
use mirror_core::flags::{PACKET_FLAG_CONFIG, PACKET_FLAG_KEY_FRAME, PACKET_PTS_MASK};
use mirror_core::media::mock::{MockAudioCapture, MockCodecConfig, MockCodecFactory};
use mirror_core::media::types::Size;
use mirror_core::media::VideoConfig;
use mirror_core::network::connection::{DEVICE_NAME_FIELD_LENGTH, SOCKET_NAME_CONTROL, SOCKET_NAME_VIDEO};
use mirror_core::{
    AsyncProcessor, Completion, ControlMessage, ControlMessageCodec, Device, DeviceMessage, DeviceMessageCodec,
    DeviceMessageSender, MirrorError, Options, ScreenEncoder, Server, Streamer,
};
use tokio::io::{AsyncRead, AsyncReadExt, DuplexStream};
use tokio::net::UnixListener;
use tokio_util::codec::{Encoder, FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

// ── Helpers ──────────────────────────────────────────────────────

const TIMEOUT: Duration = Duration::from_secs(5);

/// One framed packet as the desktop sees it.
#[derive(Debug)]
struct Packet {
    word: u64,
    data: Vec<u8>,
}

impl Packet {
    fn is_config(&self) -> bool {
        self.word & PACKET_FLAG_CONFIG != 0
    }

    fn is_key_frame(&self) -> bool {
        self.word & PACKET_FLAG_KEY_FRAME != 0
    }

    fn pts(&self) -> u64 {
        self.word & PACKET_PTS_MASK
    }
}

async fn read_packet<R: AsyncRead + Unpin>(r: &mut R) -> Packet {
    tokio::time::timeout(TIMEOUT, async {
        let word = r.read_u64().await.unwrap();
        let len = r.read_u32().await.unwrap() as usize;
        let mut data = vec![0u8; len];
        r.read_exact(&mut data).await.unwrap();
        Packet { word, data }
    })
    .await
    .expect("timeout waiting for a packet")
}

/// Read the 16-byte video header and return the announced size.
async fn read_video_header<R: AsyncRead + Unpin>(r: &mut R) -> Size {
    let mut header = [0u8; 16];
    tokio::time::timeout(TIMEOUT, r.read_exact(&mut header))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&header[..4], b"h264");
    assert_eq!(u32::from_be_bytes([header[4], header[5], header[6], header[7]]), 8);
    Size::new(
        u32::from_be_bytes([header[8], header[9], header[10], header[11]]),
        u32::from_be_bytes([header[12], header[13], header[14], header[15]]),
    )
}

fn video_pipeline(
    platform: &MockPlatform,
    factory: Arc<MockCodecFactory>,
) -> (ScreenEncoder<DuplexStream>, Arc<Device>, DuplexStream) {
    let options = Options::default();
    let device = Device::new(&options, platform.services()).unwrap();
    let (desktop, sink) = tokio::io::duplex(1 << 20);
    let streamer = Streamer::new(sink, options.video_codec, true, true);
    let encoder = ScreenEncoder::new(Arc::clone(&device), factory, VideoConfig::from(&options), streamer);
    (encoder, device, desktop)
}

fn reverse_options(dir: &Path) -> Options {
    Options {
        audio: false,
        tunnel_forward: false,
        socket_dir: dir.to_path_buf(),
        ..Options::default()
    }
}

// ── Video pipeline ───────────────────────────────────────────────

#[tokio::test]
async fn config_precedes_key_frame_and_pts_start_at_zero() {
    let platform = MockPlatform::new(Size::new(1080, 1920));
    let factory = Arc::new(MockCodecFactory::new(MockCodecConfig {
        frame_interval: Duration::from_millis(2),
        key_frame_interval: 4,
        ..MockCodecConfig::default()
    }));
    let (mut encoder, _device, mut desktop) = video_pipeline(&platform, factory);

    let completion = Completion::new(1);
    encoder.start(completion.listener());
    assert_eq!(read_video_header(&mut desktop).await, Size::new(1080, 1920));

    let config = read_packet(&mut desktop).await;
    assert!(config.is_config());
    assert!(!config.data.is_empty());

    let first = read_packet(&mut desktop).await;
    assert!(first.is_key_frame());
    assert_eq!(first.pts(), 0);

    let mut last = first.pts();
    for _ in 0..8 {
        let packet = read_packet(&mut desktop).await;
        assert!(!packet.is_config());
        assert!(packet.pts() > last, "pts went backwards: {} after {last}", packet.pts());
        last = packet.pts();
    }

    encoder.stop();
    encoder.join().await;
    assert!(!completion.is_fatal());
}

#[tokio::test]
async fn rejected_size_falls_back_to_smaller_geometry() {
    let platform = MockPlatform::new(Size::new(1440, 2560));
    let factory = Arc::new(MockCodecFactory::new(MockCodecConfig {
        reject_above: Some(1920),
        ..MockCodecConfig::default()
    }));
    let stats = factory.stats();
    let (mut encoder, _device, mut desktop) = video_pipeline(&platform, factory);

    let completion = Completion::new(1);
    encoder.start(completion.listener());

    // the header describes the geometry that was accepted
    assert_eq!(read_video_header(&mut desktop).await, Size::new(1080, 1920));
    assert!(read_packet(&mut desktop).await.is_config());

    let tried: Vec<u32> = stats.configured_sizes().iter().map(|s| s.max()).collect();
    assert_eq!(tried, vec![2560, 1920]);
    assert_eq!(stats.created(), 2);
    assert_eq!(stats.released(), 1);
    assert_eq!(platform.live_displays(), 1);

    encoder.stop();
    encoder.join().await;
    assert!(!completion.is_fatal());
    assert_eq!(stats.released(), 2);
    assert_eq!(platform.live_displays(), 0);
}

#[tokio::test]
async fn fallback_exhaustion_is_fatal_after_six_attempts() {
    let platform = MockPlatform::new(Size::new(1440, 2560));
    let factory = Arc::new(MockCodecFactory::new(MockCodecConfig {
        reject_above: Some(0),
        ..MockCodecConfig::default()
    }));
    let stats = factory.stats();
    let (mut encoder, _device, mut desktop) = video_pipeline(&platform, factory);

    let completion = Completion::new(1);
    encoder.start(completion.listener());
    let fatal = tokio::time::timeout(TIMEOUT, completion.wait()).await.unwrap();
    encoder.join().await;

    assert!(fatal);
    assert_eq!(stats.configured_sizes().len(), 6);
    assert_eq!(stats.created(), stats.released());
    assert_eq!(platform.live_displays(), 0);

    // no header was ever written, so the desktop is told the stream failed
    assert_eq!(desktop.read_u32().await.unwrap(), 1);
}

#[tokio::test]
async fn rotation_restarts_encoder_with_fresh_config() {
    let platform = MockPlatform::new(Size::new(1080, 1920));
    let factory = Arc::new(MockCodecFactory::new(MockCodecConfig {
        frame_interval: Duration::from_millis(5),
        ..MockCodecConfig::default()
    }));
    let stats = factory.stats();
    let (mut encoder, _device, mut desktop) = video_pipeline(&platform, factory);

    let completion = Completion::new(1);
    encoder.start(completion.listener());
    read_video_header(&mut desktop).await;
    assert!(read_packet(&mut desktop).await.is_config());
    let first = read_packet(&mut desktop).await;
    assert!(first.is_key_frame());

    platform.rotate(1);

    // drain frames of the first encoder until the second one announces itself
    let mut last_pts = first.pts();
    loop {
        let packet = read_packet(&mut desktop).await;
        if packet.is_config() {
            break;
        }
        last_pts = packet.pts();
    }
    let key = read_packet(&mut desktop).await;
    assert!(key.is_key_frame());
    assert!(key.pts() > last_pts);

    assert_eq!(stats.created(), 2);
    assert_eq!(stats.released(), 1);
    assert_eq!(stats.configured_sizes()[1], Size::new(1920, 1080));
    assert_eq!(platform.live_displays(), 1);

    encoder.stop();
    encoder.join().await;
    assert!(!completion.is_fatal());
    assert_eq!(stats.released(), 2);
}

// ── Control channel ──────────────────────────────────────────────

#[tokio::test]
async fn control_message_split_across_reads() {
    let mut bytes = BytesMut::new();
    ControlMessageCodec
        .encode(
            ControlMessage::SetClipboard {
                sequence: 5,
                paste: true,
                text: "héllo".into(),
            },
            &mut bytes,
        )
        .unwrap();
    ControlMessageCodec.encode(ControlMessage::RotateDevice, &mut bytes).unwrap();

    let reader = tokio_test::io::Builder::new()
        .read(&bytes[..1])
        .read(&bytes[1..9])
        .read(&bytes[9..14])
        .read(&bytes[14..])
        .build();
    let mut framed = FramedRead::new(reader, ControlMessageCodec);

    assert_eq!(
        framed.next().await.unwrap().unwrap(),
        ControlMessage::SetClipboard {
            sequence: 5,
            paste: true,
            text: "héllo".into(),
        }
    );
    assert_eq!(framed.next().await.unwrap().unwrap(), ControlMessage::RotateDevice);
    assert!(framed.next().await.is_none());
}

#[tokio::test]
async fn pending_device_messages_coalesce() {
    let sender = DeviceMessageSender::new();
    sender.push_clipboard_text("first".into());
    sender.push_ack_clipboard(7);
    sender.push_clipboard_text("second".into());
    sender.push_ack_clipboard(8);

    let (desktop, device) = tokio::io::duplex(1024);
    let stop = CancellationToken::new();
    let writer = tokio::spawn({
        let sender = sender.clone();
        let stop = stop.clone();
        async move { sender.run(device, stop).await }
    });

    let mut framed = FramedRead::new(desktop, DeviceMessageCodec);
    let first = tokio::time::timeout(TIMEOUT, framed.next()).await.unwrap().unwrap().unwrap();
    let second = tokio::time::timeout(TIMEOUT, framed.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(first, DeviceMessage::AckClipboard(8));
    assert_eq!(second, DeviceMessage::Clipboard("second".into()));

    stop.cancel();
    writer.await.unwrap().unwrap();
}

// ── Full session ─────────────────────────────────────────────────

#[tokio::test]
async fn keycode_reaches_device_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let video_listener = UnixListener::bind(dir.path().join(SOCKET_NAME_VIDEO)).unwrap();
    let control_listener = UnixListener::bind(dir.path().join(SOCKET_NAME_CONTROL)).unwrap();

    let platform = MockPlatform::new(Size::new(1080, 1920));
    let server = Server::new(
        reverse_options(dir.path()),
        platform.services(),
        Arc::new(MockCodecFactory::default()),
        Box::new(MockAudioCapture::new()),
    );
    let session = tokio::spawn(server.run());

    let (mut video, _) = video_listener.accept().await.unwrap();
    let (control, _) = control_listener.accept().await.unwrap();

    let mut meta = [0u8; DEVICE_NAME_FIELD_LENGTH];
    video.read_exact(&mut meta).await.unwrap();
    assert_eq!(read_video_header(&mut video).await, Size::new(1080, 1920));

    let mut commands = FramedWrite::new(control, ControlMessageCodec);
    commands
        .send(ControlMessage::InjectKeycode {
            action: ACTION_DOWN,
            keycode: KEYCODE_POWER,
            repeat: 0,
            metastate: 0,
        })
        .await
        .unwrap();

    tokio::time::timeout(TIMEOUT, async {
        while platform.injected_keycodes().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    drop(commands);
    drop(video);
    let result = tokio::time::timeout(TIMEOUT, session).await.unwrap().unwrap();
    assert!(result.is_ok(), "{result:?}");
    assert_eq!(platform.injected_keycodes(), vec![(ACTION_DOWN, KEYCODE_POWER)]);
    assert!(!platform.has_rotation_watcher());
}

#[tokio::test]
async fn missing_reverse_endpoint_fails_session_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    // only the video endpoint exists; connecting control fails
    let video_listener = UnixListener::bind(dir.path().join(SOCKET_NAME_VIDEO)).unwrap();

    let platform = MockPlatform::new(Size::new(1080, 1920));
    let server = Server::new(
        reverse_options(dir.path()),
        platform.services(),
        Arc::new(MockCodecFactory::default()),
        Box::new(MockAudioCapture::new()),
    );
    let result = tokio::time::timeout(TIMEOUT, server.run()).await.unwrap();
    assert!(matches!(result, Err(MirrorError::Io(_))), "{result:?}");

    // the video socket opened before the failure was closed again
    let (mut video, _) = video_listener.accept().await.unwrap();
    let mut buf = [0u8; 1];
    assert_eq!(video.read(&mut buf).await.unwrap(), 0);
    assert!(!platform.has_rotation_watcher());
}
