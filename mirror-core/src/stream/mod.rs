//! Packet framer: serialises access units for one stream channel.
//!
//! ## Wire format
//!
//! All integers are big-endian.
//!
//! **Stream header** (once, when codec meta is enabled):
//! ```text
//! codec_id:       u32  (4)   FourCC, e.g. "h264"
//! meta_length:    u32  (4)
//! meta:           [u8] (meta_length)  video: width u32, height u32
//! ```
//!
//! **Disabled stream** (instead of the header): `codec_id` 0 (disabled)
//! or 1 (error), nothing else.
//!
//! **Frame meta** (per packet, when frame meta is enabled):
//! ```text
//! pts_and_flags:  u64  (8)   bit 63 config, bit 62 key frame
//! packet_size:    u32  (4)
//! data:           [u8] (packet_size)
//! ```

pub mod adts;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::MirrorError;
use crate::flags::{PACKET_FLAG_CONFIG, PACKET_FLAG_KEY_FRAME, PACKET_PTS_MASK};
use crate::media::types::{AccessUnit, Size};
use crate::options::{AudioCodec, VideoCodec};

/// Codec id announcing a stream the device chose not to send.
pub const STREAM_DISABLED: u32 = 0;
/// Codec id announcing a stream that failed to start.
pub const STREAM_ERROR: u32 = 1;

/// Encoded size of the frame meta header.
pub const FRAME_META_SIZE: usize = 12;

/// Audio format shared by every audio source.
pub const AUDIO_SAMPLE_RATE: u32 = 48000;
pub const AUDIO_CHANNELS: u8 = 2;
pub const AUDIO_BYTES_PER_SAMPLE: u32 = 2;

// ── StreamCodec ──────────────────────────────────────────────────

/// Codec carried by one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCodec {
    Video(VideoCodec),
    Audio(AudioCodec),
}

impl StreamCodec {
    pub const fn id(self) -> u32 {
        match self {
            StreamCodec::Video(c) => c.id(),
            StreamCodec::Audio(c) => c.id(),
        }
    }
}

impl From<VideoCodec> for StreamCodec {
    fn from(c: VideoCodec) -> Self {
        StreamCodec::Video(c)
    }
}

impl From<AudioCodec> for StreamCodec {
    fn from(c: AudioCodec) -> Self {
        StreamCodec::Audio(c)
    }
}

/// Encode the frame-meta word and length header.
pub fn encode_frame_meta(pts_and_flags: u64, packet_size: u32) -> [u8; FRAME_META_SIZE] {
    let mut buf = [0u8; FRAME_META_SIZE];
    buf[0..8].copy_from_slice(&pts_and_flags.to_be_bytes());
    buf[8..12].copy_from_slice(&packet_size.to_be_bytes());
    buf
}

// ── Streamer ─────────────────────────────────────────────────────

/// Writes the stream header and access units of one channel.
///
/// Purely synchronous with respect to its caller: every method finishes
/// writing (retrying short writes) before returning.
pub struct Streamer<W> {
    sink: W,
    codec: StreamCodec,
    send_codec_meta: bool,
    send_frame_meta: bool,
    header_sent: bool,
    pts_origin: Option<u64>,
}

impl<W> Streamer<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(sink: W, codec: impl Into<StreamCodec>, send_codec_meta: bool, send_frame_meta: bool) -> Self {
        Self {
            sink,
            codec: codec.into(),
            send_codec_meta,
            send_frame_meta,
            header_sent: false,
            pts_origin: None,
        }
    }

    pub fn codec(&self) -> StreamCodec {
        self.codec
    }

    /// Whether the header (or a disable marker) has been written.
    pub fn header_sent(&self) -> bool {
        self.header_sent
    }

    /// Write the video stream header. Later calls are no-ops.
    pub async fn write_video_header(&mut self, size: Size) -> Result<(), MirrorError> {
        let mut meta = [0u8; 8];
        meta[0..4].copy_from_slice(&size.width.to_be_bytes());
        meta[4..8].copy_from_slice(&size.height.to_be_bytes());
        self.write_header(&meta).await
    }

    /// Write the audio stream header. Later calls are no-ops.
    pub async fn write_audio_header(&mut self) -> Result<(), MirrorError> {
        self.write_header(&[]).await
    }

    async fn write_header(&mut self, meta: &[u8]) -> Result<(), MirrorError> {
        if self.header_sent {
            return Ok(());
        }
        self.header_sent = true;
        if !self.send_codec_meta {
            return Ok(());
        }

        let mut buf = Vec::with_capacity(8 + meta.len());
        buf.extend_from_slice(&self.codec.id().to_be_bytes());
        buf.extend_from_slice(&(meta.len() as u32).to_be_bytes());
        buf.extend_from_slice(meta);
        self.sink.write_all(&buf).await?;
        self.sink.flush().await?;
        Ok(())
    }

    /// Tell the desktop this stream will not be sent.
    ///
    /// Only meaningful before the header; ignored afterwards.
    pub async fn write_disable_stream(&mut self, error: bool) -> Result<(), MirrorError> {
        if self.header_sent {
            return Ok(());
        }
        self.header_sent = true;
        if !self.send_codec_meta {
            return Ok(());
        }

        let code = if error { STREAM_ERROR } else { STREAM_DISABLED };
        self.sink.write_all(&code.to_be_bytes()).await?;
        self.sink.flush().await?;
        Ok(())
    }

    /// Write one access unit, framed according to the channel settings.
    pub async fn write_packet(&mut self, unit: &AccessUnit) -> Result<(), MirrorError> {
        if !self.header_sent {
            return Err(MirrorError::Configuration(
                "access unit written before the stream header".into(),
            ));
        }

        if self.codec == StreamCodec::Audio(AudioCodec::Aac) && !self.send_frame_meta {
            return self.write_adts_packet(unit).await;
        }

        if self.send_frame_meta {
            let word = self.pts_word(unit);
            let meta = encode_frame_meta(word, unit.data.len() as u32);
            self.sink.write_all(&meta).await?;
        }
        self.sink.write_all(&unit.data).await?;
        self.sink.flush().await?;
        Ok(())
    }

    async fn write_adts_packet(&mut self, unit: &AccessUnit) -> Result<(), MirrorError> {
        if unit.is_config() {
            // AudioSpecificConfig is implied by the ADTS header
            return Ok(());
        }
        let header = adts::adts_header(unit.data.len(), AUDIO_SAMPLE_RATE, AUDIO_CHANNELS)
            .ok_or_else(|| MirrorError::Configuration(format!("AAC frame of {} bytes", unit.data.len())))?;
        self.sink.write_all(&header).await?;
        self.sink.write_all(&unit.data).await?;
        self.sink.flush().await?;
        Ok(())
    }

    /// Frame-meta word for `unit`; the first media unit anchors the origin.
    fn pts_word(&mut self, unit: &AccessUnit) -> u64 {
        if unit.is_config() {
            return PACKET_FLAG_CONFIG;
        }
        let origin = *self.pts_origin.get_or_insert(unit.pts_us);
        let mut word = unit.pts_us.saturating_sub(origin) & PACKET_PTS_MASK;
        if unit.is_key_frame() {
            word |= PACKET_FLAG_KEY_FRAME;
        }
        word
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::BufferFlags;

    fn read_u32(b: &[u8]) -> u32 {
        u32::from_be_bytes(b[..4].try_into().unwrap())
    }

    fn read_u64(b: &[u8]) -> u64 {
        u64::from_be_bytes(b[..8].try_into().unwrap())
    }

    #[tokio::test]
    async fn video_header_then_packets() {
        let mut s = Streamer::new(Vec::new(), VideoCodec::H264, true, true);
        s.write_video_header(Size::new(1080, 2400)).await.unwrap();
        s.write_packet(&AccessUnit::new(vec![1, 2, 3], 0, BufferFlags::CODEC_CONFIG))
            .await
            .unwrap();
        s.write_packet(&AccessUnit::new(vec![4; 5], 1_000_000, BufferFlags::KEY_FRAME))
            .await
            .unwrap();
        s.write_packet(&AccessUnit::new(vec![5; 2], 1_016_666, BufferFlags::empty()))
            .await
            .unwrap();

        let out = s.into_inner();
        assert_eq!(&out[0..4], b"h264");
        assert_eq!(read_u32(&out[4..]), 8);
        assert_eq!(read_u32(&out[8..]), 1080);
        assert_eq!(read_u32(&out[12..]), 2400);

        let p = &out[16..];
        assert_eq!(read_u64(p), PACKET_FLAG_CONFIG);
        assert_eq!(read_u32(&p[8..]), 3);
        assert_eq!(&p[12..15], &[1, 2, 3]);

        let p = &p[15..];
        assert_eq!(read_u64(p), PACKET_FLAG_KEY_FRAME);
        assert_eq!(read_u32(&p[8..]), 5);

        let p = &p[17..];
        assert_eq!(read_u64(p), 16_666);
        assert_eq!(read_u32(&p[8..]), 2);
        assert_eq!(p.len(), 14);
    }

    #[tokio::test]
    async fn header_written_once() {
        let mut s = Streamer::new(Vec::new(), VideoCodec::H265, true, false);
        s.write_video_header(Size::new(800, 600)).await.unwrap();
        s.write_video_header(Size::new(600, 800)).await.unwrap();
        assert_eq!(s.get_ref().len(), 16);
    }

    #[tokio::test]
    async fn raw_payload_without_frame_meta() {
        let mut s = Streamer::new(Vec::new(), VideoCodec::H264, false, false);
        s.write_video_header(Size::new(800, 600)).await.unwrap();
        s.write_packet(&AccessUnit::new(vec![9, 9], 5, BufferFlags::KEY_FRAME))
            .await
            .unwrap();
        assert_eq!(s.into_inner(), vec![9, 9]);
    }

    #[tokio::test]
    async fn packet_before_header_is_rejected() {
        let mut s = Streamer::new(Vec::new(), AudioCodec::Opus, true, true);
        let err = s
            .write_packet(&AccessUnit::new(vec![1], 0, BufferFlags::empty()))
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::Configuration(_)));
    }

    #[tokio::test]
    async fn disable_stream_marker() {
        let mut s = Streamer::new(Vec::new(), AudioCodec::Opus, true, true);
        s.write_disable_stream(false).await.unwrap();
        // a header after the marker must not be written
        s.write_audio_header().await.unwrap();
        assert_eq!(s.into_inner(), STREAM_DISABLED.to_be_bytes().to_vec());

        let mut s = Streamer::new(Vec::new(), AudioCodec::Opus, true, true);
        s.write_disable_stream(true).await.unwrap();
        assert_eq!(s.into_inner(), STREAM_ERROR.to_be_bytes().to_vec());
    }

    #[tokio::test]
    async fn aac_without_frame_meta_gets_adts() {
        let mut s = Streamer::new(Vec::new(), AudioCodec::Aac, false, false);
        s.write_audio_header().await.unwrap();
        s.write_packet(&AccessUnit::new(vec![0x12, 0x10], 0, BufferFlags::CODEC_CONFIG))
            .await
            .unwrap();
        s.write_packet(&AccessUnit::new(vec![7; 10], 0, BufferFlags::empty()))
            .await
            .unwrap();
        let out = s.into_inner();
        assert_eq!(out.len(), adts::ADTS_HEADER_SIZE + 10);
        assert_eq!(out[0], 0xFF);
    }

    #[tokio::test]
    async fn short_writes_are_completed() {
        // the mock sink accepts at most 3 bytes per write call
        let mut expected = Vec::new();
        expected.extend_from_slice(&AudioCodec::Opus.id().to_be_bytes());
        expected.extend_from_slice(&0u32.to_be_bytes());
        expected.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7]);

        let mut builder = tokio_test::io::Builder::new();
        for chunk in expected.chunks(3) {
            builder.write(chunk);
        }
        let sink = builder.build();

        let mut s = Streamer::new(sink, AudioCodec::Opus, true, false);
        s.write_audio_header().await.unwrap();
        s.write_packet(&AccessUnit::new(vec![1, 2, 3, 4, 5, 6, 7], 0, BufferFlags::empty()))
            .await
            .unwrap();
    }
}
