//! Session options consumed from the bootstrap layer.
//!
//! Parsing of the textual forms (`--crop`, codec option lists) lives here
//! so the binary and tests share one implementation.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MirrorError;
use crate::media::types::Rect;

// ── Codecs ───────────────────────────────────────────────────────

/// Video codec negotiated with the desktop client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
    Av1,
}

impl VideoCodec {
    /// FourCC sent in the stream header.
    pub const fn id(self) -> u32 {
        match self {
            VideoCodec::H264 => 0x6832_3634, // "h264"
            VideoCodec::H265 => 0x6832_3635, // "h265"
            VideoCodec::Av1 => 0x0061_7631,  // "\0av1"
        }
    }

    pub const fn mime_type(self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/avc",
            VideoCodec::H265 => "video/hevc",
            VideoCodec::Av1 => "video/av01",
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::H265 => "h265",
            VideoCodec::Av1 => "av1",
        }
    }
}

/// Audio codec negotiated with the desktop client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    #[default]
    Opus,
    Aac,
    /// Uncompressed PCM, no encoder involved.
    Raw,
}

impl AudioCodec {
    pub const fn id(self) -> u32 {
        match self {
            AudioCodec::Opus => 0x6f70_7573, // "opus"
            AudioCodec::Aac => 0x0061_6163,  // "\0aac"
            AudioCodec::Raw => 0x0072_6177,  // "\0raw"
        }
    }

    pub const fn mime_type(self) -> &'static str {
        match self {
            AudioCodec::Opus => "audio/opus",
            AudioCodec::Aac => "audio/mp4a-latm",
            AudioCodec::Raw => "audio/raw",
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            AudioCodec::Opus => "opus",
            AudioCodec::Aac => "aac",
            AudioCodec::Raw => "raw",
        }
    }
}

impl FromStr for VideoCodec {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "h264" => Ok(VideoCodec::H264),
            "h265" => Ok(VideoCodec::H265),
            "av1" => Ok(VideoCodec::Av1),
            _ => Err(MirrorError::Configuration(format!("unknown video codec: {s}"))),
        }
    }
}

impl FromStr for AudioCodec {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opus" => Ok(AudioCodec::Opus),
            "aac" => Ok(AudioCodec::Aac),
            "raw" => Ok(AudioCodec::Raw),
            _ => Err(MirrorError::Configuration(format!("unknown audio codec: {s}"))),
        }
    }
}

// ── CodecOption ──────────────────────────────────────────────────

/// Typed value of a free-form encoder option.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Int(i32),
    Long(i64),
    Float(f32),
    String(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Int(v) => write!(f, "{v} (int)"),
            OptionValue::Long(v) => write!(f, "{v} (long)"),
            OptionValue::Float(v) => write!(f, "{v} (float)"),
            OptionValue::String(v) => write!(f, "{v} (string)"),
        }
    }
}

/// One `key[:type]=value` encoder option.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecOption {
    pub key: String,
    pub value: OptionValue,
}

impl CodecOption {
    /// Parse a comma-separated option list, preserving order.
    ///
    /// `\,` escapes a comma inside a string value. The type defaults to
    /// `int` when omitted.
    pub fn parse_list(s: &str) -> Result<Vec<CodecOption>, MirrorError> {
        let mut options = Vec::new();
        for item in split_escaped(s) {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            options.push(item.parse()?);
        }
        Ok(options)
    }
}

impl FromStr for CodecOption {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = |why: &str| MirrorError::Configuration(format!("invalid codec option '{s}': {why}"));

        let (lhs, value) = s.split_once('=').ok_or_else(|| bad("missing '='"))?;
        let (key, ty) = match lhs.split_once(':') {
            Some((key, ty)) => (key, ty),
            None => (lhs, "int"),
        };
        if key.is_empty() {
            return Err(bad("empty key"));
        }

        let value = match ty {
            "int" => OptionValue::Int(value.parse().map_err(|_| bad("not an int"))?),
            "long" => OptionValue::Long(value.parse().map_err(|_| bad("not a long"))?),
            "float" => OptionValue::Float(value.parse().map_err(|_| bad("not a float"))?),
            "string" => OptionValue::String(value.to_string()),
            _ => return Err(bad("type must be int, long, float or string")),
        };

        Ok(CodecOption {
            key: key.to_string(),
            value,
        })
    }
}

fn split_escaped(s: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in s.chars() {
        match c {
            '\\' if !escaped => escaped = true,
            ',' if !escaped => items.push(std::mem::take(&mut current)),
            _ => {
                escaped = false;
                current.push(c);
            }
        }
    }
    items.push(current);
    items
}

// ── Crop ─────────────────────────────────────────────────────────

/// Parse a `width:height:x:y` crop rectangle.
pub fn parse_crop(s: &str) -> Result<Rect, MirrorError> {
    let bad = || MirrorError::Configuration(format!("crop must be width:height:x:y, got '{s}'"));
    let parts: Vec<i32> = s
        .split(':')
        .map(|p| p.trim().parse::<i32>())
        .collect::<Result<_, _>>()
        .map_err(|_| bad())?;
    let &[width, height, x, y] = parts.as_slice() else {
        return Err(bad());
    };
    if width <= 0 || height <= 0 || x < 0 || y < 0 {
        return Err(bad());
    }
    let right = x.checked_add(width).ok_or_else(bad)?;
    let bottom = y.checked_add(height).ok_or_else(bad)?;
    Ok(Rect::new(x, y, right, bottom))
}

/// Encoders take bit rates as a signed 32-bit int.
pub fn check_bit_rate(name: &str, bit_rate: u32) -> Result<u32, MirrorError> {
    if i32::try_from(bit_rate).is_err() {
        return Err(MirrorError::Configuration(format!(
            "{name} bit rate must be at most {}, got {bit_rate}",
            i32::MAX
        )));
    }
    Ok(bit_rate)
}

// ── Locked orientation ───────────────────────────────────────────

/// Video orientation lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockOrientation {
    /// Video follows the device rotation.
    #[default]
    Unlocked,
    /// Lock to whatever the rotation is when the session starts.
    Initial,
    /// Lock to a fixed rotation (0..=3, quarter turns).
    Locked(u8),
}

impl FromStr for LockOrientation {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "unlocked" | "-1" => Ok(LockOrientation::Unlocked),
            "initial" | "-2" => Ok(LockOrientation::Initial),
            _ => match s.parse::<u8>() {
                Ok(r) if r < 4 => Ok(LockOrientation::Locked(r)),
                _ => Err(MirrorError::Configuration(format!(
                    "lock orientation must be unlocked, initial or 0..3, got '{s}'"
                ))),
            },
        }
    }
}

// ── Options ──────────────────────────────────────────────────────

/// Everything a mirroring session needs from the bootstrap layer.
#[derive(Debug, Clone)]
pub struct Options {
    pub video: bool,
    pub audio: bool,
    pub control: bool,

    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    pub video_encoder: Option<String>,
    pub audio_encoder: Option<String>,
    pub video_codec_options: Vec<CodecOption>,
    pub audio_codec_options: Vec<CodecOption>,

    pub video_bit_rate: u32,
    pub audio_bit_rate: u32,
    /// 0 = unlimited.
    pub max_fps: u16,
    /// 0 = native size. Always a multiple of 8.
    pub max_size: u32,
    pub crop: Option<Rect>,
    pub lock_video_orientation: LockOrientation,
    pub display_id: u32,

    pub send_frame_meta: bool,
    pub send_codec_meta: bool,
    pub send_device_meta: bool,
    pub send_dummy_byte: bool,

    /// Listen for the desktop (forward tunnel) instead of connecting to it.
    pub tunnel_forward: bool,
    /// Directory holding the local socket endpoints.
    pub socket_dir: PathBuf,

    pub clipboard_autosync: bool,
    pub power_on: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
            control: true,
            video_codec: VideoCodec::H264,
            audio_codec: AudioCodec::Opus,
            video_encoder: None,
            audio_encoder: None,
            video_codec_options: Vec::new(),
            audio_codec_options: Vec::new(),
            video_bit_rate: 8_000_000,
            audio_bit_rate: 128_000,
            max_fps: 0,
            max_size: 0,
            crop: None,
            lock_video_orientation: LockOrientation::Unlocked,
            display_id: 0,
            send_frame_meta: true,
            send_codec_meta: true,
            send_device_meta: true,
            send_dummy_byte: true,
            tunnel_forward: true,
            socket_dir: std::env::temp_dir(),
            clipboard_autosync: true,
            power_on: true,
        }
    }
}

impl Options {
    /// Set the maximum video size, rounded down to a multiple of 8.
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size & !7;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_codec_options_in_order() {
        let opts = CodecOption::parse_list("profile=1,level:int=4096,repeat:long=100000,name:string=a\\,b")
            .unwrap();
        assert_eq!(opts.len(), 4);
        assert_eq!(opts[0].key, "profile");
        assert_eq!(opts[0].value, OptionValue::Int(1));
        assert_eq!(opts[1].value, OptionValue::Int(4096));
        assert_eq!(opts[2].value, OptionValue::Long(100_000));
        assert_eq!(opts[3].value, OptionValue::String("a,b".into()));
    }

    #[test]
    fn parse_codec_option_rejects_bad_type() {
        assert!(CodecOption::parse_list("x:double=1").is_err());
        assert!(CodecOption::parse_list("x=abc").is_err());
        assert!(CodecOption::parse_list("novalue").is_err());
        assert!(CodecOption::parse_list("").unwrap().is_empty());
    }

    #[test]
    fn parse_crop_rect() {
        let r = parse_crop("1080:1000:0:460").unwrap();
        assert_eq!(r, Rect::new(0, 460, 1080, 1460));
        assert!(parse_crop("1080:1000:0").is_err());
        assert!(parse_crop("a:b:c:d").is_err());
        assert!(parse_crop("0:10:0:0").is_err());
    }

    #[test]
    fn parse_crop_rejects_overflowing_rect() {
        assert!(parse_crop("2000000000:10:2000000000:0").is_err());
        assert!(parse_crop("10:2000000000:0:2000000000").is_err());
        let edge = parse_crop(&format!("1:1:{}:0", i32::MAX - 1)).unwrap();
        assert_eq!(edge.right, i32::MAX);
    }

    #[test]
    fn bit_rate_must_fit_an_encoder_int() {
        assert_eq!(check_bit_rate("video", 8_000_000).unwrap(), 8_000_000);
        assert_eq!(check_bit_rate("video", i32::MAX as u32).unwrap(), i32::MAX as u32);
        assert!(check_bit_rate("audio", i32::MAX as u32 + 1).is_err());
    }

    #[test]
    fn max_size_rounds_to_multiple_of_8() {
        let o = Options::default().with_max_size(1023);
        assert_eq!(o.max_size, 1016);
    }

    #[test]
    fn lock_orientation_parsing() {
        assert_eq!("unlocked".parse::<LockOrientation>().unwrap(), LockOrientation::Unlocked);
        assert_eq!("initial".parse::<LockOrientation>().unwrap(), LockOrientation::Initial);
        assert_eq!("3".parse::<LockOrientation>().unwrap(), LockOrientation::Locked(3));
        assert!("4".parse::<LockOrientation>().is_err());
    }

    #[test]
    fn codec_ids_are_fourcc() {
        assert_eq!(&VideoCodec::H264.id().to_be_bytes(), b"h264");
        assert_eq!(&AudioCodec::Opus.id().to_be_bytes(), b"opus");
        assert_eq!("h265".parse::<VideoCodec>().unwrap(), VideoCodec::H265);
        assert!("vp9".parse::<VideoCodec>().is_err());
    }
}
