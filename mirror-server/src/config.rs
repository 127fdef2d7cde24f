//! Configuration for the mirroring server.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use mirror_core::options::{check_bit_rate, parse_crop, AudioCodec, CodecOption, Options, VideoCodec};
use mirror_core::MirrorError;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket settings.
    pub connection: ConnectionConfig,
    /// Video stream settings.
    pub video: VideoConfig,
    /// Audio stream settings.
    pub audio: AudioConfig,
    /// Control channel settings.
    pub control: ControlConfig,
    /// Simulated device used by the demo platform.
    pub device: DeviceConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Socket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Directory holding the `svideo`, `saudio` and `svideo-control` sockets.
    pub socket_dir: PathBuf,
    /// Listen for the desktop (`true`) or connect to it (`false`).
    pub tunnel_forward: bool,
    /// Write one 0x00 byte on each accepted socket.
    pub send_dummy_byte: bool,
    /// Send the 64-byte device name first.
    pub send_device_meta: bool,
    /// Send the codec id and geometry header on each stream.
    pub send_codec_meta: bool,
    /// Prefix every packet with its pts and length.
    pub send_frame_meta: bool,
}

/// Video stream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub enabled: bool,
    /// "h264", "h265" or "av1".
    pub codec: VideoCodec,
    /// Encoder name; empty selects the platform default.
    pub encoder: String,
    pub bit_rate: u32,
    /// 0 means no limit.
    pub max_fps: u16,
    /// Largest video dimension, 0 means no limit.
    pub max_size: u32,
    /// `width:height:x:y`, empty for none.
    pub crop: String,
    /// "unlocked", "initial" or 0..3.
    pub lock_orientation: String,
    pub display_id: u32,
    /// `key[:type]=value,...`
    pub codec_options: String,
}

/// Audio stream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub enabled: bool,
    /// "opus", "aac" or "raw".
    pub codec: AudioCodec,
    pub encoder: String,
    pub bit_rate: u32,
    pub codec_options: String,
}

/// Control channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub enabled: bool,
    /// Forward device clipboard changes to the desktop.
    pub clipboard_autosync: bool,
    /// Turn the screen on when the session starts.
    pub power_on: bool,
}

/// Simulated device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Screen width in the natural orientation.
    pub width: u32,
    /// Screen height in the natural orientation.
    pub height: u32,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ConnectionConfig {
    fn default() -> Self {
        let o = Options::default();
        Self {
            socket_dir: o.socket_dir,
            tunnel_forward: o.tunnel_forward,
            send_dummy_byte: o.send_dummy_byte,
            send_device_meta: o.send_device_meta,
            send_codec_meta: o.send_codec_meta,
            send_frame_meta: o.send_frame_meta,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            codec: VideoCodec::H264,
            encoder: String::new(),
            bit_rate: 8_000_000,
            max_fps: 0,
            max_size: 0,
            crop: String::new(),
            lock_orientation: "unlocked".into(),
            display_id: 0,
            codec_options: String::new(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            codec: AudioCodec::Opus,
            encoder: String::new(),
            bit_rate: 128_000,
            codec_options: String::new(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            clipboard_autosync: true,
            power_on: true,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

// ── Loading ──────────────────────────────────────────────────────

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

impl ServerConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Convert into session options, parsing the textual fields.
    pub fn to_options(&self) -> Result<Options, MirrorError> {
        let c = &self.connection;
        let v = &self.video;
        let a = &self.audio;
        let options = Options {
            video: v.enabled,
            audio: a.enabled,
            control: self.control.enabled,
            video_codec: v.codec,
            audio_codec: a.codec,
            video_encoder: non_empty(&v.encoder),
            audio_encoder: non_empty(&a.encoder),
            video_codec_options: CodecOption::parse_list(&v.codec_options)?,
            audio_codec_options: CodecOption::parse_list(&a.codec_options)?,
            video_bit_rate: check_bit_rate("video", v.bit_rate)?,
            audio_bit_rate: check_bit_rate("audio", a.bit_rate)?,
            max_fps: v.max_fps,
            max_size: 0,
            crop: non_empty(&v.crop).map(|s| parse_crop(&s)).transpose()?,
            lock_video_orientation: v.lock_orientation.trim().parse()?,
            display_id: v.display_id,
            send_frame_meta: c.send_frame_meta,
            send_codec_meta: c.send_codec_meta,
            send_device_meta: c.send_device_meta,
            send_dummy_byte: c.send_dummy_byte,
            tunnel_forward: c.tunnel_forward,
            socket_dir: c.socket_dir.clone(),
            clipboard_autosync: self.control.clipboard_autosync,
            power_on: self.control.power_on,
        };
        if !options.video && !options.audio && !options.control {
            return Err(MirrorError::Configuration("every channel is disabled".into()));
        }
        Ok(options.with_max_size(v.max_size))
    }
}

// ── Tests ────────────────────────────────────────────────────────
