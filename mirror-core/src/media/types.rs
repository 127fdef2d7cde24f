//! Shared geometry and buffer types for the capture/encode pipeline.
//!
//! These are **internal** representations passed between pipeline stages.
//! The serialised form lives in [`crate::stream`].

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::flags::BufferFlags;

// ── Size ─────────────────────────────────────────────────────────

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Swap width and height.
    pub const fn rotate(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }

    /// The larger of the two dimensions.
    pub fn max(self) -> u32 {
        self.width.max(self.height)
    }

    pub fn to_rect(self) -> Rect {
        Rect::new(0, 0, self.width as i32, self.height as i32)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ── Point ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

// ── Rect ─────────────────────────────────────────────────────────

/// Axis-aligned rectangle, right and bottom edges exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    /// Transpose the rectangle (x and y swapped).
    pub fn flip(&self) -> Self {
        Self::new(self.top, self.left, self.bottom, self.right)
    }

    /// Intersection with `other`, or `None` when they do not overlap.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let r = Rect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        if r.is_empty() { None } else { Some(r) }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width().max(0) as u32, self.height().max(0) as u32)
    }
}

impl fmt::Display for Rect {
    /// Same `width:height:x:y` notation as the crop option.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.width(), self.height(), self.left, self.top)
    }
}

// ── BufferInfo ───────────────────────────────────────────────────

/// Metadata the encoder attaches to an output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    /// Presentation timestamp in microseconds, encoder clock.
    pub pts_us: u64,
    /// Payload size in bytes.
    pub size: usize,
    pub flags: BufferFlags,
}

// ── AccessUnit ───────────────────────────────────────────────────

/// One encoded chunk: a video frame, an audio block, or codec config.
///
/// Consumed exactly once by the [`Streamer`](crate::stream::Streamer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    pub data: Bytes,
    /// Raw presentation timestamp (µs); the streamer subtracts the origin.
    pub pts_us: u64,
    pub flags: BufferFlags,
}

impl AccessUnit {
    pub fn new(data: impl Into<Bytes>, pts_us: u64, flags: BufferFlags) -> Self {
        Self {
            data: data.into(),
            pts_us,
            flags,
        }
    }

    pub fn is_config(&self) -> bool {
        self.flags.contains(BufferFlags::CODEC_CONFIG)
    }

    pub fn is_key_frame(&self) -> bool {
        self.flags.contains(BufferFlags::KEY_FRAME)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(BufferFlags::END_OF_STREAM)
    }
}
