//! Input events injected on the device, and client-side positions.

use crate::media::types::{Point, Size};

// ── Key codes ────────────────────────────────────────────────────

pub const KEYCODE_BACK: u32 = 4;
pub const KEYCODE_POWER: u32 = 26;
pub const KEYCODE_CUT: u32 = 277;
pub const KEYCODE_COPY: u32 = 278;
pub const KEYCODE_PASTE: u32 = 279;

pub const ACTION_DOWN: u8 = 0;
pub const ACTION_UP: u8 = 1;

// ── Position ─────────────────────────────────────────────────────

/// A point expressed in the coordinate space of the client's video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub point: Point,
    /// Video size the client was displaying when the event was generated.
    pub screen_size: Size,
}

impl Position {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            point: Point::new(x, y),
            screen_size: Size::new(width, height),
        }
    }

    /// Rotate by `rotation` quarter turns clockwise.
    pub fn rotate(self, rotation: u8) -> Self {
        let Point { x, y } = self.point;
        let w = self.screen_size.width as i32;
        let h = self.screen_size.height as i32;
        match rotation % 4 {
            1 => Self {
                point: Point::new(h - y, x),
                screen_size: self.screen_size.rotate(),
            },
            2 => Self {
                point: Point::new(w - x, h - y),
                screen_size: self.screen_size,
            },
            3 => Self {
                point: Point::new(y, w - x),
                screen_size: self.screen_size.rotate(),
            },
            _ => self,
        }
    }
}

// ── Events ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub action: u8,
    pub keycode: u32,
    pub repeat: u32,
    pub metastate: u32,
}

/// A single-pointer touch or mouse event, in device coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionEvent {
    pub action: u8,
    pub pointer_id: u64,
    pub point: Point,
    /// 0.0 ..= 1.0
    pub pressure: f32,
    pub action_button: u32,
    pub buttons: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollEvent {
    pub point: Point,
    pub hscroll: i16,
    pub vscroll: i16,
    pub buttons: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    Key(KeyEvent),
    Motion(MotionEvent),
    Scroll(ScrollEvent),
}
