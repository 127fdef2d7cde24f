//! Control channel message types.
//!
//! | Type | Direction        | Message                   |
//! |------|------------------|---------------------------|
//! | 0    | desktop → device | inject keycode            |
//! | 1    | desktop → device | inject text               |
//! | 2    | desktop → device | inject touch event        |
//! | 3    | desktop → device | inject scroll event       |
//! | 4    | desktop → device | back or screen on         |
//! | 5    | desktop → device | expand notification panel |
//! | 6    | desktop → device | expand settings panel     |
//! | 7    | desktop → device | collapse panels           |
//! | 8    | desktop → device | get clipboard             |
//! | 9    | desktop → device | set clipboard             |
//! | 10   | desktop → device | set screen power mode     |
//! | 11   | desktop → device | rotate device             |
//! | 0    | device → desktop | clipboard                 |
//! | 1    | device → desktop | ack clipboard             |

use crate::device::input::Position;

/// Longest inject-text payload, in bytes.
pub const INJECT_TEXT_MAX_LENGTH: usize = 300;
/// Longest control message on the wire.
pub const CONTROL_MSG_MAX_SIZE: usize = 1 << 18;
/// Longest set-clipboard text (type, sequence, paste flag, length prefix).
pub const CLIPBOARD_TEXT_MAX_LENGTH: usize = CONTROL_MSG_MAX_SIZE - 14;
/// Longest device clipboard message text (type, length prefix).
pub const DEVICE_CLIPBOARD_TEXT_MAX_LENGTH: usize = CONTROL_MSG_MAX_SIZE - 5;

/// Sequence number meaning "no acknowledgement wanted".
pub const SEQUENCE_INVALID: u64 = 0;

/// Control message type tags.
pub mod kind {
    pub const INJECT_KEYCODE: u8 = 0;
    pub const INJECT_TEXT: u8 = 1;
    pub const INJECT_TOUCH_EVENT: u8 = 2;
    pub const INJECT_SCROLL_EVENT: u8 = 3;
    pub const BACK_OR_SCREEN_ON: u8 = 4;
    pub const EXPAND_NOTIFICATION_PANEL: u8 = 5;
    pub const EXPAND_SETTINGS_PANEL: u8 = 6;
    pub const COLLAPSE_PANELS: u8 = 7;
    pub const GET_CLIPBOARD: u8 = 8;
    pub const SET_CLIPBOARD: u8 = 9;
    pub const SET_SCREEN_POWER_MODE: u8 = 10;
    pub const ROTATE_DEVICE: u8 = 11;

    pub const DEVICE_CLIPBOARD: u8 = 0;
    pub const DEVICE_ACK_CLIPBOARD: u8 = 1;
}

/// Key to press before reading the clipboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CopyKey {
    #[default]
    None,
    Copy,
    Cut,
}

impl CopyKey {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(CopyKey::None),
            1 => Some(CopyKey::Copy),
            2 => Some(CopyKey::Cut),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            CopyKey::None => 0,
            CopyKey::Copy => 1,
            CopyKey::Cut => 2,
        }
    }
}

/// Desktop → device message.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    InjectKeycode {
        action: u8,
        keycode: u32,
        repeat: u32,
        metastate: u32,
    },
    InjectText(String),
    InjectTouch {
        action: u8,
        pointer_id: u64,
        position: Position,
        /// 0.0 ..= 1.0
        pressure: f32,
        action_button: u32,
        buttons: u32,
    },
    InjectScroll {
        position: Position,
        hscroll: i16,
        vscroll: i16,
        buttons: u32,
    },
    BackOrScreenOn {
        action: u8,
    },
    ExpandNotificationPanel,
    ExpandSettingsPanel,
    CollapsePanels,
    GetClipboard {
        copy_key: CopyKey,
    },
    SetClipboard {
        sequence: u64,
        paste: bool,
        text: String,
    },
    SetScreenPowerMode {
        mode: u8,
    },
    RotateDevice,
}

impl ControlMessage {
    pub fn kind(&self) -> u8 {
        match self {
            ControlMessage::InjectKeycode { .. } => kind::INJECT_KEYCODE,
            ControlMessage::InjectText(_) => kind::INJECT_TEXT,
            ControlMessage::InjectTouch { .. } => kind::INJECT_TOUCH_EVENT,
            ControlMessage::InjectScroll { .. } => kind::INJECT_SCROLL_EVENT,
            ControlMessage::BackOrScreenOn { .. } => kind::BACK_OR_SCREEN_ON,
            ControlMessage::ExpandNotificationPanel => kind::EXPAND_NOTIFICATION_PANEL,
            ControlMessage::ExpandSettingsPanel => kind::EXPAND_SETTINGS_PANEL,
            ControlMessage::CollapsePanels => kind::COLLAPSE_PANELS,
            ControlMessage::GetClipboard { .. } => kind::GET_CLIPBOARD,
            ControlMessage::SetClipboard { .. } => kind::SET_CLIPBOARD,
            ControlMessage::SetScreenPowerMode { .. } => kind::SET_SCREEN_POWER_MODE,
            ControlMessage::RotateDevice => kind::ROTATE_DEVICE,
        }
    }
}

/// Device → desktop message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceMessage {
    Clipboard(String),
    AckClipboard(u64),
}
