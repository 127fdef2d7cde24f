//! Binary framing of control and device messages.
//!
//! Both codecs plug into `tokio_util::codec` so the control socket can be
//! wrapped in `FramedRead` / `FramedWrite`. The decoder consumes nothing
//! until a complete message is buffered; trailing bytes of the next
//! message stay in the buffer for the next call.
//!
//! All integers are big-endian. A position is
//! `x: i32, y: i32, screen_width: u16, screen_height: u16`.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::control::message::{
    CLIPBOARD_TEXT_MAX_LENGTH, ControlMessage, CopyKey, DEVICE_CLIPBOARD_TEXT_MAX_LENGTH, DeviceMessage,
    INJECT_TEXT_MAX_LENGTH, kind,
};
use crate::device::input::Position;
use crate::error::{MirrorError, ProtocolError};

const POSITION_SIZE: usize = 12;
const INJECT_KEYCODE_SIZE: usize = 1 + 1 + 4 + 4 + 4;
const INJECT_TEXT_HEADER_SIZE: usize = 1 + 4;
const INJECT_TOUCH_SIZE: usize = 1 + 1 + 8 + POSITION_SIZE + 2 + 4 + 4;
const INJECT_SCROLL_SIZE: usize = 1 + POSITION_SIZE + 2 + 2 + 4;
const SET_CLIPBOARD_HEADER_SIZE: usize = 1 + 8 + 1 + 4;

/// Truncate `s` to at most `max` bytes without splitting a character.
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn read_u32_at(src: &[u8], offset: usize) -> Option<usize> {
    let bytes = src.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize)
}

fn read_text(buf: &mut impl Buf, len: usize) -> Result<String, ProtocolError> {
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    String::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8)
}

fn read_position(buf: &mut impl Buf) -> Position {
    let x = buf.get_i32();
    let y = buf.get_i32();
    let w = buf.get_u16();
    let h = buf.get_u16();
    Position::new(x, y, w as u32, h as u32)
}

fn write_position(dst: &mut BytesMut, p: &Position) {
    dst.put_i32(p.point.x);
    dst.put_i32(p.point.y);
    dst.put_u16(p.screen_size.width.min(u16::MAX as u32) as u16);
    dst.put_u16(p.screen_size.height.min(u16::MAX as u32) as u16);
}

/// `0xffff` is 1.0, anything else is a 16-bit fraction.
fn u16_fixed_to_f32(v: u16) -> f32 {
    if v == u16::MAX { 1.0 } else { v as f32 / 65536.0 }
}

fn f32_to_u16_fixed(f: f32) -> u16 {
    if f >= 1.0 {
        u16::MAX
    } else if f <= 0.0 {
        0
    } else {
        (f * 65536.0) as u16
    }
}

// ── ControlMessageCodec ──────────────────────────────────────────

/// Desktop → device messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlMessageCodec;

impl ControlMessageCodec {
    /// Total length of the message at the front of `src`, once known.
    fn frame_len(src: &[u8]) -> Result<Option<usize>, ProtocolError> {
        let Some(&tag) = src.first() else {
            return Ok(None);
        };
        let len = match tag {
            kind::INJECT_KEYCODE => INJECT_KEYCODE_SIZE,
            kind::INJECT_TEXT => {
                let Some(len) = read_u32_at(src, 1) else {
                    return Ok(None);
                };
                if len > INJECT_TEXT_MAX_LENGTH {
                    return Err(ProtocolError::TextTooLong {
                        len,
                        max: INJECT_TEXT_MAX_LENGTH,
                    });
                }
                INJECT_TEXT_HEADER_SIZE + len
            }
            kind::INJECT_TOUCH_EVENT => INJECT_TOUCH_SIZE,
            kind::INJECT_SCROLL_EVENT => INJECT_SCROLL_SIZE,
            kind::BACK_OR_SCREEN_ON | kind::GET_CLIPBOARD | kind::SET_SCREEN_POWER_MODE => 2,
            kind::EXPAND_NOTIFICATION_PANEL
            | kind::EXPAND_SETTINGS_PANEL
            | kind::COLLAPSE_PANELS
            | kind::ROTATE_DEVICE => 1,
            kind::SET_CLIPBOARD => {
                let Some(len) = read_u32_at(src, 10) else {
                    return Ok(None);
                };
                if len > CLIPBOARD_TEXT_MAX_LENGTH {
                    return Err(ProtocolError::TextTooLong {
                        len,
                        max: CLIPBOARD_TEXT_MAX_LENGTH,
                    });
                }
                SET_CLIPBOARD_HEADER_SIZE + len
            }
            other => return Err(ProtocolError::UnknownMessageType(other)),
        };
        Ok(Some(len))
    }
}

impl Decoder for ControlMessageCodec {
    type Item = ControlMessage;
    type Error = MirrorError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(len) = Self::frame_len(src)? else {
            return Ok(None);
        };
        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(len);
        let tag = frame.get_u8();
        let msg = match tag {
            kind::INJECT_KEYCODE => ControlMessage::InjectKeycode {
                action: frame.get_u8(),
                keycode: frame.get_u32(),
                repeat: frame.get_u32(),
                metastate: frame.get_u32(),
            },
            kind::INJECT_TEXT => {
                let len = frame.get_u32() as usize;
                ControlMessage::InjectText(read_text(&mut frame, len)?)
            }
            kind::INJECT_TOUCH_EVENT => ControlMessage::InjectTouch {
                action: frame.get_u8(),
                pointer_id: frame.get_u64(),
                position: read_position(&mut frame),
                pressure: u16_fixed_to_f32(frame.get_u16()),
                action_button: frame.get_u32(),
                buttons: frame.get_u32(),
            },
            kind::INJECT_SCROLL_EVENT => ControlMessage::InjectScroll {
                position: read_position(&mut frame),
                hscroll: frame.get_i16(),
                vscroll: frame.get_i16(),
                buttons: frame.get_u32(),
            },
            kind::BACK_OR_SCREEN_ON => ControlMessage::BackOrScreenOn { action: frame.get_u8() },
            kind::EXPAND_NOTIFICATION_PANEL => ControlMessage::ExpandNotificationPanel,
            kind::EXPAND_SETTINGS_PANEL => ControlMessage::ExpandSettingsPanel,
            kind::COLLAPSE_PANELS => ControlMessage::CollapsePanels,
            kind::GET_CLIPBOARD => {
                let value = frame.get_u8();
                let copy_key = CopyKey::from_u8(value).ok_or(ProtocolError::InvalidField {
                    field: "copy key",
                    value,
                })?;
                ControlMessage::GetClipboard { copy_key }
            }
            kind::SET_CLIPBOARD => {
                let sequence = frame.get_u64();
                let paste = frame.get_u8() != 0;
                let len = frame.get_u32() as usize;
                ControlMessage::SetClipboard {
                    sequence,
                    paste,
                    text: read_text(&mut frame, len)?,
                }
            }
            kind::SET_SCREEN_POWER_MODE => ControlMessage::SetScreenPowerMode { mode: frame.get_u8() },
            kind::ROTATE_DEVICE => ControlMessage::RotateDevice,
            other => return Err(ProtocolError::UnknownMessageType(other).into()),
        };
        Ok(Some(msg))
    }
}

impl Encoder<ControlMessage> for ControlMessageCodec {
    type Error = MirrorError;

    fn encode(&mut self, item: ControlMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.put_u8(item.kind());
        match item {
            ControlMessage::InjectKeycode {
                action,
                keycode,
                repeat,
                metastate,
            } => {
                dst.put_u8(action);
                dst.put_u32(keycode);
                dst.put_u32(repeat);
                dst.put_u32(metastate);
            }
            ControlMessage::InjectText(text) => {
                if text.len() > INJECT_TEXT_MAX_LENGTH {
                    return Err(ProtocolError::TextTooLong {
                        len: text.len(),
                        max: INJECT_TEXT_MAX_LENGTH,
                    }
                    .into());
                }
                dst.put_u32(text.len() as u32);
                dst.put_slice(text.as_bytes());
            }
            ControlMessage::InjectTouch {
                action,
                pointer_id,
                position,
                pressure,
                action_button,
                buttons,
            } => {
                dst.put_u8(action);
                dst.put_u64(pointer_id);
                write_position(dst, &position);
                dst.put_u16(f32_to_u16_fixed(pressure));
                dst.put_u32(action_button);
                dst.put_u32(buttons);
            }
            ControlMessage::InjectScroll {
                position,
                hscroll,
                vscroll,
                buttons,
            } => {
                write_position(dst, &position);
                dst.put_i16(hscroll);
                dst.put_i16(vscroll);
                dst.put_u32(buttons);
            }
            ControlMessage::BackOrScreenOn { action } => dst.put_u8(action),
            ControlMessage::GetClipboard { copy_key } => dst.put_u8(copy_key.as_u8()),
            ControlMessage::SetClipboard { sequence, paste, text } => {
                let text = truncate_utf8(&text, CLIPBOARD_TEXT_MAX_LENGTH);
                dst.put_u64(sequence);
                dst.put_u8(paste as u8);
                dst.put_u32(text.len() as u32);
                dst.put_slice(text.as_bytes());
            }
            ControlMessage::SetScreenPowerMode { mode } => dst.put_u8(mode),
            ControlMessage::ExpandNotificationPanel
            | ControlMessage::ExpandSettingsPanel
            | ControlMessage::CollapsePanels
            | ControlMessage::RotateDevice => {}
        }
        Ok(())
    }
}

// ── DeviceMessageCodec ───────────────────────────────────────────

/// Device → desktop messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceMessageCodec;

impl Encoder<DeviceMessage> for DeviceMessageCodec {
    type Error = MirrorError;

    fn encode(&mut self, item: DeviceMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            DeviceMessage::Clipboard(text) => {
                let text = truncate_utf8(&text, DEVICE_CLIPBOARD_TEXT_MAX_LENGTH);
                dst.reserve(5 + text.len());
                dst.put_u8(kind::DEVICE_CLIPBOARD);
                dst.put_u32(text.len() as u32);
                dst.put_slice(text.as_bytes());
            }
            DeviceMessage::AckClipboard(sequence) => {
                dst.put_u8(kind::DEVICE_ACK_CLIPBOARD);
                dst.put_u64(sequence);
            }
        }
        Ok(())
    }
}

impl Decoder for DeviceMessageCodec {
    type Item = DeviceMessage;
    type Error = MirrorError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(&tag) = src.first() else {
            return Ok(None);
        };
        let len = match tag {
            kind::DEVICE_CLIPBOARD => match read_u32_at(src, 1) {
                Some(len) if len > DEVICE_CLIPBOARD_TEXT_MAX_LENGTH => {
                    return Err(ProtocolError::TextTooLong {
                        len,
                        max: DEVICE_CLIPBOARD_TEXT_MAX_LENGTH,
                    }
                    .into());
                }
                Some(len) => 5 + len,
                None => return Ok(None),
            },
            kind::DEVICE_ACK_CLIPBOARD => 9,
            other => return Err(ProtocolError::UnknownMessageType(other).into()),
        };
        if src.len() < len {
            return Ok(None);
        }

        let mut frame = src.split_to(len);
        frame.advance(1);
        let msg = if tag == kind::DEVICE_CLIPBOARD {
            let len = frame.get_u32() as usize;
            DeviceMessage::Clipboard(read_text(&mut frame, len)?)
        } else {
            DeviceMessage::AckClipboard(frame.get_u64())
        };
        Ok(Some(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::input::ACTION_DOWN;

    fn encode(msg: ControlMessage) -> BytesMut {
        let mut buf = BytesMut::new();
        ControlMessageCodec.encode(msg, &mut buf).unwrap();
        buf
    }

    #[test]
    fn keycode_layout() {
        let buf = encode(ControlMessage::InjectKeycode {
            action: ACTION_DOWN,
            keycode: 66,
            repeat: 5,
            metastate: 0x41,
        });
        assert_eq!(
            &buf[..],
            &[0, 0, 0, 0, 0, 66, 0, 0, 0, 5, 0, 0, 0, 0x41]
        );
    }

    #[test]
    fn decode_every_message_kind() {
        let messages = vec![
            ControlMessage::InjectKeycode {
                action: 1,
                keycode: 4,
                repeat: 0,
                metastate: 0,
            },
            ControlMessage::InjectText("héllo".into()),
            ControlMessage::InjectTouch {
                action: 0,
                pointer_id: u64::MAX - 1,
                position: Position::new(100, 200, 1080, 1920),
                pressure: 1.0,
                action_button: 1,
                buttons: 1,
            },
            ControlMessage::InjectScroll {
                position: Position::new(5, 6, 800, 600),
                hscroll: -1,
                vscroll: 2,
                buttons: 0,
            },
            ControlMessage::BackOrScreenOn { action: 0 },
            ControlMessage::ExpandNotificationPanel,
            ControlMessage::ExpandSettingsPanel,
            ControlMessage::CollapsePanels,
            ControlMessage::GetClipboard { copy_key: CopyKey::Cut },
            ControlMessage::SetClipboard {
                sequence: 42,
                paste: true,
                text: "clip".into(),
            },
            ControlMessage::SetScreenPowerMode { mode: 2 },
            ControlMessage::RotateDevice,
        ];

        let mut buf = BytesMut::new();
        for msg in &messages {
            ControlMessageCodec.encode(msg.clone(), &mut buf).unwrap();
        }
        for expected in messages {
            assert_eq!(ControlMessageCodec.decode(&mut buf).unwrap(), Some(expected));
        }
        assert!(buf.is_empty());
        assert_eq!(ControlMessageCodec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn partial_message_stays_buffered() {
        let full = encode(ControlMessage::SetClipboard {
            sequence: 7,
            paste: false,
            text: "abcdef".into(),
        });
        let mut buf = BytesMut::from(&full[..9]);
        assert_eq!(ControlMessageCodec.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 9);

        buf.extend_from_slice(&full[9..]);
        assert!(ControlMessageCodec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn oversized_text_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(kind::INJECT_TEXT);
        buf.put_u32(301);
        let err = ControlMessageCodec.decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            MirrorError::Protocol(ProtocolError::TextTooLong { len: 301, max: 300 })
        ));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut buf = BytesMut::from(&[0xEEu8][..]);
        let err = ControlMessageCodec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, MirrorError::Protocol(ProtocolError::UnknownMessageType(0xEE))));
    }

    #[test]
    fn device_messages_round_trip() {
        let mut buf = BytesMut::new();
        DeviceMessageCodec
            .encode(DeviceMessage::Clipboard("copied".into()), &mut buf)
            .unwrap();
        DeviceMessageCodec.encode(DeviceMessage::AckClipboard(9), &mut buf).unwrap();
        assert_eq!(&buf[..5], &[0, 0, 0, 0, 6]);

        assert_eq!(
            DeviceMessageCodec.decode(&mut buf).unwrap(),
            Some(DeviceMessage::Clipboard("copied".into()))
        );
        assert_eq!(DeviceMessageCodec.decode(&mut buf).unwrap(), Some(DeviceMessage::AckClipboard(9)));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_utf8("héllo", 2), "h");
        assert_eq!(truncate_utf8("héllo", 3), "hé");
        assert_eq!(truncate_utf8("abc", 10), "abc");
    }
}
