//! Buffer flags reported by hardware encoders and the packet flag bits
//! carried on the wire.

use bitflags::bitflags;

bitflags! {
    /// Attributes of one encoded output buffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferFlags: u32 {
        /// The buffer holds a key frame.
        const KEY_FRAME = 0x1;
        /// The buffer holds codec initialisation data, not media.
        const CODEC_CONFIG = 0x2;
        /// Last buffer of the stream.
        const END_OF_STREAM = 0x4;
    }
}

/// Bit 63 of the frame-meta word: the packet is a config packet.
pub const PACKET_FLAG_CONFIG: u64 = 1 << 63;

/// Bit 62 of the frame-meta word: the packet is a key frame.
pub const PACKET_FLAG_KEY_FRAME: u64 = 1 << 62;

/// Mask of the bits left for the presentation timestamp.
pub const PACKET_PTS_MASK: u64 = PACKET_FLAG_KEY_FRAME - 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_flags_do_not_overlap_pts() {
        assert_eq!(PACKET_FLAG_CONFIG & PACKET_PTS_MASK, 0);
        assert_eq!(PACKET_FLAG_KEY_FRAME & PACKET_PTS_MASK, 0);
        assert_eq!(PACKET_FLAG_CONFIG & PACKET_FLAG_KEY_FRAME, 0);
    }

    #[test]
    fn buffer_flags_compose() {
        let f = BufferFlags::KEY_FRAME | BufferFlags::END_OF_STREAM;
        assert!(f.contains(BufferFlags::KEY_FRAME));
        assert!(!f.contains(BufferFlags::CODEC_CONFIG));
    }
}
