//! ADTS framing for raw AAC streams.
//!
//! When per-packet metadata is disabled the desktop has no other way to
//! find AAC frame boundaries, so each access unit gets a 7-byte ADTS
//! header (MPEG-4, AAC-LC, no CRC).

/// Size of an ADTS header without CRC.
pub const ADTS_HEADER_SIZE: usize = 7;

const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// AAC-LC audio object type.
const PROFILE_LC: u8 = 2;

/// Build the ADTS header for one AAC frame of `payload_len` bytes.
///
/// Returns `None` for a sample rate ADTS cannot express.
pub fn adts_header(payload_len: usize, sample_rate: u32, channels: u8) -> Option<[u8; ADTS_HEADER_SIZE]> {
    let freq_index = SAMPLE_RATES.iter().position(|&r| r == sample_rate)? as u8;
    let frame_len = payload_len + ADTS_HEADER_SIZE;
    if frame_len > 0x1FFF {
        return None;
    }

    Some([
        0xFF,
        0xF1,
        ((PROFILE_LC - 1) << 6) | (freq_index << 2) | ((channels >> 2) & 0x1),
        ((channels & 0x3) << 6) | ((frame_len >> 11) as u8 & 0x3),
        ((frame_len >> 3) & 0xFF) as u8,
        (((frame_len & 0x7) as u8) << 5) | 0x1F,
        0xFC,
    ])
}
