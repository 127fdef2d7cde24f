//! Screen / surface geometry.
//!
//! | Field                 | Meaning                                          |
//! |-----------------------|--------------------------------------------------|
//! | `content_rect`        | captured area, current rotation, possibly cropped |
//! | `unlocked_video_size` | encoded size before the orientation lock         |
//! | `device_rotation`     | quarter turns from the natural orientation       |
//! | `locked_orientation`  | `None` when the video follows the device         |

use tracing::warn;

use crate::media::types::{Rect, Size};
use crate::options::LockOrientation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenInfo {
    content_rect: Rect,
    unlocked_video_size: Size,
    device_rotation: u8,
    locked_orientation: Option<u8>,
}

impl ScreenInfo {
    /// Compute the geometry of a display of `device_size` at `rotation`.
    ///
    /// `crop` is expressed in the natural orientation. A crop outside the
    /// display leaves an empty content rectangle.
    pub fn compute(
        rotation: u8,
        device_size: Size,
        crop: Option<Rect>,
        max_size: u32,
        lock: LockOrientation,
    ) -> Self {
        let rotation = rotation % 4;
        let locked_orientation = match lock {
            LockOrientation::Unlocked => None,
            LockOrientation::Initial => Some(rotation),
            LockOrientation::Locked(r) => Some(r % 4),
        };

        let mut content_rect = device_size.to_rect();
        if let Some(crop) = crop {
            let crop = if rotation % 2 != 0 { crop.flip() } else { crop };
            content_rect = match content_rect.intersect(&crop) {
                Some(r) => r,
                None => {
                    warn!("Crop rectangle ({crop}) does not intersect device screen ({device_size})");
                    Rect::default()
                }
            };
        }

        let unlocked_video_size = compute_video_size(content_rect.size(), max_size);
        Self {
            content_rect,
            unlocked_video_size,
            device_rotation: rotation,
            locked_orientation,
        }
    }

    pub fn content_rect(&self) -> Rect {
        self.content_rect
    }

    pub fn unlocked_video_size(&self) -> Size {
        self.unlocked_video_size
    }

    pub fn device_rotation(&self) -> u8 {
        self.device_rotation
    }

    pub fn locked_orientation(&self) -> Option<u8> {
        self.locked_orientation
    }

    /// Rotation to apply to the device rotation to reach the locked one.
    pub fn video_rotation(&self) -> u8 {
        match self.locked_orientation {
            None => 0,
            Some(locked) => (self.device_rotation + 4 - locked) % 4,
        }
    }

    /// Rotation to apply to the locked orientation to reach the device one.
    pub fn reverse_video_rotation(&self) -> u8 {
        match self.locked_orientation {
            None => 0,
            Some(locked) => (locked + 4 - self.device_rotation) % 4,
        }
    }

    /// Size of the encoded frames, orientation lock applied.
    pub fn video_size(&self) -> Size {
        if self.video_rotation() % 2 == 0 {
            self.unlocked_video_size
        } else {
            self.unlocked_video_size.rotate()
        }
    }

    /// Same geometry seen from another device rotation.
    pub fn with_device_rotation(&self, rotation: u8) -> Self {
        let rotation = rotation % 4;
        if rotation == self.device_rotation {
            return *self;
        }
        let orientation_changed = (self.device_rotation + rotation) % 2 != 0;
        let (content_rect, unlocked_video_size) = if orientation_changed {
            (self.content_rect.flip(), self.unlocked_video_size.rotate())
        } else {
            (self.content_rect, self.unlocked_video_size)
        };
        Self {
            content_rect,
            unlocked_video_size,
            device_rotation: rotation,
            locked_orientation: self.locked_orientation,
        }
    }
}

/// Round to the encoder's 8-pixel grid, downscaling to `max_size` if set.
pub fn compute_video_size(size: Size, max_size: u32) -> Size {
    let mut w = size.width & !7;
    let mut h = size.height & !7;
    if max_size > 0 {
        let portrait = h > w;
        let (mut major, mut minor) = if portrait { (h, w) } else { (w, h) };
        if major > max_size {
            let minor_exact = (minor as u64 * max_size as u64 / major as u64) as u32;
            // +4 to round to the nearest multiple of 8
            minor = (minor_exact + 4) & !7;
            major = max_size;
        }
        (w, h) = if portrait { (minor, major) } else { (major, minor) };
    }
    Size::new(w, h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_size_rounds_to_multiple_of_8() {
        assert_eq!(compute_video_size(Size::new(1081, 2403), 0), Size::new(1080, 2400));
    }

    #[test]
    fn video_size_scales_major_side() {
        assert_eq!(compute_video_size(Size::new(1080, 2400), 1024), Size::new(464, 1024));
        assert_eq!(compute_video_size(Size::new(2400, 1080), 1024), Size::new(1024, 464));
        // already small enough
        assert_eq!(compute_video_size(Size::new(800, 600), 1024), Size::new(800, 600));
    }

    #[test]
    fn crop_is_flipped_when_rotated() {
        let crop = Rect::new(0, 100, 1080, 1100);
        let portrait = ScreenInfo::compute(0, Size::new(1080, 1920), Some(crop), 0, LockOrientation::Unlocked);
        assert_eq!(portrait.content_rect(), crop);
        assert_eq!(portrait.video_size(), Size::new(1080, 1000));

        let landscape = ScreenInfo::compute(1, Size::new(1920, 1080), Some(crop), 0, LockOrientation::Unlocked);
        assert_eq!(landscape.content_rect(), Rect::new(100, 0, 1100, 1080));
    }

    #[test]
    fn crop_outside_screen_is_empty() {
        let crop = Rect::new(5000, 5000, 5100, 5100);
        let info = ScreenInfo::compute(0, Size::new(1080, 1920), Some(crop), 0, LockOrientation::Unlocked);
        assert!(info.content_rect().is_empty());
        assert_eq!(info.video_size(), Size::new(0, 0));
    }

    #[test]
    fn rotation_flips_geometry() {
        let info = ScreenInfo::compute(0, Size::new(1080, 1920), None, 0, LockOrientation::Unlocked);
        let rotated = info.with_device_rotation(1);
        assert_eq!(rotated.video_size(), Size::new(1920, 1080));
        assert_eq!(rotated.device_rotation(), 1);
        assert_eq!(rotated.with_device_rotation(2).video_size(), Size::new(1080, 1920));
    }

    #[test]
    fn locked_orientation_keeps_video_size() {
        let info = ScreenInfo::compute(0, Size::new(1080, 1920), None, 0, LockOrientation::Initial);
        assert_eq!(info.locked_orientation(), Some(0));

        let rotated = info.with_device_rotation(1);
        assert_eq!(rotated.video_rotation(), 1);
        assert_eq!(rotated.reverse_video_rotation(), 3);
        // the unlocked size follows the device, the video stays portrait
        assert_eq!(rotated.unlocked_video_size(), Size::new(1920, 1080));
        assert_eq!(rotated.video_size(), Size::new(1080, 1920));
    }
}
