//! In-memory platform for tests and the demo server.
//!
//! [`MockPlatform`] implements every capability trait over shared state
//! and records what the core asked it to do, so tests can drive rotations
//! and clipboard changes and inspect injected events.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::device::input::{InputEvent, KeyEvent};
use crate::device::services::{
    ClipboardService, ClipboardWatcher, DisplayInfo, DisplayService, InjectMode, InputService, PowerService,
    Projection, RotationWatcher, Services, StatusBarService, VirtualDisplay, WindowService,
};
use crate::error::MirrorError;
use crate::media::codec::InputSurface;
use crate::media::types::Size;

/// Platform version reported by default.
pub const MOCK_API_LEVEL: u32 = 33;
/// Model name reported in the device meta.
pub const MOCK_DEVICE_NAME: &str = "Mock Device";

#[derive(Default)]
struct State {
    natural_size: Size,
    rotation: u8,
    frozen: bool,
    frozen_rotations: Vec<u8>,
    rotation_watcher: Option<Arc<dyn Fn(u8) + Send + Sync>>,
    clipboard: Option<String>,
    clip_watchers: Vec<Arc<dyn Fn() + Send + Sync>>,
    events: Vec<InputEvent>,
    screen_on: bool,
    power_modes: Vec<u8>,
    panels: Vec<&'static str>,
    next_display: u64,
    live_displays: usize,
    projections: Vec<Projection>,
}

/// Shared handle to the simulated device. Clones see the same state.
#[derive(Clone)]
pub struct MockPlatform {
    api_level: u32,
    state: Arc<Mutex<State>>,
}

impl MockPlatform {
    /// A device with the given natural (rotation 0) screen size.
    pub fn new(natural_size: Size) -> Self {
        Self::with_api_level(natural_size, MOCK_API_LEVEL)
    }

    pub fn with_api_level(natural_size: Size, api_level: u32) -> Self {
        let state = State {
            natural_size,
            screen_on: true,
            ..State::default()
        };
        Self {
            api_level,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Build the capability context backed by this platform.
    pub fn services(&self) -> Services {
        let this = Arc::new(self.clone());
        Services {
            api_level: self.api_level,
            device_name: MOCK_DEVICE_NAME.to_string(),
            display: this.clone(),
            window: this.clone(),
            input: this.clone(),
            power: this.clone(),
            clipboard: this.clone(),
            status_bar: this,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Simulation ───────────────────────────────────────────────

    /// Rotate the screen and notify the rotation watcher.
    pub fn rotate(&self, rotation: u8) {
        let watcher = {
            let mut s = self.state();
            s.rotation = rotation % 4;
            s.rotation_watcher.clone()
        };
        if let Some(watcher) = watcher {
            watcher(rotation % 4);
        }
    }

    /// Change the clipboard as a device app would, notifying watchers.
    pub fn set_clipboard(&self, text: &str) {
        let watchers = {
            let mut s = self.state();
            s.clipboard = Some(text.to_string());
            s.clip_watchers.clone()
        };
        for watcher in watchers {
            watcher();
        }
    }

    pub fn set_screen_on(&self, on: bool) {
        self.state().screen_on = on;
    }

    // ── Inspection ───────────────────────────────────────────────

    pub fn clipboard(&self) -> Option<String> {
        self.state().clipboard.clone()
    }

    pub fn injected_events(&self) -> Vec<InputEvent> {
        self.state().events.clone()
    }

    /// `(action, keycode)` of every injected key event.
    pub fn injected_keycodes(&self) -> Vec<(u8, u32)> {
        self.state()
            .events
            .iter()
            .filter_map(|e| match e {
                InputEvent::Key(KeyEvent { action, keycode, .. }) => Some((*action, *keycode)),
                _ => None,
            })
            .collect()
    }

    pub fn frozen_rotations(&self) -> Vec<u8> {
        self.state().frozen_rotations.clone()
    }

    pub fn is_rotation_frozen(&self) -> bool {
        self.state().frozen
    }

    pub fn has_rotation_watcher(&self) -> bool {
        self.state().rotation_watcher.is_some()
    }

    pub fn power_modes(&self) -> Vec<u8> {
        self.state().power_modes.clone()
    }

    pub fn panels(&self) -> Vec<&'static str> {
        self.state().panels.clone()
    }

    /// Virtual displays created and not yet destroyed.
    pub fn live_displays(&self) -> usize {
        self.state().live_displays
    }

    pub fn projections(&self) -> Vec<Projection> {
        self.state().projections.clone()
    }
}

impl DisplayService for MockPlatform {
    fn display_info(&self, display_id: u32) -> Result<DisplayInfo, MirrorError> {
        if display_id != 0 {
            return Err(MirrorError::Configuration(format!("display {display_id} does not exist")));
        }
        let s = self.state();
        let size = if s.rotation % 2 == 0 {
            s.natural_size
        } else {
            s.natural_size.rotate()
        };
        Ok(DisplayInfo {
            display_id,
            size,
            rotation: s.rotation,
            layer_stack: 0,
        })
    }

    fn create_virtual_display(&self, _name: &str, _secure: bool) -> Result<VirtualDisplay, MirrorError> {
        let mut s = self.state();
        s.next_display += 1;
        s.live_displays += 1;
        Ok(VirtualDisplay(s.next_display))
    }

    fn set_display_surface(
        &self,
        _display: VirtualDisplay,
        _surface: InputSurface,
        projection: &Projection,
    ) -> Result<(), MirrorError> {
        self.state().projections.push(*projection);
        Ok(())
    }

    fn destroy_display(&self, _display: VirtualDisplay) {
        let mut s = self.state();
        s.live_displays = s.live_displays.saturating_sub(1);
    }

    fn set_power_mode(&self, mode: u8) -> Result<(), MirrorError> {
        self.state().power_modes.push(mode);
        Ok(())
    }
}

impl WindowService for MockPlatform {
    fn rotation(&self) -> u8 {
        self.state().rotation
    }

    fn is_rotation_frozen(&self) -> bool {
        self.state().frozen
    }

    fn freeze_rotation(&self, rotation: u8) {
        {
            let mut s = self.state();
            s.frozen = true;
            s.frozen_rotations.push(rotation);
        }
        if self.rotation() != rotation {
            self.rotate(rotation);
        }
    }

    fn thaw_rotation(&self) {
        self.state().frozen = false;
    }

    fn register_rotation_watcher(&self, _display_id: u32, watcher: RotationWatcher) -> Result<(), MirrorError> {
        self.state().rotation_watcher = Some(Arc::from(watcher));
        Ok(())
    }

    fn unregister_rotation_watcher(&self, _display_id: u32) {
        self.state().rotation_watcher = None;
    }
}

impl InputService for MockPlatform {
    fn inject_event(&self, event: &InputEvent, _display_id: u32, _mode: InjectMode) -> bool {
        self.state().events.push(*event);
        true
    }
}

impl PowerService for MockPlatform {
    fn is_screen_on(&self) -> bool {
        self.state().screen_on
    }
}

impl ClipboardService for MockPlatform {
    fn text(&self) -> Option<String> {
        self.state().clipboard.clone()
    }

    fn set_text(&self, text: &str) -> bool {
        self.set_clipboard(text);
        true
    }

    fn add_clip_changed_watcher(&self, watcher: ClipboardWatcher) -> Result<(), MirrorError> {
        self.state().clip_watchers.push(Arc::from(watcher));
        Ok(())
    }
}

impl StatusBarService for MockPlatform {
    fn expand_notifications_panel(&self) {
        self.state().panels.push("notifications");
    }

    fn expand_settings_panel(&self) {
        self.state().panels.push("settings");
    }

    fn collapse_panels(&self) {
        self.state().panels.push("collapse");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_info_follows_rotation() {
        let platform = MockPlatform::new(Size::new(1080, 1920));
        let services = platform.services();
        assert_eq!(services.display.display_info(0).unwrap().size, Size::new(1080, 1920));

        platform.rotate(3);
        let info = services.display.display_info(0).unwrap();
        assert_eq!(info.size, Size::new(1920, 1080));
        assert_eq!(info.rotation, 3);
        assert!(services.display.display_info(1).is_err());
    }

    #[test]
    fn virtual_displays_are_counted() {
        let platform = MockPlatform::new(Size::new(800, 600));
        let d = platform.create_virtual_display("test", false).unwrap();
        assert_eq!(platform.live_displays(), 1);
        platform.destroy_display(d);
        assert_eq!(platform.live_displays(), 0);
    }
}
