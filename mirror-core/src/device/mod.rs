//! Device facade: screen geometry, rotation tracking and device actions.
//!
//! [`Device`] is built once per session from the [`Services`] context. It
//! owns the only rotation watcher registration (removed in
//! [`Device::release`]) and republishes every change on a `watch` channel
//! consumed by the video pipeline.

pub mod input;
pub mod mock;
pub mod screen_info;
pub mod services;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::MirrorError;
use crate::media::types::{Point, Rect, Size};
use crate::options::{LockOrientation, Options};

use input::{ACTION_DOWN, ACTION_UP, InputEvent, KeyEvent, KEYCODE_PASTE, Position};
pub use screen_info::ScreenInfo;
use services::{API_INPUT_ON_SECONDARY_DISPLAYS, API_PASTE_INJECTION, InjectMode, POWER_MODE_OFF, Services};

/// Receives device clipboard text when it changes.
pub type ClipboardListener = Box<dyn Fn(String) + Send + Sync>;

// ── Geometry ─────────────────────────────────────────────────────

/// Inputs of the geometry computation that survive rotations.
#[derive(Debug, Clone, Copy)]
struct Geometry {
    initial_rotation: u8,
    device_size: Size,
    crop: Option<Rect>,
    lock: LockOrientation,
    screen_info: ScreenInfo,
}

// ── Device ───────────────────────────────────────────────────────

pub struct Device {
    services: Services,
    display_id: u32,
    layer_stack: u32,
    supports_input_events: bool,
    geometry: Mutex<Geometry>,
    rotation: watch::Sender<u8>,
    setting_clipboard: AtomicBool,
    clipboard_listener: Mutex<Option<ClipboardListener>>,
    rotation_watcher_registered: AtomicBool,
}

impl Device {
    /// Read the display, compute the initial geometry and subscribe to
    /// rotation (and, with clipboard autosync, clipboard) changes.
    pub fn new(options: &Options, services: Services) -> Result<Arc<Self>, MirrorError> {
        let display_id = options.display_id;
        let info = services.display.display_info(display_id)?;

        let lock = match options.lock_video_orientation {
            // resolve against the rotation at startup, once
            LockOrientation::Initial => LockOrientation::Locked(info.rotation % 4),
            other => other,
        };
        let screen_info = ScreenInfo::compute(info.rotation, info.size, options.crop, options.max_size, lock);
        debug!(
            "Display {display_id}: {} rotation {} video {}",
            info.size,
            info.rotation,
            screen_info.video_size()
        );

        let supports_input_events = display_id == 0 || services.api_level >= API_INPUT_ON_SECONDARY_DISPLAYS;
        if !supports_input_events {
            warn!("Input events are not supported for secondary displays before API {API_INPUT_ON_SECONDARY_DISPLAYS}");
        }

        let (rotation, _) = watch::channel(info.rotation % 4);
        let device = Arc::new(Self {
            services,
            display_id,
            layer_stack: info.layer_stack,
            supports_input_events,
            geometry: Mutex::new(Geometry {
                initial_rotation: info.rotation % 4,
                device_size: info.size,
                crop: options.crop,
                lock,
                screen_info,
            }),
            rotation,
            setting_clipboard: AtomicBool::new(false),
            clipboard_listener: Mutex::new(None),
            rotation_watcher_registered: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&device);
        device.services.window.register_rotation_watcher(
            display_id,
            Box::new(move |rotation| {
                if let Some(device) = weak.upgrade() {
                    device.on_rotation_changed(rotation);
                }
            }),
        )?;
        device.rotation_watcher_registered.store(true, Ordering::SeqCst);

        if options.control && options.clipboard_autosync {
            let weak = Arc::downgrade(&device);
            let registered = device.services.clipboard.add_clip_changed_watcher(Box::new(move || {
                if let Some(device) = weak.upgrade() {
                    device.on_clipboard_changed();
                }
            }));
            if let Err(e) = registered {
                warn!("No clipboard notifications, copy-paste between device and computer will not work: {e}");
            }
        }

        Ok(device)
    }

    fn geometry(&self) -> MutexGuard<'_, Geometry> {
        // geometry stays consistent even if a holder panicked
        self.geometry.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Geometry ─────────────────────────────────────────────────

    pub fn screen_info(&self) -> ScreenInfo {
        self.geometry().screen_info
    }

    pub fn display_id(&self) -> u32 {
        self.display_id
    }

    pub fn layer_stack(&self) -> u32 {
        self.layer_stack
    }

    pub fn api_level(&self) -> u32 {
        self.services.api_level
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Subscribe to rotation changes. The current value is already seen.
    pub fn subscribe_rotation(&self) -> watch::Receiver<u8> {
        self.rotation.subscribe()
    }

    /// Lower the maximum video size and recompute the geometry.
    pub fn set_max_size(&self, max_size: u32) {
        let mut g = self.geometry();
        let rotation = g.screen_info.device_rotation();
        g.screen_info = ScreenInfo::compute(g.initial_rotation, g.device_size, g.crop, max_size, g.lock)
            .with_device_rotation(rotation);
        debug!("Max size set to {max_size}, video {}", g.screen_info.video_size());
    }

    pub fn on_rotation_changed(&self, rotation: u8) {
        let rotation = rotation % 4;
        {
            let mut g = self.geometry();
            g.screen_info = g.screen_info.with_device_rotation(rotation);
        }
        info!("Device rotation changed: {rotation}");
        self.rotation.send_replace(rotation);
    }

    /// Map a client position to device coordinates.
    ///
    /// `None` when the client video size does not match the current
    /// geometry, i.e. the event was generated before a rotation.
    pub fn physical_point(&self, position: &Position) -> Option<Point> {
        let info = self.screen_info();
        let unlocked = info.unlocked_video_size();
        let position = position.rotate(info.reverse_video_rotation());
        if position.screen_size != unlocked || unlocked.width == 0 || unlocked.height == 0 {
            return None;
        }

        let content = info.content_rect();
        let Point { x, y } = position.point;
        Some(Point::new(
            content.left + (x as i64 * content.width() as i64 / unlocked.width as i64) as i32,
            content.top + (y as i64 * content.height() as i64 / unlocked.height as i64) as i32,
        ))
    }

    // ── Input ────────────────────────────────────────────────────

    pub fn supports_input_events(&self) -> bool {
        self.supports_input_events
    }

    pub fn inject_event(&self, event: &InputEvent, mode: InjectMode) -> bool {
        if !self.supports_input_events {
            warn!("Cannot inject input events on display {}", self.display_id);
            return false;
        }
        self.services.input.inject_event(event, self.display_id, mode)
    }

    pub fn inject_key_event(&self, action: u8, keycode: u32, repeat: u32, metastate: u32, mode: InjectMode) -> bool {
        let event = InputEvent::Key(KeyEvent {
            action,
            keycode,
            repeat,
            metastate,
        });
        self.inject_event(&event, mode)
    }

    /// Inject a full press (down then up) of `keycode`.
    pub fn press_release_keycode(&self, keycode: u32, mode: InjectMode) -> bool {
        self.inject_key_event(ACTION_DOWN, keycode, 0, 0, InjectMode::Async)
            && self.inject_key_event(ACTION_UP, keycode, 0, 0, mode)
    }

    /// Type `text` by pasting it, then restore the previous clipboard.
    pub fn inject_text_paste(&self, text: &str) -> bool {
        if self.services.api_level < API_PASTE_INJECTION {
            warn!("Text injection through paste requires API {API_PASTE_INJECTION}");
            return false;
        }

        let backup = self.services.clipboard.text();
        self.setting_clipboard.store(true, Ordering::SeqCst);

        let ok = self.services.clipboard.set_text(text)
            && self.press_release_keycode(KEYCODE_PASTE, InjectMode::WaitForResult);
        if let Some(backup) = backup {
            self.services.clipboard.set_text(&backup);
        }

        self.setting_clipboard.store(false, Ordering::SeqCst);
        ok
    }

    pub fn is_screen_on(&self) -> bool {
        self.services.power.is_screen_on()
    }

    // ── Clipboard ────────────────────────────────────────────────

    pub fn set_clipboard_listener(&self, listener: Option<ClipboardListener>) {
        if let Ok(mut slot) = self.clipboard_listener.lock() {
            *slot = listener;
        }
    }

    fn on_clipboard_changed(&self) {
        if self.setting_clipboard.load(Ordering::SeqCst) {
            // our own change
            return;
        }
        let Ok(slot) = self.clipboard_listener.lock() else {
            return;
        };
        if let Some(listener) = slot.as_ref() {
            if let Some(text) = self.services.clipboard.text() {
                listener(text);
            }
        }
    }

    pub fn clipboard_text(&self) -> Option<String> {
        self.services.clipboard.text()
    }

    /// Set the device clipboard without echoing it back to the desktop.
    pub fn set_clipboard_text(&self, text: &str) -> bool {
        self.setting_clipboard.store(true, Ordering::SeqCst);
        let ok = self.services.clipboard.set_text(text);
        self.setting_clipboard.store(false, Ordering::SeqCst);
        if ok {
            info!("Device clipboard set");
        }
        ok
    }

    // ── Misc actions ─────────────────────────────────────────────

    pub fn set_screen_power_mode(&self, mode: u8) -> bool {
        match self.services.display.set_power_mode(mode) {
            Ok(()) => {
                info!("Device screen turned {}", if mode == POWER_MODE_OFF { "off" } else { "on" });
                true
            }
            Err(e) => {
                warn!("Could not set screen power mode: {e}");
                false
            }
        }
    }

    pub fn expand_notification_panel(&self) {
        self.services.status_bar.expand_notifications_panel();
    }

    pub fn expand_settings_panel(&self) {
        self.services.status_bar.expand_settings_panel();
    }

    pub fn collapse_panels(&self) {
        self.services.status_bar.collapse_panels();
    }

    /// Toggle between portrait and landscape, keeping auto-rotate as it was.
    pub fn rotate_device(&self) {
        let window = &self.services.window;
        let auto_rotate = !window.is_rotation_frozen();
        // 0->1, 1->0, 2->1, 3->0
        let new_rotation = (window.rotation() & 1) ^ 1;
        info!(
            "Device rotation requested: {}",
            if new_rotation == 0 { "portrait" } else { "landscape" }
        );
        window.freeze_rotation(new_rotation);
        if auto_rotate {
            window.thaw_rotation();
        }
    }

    /// Drop platform subscriptions. Idempotent.
    pub fn release(&self) {
        if self.rotation_watcher_registered.swap(false, Ordering::SeqCst) {
            self.services.window.unregister_rotation_watcher(self.display_id);
        }
        self.set_clipboard_listener(None);
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("display_id", &self.display_id)
            .field("screen_info", &self.screen_info())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockPlatform;

    fn device(platform: &MockPlatform, options: &Options) -> Arc<Device> {
        Device::new(options, platform.services()).unwrap()
    }

    #[test]
    fn physical_point_scales_into_content_rect() {
        let platform = MockPlatform::new(Size::new(1080, 1920));
        let options = Options::default().with_max_size(960);
        let device = device(&platform, &options);

        let video = device.screen_info().video_size();
        assert_eq!(video, Size::new(544, 960));

        let p = device
            .physical_point(&Position::new(272, 480, video.width, video.height))
            .unwrap();
        assert_eq!(p, Point::new(540, 960));
    }

    #[test]
    fn stale_client_size_is_dropped() {
        let platform = MockPlatform::new(Size::new(1080, 1920));
        let device = device(&platform, &Options::default());
        assert!(device.physical_point(&Position::new(10, 10, 1920, 1080)).is_none());
    }

    #[test]
    fn rotation_updates_geometry_and_notifies() {
        let platform = MockPlatform::new(Size::new(1080, 1920));
        let device = device(&platform, &Options::default());
        let mut rx = device.subscribe_rotation();
        assert!(!rx.has_changed().unwrap());

        platform.rotate(1);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);
        assert_eq!(device.screen_info().video_size(), Size::new(1920, 1080));

        device.release();
        assert!(!platform.has_rotation_watcher());
    }

    #[test]
    fn set_max_size_keeps_current_rotation() {
        let platform = MockPlatform::new(Size::new(1440, 2560));
        let device = device(&platform, &Options::default());
        platform.rotate(1);
        device.set_max_size(1920);
        assert_eq!(device.screen_info().video_size(), Size::new(1920, 1080));
    }

    #[test]
    fn paste_injection_does_not_echo_clipboard() {
        let platform = MockPlatform::new(Size::new(1080, 1920));
        let device = device(&platform, &Options::default());

        let echoed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&echoed);
        device.set_clipboard_listener(Some(Box::new(move |text| sink.lock().unwrap().push(text))));

        platform.set_clipboard("previous");
        assert_eq!(echoed.lock().unwrap().as_slice(), ["previous".to_string()]);

        assert!(device.inject_text_paste("hello"));
        assert_eq!(platform.clipboard(), Some("previous".to_string()));
        assert_eq!(echoed.lock().unwrap().len(), 1);

        let keys = platform.injected_keycodes();
        assert_eq!(keys, vec![(ACTION_DOWN, KEYCODE_PASTE), (ACTION_UP, KEYCODE_PASTE)]);
    }

    #[test]
    fn rotate_device_restores_auto_rotate() {
        let platform = MockPlatform::new(Size::new(1080, 1920));
        let device = device(&platform, &Options::default());
        device.rotate_device();
        assert_eq!(platform.frozen_rotations(), vec![1]);
        assert!(!platform.is_rotation_frozen());
    }
}
