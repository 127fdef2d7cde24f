//! Capability provider: the platform services the mirroring core needs.
//!
//! Each trait is one narrow capability. A platform supplies one
//! implementation per capability, chosen once for its version, and bundles
//! them into a [`Services`] context handed to every component. Nothing in
//! the core looks up services globally or branches on the platform version
//! except through [`Services::api_level`].

use std::sync::Arc;

use crate::device::input::InputEvent;
use crate::error::MirrorError;
use crate::media::codec::InputSurface;
use crate::media::types::{Rect, Size};

/// First platform version where input can target secondary displays.
pub const API_INPUT_ON_SECONDARY_DISPLAYS: u32 = 29;
/// First platform version supporting text injection via paste.
pub const API_PASTE_INJECTION: u32 = 24;
/// Last platform version allowing secure virtual displays.
pub const API_SECURE_DISPLAY_MAX: u32 = 30;

pub const POWER_MODE_OFF: u8 = 0;
pub const POWER_MODE_NORMAL: u8 = 2;

/// Invoked with the new rotation (0..=3) from a platform thread.
pub type RotationWatcher = Box<dyn Fn(u8) + Send + Sync>;

/// Invoked when the primary clip changes, from a platform thread.
pub type ClipboardWatcher = Box<dyn Fn() + Send + Sync>;

// ── Display ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayInfo {
    pub display_id: u32,
    /// Size in the current rotation.
    pub size: Size,
    pub rotation: u8,
    pub layer_stack: u32,
}

/// Handle of a virtual display mirroring the screen onto a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VirtualDisplay(pub u64);

/// How the screen content is mapped onto the encoder surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Projection {
    pub orientation: u8,
    pub content_rect: Rect,
    pub video_rect: Rect,
    pub layer_stack: u32,
}

pub trait DisplayService: Send + Sync {
    fn display_info(&self, display_id: u32) -> Result<DisplayInfo, MirrorError>;

    fn create_virtual_display(&self, name: &str, secure: bool) -> Result<VirtualDisplay, MirrorError>;

    fn set_display_surface(
        &self,
        display: VirtualDisplay,
        surface: InputSurface,
        projection: &Projection,
    ) -> Result<(), MirrorError>;

    fn destroy_display(&self, display: VirtualDisplay);

    fn set_power_mode(&self, mode: u8) -> Result<(), MirrorError>;
}

// ── Window ───────────────────────────────────────────────────────

pub trait WindowService: Send + Sync {
    fn rotation(&self) -> u8;

    fn is_rotation_frozen(&self) -> bool;

    fn freeze_rotation(&self, rotation: u8);

    fn thaw_rotation(&self);

    fn register_rotation_watcher(&self, display_id: u32, watcher: RotationWatcher) -> Result<(), MirrorError>;

    fn unregister_rotation_watcher(&self, display_id: u32);
}

// ── Input ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InjectMode {
    #[default]
    Async,
    WaitForResult,
    WaitForFinish,
}

pub trait InputService: Send + Sync {
    /// Returns whether the event was accepted.
    fn inject_event(&self, event: &InputEvent, display_id: u32, mode: InjectMode) -> bool;
}

// ── Power / clipboard / status bar ───────────────────────────────

pub trait PowerService: Send + Sync {
    fn is_screen_on(&self) -> bool;
}

pub trait ClipboardService: Send + Sync {
    fn text(&self) -> Option<String>;

    fn set_text(&self, text: &str) -> bool;

    /// Fails with [`MirrorError::Unsupported`] when the platform offers
    /// no clipboard notifications.
    fn add_clip_changed_watcher(&self, watcher: ClipboardWatcher) -> Result<(), MirrorError>;
}

pub trait StatusBarService: Send + Sync {
    fn expand_notifications_panel(&self);

    fn expand_settings_panel(&self);

    fn collapse_panels(&self);
}

// ── Services ─────────────────────────────────────────────────────

/// Explicit context bundling every platform capability.
#[derive(Clone)]
pub struct Services {
    pub api_level: u32,
    /// Model name sent to the desktop in the device meta.
    pub device_name: String,
    pub display: Arc<dyn DisplayService>,
    pub window: Arc<dyn WindowService>,
    pub input: Arc<dyn InputService>,
    pub power: Arc<dyn PowerService>,
    pub clipboard: Arc<dyn ClipboardService>,
    pub status_bar: Arc<dyn StatusBarService>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("api_level", &self.api_level)
            .field("device_name", &self.device_name)
            .finish_non_exhaustive()
    }
}
