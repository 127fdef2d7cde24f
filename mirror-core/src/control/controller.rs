//! Control channel processor.
//!
//! ```text
//!   control socket ──FramedRead──▶ Controller ──▶ Device actions
//!         ▲                                  │
//!         └──FramedWrite── DeviceMessageSender ◀── clipboard changes, acks
//! ```
//!
//! The reader runs in the processor task; the sender runs in a child task
//! that is cancelled and joined before the processor reports termination.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control::codec::ControlMessageCodec;
use crate::control::message::{ControlMessage, CopyKey, SEQUENCE_INVALID};
use crate::control::sender::DeviceMessageSender;
use crate::device::Device;
use crate::device::input::{
    ACTION_DOWN, InputEvent, KEYCODE_BACK, KEYCODE_COPY, KEYCODE_CUT, KEYCODE_PASTE, KEYCODE_POWER, MotionEvent,
    Position, ScrollEvent,
};
use crate::device::services::{API_PASTE_INJECTION, InjectMode};
use crate::error::MirrorError;
use crate::task::{AsyncProcessor, ProcessorTask, TerminationListener};

pub struct Controller<S> {
    device: Arc<Device>,
    sender: DeviceMessageSender,
    stream: Option<S>,
    power_on: bool,
    task: ProcessorTask,
}

impl<S> Controller<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// `clipboard_autosync` forwards every device clipboard change to the
    /// desktop.
    pub fn new(device: Arc<Device>, stream: S, clipboard_autosync: bool, power_on: bool) -> Self {
        let sender = DeviceMessageSender::new();
        if clipboard_autosync {
            let autosync = sender.clone();
            device.set_clipboard_listener(Some(Box::new(move |text| autosync.push_clipboard_text(text))));
        }
        Self {
            device,
            sender,
            stream: Some(stream),
            power_on,
            task: ProcessorTask::new("Controller"),
        }
    }

    pub fn sender(&self) -> &DeviceMessageSender {
        &self.sender
    }
}

async fn run<S>(
    device: Arc<Device>,
    sender: DeviceMessageSender,
    stream: S,
    power_on: bool,
    stop: CancellationToken,
) -> Result<(), MirrorError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    if power_on && device.supports_input_events() && !device.is_screen_on() {
        info!("Turning the device screen on");
        device.press_release_keycode(KEYCODE_POWER, InjectMode::Async);
    }

    let (reader, writer) = tokio::io::split(stream);

    let sender_stop = stop.child_token();
    let sender_task = {
        let sender = sender.clone();
        let sender_stop = sender_stop.clone();
        tokio::spawn(async move { sender.run(writer, sender_stop).await })
    };

    let result = read_messages(&device, &sender, reader, &stop).await;

    sender_stop.cancel();
    match sender_task.await {
        Ok(Err(e)) if !e.is_broken_pipe() => warn!("Device message sender failed: {e}"),
        Err(e) => warn!("Device message sender task: {e}"),
        _ => {}
    }
    result
}

async fn read_messages<R>(
    device: &Arc<Device>,
    sender: &DeviceMessageSender,
    reader: R,
    stop: &CancellationToken,
) -> Result<(), MirrorError>
where
    R: AsyncRead + Unpin,
{
    let mut framed = FramedRead::new(reader, ControlMessageCodec);
    loop {
        let next = tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            next = framed.next() => next,
        };
        match next {
            Some(Ok(msg)) => tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                handled = dispatch(device, sender, msg) => handled?,
            },
            Some(Err(e)) => return Err(e),
            None => {
                debug!("Control channel closed by the desktop");
                return Ok(());
            }
        }
    }
}

// ── Dispatch ─────────────────────────────────────────────────────

/// Run one message on the blocking pool. Injection and clipboard calls may
/// wait on platform IPC; messages are still handled one at a time, in order.
async fn dispatch(device: &Arc<Device>, sender: &DeviceMessageSender, msg: ControlMessage) -> Result<(), MirrorError> {
    let device = Arc::clone(device);
    let sender = sender.clone();
    tokio::task::spawn_blocking(move || handle_message(&device, &sender, msg))
        .await
        .map_err(|e| MirrorError::Io(std::io::Error::other(e)))
}

fn handle_message(device: &Device, sender: &DeviceMessageSender, msg: ControlMessage) {
    debug!("Control message: {msg:?}");
    let input = device.supports_input_events();
    match msg {
        ControlMessage::InjectKeycode {
            action,
            keycode,
            repeat,
            metastate,
        } => {
            if input {
                device.inject_key_event(action, keycode, repeat, metastate, InjectMode::Async);
            }
        }
        ControlMessage::InjectText(text) => {
            if input && !device.inject_text_paste(&text) {
                warn!("Could not inject text");
            }
        }
        ControlMessage::InjectTouch {
            action,
            pointer_id,
            position,
            pressure,
            action_button,
            buttons,
        } => {
            if input {
                inject_touch(device, action, pointer_id, &position, pressure, action_button, buttons);
            }
        }
        ControlMessage::InjectScroll {
            position,
            hscroll,
            vscroll,
            buttons,
        } => {
            if input {
                inject_scroll(device, &position, hscroll, vscroll, buttons);
            }
        }
        ControlMessage::BackOrScreenOn { action } => {
            if input {
                press_back_or_turn_screen_on(device, action);
            }
        }
        ControlMessage::ExpandNotificationPanel => device.expand_notification_panel(),
        ControlMessage::ExpandSettingsPanel => device.expand_settings_panel(),
        ControlMessage::CollapsePanels => device.collapse_panels(),
        ControlMessage::GetClipboard { copy_key } => get_clipboard(device, sender, copy_key, input),
        ControlMessage::SetClipboard { sequence, paste, text } => {
            set_clipboard(device, sender, &text, paste && input, sequence)
        }
        ControlMessage::SetScreenPowerMode { mode } => {
            if input {
                device.set_screen_power_mode(mode);
            }
        }
        ControlMessage::RotateDevice => device.rotate_device(),
    }
}

fn inject_touch(
    device: &Device,
    action: u8,
    pointer_id: u64,
    position: &Position,
    pressure: f32,
    action_button: u32,
    buttons: u32,
) -> bool {
    let Some(point) = device.physical_point(position) else {
        debug!("Ignore touch event, it was generated for a different device size");
        return false;
    };
    let event = InputEvent::Motion(MotionEvent {
        action,
        pointer_id,
        point,
        pressure: pressure.clamp(0.0, 1.0),
        action_button,
        buttons,
    });
    device.inject_event(&event, InjectMode::Async)
}

fn inject_scroll(device: &Device, position: &Position, hscroll: i16, vscroll: i16, buttons: u32) -> bool {
    let Some(point) = device.physical_point(position) else {
        debug!("Ignore scroll event, it was generated for a different device size");
        return false;
    };
    let event = InputEvent::Scroll(ScrollEvent {
        point,
        hscroll,
        vscroll,
        buttons,
    });
    device.inject_event(&event, InjectMode::Async)
}

fn press_back_or_turn_screen_on(device: &Device, action: u8) -> bool {
    if device.is_screen_on() {
        return device.inject_key_event(action, KEYCODE_BACK, 0, 0, InjectMode::Async);
    }
    // screen off: a single POWER press, on the down event only
    if action != ACTION_DOWN {
        return true;
    }
    device.press_release_keycode(KEYCODE_POWER, InjectMode::Async)
}

fn get_clipboard(device: &Device, sender: &DeviceMessageSender, copy_key: CopyKey, input: bool) {
    // Ctrl+c / Ctrl+x first so the clipboard holds the current selection
    if input && device.api_level() >= API_PASTE_INJECTION {
        match copy_key {
            CopyKey::None => {}
            CopyKey::Copy => {
                device.press_release_keycode(KEYCODE_COPY, InjectMode::WaitForFinish);
            }
            CopyKey::Cut => {
                device.press_release_keycode(KEYCODE_CUT, InjectMode::WaitForFinish);
            }
        }
    }
    if let Some(text) = device.clipboard_text() {
        sender.push_clipboard_text(text);
    }
}

fn set_clipboard(device: &Device, sender: &DeviceMessageSender, text: &str, paste: bool, sequence: u64) {
    let ok = device.set_clipboard_text(text);
    if ok && paste && device.api_level() >= API_PASTE_INJECTION {
        device.press_release_keycode(KEYCODE_PASTE, InjectMode::Async);
    }
    if sequence != SEQUENCE_INVALID {
        sender.push_ack_clipboard(sequence);
    }
}

// ── AsyncProcessor ───────────────────────────────────────────────

#[async_trait]
impl<S> AsyncProcessor for Controller<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn name(&self) -> &'static str {
        self.task.name()
    }

    fn start(&mut self, listener: TerminationListener) {
        let Some(stream) = self.stream.take() else {
            warn!("Controller already started");
            return;
        };
        let body = run(
            Arc::clone(&self.device),
            self.sender.clone(),
            stream,
            self.power_on,
            self.task.stop_token(),
        );
        self.task.spawn(body, listener);
    }

    fn stop(&self) {
        self.task.stop();
    }

    async fn join(&mut self) {
        self.task.join().await;
    }
}
