//! Device message sender.
//!
//! Device-side listeners (clipboard notifications, clipboard acks) push
//! from any thread without blocking; a dedicated task writes the pending
//! messages to the control socket. At most one clipboard text and one
//! acknowledgement are pending at a time: a new push replaces a value of
//! the same kind that has not been sent yet.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::Notify;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::control::codec::DeviceMessageCodec;
use crate::control::message::{DeviceMessage, SEQUENCE_INVALID};
use crate::error::MirrorError;

#[derive(Debug, Default)]
struct Pending {
    clipboard: Option<String>,
    ack: Option<u64>,
}

impl Pending {
    /// Acknowledgements go first: the desktop may be waiting on one.
    fn take(&mut self) -> Option<DeviceMessage> {
        if let Some(sequence) = self.ack.take() {
            return Some(DeviceMessage::AckClipboard(sequence));
        }
        self.clipboard.take().map(DeviceMessage::Clipboard)
    }
}

#[derive(Debug, Default)]
struct Shared {
    pending: Mutex<Pending>,
    notify: Notify,
}

/// Cloneable handle; every clone feeds the same writer.
#[derive(Debug, Clone, Default)]
pub struct DeviceMessageSender {
    shared: Arc<Shared>,
}

impl DeviceMessageSender {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.shared.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_clipboard_text(&self, text: String) {
        self.pending().clipboard = Some(text);
        self.shared.notify.notify_one();
    }

    pub fn push_ack_clipboard(&self, sequence: u64) {
        if sequence == SEQUENCE_INVALID {
            return;
        }
        self.pending().ack = Some(sequence);
        self.shared.notify.notify_one();
    }

    async fn next(&self) -> DeviceMessage {
        loop {
            if let Some(msg) = self.pending().take() {
                return msg;
            }
            // a push between take and here leaves a permit behind
            self.shared.notify.notified().await;
        }
    }

    /// Write pending messages to `writer` until stopped.
    ///
    /// Messages still pending when `stop` fires are discarded.
    pub async fn run<W>(&self, writer: W, stop: CancellationToken) -> Result<(), MirrorError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut framed = FramedWrite::new(writer, DeviceMessageCodec);
        loop {
            let msg = tokio::select! {
                _ = stop.cancelled() => break,
                msg = self.next() => msg,
            };
            debug!("Sending device message: {msg:?}");
            framed.send(msg).await?;
        }
        debug!("Device message sender stopped");
        Ok(())
    }
}
