//! Domain-specific error types for the mirroring core.
//!
//! Every fallible operation returns `Result<T, MirrorError>`, except the
//! narrow hardware-encoder contract ([`CodecError`]) and control-message
//! parsing ([`ProtocolError`]) which convert into it.

use thiserror::Error;

/// The canonical error type of the mirroring core.
#[derive(Debug, Error)]
pub enum MirrorError {
    // ── Configuration Errors ─────────────────────────────────────
    /// Invalid or unsupported codec, display, option or encoder setting.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The requested encoder name does not exist on this device.
    #[error("unknown encoder '{name}' (available: {})", available.join(", "))]
    InvalidEncoder {
        name: String,
        available: Vec<String>,
    },

    // ── Platform Errors ──────────────────────────────────────────
    /// A capability is missing on this platform version.
    ///
    /// The user has already been notified when this is returned, so it
    /// terminates the affected stream without being fatal.
    #[error("unsupported on this platform: {0}")]
    Unsupported(String),

    // ── Encoder Errors ───────────────────────────────────────────
    /// The hardware encoder failed.
    #[error("encoder error: {0}")]
    Codec(#[from] CodecError),

    /// Geometry fallback ran out of candidate sizes.
    #[error("encoder rejected every candidate size (last: {last_max_size})")]
    FallbackExhausted { last_max_size: u32 },

    // ── Protocol Errors ──────────────────────────────────────────
    /// A control message could not be parsed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // ── Connection Errors ────────────────────────────────────────
    /// The socket layer reported an error.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// A queue or channel was closed while still in use.
    #[error("channel closed")]
    ChannelClosed,

    // ── Session Errors ───────────────────────────────────────────
    /// At least one processor terminated with a fatal error.
    #[error("mirroring session failed")]
    SessionFailed,
}

impl MirrorError {
    /// Whether this error means the desktop peer went away.
    ///
    /// A broken pipe (or a reset / EOF on read) is the ordinary way a
    /// session ends and must not be reported as a failure.
    pub fn is_broken_pipe(&self) -> bool {
        match self {
            MirrorError::Io(e) => is_broken_pipe(e),
            MirrorError::Codec(CodecError::Io(e)) => is_broken_pipe(e),
            _ => false,
        }
    }

    /// Whether a processor terminating with this error must bring the
    /// whole session down.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, MirrorError::Unsupported(_)) && !self.is_broken_pipe()
    }
}

/// Classify a raw I/O error as a peer disconnection.
pub fn is_broken_pipe(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::UnexpectedEof
    )
}

// ── CodecError ────────────────────────────────────────────────────

/// Errors surfaced by a hardware encoder through its narrow contract.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The encoder refused the current configuration (usually the size).
    ///
    /// Recoverable by restarting at a smaller geometry.
    #[error("configuration rejected: {0}")]
    Rejected(String),

    /// The encoder cannot handle this format at all.
    #[error("unsupported format: {0}")]
    Unsupported(String),

    /// A buffer index did not refer to a buffer owned by the caller.
    #[error("invalid buffer index {0}")]
    InvalidBuffer(usize),

    /// Writing into the encoder or reading from it failed.
    #[error("encoder I/O: {0}")]
    Io(#[from] std::io::Error),
}

// ── ProtocolError ────────────────────────────────────────────────

/// Errors raised while decoding control messages.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The type byte does not name a known control message.
    #[error("unknown control message type: {0}")]
    UnknownMessageType(u8),

    /// A length-prefixed text field exceeds the allowed maximum.
    #[error("text field too long: {len} bytes (max {max})")]
    TextTooLong { len: usize, max: usize },

    /// A text field is not valid UTF-8.
    #[error("invalid utf-8 in text field")]
    InvalidUtf8,

    /// An enumerated field holds a value outside its range.
    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: u8 },
}

impl From<ProtocolError> for std::io::Error {
    fn from(e: ProtocolError) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e)
    }
}

// ── Convenient From implementations ──────────────────────────────

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for MirrorError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        MirrorError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = MirrorError::InvalidEncoder {
            name: "c2.bogus".into(),
            available: vec!["c2.android.avc.encoder".into(), "OMX.hw.avc".into()],
        };
        let text = e.to_string();
        assert!(text.contains("c2.bogus"));
        assert!(text.contains("OMX.hw.avc"));

        let e = MirrorError::FallbackExhausted { last_max_size: 800 };
        assert!(e.to_string().contains("800"));
    }

    #[test]
    fn broken_pipe_is_not_fatal() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: MirrorError = io_err.into();
        assert!(e.is_broken_pipe());
        assert!(!e.is_fatal());

        let e = MirrorError::Codec(CodecError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        )));
        assert!(e.is_broken_pipe());
    }

    #[test]
    fn other_io_errors_are_fatal() {
        let e: MirrorError = std::io::Error::other("disk on fire").into();
        assert!(!e.is_broken_pipe());
        assert!(e.is_fatal());
    }

    #[test]
    fn unsupported_is_not_fatal() {
        let e = MirrorError::Unsupported("audio capture".into());
        assert!(!e.is_fatal());
        assert!(MirrorError::Configuration("bad".into()).is_fatal());
    }
}
