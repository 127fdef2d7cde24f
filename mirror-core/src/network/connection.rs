//! Desktop connection: up to three local sockets (video, audio, control).
//!
//! | Channel | Endpoint                    |
//! |---------|-----------------------------|
//! | video   | `{socket_dir}/svideo`         |
//! | audio   | `{socket_dir}/saudio`         |
//! | control | `{socket_dir}/svideo-control` |
//!
//! In forward mode the server listens on every enabled endpoint and accepts
//! them concurrently; in reverse mode it connects to endpoints the desktop
//! listens on. Either way, a failure on one channel drops every socket
//! opened so far before the error is returned.

use std::io;
use std::net::Shutdown;
use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::control::codec::truncate_utf8;
use crate::error::MirrorError;
use crate::options::Options;

pub const SOCKET_NAME_VIDEO: &str = "svideo";
pub const SOCKET_NAME_AUDIO: &str = "saudio";
pub const SOCKET_NAME_CONTROL: &str = "svideo-control";

/// Width of the device name field in the device meta.
pub const DEVICE_NAME_FIELD_LENGTH: usize = 64;

const BIND_ATTEMPTS: usize = 3;

/// Which channels to open and how.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub socket_dir: PathBuf,
    pub tunnel_forward: bool,
    pub video: bool,
    pub audio: bool,
    pub control: bool,
    pub send_dummy_byte: bool,
}

impl From<&Options> for ConnectionOptions {
    fn from(o: &Options) -> Self {
        Self {
            socket_dir: o.socket_dir.clone(),
            tunnel_forward: o.tunnel_forward,
            video: o.video,
            audio: o.audio,
            control: o.control,
            send_dummy_byte: o.send_dummy_byte,
        }
    }
}

impl ConnectionOptions {
    pub fn socket_path(&self, name: &str) -> PathBuf {
        self.socket_dir.join(name)
    }
}

// ── Listening endpoints ──────────────────────────────────────────

/// A bound endpoint; the socket file is removed on drop.
struct Endpoint {
    listener: UnixListener,
    path: PathBuf,
}

impl Endpoint {
    fn bind(path: PathBuf) -> io::Result<Self> {
        let mut attempt = 1;
        loop {
            match UnixListener::bind(&path) {
                Ok(listener) => {
                    debug!("Listening on {}", path.display());
                    return Ok(Self { listener, path });
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse && attempt < BIND_ATTEMPTS => {
                    // left over by a previous session
                    warn!("Removing stale socket {}", path.display());
                    std::fs::remove_file(&path)?;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn accept(&self, send_dummy_byte: bool) -> io::Result<UnixStream> {
        let (mut stream, _) = self.listener.accept().await?;
        if send_dummy_byte {
            // lets the desktop detect a connection error with a single read
            stream.write_all(&[0]).await?;
        }
        debug!("Accepted {}", self.path.display());
        Ok(stream)
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn bind_if(enabled: bool, options: &ConnectionOptions, name: &str) -> io::Result<Option<Endpoint>> {
    enabled.then(|| Endpoint::bind(options.socket_path(name))).transpose()
}

async fn accept_opt(endpoint: &Option<Endpoint>, send_dummy_byte: bool) -> io::Result<Option<UnixStream>> {
    match endpoint {
        Some(endpoint) => endpoint.accept(send_dummy_byte).await.map(Some),
        None => Ok(None),
    }
}

async fn connect_if(enabled: bool, path: PathBuf) -> io::Result<Option<UnixStream>> {
    if !enabled {
        return Ok(None);
    }
    let stream = UnixStream::connect(&path).await.map_err(|e| {
        io::Error::new(e.kind(), format!("could not connect to {}: {e}", path.display()))
    })?;
    debug!("Connected to {}", path.display());
    Ok(Some(stream))
}

// ── DesktopConnection ────────────────────────────────────────────

/// The open channels of one session.
///
/// Streams are handed out with the `take_*` methods. The connection keeps
/// a duplicate of every socket so [`shutdown`](Self::shutdown) can unblock
/// readers and writers that own the streams.
#[derive(Debug)]
pub struct DesktopConnection {
    video: Option<UnixStream>,
    audio: Option<UnixStream>,
    control: Option<UnixStream>,
    handles: Vec<std::os::unix::net::UnixStream>,
}

impl DesktopConnection {
    pub async fn open(options: &ConnectionOptions) -> Result<Self, MirrorError> {
        let (video, audio, control) = if options.tunnel_forward {
            let video_ep = bind_if(options.video, options, SOCKET_NAME_VIDEO)?;
            let audio_ep = bind_if(options.audio, options, SOCKET_NAME_AUDIO)?;
            let control_ep = bind_if(options.control, options, SOCKET_NAME_CONTROL)?;
            let dummy = options.send_dummy_byte;
            tokio::try_join!(
                accept_opt(&video_ep, dummy),
                accept_opt(&audio_ep, dummy),
                accept_opt(&control_ep, dummy),
            )?
        } else {
            let video = connect_if(options.video, options.socket_path(SOCKET_NAME_VIDEO)).await?;
            let audio = connect_if(options.audio, options.socket_path(SOCKET_NAME_AUDIO)).await?;
            let control = connect_if(options.control, options.socket_path(SOCKET_NAME_CONTROL)).await?;
            (video, audio, control)
        };

        let mut handles = Vec::new();
        let connection = Self {
            video: video.map(|s| track(s, &mut handles)).transpose()?,
            audio: audio.map(|s| track(s, &mut handles)).transpose()?,
            control: control.map(|s| track(s, &mut handles)).transpose()?,
            handles,
        };

        info!(
            "Desktop connected (video: {}, audio: {}, control: {})",
            options.video, options.audio, options.control
        );
        Ok(connection)
    }

    pub fn take_video(&mut self) -> Option<UnixStream> {
        self.video.take()
    }

    pub fn take_audio(&mut self) -> Option<UnixStream> {
        self.audio.take()
    }

    pub fn take_control(&mut self) -> Option<UnixStream> {
        self.control.take()
    }

    /// Write the device meta on the first enabled channel.
    ///
    /// Must happen before any stream is taken.
    pub async fn send_device_meta(&mut self, device_name: &str) -> Result<(), MirrorError> {
        let stream = self
            .video
            .as_mut()
            .or(self.audio.as_mut())
            .or(self.control.as_mut())
            .ok_or_else(|| MirrorError::Configuration("no channel to send the device meta on".into()))?;
        stream.write_all(&device_meta(device_name)).await?;
        Ok(())
    }

    /// Stop reads and writes on every channel without closing them, waking
    /// whoever is blocked on one.
    pub fn shutdown(&self) {
        for handle in &self.handles {
            if let Err(e) = handle.shutdown(Shutdown::Both) {
                if e.kind() != io::ErrorKind::NotConnected {
                    debug!("Socket shutdown: {e}");
                }
            }
        }
    }

    /// Release the connection's own descriptors.
    pub fn close(self) {
        debug!("Closing desktop connection");
    }
}

/// Device name, truncated at a char boundary and NUL padded.
pub fn device_meta(device_name: &str) -> [u8; DEVICE_NAME_FIELD_LENGTH] {
    let mut meta = [0u8; DEVICE_NAME_FIELD_LENGTH];
    // keep at least one NUL terminator
    let name = truncate_utf8(device_name, DEVICE_NAME_FIELD_LENGTH - 1);
    meta[..name.len()].copy_from_slice(name.as_bytes());
    meta
}

/// Keep a duplicate descriptor of `stream` for `shutdown`.
fn track(stream: UnixStream, handles: &mut Vec<std::os::unix::net::UnixStream>) -> io::Result<UnixStream> {
    let std = stream.into_std()?;
    handles.push(std.try_clone()?);
    UnixStream::from_std(std)
}
