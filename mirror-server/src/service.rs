//! Mirroring service: one session over the synthetic platform.
//!
//! The demo build has no real display, encoder or microphone, so the
//! session runs against the in-crate mock collaborators. A platform port
//! replaces [`MirrorService::new`]'s collaborators and keeps the rest.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use mirror_core::device::mock::MockPlatform;
use mirror_core::media::mock::{MockAudioCapture, MockCodecFactory};
use mirror_core::media::types::Size;
use mirror_core::{MirrorError, Server};

use crate::config::ServerConfig;

// ── MirrorService ────────────────────────────────────────────────

/// The top-level mirroring service.
pub struct MirrorService {
    server: Server,
    platform: MockPlatform,
}

impl MirrorService {
    /// Build a session from the configuration.
    pub fn new(config: &ServerConfig) -> Result<Self, MirrorError> {
        let options = config.to_options()?;
        let platform = MockPlatform::new(Size::new(config.device.width, config.device.height));
        let server = Server::new(
            options,
            platform.services(),
            Arc::new(MockCodecFactory::default()),
            Box::new(MockAudioCapture::new()),
        );
        Ok(Self { server, platform })
    }

    /// Obtain a handle that stops the session from another task.
    pub fn stop_handle(&self) -> CancellationToken {
        self.server.stop_handle()
    }

    /// The simulated device, for inspection.
    pub fn platform(&self) -> &MockPlatform {
        &self.platform
    }

    /// Run the session until the desktop disconnects, a processor fails or
    /// the stop handle is cancelled.
    pub async fn run(self) -> Result<(), MirrorError> {
        info!("Waiting for the desktop");
        self.server.run().await
    }
}
