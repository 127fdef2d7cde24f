//! Processor lifecycle: a uniform start / stop / join contract and the
//! completion barrier joining every processor of a session.
//!
//! ```text
//!   Server ──start(listener)──▶ Processor ──spawn──▶ task
//!                                                     │ exits, resources released
//!                                                     ▼
//!   Completion::wait ◀──────── listener(fatal) ◀──────┘
//! ```
//!
//! The barrier wakes when every processor has terminated **or** as soon as
//! one of them reports a fatal error, whichever comes first.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::MirrorError;

/// Called exactly once when a processor exits, with `true` for a fatal
/// outcome.
pub type TerminationListener = Arc<dyn Fn(bool) + Send + Sync>;

// ── AsyncProcessor ───────────────────────────────────────────────

/// A concurrent unit of the session (video, audio, control).
#[async_trait]
pub trait AsyncProcessor: Send {
    fn name(&self) -> &'static str;

    /// Spawn the processor. `listener` fires from within its task once
    /// all of its resources are released.
    fn start(&mut self, listener: TerminationListener);

    /// Ask the processor to stop. Safe from any thread, never blocks.
    fn stop(&self);

    /// Wait for the processor task to exit.
    async fn join(&mut self);
}

// ── ProcessorTask ────────────────────────────────────────────────

/// The spawned task backing one processor.
///
/// Runs the processor body, classifies its outcome and notifies the
/// termination listener. A panic in the body counts as fatal.
#[derive(Debug)]
pub struct ProcessorTask {
    name: &'static str,
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ProcessorTask {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            stop: CancellationToken::new(),
            handle: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The token the processor body must observe.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn is_started(&self) -> bool {
        self.handle.is_some()
    }

    pub fn spawn<F>(&mut self, body: F, listener: TerminationListener)
    where
        F: Future<Output = Result<(), MirrorError>> + Send + 'static,
    {
        let name = self.name;
        self.handle = Some(tokio::spawn(async move {
            let outcome = AssertUnwindSafe(body).catch_unwind().await;
            let fatal = match outcome {
                Ok(Ok(())) => {
                    debug!("{name} stopped");
                    false
                }
                Ok(Err(e)) if e.is_broken_pipe() => {
                    debug!("{name} stopped: peer disconnected");
                    false
                }
                Ok(Err(e)) if !e.is_fatal() => {
                    info!("{name} disabled: {e}");
                    false
                }
                Ok(Err(e)) => {
                    error!("{name} failed: {e}");
                    true
                }
                Err(_) => {
                    error!("{name} panicked");
                    true
                }
            };
            listener(fatal);
        }));
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub async fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("{} join error: {e}", self.name);
            }
        }
    }
}

// ── Completion ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CompletionState {
    running: usize,
    fatal: bool,
}

/// Completion barrier over a fixed number of processors.
#[derive(Debug)]
pub struct Completion {
    state: watch::Sender<CompletionState>,
}

impl Completion {
    pub fn new(running: usize) -> Arc<Self> {
        let (state, _) = watch::channel(CompletionState { running, fatal: false });
        Arc::new(Self { state })
    }

    /// Record one terminated processor.
    pub fn add_completed(&self, fatal: bool) {
        self.state.send_modify(|s| {
            s.running = s.running.saturating_sub(1);
            s.fatal |= fatal;
        });
    }

    /// Listener to hand to [`AsyncProcessor::start`].
    pub fn listener(self: &Arc<Self>) -> TerminationListener {
        let completion = Arc::clone(self);
        Arc::new(move |fatal| completion.add_completed(fatal))
    }

    /// Wait until all processors are done or one failed fatally.
    ///
    /// Returns whether a fatal error was recorded.
    pub async fn wait(&self) -> bool {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|s| s.running == 0 || s.fatal).await {
            Ok(state) => state.fatal,
            // unreachable while `self` holds the sender
            Err(_) => self.state.borrow().fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.state.borrow().fatal
    }

    pub fn running(&self) -> usize {
        self.state.borrow().running
    }
}
