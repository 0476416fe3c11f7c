//! Capture lifecycle and control handle
//!
//! A [`CaptureController`] owns a backend and a configuration and moves through
//! `Idle → Starting → Running → Stopping → Idle`. Starting yields a
//! [`CaptureHandle`] for the running capture; only one capture per controller
//! runs at a time.


use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::TraceBackend;
use crate::config::CaptureConfig;
use crate::dispatch::{CaptureStats, StatsSnapshot};
use crate::driver::{Driver, DriverOutcome};
use crate::session::{CaptureSession, SessionStopper};
use crate::sink::Sink;
use crate::{CaptureError, Result};

/// Lifecycle state of a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    /// Session is being created and providers enabled
    Starting,
    /// Events are being dispatched
    Running,
    /// Session release and queue drain in progress
    Stopping,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureState::Idle => "idle",
            CaptureState::Starting => "starting",
            CaptureState::Running => "running",
            CaptureState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Starts captures on a backend.
pub struct CaptureController<B: TraceBackend> {
    backend: Arc<B>,
    config: CaptureConfig,
    state: Arc<watch::Sender<CaptureState>>,
}

impl<B: TraceBackend> CaptureController<B> {
    /// Create an idle controller.
    ///
    /// # Errors
    ///
    /// Returns `Schema` if the configuration is invalid.
    pub fn new(backend: B, config: CaptureConfig) -> Result<Self> {
        config.validate()?;
        let (state, _) = watch::channel(CaptureState::Idle);
        Ok(Self { backend: Arc::new(backend), config, state: Arc::new(state) })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn state(&self) -> CaptureState {
        *self.state.borrow()
    }

    /// Stream of lifecycle states, starting with the current one.
    pub fn state_updates(&self) -> WatchStream<CaptureState> {
        WatchStream::new(self.state.subscribe())
    }

    /// Start capturing into `sink`.
    ///
    /// Must be called from within a tokio runtime. Session creation runs on
    /// the blocking pool. Dropping the returned future before it completes
    /// returns the controller to `Idle` and releases any session it created.
    ///
    /// # Errors
    ///
    /// - `NameInUse` if this controller is not idle, or the backend already
    ///   has an active session with the configured name
    /// - `PermissionDenied` if the process is not elevated
    /// - any backend error from creating the session
    pub async fn start<K: Sink>(&self, sink: K) -> Result<CaptureHandle> {
        let name = &self.config.session_name;

        let claimed = self.state.send_if_modified(|state| {
            let idle = *state == CaptureState::Idle;
            if idle {
                *state = CaptureState::Starting;
            }
            idle
        });
        if !claimed {
            debug!(session = %name, state = %self.state(), "Start requested while not idle");
            return Err(CaptureError::name_in_use(name));
        }

        let attempt = StartAttempt { state: &self.state, armed: true };

        let backend = Arc::clone(&self.backend);
        let session_name = name.clone();
        let providers = self.config.schema.provider_ids();
        let session = tokio::task::spawn_blocking(move || {
            CaptureSession::start(backend.as_ref(), &session_name, &providers)
        })
        .await
        .map_err(|e| CaptureError::session_failed_with_source(name, "start session", e))??;

        let (decode, decode_rx) = watch::channel(self.config.decode_entities);
        let stats = Arc::new(CaptureStats::default());

        self.state.send_replace(CaptureState::Running);
        let channels = Driver::spawn(
            session,
            &self.config,
            sink,
            decode_rx,
            Arc::clone(&self.state),
            Arc::clone(&stats),
        )?;
        // The consumer owns the transition back to `Idle` from here.
        attempt.complete();

        info!(session = %name, "Capture running");
        Ok(CaptureHandle {
            session_name: name.clone(),
            decode,
            state: Arc::clone(&self.state),
            stats,
            stopper: channels.stopper,
            cancel: channels.cancel,
            consumer: Some(channels.consumer),
            finished: channels.finished,
        })
    }
}

/// Returns the controller to `Idle` unless the start completes.
struct StartAttempt<'a> {
    state: &'a watch::Sender<CaptureState>,
    armed: bool,
}

impl StartAttempt<'_> {
    fn complete(mut self) {
        self.armed = false;
    }
}

impl Drop for StartAttempt<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.send_replace(CaptureState::Idle);
        }
    }
}

/// Final report of a stopped capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSummary {
    pub session_name: String,
    pub stats: StatsSnapshot,
}

/// Control handle for a running capture.
///
/// Dropping the handle stops the session and abandons queued events; use
/// [`CaptureHandle::stop`] to drain them.
pub struct CaptureHandle {
    session_name: String,
    decode: watch::Sender<bool>,
    state: Arc<watch::Sender<CaptureState>>,
    stats: Arc<CaptureStats>,
    stopper: Arc<SessionStopper>,
    cancel: CancellationToken,
    consumer: Option<JoinHandle<DriverOutcome>>,
    finished: watch::Receiver<bool>,
}

impl CaptureHandle {
    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// State of this capture. `Idle` once it has ended, even if the
    /// controller has started another one since.
    pub fn state(&self) -> CaptureState {
        if self.has_finished() { CaptureState::Idle } else { *self.state.borrow() }
    }

    /// Whether this capture's consumer has exited.
    pub fn has_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Lifecycle states of the controller that started this capture.
    pub fn state_updates(&self) -> WatchStream<CaptureState> {
        WatchStream::new(self.state.subscribe())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Toggle entity decoding. Applies from the next rendered event.
    pub fn set_decode_entities(&self, decode: bool) {
        self.decode.send_replace(decode);
    }

    pub fn decode_entities(&self) -> bool {
        *self.decode.borrow()
    }

    /// Wait until the capture ends on its own (session stopped externally,
    /// sink failure) without stopping it.
    pub async fn finished(&self) {
        let mut finished = self.finished.clone();
        // A closed channel also means the consumer is gone.
        let _ = finished.wait_for(|finished| *finished).await;
    }

    /// Stop the session, drain queued events and wait for the consumer.
    ///
    /// # Errors
    ///
    /// Returns the session's processing error if it failed, or the first
    /// sink error that ended the capture.
    pub async fn stop(mut self) -> Result<CaptureSummary> {
        // The flag is raised before the shared state goes back to `Idle`, so
        // checking it under the state lock never touches a newer capture.
        let finished = self.finished.clone();
        self.state.send_if_modified(|state| {
            let running = *state == CaptureState::Running && !*finished.borrow();
            if running {
                *state = CaptureState::Stopping;
            }
            running
        });

        if let Err(e) = self.stopper.stop() {
            warn!(session = %self.session_name, "Failed to stop session: {}", e);
        }

        if let Some(consumer) = self.consumer.take() {
            // A panicked or aborted consumer has already returned the state to `Idle`.
            let outcome = consumer.await.map_err(|e| {
                CaptureError::session_failed_with_source(&self.session_name, "consumer task", e)
            })?;
            outcome.session?;
            outcome.sink?;
        }

        let summary =
            CaptureSummary { session_name: self.session_name.clone(), stats: self.stats() };
        info!(
            session = %summary.session_name,
            rendered = summary.stats.rendered,
            dropped = summary.stats.dropped,
            "Capture stopped"
        );
        Ok(summary)
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if self.consumer.is_some() {
            debug!(session = %self.session_name, "Capture handle dropped, cancelling");
            if let Err(e) = self.stopper.stop() {
                warn!(session = %self.session_name, "Failed to stop session: {}", e);
            }
            self.cancel.cancel();
        }
    }
}

/// Entry points for MDM SyncML capture.
///
/// # Examples
///
/// ```rust,no_run
/// use syncml_viewer::{CaptureConfig, SyncMlViewer, WriterSink};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() -> syncml_viewer::Result<()> {
///     let config = CaptureConfig::default();
///     let capture = SyncMlViewer::start_live(config, WriterSink::stdout()).await?;
///     tokio::signal::ctrl_c().await.ok();
///     capture.stop().await?;
///     Ok(())
/// }
/// ```
pub struct SyncMlViewer;

impl SyncMlViewer {
    /// Build a controller on any backend.
    pub fn controller<B: TraceBackend>(
        backend: B,
        config: CaptureConfig,
    ) -> Result<CaptureController<B>> {
        CaptureController::new(backend, config)
    }

    /// Start a live ETW capture.
    ///
    /// # Platform
    ///
    /// Windows only. On other platforms this returns `UnsupportedPlatform`.
    ///
    /// # Errors
    ///
    /// - `PermissionDenied` if the process is not elevated
    /// - `NameInUse` if a session with the configured name is already running
    #[cfg(windows)]
    pub async fn start_live<K: Sink>(config: CaptureConfig, sink: K) -> Result<CaptureHandle> {
        let controller = CaptureController::new(crate::backends::etw::EtwBackend::new(), config)?;
        controller.start(sink).await
    }

    #[cfg(not(windows))]
    pub async fn start_live<K: Sink>(config: CaptureConfig, sink: K) -> Result<CaptureHandle> {
        let _ = (config, sink);
        Err(CaptureError::unsupported_platform("Live MDM capture", "Windows"))
    }
}
