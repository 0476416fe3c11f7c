//! Trace session lifecycle
//!
//! [`CaptureSession`] is a scoped guard around one named backend session. The
//! session is released when the guard is stopped or dropped, whichever comes
//! first, so a panic on the capture thread or an early return never leaks a
//! system-wide session name.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::Result;
use crate::backend::{StopSession, TraceBackend, TraceSession};
use crate::types::{ProviderId, TraceRecord};
use crate::CaptureError;

/// Idempotent, shareable stop for one session.
pub struct SessionStopper {
    name: String,
    stopped: AtomicBool,
    inner: Arc<dyn StopSession>,
}

impl SessionStopper {
    fn new(name: &str, inner: Arc<dyn StopSession>) -> Self {
        Self { name: name.to_string(), stopped: AtomicBool::new(false), inner }
    }

    /// Stop the session. Only the first call reaches the backend.
    pub fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(session = %self.name, "Stopping trace session");
        self.inner.stop()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn session_name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for SessionStopper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStopper")
            .field("name", &self.name)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// An active, named capture session with its providers enabled.
pub struct CaptureSession<S: TraceSession> {
    name: String,
    providers: Vec<ProviderId>,
    session: S,
    stopper: Arc<SessionStopper>,
}

impl<S: TraceSession> CaptureSession<S> {
    /// Start a session named `name` and enable `providers` on it.
    ///
    /// # Errors
    ///
    /// - `PermissionDenied` if the process is not elevated
    /// - `NameInUse` if a session with this name is already active
    /// - any backend error from enabling a provider (the session is released)
    pub fn start<B>(backend: &B, name: &str, providers: &[ProviderId]) -> Result<Self>
    where
        B: TraceBackend<Session = S>,
    {
        if !backend.is_elevated()? {
            return Err(CaptureError::permission_denied(name));
        }

        let session = backend.create_session(name)?;
        let stopper = Arc::new(SessionStopper::new(name, session.stop_handle()));

        // From here on the guard owns the session and Drop releases it.
        let mut guard = Self {
            name: name.to_string(),
            providers: Vec::with_capacity(providers.len()),
            session,
            stopper,
        };

        for &provider in providers {
            guard.session.enable_provider(provider)?;
            debug!(session = %guard.name, %provider, "Enabled provider");
            guard.providers.push(provider);
        }

        info!(session = %guard.name, providers = guard.providers.len(), "Trace session started");
        Ok(guard)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn providers(&self) -> &[ProviderId] {
        &self.providers
    }

    pub fn is_active(&self) -> bool {
        !self.stopper.is_stopped()
    }

    /// Shared stop handle, usable from other threads while [`process`](Self::process) blocks.
    pub fn stopper(&self) -> Arc<SessionStopper> {
        Arc::clone(&self.stopper)
    }

    /// Run the blocking processing loop until the session stops.
    pub fn process(&mut self, on_event: &mut dyn FnMut(TraceRecord<'_>)) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        self.session.process(on_event)
    }

    /// Stop and release the session.
    pub fn stop(&self) -> Result<()> {
        self.stopper.stop()
    }
}

impl<S: TraceSession> Drop for CaptureSession<S> {
    fn drop(&mut self) {
        if let Err(e) = self.stopper.stop() {
            warn!(session = %self.name, "Failed to release trace session: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryBackend;

    const PROVIDERS: [ProviderId; 2] =
        [ProviderId::OMA_DM_CLIENT, ProviderId::OMA_DM_CLIENT_PROVIDER];

    #[test]
    fn start_enables_every_provider() {
        let backend = MemoryBackend::new();
        let session = CaptureSession::start(&backend, "SyncMLViewer", &PROVIDERS).unwrap();

        assert!(session.is_active());
        assert_eq!(session.providers(), &PROVIDERS);
        assert_eq!(backend.enabled_providers("SyncMLViewer"), Some(PROVIDERS.to_vec()));
    }

    #[test]
    fn start_without_elevation_is_denied() {
        let backend = MemoryBackend::new();
        backend.set_elevated(false);

        let err = CaptureSession::start(&backend, "SyncMLViewer", &PROVIDERS).err().unwrap();
        assert!(matches!(err, CaptureError::PermissionDenied { .. }));
        assert!(!backend.is_active("SyncMLViewer"));
    }

    #[test]
    fn second_session_with_same_name_is_rejected() {
        let backend = MemoryBackend::new();
        let first = CaptureSession::start(&backend, "SyncMLViewer", &PROVIDERS).unwrap();

        let err = CaptureSession::start(&backend, "SyncMLViewer", &PROVIDERS).err().unwrap();
        assert!(matches!(
            err,
            CaptureError::NameInUse { ref session } if session == "SyncMLViewer"
        ));
        assert!(first.is_active());
    }

    #[test]
    fn stop_is_idempotent_and_releases_name() {
        let backend = MemoryBackend::new();
        let session = CaptureSession::start(&backend, "SyncMLViewer", &PROVIDERS).unwrap();

        session.stop().unwrap();
        session.stop().unwrap();
        assert!(!session.is_active());
        assert!(!backend.is_active("SyncMLViewer"));
        assert_eq!(backend.stop_count("SyncMLViewer"), 1);

        drop(session);
        assert_eq!(backend.stop_count("SyncMLViewer"), 1);

        CaptureSession::start(&backend, "SyncMLViewer", &PROVIDERS).unwrap();
    }

    #[test]
    fn drop_releases_session() {
        let backend = MemoryBackend::new();
        {
            let _session = CaptureSession::start(&backend, "SyncMLViewer", &PROVIDERS).unwrap();
            assert!(backend.is_active("SyncMLViewer"));
        }
        assert!(!backend.is_active("SyncMLViewer"));
    }

    #[test]
    fn failed_provider_enable_releases_session() {
        let backend = MemoryBackend::new();
        backend.reject_provider(ProviderId::OMA_DM_CLIENT_PROVIDER);

        let err = CaptureSession::start(&backend, "SyncMLViewer", &PROVIDERS).err().unwrap();
        assert!(matches!(err, CaptureError::Session { .. }));
        assert!(!backend.is_active("SyncMLViewer"));
    }

    #[test]
    fn release_on_panic_during_processing() {
        let backend = MemoryBackend::new();
        let mut session = CaptureSession::start(&backend, "SyncMLViewer", &PROVIDERS).unwrap();
        backend.emit("SyncMLViewer", "OmaDmClientExeStart", b"x".to_vec());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            session.process(&mut |_| panic!("consumer crashed")).ok();
        }));

        assert!(result.is_err());
        assert!(!backend.is_active("SyncMLViewer"));
    }
}
