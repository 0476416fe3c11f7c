//! Backend traits for trace sources

use std::sync::Arc;

use crate::Result;
use crate::types::{ProviderId, TraceRecord};

/// A system tracing facility that can host named capture sessions.
///
/// Backends abstract over the event source (ETW on Windows, an in-memory
/// source for tests) so that session management, filtering and rendering are
/// written once.
pub trait TraceBackend: Send + Sync + 'static {
    type Session: TraceSession;

    /// Whether the caller holds the privileges needed to attach to the
    /// tracing facility.
    fn is_elevated(&self) -> Result<bool>;

    /// Create and start a named session with no providers enabled.
    ///
    /// Must fail with `NameInUse` when a session of that name is already
    /// active, and with `PermissionDenied` when the facility refuses access.
    fn create_session(&self, name: &str) -> Result<Self::Session>;
}

/// One live session on a [`TraceBackend`].
pub trait TraceSession: Send + 'static {
    /// Enable a provider on this session.
    fn enable_provider(&mut self, provider: ProviderId) -> Result<()>;

    /// Handle that stops this session from any thread.
    fn stop_handle(&self) -> Arc<dyn StopSession>;

    /// Deliver events to `on_event` until the session is stopped.
    ///
    /// Blocks the calling thread. Records passed to `on_event` borrow the
    /// backend's buffer and are only valid for the duration of the call.
    fn process(&mut self, on_event: &mut dyn FnMut(TraceRecord<'_>)) -> Result<()>;
}

/// Stops a running session and releases its OS resources.
pub trait StopSession: Send + Sync {
    /// Stop the session, unblocking [`TraceSession::process`].
    ///
    /// Callers guarantee at most one successful invocation; see
    /// [`crate::session::SessionStopper`].
    fn stop(&self) -> Result<()>;
}
