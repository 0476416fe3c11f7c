//! ETW trace backend

use std::sync::Arc;

use crate::Result;
use crate::backend::{StopSession, TraceBackend, TraceSession};
use crate::types::{ProviderId, TraceRecord};
use crate::windows::{RealtimeSession, SessionControl, is_elevated};

/// [`TraceBackend`] over real-time ETW sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct EtwBackend;

impl EtwBackend {
    pub fn new() -> Self {
        Self
    }
}

impl TraceBackend for EtwBackend {
    type Session = EtwSession;

    fn is_elevated(&self) -> Result<bool> {
        is_elevated()
    }

    fn create_session(&self, name: &str) -> Result<EtwSession> {
        RealtimeSession::start(name).map(|inner| EtwSession { inner })
    }
}

/// Session created by [`EtwBackend`].
pub struct EtwSession {
    inner: RealtimeSession,
}

impl TraceSession for EtwSession {
    fn enable_provider(&mut self, provider: ProviderId) -> Result<()> {
        self.inner.enable_provider(provider)
    }

    fn stop_handle(&self) -> Arc<dyn StopSession> {
        Arc::new(EtwStop(self.inner.control()))
    }

    fn process(&mut self, on_event: &mut dyn FnMut(TraceRecord<'_>)) -> Result<()> {
        self.inner.process(on_event)
    }
}

struct EtwStop(Arc<SessionControl>);

impl StopSession for EtwStop {
    fn stop(&self) -> Result<()> {
        self.0.stop()
    }
}
