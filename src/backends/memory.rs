//! In-process trace backend
//!
//! Behaves like a tracing facility with a system-wide session registry, but
//! events are injected by the caller with [`MemoryBackend::emit`]. Used for
//! tests, benchmarks and running the pipeline on hosts without ETW.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

use crate::backend::{StopSession, TraceBackend, TraceSession};
use crate::types::{ProviderId, TraceRecord};
use crate::{CaptureError, Result};

enum Command {
    Event { name: String, data: Vec<u8> },
    Stop,
}

struct SessionSlot {
    id: u64,
    tx: Sender<Command>,
    providers: Vec<ProviderId>,
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<String, SessionSlot>,
    rejected: HashSet<ProviderId>,
    stop_counts: HashMap<String, usize>,
}

struct Registry {
    elevated: AtomicBool,
    next_id: AtomicU64,
    state: Mutex<RegistryState>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove the slot if it still belongs to session `id`.
    fn release(&self, name: &str, id: u64) -> bool {
        let mut state = self.lock();
        let owned = state.sessions.get(name).is_some_and(|slot| slot.id == id);
        if owned {
            state.sessions.remove(name);
            *state.stop_counts.entry(name.to_string()).or_default() += 1;
        }
        owned
    }
}

/// In-memory [`TraceBackend`]. Cloning shares the registry.
#[derive(Clone)]
pub struct MemoryBackend {
    registry: Arc<Registry>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an elevated backend with no active sessions.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                elevated: AtomicBool::new(true),
                next_id: AtomicU64::new(1),
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    /// Simulate running with or without administrative privileges.
    pub fn set_elevated(&self, elevated: bool) {
        self.registry.elevated.store(elevated, Ordering::Release);
    }

    /// Make enabling `provider` fail on every session.
    pub fn reject_provider(&self, provider: ProviderId) {
        self.registry.lock().rejected.insert(provider);
    }

    /// Deliver an event to the active session `session`.
    ///
    /// Returns `false` if no such session is active.
    pub fn emit(&self, session: &str, event_name: &str, data: impl Into<Vec<u8>>) -> bool {
        let state = self.registry.lock();
        match state.sessions.get(session) {
            Some(slot) => slot
                .tx
                .send(Command::Event { name: event_name.to_string(), data: data.into() })
                .is_ok(),
            None => false,
        }
    }

    /// Stop `session` from outside its owner, like an operator stopping the
    /// trace with system tools. Returns `false` if it was not active.
    pub fn terminate(&self, session: &str) -> bool {
        let slot = self.registry.lock().sessions.remove(session);
        match slot {
            Some(slot) => {
                debug!(session, "Terminating in-memory trace session");
                let _ = slot.tx.send(Command::Stop);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, session: &str) -> bool {
        self.registry.lock().sessions.contains_key(session)
    }

    /// Names of all active sessions.
    pub fn active_sessions(&self) -> Vec<String> {
        self.registry.lock().sessions.keys().cloned().collect()
    }

    pub fn enabled_providers(&self, session: &str) -> Option<Vec<ProviderId>> {
        self.registry.lock().sessions.get(session).map(|slot| slot.providers.clone())
    }

    /// How many times a session of this name has been released.
    pub fn stop_count(&self, session: &str) -> usize {
        self.registry.lock().stop_counts.get(session).copied().unwrap_or(0)
    }
}

impl TraceBackend for MemoryBackend {
    type Session = MemorySession;

    fn is_elevated(&self) -> Result<bool> {
        Ok(self.registry.elevated.load(Ordering::Acquire))
    }

    fn create_session(&self, name: &str) -> Result<MemorySession> {
        let mut state = self.registry.lock();
        if state.sessions.contains_key(name) {
            return Err(CaptureError::name_in_use(name));
        }

        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        state
            .sessions
            .insert(name.to_string(), SessionSlot { id, tx: tx.clone(), providers: Vec::new() });
        debug!(session = name, id, "Created in-memory trace session");

        let stop = Arc::new(MemoryStop {
            name: name.to_string(),
            id,
            registry: Arc::clone(&self.registry),
            tx,
        });

        Ok(MemorySession {
            name: name.to_string(),
            id,
            registry: Arc::clone(&self.registry),
            rx,
            stop,
        })
    }
}

/// Session created by [`MemoryBackend`].
pub struct MemorySession {
    name: String,
    id: u64,
    registry: Arc<Registry>,
    rx: Receiver<Command>,
    stop: Arc<MemoryStop>,
}

impl TraceSession for MemorySession {
    fn enable_provider(&mut self, provider: ProviderId) -> Result<()> {
        let mut state = self.registry.lock();
        if state.rejected.contains(&provider) {
            let operation = format!("enable provider {provider}");
            return Err(CaptureError::session_failed(&self.name, operation));
        }
        if let Some(slot) = state.sessions.get_mut(&self.name).filter(|slot| slot.id == self.id) {
            slot.providers.push(provider);
        }
        Ok(())
    }

    fn stop_handle(&self) -> Arc<dyn StopSession> {
        Arc::clone(&self.stop) as Arc<dyn StopSession>
    }

    fn process(&mut self, on_event: &mut dyn FnMut(TraceRecord<'_>)) -> Result<()> {
        while let Ok(command) = self.rx.recv() {
            match command {
                Command::Event { name, data } => {
                    trace!(
                        session = %self.name,
                        event = %name,
                        bytes = data.len(),
                        "Delivering event"
                    );
                    on_event(TraceRecord::utf8(&name, &data));
                }
                Command::Stop => break,
            }
        }
        debug!(session = %self.name, "In-memory processing loop ended");
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.registry.release(&self.name, self.id);
    }
}

struct MemoryStop {
    name: String,
    id: u64,
    registry: Arc<Registry>,
    tx: Sender<Command>,
}

impl StopSession for MemoryStop {
    fn stop(&self) -> Result<()> {
        self.registry.release(&self.name, self.id);
        // The receiver may already be gone if the session was dropped first.
        let _ = self.tx.send(Command::Stop);
        Ok(())
    }
}
