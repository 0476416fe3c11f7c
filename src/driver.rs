//! Driver spawns and manages the capture worker and the consumer task

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::backend::TraceSession;
use crate::capture::CaptureState;
use crate::config::{CaptureConfig, TextDecoding};
use crate::dispatch::{CaptureStats, DispatchOutcome, Dispatcher, EventFilter};
use crate::extract::extract_with;
use crate::normalize::render;
use crate::session::{CaptureSession, SessionStopper};
use crate::sink::Sink;
use crate::types::TraceEvent;
use crate::{CaptureError, Result};

/// How a capture ended.
pub(crate) struct DriverOutcome {
    /// Result of the processing loop and session release
    pub session: Result<()>,
    /// First sink failure, if the consumer stopped because of one
    pub sink: Result<()>,
}

/// Result of spawning driver tasks
pub(crate) struct DriverChannels {
    /// Stops the session from any thread
    pub stopper: Arc<SessionStopper>,
    /// Aborts the consumer without draining
    pub cancel: CancellationToken,
    /// Consumer task; completes after the session is released and the queue is drained
    pub consumer: JoinHandle<DriverOutcome>,
    /// Becomes `true` when this capture's consumer exits, before the state returns to `Idle`
    pub finished: watch::Receiver<bool>,
}

/// Everything the consumer needs besides the channel and the sink.
struct ConsumerContext {
    session_name: String,
    decoding: TextDecoding,
    separator: String,
    decode: watch::Receiver<bool>,
    stats: Arc<CaptureStats>,
    stopper: Arc<SessionStopper>,
    cancel: CancellationToken,
}

/// Spawns the capture worker thread and the consumer task.
///
/// The worker owns the session guard and runs the blocking processing loop,
/// filtering events into a bounded channel. The consumer renders queued
/// events in arrival order and appends them to the sink.
pub(crate) struct Driver;

impl Driver {
    /// Spawn driver tasks for an already started session.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<S, K>(
        session: CaptureSession<S>,
        config: &CaptureConfig,
        sink: K,
        decode: watch::Receiver<bool>,
        state: Arc<watch::Sender<CaptureState>>,
        stats: Arc<CaptureStats>,
    ) -> Result<DriverChannels>
    where
        S: TraceSession,
        K: Sink,
    {
        let (event_tx, event_rx) = mpsc::channel(config.channel_capacity);
        let (done_tx, done_rx) = oneshot::channel();
        let (finished_tx, finished) = watch::channel(false);
        let cancel = CancellationToken::new();
        let stopper = session.stopper();
        let session_name = session.name().to_string();

        let filter = EventFilter::from_schema(&config.schema);
        debug!(session = %session_name, events = ?filter.names(), "Filtering trace events");
        let dispatcher = Dispatcher::new(
            filter,
            event_tx,
            config.overflow,
            Arc::clone(&stats),
        );

        // On spawn failure the closure is dropped, and the session with it.
        let worker_state = Arc::clone(&state);
        std::thread::Builder::new()
            .name(format!("capture-{session_name}"))
            .spawn(move || Self::capture_worker(session, dispatcher, worker_state, done_tx))
            .map_err(|e| {
                CaptureError::session_failed_with_source(&session_name, "spawn capture worker", e)
            })?;

        let context = ConsumerContext {
            session_name,
            decoding: config.decoding,
            separator: config.record_separator.clone(),
            decode,
            stats,
            stopper: Arc::clone(&stopper),
            cancel: cancel.clone(),
        };
        let exit = IdleOnExit { state, finished: finished_tx };
        let consumer = tokio::spawn(Self::consumer_task(event_rx, sink, done_rx, context, exit));

        Ok(DriverChannels { stopper, cancel, consumer, finished })
    }

    /// Capture worker - runs the blocking session loop on its own thread
    fn capture_worker<S>(
        mut session: CaptureSession<S>,
        dispatcher: Dispatcher,
        state: Arc<watch::Sender<CaptureState>>,
        done: oneshot::Sender<Result<()>>,
    ) where
        S: TraceSession,
    {
        info!(session = %session.name(), "Capture worker started");
        let stopper = session.stopper();

        let processed = session.process(&mut |record| {
            if dispatcher.dispatch(record) == DispatchOutcome::Closed {
                if let Err(e) = stopper.stop() {
                    warn!(session = %stopper.session_name(), "Failed to stop session: {}", e);
                }
            }
        });

        state.send_if_modified(|current| {
            let running = *current == CaptureState::Running;
            if running {
                *current = CaptureState::Stopping;
            }
            running
        });

        if let Err(e) = &processed {
            error!(session = %session.name(), "Trace processing failed: {}", e);
        }

        let released = session.stop();
        let name = session.name().to_string();
        drop(session);
        // Closing the channel lets the consumer drain and finish.
        drop(dispatcher);

        info!(session = %name, "Capture worker ended");
        let _ = done.send(processed.and(released));
    }

    /// Consumer task - extracts, normalizes and appends events in order
    async fn consumer_task<K>(
        mut events: mpsc::Receiver<TraceEvent>,
        mut sink: K,
        done: oneshot::Receiver<Result<()>>,
        context: ConsumerContext,
        _exit: IdleOnExit,
    ) -> DriverOutcome
    where
        K: Sink,
    {
        debug!(session = %context.session_name, "Consumer task started");
        let mut sink_result = Ok(());

        loop {
            let event = tokio::select! {
                biased;
                _ = context.cancel.cancelled() => {
                    debug!("Consumer cancelled");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let Some(fragment) = extract_with(&event.data, context.decoding) else {
                context.stats.record_discarded();
                continue;
            };

            let decode_entities = *context.decode.borrow();
            let output = render(&fragment, decode_entities);
            trace!(
                event = %event.name,
                formatted = output.is_formatted(),
                decode_entities,
                "Rendered event"
            );

            let mut record = output.text;
            record.push_str(&context.separator);

            match AssertUnwindSafe(sink.append(&record)).catch_unwind().await {
                Ok(Ok(())) => context.stats.record_rendered(),
                Ok(Err(e)) => {
                    warn!(session = %context.session_name, "Sink failed, stopping capture: {}", e);
                    sink_result = Err(e);
                    break;
                }
                Err(_) => {
                    error!(session = %context.session_name, "Sink panicked, stopping capture");
                    sink_result = Err(CaptureError::sink_failed("sink panicked", None));
                    break;
                }
            }
        }

        // No-op after a normal shutdown; otherwise releases the session and
        // unblocks a capture thread waiting on a full channel.
        if let Err(e) = context.stopper.stop() {
            warn!(session = %context.session_name, "Failed to stop session: {}", e);
        }
        drop(events);

        let session = done.await.unwrap_or_else(|_| {
            Err(CaptureError::session_failed(
                &context.session_name,
                "capture worker terminated unexpectedly",
            ))
        });

        let stats = context.stats.snapshot();
        info!(
            session = %context.session_name,
            seen = stats.seen,
            rendered = stats.rendered,
            dropped = stats.dropped,
            "Capture ended"
        );
        DriverOutcome { session, sink: sink_result }
    }
}

/// Returns the lifecycle to `Idle` when the consumer finishes, however it finishes.
///
/// The capture's own flag is raised first. A handle that sees it unset while
/// holding the state lock is still looking at its own capture.
struct IdleOnExit {
    state: Arc<watch::Sender<CaptureState>>,
    finished: watch::Sender<bool>,
}

impl Drop for IdleOnExit {
    fn drop(&mut self) {
        self.finished.send_replace(true);
        self.state.send_replace(CaptureState::Idle);
    }
}
