//! Event filtering and hand-off to the consumer
//!
//! Runs on the capture thread inside the backend callback. Everything here is
//! synchronous and must stay short: rejected events cost one name comparison,
//! accepted events one copy and one channel send.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

use crate::config::{EventSchema, OverflowPolicy};
use crate::types::{EventName, TraceEvent, TraceRecord};

/// Log every Nth overflow drop after the first.
const DROP_LOG_INTERVAL: u64 = 100;

/// Accepts exactly the configured event names, ASCII case-insensitively.
#[derive(Debug, Clone)]
pub struct EventFilter {
    names: Vec<String>,
}

impl EventFilter {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { names: names.into_iter().map(Into::into).collect() }
    }

    pub fn from_schema(schema: &EventSchema) -> Self {
        Self::new(schema.events.iter().cloned())
    }

    pub fn accepts(&self, name: &EventName<'_>) -> bool {
        self.names.iter().any(|expected| name.eq_ignore_ascii_case(expected))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::from_schema(&EventSchema::default())
    }
}

/// Result of dispatching one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Name not recognized; nothing was copied
    Ignored,
    /// Queued for the consumer
    Forwarded,
    /// Channel full under [`OverflowPolicy::DropNewest`]
    Dropped,
    /// Consumer is gone; the capture should stop
    Closed,
}

/// Event counters shared between the capture thread, the consumer and the handle.
#[derive(Debug, Default)]
pub struct CaptureStats {
    seen: AtomicU64,
    ignored: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
    rendered: AtomicU64,
    discarded: AtomicU64,
}

/// Point-in-time copy of [`CaptureStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub seen: u64,
    pub ignored: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub rendered: u64,
    pub discarded: u64,
}

impl CaptureStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            seen: self.seen.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            rendered: self.rendered.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_rendered(&self) {
        self.rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }
}

/// Filters raw records and forwards accepted ones over an ordered channel.
pub struct Dispatcher {
    filter: EventFilter,
    tx: mpsc::Sender<TraceEvent>,
    policy: OverflowPolicy,
    stats: Arc<CaptureStats>,
}

impl Dispatcher {
    pub fn new(
        filter: EventFilter,
        tx: mpsc::Sender<TraceEvent>,
        policy: OverflowPolicy,
        stats: Arc<CaptureStats>,
    ) -> Self {
        Self { filter, tx, policy, stats }
    }

    /// Classify `record` and forward it if recognized.
    ///
    /// Under [`OverflowPolicy::Block`] this waits for channel capacity and
    /// must not be called from inside an async runtime.
    pub fn dispatch(&self, record: TraceRecord<'_>) -> DispatchOutcome {
        self.stats.seen.fetch_add(1, Ordering::Relaxed);

        if !self.filter.accepts(&record.name) {
            self.stats.ignored.fetch_add(1, Ordering::Relaxed);
            return DispatchOutcome::Ignored;
        }

        let event = record.to_event();
        trace!(event = %event.name, bytes = event.data.len(), "Forwarding event");

        let outcome = match self.policy {
            OverflowPolicy::DropNewest => match self.tx.try_send(event) {
                Ok(()) => DispatchOutcome::Forwarded,
                Err(TrySendError::Full(event)) => {
                    let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped == 1 || dropped % DROP_LOG_INTERVAL == 0 {
                        warn!(
                            event = %event.name,
                            dropped,
                            "Consumer is behind, dropping events"
                        );
                    }
                    return DispatchOutcome::Dropped;
                }
                Err(TrySendError::Closed(_)) => DispatchOutcome::Closed,
            },
            OverflowPolicy::Block => match self.tx.blocking_send(event) {
                Ok(()) => DispatchOutcome::Forwarded,
                Err(_) => DispatchOutcome::Closed,
            },
        };

        match outcome {
            DispatchOutcome::Forwarded => {
                self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
            }
            DispatchOutcome::Closed => debug!("Consumer channel closed"),
            _ => {}
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn dispatcher(
        capacity: usize,
        policy: OverflowPolicy,
    ) -> (Dispatcher, mpsc::Receiver<TraceEvent>, Arc<CaptureStats>) {
        let (tx, rx) = mpsc::channel(capacity);
        let stats = Arc::new(CaptureStats::default());
        (Dispatcher::new(EventFilter::default(), tx, policy, Arc::clone(&stats)), rx, stats)
    }

    #[test]
    fn recognized_names_match_case_insensitively() {
        let filter = EventFilter::default();
        for name in ["OmaDmClientExeStart", "omadmclientexestart", "OMADMSYNCMLVERBOSETRACE"] {
            assert!(filter.accepts(&EventName::Utf8(name)), "{name} should be accepted");
        }
        for name in ["", "OmaDmClient", "OmaDmSyncmlVerboseTrace2", "unrelatedEvent"] {
            assert!(!filter.accepts(&EventName::Utf8(name)), "{name} should be rejected");
        }
    }

    #[test]
    fn filter_follows_schema_event_names() {
        let schema = EventSchema { events: vec!["CustomTrace".to_string()], ..EventSchema::default() };
        let filter = EventFilter::from_schema(&schema);
        assert_eq!(filter.names(), ["CustomTrace".to_string()]);
        assert!(filter.accepts(&EventName::Utf8("customtrace")));
        assert!(!filter.accepts(&EventName::Utf8("OmaDmSyncmlVerboseTrace")));
    }

    #[test]
    fn forwards_in_order() {
        let (dispatcher, mut rx, stats) = dispatcher(8, OverflowPolicy::DropNewest);

        assert_eq!(
            dispatcher.dispatch(TraceRecord::utf8("OmaDmClientExeStart", b"1")),
            DispatchOutcome::Forwarded
        );
        assert_eq!(
            dispatcher.dispatch(TraceRecord::utf8("unrelatedEvent", b"x")),
            DispatchOutcome::Ignored
        );
        assert_eq!(
            dispatcher.dispatch(TraceRecord::utf8("OmaDmSyncmlVerboseTrace", b"2")),
            DispatchOutcome::Forwarded
        );

        assert_eq!(&rx.try_recv().unwrap().data[..], b"1");
        assert_eq!(&rx.try_recv().unwrap().data[..], b"2");
        assert!(rx.try_recv().is_err());

        let snapshot = stats.snapshot();
        assert_eq!((snapshot.seen, snapshot.ignored, snapshot.forwarded), (3, 1, 2));
    }

    #[test]
    fn full_channel_drops_newest() {
        let (dispatcher, mut rx, stats) = dispatcher(1, OverflowPolicy::DropNewest);

        dispatcher.dispatch(TraceRecord::utf8("OmaDmClientExeStart", b"kept"));
        let outcome = dispatcher.dispatch(TraceRecord::utf8("OmaDmClientExeStart", b"lost"));

        assert_eq!(outcome, DispatchOutcome::Dropped);
        assert_eq!(stats.snapshot().dropped, 1);
        assert_eq!(&rx.try_recv().unwrap().data[..], b"kept");
    }

    #[test]
    fn closed_channel_is_reported() {
        let (dispatcher, rx, _stats) = dispatcher(1, OverflowPolicy::Block);
        drop(rx);
        assert_eq!(
            dispatcher.dispatch(TraceRecord::utf8("OmaDmClientExeStart", b"x")),
            DispatchOutcome::Closed
        );
    }

    #[test]
    fn blocking_policy_waits_for_consumer() {
        let (dispatcher, mut rx, _stats) = dispatcher(1, OverflowPolicy::Block);

        let producer = std::thread::spawn(move || {
            for i in 0..5u8 {
                assert_eq!(
                    dispatcher.dispatch(TraceRecord::utf8("OmaDmClientExeStart", &[i])),
                    DispatchOutcome::Forwarded
                );
            }
        });

        let mut received = Vec::new();
        while let Some(event) = rx.blocking_recv() {
            received.push(event.data[0]);
        }
        producer.join().unwrap();
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
    }

    proptest! {
        #[test]
        fn unrecognized_names_never_reach_the_channel(
            name in "[A-Za-z]{0,30}",
            data in prop::collection::vec(any::<u8>(), 0..64),
        ) {
            let filter = EventFilter::default();
            prop_assume!(!filter.accepts(&EventName::Utf8(&name)));

            let (dispatcher, mut rx, stats) = dispatcher(4, OverflowPolicy::DropNewest);
            let outcome = dispatcher.dispatch(TraceRecord::utf8(&name, &data));
            prop_assert_eq!(outcome, DispatchOutcome::Ignored);
            prop_assert!(rx.try_recv().is_err());
            prop_assert_eq!(stats.snapshot().forwarded, 0);
        }

        #[test]
        fn recognized_names_in_any_case_are_forwarded(
            upper in prop::collection::vec(any::<bool>(), 23),
        ) {
            let name: String = "OmaDmSyncmlVerboseTrace"
                .chars()
                .zip(upper)
                .map(|(c, up)| if up { c.to_ascii_uppercase() } else { c.to_ascii_lowercase() })
                .collect();

            let (dispatcher, mut rx, _stats) = dispatcher(4, OverflowPolicy::DropNewest);
            let outcome = dispatcher.dispatch(TraceRecord::utf8(&name, b"<SyncML/>"));
            prop_assert_eq!(outcome, DispatchOutcome::Forwarded);
            prop_assert!(rx.try_recv().is_ok());
        }
    }
}
