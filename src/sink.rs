//! Append-only output sinks
//!
//! The consumer calls [`Sink::append`] once per accepted event, in arrival
//! order, with the record separator already appended.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{CaptureError, Result};

/// Destination for normalized output.
#[async_trait::async_trait]
pub trait Sink: Send + 'static {
    /// Append one record.
    ///
    /// An error stops the consumer; the capture session is then released.
    async fn append(&mut self, text: &str) -> Result<()>;
}

/// Clearable in-memory text log.
///
/// Clones share the same buffer, so one clone can be handed to the capture
/// while another reads or clears it.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buffer: Arc<Mutex<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, String> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of everything appended since the last clear.
    pub fn contents(&self) -> String {
        self.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Discard the log. Capture is unaffected.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[async_trait::async_trait]
impl Sink for MemorySink {
    async fn append(&mut self, text: &str) -> Result<()> {
        self.lock().push_str(text);
        Ok(())
    }
}

/// Forwards each record to a stream.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    /// Create a sink and the stream of records it receives.
    pub fn new() -> (Self, UnboundedReceiverStream<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, UnboundedReceiverStream::new(rx))
    }
}

#[async_trait::async_trait]
impl Sink for ChannelSink {
    async fn append(&mut self, text: &str) -> Result<()> {
        self.tx
            .send(text.to_string())
            .map_err(|_| CaptureError::sink_failed("output stream closed", None))
    }
}

/// Writes records to any [`std::io::Write`], flushing after each one.
pub struct WriterSink<W: Write + Send + 'static> {
    writer: W,
}

impl<W: Write + Send + 'static> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl WriterSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

#[async_trait::async_trait]
impl<W: Write + Send + 'static> Sink for WriterSink<W> {
    async fn append(&mut self, text: &str) -> Result<()> {
        self.writer
            .write_all(text.as_bytes())
            .and_then(|()| self.writer.flush())
            .map_err(|e| CaptureError::sink_failed("write failed", Some(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn memory_sink_appends_and_clears() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();

        writer.append("one\n").await.unwrap();
        writer.append("two\n").await.unwrap();
        assert_eq!(sink.contents(), "one\ntwo\n");

        sink.clear();
        assert!(sink.is_empty());
        writer.append("three\n").await.unwrap();
        assert_eq!(sink.contents(), "three\n");
    }

    #[tokio::test]
    async fn channel_sink_streams_records_in_order() {
        let (mut sink, stream) = ChannelSink::new();
        sink.append("a").await.unwrap();
        sink.append("b").await.unwrap();
        drop(sink);

        let records: Vec<String> = stream.collect().await;
        assert_eq!(records, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn channel_sink_fails_when_stream_dropped() {
        let (mut sink, stream) = ChannelSink::new();
        drop(stream);
        assert!(matches!(sink.append("a").await, Err(CaptureError::Sink { .. })));
    }

    #[tokio::test]
    async fn writer_sink_writes_bytes() {
        let mut sink = WriterSink::new(Vec::new());
        sink.append("<SyncML/>\n").await.unwrap();
        assert_eq!(sink.into_inner(), b"<SyncML/>\n");
    }
}
