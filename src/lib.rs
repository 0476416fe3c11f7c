//! Live viewer for Windows MDM SyncML traffic.
//!
//! The Windows MDM client logs every SyncML message it exchanges with its
//! management server to ETW. This crate attaches a real-time trace session to
//! the two MDM providers, keeps only the events that carry SyncML, cuts the
//! XML out of the binary payload, pretty-prints it and appends it to a sink.
//!
//! # Features
//!
//! - **Live capture**: real-time ETW session on Windows, one per session name
//! - **Backends**: the same pipeline runs on an in-memory backend for tests
//! - **Readable output**: two-space indented XML, optional decoding of nested
//!   escaped markup, raw pass-through for anything that does not parse
//! - **Host actions**: registry editor, diagnostics export and sync trigger
//!
//! ## Example (in-memory backend)
//!
//! ```rust
//! use syncml_viewer::backends::MemoryBackend;
//! use syncml_viewer::{CaptureConfig, MemorySink, SyncMlViewer};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> syncml_viewer::Result<()> {
//!     let backend = MemoryBackend::new();
//!     let controller = SyncMlViewer::controller(backend.clone(), CaptureConfig::default())?;
//!
//!     let sink = MemorySink::new();
//!     let capture = controller.start(sink.clone()).await?;
//!     let payload = b"\x01<SyncML><SyncHdr/></SyncML>\0".to_vec();
//!     backend.emit("SyncMLViewer", "OmaDmSyncmlVerboseTrace", payload);
//!     capture.stop().await?;
//!
//!     assert_eq!(sink.contents(), "<SyncML>\n  <SyncHdr/>\n</SyncML>\n");
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Capture pipeline
pub mod config;
pub mod dispatch;
mod driver;
pub mod extract;
pub mod normalize;
pub mod sink;

// Sessions and event sources
pub mod backend;
pub mod backends;
pub mod session;

// Lifecycle and host integration
pub mod actions;
pub mod capture;

// Platform-specific modules
#[cfg(windows)]
pub mod windows;

// Core exports
pub use error::*;
pub use types::*;

pub use backend::{StopSession, TraceBackend, TraceSession};
pub use capture::{CaptureController, CaptureHandle, CaptureState, CaptureSummary, SyncMlViewer};
pub use config::{CaptureConfig, EventSchema, OverflowPolicy, TextDecoding};
pub use dispatch::{CaptureStats, DispatchOutcome, Dispatcher, EventFilter, StatsSnapshot};
pub use extract::extract;
pub use normalize::normalize;
pub use session::{CaptureSession, SessionStopper};
pub use sink::{ChannelSink, MemorySink, Sink, WriterSink};

#[cfg(windows)]
pub use backends::EtwBackend;
