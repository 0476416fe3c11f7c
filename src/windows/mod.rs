//! Windows ETW access
//!
//! Thin wrappers over the Event Tracing for Windows controller and consumer
//! APIs, plus the process elevation check. Everything here is `unsafe` FFI
//! kept behind small safe types; [`crate::backends::etw`] builds the
//! [`TraceBackend`](crate::backend::TraceBackend) on top of it.
//!
//! # Usage
//!
//! ```rust,ignore
//! use syncml_viewer::windows::{RealtimeSession, is_elevated};
//! use syncml_viewer::ProviderId;
//!
//! assert!(is_elevated()?);
//! let session = RealtimeSession::start("SyncMLViewer")?;
//! session.enable_provider(ProviderId::OMA_DM_CLIENT)?;
//! session.process(&mut |record| println!("{}", record.name))?;
//! ```

mod elevation;
mod etw;

pub use elevation::is_elevated;
pub use etw::{RealtimeSession, SessionControl};
