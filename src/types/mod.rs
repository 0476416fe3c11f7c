//! Core types for the capture pipeline.
//!
//! - [`ProviderId`] names a trace provider by its stable 128-bit identifier
//! - [`TraceRecord`] is a raw record borrowed from the backend callback
//! - [`TraceEvent`] is the owned copy that crosses the capture thread boundary
//! - [`ExtractedFragment`] and [`NormalizedOutput`] are derived, never persisted
//!
//! ```rust
//! use syncml_viewer::types::{ProviderId, TraceRecord};
//!
//! let id: ProviderId = "{0EC685CD-64E4-4375-92AD-4086B6AF5F1D}".parse().unwrap();
//! assert_eq!(id, ProviderId::OMA_DM_CLIENT);
//!
//! let buffer = b"<SyncML/>\0";
//! let event = TraceRecord::utf8("OmaDmSyncmlVerboseTrace", buffer).to_event();
//! assert_eq!(event.data.len(), buffer.len());
//! ```

mod event;
mod output;
mod provider_id;

pub use event::{EventName, TraceEvent, TraceRecord};
pub use output::{ExtractedFragment, NormalizedOutput, OutputKind};
pub use provider_id::ProviderId;
