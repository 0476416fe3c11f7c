//! Trace backend implementations
//!
//! - [`memory::MemoryBackend`]: in-process, all platforms
//! - `etw::EtwBackend`: Event Tracing for Windows, Windows only

pub mod memory;

#[cfg(windows)]
pub mod etw;

pub use memory::MemoryBackend;

#[cfg(windows)]
pub use etw::EtwBackend;
