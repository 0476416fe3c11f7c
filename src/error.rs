//! Error types for SyncML capture.
//!
//! Two families of errors exist, mirroring the two failure granularities of the
//! capture pipeline:
//!
//! - [`CaptureError`]: session-level failures. These abort a capture attempt
//!   (or the capture loop) and are reported once to the operator.
//! - [`EventError`]: per-event failures. These are absorbed where they happen,
//!   logged at `trace`/`debug`, and never stop the stream.
//!
//! ## Recovery and Retry
//!
//! Session errors provide methods to determine if they are recoverable:
//!
//! ```rust
//! use syncml_viewer::CaptureError;
//!
//! let error = CaptureError::name_in_use("SyncMLViewer");
//! if !error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

#[cfg(windows)]
use windows_core as core;

/// Result type alias for capture operations.
pub type Result<T, E = CaptureError> = std::result::Result<T, E>;

/// Session-level error type.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CaptureError {
    #[error("Capturing trace session '{session}' requires administrative privileges")]
    PermissionDenied { session: String },

    #[error("The session name '{session}' is already in use")]
    NameInUse { session: String },

    #[error("Trace session '{session}' failed during {operation}")]
    Session {
        session: String,
        operation: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("{feature} is only available on {required_platform}")]
    UnsupportedPlatform { feature: String, required_platform: String },

    #[error("Windows API error: {operation}")]
    #[cfg(windows)]
    WindowsApi {
        operation: String,
        #[source]
        source: core::Error,
    },

    #[error("Configuration error in {path}")]
    Config {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Invalid provider identifier '{value}'")]
    InvalidProviderId { value: String },

    #[error("Invalid event schema: {reason}")]
    Schema { reason: String },

    #[error("Sink rejected output: {reason}")]
    Sink {
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Host action '{action}' failed")]
    Action {
        action: String,
        #[source]
        source: std::io::Error,
    },
}

impl CaptureError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            CaptureError::PermissionDenied { .. } => false,
            // Retrying only helps once the previous holder has released the name.
            CaptureError::NameInUse { .. } => false,
            CaptureError::Session { .. } => true,
            CaptureError::UnsupportedPlatform { .. } => false,
            #[cfg(windows)]
            CaptureError::WindowsApi { .. } => true,
            CaptureError::Config { .. } => false,
            CaptureError::InvalidProviderId { .. } => false,
            CaptureError::Schema { .. } => false,
            CaptureError::Sink { .. } => true,
            CaptureError::NotFound { .. } => false,
            CaptureError::Action { .. } => true,
        }
    }

    /// Command that stops a leftover trace session blocking this name.
    ///
    /// Real-time sessions outlive a process killed before it could release
    /// them; the next start with the same name then fails with `NameInUse`.
    pub fn stale_session_command(&self) -> Option<String> {
        match self {
            CaptureError::NameInUse { session } => Some(format!("logman stop \"{session}\" -ets")),
            _ => None,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            CaptureError::PermissionDenied { .. } => vec![
                "Run the viewer from an elevated (administrator) prompt",
                "Check that the account may control ETW sessions",
            ],
            CaptureError::NameInUse { .. } => vec![
                "Close the other viewer instance using this session name",
                "Stop the stale session with `logman stop <name> -ets`",
                "Choose a different session name",
            ],
            CaptureError::Session { .. } => vec![
                "Restart the capture",
                "Check the system event log for ETW errors",
                "Verify the MDM providers are registered on this machine",
            ],
            CaptureError::UnsupportedPlatform { .. } => vec![
                "Run live capture on Windows",
                "Use the in-memory backend for cross-platform testing",
            ],
            #[cfg(windows)]
            CaptureError::WindowsApi { .. } => vec![
                "Check Windows API permissions",
                "Verify system resources availability",
                "Check Windows version compatibility",
            ],
            CaptureError::Config { .. } => vec![
                "Check the configuration file exists and is readable",
                "Validate the YAML syntax",
            ],
            CaptureError::InvalidProviderId { .. } => vec![
                "Use the GUID form {XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}",
            ],
            CaptureError::Schema { .. } => vec![
                "List at least one provider and one event name",
                "Restore the default MDM schema",
            ],
            CaptureError::Sink { .. } => vec![
                "Check the output destination is still writable",
                "Restart the capture with a fresh sink",
            ],
            CaptureError::NotFound { .. } => vec![
                "Check the path exists",
                "Create the folder before opening it",
            ],
            CaptureError::Action { .. } => vec![
                "Check the external tool is installed and on PATH",
                "Run the viewer with administrative privileges",
            ],
        }
    }

    /// Helper constructor for missing privileges.
    pub fn permission_denied(session: impl Into<String>) -> Self {
        CaptureError::PermissionDenied { session: session.into() }
    }

    /// Helper constructor for session name collisions.
    pub fn name_in_use(session: impl Into<String>) -> Self {
        CaptureError::NameInUse { session: session.into() }
    }

    /// Helper constructor for backend failures without an underlying error.
    pub fn session_failed(session: impl Into<String>, operation: impl Into<String>) -> Self {
        CaptureError::Session { session: session.into(), operation: operation.into(), source: None }
    }

    /// Helper constructor for backend failures with source.
    pub fn session_failed_with_source(
        session: impl Into<String>,
        operation: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        CaptureError::Session {
            session: session.into(),
            operation: operation.into(),
            source: Some(source.into()),
        }
    }

    /// Helper constructor for Windows API errors.
    #[cfg(windows)]
    pub fn windows_api_error(operation: impl Into<String>, source: core::Error) -> Self {
        CaptureError::WindowsApi { operation: operation.into(), source }
    }

    /// Helper constructor for configuration errors.
    pub fn config_error(
        path: impl Into<PathBuf>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        CaptureError::Config { path: path.into(), source: source.into() }
    }

    /// Helper constructor for schema validation errors.
    pub fn schema_error(reason: impl Into<String>) -> Self {
        CaptureError::Schema { reason: reason.into() }
    }

    /// Helper constructor for sink failures.
    pub fn sink_failed(reason: impl Into<String>, source: Option<std::io::Error>) -> Self {
        CaptureError::Sink { reason: reason.into(), source }
    }

    /// Helper constructor for failed host actions.
    pub fn action_failed(action: impl Into<String>, source: std::io::Error) -> Self {
        CaptureError::Action { action: action.into(), source }
    }

    /// Helper constructor for unsupported platform errors.
    pub fn unsupported_platform(
        feature: impl Into<String>,
        required_platform: impl Into<String>,
    ) -> Self {
        CaptureError::UnsupportedPlatform {
            feature: feature.into(),
            required_platform: required_platform.into(),
        }
    }
}

#[cfg(windows)]
impl From<core::Error> for CaptureError {
    fn from(err: core::Error) -> Self {
        CaptureError::WindowsApi {
            operation: "Unknown Windows operation".to_string(),
            source: err,
        }
    }
}

/// Per-event failure. Absorbed locally; the event produces no output (or raw
/// output, for [`EventError::MalformedXml`]).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EventError {
    #[error("event data is not valid UTF-8 (valid up to byte {valid_up_to})")]
    Decode { valid_up_to: usize },

    #[error("event data contains no <SyncML marker")]
    MarkerNotFound,

    #[error("malformed XML: {details}")]
    MalformedXml { details: String },
}

impl EventError {
    /// Helper constructor for XML parse failures.
    pub fn malformed(details: impl Into<String>) -> Self {
        EventError::MalformedXml { details: details.into() }
    }
}

impl From<std::str::Utf8Error> for EventError {
    fn from(err: std::str::Utf8Error) -> Self {
        EventError::Decode { valid_up_to: err.valid_up_to() }
    }
}
