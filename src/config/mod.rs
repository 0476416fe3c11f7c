//! Capture configuration
//!
//! Every field has a default, so an empty YAML document (or no file at all)
//! yields the standard MDM capture:
//!
//! ```rust
//! use syncml_viewer::config::{CaptureConfig, OverflowPolicy};
//!
//! let config = CaptureConfig::from_yaml_str("channel_capacity: 64\noverflow: block\n").unwrap();
//! assert_eq!(config.session_name, "SyncMLViewer");
//! assert_eq!(config.channel_capacity, 64);
//! assert_eq!(config.overflow, OverflowPolicy::Block);
//! ```

mod schema;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{CaptureError, Result};

pub use schema::{
    EventSchema, OMA_DM_CLIENT_EXE_START, OMA_DM_SYNCML_VERBOSE_TRACE, ProviderSpec,
    SCHEMA_VERSION,
};

/// Session name used when none is configured.
pub const DEFAULT_SESSION_NAME: &str = "SyncMLViewer";

/// Default bound of the capture → consumer channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// What the capture thread does when the consumer channel is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Discard the incoming event and count it; never stalls the capture thread
    #[default]
    DropNewest,

    /// Wait for room; stalls event ingestion while the consumer catches up
    Block,
}

/// How event payload bytes become text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextDecoding {
    /// Invalid UTF-8 drops the event
    #[default]
    Strict,

    /// Invalid sequences become U+FFFD
    Lossy,
}

/// Configuration for one capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub session_name: String,
    pub schema: EventSchema,
    pub channel_capacity: usize,
    pub overflow: OverflowPolicy,
    pub record_separator: String,
    /// Initial value of the runtime decode toggle
    pub decode_entities: bool,
    pub decoding: TextDecoding,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            session_name: DEFAULT_SESSION_NAME.to_string(),
            schema: EventSchema::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            overflow: OverflowPolicy::default(),
            record_separator: "\n".to_string(),
            decode_entities: false,
            decoding: TextDecoding::default(),
        }
    }
}

impl CaptureConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Self::parse(yaml, PathBuf::from("<inline>"))
    }

    /// Load and validate a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml =
            std::fs::read_to_string(path).map_err(|e| CaptureError::config_error(path, e))?;
        Self::parse(&yaml, path.to_path_buf())
    }

    fn parse(yaml: &str, origin: PathBuf) -> Result<Self> {
        let config: CaptureConfig = if yaml.trim().is_empty() {
            CaptureConfig::default()
        } else {
            serde_yaml_ng::from_str(yaml).map_err(|e| CaptureError::config_error(&origin, e))?
        };
        config.validate()?;
        debug!(
            origin = %origin.display(),
            session = %config.session_name,
            providers = config.schema.providers.len(),
            events = config.schema.events.len(),
            "Loaded capture configuration"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_name.trim().is_empty() {
            return Err(CaptureError::schema_error("session name must be non-empty"));
        }
        if self.channel_capacity == 0 {
            return Err(CaptureError::schema_error("channel capacity must be at least 1"));
        }
        self.schema.validate()
    }

    /// Builder-style override of the session name.
    pub fn with_session_name(mut self, name: impl Into<String>) -> Self {
        self.session_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderId;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(CaptureConfig::from_yaml_str("").unwrap(), CaptureConfig::default());
    }

    #[test]
    fn full_document_round_trips_fields() {
        let yaml = r#"
session_name: MdmDebug
channel_capacity: 8
overflow: drop-newest
record_separator: "\n\n"
decode_entities: true
decoding: lossy
schema:
  version: 1
  providers:
    - name: OmaDmClient
      id: 0ec685cd-64e4-4375-92ad-4086b6af5f1d
  events: [OmaDmSyncmlVerboseTrace]
"#;
        let config = CaptureConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.session_name, "MdmDebug");
        assert_eq!(config.channel_capacity, 8);
        assert_eq!(config.overflow, OverflowPolicy::DropNewest);
        assert_eq!(config.record_separator, "\n\n");
        assert!(config.decode_entities);
        assert_eq!(config.decoding, TextDecoding::Lossy);
        assert_eq!(config.schema.provider_ids(), vec![ProviderId::OMA_DM_CLIENT]);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            CaptureConfig::from_yaml_str("channel_capacity: 0"),
            Err(CaptureError::Schema { .. })
        ));
        assert!(matches!(
            CaptureConfig::from_yaml_str("session_name: '  '"),
            Err(CaptureError::Schema { .. })
        ));
        assert!(matches!(
            CaptureConfig::from_yaml_str("overflow: sometimes"),
            Err(CaptureError::Config { .. })
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = CaptureConfig::load("/definitely/not/here.yaml").unwrap_err();
        match err {
            CaptureError::Config { path, .. } => {
                assert_eq!(path, PathBuf::from("/definitely/not/here.yaml"))
            }
            other => panic!("expected Config error, got {other:?}"),
        }
    }
}
