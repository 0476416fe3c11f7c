//! Versioned event schema: which providers to enable and which events to keep
//!
//! The MDM client's provider identifiers and event names belong to the OS, not
//! to this crate. They are kept as data so a schema change upstream is a
//! configuration edit.

use serde::{Deserialize, Serialize};

use crate::types::ProviderId;
use crate::{CaptureError, Result};

/// Schema version understood by this build.
pub const SCHEMA_VERSION: u32 = 1;

/// Emitted when the MDM client process starts a sync.
pub const OMA_DM_CLIENT_EXE_START: &str = "OmaDmClientExeStart";

/// Carries the verbose SyncML message dump.
pub const OMA_DM_SYNCML_VERBOSE_TRACE: &str = "OmaDmSyncmlVerboseTrace";

/// A named trace provider entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub name: String,
    pub id: ProviderId,
}

/// Providers to enable and event names to accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSchema {
    #[serde(default = "default_version")]
    pub version: u32,
    pub providers: Vec<ProviderSpec>,
    pub events: Vec<String>,
}

fn default_version() -> u32 {
    SCHEMA_VERSION
}

impl Default for EventSchema {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            providers: vec![
                ProviderSpec {
                    name: "Microsoft.Windows.DeviceManagement.OmaDmClient".to_string(),
                    id: ProviderId::OMA_DM_CLIENT,
                },
                ProviderSpec {
                    name: "Microsoft-WindowsPhone-OmaDm-Client-Provider".to_string(),
                    id: ProviderId::OMA_DM_CLIENT_PROVIDER,
                },
            ],
            events: vec![
                OMA_DM_CLIENT_EXE_START.to_string(),
                OMA_DM_SYNCML_VERBOSE_TRACE.to_string(),
            ],
        }
    }
}

impl EventSchema {
    /// Provider identifiers in declaration order.
    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.providers.iter().map(|p| p.id).collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != SCHEMA_VERSION {
            return Err(CaptureError::schema_error(format!(
                "unsupported schema version {} (expected {})",
                self.version, SCHEMA_VERSION
            )));
        }
        if self.providers.is_empty() {
            return Err(CaptureError::schema_error("no providers listed"));
        }
        if self.events.is_empty() || self.events.iter().any(|e| e.trim().is_empty()) {
            return Err(CaptureError::schema_error("event names must be non-empty"));
        }

        let mut ids = self.provider_ids();
        ids.sort();
        ids.dedup();
        if ids.len() != self.providers.len() {
            return Err(CaptureError::schema_error("duplicate provider identifier"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schema_is_the_mdm_contract() {
        let schema = EventSchema::default();
        schema.validate().unwrap();

        assert_eq!(
            schema.provider_ids(),
            vec![ProviderId::OMA_DM_CLIENT, ProviderId::OMA_DM_CLIENT_PROVIDER]
        );
        assert_eq!(schema.events, vec!["OmaDmClientExeStart", "OmaDmSyncmlVerboseTrace"]);
    }

    #[test]
    fn parses_from_yaml() {
        let yaml = r#"
providers:
  - name: Microsoft.Windows.DeviceManagement.OmaDmClient
    id: "{0EC685CD-64E4-4375-92AD-4086B6AF5F1D}"
events:
  - OmaDmSyncmlVerboseTrace
"#;
        let schema: EventSchema = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(schema.version, SCHEMA_VERSION);
        assert_eq!(schema.provider_ids(), vec![ProviderId::OMA_DM_CLIENT]);
        schema.validate().unwrap();
    }

    #[test]
    fn rejects_bad_schemas() {
        let mut empty_events = EventSchema::default();
        empty_events.events.clear();
        assert!(matches!(empty_events.validate(), Err(CaptureError::Schema { .. })));

        let mut duplicate = EventSchema::default();
        duplicate.providers[1].id = ProviderId::OMA_DM_CLIENT;
        assert!(matches!(duplicate.validate(), Err(CaptureError::Schema { .. })));

        let mut future = EventSchema::default();
        future.version = SCHEMA_VERSION + 1;
        assert!(matches!(future.validate(), Err(CaptureError::Schema { .. })));
    }
}
