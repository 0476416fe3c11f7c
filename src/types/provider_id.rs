//! Stable 128-bit trace provider identifiers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CaptureError;

/// Identifier of a system component that emits trace events.
///
/// Stored as the 128-bit big-endian value of the GUID text form, so
/// `{0EC685CD-64E4-4375-92AD-4086B6AF5F1D}` is `0x0EC685CD_64E4_4375_92AD_4086B6AF5F1D`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderId(u128);

impl ProviderId {
    /// `Microsoft.Windows.DeviceManagement.OmaDmClient`
    pub const OMA_DM_CLIENT: ProviderId = ProviderId(0x0EC685CD_64E4_4375_92AD_4086B6AF5F1D);

    /// `Microsoft-WindowsPhone-OmaDm-Client-Provider`
    pub const OMA_DM_CLIENT_PROVIDER: ProviderId =
        ProviderId(0x3B9602FF_E09B_4C6C_BC19_1A3DFA8F2250);

    pub const fn from_u128(value: u128) -> Self {
        Self(value)
    }

    pub const fn as_u128(self) -> u128 {
        self.0
    }

    /// Convert to the Windows GUID layout.
    #[cfg(windows)]
    pub fn to_guid(self) -> windows_core::GUID {
        windows_core::GUID::from_u128(self.0)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:04X}-{:012X}}}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xFFFF_FFFF_FFFF
        )
    }
}

impl FromStr for ProviderId {
    type Err = CaptureError;

    /// Accepts the hyphenated form with or without braces, any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CaptureError::InvalidProviderId { value: s.to_string() };

        let trimmed = s.trim();
        let body = match (trimmed.strip_prefix('{'), trimmed.strip_suffix('}')) {
            (Some(_), Some(_)) => &trimmed[1..trimmed.len() - 1],
            (None, None) => trimmed,
            _ => return Err(invalid()),
        };

        let groups: Vec<&str> = body.split('-').collect();
        let expected = [8, 4, 4, 4, 12];
        if groups.len() != expected.len()
            || groups.iter().zip(expected).any(|(group, len)| group.len() != len)
        {
            return Err(invalid());
        }

        let mut value = 0u128;
        for ch in groups.concat().chars() {
            let digit = ch.to_digit(16).ok_or_else(invalid)?;
            value = (value << 4) | digit as u128;
        }

        Ok(Self(value))
    }
}

impl TryFrom<String> for ProviderId {
    type Error = CaptureError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProviderId> for String {
    fn from(id: ProviderId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mdm_constants_format_as_registered_guids() {
        assert_eq!(ProviderId::OMA_DM_CLIENT.to_string(), "{0EC685CD-64E4-4375-92AD-4086B6AF5F1D}");
        assert_eq!(
            ProviderId::OMA_DM_CLIENT_PROVIDER.to_string(),
            "{3B9602FF-E09B-4C6C-BC19-1A3DFA8F2250}"
        );
    }

    #[test]
    fn parses_with_and_without_braces() {
        let braced: ProviderId = "{3b9602ff-e09b-4c6c-bc19-1a3dfa8f2250}".parse().unwrap();
        let bare: ProviderId = "3B9602FF-E09B-4C6C-BC19-1A3DFA8F2250".parse().unwrap();
        assert_eq!(braced, ProviderId::OMA_DM_CLIENT_PROVIDER);
        assert_eq!(bare, ProviderId::OMA_DM_CLIENT_PROVIDER);
    }

    #[test]
    fn rejects_malformed_identifiers() {
        for bad in [
            "",
            "{3B9602FF-E09B-4C6C-BC19-1A3DFA8F2250",
            "3B9602FF-E09B-4C6C-BC19",
            "3B9602FF-E09B-4C6C-BC19-1A3DFA8F225Z",
            "3B9602FFE09B-4C6C-BC19-1A3DFA8F22500",
        ] {
            assert!(
                matches!(bad.parse::<ProviderId>(), Err(CaptureError::InvalidProviderId { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn serializes_as_string() {
        let yaml = serde_yaml_ng::to_string(&ProviderId::OMA_DM_CLIENT).unwrap();
        assert!(yaml.contains("0EC685CD-64E4-4375-92AD-4086B6AF5F1D"));

        let back: ProviderId = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(back, ProviderId::OMA_DM_CLIENT);
    }

    #[cfg(windows)]
    #[test]
    fn converts_to_windows_guid() {
        let guid = ProviderId::OMA_DM_CLIENT.to_guid();
        assert_eq!(guid.data1, 0x0EC685CD);
        assert_eq!(guid.data2, 0x64E4);
        assert_eq!(guid.data3, 0x4375);
        assert_eq!(guid.data4, [0x92, 0xAD, 0x40, 0x86, 0xB6, 0xAF, 0x5F, 0x1D]);
    }
}
