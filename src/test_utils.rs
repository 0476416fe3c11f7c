//! Test utilities: SyncML fixtures and raw payload builders
//!
//! Shared by unit tests, end-to-end capture tests and benchmarks. Payloads are
//! shaped like the MDM client's verbose trace events: a short binary header,
//! the SyncML message, then a NUL terminator.

#![cfg(any(test, feature = "benchmark"))]

use crate::config::{OMA_DM_CLIENT_EXE_START, OMA_DM_SYNCML_VERBOSE_TRACE};

/// Smallest document the pipeline formats.
pub const SYNCML_MINIMAL: &str = "<SyncML><SyncHdr/></SyncML>";

/// A device → server message opening a session.
pub const SYNCML_MESSAGE: &str = concat!(
    r#"<SyncML xmlns="SYNCML:SYNCML1.2">"#,
    "<SyncHdr><VerDTD>1.2</VerDTD><VerProto>DM/1.2</VerProto><SessionID>1A</SessionID>",
    "<MsgID>1</MsgID><Target>",
    "<LocURI>https://mdm.example.com/EnrollmentServer/DeviceManagement.svc</LocURI>",
    "</Target>",
    "<Source><LocURI>HW-0123456789</LocURI><LocName>dummy</LocName></Source></SyncHdr>",
    "<SyncBody><Alert><CmdID>1</CmdID><Data>1201</Data></Alert>",
    r#"<Replace><CmdID>2</CmdID><Item><Source><LocURI>./DevInfo/DevId</LocURI></Source>"#,
    "<Data>HW-0123456789</Data></Item><Item><Source><LocURI>./DevInfo/Man</LocURI></Source>",
    "<Data>Contoso</Data></Item></Replace><Final/></SyncBody></SyncML>",
);

/// A server → device message whose payload is itself escaped XML.
pub const SYNCML_STATUS_WITH_NESTED_XML: &str = concat!(
    "<SyncML><SyncHdr><MsgID>2</MsgID></SyncHdr><SyncBody>",
    "<Add><CmdID>3</CmdID><Item><Target><LocURI>./Vendor/MSFT/Policy/Config</LocURI></Target>",
    "<Data>&lt;wap-provisioningdoc&gt;",
    "&lt;characteristic type=&quot;Policy&quot;/&gt;",
    "&lt;/wap-provisioningdoc&gt;</Data>",
    "</Item></Add><Final/></SyncBody></SyncML>",
);

/// Binary header preceding the message in verbose trace payloads.
const PAYLOAD_HEADER: &[u8] = b"\x01\x00\x00\x00\x1fOmaDmSessionTrace\x00";

/// Raw event data carrying `xml` after a header and before a NUL terminator.
pub fn verbose_trace_payload(xml: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(PAYLOAD_HEADER.len() + xml.len() + 1);
    payload.extend_from_slice(PAYLOAD_HEADER);
    payload.extend_from_slice(xml.as_bytes());
    payload.push(0);
    payload
}

/// Event data without any SyncML marker.
pub fn noise_payload() -> Vec<u8> {
    b"\x01\x00\x00\x00OmaDmClientExeStart: session complete, result=0x0\x00".to_vec()
}

/// `(event name, payload)` pairs for a short realistic session.
pub fn session_events() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        (OMA_DM_CLIENT_EXE_START, noise_payload()),
        (OMA_DM_SYNCML_VERBOSE_TRACE, verbose_trace_payload(SYNCML_MESSAGE)),
        ("Microsoft.Windows.DeviceManagement.Heartbeat", verbose_trace_payload(SYNCML_MINIMAL)),
        (OMA_DM_SYNCML_VERBOSE_TRACE, verbose_trace_payload(SYNCML_STATUS_WITH_NESTED_XML)),
    ]
}
