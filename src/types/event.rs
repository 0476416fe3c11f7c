//! Trace event types for the capture pipeline

use std::fmt;
use std::sync::Arc;

/// Event name as delivered by the backend.
///
/// ETW metadata stores names as UTF-16; the in-memory backend uses UTF-8. The
/// filter compares both forms in place so rejected events never allocate.
#[derive(Debug, Clone, Copy)]
pub enum EventName<'a> {
    Utf8(&'a str),
    Utf16(&'a [u16]),
}

impl EventName<'_> {
    /// ASCII case-insensitive comparison against `expected`.
    pub fn eq_ignore_ascii_case(&self, expected: &str) -> bool {
        match *self {
            EventName::Utf8(name) => name.eq_ignore_ascii_case(expected),
            EventName::Utf16(units) => {
                let mut decoded = char::decode_utf16(units.iter().copied());
                let mut expected = expected.chars();
                loop {
                    match (decoded.next(), expected.next()) {
                        (None, None) => return true,
                        (Some(Ok(a)), Some(b)) if a.eq_ignore_ascii_case(&b) => continue,
                        _ => return false,
                    }
                }
            }
        }
    }

    /// Owned copy of the name (lossy for unpaired surrogates).
    pub fn to_owned_string(&self) -> String {
        match *self {
            EventName::Utf8(name) => name.to_string(),
            EventName::Utf16(units) => String::from_utf16_lossy(units),
        }
    }
}

impl fmt::Display for EventName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            EventName::Utf8(name) => f.write_str(name),
            EventName::Utf16(units) => {
                for ch in char::decode_utf16(units.iter().copied()) {
                    write!(f, "{}", ch.unwrap_or(char::REPLACEMENT_CHARACTER))?;
                }
                Ok(())
            }
        }
    }
}

/// A raw trace record borrowed from the backend's emission callback.
///
/// Only valid for the duration of the callback; use [`TraceRecord::to_event`]
/// to detach it.
#[derive(Debug, Clone, Copy)]
pub struct TraceRecord<'a> {
    pub name: EventName<'a>,
    pub data: &'a [u8],
}

impl<'a> TraceRecord<'a> {
    pub fn new(name: EventName<'a>, data: &'a [u8]) -> Self {
        Self { name, data }
    }

    pub fn utf8(name: &'a str, data: &'a [u8]) -> Self {
        Self { name: EventName::Utf8(name), data }
    }

    /// Clone the record out of the transient buffer.
    pub fn to_event(&self) -> TraceEvent {
        TraceEvent { name: self.name.to_owned_string(), data: Arc::from(self.data) }
    }
}

/// An owned trace event that can cross the capture thread boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    /// Event name as reported by the provider
    pub name: String,

    /// Raw event payload
    pub data: Arc<[u8]>,
}

impl TraceEvent {
    pub fn new(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self { name: name.into(), data: data.into() }
    }
}
