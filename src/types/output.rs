//! Derived pipeline values: extracted fragments and normalized output

use std::fmt;
use std::ops::Deref;

/// Substring of decoded event text believed to hold a SyncML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFragment(String);

impl ExtractedFragment {
    pub(crate) fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for ExtractedFragment {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

/// How a [`NormalizedOutput`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// The fragment parsed and was re-serialized
    Formatted,

    /// Parsing failed; the fragment is passed through verbatim
    Raw,
}

/// Final display string for one accepted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedOutput {
    pub text: String,
    pub kind: OutputKind,
}

impl NormalizedOutput {
    pub fn formatted(text: String) -> Self {
        Self { text, kind: OutputKind::Formatted }
    }

    pub fn raw(text: String) -> Self {
        Self { text, kind: OutputKind::Raw }
    }

    pub fn is_formatted(&self) -> bool {
        self.kind == OutputKind::Formatted
    }
}

impl fmt::Display for NormalizedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
