//! SyncML payload extraction
//!
//! MDM trace payloads carry a binary header followed by the SyncML message as
//! a NUL-terminated string. Extraction decodes the buffer, finds the first
//! `<SyncML` and cuts from there to the end, dropping the final character.
//!
//! The cut assumes exactly one trailing artifact (the terminator). If the
//! provider's payload layout changes this must be revalidated.

use std::borrow::Cow;
use tracing::trace;

use crate::config::TextDecoding;
use crate::error::EventError;
use crate::types::ExtractedFragment;

/// Start marker of the embedded document.
pub const SYNCML_MARKER: &str = "<SyncML";

/// Extract the SyncML fragment from raw event data using strict UTF-8.
pub fn extract(raw: &[u8]) -> Option<ExtractedFragment> {
    extract_with(raw, TextDecoding::Strict)
}

/// Extract with an explicit decoding mode.
pub fn extract_with(raw: &[u8], decoding: TextDecoding) -> Option<ExtractedFragment> {
    match try_extract(raw, decoding) {
        Ok(fragment) => Some(fragment),
        Err(reason) => {
            trace!(bytes = raw.len(), %reason, "No fragment extracted");
            None
        }
    }
}

/// Like [`extract_with`], reporting why nothing was extracted.
pub fn try_extract(raw: &[u8], decoding: TextDecoding) -> Result<ExtractedFragment, EventError> {
    let text: Cow<'_, str> = match decoding {
        TextDecoding::Strict => Cow::Borrowed(std::str::from_utf8(raw)?),
        TextDecoding::Lossy => String::from_utf8_lossy(raw),
    };

    locate_fragment(&text).map(ExtractedFragment::new).ok_or(EventError::MarkerNotFound)
}

/// Borrow the fragment out of decoded text: marker to end, minus the last character.
pub fn locate_fragment(text: &str) -> Option<&str> {
    let start = text.find(SYNCML_MARKER)?;
    let tail = &text[start..];
    let end = tail.char_indices().next_back().map_or(0, |(index, _)| index);
    Some(&tail[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn cuts_from_marker_and_drops_terminator() {
        let fragment = extract(b"junk<SyncML><SyncHdr/></SyncML>\0").unwrap();
        assert_eq!(fragment.as_str(), "<SyncML><SyncHdr/></SyncML>");
    }

    #[test]
    fn drops_exactly_one_character_even_if_it_is_markup() {
        let fragment = extract(b"<SyncML></SyncML>").unwrap();
        assert_eq!(fragment.as_str(), "<SyncML></SyncML");
    }

    #[test]
    fn trailing_multibyte_character_is_removed_whole() {
        let fragment = extract("<SyncML>é".as_bytes()).unwrap();
        assert_eq!(fragment.as_str(), "<SyncML>");
    }

    #[test]
    fn marker_only_is_trimmed_too() {
        assert_eq!(extract(b"header<SyncML").unwrap().as_str(), "<SyncM");
    }

    #[test]
    fn first_marker_wins() {
        let fragment = extract(b"<SyncML>a</SyncML><SyncML>b</SyncML>\0").unwrap();
        assert!(fragment.starts_with("<SyncML>a"));
    }

    #[test]
    fn marker_is_case_sensitive() {
        let result = try_extract(b"<syncml></syncml>\0", TextDecoding::Strict);
        assert_eq!(result, Err(EventError::MarkerNotFound));
    }

    #[test]
    fn invalid_utf8_depends_on_decoding_mode() {
        let raw = b"\x01\xff\xfe<SyncML/>\0";

        assert!(matches!(
            try_extract(raw, TextDecoding::Strict),
            Err(EventError::Decode { valid_up_to: 1 })
        ));
        assert_eq!(extract_with(raw, TextDecoding::Lossy).unwrap().as_str(), "<SyncML/>");
    }

    proptest! {
        #[test]
        fn fragment_is_marker_to_len_minus_one(prefix in "[^<]*", body in ".*") {
            let text = format!("{prefix}{SYNCML_MARKER}{body}");
            let fragment = extract(text.as_bytes()).unwrap();

            let tail = &text[prefix.len()..];
            let mut expected: Vec<char> = tail.chars().collect();
            expected.pop();
            prop_assert_eq!(fragment.as_str(), expected.into_iter().collect::<String>());
        }

        #[test]
        fn text_without_marker_yields_none(text in "[^<]*") {
            prop_assert!(extract(text.as_bytes()).is_none());
        }
    }
}
