//! SyncML XML normalization
//!
//! Parses a fragment as a single element tree and writes it back with
//! two-space indentation. Formatting is best-effort: anything that does not
//! parse is returned exactly as it came in.
//!
//! ```rust
//! use syncml_viewer::normalize::normalize;
//!
//! let pretty = normalize("<SyncML><SyncHdr/></SyncML>", false);
//! assert_eq!(pretty, "<SyncML>\n  <SyncHdr/>\n</SyncML>");
//!
//! // Truncated input passes through untouched
//! assert_eq!(normalize("<SyncML><SyncHdr>", false), "<SyncML><SyncHdr>");
//! ```

use std::borrow::Cow;

use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::escape::partial_escape;
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};
use tracing::trace;

use crate::error::EventError;
use crate::types::NormalizedOutput;

const INDENT_SIZE: usize = 2;

/// Normalize `fragment`, optionally reversing `&lt;`, `&gt;` and `&quot;`.
///
/// Returns `fragment` unchanged if it is not a well-formed element tree.
pub fn normalize(fragment: &str, decode_html_entities: bool) -> String {
    render(fragment, decode_html_entities).text
}

/// Like [`normalize`], also reporting whether formatting succeeded.
pub fn render(fragment: &str, decode_html_entities: bool) -> NormalizedOutput {
    match reformat(fragment) {
        Ok(xml) if decode_html_entities => NormalizedOutput::formatted(unescape_markup(&xml)),
        Ok(xml) => NormalizedOutput::formatted(xml),
        Err(e) => {
            trace!(bytes = fragment.len(), "Passing fragment through unformatted: {}", e);
            NormalizedOutput::raw(fragment.to_string())
        }
    }
}

/// Targeted unescape of the three entities that hide nested markup.
///
/// Deliberately partial: `&amp;` and numeric references stay encoded.
pub fn unescape_markup(xml: &str) -> String {
    xml.replace("&lt;", "<").replace("&gt;", ">").replace("&quot;", "\"")
}

/// Parse and re-serialize, failing on anything that is not one element tree.
pub fn reformat(fragment: &str) -> Result<String, EventError> {
    let mut reader = Reader::from_str(fragment);
    reader.config_mut().expand_empty_elements = false;
    reader.config_mut().check_end_names = true;

    let mut writer =
        Writer::new_with_indent(Vec::with_capacity(fragment.len() + 64), b' ', INDENT_SIZE);
    let mut tree = TreeState::default();

    loop {
        let event = reader.read_event().map_err(|e| {
            EventError::malformed(format!("{} (near byte {})", e, reader.buffer_position()))
        })?;

        match event {
            Event::Start(start) => {
                tree.open()?;
                write(&mut writer, Event::Start(canonical_start(&start)?))?;
                tree.depth += 1;
            }
            Event::Empty(start) => {
                tree.open()?;
                write(&mut writer, Event::Empty(canonical_start(&start)?))?;
            }
            Event::End(end) => {
                tree.depth = tree
                    .depth
                    .checked_sub(1)
                    .ok_or_else(|| EventError::malformed("end tag without start tag"))?;
                let name = utf8_name(end.name())?;
                write(&mut writer, Event::End(BytesEnd::new(name)))?;
            }
            Event::Text(text) => {
                let unescaped = text.unescape().map_err(|e| EventError::malformed(e.to_string()))?;
                // Whitespace-only text is insignificant
                if unescaped.trim().is_empty() {
                    continue;
                }
                tree.require_inside("text")?;
                let escaped = partial_escape(unescaped.as_ref());
                write(&mut writer, Event::Text(BytesText::from_escaped(escaped)))?;
            }
            Event::CData(cdata) => {
                tree.require_inside("CDATA section")?;
                write(&mut writer, Event::CData(cdata))?;
            }
            // Comments and processing instructions outside the root are dropped
            Event::Comment(comment) if tree.depth > 0 => {
                write(&mut writer, Event::Comment(comment))?
            }
            Event::PI(pi) if tree.depth > 0 => write(&mut writer, Event::PI(pi))?,
            Event::Comment(_) | Event::PI(_) => {}
            Event::Decl(_) => {
                if tree.seen_root {
                    return Err(EventError::malformed("XML declaration after the root element"));
                }
            }
            Event::DocType(_) => return Err(EventError::malformed("DTDs are not allowed")),
            Event::Eof => break,
        }
    }

    if !tree.seen_root {
        return Err(EventError::malformed("no root element"));
    }
    if tree.depth != 0 {
        return Err(EventError::malformed(format!("{} unclosed element(s)", tree.depth)));
    }

    String::from_utf8(writer.into_inner()).map_err(|e| EventError::malformed(e.to_string()))
}

#[derive(Default)]
struct TreeState {
    depth: usize,
    seen_root: bool,
}

impl TreeState {
    fn open(&mut self) -> Result<(), EventError> {
        if self.depth == 0 {
            if self.seen_root {
                return Err(EventError::malformed("more than one root element"));
            }
            self.seen_root = true;
        }
        Ok(())
    }

    fn require_inside(&self, what: &str) -> Result<(), EventError> {
        if self.depth == 0 {
            return Err(EventError::malformed(format!("{what} outside the root element")));
        }
        Ok(())
    }
}

fn utf8_name(name: QName<'_>) -> Result<String, EventError> {
    std::str::from_utf8(name.as_ref())
        .map(str::to_string)
        .map_err(|e| EventError::malformed(e.to_string()))
}

/// Rebuild a start tag with canonically escaped attribute values.
fn canonical_start(start: &BytesStart<'_>) -> Result<BytesStart<'static>, EventError> {
    let mut canonical = BytesStart::new(utf8_name(start.name())?);

    for attr in start.attributes() {
        let attr = attr.map_err(|e| EventError::malformed(e.to_string()))?;
        let value = attr.unescape_value().map_err(|e| EventError::malformed(e.to_string()))?;
        let escaped = partial_escape(value.as_ref()).replace('"', "&quot;");
        canonical.push_attribute(Attribute {
            key: attr.key,
            value: Cow::Owned(escaped.into_bytes()),
        });
    }

    Ok(canonical)
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), EventError> {
    writer.write_event(event).map_err(|e| EventError::malformed(e.to_string()))
}
