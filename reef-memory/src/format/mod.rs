//! Text formats for polips
//!
//! Only the current grammar ([`codec`]) is ever written. Two older formats
//! are still read: the v1 sigil lines ([`sigil`]) and tree markup ([`tree`]).
//! [`decode`] picks the right reader from the first non-blank line.

pub mod codec;
pub mod sigil;
pub mod tree;

use crate::error::{FormatError, ReefError, Result};
use crate::polip::{Polip, RawMap, Version, DECISION_SEPARATOR};

pub use codec::encode;

/// On-disk grammar of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// `key: value` headers followed by `## section` blocks
    Current,
    /// v1 sigil lines (`=kind:scope id`, `+fact`, ...)
    Sigil,
    /// Nested markup elements
    Tree,
}

/// Decide which grammar a document uses
pub fn detect(text: &str) -> Option<Format> {
    let first = split_lines(text).find(|line| !line.trim().is_empty())?;
    let first = first.trim_start();
    Some(if first.starts_with('=') {
        Format::Sigil
    } else if first.starts_with('<') {
        Format::Tree
    } else {
        Format::Current
    })
}

/// Decode a polip from any supported grammar
pub fn decode(text: &str) -> Result<Polip> {
    match detect(text) {
        None => Err(FormatError::EmptyDocument.into()),
        Some(Format::Current) => codec::decode(text),
        Some(Format::Sigil) => sigil::decode(text),
        Some(Format::Tree) => tree::decode(text, None),
    }
}

/// Split on CR, LF and CRLF alike
pub(crate) fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = Some(text);
    std::iter::from_fn(move || {
        let current = rest?;
        match current.find(['\r', '\n']) {
            Some(pos) => {
                let skip = if current[pos..].starts_with("\r\n") { 2 } else { 1 };
                rest = Some(&current[pos + skip..]);
                Some(&current[..pos])
            }
            None => {
                rest = None;
                Some(current)
            }
        }
    })
}

/// Reject versions from a newer epoch than this build understands
pub(crate) fn check_readable(version: Version) -> Result<()> {
    if version.is_readable() {
        Ok(())
    } else {
        Err(ReefError::Version {
            found: version,
            supported: Version::CURRENT.epoch,
        })
    }
}

/// Parse an ISO-8601 calendar date
pub(crate) fn parse_date(value: &str) -> std::result::Result<chrono::NaiveDate, FormatError> {
    chrono::NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| FormatError::invalid_field("updated", value))
}

/// Prefix given to legacy sections whose name the current grammar reserves
pub(crate) const LEGACY_SECTION_PREFIX: &str = "legacy-";

/// Bring a polip read from a legacy grammar into a form the current grammar
/// can write and read back unchanged
///
/// Decisions are re-split at their first separator, so text after a
/// separator inside the choice moves into the rationale. Unknown sections
/// whose name is reserved get [`LEGACY_SECTION_PREFIX`]; body lines that
/// would read as section markers are indented and blank lines dropped.
pub(crate) fn legalize_legacy(polip: &mut Polip) {
    polip.decisions = std::mem::take(&mut polip.decisions)
        .into_iter()
        .filter_map(|d| {
            let text = match d.rationale {
                Some(rationale) => format!("{}{}{}", d.choice, DECISION_SEPARATOR, rationale),
                None => d.choice,
            };
            codec::parse_decision(&text)
        })
        .collect();

    let mut sections = RawMap::new();
    for (name, body) in polip.unknown_sections.iter() {
        let name = name.trim();
        let name = if name.is_empty() || codec::is_known_section(name) {
            format!("{LEGACY_SECTION_PREFIX}{name}")
        } else {
            name.to_string()
        };
        let body = split_lines(body)
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                if line.starts_with("##") {
                    format!("  {line}")
                } else {
                    line.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        sections.append(&name, &body);
    }
    polip.unknown_sections = sections;
}

/// Body line of the current grammar, classified by its leading marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Line<'a> {
    /// Whitespace only
    Blank,
    /// `## name`
    Section(&'a str),
    /// `- text`; carries the text after the marker
    Item(&'a str),
    /// Anything else, verbatim
    Text(&'a str),
}

impl<'a> Line<'a> {
    pub(crate) fn classify(raw: &'a str) -> Self {
        if raw.trim().is_empty() {
            return Line::Blank;
        }
        if let Some(rest) = raw.strip_prefix("##") {
            let name = rest.trim();
            if !name.is_empty() {
                return Line::Section(name);
            }
        }
        if let Some(rest) = raw.strip_prefix('-') {
            return Line::Item(rest.strip_prefix(' ').unwrap_or(rest));
        }
        Line::Text(raw)
    }
}
