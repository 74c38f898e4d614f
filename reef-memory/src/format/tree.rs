//! Tree-markup adapter (read-only)
//!
//! The oldest stores kept one element tree per polip:
//!
//! ```xml
//! <polip id="auth" type="thread" scope="project" status="active" updated="2025-03-01" v="1">
//!   <summary>Move session handling into middleware</summary>
//!   <facts><fact>tokens live in a cookie</fact></facts>
//!   <decisions><decision why="mobile speaks it">keep JWT</decision></decisions>
//!   <questions><question>who owns refresh</question></questions>
//!   <next><step done="true">extract parser</step></next>
//!   <links><link>session-store</link></links>
//!   <files><file>src/auth.rs</file></files>
//! </polip>
//! ```
//!
//! Leaves with no text are dropped by [`drop_empty_leaves`]. That is a
//! normalisation of the old format, applied the same way to every list.

use chrono::Local;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::check_readable;
use crate::error::{FormatError, Result};
use crate::polip::{Decision, Polip, PolipId, PolipKind, Scope, Status, Step, Version};

/// Minimal element tree
#[derive(Debug, Default)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Own text plus every descendant's, one line each
    fn flat_text(&self) -> String {
        let mut parts = vec![normalize_text(&self.text)];
        parts.extend(self.children.iter().map(Element::flat_text));
        parts.retain(|p| !p.is_empty());
        parts.join("\n")
    }
}

fn tree_error(err: impl std::fmt::Display) -> FormatError {
    FormatError::Tree(err.to_string())
}

fn open_element(start: &BytesStart<'_>) -> std::result::Result<Element, FormatError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(tree_error)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(tree_error)?.into_owned();
        attrs.push((key, value));
    }
    Ok(Element {
        name,
        attrs,
        ..Default::default()
    })
}

fn parse_tree(text: &str) -> std::result::Result<Element, FormatError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event().map_err(tree_error)? {
            Event::Start(start) => stack.push(open_element(&start)?),
            Event::Empty(start) => {
                let element = open_element(&start)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text.unescape().map_err(tree_error)?);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::End(_) => {
                let done = stack
                    .pop()
                    .ok_or_else(|| FormatError::Tree("unbalanced closing tag".into()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(done),
                    None => root = Some(done),
                }
            }
            Event::Eof => break,
            _ => {}
        }
        if root.is_some() && stack.is_empty() {
            break;
        }
    }

    if !stack.is_empty() {
        return Err(FormatError::Tree("unclosed element".into()));
    }
    root.ok_or_else(|| FormatError::Tree("no root element".into()))
}

/// Trim every line and drop blank ones
fn normalize_text(text: &str) -> String {
    super::split_lines(text)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Leaves of `container` named `leaf`, skipping any whose text is empty
///
/// Old writers emitted placeholder elements for empty list slots; they carry
/// no data and are not converted.
fn drop_empty_leaves<'a>(
    container: &'a Element,
    leaf: &'a str,
) -> impl Iterator<Item = (&'a Element, String)> + 'a {
    container
        .children
        .iter()
        .filter(move |child| child.name == leaf)
        .map(|child| (child, normalize_text(&child.text)))
        .filter(|(_, text)| !text.is_empty())
}

fn texts(container: &Element, leaf: &str) -> Vec<String> {
    drop_empty_leaves(container, leaf)
        .map(|(_, text)| text)
        .collect()
}

/// Decode a tree-markup document
///
/// `fallback_id` names the polip when the root has no `id` attribute
/// (old stores keyed by file name).
pub fn decode(text: &str, fallback_id: Option<&str>) -> Result<Polip> {
    if text.trim().is_empty() {
        return Err(FormatError::EmptyDocument.into());
    }
    let root = parse_tree(text)?;
    if root.name != "polip" && root.name != "blob" {
        return Err(FormatError::Tree(format!("unexpected root element <{}>", root.name)).into());
    }

    let version = match root.attr("v").or_else(|| root.attr("version")) {
        Some(value) => Version::parse(value)?,
        None => Version::LEGACY,
    };
    check_readable(version)?;

    let id = match root.attr("id").or(fallback_id) {
        Some(value) if !value.is_empty() => PolipId::parse(value)?,
        _ => return Err(FormatError::InvalidIdentity("root element has no id".into()).into()),
    };
    let kind: PolipKind = root
        .attr("type")
        .or_else(|| root.attr("kind"))
        .ok_or_else(|| FormatError::invalid_field("kind", ""))?
        .parse()?;

    let mut polip = Polip::new(id, kind);
    polip.version = version;
    if let Some(scope) = root.attr("scope") {
        polip.scope = scope.parse::<Scope>()?;
    }
    if let Some(status) = root.attr("status") {
        polip.status = Some(status.parse::<Status>()?);
    }
    polip.updated = match root.attr("updated") {
        Some(value) => super::parse_date(value)?,
        None => Local::now().date_naive(),
    };

    let mut summary = Vec::new();
    for child in &root.children {
        match child.name.as_str() {
            "summary" | "context" => summary.push(normalize_text(&child.text)),
            "facts" => polip.facts.extend(texts(child, "fact")),
            "questions" => polip.questions.extend(texts(child, "question")),
            "links" => polip.links.extend(texts(child, "link")),
            "files" => polip.files.extend(texts(child, "file")),
            "decisions" => {
                polip
                    .decisions
                    .extend(drop_empty_leaves(child, "decision").map(|(leaf, text)| {
                        let why = leaf.attr("why").map(normalize_text).unwrap_or_default();
                        Decision::new(text).with_rationale(why)
                    }));
            }
            "next" | "steps" => {
                polip
                    .steps
                    .extend(drop_empty_leaves(child, "step").map(|(leaf, text)| Step {
                        done: matches!(leaf.attr("done"), Some("true" | "1" | "yes")),
                        text,
                    }));
            }
            other => {
                let body = child.flat_text();
                polip.unknown_sections.append(other, &body);
            }
        }
    }
    summary.retain(|s| !s.is_empty());
    polip.summary = summary.join("\n");

    super::legalize_legacy(&mut polip);
    polip.validate()?;
    Ok(polip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReefError;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<polip id="auth" type="thread" scope="project" status="active" updated="2025-03-01" v="1">
  <summary>
    Move session handling
    into middleware
  </summary>
  <facts>
    <fact>tokens live in a cookie</fact>
    <fact></fact>
    <fact>   </fact>
    <fact/>
  </facts>
  <decisions>
    <decision why="mobile speaks it">keep JWT</decision>
    <decision why="ignored"></decision>
  </decisions>
  <questions><question>who owns refresh</question><question/></questions>
  <next>
    <step done="true">extract parser</step>
    <step>delete old handler</step>
    <step done="true"/>
  </next>
  <links><link>session-store</link><link></link></links>
  <files><file>src/auth.rs</file></files>
  <metrics><hits>3</hits></metrics>
</polip>"#;

    #[test]
    fn test_decode_tree() {
        let polip = decode(SAMPLE, None).unwrap();

        assert_eq!(polip.id.as_str(), "auth");
        assert_eq!(polip.kind, PolipKind::Thread);
        assert_eq!(polip.status, Some(Status::Active));
        assert_eq!(polip.version, Version::LEGACY);
        assert_eq!(polip.summary, "Move session handling\ninto middleware");
        assert_eq!(
            polip.decisions,
            vec![Decision::new("keep JWT").with_rationale("mobile speaks it")]
        );
        assert_eq!(polip.files, vec!["src/auth.rs"]);
        assert_eq!(polip.unknown_sections.get("metrics"), Some("3"));
    }

    #[test]
    fn test_drop_empty_leaves_applies_to_every_list() {
        let polip = decode(SAMPLE, None).unwrap();

        assert_eq!(polip.facts, vec!["tokens live in a cookie"]);
        assert_eq!(polip.decisions.len(), 1);
        assert_eq!(polip.questions, vec!["who owns refresh"]);
        assert_eq!(
            polip.steps,
            vec![Step::done("extract parser"), Step::open("delete old handler")]
        );
        assert_eq!(polip.links, vec!["session-store"]);
    }

    #[test]
    fn test_legacy_content_is_made_writable() {
        let text = r#"<polip id="odd" type="decision">
  <decisions><decision why="w">a :: b</decision></decisions>
  <FACTS><fact>shouted</fact></FACTS>
  <notes><![CDATA[## looks like a section
plain]]></notes>
</polip>"#;
        let polip = decode(text, None).unwrap();

        assert_eq!(
            polip.decisions,
            vec![Decision::new("a").with_rationale("b :: w")]
        );
        assert_eq!(polip.unknown_sections.get("FACTS"), None);
        assert_eq!(polip.unknown_sections.get("legacy-FACTS"), Some("shouted"));
        assert_eq!(
            polip.unknown_sections.get("notes"),
            Some("  ## looks like a section\nplain")
        );

        polip.validate().unwrap();
        let again = crate::format::decode(&crate::format::encode(&polip)).unwrap();
        assert_eq!(again.decisions, polip.decisions);
        assert_eq!(again.unknown_sections, polip.unknown_sections);
    }

    #[test]
    fn test_fallback_id() {
        let polip = decode(r#"<polip type="fact"><summary>s</summary></polip>"#, Some("from-file"))
            .unwrap();
        assert_eq!(polip.id.as_str(), "from-file");
    }

    #[test]
    fn test_missing_id() {
        let err = decode(r#"<polip type="fact"/>"#, None).unwrap_err();
        assert!(matches!(
            err,
            ReefError::Format(FormatError::InvalidIdentity(_))
        ));
    }

    #[test]
    fn test_newer_epoch() {
        let err = decode(r#"<polip id="x" type="fact" v="9"/>"#, None).unwrap_err();
        assert!(matches!(err, ReefError::Version { .. }));
    }

    #[test]
    fn test_unbalanced_markup() {
        let err = decode(r#"<polip id="x" type="fact"><facts>"#, None).unwrap_err();
        assert!(matches!(err, ReefError::Format(FormatError::Tree(_))));
    }

    #[test]
    fn test_wrong_root() {
        let err = decode(r#"<note id="x" type="fact"/>"#, None).unwrap_err();
        assert!(matches!(err, ReefError::Format(FormatError::Tree(_))));
    }
}
