//! Current polip grammar
//!
//! ```text
//! id: auth-refactor
//! kind: thread
//! scope: project
//! status: active
//! version: 2.1
//! updated: 2026-01-15
//!
//! ## summary
//! Move session handling into middleware
//!
//! ## facts
//! - tokens live in an http-only cookie
//!   and expire after two hours
//!
//! ## decisions
//! - keep JWT :: the mobile client already speaks it
//!
//! ## next
//! - [x] extract the cookie parser
//! - [ ] delete the old handler
//! ```
//!
//! A line without a marker continues the previous entry; continuation lines
//! are written with a two-space indent which is stripped again on read.
//! Sections this build does not know are kept verbatim in
//! [`Polip::unknown_sections`] and written back after the known ones.

use chrono::Local;

use super::{check_readable, parse_date, split_lines, Line};
use crate::error::{FormatError, Result};
use crate::polip::{
    Decision, Polip, PolipId, PolipKind, RawMap, Scope, Status, Step, Version, DECISION_SEPARATOR,
    DEFAULT_HEAT,
};

const INDENT: &str = "  ";

const HEADER_KEYS: [&str; 11] = [
    "id", "kind", "scope", "status", "version", "updated", "heat", "touched", "decay", "priority",
    "tokens",
];

const SECTION_SUMMARY: &str = "summary";
const SECTION_FACTS: &str = "facts";
const SECTION_DECISIONS: &str = "decisions";
const SECTION_QUESTIONS: &str = "questions";
const SECTION_NEXT: &str = "next";
const SECTION_LINKS: &str = "links";
const SECTION_FILES: &str = "files";

/// Whether `key` is a header this build interprets
pub fn is_known_header(key: &str) -> bool {
    HEADER_KEYS.contains(&key.to_ascii_lowercase().as_str())
}

/// Whether `name` is a section this build interprets
pub fn is_known_section(name: &str) -> bool {
    SectionKind::from_name(name).is_some()
}

/// Known sections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionKind {
    Summary,
    Facts,
    Decisions,
    Questions,
    Next,
    Links,
    Files,
}

impl SectionKind {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            SECTION_SUMMARY => Some(Self::Summary),
            SECTION_FACTS => Some(Self::Facts),
            SECTION_DECISIONS => Some(Self::Decisions),
            SECTION_QUESTIONS => Some(Self::Questions),
            SECTION_NEXT => Some(Self::Next),
            SECTION_LINKS => Some(Self::Links),
            SECTION_FILES => Some(Self::Files),
            _ => None,
        }
    }
}

/// Section being filled while reading the body
enum OpenSection {
    /// Free text, one entry
    Text(Vec<String>),
    /// `-` items, continuation lines appended to the last one
    List(SectionKind, Vec<String>),
    /// Raw lines, kept exactly
    Unknown(String, Vec<String>),
}

#[derive(Default)]
struct Body {
    summary: Vec<String>,
    facts: Vec<String>,
    decisions: Vec<String>,
    questions: Vec<String>,
    steps: Vec<String>,
    links: Vec<String>,
    files: Vec<String>,
    unknown: RawMap,
}

impl Body {
    fn close(&mut self, section: OpenSection) {
        match section {
            OpenSection::Text(lines) => {
                if !lines.is_empty() {
                    self.summary.push(lines.join("\n"));
                }
            }
            OpenSection::List(kind, entries) => {
                let target = match kind {
                    SectionKind::Summary => &mut self.summary,
                    SectionKind::Facts => &mut self.facts,
                    SectionKind::Decisions => &mut self.decisions,
                    SectionKind::Questions => &mut self.questions,
                    SectionKind::Next => &mut self.steps,
                    SectionKind::Links => &mut self.links,
                    SectionKind::Files => &mut self.files,
                };
                target.extend(entries);
            }
            OpenSection::Unknown(name, lines) => self.unknown.append(&name, &lines.join("\n")),
        }
    }
}

fn open_section(name: &str) -> OpenSection {
    match SectionKind::from_name(name) {
        Some(SectionKind::Summary) => OpenSection::Text(Vec::new()),
        Some(kind) => OpenSection::List(kind, Vec::new()),
        None => OpenSection::Unknown(name.to_string(), Vec::new()),
    }
}

fn strip_indent(line: &str) -> &str {
    line.strip_prefix(INDENT).unwrap_or(line)
}

/// Feed one classified body line into the open section
fn accept(section: &mut OpenSection, line: Line<'_>, raw: &str) {
    match (section, line) {
        (_, Line::Blank) | (_, Line::Section(_)) => {}
        (OpenSection::Text(lines), Line::Item(_) | Line::Text(_)) => {
            lines.push(strip_indent(raw).to_string());
        }
        (OpenSection::List(_, entries), Line::Item(text)) => entries.push(text.to_string()),
        (OpenSection::List(_, entries), Line::Text(text)) => {
            let text = strip_indent(text);
            match entries.last_mut() {
                Some(last) if last.is_empty() => last.push_str(text),
                Some(last) => {
                    last.push('\n');
                    last.push_str(text);
                }
                None => entries.push(text.to_string()),
            }
        }
        (OpenSection::Unknown(_, lines), Line::Item(_) | Line::Text(_)) => {
            lines.push(raw.to_string());
        }
    }
}

/// Decode the current grammar
pub fn decode(text: &str) -> Result<Polip> {
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut body = Body::default();
    let mut section: Option<OpenSection> = None;
    let mut saw_content = false;

    for (index, raw) in split_lines(text).enumerate() {
        let line = Line::classify(raw);
        if line != Line::Blank {
            saw_content = true;
        }

        if let Line::Section(name) = line {
            if let Some(done) = section.replace(open_section(name)) {
                body.close(done);
            }
            continue;
        }

        match section.as_mut() {
            Some(open) => accept(open, line, raw),
            None if line == Line::Blank => {}
            None => {
                let (key, value) = raw.split_once(':').ok_or_else(|| FormatError::MalformedHeader {
                    line: index + 1,
                    content: raw.to_string(),
                })?;
                let key = key.trim();
                if key.is_empty() || key.contains(char::is_whitespace) {
                    return Err(FormatError::MalformedHeader {
                        line: index + 1,
                        content: raw.to_string(),
                    }
                    .into());
                }
                headers.push((key.to_string(), value.trim().to_string()));
            }
        }
    }
    if let Some(done) = section.take() {
        body.close(done);
    }

    if !saw_content {
        return Err(FormatError::EmptyDocument.into());
    }

    let polip = assemble(headers, body)?;
    log::trace!("decoded polip {} ({})", polip.id, polip.version);
    Ok(polip)
}

fn header<'a>(headers: &'a [(String, String)], key: &str) -> Option<&'a str> {
    headers
        .iter()
        .rev()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

fn parse_number<T: std::str::FromStr>(
    headers: &[(String, String)],
    key: &'static str,
    default: T,
) -> std::result::Result<T, FormatError> {
    match header(headers, key) {
        Some(value) => value
            .parse()
            .map_err(|_| FormatError::invalid_field(key, value)),
        None => Ok(default),
    }
}

fn assemble(headers: Vec<(String, String)>, body: Body) -> Result<Polip> {
    // Version first: a newer epoch may use fields this build cannot parse.
    let version = match header(&headers, "version") {
        Some(value) => Version::parse(value)?,
        None => Version::LEGACY,
    };
    check_readable(version)?;

    let id = match header(&headers, "id") {
        Some(value) if !value.is_empty() => PolipId::parse(value)?,
        _ => return Err(FormatError::InvalidIdentity("missing id header".into()).into()),
    };
    let kind: PolipKind = header(&headers, "kind")
        .ok_or_else(|| FormatError::invalid_field("kind", ""))?
        .parse()?;

    let mut polip = Polip::new(id, kind);
    polip.version = version;
    if let Some(scope) = header(&headers, "scope") {
        polip.scope = scope.parse::<Scope>()?;
    }
    if let Some(status) = header(&headers, "status") {
        polip.status = Some(status.parse::<Status>()?);
    }
    polip.updated = match header(&headers, "updated") {
        Some(value) => parse_date(value)?,
        None => Local::now().date_naive(),
    };
    polip.heat = parse_number(&headers, "heat", DEFAULT_HEAT)?;
    polip.touched = parse_number(&headers, "touched", 0)?;
    polip.decay_rate = parse_number(&headers, "decay", 0.0)?;
    polip.priority = parse_number(&headers, "priority", 0)?;
    polip.tokens = parse_number(&headers, "tokens", 0)?;

    for (key, value) in headers {
        if !is_known_header(&key) {
            polip.unknown_headers.insert(key, value);
        }
    }

    polip.summary = body.summary.join("\n");
    polip.facts = drop_blank(body.facts);
    polip.questions = drop_blank(body.questions);
    polip.links = drop_blank(body.links);
    polip.files = drop_blank(body.files);
    polip.decisions = drop_blank(body.decisions)
        .into_iter()
        .filter_map(|entry| parse_decision(&entry))
        .collect();
    polip.steps = drop_blank(body.steps)
        .into_iter()
        .filter_map(|entry| parse_step(&entry))
        .collect();
    polip.unknown_sections = body.unknown;

    Ok(polip)
}

/// Empty entries are dropped on read
fn drop_blank(entries: Vec<String>) -> Vec<String> {
    entries
        .into_iter()
        .filter(|entry| !entry.trim().is_empty())
        .collect()
}

pub(crate) fn parse_decision(entry: &str) -> Option<Decision> {
    let decision = match entry.split_once(DECISION_SEPARATOR) {
        Some((choice, rationale)) => Decision::new(choice).with_rationale(rationale),
        None => Decision::new(entry),
    };
    (!decision.choice.trim().is_empty()).then_some(decision)
}

pub(crate) fn parse_step(entry: &str) -> Option<Step> {
    let step = if let Some(text) = strip_checkbox(entry, &["[x]", "[X]"]) {
        Step::done(text)
    } else if let Some(text) = strip_checkbox(entry, &["[ ]"]) {
        Step::open(text)
    } else {
        Step::open(entry)
    };
    (!step.text.trim().is_empty()).then_some(step)
}

fn strip_checkbox<'a>(entry: &'a str, boxes: &[&str]) -> Option<&'a str> {
    boxes.iter().find_map(|b| {
        let rest = entry.strip_prefix(b)?;
        if rest.is_empty() {
            Some(rest)
        } else {
            rest.strip_prefix(' ')
        }
    })
}

/// Encode a polip in the current grammar
pub fn encode(polip: &Polip) -> String {
    let mut out = String::with_capacity(256);

    push_header(&mut out, "id", polip.id.as_str());
    push_header(&mut out, "kind", polip.kind.as_str());
    push_header(&mut out, "scope", polip.scope.as_str());
    if let Some(status) = polip.status {
        push_header(&mut out, "status", status.as_str());
    }
    push_header(&mut out, "version", &polip.version.to_string());
    push_header(&mut out, "updated", &polip.updated.format("%Y-%m-%d").to_string());
    if polip.heat != DEFAULT_HEAT {
        push_header(&mut out, "heat", &polip.heat.to_string());
    }
    if polip.touched != 0 {
        push_header(&mut out, "touched", &polip.touched.to_string());
    }
    if polip.decay_rate != 0.0 {
        push_header(&mut out, "decay", &polip.decay_rate.to_string());
    }
    if polip.priority != 0 {
        push_header(&mut out, "priority", &polip.priority.to_string());
    }
    if polip.tokens != 0 {
        push_header(&mut out, "tokens", &polip.tokens.to_string());
    }
    for (key, value) in polip.unknown_headers.iter() {
        push_header(&mut out, key, value);
    }

    if !polip.summary.is_empty() {
        open(&mut out, SECTION_SUMMARY);
        for line in polip.summary.split('\n') {
            if line.starts_with(INDENT) || line.starts_with("##") {
                out.push_str(INDENT);
            }
            out.push_str(line);
            out.push('\n');
        }
    }

    push_list(&mut out, SECTION_FACTS, polip.facts.iter().map(String::from));
    push_list(
        &mut out,
        SECTION_DECISIONS,
        polip.decisions.iter().map(|d| match &d.rationale {
            Some(rationale) => format!("{}{}{}", d.choice, DECISION_SEPARATOR, rationale),
            None => d.choice.clone(),
        }),
    );
    push_list(&mut out, SECTION_QUESTIONS, polip.questions.iter().map(String::from));
    push_list(
        &mut out,
        SECTION_NEXT,
        polip
            .steps
            .iter()
            .map(|s| format!("[{}] {}", if s.done { 'x' } else { ' ' }, s.text)),
    );
    push_list(&mut out, SECTION_LINKS, polip.links.iter().map(String::from));
    push_list(&mut out, SECTION_FILES, polip.files.iter().map(String::from));

    for (name, body) in polip.unknown_sections.iter() {
        open(&mut out, name);
        if !body.is_empty() {
            out.push_str(body);
            out.push('\n');
        }
    }

    out
}

fn push_header(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push_str(": ");
    out.push_str(value);
    out.push('\n');
}

fn open(out: &mut String, name: &str) {
    out.push_str("\n## ");
    out.push_str(name);
    out.push('\n');
}

fn push_list(out: &mut String, name: &str, entries: impl Iterator<Item = String>) {
    let mut entries = entries.peekable();
    if entries.peek().is_none() {
        return;
    }
    open(out, name);
    for entry in entries {
        let mut lines = entry.split('\n');
        out.push_str("- ");
        out.push_str(lines.next().unwrap_or_default());
        out.push('\n');
        for line in lines {
            out.push_str(INDENT);
            out.push_str(line);
            out.push('\n');
        }
    }
}
