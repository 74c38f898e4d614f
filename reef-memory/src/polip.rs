//! Polip types and builders
//!
//! A polip is one persisted note: identity, classification, a summary and a
//! handful of ordered lists. Everything here is plain data; the codec in
//! [`crate::format`] turns it into text and back.

use std::fmt;
use std::str::FromStr;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{FormatError, ReefError, Result};
use crate::format::codec;

/// Longest identifier accepted, in bytes
pub const MAX_ID_LEN: usize = 128;

/// Separator between a decision's choice and its rationale
pub const DECISION_SEPARATOR: &str = " :: ";

/// Filesystem-safe identifier, unique within its kind
///
/// Construction always validates; there is no unchecked constructor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PolipId(String);

impl PolipId {
    /// Validate and wrap an identifier
    ///
    /// Rejects rather than sanitises: absolute paths, `..` sequences, and
    /// anything outside `[A-Za-z0-9._-]` each fail with their own error kind.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(ReefError::invalid_identifier(raw, "empty"));
        }

        let bytes = raw.as_bytes();
        let drive_prefix = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
        if raw.starts_with('/') || raw.starts_with('\\') || drive_prefix {
            return Err(ReefError::AbsolutePath(raw.to_string()));
        }

        if raw.contains("..") {
            return Err(ReefError::PathTraversal(raw.to_string()));
        }

        if raw.len() > MAX_ID_LEN {
            return Err(ReefError::invalid_identifier(raw, "longer than 128 bytes"));
        }

        if let Some(bad) = raw.chars().find(|c| !is_id_char(*c)) {
            let reason = if bad.is_control() {
                "contains a control character"
            } else if bad == '/' || bad == '\\' {
                "contains a path separator"
            } else {
                "contains a character outside [A-Za-z0-9._-]"
            };
            return Err(ReefError::invalid_identifier(raw, reason));
        }

        if raw.starts_with('.') {
            return Err(ReefError::invalid_identifier(raw, "starts with a dot"));
        }

        Ok(Self(raw.to_string()))
    }

    /// Derive an identifier from free text ("Fix Auth Flow!" -> "fix-auth-flow")
    pub fn from_title(title: &str) -> Result<Self> {
        let slug = title
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect::<String>()
            .split('-')
            .filter(|s| !s.is_empty())
            .collect::<Vec<&str>>()
            .join("-");
        let slug: String = slug.chars().take(64).collect();
        Self::parse(slug.trim_end_matches('-'))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

impl fmt::Display for PolipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PolipId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for PolipId {
    type Err = ReefError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PolipId {
    type Error = ReefError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<PolipId> for String {
    fn from(id: PolipId) -> Self {
        id.0
    }
}

/// Category of a polip; each kind owns one storage directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolipKind {
    Thread,
    Decision,
    Constraint,
    Context,
    Fact,
}

impl PolipKind {
    /// Every registered kind, in directory order
    pub const ALL: [PolipKind; 5] = [
        PolipKind::Thread,
        PolipKind::Decision,
        PolipKind::Constraint,
        PolipKind::Context,
        PolipKind::Fact,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thread => "thread",
            Self::Decision => "decision",
            Self::Constraint => "constraint",
            Self::Context => "context",
            Self::Fact => "fact",
        }
    }

    /// Storage subdirectory for this kind
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Thread => "threads",
            Self::Decision => "decisions",
            Self::Constraint => "constraints",
            Self::Context => "contexts",
            Self::Fact => "facts",
        }
    }
}

impl fmt::Display for PolipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolipKind {
    type Err = FormatError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thread" => Ok(Self::Thread),
            "decision" => Ok(Self::Decision),
            "constraint" => Ok(Self::Constraint),
            "context" => Ok(Self::Context),
            "fact" => Ok(Self::Fact),
            _ => Err(FormatError::invalid_field("kind", s)),
        }
    }
}

/// Lifetime policy of a polip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Never archived
    Always,
    #[default]
    Project,
    /// Expires after the configured session TTL
    Session,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::Project => "project",
            Self::Session => "session",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = FormatError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "project" => Ok(Self::Project),
            "session" => Ok(Self::Session),
            _ => Err(FormatError::invalid_field("scope", s)),
        }
    }
}

/// Progress of a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Active,
    Blocked,
    Done,
    Archived,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Blocked => "blocked",
            Self::Done => "done",
            Self::Archived => "archived",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = FormatError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "blocked" => Ok(Self::Blocked),
            "done" => Ok(Self::Done),
            "archived" => Ok(Self::Archived),
            _ => Err(FormatError::invalid_field("status", s)),
        }
    }
}

/// Two-level format version
///
/// An epoch bump is a breaking change; a schema bump is additive. Ordering
/// compares epoch first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub epoch: u32,
    pub schema: u32,
}

impl Version {
    /// Version written by this build
    pub const CURRENT: Version = Version::new(2, 1);

    /// Version assigned to the v1 sigil format and headerless documents
    pub const LEGACY: Version = Version::new(1, 0);

    pub const fn new(epoch: u32, schema: u32) -> Self {
        Self { epoch, schema }
    }

    /// Parse `EPOCH.SCHEMA`, or a bare `EPOCH` meaning `EPOCH.0`
    pub fn parse(s: &str) -> std::result::Result<Self, FormatError> {
        let s = s.trim();
        let invalid = || FormatError::invalid_field("version", s);
        match s.split_once('.') {
            Some((epoch, schema)) => Ok(Self::new(
                epoch.parse().map_err(|_| invalid())?,
                schema.parse().map_err(|_| invalid())?,
            )),
            None => Ok(Self::new(s.parse().map_err(|_| invalid())?, 0)),
        }
    }

    /// Whether a reader at `CURRENT` can decode this version
    pub fn is_readable(&self) -> bool {
        self.epoch <= Self::CURRENT.epoch
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.epoch, self.schema)
    }
}

/// A recorded choice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub choice: String,
    pub rationale: Option<String>,
}

impl Decision {
    pub fn new(choice: impl Into<String>) -> Self {
        Self {
            choice: choice.into(),
            rationale: None,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        let rationale = rationale.into();
        self.rationale = (!rationale.is_empty()).then_some(rationale);
        self
    }
}

/// One entry of a thread's next-steps checklist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub done: bool,
    pub text: String,
}

impl Step {
    pub fn open(text: impl Into<String>) -> Self {
        Self {
            done: false,
            text: text.into(),
        }
    }

    pub fn done(text: impl Into<String>) -> Self {
        Self {
            done: true,
            text: text.into(),
        }
    }
}

/// Insertion-ordered name -> raw text map
///
/// Holds sections (and header keys) this build does not understand so they
/// can be written back exactly as they were read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMap(Vec<(String, String)>);

impl RawMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace, keeping the original position on replace
    pub fn insert(&mut self, name: impl Into<String>, body: impl Into<String>) {
        let name = name.into();
        let body = body.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = body,
            None => self.0.push((name, body)),
        }
    }

    /// Append to an existing entry (newline-joined) or insert a new one
    pub fn append(&mut self, name: &str, body: &str) {
        match self.0.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) if existing.is_empty() => existing.push_str(body),
            Some((_, existing)) if !body.is_empty() => {
                existing.push('\n');
                existing.push_str(body);
            }
            Some(_) => {}
            None => self.0.push((name.to_string(), body.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, body)| body.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, b)| (n.as_str(), b.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One persisted note
#[derive(Debug, Clone, PartialEq)]
pub struct Polip {
    pub id: PolipId,
    pub kind: PolipKind,
    pub scope: Scope,
    /// Only meaningful for threads
    pub status: Option<Status>,
    pub version: Version,
    pub updated: NaiveDate,
    pub summary: String,
    pub facts: Vec<String>,
    pub decisions: Vec<Decision>,
    pub questions: Vec<String>,
    pub steps: Vec<Step>,
    pub links: Vec<String>,
    pub files: Vec<String>,
    pub heat: f64,
    pub touched: u32,
    pub decay_rate: f64,
    pub priority: u8,
    pub tokens: u32,
    pub unknown_headers: RawMap,
    pub unknown_sections: RawMap,
}

/// Default scalar values; the codec omits fields that still hold them
pub(crate) const DEFAULT_HEAT: f64 = 1.0;

impl Polip {
    /// A bare polip at the current version, updated today
    pub fn new(id: PolipId, kind: PolipKind) -> Self {
        Self {
            id,
            kind,
            scope: Scope::default(),
            status: None,
            version: Version::CURRENT,
            updated: Local::now().date_naive(),
            summary: String::new(),
            facts: Vec::new(),
            decisions: Vec::new(),
            questions: Vec::new(),
            steps: Vec::new(),
            links: Vec::new(),
            files: Vec::new(),
            heat: DEFAULT_HEAT,
            touched: 0,
            decay_rate: 0.0,
            priority: 0,
            tokens: 0,
            unknown_headers: RawMap::new(),
            unknown_sections: RawMap::new(),
        }
    }

    /// Create a new builder for Polip
    pub fn builder() -> PolipBuilder {
        PolipBuilder::new()
    }

    /// Exempt from decompose and quarantine
    pub fn is_protected(&self) -> bool {
        self.scope == Scope::Always || self.kind == PolipKind::Constraint
    }

    pub fn needs_migration(&self) -> bool {
        self.version < Version::CURRENT
    }

    /// Bring the polip up to the current version
    ///
    /// Only the version changes. Unknown sections and headers ride along
    /// untouched. Returns whether anything changed.
    pub fn migrate(&mut self) -> bool {
        if !self.needs_migration() {
            return false;
        }
        self.version = Version::CURRENT;
        true
    }

    /// All free-text content that search should see
    pub fn text_fields(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.as_str())
            .chain(std::iter::once(self.summary.as_str()))
            .chain(self.facts.iter().map(String::as_str))
            .chain(self.decisions.iter().flat_map(|d| {
                std::iter::once(d.choice.as_str()).chain(d.rationale.as_deref())
            }))
            .chain(self.questions.iter().map(String::as_str))
            .chain(self.steps.iter().map(|s| s.text.as_str()))
            .chain(self.links.iter().map(String::as_str))
            .chain(self.files.iter().map(String::as_str))
    }

    /// Check the invariants the codec relies on for lossless round trips
    pub fn validate(&self) -> std::result::Result<(), FormatError> {
        check_text("summary", &self.summary)?;
        check_list("facts", &self.facts)?;
        check_list("questions", &self.questions)?;
        check_list("links", &self.links)?;
        check_list("files", &self.files)?;

        for decision in &self.decisions {
            check_entry("decisions", &decision.choice)?;
            if decision.choice.contains(DECISION_SEPARATOR) {
                return Err(FormatError::invalid_field("decisions", &decision.choice));
            }
            if let Some(rationale) = &decision.rationale {
                check_entry("decisions", rationale)?;
                // The separator written after the choice must be the first one read back
                let joined = format!("{}{}", decision.choice, DECISION_SEPARATOR);
                if joined.find(DECISION_SEPARATOR) != Some(decision.choice.len()) {
                    return Err(FormatError::invalid_field("decisions", &decision.choice));
                }
            }
        }
        for step in &self.steps {
            check_entry("next", &step.text)?;
        }

        for (field, value) in [("heat", self.heat), ("decay", self.decay_rate)] {
            if !value.is_finite() {
                return Err(FormatError::invalid_field(field, value.to_string()));
            }
        }

        for (key, value) in self.unknown_headers.iter() {
            let bad_key = key.is_empty()
                || key.starts_with(['#', '-'])
                || key.contains(':')
                || key.contains(char::is_whitespace)
                || codec::is_known_header(key);
            if bad_key || value.trim() != value || value.contains(['\n', '\r']) {
                return Err(FormatError::invalid_field("header", key));
            }
        }
        for (name, body) in self.unknown_sections.iter() {
            let bad_name = name.is_empty()
                || name.trim() != name
                || name.contains(['\n', '\r'])
                || codec::is_known_section(name);
            if bad_name {
                return Err(FormatError::invalid_field("section", name));
            }
            let marker_line = body.lines().any(|l| l.starts_with("##"));
            if marker_line || (!body.is_empty() && has_blank_line(body)) {
                return Err(FormatError::invalid_field("section", name));
            }
        }
        Ok(())
    }
}

fn has_blank_line(text: &str) -> bool {
    text.split('\n').any(|l| l.trim().is_empty()) || text.contains('\r')
}

fn check_text(field: &'static str, text: &str) -> std::result::Result<(), FormatError> {
    if !text.is_empty() && has_blank_line(text) {
        return Err(FormatError::invalid_field(field, text));
    }
    Ok(())
}

fn check_entry(field: &'static str, entry: &str) -> std::result::Result<(), FormatError> {
    if entry.is_empty() {
        return Err(FormatError::invalid_field(field, ""));
    }
    check_text(field, entry)
}

fn check_list(field: &'static str, list: &[String]) -> std::result::Result<(), FormatError> {
    list.iter().try_for_each(|entry| check_entry(field, entry))
}

/// Builder for Polip with fluent API
#[derive(Debug, Default)]
pub struct PolipBuilder {
    id: Option<String>,
    kind: Option<PolipKind>,
    scope: Scope,
    status: Option<Status>,
    version: Option<Version>,
    updated: Option<NaiveDate>,
    summary: String,
    facts: Vec<String>,
    decisions: Vec<Decision>,
    questions: Vec<String>,
    steps: Vec<Step>,
    links: Vec<String>,
    files: Vec<String>,
    priority: u8,
}

impl PolipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the identifier (validated in `build`)
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn kind(mut self, kind: PolipKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Override the version (defaults to current)
    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Set the last-modified date (defaults to today)
    pub fn updated(mut self, date: NaiveDate) -> Self {
        self.updated = Some(date);
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn fact(mut self, fact: impl Into<String>) -> Self {
        self.facts.push(fact.into());
        self
    }

    pub fn decision(mut self, decision: Decision) -> Self {
        self.decisions.push(decision);
        self
    }

    pub fn question(mut self, question: impl Into<String>) -> Self {
        self.questions.push(question.into());
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn link(mut self, link: impl Into<String>) -> Self {
        self.links.push(link.into());
        self
    }

    pub fn file(mut self, file: impl Into<String>) -> Self {
        self.files.push(file.into());
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Build the Polip, validating id and invariants
    pub fn build(self) -> Result<Polip> {
        let raw_id = self
            .id
            .ok_or_else(|| FormatError::InvalidIdentity("missing id".into()))?;
        let kind = self
            .kind
            .ok_or_else(|| FormatError::invalid_field("kind", ""))?;

        let mut polip = Polip::new(PolipId::parse(&raw_id)?, kind);
        polip.scope = self.scope;
        polip.status = self.status;
        if let Some(version) = self.version {
            polip.version = version;
        }
        if let Some(updated) = self.updated {
            polip.updated = updated;
        }
        polip.summary = self.summary;
        polip.facts = self.facts;
        polip.decisions = self.decisions;
        polip.questions = self.questions;
        polip.steps = self.steps;
        polip.links = self.links;
        polip.files = self.files;
        polip.priority = self.priority;

        polip.validate()?;
        Ok(polip)
    }
}
