//! v1 sigil grammar (read-only)
//!
//! ```text
//! =thread:project:active auth-refactor 2025-11-02
//! Move session handling into middleware
//! +tokens live in a cookie
//! !keep JWT :: the mobile client speaks it
//! ?who owns refresh
//! [x] extract parser
//! [ ] delete old handler
//! @session-store
//! ~context appended to the summary
//! ```
//!
//! Documents decode at [`Version::LEGACY`], so the migrator rewrites them in
//! the current grammar.

use std::sync::OnceLock;

use chrono::Local;
use regex::Regex;

use super::codec::parse_decision;
use super::{parse_date, split_lines};
use crate::error::{FormatError, Result};
use crate::polip::{Polip, PolipId, PolipKind, Scope, Status, Step, Version};

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^=([A-Za-z]+):([A-Za-z]+)(?::([A-Za-z]+))?(?:\s+(\S+))?(?:\s+(\S+))?\s*$")
            .expect("sigil header pattern is valid")
    })
}

/// Body line, classified by its sigil
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SigilLine<'a> {
    Blank,
    Fact(&'a str),
    Decision(&'a str),
    Question(&'a str),
    Step { done: bool, text: &'a str },
    Link(&'a str),
    Context(&'a str),
    Text(&'a str),
}

impl<'a> SigilLine<'a> {
    fn classify(raw: &'a str) -> Self {
        let line = raw.trim();
        if line.is_empty() {
            return Self::Blank;
        }
        if let Some(text) = line.strip_prefix("[x]").or_else(|| line.strip_prefix("[X]")) {
            return Self::Step {
                done: true,
                text: text.trim(),
            };
        }
        if let Some(text) = line.strip_prefix("[ ]") {
            return Self::Step {
                done: false,
                text: text.trim(),
            };
        }
        let mut chars = line.chars();
        let sigil = chars.next();
        let rest = chars.as_str().trim();
        match sigil {
            Some('+') => Self::Fact(rest),
            Some('!') => Self::Decision(rest),
            Some('?') => Self::Question(rest),
            Some('@') => Self::Link(rest),
            Some('~') => Self::Context(rest),
            _ => Self::Text(line),
        }
    }
}

/// Where a continuation line lands
#[derive(Clone, Copy)]
enum Target {
    Summary,
    Fact,
    Decision,
    Question,
    Step,
    Link,
}

#[derive(Default)]
struct Entries {
    summary: Vec<String>,
    facts: Vec<String>,
    decisions: Vec<String>,
    questions: Vec<String>,
    steps: Vec<(bool, String)>,
    links: Vec<String>,
}

impl Entries {
    fn continue_with(&mut self, target: Target, text: &str) {
        let last = match target {
            Target::Summary => {
                self.summary.push(text.to_string());
                return;
            }
            Target::Fact => self.facts.last_mut(),
            Target::Decision => self.decisions.last_mut(),
            Target::Question => self.questions.last_mut(),
            Target::Step => self.steps.last_mut().map(|(_, t)| t),
            Target::Link => self.links.last_mut(),
        };
        if let Some(last) = last {
            if !last.is_empty() {
                last.push('\n');
            }
            last.push_str(text);
        }
    }
}

/// Decode a v1 sigil document
pub fn decode(text: &str) -> Result<Polip> {
    let mut lines = split_lines(text).enumerate().filter(|(_, l)| !l.trim().is_empty());
    let (index, first) = lines.next().ok_or(FormatError::EmptyDocument)?;

    let caps = header_pattern()
        .captures(first.trim())
        .ok_or_else(|| FormatError::MalformedHeader {
            line: index + 1,
            content: first.to_string(),
        })?;

    let kind: PolipKind = caps[1].parse()?;
    let scope: Scope = caps[2].parse()?;
    let status = caps
        .get(3)
        .map(|m| m.as_str().parse::<Status>())
        .transpose()?;
    let id = match caps.get(4) {
        Some(m) => PolipId::parse(m.as_str())?,
        None => return Err(FormatError::InvalidIdentity("sigil header has no id".into()).into()),
    };
    let updated = match caps.get(5) {
        Some(m) => parse_date(m.as_str())?,
        None => Local::now().date_naive(),
    };

    let mut entries = Entries::default();
    let mut target = Target::Summary;
    for (_, raw) in lines {
        match SigilLine::classify(raw) {
            SigilLine::Blank => {}
            SigilLine::Fact(text) => {
                entries.facts.push(text.to_string());
                target = Target::Fact;
            }
            SigilLine::Decision(text) => {
                entries.decisions.push(text.to_string());
                target = Target::Decision;
            }
            SigilLine::Question(text) => {
                entries.questions.push(text.to_string());
                target = Target::Question;
            }
            SigilLine::Step { done, text } => {
                entries.steps.push((done, text.to_string()));
                target = Target::Step;
            }
            SigilLine::Link(text) => {
                entries.links.push(text.to_string());
                target = Target::Link;
            }
            SigilLine::Context(text) => {
                entries.summary.push(text.to_string());
                target = Target::Summary;
            }
            SigilLine::Text(text) => entries.continue_with(target, text),
        }
    }

    let mut polip = Polip::new(id, kind);
    polip.scope = scope;
    polip.status = status;
    polip.version = Version::LEGACY;
    polip.updated = updated;
    polip.summary = non_empty(entries.summary).join("\n");
    polip.facts = non_empty(entries.facts);
    polip.decisions = non_empty(entries.decisions)
        .iter()
        .filter_map(|entry| parse_decision(entry))
        .collect();
    polip.questions = non_empty(entries.questions);
    polip.steps = entries
        .steps
        .into_iter()
        .filter(|(_, text)| !text.is_empty())
        .map(|(done, text)| Step { done, text })
        .collect();
    polip.links = non_empty(entries.links);

    super::legalize_legacy(&mut polip);
    polip.validate()?;
    Ok(polip)
}

fn non_empty(entries: Vec<String>) -> Vec<String> {
    entries.into_iter().filter(|e| !e.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReefError;
    use crate::polip::Decision;

    #[test]
    fn test_decode_full_document() {
        let text = "=thread:project:active auth-refactor 2025-11-02\n\
                    Move session handling\n\
                    into middleware\n\
                    +tokens live in a cookie\n\
                    !keep JWT :: mobile speaks it\n\
                    ?who owns refresh\n\
                    [x] extract parser\n\
                    [ ] delete old handler\n\
                    @session-store\n\
                    ~extra context\n";
        let polip = decode(text).unwrap();

        assert_eq!(polip.kind, PolipKind::Thread);
        assert_eq!(polip.status, Some(Status::Active));
        assert_eq!(polip.version, Version::LEGACY);
        assert_eq!(polip.summary, "Move session handling\ninto middleware\nextra context");
        assert_eq!(polip.facts, vec!["tokens live in a cookie"]);
        assert_eq!(
            polip.decisions,
            vec![Decision::new("keep JWT").with_rationale("mobile speaks it")]
        );
        assert_eq!(polip.questions, vec!["who owns refresh"]);
        assert_eq!(
            polip.steps,
            vec![Step::done("extract parser"), Step::open("delete old handler")]
        );
        assert_eq!(polip.links, vec!["session-store"]);
        assert!(polip.needs_migration());
    }

    #[test]
    fn test_crlf_constraint_scenario() {
        let text = "=constraint:always test 2026-01-15\r\nSummary\r\n+fact one\r\n+fact two\r\n";
        let polip = decode(text).unwrap();

        assert_eq!(polip.kind, PolipKind::Constraint);
        assert_eq!(polip.scope, Scope::Always);
        assert_eq!(polip.facts, vec!["fact one", "fact two"]);
        assert_eq!(polip.updated.to_string(), "2026-01-15");
    }

    #[test]
    fn test_continuation_follows_last_sigil() {
        let polip = decode("=fact:project f\nsum\n+first\nmore of first\n+second\n").unwrap();
        assert_eq!(polip.facts, vec!["first\nmore of first", "second"]);
    }

    #[test]
    fn test_empty_sigils_dropped() {
        let polip = decode("=fact:project f\n+\n+ kept\n?\n[x]\n").unwrap();
        assert_eq!(polip.facts, vec!["kept"]);
        assert!(polip.questions.is_empty());
        assert!(polip.steps.is_empty());
    }

    #[test]
    fn test_missing_id() {
        let err = decode("=fact:project\nsummary\n").unwrap_err();
        assert!(matches!(
            err,
            ReefError::Format(FormatError::InvalidIdentity(_))
        ));
    }

    #[test]
    fn test_unsafe_id() {
        let err = decode("=fact:project ../escape\n").unwrap_err();
        assert!(matches!(err, ReefError::PathTraversal(_)));
    }

    #[test]
    fn test_malformed_header() {
        let err = decode("=not a header at all\n").unwrap_err();
        assert!(matches!(
            err,
            ReefError::Format(FormatError::MalformedHeader { .. })
        ));
    }
}
