//! Lexical search over the whole reef
//!
//! An inverted index maps each term to `(document, term frequency)`
//! postings. Scores are TF-IDF weighted by recency:
//!
//! ```text
//! score = recency * sum over query terms of (1 + ln tf) * ln(1 + N / df)
//! ```
//!
//! The index is an ordinary value owned by the caller. It is rebuilt from a
//! full store enumeration ([`ReefIndex::rebuild`]) and can be persisted next
//! to the store ([`ReefIndex::refresh`]); nothing is cached globally.
//!
//! A rebuilt index remembers the name, size and modification time of every
//! polip file it saw. [`ReefIndex::open`] only trusts a persisted index
//! whose record still matches the store.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::SearchConfig;
use crate::error::{ReefError, Result};
use crate::polip::{Polip, PolipId, PolipKind};
use crate::safe_io;
use crate::storage::ReefStore;
use crate::temporal;

/// Bumped whenever the persisted layout changes
const INDEX_FORMAT: u32 = 2;

/// A ranked search result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: PolipId,
    pub kind: PolipKind,
    pub score: f64,
    pub updated: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Document {
    id: PolipId,
    kind: PolipKind,
    updated: NaiveDate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Posting {
    doc: u32,
    tf: u32,
}

/// One polip file as last seen by a rebuild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct FileStamp {
    /// Relative to the store root
    path: String,
    len: u64,
    modified_secs: u64,
    modified_nanos: u32,
}

/// Inverted index over polip text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReefIndex {
    docs: Vec<Document>,
    /// Term -> one posting per document containing it
    postings: HashMap<String, Vec<Posting>>,
    min_token_len: usize,
    half_life_days: f64,
    /// Store files the index was built from; empty unless built from a store
    sources: Vec<FileStamp>,
}

impl ReefIndex {
    /// Empty index
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            docs: Vec::new(),
            postings: HashMap::new(),
            min_token_len: config.min_token_len,
            half_life_days: config.recency_half_life_days,
            sources: Vec::new(),
        }
    }

    /// Index a set of polips
    pub fn from_polips<'a>(polips: impl IntoIterator<Item = &'a Polip>, config: &SearchConfig) -> Self {
        let mut index = Self::new(config);
        for polip in polips {
            index.add(polip);
        }
        index
    }

    /// Index everything the store can enumerate
    pub fn build(store: &ReefStore) -> Result<Self> {
        let mut index = Self::new(&store.config().search);
        index.rebuild(store)?;
        Ok(index)
    }

    /// Load the persisted index, rebuilding and saving it if it is missing,
    /// unreadable, built with different tokenizer settings or out of date
    /// with the store's files
    pub fn open(store: &ReefStore) -> Result<Self> {
        let config = &store.config().search;
        match Self::load(store.index_path()) {
            Ok(mut index) if index.min_token_len == config.min_token_len => {
                if index.is_fresh(store)? {
                    index.half_life_days = config.recency_half_life_days;
                    return Ok(index);
                }
                log::info!("Store changed since the index was saved; rebuilding");
            }
            Ok(_) => log::info!("Index settings changed; rebuilding"),
            Err(ReefError::Storage(e)) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No persisted index; building")
            }
            Err(e) => log::warn!("Discarding persisted index: {}", e),
        }
        let mut index = Self::new(config);
        index.refresh(store)?;
        Ok(index)
    }

    /// Whether the store still holds exactly the files this index was
    /// built from, unchanged
    pub fn is_fresh(&self, store: &ReefStore) -> Result<bool> {
        Ok(stamp_files(store)? == self.sources)
    }

    /// Replace the contents with a fresh pass over the store
    ///
    /// Files are stamped before they are read, so a file changed during the
    /// pass leaves the index stale rather than wrongly fresh.
    pub fn rebuild(&mut self, store: &ReefStore) -> Result<()> {
        self.docs.clear();
        self.postings.clear();
        self.sources = stamp_files(store)?;
        for stored in store.enumerate()? {
            self.add(&stored.polip);
        }
        log::info!(
            "Indexed {} polips, {} terms",
            self.docs.len(),
            self.postings.len()
        );
        Ok(())
    }

    /// Rebuild and persist to the store's index file
    pub fn refresh(&mut self, store: &ReefStore) -> Result<()> {
        self.rebuild(store)?;
        self.save(store.index_path())
    }

    fn add(&mut self, polip: &Polip) {
        let doc = self.docs.len() as u32;
        self.docs.push(Document {
            id: polip.id.clone(),
            kind: polip.kind,
            updated: polip.updated,
        });

        let mut counts: HashMap<String, u32> = HashMap::new();
        for field in polip.text_fields() {
            for token in tokenize(field, self.min_token_len) {
                *counts.entry(token).or_insert(0) += 1;
            }
        }
        for (term, tf) in counts {
            self.postings.entry(term).or_default().push(Posting { doc, tf });
        }
    }

    /// Number of indexed polips
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Number of distinct terms
    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    /// How many polips contain `term` (after tokenization)
    pub fn document_frequency(&self, term: &str) -> usize {
        tokenize(term, self.min_token_len)
            .first()
            .and_then(|t| self.postings.get(t))
            .map_or(0, Vec::len)
    }

    /// Search, ranking recency against today's date
    pub fn query(&self, text: &str, limit: usize) -> Vec<SearchHit> {
        self.query_at(text, limit, temporal::today())
    }

    /// Search with an explicit reference date
    ///
    /// Only polips sharing at least one term with the query are scored.
    /// Results are ordered by score, then most recently updated, then id.
    pub fn query_at(&self, text: &str, limit: usize, today: NaiveDate) -> Vec<SearchHit> {
        if limit == 0 || self.docs.is_empty() {
            return Vec::new();
        }
        let mut terms = tokenize(text, self.min_token_len);
        terms.sort();
        terms.dedup();

        let n = self.docs.len() as f64;
        let mut scores: HashMap<u32, f64> = HashMap::new();
        for term in &terms {
            let Some(postings) = self.postings.get(term) else {
                continue;
            };
            let idf = (1.0 + n / postings.len() as f64).ln();
            for posting in postings {
                let weight = (1.0 + (posting.tf as f64).ln()) * idf;
                *scores.entry(posting.doc).or_insert(0.0) += weight;
            }
        }

        let mut hits: Vec<SearchHit> = scores
            .into_iter()
            .map(|(doc, score)| {
                let doc = &self.docs[doc as usize];
                let recency = temporal::recency_weight(doc.updated, today, self.half_life_days);
                SearchHit {
                    id: doc.id.clone(),
                    kind: doc.kind,
                    score: score * recency,
                    updated: doc.updated,
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.updated.cmp(&a.updated))
                .then_with(|| a.id.cmp(&b.id))
                .then_with(|| a.kind.cmp(&b.kind))
        });
        hits.truncate(limit);
        hits
    }

    /// Persist atomically
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = bincode::serialize(&(INDEX_FORMAT, self))?;
        safe_io::atomic_write(path.as_ref(), &bytes)?;
        log::debug!("Saved index to {}", path.as_ref().display());
        Ok(())
    }

    /// Load a persisted index; a foreign or corrupt file is an `Index` error
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path.as_ref())?;
        let (format, index): (u32, ReefIndex) = bincode::deserialize(&bytes)?;
        if format != INDEX_FORMAT {
            return Err(ReefError::Index(Box::new(bincode::ErrorKind::Custom(format!(
                "index format {format}, expected {INDEX_FORMAT}"
            )))));
        }
        Ok(index)
    }
}

/// Sorted stamps of every polip file in the store
fn stamp_files(store: &ReefStore) -> Result<Vec<FileStamp>> {
    let mut stamps = Vec::new();
    for location in store.locations() {
        for path in store.polip_files(location)? {
            let meta = match fs::metadata(&path) {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .unwrap_or_default();
            let relative = path.strip_prefix(store.root()).unwrap_or(&path);
            stamps.push(FileStamp {
                path: relative.to_string_lossy().into_owned(),
                len: meta.len(),
                modified_secs: modified.as_secs(),
                modified_nanos: modified.subsec_nanos(),
            });
        }
    }
    stamps.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(stamps)
}

/// Split text into lowercase terms
///
/// Splits on non-alphanumerics and at camelCase boundaries (keeping acronyms
/// like `HTML` whole), then drops terms shorter than `min_len` characters.
pub fn tokenize(text: &str, min_len: usize) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_was_upper = false;

    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if ch.is_uppercase() && !current.is_empty() && !prev_was_upper {
                tokens.push(current.to_lowercase());
                current.clear();
            }
            current.push(ch);
            prev_was_upper = ch.is_uppercase();
        } else {
            if !current.is_empty() {
                tokens.push(current.to_lowercase());
                current.clear();
            }
            prev_was_upper = false;
        }
    }
    if !current.is_empty() {
        tokens.push(current.to_lowercase());
    }

    tokens.retain(|t| t.chars().count() >= min_len);
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polip::Decision;
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn note(id: &str, summary: &str, updated: NaiveDate) -> Polip {
        Polip::builder()
            .id(id)
            .kind(PolipKind::Fact)
            .summary(summary)
            .updated(updated)
            .build()
            .unwrap()
    }

    fn ids(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.id.as_str()).collect()
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("hello world", 2), vec!["hello", "world"]);
        assert_eq!(tokenize("getUserById", 2), vec!["get", "user", "by", "id"]);
        assert_eq!(tokenize("HTMLParser src/auth.rs", 2), vec!["htmlparser", "src", "auth", "rs"]);
        assert_eq!(tokenize("a b cd", 2), vec!["cd"]);
        assert!(tokenize("", 2).is_empty());
    }

    #[test]
    fn test_empty_collection() {
        let index = ReefIndex::from_polips([], &SearchConfig::default());
        assert!(index.is_empty());
        assert!(index.query("anything", 10).is_empty());
    }

    #[test]
    fn test_no_matching_terms() {
        let today = date(2026, 6, 1);
        let polips = [note("a", "session cookies", today)];
        let index = ReefIndex::from_polips(&polips, &SearchConfig::default());

        assert!(index.query_at("kubernetes", 10, today).is_empty());
        assert!(index.query_at("", 10, today).is_empty());
        assert!(index.query_at("x", 10, today).is_empty());
    }

    #[test]
    fn test_scores_by_term_overlap() {
        let today = date(2026, 6, 1);
        let polips = [
            note("both", "cache invalidation strategy", today),
            note("one", "cache warming", today),
            note("none", "release checklist", today),
        ];
        let index = ReefIndex::from_polips(&polips, &SearchConfig::default());

        let hits = index.query_at("cache invalidation", 10, today);
        assert_eq!(ids(&hits), vec!["both", "one"]);
        assert!(hits[0].score > hits[1].score);
        assert_eq!(index.document_frequency("cache"), 2);
        assert_eq!(index.document_frequency("Invalidation"), 1);
    }

    #[test]
    fn test_recency_breaks_equal_overlap() {
        let today = date(2026, 6, 1);
        let polips = [
            note("old", "retry budget", date(2025, 6, 1)),
            note("new", "retry budget", date(2026, 5, 30)),
        ];
        let index = ReefIndex::from_polips(&polips, &SearchConfig::default());

        assert_eq!(ids(&index.query_at("retry", 10, today)), vec!["new", "old"]);
    }

    #[test]
    fn test_ties_ordered_by_updated_then_id() {
        let config = SearchConfig {
            recency_half_life_days: 0.0,
            ..SearchConfig::default()
        };
        let polips = [
            note("b-older", "flaky test", date(2026, 1, 1)),
            note("c-newer", "flaky test", date(2026, 3, 1)),
            note("a-older", "flaky test", date(2026, 1, 1)),
        ];
        let index = ReefIndex::from_polips(&polips, &config);

        let hits = index.query_at("flaky", 10, date(2026, 6, 1));
        assert_eq!(hits[0].score, hits[2].score);
        assert_eq!(ids(&hits), vec!["c-newer", "a-older", "b-older"]);
    }

    #[test]
    fn test_limit_and_kind() {
        let today = date(2026, 6, 1);
        let polips: Vec<Polip> = (0..20)
            .map(|i| note(&format!("n{i}"), "shared term", today))
            .collect();
        let index = ReefIndex::from_polips(&polips, &SearchConfig::default());

        let hits = index.query_at("shared", 5, today);
        assert_eq!(hits.len(), 5);
        assert!(hits.iter().all(|h| h.kind == PolipKind::Fact));
        assert!(index.query_at("shared", 0, today).is_empty());
    }

    #[test]
    fn test_indexes_every_text_field() {
        let today = date(2026, 6, 1);
        let polip = Polip::builder()
            .id("rich")
            .kind(PolipKind::Decision)
            .decision(Decision::new("adopt postgres").with_rationale("jsonb support"))
            .file("src/db/pool.rs")
            .updated(today)
            .build()
            .unwrap();
        let index = ReefIndex::from_polips([&polip], &SearchConfig::default());

        for query in ["postgres", "jsonb", "pool", "rich"] {
            assert_eq!(ids(&index.query_at(query, 10, today)), vec!["rich"], "{query}");
        }
    }

    #[test]
    fn test_build_save_load() {
        let dir = TempDir::new().unwrap();
        let store = ReefStore::open(dir.path().join("reef")).unwrap();
        store
            .sprout(&note("persisted", "durable index", temporal::today()))
            .unwrap();

        let mut index = ReefIndex::build(&store).unwrap();
        assert_eq!(index.len(), 1);
        index.refresh(&store).unwrap();

        let loaded = ReefIndex::load(store.index_path()).unwrap();
        assert_eq!(ids(&loaded.query("durable", 10)), vec!["persisted"]);

        // The index file is not mistaken for a polip
        assert_eq!(store.enumerate().unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_index_is_rebuilt_on_open() {
        let dir = TempDir::new().unwrap();
        let store = ReefStore::open(dir.path().join("reef")).unwrap();
        store
            .sprout(&note("survivor", "rebuilt from files", temporal::today()))
            .unwrap();
        fs::write(store.index_path(), b"garbage").unwrap();

        assert!(matches!(
            ReefIndex::load(store.index_path()),
            Err(ReefError::Index(_))
        ));
        let index = ReefIndex::open(&store).unwrap();
        assert_eq!(ids(&index.query("rebuilt", 10)), vec!["survivor"]);
        assert!(ReefIndex::load(store.index_path()).is_ok());
    }

    #[test]
    fn test_open_rebuilds_after_store_changes() {
        let dir = TempDir::new().unwrap();
        let store = ReefStore::open(dir.path().join("reef")).unwrap();
        let gone = note("gone", "widget cache", temporal::today());
        store.sprout(&gone).unwrap();
        ReefIndex::build(&store).unwrap().refresh(&store).unwrap();

        store.decompose(PolipKind::Fact, &gone.id).unwrap();
        store
            .sprout(&note("fresh", "widget registry", temporal::today()))
            .unwrap();

        let stale = ReefIndex::load(store.index_path()).unwrap();
        assert!(!stale.is_fresh(&store).unwrap());

        let index = ReefIndex::open(&store).unwrap();
        assert_eq!(ids(&index.query("widget", 10)), vec!["fresh"]);
        assert!(index.is_fresh(&store).unwrap());
        assert!(ReefIndex::load(store.index_path())
            .unwrap()
            .is_fresh(&store)
            .unwrap());
    }

    #[test]
    fn test_open_keeps_fresh_index() {
        let dir = TempDir::new().unwrap();
        let store = ReefStore::open(dir.path().join("reef")).unwrap();
        store
            .sprout(&note("kept", "stable content", temporal::today()))
            .unwrap();
        ReefIndex::build(&store).unwrap().refresh(&store).unwrap();
        let saved = fs::read(store.index_path()).unwrap();

        let index = ReefIndex::open(&store).unwrap();
        assert_eq!(ids(&index.query("stable", 10)), vec!["kept"]);
        assert_eq!(fs::read(store.index_path()).unwrap(), saved);
    }

    #[test]
    fn test_open_rebuilds_after_in_place_edit() {
        let dir = TempDir::new().unwrap();
        let store = ReefStore::open(dir.path().join("reef")).unwrap();
        let mut edited = note("edited", "first draft", temporal::today());
        store.sprout(&edited).unwrap();
        ReefIndex::build(&store).unwrap().refresh(&store).unwrap();

        edited.summary = "second revision with more words".into();
        store.save(&edited).unwrap();

        let index = ReefIndex::open(&store).unwrap();
        assert_eq!(ids(&index.query("revision", 10)), vec!["edited"]);
        assert!(index.query("draft", 10).is_empty());
    }

    #[test]
    fn test_rebuild_tolerates_files_archived_mid_pass() {
        let dir = TempDir::new().unwrap();
        let store = ReefStore::open(dir.path().join("reef")).unwrap();
        for i in 0..20 {
            store
                .sprout(&note(&format!("steady-{i}"), "steady content", temporal::today()))
                .unwrap();
        }

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for round in 0..50 {
                    let churn = note(&format!("churn-{round}"), "churning", temporal::today());
                    store.sprout(&churn).unwrap();
                    store.decompose(PolipKind::Fact, &churn.id).unwrap();
                }
            });
            scope.spawn(|| {
                let mut index = ReefIndex::new(&store.config().search);
                for _ in 0..50 {
                    index.rebuild(&store).unwrap();
                    assert!(index.len() >= 20);
                }
            });
        });

        let index = ReefIndex::build(&store).unwrap();
        assert_eq!(index.len(), 20);
        assert_eq!(index.query("steady", 100).len(), 20);
    }
}
