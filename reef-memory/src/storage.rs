//! File-per-polip storage
//!
//! Layout under the store root:
//!
//! ```text
//! threads/ decisions/ constraints/ contexts/ facts/   one directory per kind
//! archive/                                            decomposed polips
//! quarantine/                                         awaiting expiry
//! .index.bin                                          persisted search index
//! ```
//!
//! Polips live in `<kind dir>/<id>.reef`. Older stores may also keep files at
//! the root and tree-markup files named `<id>.xml`; both are read, neither is
//! written.
//!
//! Identifiers are validated when a [`PolipId`] is constructed, so no method
//! here touches the filesystem with an unchecked name. Every resolved path is
//! additionally canonicalised and must stay under the root.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::config::ReefConfig;
use crate::error::{ReefError, Result};
use crate::format::{self, Format};
use crate::polip::{Polip, PolipId, PolipKind};
use crate::safe_io;
use crate::temporal;

/// Extension of polips in the current grammar (and v1 sigil files)
pub const POLIP_EXT: &str = "reef";
/// Extension of legacy tree-markup files
pub const TREE_EXT: &str = "xml";
pub const ARCHIVE_DIR: &str = "archive";
pub const QUARANTINE_DIR: &str = "quarantine";
pub const INDEX_FILE: &str = ".index.bin";

/// A directory the store enumerates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    /// The store root itself (pre-category layout)
    Root,
    Category(PolipKind),
}

/// A polip and the file it came from
#[derive(Debug, Clone)]
pub struct StoredPolip {
    pub polip: Polip,
    pub path: PathBuf,
    pub location: Location,
    pub format: Format,
}

/// Directory-backed polip store
#[derive(Debug, Clone)]
pub struct ReefStore {
    root: PathBuf,
    config: ReefConfig,
}

impl ReefStore {
    /// Open (creating if needed) a store at `root` with default settings
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(ReefConfig {
            root: root.as_ref().to_path_buf(),
            ..ReefConfig::default()
        })
    }

    /// Open (creating if needed) the store described by `config`
    pub fn open_with(mut config: ReefConfig) -> Result<Self> {
        fs::create_dir_all(&config.root)?;
        let root = fs::canonicalize(&config.root)?;
        config.root = root.clone();

        for kind in PolipKind::ALL {
            fs::create_dir_all(root.join(kind.dir_name()))?;
        }
        fs::create_dir_all(root.join(ARCHIVE_DIR))?;
        fs::create_dir_all(root.join(QUARANTINE_DIR))?;

        log::info!("ReefStore opened at: {}", root.display());
        Ok(Self { root, config })
    }

    /// Canonical store root
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ReefConfig {
        &self.config
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join(ARCHIVE_DIR)
    }

    pub fn quarantine_dir(&self) -> PathBuf {
        self.root.join(QUARANTINE_DIR)
    }

    pub fn dir_of(&self, location: Location) -> PathBuf {
        match location {
            Location::Root => self.root.clone(),
            Location::Category(kind) => self.root.join(kind.dir_name()),
        }
    }

    /// Every enumerable directory: each registered category, then the root
    pub fn locations(&self) -> Vec<Location> {
        PolipKind::ALL
            .into_iter()
            .map(Location::Category)
            .chain(std::iter::once(Location::Root))
            .collect()
    }

    /// Resolve `path` and refuse anything that lands outside the root
    fn contained(&self, path: &Path) -> Result<PathBuf> {
        let parent = path
            .parent()
            .ok_or_else(|| ReefError::OutsideRoot(path.to_path_buf()))?;
        let name = path
            .file_name()
            .ok_or_else(|| ReefError::OutsideRoot(path.to_path_buf()))?;

        let parent = fs::canonicalize(parent)?;
        if !parent.starts_with(&self.root) {
            return Err(ReefError::OutsideRoot(parent));
        }

        let resolved = parent.join(name);
        let is_link = fs::symlink_metadata(&resolved)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if is_link {
            let target = fs::canonicalize(&resolved)?;
            if !target.starts_with(&self.root) {
                return Err(ReefError::OutsideRoot(target));
            }
        }
        Ok(resolved)
    }

    /// Canonical path of a polip in its category
    pub fn path_for(&self, kind: PolipKind, id: &PolipId) -> Result<PathBuf> {
        let path = self
            .dir_of(Location::Category(kind))
            .join(format!("{}.{}", id, POLIP_EXT));
        self.contained(&path)
    }

    /// Contained path of `<id>.<ext>` in `dir`, or `None` when `dir` is gone
    fn candidate(&self, dir: &Path, id: &PolipId, ext: &str) -> Result<Option<PathBuf>> {
        match self.contained(&dir.join(format!("{id}.{ext}"))) {
            Ok(path) => Ok(Some(path)),
            Err(ReefError::Storage(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Existing file and contents for `(kind, id)`: category first, then the
    /// root; the current extension before legacy tree markup
    ///
    /// Files at the root carry no kind in their path, so theirs must match.
    fn locate(&self, kind: PolipKind, id: &PolipId) -> Result<(PathBuf, Polip)> {
        for location in [Location::Category(kind), Location::Root] {
            for ext in [POLIP_EXT, TREE_EXT] {
                let Some(path) = self.candidate(&self.dir_of(location), id, ext)? else {
                    continue;
                };
                match read_file(&path) {
                    Ok((polip, _)) if polip.kind == kind => return Ok((path, polip)),
                    Ok(_) => {}
                    Err(ReefError::Storage(e)) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Err(ReefError::not_found(format!("{kind}/{id}")))
    }

    /// Create a new polip; fails if the id is already taken in its category
    pub fn sprout(&self, polip: &Polip) -> Result<PathBuf> {
        polip.validate()?;
        let path = self.path_for(polip.kind, &polip.id)?;
        let legacy = path.with_extension(TREE_EXT);
        if legacy.exists() {
            return Err(ReefError::AlreadyExists(polip.id.to_string()));
        }

        match safe_io::atomic_create(&path, format::encode(polip).as_bytes()) {
            Ok(()) => {
                log::info!("Sprouted {}/{}", polip.kind, polip.id);
                Ok(path)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(ReefError::AlreadyExists(polip.id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write a polip to its category, replacing any previous version
    ///
    /// Concurrent saves of one id are not serialised: the last rename wins,
    /// and every reader sees one complete version or the other.
    pub fn save(&self, polip: &Polip) -> Result<PathBuf> {
        polip.validate()?;
        let path = self.path_for(polip.kind, &polip.id)?;
        safe_io::atomic_write(&path, format::encode(polip).as_bytes())?;
        log::debug!("Saved {}/{}", polip.kind, polip.id);
        Ok(path)
    }

    /// Rewrite a polip in place at a path found by enumeration
    ///
    /// A tree-markup file is replaced by `<id>.reef` next to it, named after
    /// the polip rather than the old file. That name must not be taken.
    pub(crate) fn write_at(&self, path: &Path, polip: &Polip) -> Result<PathBuf> {
        polip.validate()?;
        let path = self.contained(path)?;
        let encoded = format::encode(polip);
        if !path.extension().is_some_and(|e| e == TREE_EXT) {
            safe_io::atomic_write(&path, encoded.as_bytes())?;
            return Ok(path);
        }

        let parent = path
            .parent()
            .ok_or_else(|| ReefError::OutsideRoot(path.clone()))?;
        let target = parent.join(format!("{}.{}", polip.id, POLIP_EXT));
        match safe_io::atomic_create(&target, encoded.as_bytes()) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(ReefError::AlreadyExists(polip.id.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        fs::remove_file(&path)?;
        Ok(target)
    }

    /// Read one polip
    pub fn read(&self, kind: PolipKind, id: &PolipId) -> Result<Polip> {
        self.locate(kind, id).map(|(_, polip)| polip)
    }

    /// Find a polip by id in any category (then the root)
    pub fn find(&self, id: &PolipId) -> Result<StoredPolip> {
        for location in self.locations() {
            let dir = self.dir_of(location);
            for ext in [POLIP_EXT, TREE_EXT] {
                let Some(path) = self.candidate(&dir, id, ext)? else {
                    continue;
                };
                match read_file(&path) {
                    Ok((polip, format)) => {
                        return Ok(StoredPolip {
                            polip,
                            path,
                            location,
                            format,
                        })
                    }
                    Err(ReefError::Storage(e)) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Err(ReefError::not_found(id.to_string()))
    }

    /// All polips stored in one category
    pub fn list(&self, kind: PolipKind) -> Result<Vec<Polip>> {
        Ok(self
            .scan(Location::Category(kind))?
            .into_iter()
            .map(|stored| stored.polip)
            .collect())
    }

    /// Every readable polip in every location
    ///
    /// Files that disappear mid-scan or fail to decode are skipped and
    /// logged; a concurrent writer never makes enumeration fail.
    pub fn enumerate(&self) -> Result<Vec<StoredPolip>> {
        let mut all = Vec::new();
        for location in self.locations() {
            all.extend(self.scan(location)?);
        }
        Ok(all)
    }

    /// Decodable polips in one location
    pub fn scan(&self, location: Location) -> Result<Vec<StoredPolip>> {
        let mut found = Vec::new();
        for path in self.polip_files(location)? {
            match read_file(&path) {
                Ok((polip, format)) => found.push(StoredPolip {
                    polip,
                    path,
                    location,
                    format,
                }),
                Err(ReefError::Storage(e)) if e.kind() == io::ErrorKind::NotFound => {
                    log::debug!("{} vanished during scan", path.display());
                }
                Err(e) => log::warn!("Skipping {}: {}", path.display(), e),
            }
        }
        Ok(found)
    }

    /// Candidate polip files in one location, sorted by name
    pub fn polip_files(&self, location: Location) -> Result<Vec<PathBuf>> {
        let dir = self.dir_of(location);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::debug!("Unreadable entry in {}: {}", dir.display(), e);
                    continue;
                }
            };
            let path = entry.path();
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            let known_ext = path
                .extension()
                .is_some_and(|e| e == POLIP_EXT || e == TREE_EXT);
            if is_file && known_ext && !safe_io::is_hidden(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Archive a polip under today's date
    pub fn decompose(&self, kind: PolipKind, id: &PolipId) -> Result<PathBuf> {
        self.decompose_on(kind, id, temporal::today())
    }

    /// Archive a polip as `archive/<date>-<id>.reef`
    ///
    /// Protected polips are refused. An existing archive entry with the same
    /// date and id is never replaced; the new one gets a `-2`, `-3`, ...
    /// suffix.
    pub fn decompose_on(&self, kind: PolipKind, id: &PolipId, date: NaiveDate) -> Result<PathBuf> {
        let archived = self.retire(kind, id, date, &self.archive_dir())?;
        log::info!("Decomposed {}/{} -> {}", kind, id, archived.display());
        Ok(archived)
    }

    /// Move a polip into quarantine, the only path to deletion
    pub fn quarantine(&self, kind: PolipKind, id: &PolipId) -> Result<PathBuf> {
        self.quarantine_on(kind, id, temporal::today())
    }

    pub fn quarantine_on(&self, kind: PolipKind, id: &PolipId, date: NaiveDate) -> Result<PathBuf> {
        let moved = self.retire(kind, id, date, &self.quarantine_dir())?;
        log::info!("Quarantined {}/{} -> {}", kind, id, moved.display());
        Ok(moved)
    }

    fn retire(&self, kind: PolipKind, id: &PolipId, date: NaiveDate, into: &Path) -> Result<PathBuf> {
        let (source, polip) = self.locate(kind, id)?;
        if polip.is_protected() {
            return Err(ReefError::protected(format!("{kind}/{id}")));
        }

        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(POLIP_EXT);
        let stem = format!("{}-{}", date.format("%Y-%m-%d"), id);
        let target = safe_io::reserve_unique(into, &stem, ext)?;
        safe_io::move_into_reserved(&source, &target)?;
        Ok(target)
    }

    /// Delete quarantined files older than `max_age_days`; returns how many
    pub fn expire_quarantine(&self, max_age_days: u32, today: NaiveDate) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(self.quarantine_dir())? {
            let path = entry?.path();
            let Some(date) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(dated_prefix)
            else {
                continue;
            };
            if temporal::age_in_days(date, today) > max_age_days {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        if removed > 0 {
            log::info!("Expired {} quarantined polips", removed);
        }
        Ok(removed)
    }

    /// Archive session polips past the configured TTL
    pub fn sweep_stale_sessions(&self, today: NaiveDate) -> Result<Vec<PolipId>> {
        let ttl = self.config.session_ttl_days;
        let mut swept = Vec::new();
        for stored in self.enumerate()? {
            let polip = &stored.polip;
            if !temporal::is_stale(polip, today, ttl) || polip.is_protected() {
                continue;
            }
            match self.decompose_on(polip.kind, &polip.id, today) {
                Ok(_) => swept.push(polip.id.clone()),
                Err(ReefError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(swept)
    }

    /// Archived files, sorted by name
    pub fn list_archive(&self) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = fs::read_dir(self.archive_dir())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| !safe_io::is_hidden(path))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Store statistics
    pub fn stats(&self) -> Result<serde_json::Value> {
        let mut by_kind = serde_json::Map::new();
        let mut total = 0;
        for kind in PolipKind::ALL {
            let count = self.polip_files(Location::Category(kind))?.len();
            total += count;
            by_kind.insert(kind.as_str().to_string(), count.into());
        }
        let at_root = self.polip_files(Location::Root)?.len();
        let archived = self.list_archive()?.len();
        let quarantined = fs::read_dir(self.quarantine_dir())?.count();

        Ok(serde_json::json!({
            "totalPolips": total + at_root,
            "byKind": by_kind,
            "atRoot": at_root,
            "archived": archived,
            "quarantined": quarantined,
        }))
    }
}

/// Read and decode one file, using the file stem as the id for tree markup
pub fn read_file(path: &Path) -> Result<(Polip, Format)> {
    let text = fs::read_to_string(path)?;
    let format = format::detect(&text).unwrap_or(Format::Current);
    let polip = match format {
        Format::Tree => {
            let stem = path.file_stem().and_then(|s| s.to_str());
            format::tree::decode(&text, stem)?
        }
        _ => format::decode(&text)?,
    };
    Ok((polip, format))
}

/// Date encoded at the start of an archive or quarantine file name
fn dated_prefix(name: &str) -> Option<NaiveDate> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{4}-\d{2}-\d{2})-").expect("date prefix pattern is valid")
    });
    let caps = pattern.captures(name)?;
    NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polip::{Scope, Version};
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn store() -> (TempDir, ReefStore) {
        let dir = TempDir::new().unwrap();
        let store = ReefStore::open(dir.path().join("reef")).unwrap();
        (dir, store)
    }

    fn polip(id: &str, kind: PolipKind) -> Polip {
        Polip::builder()
            .id(id)
            .kind(kind)
            .summary(format!("summary of {id}"))
            .build()
            .unwrap()
    }

    fn id(raw: &str) -> PolipId {
        PolipId::parse(raw).unwrap()
    }

    #[test]
    fn test_open_creates_layout() {
        let (_dir, store) = store();
        for kind in PolipKind::ALL {
            assert!(store.root().join(kind.dir_name()).is_dir());
        }
        assert!(store.archive_dir().is_dir());
        assert!(store.quarantine_dir().is_dir());
    }

    #[test]
    fn test_sprout_and_read() {
        let (_dir, store) = store();
        let original = polip("first", PolipKind::Thread);

        let path = store.sprout(&original).unwrap();
        assert!(path.ends_with("threads/first.reef"));
        assert_eq!(store.read(PolipKind::Thread, &id("first")).unwrap(), original);
    }

    #[test]
    fn test_sprout_refuses_duplicate() {
        let (_dir, store) = store();
        store.sprout(&polip("dup", PolipKind::Fact)).unwrap();
        let err = store.sprout(&polip("dup", PolipKind::Fact)).unwrap_err();
        assert!(matches!(err, ReefError::AlreadyExists(_)));

        // Same id in another category is fine
        store.sprout(&polip("dup", PolipKind::Context)).unwrap();
    }

    #[test]
    fn test_save_overwrites() {
        let (_dir, store) = store();
        let mut note = polip("edit", PolipKind::Fact);
        store.sprout(&note).unwrap();

        note.facts.push("added later".into());
        store.save(&note).unwrap();
        assert_eq!(store.read(PolipKind::Fact, &id("edit")).unwrap().facts, vec!["added later"]);
    }

    #[test]
    fn test_read_missing() {
        let (_dir, store) = store();
        let err = store.read(PolipKind::Fact, &id("ghost")).unwrap_err();
        assert!(matches!(err, ReefError::NotFound(_)));
    }

    #[test]
    fn test_missing_category_dir_reads_as_not_found() {
        let (_dir, store) = store();
        fs::remove_dir(store.root().join("facts")).unwrap();

        let err = store.read(PolipKind::Fact, &id("x")).unwrap_err();
        assert!(matches!(err, ReefError::NotFound(_)));
        let err = store.find(&id("x")).unwrap_err();
        assert!(matches!(err, ReefError::NotFound(_)));
    }

    #[test]
    fn test_write_at_names_converted_tree_file_by_id() {
        let (_dir, store) = store();
        let threads = store.root().join("threads");
        let old = threads.join("x.xml");
        fs::write(&old, r#"<polip id="other" type="thread"><summary>s</summary></polip>"#)
            .unwrap();

        let (tree, _) = read_file(&old).unwrap();
        let written = store.write_at(&old, &tree).unwrap();

        assert_eq!(written.file_name().unwrap(), "other.reef");
        assert!(!old.exists());
        assert!(!threads.join("x.reef").exists());
        assert_eq!(store.read(PolipKind::Thread, &id("other")).unwrap().summary, "s");
    }

    #[test]
    fn test_write_at_refuses_taken_id() {
        let (_dir, store) = store();
        store.sprout(&polip("taken", PolipKind::Thread)).unwrap();
        let old = store.root().join("threads").join("x.xml");
        fs::write(&old, r#"<polip id="taken" type="thread"><summary>s</summary></polip>"#)
            .unwrap();

        let (tree, _) = read_file(&old).unwrap();
        let err = store.write_at(&old, &tree).unwrap_err();

        assert!(matches!(err, ReefError::AlreadyExists(_)));
        assert!(old.exists());
        assert_eq!(
            store.read(PolipKind::Thread, &id("taken")).unwrap().summary,
            "summary of taken"
        );
    }

    #[test]
    fn test_list_and_find() {
        let (_dir, store) = store();
        store.sprout(&polip("a", PolipKind::Decision)).unwrap();
        store.sprout(&polip("b", PolipKind::Decision)).unwrap();
        store.sprout(&polip("c", PolipKind::Fact)).unwrap();

        let decisions = store.list(PolipKind::Decision).unwrap();
        assert_eq!(decisions.len(), 2);

        let found = store.find(&id("c")).unwrap();
        assert_eq!(found.location, Location::Category(PolipKind::Fact));
    }

    #[test]
    fn test_enumerate_includes_root_and_skips_junk() {
        let (_dir, store) = store();
        store.sprout(&polip("in-category", PolipKind::Thread)).unwrap();
        fs::write(
            store.root().join("at-root.reef"),
            format::encode(&polip("at-root", PolipKind::Fact)),
        )
        .unwrap();
        fs::write(store.root().join("broken.reef"), "not a header\n").unwrap();
        fs::write(store.root().join(".hidden.reef"), "ignored").unwrap();
        fs::write(store.root().join("notes.txt"), "ignored").unwrap();

        let mut ids: Vec<String> = store
            .enumerate()
            .unwrap()
            .into_iter()
            .map(|s| s.polip.id.to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["at-root", "in-category"]);
    }

    #[test]
    fn test_reads_legacy_tree_file() {
        let (_dir, store) = store();
        fs::write(
            store.root().join("contexts").join("old-ctx.xml"),
            r#"<polip type="context"><summary>from the tree era</summary></polip>"#,
        )
        .unwrap();

        let polip = store.read(PolipKind::Context, &id("old-ctx")).unwrap();
        assert_eq!(polip.summary, "from the tree era");
        assert_eq!(polip.version, Version::LEGACY);
    }

    #[test]
    fn test_decompose_moves_to_archive() {
        let (_dir, store) = store();
        store.sprout(&polip("done-thing", PolipKind::Thread)).unwrap();

        let archived = store
            .decompose_on(PolipKind::Thread, &id("done-thing"), date(2026, 3, 4))
            .unwrap();

        assert!(archived.ends_with("archive/2026-03-04-done-thing.reef"));
        assert!(archived.is_file());
        assert!(matches!(
            store.read(PolipKind::Thread, &id("done-thing")),
            Err(ReefError::NotFound(_))
        ));
    }

    #[test]
    fn test_decompose_same_day_keeps_both() {
        let (_dir, store) = store();
        let day = date(2026, 5, 1);

        let mut first = polip("contested", PolipKind::Thread);
        first.facts.push("first version".into());
        store.sprout(&first).unwrap();
        let a = store.decompose_on(PolipKind::Thread, &id("contested"), day).unwrap();

        let mut second = polip("contested", PolipKind::Thread);
        second.facts.push("second version".into());
        store.sprout(&second).unwrap();
        let b = store.decompose_on(PolipKind::Thread, &id("contested"), day).unwrap();

        assert_ne!(a, b);
        assert!(b.ends_with("archive/2026-05-01-contested-2.reef"));
        assert!(fs::read_to_string(&a).unwrap().contains("first version"));
        assert!(fs::read_to_string(&b).unwrap().contains("second version"));
        assert_eq!(store.list_archive().unwrap().len(), 2);
    }

    #[test]
    fn test_decompose_refuses_protected() {
        let (_dir, store) = store();
        store.sprout(&polip("rule", PolipKind::Constraint)).unwrap();
        let mut pinned = polip("pinned", PolipKind::Fact);
        pinned.scope = Scope::Always;
        store.sprout(&pinned).unwrap();

        for (kind, raw) in [(PolipKind::Constraint, "rule"), (PolipKind::Fact, "pinned")] {
            let err = store.decompose(kind, &id(raw)).unwrap_err();
            assert!(matches!(err, ReefError::Protected(_)));
            assert!(store.read(kind, &id(raw)).is_ok());
        }
        assert!(store.list_archive().unwrap().is_empty());
    }

    #[test]
    fn test_quarantine_and_expiry() {
        let (_dir, store) = store();
        store.sprout(&polip("junk", PolipKind::Fact)).unwrap();
        store
            .quarantine_on(PolipKind::Fact, &id("junk"), date(2026, 1, 1))
            .unwrap();

        assert_eq!(store.expire_quarantine(30, date(2026, 1, 20)).unwrap(), 0);
        assert_eq!(store.expire_quarantine(30, date(2026, 3, 1)).unwrap(), 1);
        assert_eq!(fs::read_dir(store.quarantine_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_sweep_stale_sessions() {
        let (_dir, store) = store();
        let mut old = polip("old-session", PolipKind::Thread);
        old.scope = Scope::Session;
        old.updated = date(2026, 1, 1);
        store.sprout(&old).unwrap();

        let mut fresh = polip("fresh-session", PolipKind::Thread);
        fresh.scope = Scope::Session;
        fresh.updated = date(2026, 1, 30);
        store.sprout(&fresh).unwrap();

        let swept = store.sweep_stale_sessions(date(2026, 2, 1)).unwrap();
        assert_eq!(swept, vec![id("old-session")]);
        assert!(store.read(PolipKind::Thread, &id("fresh-session")).is_ok());
    }

    #[test]
    fn test_stats() {
        let (_dir, store) = store();
        store.sprout(&polip("a", PolipKind::Fact)).unwrap();
        store.sprout(&polip("b", PolipKind::Thread)).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats["totalPolips"], 2);
        assert_eq!(stats["byKind"]["fact"], 1);
        assert_eq!(stats["archived"], 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_category_outside_root_rejected() {
        let dir = TempDir::new().unwrap();
        let outside = dir.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        let store = ReefStore::open(dir.path().join("reef")).unwrap();

        let facts = store.root().join("facts");
        fs::remove_dir(&facts).unwrap();
        std::os::unix::fs::symlink(&outside, &facts).unwrap();

        let err = store.sprout(&polip("escape", PolipKind::Fact)).unwrap_err();
        assert!(matches!(err, ReefError::OutsideRoot(_)));
        assert_eq!(fs::read_dir(&outside).unwrap().count(), 0);
    }
}
