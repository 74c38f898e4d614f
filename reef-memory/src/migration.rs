//! In-place upgrade of stale polips
//!
//! A polip is stale when its stored version is older than
//! [`Version::CURRENT`] or when it is still kept in a legacy grammar. Every
//! category directory and the store root are scanned, each once.

use std::io;
use std::path::PathBuf;

use crate::error::{ReefError, Result};
use crate::format::Format;
use crate::polip::{PolipId, PolipKind, Version};
use crate::storage::{self, Location, ReefStore};

/// A polip that [`Migrator::apply`] would rewrite
#[derive(Debug, Clone, PartialEq)]
pub struct StaleEntry {
    pub id: PolipId,
    pub kind: PolipKind,
    pub path: PathBuf,
    /// Version as stored
    pub version: Version,
    pub format: Format,
}

/// Scans a store for stale polips and upgrades them
pub struct Migrator<'a> {
    store: &'a ReefStore,
}

impl<'a> Migrator<'a> {
    pub fn new(store: &'a ReefStore) -> Self {
        Self { store }
    }

    /// Directories visited by a scan, in order
    pub fn scan_dirs(&self) -> Vec<PathBuf> {
        self.store
            .locations()
            .into_iter()
            .map(|location| self.store.dir_of(location))
            .collect()
    }

    /// Report stale polips without touching anything (dry run)
    pub fn scan(&self) -> Result<Vec<StaleEntry>> {
        let mut stale = Vec::new();
        for location in self.store.locations() {
            stale.extend(self.scan_location(location)?);
        }
        log::debug!("Migration scan found {} stale polips", stale.len());
        Ok(stale)
    }

    fn scan_location(&self, location: Location) -> Result<Vec<StaleEntry>> {
        let mut stale = Vec::new();
        for path in self.store.polip_files(location)? {
            let (polip, format) = match storage::read_file(&path) {
                Ok(read) => read,
                Err(ReefError::Storage(e)) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e @ ReefError::Version { .. }) => {
                    log::warn!("Not migrating {}: {}", path.display(), e);
                    continue;
                }
                Err(e) => {
                    log::warn!("Skipping unreadable {}: {}", path.display(), e);
                    continue;
                }
            };
            if polip.needs_migration() || format != Format::Current {
                stale.push(StaleEntry {
                    id: polip.id,
                    kind: polip.kind,
                    path,
                    version: polip.version,
                    format,
                });
            }
        }
        Ok(stale)
    }

    /// Upgrade every stale polip in place; returns how many were rewritten
    ///
    /// Each polip keeps its location. Everything but the version, including
    /// unknown headers and sections, is written back unchanged. Legacy tree
    /// files are replaced by a `.reef` file named after the polip id.
    ///
    /// A file that cannot be read or written is logged and left as it was;
    /// the remaining files are still migrated.
    pub fn apply(&self) -> Result<usize> {
        let mut migrated = 0;
        let mut failed = 0;
        for entry in self.scan()? {
            let mut polip = match storage::read_file(&entry.path) {
                Ok((polip, _)) => polip,
                Err(ReefError::Storage(e)) if e.kind() == io::ErrorKind::NotFound => {
                    log::debug!("{} vanished before migration", entry.path.display());
                    continue;
                }
                Err(e) => {
                    log::warn!("Cannot migrate {}: {}", entry.path.display(), e);
                    failed += 1;
                    continue;
                }
            };
            polip.migrate();
            let written = match self.store.write_at(&entry.path, &polip) {
                Ok(written) => written,
                Err(e) => {
                    log::warn!("Cannot migrate {}: {}", entry.path.display(), e);
                    failed += 1;
                    continue;
                }
            };
            log::info!(
                "Migrated {}/{} from {} to {} ({})",
                polip.kind,
                polip.id,
                entry.version,
                Version::CURRENT,
                written.display()
            );
            migrated += 1;
        }
        if failed > 0 {
            log::warn!("{} stale polips could not be migrated", failed);
        }
        Ok(migrated)
    }
}
