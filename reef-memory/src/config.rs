//! Reef configuration
//!
//! Everything has a default; a `reef.toml` next to the project overrides
//! any subset of fields.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Result;

/// File name looked up by [`ReefConfig::discover`]
pub const CONFIG_FILE: &str = "reef.toml";

/// Default store directory, relative to the project
pub const DEFAULT_ROOT: &str = ".reef";

/// Search configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Maximum results when the caller gives no limit
    pub default_limit: usize,
    /// Days for the recency bonus to halve
    pub recency_half_life_days: f64,
    /// Shorter tokens are not indexed
    pub min_token_len: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            recency_half_life_days: 30.0,
            min_token_len: 2,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReefConfig {
    /// Store directory; relative paths resolve against the project dir
    pub root: PathBuf,
    /// Session polips older than this many days are swept into the archive
    pub session_ttl_days: u32,
    /// Quarantined files older than this many days are deleted
    pub quarantine_days: u32,
    pub search: SearchConfig,
}

impl Default for ReefConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            session_ttl_days: 7,
            quarantine_days: 30,
            search: SearchConfig::default(),
        }
    }
}

impl ReefConfig {
    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&text)
    }

    /// Read `reef.toml` from `project_dir` if present, else defaults
    ///
    /// A relative `root` is resolved against `project_dir`.
    pub fn discover(project_dir: impl AsRef<Path>) -> Result<Self> {
        let project_dir = project_dir.as_ref();
        let path = project_dir.join(CONFIG_FILE);
        let mut config = if path.is_file() {
            log::debug!("Loading config from {}", path.display());
            Self::load(&path)?
        } else {
            Self::default()
        };
        if config.root.is_relative() {
            config.root = project_dir.join(&config.root);
        }
        Ok(config)
    }
}
