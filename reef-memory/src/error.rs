//! Error types for reef-memory

use std::path::PathBuf;

use thiserror::Error;

use crate::polip::Version;

/// Malformed polip text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// Input was empty or contained only blank lines
    #[error("empty document")]
    EmptyDocument,

    /// The mandatory `id` header is missing
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    /// A header line that is not `key: value`
    #[error("malformed header at line {line}: {content:?}")]
    MalformedHeader { line: usize, content: String },

    /// A recognised field with an unparseable value
    #[error("invalid value for {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },

    /// Legacy tree markup could not be read
    #[error("tree markup: {0}")]
    Tree(String),
}

impl FormatError {
    pub fn invalid_field(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            value: value.into(),
        }
    }
}

/// Errors that can occur in the reef
#[derive(Debug, Error)]
pub enum ReefError {
    /// Malformed text
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Written by a newer, incompatible format epoch
    #[error("Unsupported version {found}: this reader supports epoch {supported} or older")]
    Version { found: Version, supported: u32 },

    /// Identifier contains a `..` sequence
    #[error("Path traversal in identifier: {0:?}")]
    PathTraversal(String),

    /// Identifier looks like an absolute path
    #[error("Absolute path used as identifier: {0:?}")]
    AbsolutePath(String),

    /// Identifier is empty, too long, or uses characters outside the safe alphabet
    #[error("Invalid identifier {id:?}: {reason}")]
    InvalidIdentifier { id: String, reason: &'static str },

    /// A resolved path landed outside the store root
    #[error("Path escapes store root: {}", .0.display())]
    OutsideRoot(PathBuf),

    /// Polip is exempt from archival
    #[error("Polip is protected and cannot be removed: {0}")]
    Protected(String),

    /// Polip not found
    #[error("Polip not found: {0}")]
    NotFound(String),

    /// Polip already exists
    #[error("Polip already exists: {0}")]
    AlreadyExists(String),

    /// IO error
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Persisted index could not be read or written
    #[error("Index error: {0}")]
    Index(#[from] bincode::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),
}

impl ReefError {
    /// Create an invalid identifier error
    pub fn invalid_identifier(id: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidIdentifier {
            id: id.into(),
            reason,
        }
    }

    /// Create a not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Create a protected error
    pub fn protected(id: impl Into<String>) -> Self {
        Self::Protected(id.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for the identifier safety errors
    pub fn is_unsafe_identifier(&self) -> bool {
        matches!(
            self,
            Self::PathTraversal(_) | Self::AbsolutePath(_) | Self::InvalidIdentifier { .. }
        )
    }
}

impl From<toml::de::Error> for ReefError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

/// Result type for reef operations
pub type Result<T> = std::result::Result<T, ReefError>;
