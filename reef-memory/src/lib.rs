//! Reef Memory Layer
//!
//! File-backed notes ("polips") that let a coding agent carry context across
//! sessions. Each polip is one small text file under a project-local store.
//!
//! ## Features
//!
//! - **Forward-compatible text format** - unknown headers and sections survive a round trip
//! - **Legacy readers** - v1 sigil lines and tree markup decode into the current model
//! - **Crash-safe storage** - atomic writes, validated identifiers, archive instead of delete
//! - **In-place migration** - stale versions are found and rewritten
//! - **Lexical search** - TF-IDF weighted by recency over an explicit, rebuildable index
//!
//! ## Example
//!
//! ```no_run
//! use reef_memory::{Migrator, Polip, PolipKind, ReefIndex, ReefStore};
//!
//! # fn main() -> reef_memory::Result<()> {
//! let store = ReefStore::open(".reef")?;
//!
//! let polip = Polip::builder()
//!     .id("auth-refactor")
//!     .kind(PolipKind::Thread)
//!     .summary("Move session handling into middleware")
//!     .fact("tokens live in an http-only cookie")
//!     .build()?;
//! store.sprout(&polip)?;
//!
//! Migrator::new(&store).apply()?;
//!
//! let index = ReefIndex::build(&store)?;
//! for hit in index.query("session middleware", 5) {
//!     println!("{} {} {:.2}", hit.kind, hit.id, hit.score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod migration;
pub mod polip;
pub mod safe_io;
pub mod search;
pub mod storage;
pub mod temporal;

// Re-exports for convenience
pub use config::{ReefConfig, SearchConfig};
pub use error::{FormatError, ReefError, Result};
pub use format::Format;
pub use migration::{Migrator, StaleEntry};
pub use polip::{
    Decision, Polip, PolipBuilder, PolipId, PolipKind, RawMap, Scope, Status, Step, Version,
};
pub use search::{ReefIndex, SearchHit};
pub use storage::{Location, ReefStore, StoredPolip};
