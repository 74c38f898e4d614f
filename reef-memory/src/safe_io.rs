//! Crash- and race-safe file primitives
//!
//! Readers never see a half-written polip: content goes to a uniquely named
//! temp file in the destination directory and is renamed into place. Two
//! writers racing on one path both succeed; the later rename wins.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Suffix of in-flight temp files; enumeration skips them
pub const TEMP_SUFFIX: &str = ".tmp";

/// Write `bytes` to `path` atomically
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let temp = temp_path(path)?;
    let result = write_then_rename(&temp, path, bytes);
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

/// Write `bytes` to `path` atomically, failing with `AlreadyExists` if it is taken
///
/// The temp file is hard-linked into place, which either publishes the
/// complete content or fails without touching an existing file.
pub fn atomic_create(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let temp = temp_path(path)?;
    let result = write_temp(&temp, bytes).and_then(|_| fs::hard_link(&temp, path));
    let _ = fs::remove_file(&temp);
    result?;
    sync_dir(path.parent());
    Ok(())
}

fn temp_path(path: &Path) -> io::Result<PathBuf> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    Ok(dir.join(format!(
        ".{}.{}{}",
        name.to_string_lossy(),
        Uuid::new_v4().simple(),
        TEMP_SUFFIX
    )))
}

fn write_temp(temp: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(temp)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn write_then_rename(temp: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    write_temp(temp, bytes)?;
    fs::rename(temp, path)?;
    sync_dir(path.parent());
    Ok(())
}

/// Best effort: persist the directory entry after a rename
#[cfg(unix)]
fn sync_dir(dir: Option<&Path>) {
    if let Some(dir) = dir {
        if let Ok(handle) = File::open(dir) {
            let _ = handle.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: Option<&Path>) {}

/// Claim a file name in `dir` that nobody else holds
///
/// Tries `{stem}.{ext}`, then `{stem}-2.{ext}`, `{stem}-3.{ext}`, ...; the
/// winning name is created empty with `create_new`, so concurrent callers
/// can never be handed the same path.
pub fn reserve_unique(dir: &Path, stem: &str, ext: &str) -> io::Result<PathBuf> {
    for n in 1u32.. {
        let name = if n == 1 {
            format!("{stem}.{ext}")
        } else {
            format!("{stem}-{n}.{ext}")
        };
        let candidate = dir.join(name);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::Other,
        "exhausted unique name suffixes",
    ))
}

/// Move `from` onto a path previously returned by [`reserve_unique`]
pub fn move_into_reserved(from: &Path, reserved: &Path) -> io::Result<()> {
    if let Err(e) = fs::rename(from, reserved) {
        let _ = fs::remove_file(reserved);
        return Err(e);
    }
    sync_dir(reserved.parent());
    Ok(())
}

/// Whether a directory entry is an in-flight temp file or otherwise hidden
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|n| {
            let n = n.to_string_lossy();
            n.starts_with('.') || n.ends_with(TEMP_SUFFIX)
        })
        .unwrap_or(true)
}
