//! Collision-free destination names.
//!
//! When `photo.png` already exists in the destination directory the next
//! arrival becomes `photo (1).png`, then `photo (2).png`, and so on.
//!
//! The probe is a plain existence check. Callers that can race on the same
//! directory must hold that directory's lock (see [`crate::mover::DirLocks`])
//! across the probe and the move that follows it.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// Returns a path inside `destination_dir` for `file_name` that does not
/// exist yet.
///
/// If `destination_dir/file_name` is free it is returned unchanged; otherwise
/// the stem is suffixed with ` (n)` for the smallest `n >= 1` that is free.
///
/// # Examples
///
/// ```
/// use tidywatch::disambiguate::resolve;
/// use std::ffi::OsStr;
///
/// let dir = tempfile::tempdir().unwrap();
/// std::fs::write(dir.path().join("a.txt"), "x").unwrap();
///
/// let path = resolve(dir.path(), OsStr::new("a.txt"));
/// assert_eq!(path, dir.path().join("a (1).txt"));
/// ```
pub fn resolve(destination_dir: &Path, file_name: &OsStr) -> PathBuf {
    let direct = destination_dir.join(file_name);
    if !exists(&direct) {
        return direct;
    }

    let (stem, ext) = split_name(file_name);
    (1u64..)
        .map(|n| destination_dir.join(numbered_name(&stem, ext.as_deref(), n)))
        .find(|candidate| !exists(candidate))
        .unwrap_or(direct)
}

/// Splits a file name into stem and extension (without the dot).
///
/// Dotfiles such as `.bashrc` have no extension.
fn split_name(file_name: &OsStr) -> (OsString, Option<OsString>) {
    let as_path = Path::new(file_name);
    let stem = as_path
        .file_stem()
        .map(OsStr::to_os_string)
        .unwrap_or_else(|| file_name.to_os_string());
    let ext = as_path.extension().map(OsStr::to_os_string);
    (stem, ext)
}

fn numbered_name(stem: &OsStr, ext: Option<&OsStr>, n: u64) -> OsString {
    let mut name = stem.to_os_string();
    name.push(format!(" ({})", n));
    if let Some(ext) = ext {
        name.push(".");
        name.push(ext);
    }
    name
}

// A dangling symlink still occupies the name.
fn exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}
