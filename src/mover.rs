//! Moving files into their category directories.
//!
//! [`Mover::try_move`] performs one relocation and reports a typed outcome:
//! the file was moved, the move was only simulated (dry run), or there was
//! nothing to do because the file is already gone. [`Mover::move_file`] wraps
//! it for the watch sessions: every outcome ends up in the log stream and no
//! error ever escapes, so one bad file cannot stop a session.
//!
//! Moves into the same destination directory are serialized through
//! [`DirLocks`]. Two events racing for `photo.png` would otherwise both see
//! `photo (1).png` as free and the second rename would replace the first file.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::debug;

use crate::disambiguate::resolve;
use crate::logging::LogSink;

/// Why a move was skipped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The source no longer exists (already moved, or a transient temp file).
    Vanished,
    /// The source is a directory, symlink or other non-regular entry.
    NotARegularFile,
}

/// Result of a single relocation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The file now lives at `to`.
    Moved {
        from: PathBuf,
        to: PathBuf,
        category: String,
    },
    /// Dry run: the file would have been moved to `to`.
    DryRun {
        from: PathBuf,
        to: PathBuf,
        category: String,
    },
    /// Nothing was done.
    Skipped(SkipReason),
}

/// Errors that can occur while moving a file.
#[derive(Error, Debug)]
pub enum MoveError {
    /// The source exists but its metadata could not be read.
    #[error("cannot inspect {}: {source}", path.display())]
    Inspect { path: PathBuf, source: io::Error },

    /// The source path ends in `..` or is a root.
    #[error("{} has no file name", path.display())]
    NoFileName { path: PathBuf },

    /// The category directory could not be created.
    #[error("failed to create directory {}: {source}", path.display())]
    DirectoryCreation { path: PathBuf, source: io::Error },

    /// The rename itself failed.
    #[error("failed to move {} to {}: {source}", from.display(), to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// Copying across filesystems failed; nothing was left at the destination.
    #[error("failed to copy {} to {}: {source}", from.display(), to.display())]
    CrossDeviceCopy {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// The copy succeeded but the original could not be deleted.
    #[error("copied to {} but could not remove {}: {source}", to.display(), from.display())]
    RemoveSource {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
}

/// Result type for move operations.
pub type MoveResult<T> = Result<T, MoveError>;

/// Registry of per-directory locks.
///
/// Keyed by the canonical destination path so that two sessions reaching the
/// same physical directory through different spellings still share a lock.
#[derive(Debug, Default)]
pub struct DirLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl DirLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock guarding moves into `dir`.
    pub fn lock_for(&self, dir: &Path) -> Arc<Mutex<()>> {
        let key = fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key).or_default())
    }
}

/// Relocates files into category directories.
#[derive(Debug, Clone)]
pub struct Mover {
    locks: Arc<DirLocks>,
    dry_run: bool,
}

impl Mover {
    /// Creates a mover that serializes through `locks`.
    ///
    /// Every session of a monitor must share the same registry.
    pub fn new(locks: Arc<DirLocks>) -> Self {
        Self {
            locks,
            dry_run: false,
        }
    }

    /// Enables or disables dry-run mode.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Moves `source` into `destination_dir` and reports the outcome.
    ///
    /// This never fails: benign skips are debug-logged, successes and errors
    /// go to `log`.
    pub fn move_file(&self, source: &Path, destination_dir: &Path, category: &str, log: &LogSink) {
        match self.try_move(source, destination_dir, category) {
            Ok(MoveOutcome::Moved { from, to, category }) => {
                log.success(describe_move(&from, &to, &category));
            }
            Ok(MoveOutcome::DryRun { from, to, category }) => {
                log.info(format!(
                    "[dry run] would move {}",
                    describe_move(&from, &to, &category)
                ));
            }
            Ok(MoveOutcome::Skipped(reason)) => {
                debug!(path = %source.display(), ?reason, "Nothing to move");
            }
            Err(e) => {
                log.error(format!("failed to move {}: {}", source.display(), e));
            }
        }
    }

    /// Moves `source` into `destination_dir` under a collision-free name.
    ///
    /// The destination directory is created if missing (only that directory,
    /// not its parents). Renames that cross filesystems fall back to
    /// copy-then-delete; the source is removed only after the copy is
    /// complete and in place.
    ///
    /// # Errors
    ///
    /// Returns a [`MoveError`] describing the failing step. The source file is
    /// left where it was in every error case except [`MoveError::RemoveSource`].
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use std::sync::Arc;
    /// use tidywatch::mover::{DirLocks, Mover, MoveOutcome};
    ///
    /// let mover = Mover::new(Arc::new(DirLocks::new()));
    /// let outcome = mover.try_move(
    ///     Path::new("/home/me/Downloads/photo.png"),
    ///     Path::new("/home/me/Downloads/Images"),
    ///     "Images",
    /// );
    /// if let Ok(MoveOutcome::Moved { to, .. }) = outcome {
    ///     println!("now at {}", to.display());
    /// }
    /// ```
    pub fn try_move(
        &self,
        source: &Path,
        destination_dir: &Path,
        category: &str,
    ) -> MoveResult<MoveOutcome> {
        match fs::symlink_metadata(source) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Ok(MoveOutcome::Skipped(SkipReason::NotARegularFile)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(MoveOutcome::Skipped(SkipReason::Vanished));
            }
            Err(e) => {
                return Err(MoveError::Inspect {
                    path: source.to_path_buf(),
                    source: e,
                });
            }
        }

        let file_name = source.file_name().ok_or_else(|| MoveError::NoFileName {
            path: source.to_path_buf(),
        })?;

        if self.dry_run {
            return Ok(MoveOutcome::DryRun {
                from: source.to_path_buf(),
                to: resolve(destination_dir, file_name),
                category: category.to_string(),
            });
        }

        ensure_directory(destination_dir)?;

        let lock = self.locks.lock_for(destination_dir);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let target = resolve(destination_dir, file_name);
        match fs::rename(source, &target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                copy_then_replace(source, &target)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound && !source.exists() => {
                return Ok(MoveOutcome::Skipped(SkipReason::Vanished));
            }
            Err(e) => {
                return Err(MoveError::Rename {
                    from: source.to_path_buf(),
                    to: target,
                    source: e,
                });
            }
        }

        Ok(MoveOutcome::Moved {
            from: source.to_path_buf(),
            to: target,
            category: category.to_string(),
        })
    }
}

/// Creates `dir` if it is missing. Parents are never created.
fn ensure_directory(dir: &Path) -> MoveResult<()> {
    match fs::create_dir(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(e) => Err(MoveError::DirectoryCreation {
            path: dir.to_path_buf(),
            source: e,
        }),
    }
}

/// Copies `source` to `target` through a hidden temporary file in the target
/// directory, then deletes `source`.
///
/// The temporary file is synced and renamed into place before the source is
/// touched; on a failed copy it is removed again.
pub(crate) fn copy_then_replace(source: &Path, target: &Path) -> MoveResult<()> {
    let copy_error = |e: io::Error| MoveError::CrossDeviceCopy {
        from: source.to_path_buf(),
        to: target.to_path_buf(),
        source: e,
    };

    let staging_dir = target.parent().unwrap_or_else(|| Path::new("."));
    let staging = resolve(staging_dir, &staging_name(target));

    let copied = fs::copy(source, &staging)
        .and_then(|_| File::open(&staging)?.sync_all())
        .and_then(|()| fs::rename(&staging, target));
    if let Err(e) = copied {
        let _ = fs::remove_file(&staging);
        return Err(copy_error(e));
    }

    fs::remove_file(source).map_err(|e| MoveError::RemoveSource {
        from: source.to_path_buf(),
        to: target.to_path_buf(),
        source: e,
    })
}

fn staging_name(target: &Path) -> OsString {
    let mut name = OsString::from(".");
    name.push(target.file_name().unwrap_or_else(|| OsStr::new("file")));
    name.push(".partial");
    name
}

/// `photo.png → Images`, or `photo.png → Images/photo (1).png` when renamed.
fn describe_move(from: &Path, to: &Path, category: &str) -> String {
    let original = from.file_name().unwrap_or_default().to_string_lossy();
    let placed = to.file_name().unwrap_or_default().to_string_lossy();
    if original == placed {
        format!("{} → {}", original, category)
    } else {
        format!("{} → {}/{}", original, category, placed)
    }
}
