//! Backup rotation for pull destinations.
//!
//! Before a pull, an existing destination is renamed aside to
//! `<dest><suffix>` so the pull writes into an empty location. After the pull
//! the staged copy is either discarded (commit) or moved back (rollback).
//!
//! State machine: `NotRotated -> Rotated -> {Committed | RolledBack}`.
//! The staged path exists on disk only while the state is `Rotated`, except
//! when a filesystem error made cleanup impossible; such leftovers are logged
//! and never deleted.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationState {
    NotRotated,
    Rotated,
    Committed,
    RolledBack,
}

impl RotationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RotationState::Committed | RotationState::RolledBack)
    }
}

/// Rotation of a single destination path, owned by one transfer job.
#[derive(Debug)]
pub struct BackupRotation {
    destination: PathBuf,
    staged: PathBuf,
    existed_before: bool,
    state: RotationState,
}

impl BackupRotation {
    /// Stage `destination` aside, if it exists.
    ///
    /// Staging failures are not fatal: the rotation stays `NotRotated` and
    /// the pull proceeds over the existing destination, which is then never
    /// deleted.
    pub fn stage(destination: impl Into<PathBuf>, suffix: &str) -> Self {
        let destination = destination.into();
        let staged = staged_path(&destination, suffix);
        let existed_before = fs::symlink_metadata(&destination).is_ok();

        let mut rotation = Self {
            destination,
            staged,
            existed_before,
            state: RotationState::NotRotated,
        };

        if !existed_before {
            if fs::symlink_metadata(&rotation.staged).is_ok() {
                warn!(
                    staged = %rotation.staged.display(),
                    "Found a backup without its destination, leaving it for manual recovery"
                );
            }
            return rotation;
        }

        if fs::symlink_metadata(&rotation.staged).is_ok() {
            if let Err(e) = remove_path(&rotation.staged) {
                warn!(
                    staged = %rotation.staged.display(),
                    "Could not remove stale backup, continuing without rotation: {}", e
                );
                return rotation;
            }
            info!(staged = %rotation.staged.display(), "Removed stale backup");
        }

        match fs::rename(&rotation.destination, &rotation.staged) {
            Ok(()) => {
                info!(
                    destination = %rotation.destination.display(),
                    staged = %rotation.staged.display(),
                    "Staged existing destination"
                );
                rotation.state = RotationState::Rotated;
            }
            Err(e) => {
                warn!(
                    destination = %rotation.destination.display(),
                    "Could not stage destination, continuing without rotation: {}", e
                );
            }
        }

        rotation
    }

    /// Discard the staged backup after a successful pull.
    pub fn commit(&mut self) {
        match self.state {
            RotationState::Rotated => {
                if let Err(e) = remove_path(&self.staged) {
                    error!(
                        staged = %self.staged.display(),
                        "Could not remove backup after successful transfer, left for manual recovery: {}", e
                    );
                }
                self.state = RotationState::Committed;
            }
            RotationState::NotRotated => self.state = RotationState::Committed,
            RotationState::Committed | RotationState::RolledBack => {}
        }
    }

    /// Restore the pre-job destination after a failed or cancelled pull.
    ///
    /// Errors are logged, never raised. If the partial destination cannot be
    /// removed the backup stays at its staged path untouched.
    pub fn rollback(&mut self) {
        match self.state {
            RotationState::Rotated => {
                if fs::symlink_metadata(&self.destination).is_ok() {
                    if let Err(e) = remove_path(&self.destination) {
                        error!(
                            destination = %self.destination.display(),
                            staged = %self.staged.display(),
                            "Could not remove partial destination, backup left for manual recovery: {}", e
                        );
                        self.state = RotationState::RolledBack;
                        return;
                    }
                }

                match fs::rename(&self.staged, &self.destination) {
                    Ok(()) => info!(destination = %self.destination.display(), "Restored previous destination"),
                    Err(e) => error!(
                        staged = %self.staged.display(),
                        "Could not restore backup, left for manual recovery: {}", e
                    ),
                }
                self.state = RotationState::RolledBack;
            }
            RotationState::NotRotated => {
                // Only a destination this job created is partial data
                if !self.existed_before && fs::symlink_metadata(&self.destination).is_ok() {
                    match remove_path(&self.destination) {
                        Ok(()) => info!(destination = %self.destination.display(), "Removed partial destination"),
                        Err(e) => warn!(
                            destination = %self.destination.display(),
                            "Could not remove partial destination: {}", e
                        ),
                    }
                }
                self.state = RotationState::RolledBack;
            }
            RotationState::Committed | RotationState::RolledBack => {}
        }
    }

    pub fn state(&self) -> RotationState {
        self.state
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn staged(&self) -> &Path {
        &self.staged
    }

    /// Whether the destination existed when the job started.
    pub fn existed_before(&self) -> bool {
        self.existed_before
    }
}

impl Drop for BackupRotation {
    fn drop(&mut self) {
        if self.state == RotationState::Rotated {
            warn!(
                destination = %self.destination.display(),
                "Rotation dropped mid-transfer, rolling back"
            );
            self.rollback();
        }
    }
}

/// `<destination><suffix>`, e.g. `/backup/DCIM` -> `/backup/DCIM.tmp_old`.
pub fn staged_path(destination: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Remove a file, symlink or whole directory tree.
pub fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
