//! Advisory lock on the profiles root
//!
//! Mutating operations hold an exclusive lock on
//! `<profiles root>/.profswitch.lock` so that a second invocation fails fast
//! instead of mirroring into the same live directory concurrently.

use fs4::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ProfileError, Result};

/// File name of the lock inside the profiles root
pub const LOCK_FILE_NAME: &str = ".profswitch.lock";

/// Held exclusive lock; released on drop
#[derive(Debug)]
pub struct ProfilesLock {
    file: File,
    path: PathBuf,
}

impl ProfilesLock {
    /// Create the profiles root if needed and take the lock without blocking
    pub fn acquire(profiles_root: &Path) -> Result<Self> {
        fs::create_dir_all(profiles_root)?;
        let path = profiles_root.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(lock = %path.display(), "acquired profiles lock");
                Ok(Self { file, path })
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Err(ProfileError::Busy(path)),
            Err(err) => Err(err.into()),
        }
    }

    /// Location of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProfilesLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
