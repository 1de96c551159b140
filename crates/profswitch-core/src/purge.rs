//! Volatile cache purger

use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ProfileError, Result};

/// Outcome of a purge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    /// Paths that existed and were deleted
    pub removed: Vec<PathBuf>,
    /// Paths that were already absent
    pub missing: usize,
}

/// Delete every path in `paths` that exists. Directories are removed
/// recursively, symlinks are removed without being followed, and absent
/// paths are skipped.
pub fn purge<P: AsRef<Path>>(paths: &[P]) -> Result<PurgeReport> {
    let mut report = PurgeReport::default();

    for path in paths {
        let path = path.as_ref();
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "volatile path absent");
                report.missing += 1;
                continue;
            }
            Err(e) => return Err(purge_error(path, e)),
        };

        let removed = if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match removed {
            Ok(()) => {
                debug!(path = %path.display(), "purged");
                report.removed.push(path.to_path_buf());
            }
            Err(e) if e.kind() == ErrorKind::NotFound => report.missing += 1,
            Err(e) => return Err(purge_error(path, e)),
        }
    }

    info!(
        removed = report.removed.len(),
        missing = report.missing,
        "volatile paths purged"
    );
    Ok(report)
}

fn purge_error(path: &Path, source: std::io::Error) -> ProfileError {
    ProfileError::PurgeFailure {
        path: path.to_path_buf(),
        source,
    }
}
