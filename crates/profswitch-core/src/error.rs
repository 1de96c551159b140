//! Error types for profswitch
//!
//! Every failure the engine can surface is a variant of [`ProfileError`].
//! Variants carry the path and the operation involved so the caller can
//! report what went wrong without re-deriving it.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for profswitch operations
pub type Result<T> = std::result::Result<T, ProfileError>;

/// Main error type for profile operations
#[derive(Error, Debug)]
pub enum ProfileError {
    /// Required locations could not be resolved, or the configuration is invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A profile name was rejected
    #[error("Invalid profile name {0:?}: use letters, digits, '-' or '_'")]
    InvalidName(String),

    /// A required source directory does not exist
    #[error("Source directory not found: {}", .0.display())]
    SourceMissing(PathBuf),

    /// No profile with this name exists
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    /// The requested operation makes no sense (e.g. mirroring a tree onto itself)
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The managed application could not be started
    #[error("Launch failed for {}: {reason}", .path.display())]
    Launch { path: PathBuf, reason: String },

    /// An I/O error interrupted a mirror; the destination may be partially synchronized
    #[error("Sync failed while trying to {operation} {}: {source}", .path.display())]
    SyncFailure {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// A volatile path could not be removed
    #[error("Failed to purge {}: {source}", .path.display())]
    PurgeFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The managed application is running and was not stopped
    #[error("{0} is still running")]
    ApplicationRunning(String),

    /// Process detection or termination failed
    #[error("Process control error: {0}")]
    Process(String),

    /// Another invocation holds the profiles lock
    #[error("Another profswitch operation is in progress (lock held on {})", .0.display())]
    Busy(PathBuf),

    /// The user declined a confirmation
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// TOML configuration parse errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProfileError {
    /// Wrap an I/O error raised while mirroring `path`
    pub(crate) fn sync(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::SyncFailure {
            path: path.into(),
            operation,
            source,
        }
    }

    /// True when the error leaves no trace on disk
    pub fn is_state_preserving(&self) -> bool {
        !matches!(
            self,
            Self::SyncFailure { .. } | Self::PurgeFailure { .. } | Self::Launch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_failure_names_path_and_operation() {
        let err = ProfileError::sync(
            "copy",
            "/tmp/live/Local Storage/leveldb",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );

        let message = err.to_string();
        assert!(message.contains("copy"));
        assert!(message.contains("Local Storage/leveldb"));
        assert!(!err.is_state_preserving());
    }

    #[test]
    fn test_user_errors_preserve_state() {
        assert!(ProfileError::InvalidName("a b".into()).is_state_preserving());
        assert!(ProfileError::ProfileNotFound("ghost".into()).is_state_preserving());
        assert!(ProfileError::SourceMissing("/nope".into()).is_state_preserving());
    }
}
