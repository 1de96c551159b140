//! Switcher configuration
//!
//! A [`SwitchConfig`] is built once at startup (defaults, optionally
//! overridden by a TOML file) and then passed by reference everywhere.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::error::{ProfileError, Result};

/// Name of the config file inside the profswitch config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Volatile sub-paths of Spotify's state directory. All of them are
/// regenerated on the next launch.
pub const DEFAULT_VOLATILE: &[&str] = &[
    "PersistentCache",
    "Storage",
    "Data",
    "Browser/Cache",
    "Browser/Code Cache",
    "Browser/GPUCache",
    "Browser/Service Worker/CacheStorage",
    "Browser/Service Worker/ScriptCache",
];

/// `pgrep -x` matches against the kernel `comm` name, truncated to this length
#[cfg(target_os = "linux")]
pub const MAX_PROCESS_NAME_LEN: usize = 15;

/// Main switcher configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SwitchConfig {
    /// Human readable application name, also the default state directory name
    pub app_name: String,

    /// Exact process name used to detect and terminate the app
    pub process_name: String,

    /// Directory name of the app's OS-level cache under the cache root (the
    /// bundle identifier on macOS). Purged after activation; empty disables it.
    pub bundle_id: String,

    /// Install location of the application bundle or executable
    pub bundle_path: PathBuf,

    /// Override for the live state directory
    pub live_dir: Option<PathBuf>,

    /// Override for the profiles root
    pub profiles_root: Option<PathBuf>,

    /// Settling delay after a forced termination, in milliseconds
    pub settle_delay_ms: u64,

    /// Volatile paths relative to the live state directory
    pub volatile: Vec<String>,

    /// Additional OS-level cache locations (absolute, `~/`-prefixed, or
    /// relative to the cache root)
    pub system_caches: Vec<String>,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            process_name: DEFAULT_APP_NAME.to_string(),
            bundle_id: DEFAULT_CACHE_DIR.to_string(),
            bundle_path: default_bundle_path(),
            live_dir: None,
            profiles_root: None,
            settle_delay_ms: 1000,
            volatile: DEFAULT_VOLATILE.iter().map(|s| s.to_string()).collect(),
            system_caches: Vec::new(),
        }
    }
}

#[cfg(target_os = "macos")]
const DEFAULT_APP_NAME: &str = "Spotify";
#[cfg(target_os = "macos")]
const DEFAULT_CACHE_DIR: &str = "com.spotify.client";

#[cfg(windows)]
const DEFAULT_APP_NAME: &str = "Spotify";
#[cfg(windows)]
const DEFAULT_CACHE_DIR: &str = "Spotify";

// Linux packages use lowercase for the binary, state and cache directories.
#[cfg(not(any(target_os = "macos", windows)))]
const DEFAULT_APP_NAME: &str = "spotify";
#[cfg(not(any(target_os = "macos", windows)))]
const DEFAULT_CACHE_DIR: &str = "spotify";

#[cfg(target_os = "macos")]
fn default_bundle_path() -> PathBuf {
    PathBuf::from("/Applications/Spotify.app")
}

#[cfg(windows)]
fn default_bundle_path() -> PathBuf {
    PathBuf::from("~/AppData/Roaming/Spotify/Spotify.exe")
}

#[cfg(not(any(target_os = "macos", windows)))]
fn default_bundle_path() -> PathBuf {
    PathBuf::from("/usr/bin/spotify")
}

impl SwitchConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the live state directory
    pub fn with_live_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.live_dir = Some(path.into());
        self
    }

    /// Set the profiles root
    pub fn with_profiles_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.profiles_root = Some(path.into());
        self
    }

    /// Set the application bundle location
    pub fn with_bundle_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.bundle_path = path.into();
        self
    }

    /// Set the post-termination settle delay
    pub fn with_settle_delay_ms(mut self, millis: u64) -> Self {
        self.settle_delay_ms = millis;
        self
    }

    /// Replace the volatile live paths
    pub fn with_volatile<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.volatile = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the OS-level cache locations
    pub fn with_system_caches<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.system_caches = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Default config file location (`<config root>/profswitch/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("profswitch").join(CONFIG_FILE_NAME))
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load an explicit file, or the default file if present, or the defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(default) if default.is_file() => Self::from_file(&default),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProfileError::Configuration(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values that would make the engine touch paths it does not own
    pub fn validate(&self) -> Result<()> {
        if self.process_name.trim().is_empty() {
            return Err(ProfileError::Configuration("process_name is empty".into()));
        }
        #[cfg(target_os = "linux")]
        {
            if self.process_name.len() > MAX_PROCESS_NAME_LEN {
                return Err(ProfileError::Configuration(format!(
                    "process_name {:?} exceeds {MAX_PROCESS_NAME_LEN} bytes and can never match",
                    self.process_name
                )));
            }
        }
        if self.app_name.trim().is_empty() {
            return Err(ProfileError::Configuration("app_name is empty".into()));
        }
        if Path::new(&self.bundle_id)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(ProfileError::Configuration(format!(
                "bundle_id {:?} must be a single directory name",
                self.bundle_id
            )));
        }
        for entry in &self.volatile {
            check_relative(entry, "volatile")?;
        }
        for entry in &self.system_caches {
            if entry.trim().is_empty() {
                return Err(ProfileError::Configuration(
                    "system_caches contains an empty entry".into(),
                ));
            }
            let path = Path::new(entry);
            if path.components().any(|c| matches!(c, Component::ParentDir)) {
                return Err(ProfileError::Configuration(format!(
                    "system_caches entry {entry:?} must not contain '..'"
                )));
            }
        }
        Ok(())
    }
}

/// A volatile entry must name a path strictly below its root. `.` components
/// are dropped, so `./Cache` is `Cache` and `.` alone is rejected.
pub(crate) fn check_relative(entry: &str, field: &str) -> Result<PathBuf> {
    let path = Path::new(entry);
    if entry.trim().is_empty() {
        return Err(ProfileError::Configuration(format!(
            "{field} contains an empty entry"
        )));
    }
    if !path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(ProfileError::Configuration(format!(
            "{field} entry {entry:?} must be a relative path without '..'"
        )));
    }
    let normalized: PathBuf = path
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    if normalized.as_os_str().is_empty() {
        return Err(ProfileError::Configuration(format!(
            "{field} entry {entry:?} does not name a path below the live directory"
        )));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SwitchConfig::default();
        assert_eq!(config.process_name, DEFAULT_APP_NAME);
        assert_eq!(config.settle_delay_ms, 1000);
        assert!(config.volatile.iter().any(|v| v == "PersistentCache"));
        assert!(config.system_caches.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = SwitchConfig::new()
            .with_live_dir("/tmp/live")
            .with_profiles_root("/tmp/profiles")
            .with_settle_delay_ms(0)
            .with_volatile(["Cache"]);

        assert_eq!(config.live_dir, Some(PathBuf::from("/tmp/live")));
        assert_eq!(config.profiles_root, Some(PathBuf::from("/tmp/profiles")));
        assert_eq!(config.settle_delay_ms, 0);
        assert_eq!(config.volatile, vec!["Cache".to_string()]);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: SwitchConfig = toml::from_str(
            r#"
            process_name = "Slack"
            volatile = ["Cache", "Service Worker/CacheStorage"]
            "#,
        )
        .unwrap();

        assert_eq!(config.process_name, "Slack");
        assert_eq!(config.app_name, DEFAULT_APP_NAME);
        assert_eq!(config.volatile.len(), 2);
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let config = SwitchConfig::new().with_settle_delay_ms(250);

        config.to_file(&path).unwrap();
        let loaded = SwitchConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_rejects_escaping_volatile_paths() {
        for bad in ["../outside", "/etc", "Cache/../../x", "", ".", "./", "././"] {
            let config = SwitchConfig::new().with_volatile([bad]);
            assert!(
                matches!(config.validate(), Err(ProfileError::Configuration(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_parent_dir_in_system_cache() {
        let config = SwitchConfig::new().with_system_caches(["~/Library/../../etc"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_current_dir_components_are_dropped() {
        assert_eq!(
            check_relative("./Browser/./Cache", "volatile").unwrap(),
            PathBuf::from("Browser/Cache")
        );
    }

    #[test]
    fn test_bundle_id_must_be_a_plain_name() {
        for bad in ["..", "a/b", "/Library/Caches/x"] {
            let mut config = SwitchConfig::new();
            config.bundle_id = bad.to_string();
            assert!(config.validate().is_err(), "{bad:?} should be rejected");
        }
        let mut config = SwitchConfig::new();
        config.bundle_id = String::new();
        assert!(config.validate().is_ok());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_process_name_longer_than_comm_is_rejected() {
        let mut config = SwitchConfig::new();
        config.process_name = "spotify-launcher-x".to_string();
        assert!(matches!(
            config.validate(),
            Err(ProfileError::Configuration(_))
        ));
        config.process_name = "a".repeat(MAX_PROCESS_NAME_LEN);
        assert!(config.validate().is_ok());
    }
}
