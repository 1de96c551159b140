//! Path resolution
//!
//! Turns a [`SwitchConfig`] plus the user's base directories into the fixed
//! set of locations the engine works on.

use std::path::{Path, PathBuf};

use crate::config::{check_relative, SwitchConfig};
use crate::error::{ProfileError, Result};
use crate::sync::Exclusions;

/// Directory name of the profiles root when not overridden
pub const PROFILES_DIR_SUFFIX: &str = "Profiles";

/// Platform base directories the layout is derived from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseLocations {
    /// User home directory
    pub home: PathBuf,
    /// Per-user application configuration root (Application Support on macOS)
    pub config_root: PathBuf,
    /// Per-user cache root
    pub cache_root: PathBuf,
}

impl BaseLocations {
    /// Discover the current user's base directories
    pub fn discover() -> Result<Self> {
        let dirs = directories::BaseDirs::new().ok_or_else(|| {
            ProfileError::Configuration("unable to determine the home directory".into())
        })?;
        Ok(Self {
            home: dirs.home_dir().to_path_buf(),
            config_root: dirs.config_dir().to_path_buf(),
            cache_root: dirs.cache_dir().to_path_buf(),
        })
    }
}

/// One entry of the volatile path set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolatilePath {
    /// Relative to the live state directory; excluded from mirrors and purged
    Live(PathBuf),
    /// OS-level cache location; purged only
    System(PathBuf),
}

/// Every location the engine reads or writes
#[derive(Debug, Clone)]
pub struct Layout {
    /// Directory the managed app reads and writes at runtime
    pub live_dir: PathBuf,
    /// Directory holding one subdirectory per profile
    pub profiles_root: PathBuf,
    /// Install location of the app
    pub bundle_path: PathBuf,
    /// Exact process name of the app
    pub process_name: String,
    /// Display name of the app
    pub app_name: String,
    /// Authoritative volatile path set
    pub volatile: Vec<VolatilePath>,
    /// Settle delay after termination
    pub settle_delay_ms: u64,
}

impl Layout {
    /// Resolve against the current user's directories
    pub fn resolve(config: &SwitchConfig) -> Result<Self> {
        let base = BaseLocations::discover()?;
        Self::from_base(config, &base)
    }

    /// Resolve against explicit base directories
    pub fn from_base(config: &SwitchConfig, base: &BaseLocations) -> Result<Self> {
        config.validate()?;

        let live_dir = match &config.live_dir {
            Some(path) => absolute(path, &base.home, "live_dir")?,
            None => base.config_root.join(&config.app_name),
        };
        let profiles_root = match &config.profiles_root {
            Some(path) => absolute(path, &base.home, "profiles_root")?,
            None => base
                .config_root
                .join(format!("{} {}", config.app_name, PROFILES_DIR_SUFFIX)),
        };
        let bundle_path = absolute(&config.bundle_path, &base.home, "bundle_path")?;

        if profiles_root.starts_with(&live_dir) || live_dir.starts_with(&profiles_root) {
            return Err(ProfileError::Configuration(format!(
                "profiles root {} and live directory {} must not contain each other",
                profiles_root.display(),
                live_dir.display()
            )));
        }

        let capacity = config.volatile.len() + config.system_caches.len() + 1;
        let mut volatile = Vec::with_capacity(capacity);
        for entry in &config.volatile {
            volatile.push(VolatilePath::Live(check_relative(entry, "volatile")?));
        }
        if !config.bundle_id.is_empty() {
            volatile.push(VolatilePath::System(base.cache_root.join(&config.bundle_id)));
        }
        for entry in &config.system_caches {
            let path = Path::new(entry);
            let resolved = if path.is_absolute() || path.starts_with("~") {
                expand_home(path, &base.home)
            } else {
                base.cache_root.join(path)
            };
            volatile.push(VolatilePath::System(resolved));
        }

        Ok(Self {
            live_dir,
            profiles_root,
            bundle_path,
            process_name: config.process_name.clone(),
            app_name: config.app_name.clone(),
            volatile,
            settle_delay_ms: config.settle_delay_ms,
        })
    }

    /// Relative live paths that every mirror must skip
    pub fn exclusions(&self) -> Exclusions {
        Exclusions::from_paths(self.volatile.iter().filter_map(|v| match v {
            VolatilePath::Live(rel) => Some(rel.clone()),
            VolatilePath::System(_) => None,
        }))
    }

    /// Absolute paths removed after activation
    pub fn purge_targets(&self) -> Vec<PathBuf> {
        self.volatile
            .iter()
            .map(|v| match v {
                VolatilePath::Live(rel) => self.live_dir.join(rel),
                VolatilePath::System(path) => path.clone(),
            })
            .collect()
    }

    /// Expected on-disk location of a profile, regardless of existence
    pub fn profile_dir(&self, name: &str) -> PathBuf {
        self.profiles_root.join(name)
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path, home: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

fn absolute(path: &Path, home: &Path, field: &str) -> Result<PathBuf> {
    let expanded = expand_home(path, home);
    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Err(ProfileError::Configuration(format!(
            "{field} must be absolute or start with '~/', got {}",
            path.display()
        )))
    }
}
