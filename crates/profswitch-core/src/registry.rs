//! Profile registry
//!
//! Enumerates, validates and resolves named profiles under the profiles
//! root, and drives the save / activate / remove flows.
//!
//! Activation runs a fixed forward-only sequence of stages:
//!
//! ```text
//! Idle -> Terminating -> Synchronizing -> Purging -> Launching -> Idle
//! ```
//!
//! There is no retry. A failure while synchronizing leaves the live
//! directory partially mirrored and is reported as such.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{ProfileError, Result};
use crate::lock::ProfilesLock;
use crate::paths::Layout;
use crate::process::ProcessController;
use crate::purge::{purge, PurgeReport};
use crate::sync::{Exclusions, SyncPlan, SyncReport};

/// File recording the last activated profile, inside the profiles root
pub const ACTIVE_MARKER_FILE: &str = ".active.json";

lazy_static! {
    static ref PROFILE_NAME: Regex = Regex::new(r"^[A-Za-z0-9_-]+$").unwrap();
}

/// Reject anything but non-empty `[A-Za-z0-9_-]+`
pub fn validate_name(name: &str) -> Result<()> {
    if PROFILE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ProfileError::InvalidName(name.to_string()))
    }
}

/// Question the registry needs a human to answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmRequest {
    /// Replace the contents of an existing profile
    OverwriteProfile(String),
    /// Delete a profile
    RemoveProfile(String),
    /// Kill the running application so its state can be read
    StopApplication(String),
}

impl fmt::Display for ConfirmRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OverwriteProfile(name) => write!(f, "Profile '{name}' already exists. Overwrite it?"),
            Self::RemoveProfile(name) => write!(f, "Permanently delete profile '{name}'?"),
            Self::StopApplication(app) => write!(f, "{app} is running. Quit it now?"),
        }
    }
}

/// Injected confirmation capability
pub trait Confirm {
    /// Return true to proceed
    fn confirm(&self, request: &ConfirmRequest) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(&ConfirmRequest) -> bool,
{
    fn confirm(&self, request: &ConfirmRequest) -> bool {
        self(request)
    }
}

/// Stage of the activation flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationStage {
    Idle,
    Terminating,
    Synchronizing,
    Purging,
    Launching,
}

impl fmt::Display for ActivationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Terminating => "terminating",
            Self::Synchronizing => "synchronizing",
            Self::Purging => "purging",
            Self::Launching => "launching",
        };
        f.write_str(name)
    }
}

/// Activation switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivateOptions {
    /// Start the application once the profile is in place
    pub launch: bool,
}

impl Default for ActivateOptions {
    fn default() -> Self {
        Self { launch: true }
    }
}

/// What an activation did
#[derive(Debug, Clone, Serialize)]
pub struct ActivationReport {
    pub profile: String,
    pub sync: SyncReport,
    pub purge: PurgeReport,
    pub launched: bool,
}

/// Last activated profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveMarker {
    pub name: String,
    pub activated_at: DateTime<Utc>,
}

/// Named profiles under the profiles root
pub struct ProfileRegistry<'a> {
    layout: &'a Layout,
    process: &'a dyn ProcessController,
    exclusions: Exclusions,
}

impl fmt::Debug for ProfileRegistry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileRegistry")
            .field("profiles_root", &self.layout.profiles_root)
            .field("live_dir", &self.layout.live_dir)
            .field("app", &self.process.app_name())
            .finish()
    }
}

impl<'a> ProfileRegistry<'a> {
    /// Create a registry over `layout`, controlling the app through `process`
    pub fn new(layout: &'a Layout, process: &'a dyn ProcessController) -> Self {
        Self {
            exclusions: layout.exclusions(),
            layout,
            process,
        }
    }

    /// Resolved locations
    pub fn layout(&self) -> &Layout {
        self.layout
    }

    /// Profile names, sorted. Never fails: a missing or unreadable profiles
    /// root yields an empty list, unreadable entries are skipped.
    pub fn list(&self) -> Vec<String> {
        let root = &self.layout.profiles_root;
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %root.display(), error = %e, "cannot read profiles root");
                return Vec::new();
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable profiles root entry");
                    continue;
                }
            };
            match entry.file_type() {
                Ok(kind) if kind.is_dir() => {}
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            }
            match entry.file_name().into_string() {
                Ok(name) if validate_name(&name).is_ok() => names.push(name),
                Ok(name) => warn!(name = %name, "ignoring directory with an invalid profile name"),
                Err(raw) => warn!(name = ?raw, "ignoring directory with a non UTF-8 name"),
            }
        }
        names.sort();
        names
    }

    /// See [`validate_name`]
    pub fn validate_name(&self, name: &str) -> Result<()> {
        validate_name(name)
    }

    /// Expected location of `name`, whether or not it exists
    pub fn resolve(&self, name: &str) -> PathBuf {
        self.layout.profile_dir(name)
    }

    /// True if a profile directory named `name` exists
    pub fn exists(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        Ok(self.resolve(name).is_dir())
    }

    /// Diff that `save(name)` would apply
    pub fn plan_save(&self, name: &str) -> Result<SyncPlan> {
        validate_name(name)?;
        self.require_live_dir()?;
        SyncPlan::build(&self.layout.live_dir, &self.resolve(name), &self.exclusions)
    }

    /// Diff that `activate(name)` would apply to the live directory
    pub fn plan_activate(&self, name: &str) -> Result<SyncPlan> {
        let profile = self.existing(name)?;
        SyncPlan::build(&profile, &self.layout.live_dir, &self.exclusions)
    }

    /// Snapshot the live directory into profile `name`
    pub fn save(&self, name: &str, confirm: &dyn Confirm) -> Result<SyncReport> {
        validate_name(name)?;
        self.exclusions.validate()?;
        self.require_live_dir()?;

        let target = self.resolve(name);
        if target.exists() && !confirm.confirm(&ConfirmRequest::OverwriteProfile(name.to_string())) {
            return Err(ProfileError::Cancelled(format!("profile '{name}' left untouched")));
        }

        if self.process.is_running()? {
            let request = ConfirmRequest::StopApplication(self.process.app_name().to_string());
            if !confirm.confirm(&request) {
                return Err(ProfileError::ApplicationRunning(
                    self.process.app_name().to_string(),
                ));
            }
            self.stop_application()?;
        }

        let _lock = ProfilesLock::acquire(&self.layout.profiles_root)?;
        info!(profile = name, "saving live state");
        let report = SyncPlan::build(&self.layout.live_dir, &target, &self.exclusions)?.apply()?;
        info!(
            profile = name,
            copied = report.files_copied,
            removed = report.removed,
            "profile saved"
        );
        Ok(report)
    }

    /// Restore profile `name` into the live directory and restart the app
    pub fn activate(&self, name: &str, options: ActivateOptions) -> Result<ActivationReport> {
        let profile = self.existing(name)?;
        self.exclusions.validate()?;
        let _lock = ProfilesLock::acquire(&self.layout.profiles_root)?;

        self.enter(ActivationStage::Terminating, name);
        self.stop_application()?;

        self.enter(ActivationStage::Synchronizing, name);
        let sync = SyncPlan::build(&profile, &self.layout.live_dir, &self.exclusions)?.apply()?;
        self.write_marker(name)?;

        self.enter(ActivationStage::Purging, name);
        let purge = purge(&self.layout.purge_targets())?;

        let launched = if options.launch {
            self.enter(ActivationStage::Launching, name);
            self.process.launch()?;
            true
        } else {
            false
        };

        self.enter(ActivationStage::Idle, name);
        Ok(ActivationReport {
            profile: name.to_string(),
            sync,
            purge,
            launched,
        })
    }

    /// Delete profile `name`
    pub fn remove(&self, name: &str, confirm: &dyn Confirm) -> Result<()> {
        let profile = self.existing(name)?;
        if !confirm.confirm(&ConfirmRequest::RemoveProfile(name.to_string())) {
            return Err(ProfileError::Cancelled(format!("profile '{name}' kept")));
        }

        let _lock = ProfilesLock::acquire(&self.layout.profiles_root)?;
        let was_active = match self.active() {
            Ok(marker) => marker.map_or(false, |m| m.name == name),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable active marker");
                false
            }
        };
        fs::remove_dir_all(&profile)?;
        if was_active {
            self.clear_marker()?;
        }
        info!(profile = name, "profile removed");
        Ok(())
    }

    /// Last profile synchronized into the live directory, if recorded
    pub fn active(&self) -> Result<Option<ActiveMarker>> {
        match fs::read_to_string(self.marker_path()) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn existing(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        let path = self.resolve(name);
        if path.is_dir() {
            Ok(path)
        } else {
            Err(ProfileError::ProfileNotFound(name.to_string()))
        }
    }

    fn require_live_dir(&self) -> Result<()> {
        if self.layout.live_dir.is_dir() {
            Ok(())
        } else {
            Err(ProfileError::SourceMissing(self.layout.live_dir.clone()))
        }
    }

    /// Terminate the app and make sure it is gone before anything is written
    fn stop_application(&self) -> Result<()> {
        self.process.terminate()?;
        if self.process.is_running()? {
            return Err(ProfileError::ApplicationRunning(
                self.process.app_name().to_string(),
            ));
        }
        Ok(())
    }

    fn enter(&self, stage: ActivationStage, profile: &str) {
        info!(stage = %stage, profile, "activation");
    }

    fn marker_path(&self) -> PathBuf {
        self.layout.profiles_root.join(ACTIVE_MARKER_FILE)
    }

    fn write_marker(&self, name: &str) -> Result<()> {
        let marker = ActiveMarker {
            name: name.to_string(),
            activated_at: Utc::now(),
        };
        write_json(&self.marker_path(), &marker)
    }

    fn clear_marker(&self) -> Result<()> {
        match fs::remove_file(self.marker_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SwitchConfig;
    use crate::paths::BaseLocations;
    use crate::process::NoopController;
    use tempfile::TempDir;

    fn layout(root: &Path) -> Layout {
        let base = BaseLocations {
            home: root.to_path_buf(),
            config_root: root.join("config"),
            cache_root: root.join("cache"),
        };
        Layout::from_base(&SwitchConfig::default().with_settle_delay_ms(0), &base).unwrap()
    }

    fn yes(_: &ConfirmRequest) -> bool {
        true
    }

    fn no(_: &ConfirmRequest) -> bool {
        false
    }

    #[test]
    fn test_validate_name() {
        for good in ["work-2", "my_profile", "A", "123"] {
            assert!(validate_name(good).is_ok(), "{good} should pass");
        }
        for bad in ["", "my profile", "../x", "a/b", ".hidden", "naïve", "x\n"] {
            assert!(
                matches!(validate_name(bad), Err(ProfileError::InvalidName(_))),
                "{bad:?} should fail"
            );
        }
    }

    #[test]
    fn test_list_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let layout = layout(dir.path());
        let registry = ProfileRegistry::new(&layout, &NoopController);

        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_list_sorts_and_skips_files_and_bad_names() {
        let dir = TempDir::new().unwrap();
        let layout = layout(dir.path());
        for name in ["work", "alpha", "bad name"] {
            fs::create_dir_all(layout.profile_dir(name)).unwrap();
        }
        fs::write(layout.profiles_root.join(ACTIVE_MARKER_FILE), "{}").unwrap();
        let registry = ProfileRegistry::new(&layout, &NoopController);

        assert_eq!(registry.list(), vec!["alpha", "work"]);
    }

    #[test]
    fn test_list_of_unreadable_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let layout = layout(dir.path());
        fs::create_dir_all(layout.profiles_root.parent().unwrap()).unwrap();
        fs::write(&layout.profiles_root, "not a directory").unwrap();
        let registry = ProfileRegistry::new(&layout, &NoopController);

        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_resolve_does_not_require_existence() {
        let dir = TempDir::new().unwrap();
        let layout = layout(dir.path());
        let registry = ProfileRegistry::new(&layout, &NoopController);

        assert_eq!(registry.resolve("ghost"), layout.profiles_root.join("ghost"));
        assert!(!registry.exists("ghost").unwrap());
    }

    #[test]
    fn test_overwrite_declined_keeps_profile() {
        let dir = TempDir::new().unwrap();
        let layout = layout(dir.path());
        fs::create_dir_all(&layout.live_dir).unwrap();
        fs::write(layout.live_dir.join("config.json"), "new").unwrap();
        fs::create_dir_all(layout.profile_dir("work")).unwrap();
        fs::write(layout.profile_dir("work").join("config.json"), "old").unwrap();
        let registry = ProfileRegistry::new(&layout, &NoopController);

        let err = registry.save("work", &no).unwrap_err();
        assert!(matches!(err, ProfileError::Cancelled(_)));
        assert_eq!(
            fs::read_to_string(layout.profile_dir("work").join("config.json")).unwrap(),
            "old"
        );

        registry.save("work", &yes).unwrap();
        assert_eq!(
            fs::read_to_string(layout.profile_dir("work").join("config.json")).unwrap(),
            "new"
        );
    }

    #[test]
    fn test_activation_records_and_remove_clears_marker() {
        let dir = TempDir::new().unwrap();
        let layout = layout(dir.path());
        fs::create_dir_all(layout.profile_dir("work")).unwrap();
        fs::write(layout.profile_dir("work").join("config.json"), "{}").unwrap();
        let registry = ProfileRegistry::new(&layout, &NoopController);

        let report = registry
            .activate("work", ActivateOptions { launch: false })
            .unwrap();
        assert!(!report.launched);
        assert_eq!(registry.active().unwrap().unwrap().name, "work");

        registry.remove("work", &yes).unwrap();
        assert!(registry.active().unwrap().is_none());
        assert!(!layout.profile_dir("work").exists());
    }

    #[test]
    fn test_remove_with_corrupt_marker_succeeds() {
        let dir = TempDir::new().unwrap();
        let layout = layout(dir.path());
        fs::create_dir_all(layout.profile_dir("work")).unwrap();
        fs::write(layout.profiles_root.join(ACTIVE_MARKER_FILE), "{ not json").unwrap();
        let registry = ProfileRegistry::new(&layout, &NoopController);

        registry.remove("work", &yes).unwrap();
        assert!(!layout.profile_dir("work").exists());
        assert!(registry.active().is_err());
    }

    #[test]
    fn test_remove_declined_or_missing() {
        let dir = TempDir::new().unwrap();
        let layout = layout(dir.path());
        fs::create_dir_all(layout.profile_dir("keep")).unwrap();
        let registry = ProfileRegistry::new(&layout, &NoopController);

        assert!(matches!(
            registry.remove("keep", &no),
            Err(ProfileError::Cancelled(_))
        ));
        assert!(layout.profile_dir("keep").is_dir());
        assert!(matches!(
            registry.remove("ghost", &yes),
            Err(ProfileError::ProfileNotFound(_))
        ));
    }

    #[test]
    fn test_confirm_prompts_name_the_subject() {
        assert!(ConfirmRequest::OverwriteProfile("work".into())
            .to_string()
            .contains("'work'"));
        assert!(ConfirmRequest::StopApplication("Spotify".into())
            .to_string()
            .starts_with("Spotify"));
    }
}
