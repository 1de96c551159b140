//! Process control for the managed application
//!
//! Detection and termination match on the exact process name, which is
//! inherently racy (name collisions, zombies). Everything goes through the
//! [`ProcessController`] trait so the registry can be driven by a fake.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ProfileError, Result};
use crate::paths::Layout;

/// Detect, stop and start the managed application
pub trait ProcessController {
    /// Display name used in messages
    fn app_name(&self) -> &str;

    /// True if at least one matching process is alive
    fn is_running(&self) -> Result<bool>;

    /// Forcefully stop every matching process and wait a bounded settle
    /// delay. Succeeds when nothing was running.
    fn terminate(&self) -> Result<()>;

    /// Start the application detached and return without waiting for it
    fn launch(&self) -> Result<()>;
}

/// Controller matching processes by exact name
#[derive(Debug, Clone)]
pub struct NamedProcess {
    app_name: String,
    process_name: String,
    bundle_path: PathBuf,
    settle_delay: Duration,
}

impl NamedProcess {
    /// Create a controller
    pub fn new(
        app_name: impl Into<String>,
        process_name: impl Into<String>,
        bundle_path: impl Into<PathBuf>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            process_name: process_name.into(),
            bundle_path: bundle_path.into(),
            settle_delay,
        }
    }

    /// Controller for the application described by `layout`
    pub fn from_layout(layout: &Layout) -> Self {
        Self::new(
            layout.app_name.clone(),
            layout.process_name.clone(),
            layout.bundle_path.clone(),
            Duration::from_millis(layout.settle_delay_ms),
        )
    }

    /// Install location checked by `launch`
    pub fn bundle_path(&self) -> &Path {
        &self.bundle_path
    }

    fn launch_error(&self, reason: impl Into<String>) -> ProfileError {
        ProfileError::Launch {
            path: self.bundle_path.clone(),
            reason: reason.into(),
        }
    }
}

impl ProcessController for NamedProcess {
    fn app_name(&self) -> &str {
        &self.app_name
    }

    #[cfg(unix)]
    fn is_running(&self) -> Result<bool> {
        let status = Command::new("pgrep")
            .arg("-x")
            .arg(&self.process_name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| ProfileError::Process(format!("failed to run pgrep: {e}")))?;

        // On Linux `-x` compares against the 15-byte `comm` name; longer
        // names are rejected by `SwitchConfig::validate`.
        // pgrep: 0 = match, 1 = no match, anything else is a usage/system error.
        match status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(ProfileError::Process(format!(
                "pgrep exited with {status} while looking for {}",
                self.process_name
            ))),
        }
    }

    #[cfg(windows)]
    fn is_running(&self) -> Result<bool> {
        let image = format!("{}.exe", self.process_name);
        let output = Command::new("tasklist")
            .args(["/FI", &format!("IMAGENAME eq {image}"), "/NH"])
            .stderr(Stdio::null())
            .output()
            .map_err(|e| ProfileError::Process(format!("failed to run tasklist: {e}")))?;
        let listing = String::from_utf8_lossy(&output.stdout).to_lowercase();
        Ok(listing.contains(&image.to_lowercase()))
    }

    #[cfg(unix)]
    fn terminate(&self) -> Result<()> {
        let status = Command::new("pkill")
            .args(["-9", "-x"])
            .arg(&self.process_name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| ProfileError::Process(format!("failed to run pkill: {e}")))?;

        match status.code() {
            Some(0) => {
                info!(process = %self.process_name, "killed running instance");
                std::thread::sleep(self.settle_delay);
                Ok(())
            }
            Some(1) => {
                debug!(process = %self.process_name, "no running instance");
                Ok(())
            }
            _ => Err(ProfileError::Process(format!(
                "pkill exited with {status} while stopping {}",
                self.process_name
            ))),
        }
    }

    #[cfg(windows)]
    fn terminate(&self) -> Result<()> {
        if !self.is_running()? {
            debug!(process = %self.process_name, "no running instance");
            return Ok(());
        }
        let image = format!("{}.exe", self.process_name);
        Command::new("taskkill")
            .args(["/F", "/T", "/IM", &image])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| ProfileError::Process(format!("failed to run taskkill: {e}")))?;
        info!(process = %self.process_name, "killed running instance");
        std::thread::sleep(self.settle_delay);
        Ok(())
    }

    fn launch(&self) -> Result<()> {
        if !self.bundle_path.exists() {
            return Err(self.launch_error("application not found at its install location"));
        }

        let mut command = launch_command(&self.bundle_path);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        detach(&mut command);

        let child = command
            .spawn()
            .map_err(|e| self.launch_error(e.to_string()))?;
        info!(app = %self.app_name, pid = child.id(), "launched");
        Ok(())
    }
}

#[cfg(target_os = "macos")]
fn launch_command(bundle: &Path) -> Command {
    let mut command = Command::new("open");
    command.arg("-a").arg(bundle);
    command
}

#[cfg(not(target_os = "macos"))]
fn launch_command(bundle: &Path) -> Command {
    Command::new(bundle)
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

/// Controller that never sees a running app and never starts one
#[derive(Debug, Clone, Default)]
pub struct NoopController;

impl ProcessController for NoopController {
    fn app_name(&self) -> &str {
        "noop"
    }

    fn is_running(&self) -> Result<bool> {
        Ok(false)
    }

    fn terminate(&self) -> Result<()> {
        Ok(())
    }

    fn launch(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_controller() {
        let noop = NoopController;
        assert!(!noop.is_running().unwrap());
        assert!(noop.terminate().is_ok());
        assert!(noop.launch().is_ok());
    }

    #[test]
    fn test_launch_fails_when_bundle_missing() {
        let dir = tempfile::tempdir().unwrap();
        let controller = NamedProcess::new(
            "Ghost",
            "ghost-app",
            dir.path().join("Ghost.app"),
            Duration::ZERO,
        );

        let err = controller.launch().unwrap_err();
        assert!(matches!(err, ProfileError::Launch { .. }));
        assert!(err.to_string().contains("Ghost.app"));
    }

    #[cfg(unix)]
    #[test]
    fn test_unknown_process_is_not_running() {
        let controller = NamedProcess::new(
            "Nobody",
            "profswitch-no-such-proc",
            "/nonexistent",
            Duration::ZERO,
        );
        // pgrep may be unavailable in minimal containers; only check the happy path.
        if let Ok(running) = controller.is_running() {
            assert!(!running);
            assert!(controller.terminate().is_ok());
        }
    }
}
