//! Reveal a directory in the platform file browser

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::process::{Command, Stdio};

#[cfg(target_os = "macos")]
const OPENER: &str = "open";

#[cfg(windows)]
const OPENER: &str = "explorer";

#[cfg(not(any(target_os = "macos", windows)))]
const OPENER: &str = "xdg-open";

pub fn reveal(path: &Path) -> Result<()> {
    let status = Command::new(OPENER)
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .with_context(|| format!("Failed to run {OPENER}"))?;

    // explorer.exe reports 1 even on success.
    if !status.success() && !cfg!(windows) {
        bail!("{OPENER} exited with {status} for {}", path.display());
    }
    Ok(())
}
