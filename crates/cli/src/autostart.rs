//! Start-at-login registration through the per-user `Run` key.

use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::PathBuf;
use winreg::enums::{HKEY_CURRENT_USER, KEY_READ, KEY_SET_VALUE};
use winreg::RegKey;

const RUN_KEY: &str = r"Software\Microsoft\Windows\CurrentVersion\Run";
const VALUE_NAME: &str = "deskpin";
const DAEMON_EXE: &str = "deskpin.exe";

/// The daemon is expected next to the CLI executable.
fn daemon_path() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Failed to locate the CLI executable")?;
    let daemon = exe.with_file_name(DAEMON_EXE);
    if !daemon.exists() {
        anyhow::bail!("{} not found next to {}", DAEMON_EXE, exe.display());
    }
    Ok(daemon)
}

/// Register the daemon and return the command line written.
pub fn enable() -> Result<String> {
    let command = format!("\"{}\"", daemon_path()?.display());
    let (key, _) = RegKey::predef(HKEY_CURRENT_USER)
        .create_subkey(RUN_KEY)
        .context("Failed to open the Run key")?;
    key.set_value(VALUE_NAME, &command)
        .context("Failed to write the autostart entry")?;
    Ok(command)
}

/// Remove the entry. Returns whether one existed.
pub fn disable() -> Result<bool> {
    let key = RegKey::predef(HKEY_CURRENT_USER)
        .open_subkey_with_flags(RUN_KEY, KEY_SET_VALUE)
        .context("Failed to open the Run key")?;
    match key.delete_value(VALUE_NAME) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).context("Failed to remove the autostart entry"),
    }
}

pub fn status() -> Result<Option<String>> {
    let key = match RegKey::predef(HKEY_CURRENT_USER).open_subkey_with_flags(RUN_KEY, KEY_READ) {
        Ok(key) => key,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).context("Failed to open the Run key"),
    };
    match key.get_value::<String, _>(VALUE_NAME) {
        Ok(command) => Ok(Some(command)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).context("Failed to read the autostart entry"),
    }
}
