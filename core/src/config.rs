//! Environment and dotfile configuration.
//!
//! The transport credential comes from `TELEPTY_TELEGRAM_TOKEN`; the
//! authorized peer may come from `TELEPTY_CHAT_ID` when not given on the
//! command line. A `.env` file in the working or home directory is loaded
//! if present, but only when its permissions are owner-only.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;

use crate::error::BridgeError;
use crate::error::Result;

pub const TOKEN_ENV: &str = "TELEPTY_TELEGRAM_TOKEN";
pub const CHAT_ID_ENV: &str = "TELEPTY_CHAT_ID";

const DOTFILE_NAME: &str = ".env";

/// Loads the first dotfile found (working directory, then home). Returns
/// the loaded path, or `None` when no dotfile exists. A dotfile readable
/// by group or others is a hard configuration error.
pub fn load_dotfile() -> Result<Option<PathBuf>> {
    for dir in candidate_dirs() {
        let path = dir.join(DOTFILE_NAME);
        if !path.is_file() {
            continue;
        }
        require_private(&path)?;
        dotenvy::from_path(&path).map_err(|err| {
            BridgeError::config(format!("failed to load {}: {err}", path.display()))
        })?;
        tracing::debug!(path = %path.display(), "loaded dotfile");
        return Ok(Some(path));
    }
    Ok(None)
}

fn candidate_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::with_capacity(2);
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    if let Some(home) = std::env::home_dir() {
        dirs.push(home);
    }
    dirs
}

/// Rejects a credentials file unless its mode grants nothing to group or
/// others.
fn require_private(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path).map_err(|err| {
        BridgeError::config(format!("cannot stat {}: {err}", path.display()))
    })?;
    let mode = metadata.permissions().mode();
    if mode & 0o077 != 0 {
        return Err(BridgeError::config(format!(
            "{} is readable by others (mode {:03o}); run `chmod 600` on it",
            path.display(),
            mode & 0o777
        )));
    }
    Ok(())
}

/// The transport credential. Missing or empty is a configuration error.
pub fn telegram_token() -> Result<String> {
    match std::env::var(TOKEN_ENV) {
        Ok(token) if !token.trim().is_empty() => Ok(token),
        _ => Err(BridgeError::config(format!(
            "{TOKEN_ENV} is not set; export it or add it to a private .env file"
        ))),
    }
}

/// Optional authorized-peer override from the environment.
pub fn chat_id_override() -> Result<Option<i64>> {
    match std::env::var(CHAT_ID_ENV) {
        Ok(raw) => parse_chat_id(&raw).map(Some),
        Err(_) => Ok(None),
    }
}

pub fn parse_chat_id(raw: &str) -> Result<i64> {
    raw.trim().parse::<i64>().map_err(|_| {
        BridgeError::config(format!("chat id `{raw}` is not a valid integer"))
    })
}
