use anyhow::{Context, Result};
use protime_core::models::UserId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
#[cfg(unix)]
use std::{io::Write, os::unix::fs::OpenOptionsExt};

use crate::config::root_path;

/// Who is logged in, and the token the API expects from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub user_id: UserId,
    pub token: String,
}

fn secure_write(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    #[cfg(unix)]
    {
        std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?
            .write_all(content.as_bytes())?;
    }

    #[cfg(not(unix))]
    {
        std::fs::write(path, content)?;
    }

    Ok(())
}

pub fn session_path() -> Result<PathBuf> {
    Ok(root_path()?.join("session"))
}

pub fn load_session() -> Result<Option<Credentials>> {
    load_session_from(&session_path()?)
}

pub fn save_session(credentials: &Credentials) -> Result<()> {
    save_session_to(&session_path()?, credentials)
}

pub fn clear_session() -> Result<()> {
    clear_session_at(&session_path()?)
}

pub fn load_session_from(path: &Path) -> Result<Option<Credentials>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = std::fs::read_to_string(path).context("Failed to read session file")?;
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let credentials = serde_json::from_str(&raw).context("Failed to parse session file")?;
    Ok(Some(credentials))
}

pub fn save_session_to(path: &Path, credentials: &Credentials) -> Result<()> {
    let content = serde_json::to_string(credentials)?;
    secure_write(path, &content)
}

pub fn clear_session_at(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials {
            user_id: UserId::from("64f1c2e9a1b2c3d4e5f60718"),
            token: "secret".to_string(),
        }
    }

    #[test]
    fn session_round_trip_and_logout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("protime").join("session");

        assert_eq!(load_session_from(&path).unwrap(), None);
        save_session_to(&path, &credentials()).unwrap();
        assert_eq!(load_session_from(&path).unwrap(), Some(credentials()));

        clear_session_at(&path).unwrap();
        clear_session_at(&path).unwrap();
        assert_eq!(load_session_from(&path).unwrap(), None);
    }

    #[test]
    fn empty_session_file_means_logged_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session");
        std::fs::write(&path, "\n").unwrap();
        assert_eq!(load_session_from(&path).unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn session_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session");
        save_session_to(&path, &credentials()).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
