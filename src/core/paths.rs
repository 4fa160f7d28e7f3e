// src/core/paths.rs

use crate::constants::{APP_DIR_NAME, CONFIG_FILENAME, HISTORY_FILENAME};
use lazy_static::lazy_static;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

lazy_static! {
    static ref KUBESOL_CONFIG_DIR: Mutex<Option<PathBuf>> = Mutex::new(None);
}

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not find system config directory.")]
    ConfigDirNotFound,
    #[error("Could not create config directory at '{path}': {source}")]
    ConfigDirCreation {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Returns the KubeSol configuration directory (`~/.config/kubesol`),
/// creating it if needed. The path is computed once and cached.
pub fn get_config_dir() -> Result<PathBuf, PathError> {
    let mut cached = KUBESOL_CONFIG_DIR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(path) = &*cached {
        return Ok(path.clone());
    }

    let config_path = dirs::config_dir()
        .ok_or(PathError::ConfigDirNotFound)?
        .join(APP_DIR_NAME);

    if !config_path.exists() {
        fs::create_dir_all(&config_path).map_err(|e| PathError::ConfigDirCreation {
            path: config_path.display().to_string(),
            source: e,
        })?;
    }

    *cached = Some(config_path.clone());
    Ok(config_path)
}

/// Returns the path to the default `config.toml`.
pub fn get_config_file_path() -> Result<PathBuf, PathError> {
    get_config_dir().map(|dir| dir.join(CONFIG_FILENAME))
}

/// Returns the path to the line-editor history file.
pub fn get_history_path() -> Result<PathBuf, PathError> {
    get_config_dir().map(|dir| dir.join(HISTORY_FILENAME))
}

/// Expands `~` and environment variables in a user-supplied path.
pub fn expand_user_path(raw: &str) -> Result<PathBuf, String> {
    let expanded = shellexpand::full(raw)
        .map_err(|e| format!("Failed to expand path '{}': {}", raw, e))?;
    Ok(dunce::simplified(&PathBuf::from(expanded.into_owned())).to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_user_path_resolves_env_vars() {
        let home = std::env::var("HOME").unwrap();
        let path = expand_user_path("$HOME/scripts/job.py").unwrap();
        assert_eq!(path, PathBuf::from(home).join("scripts/job.py"));
    }

    #[test]
    fn test_expand_user_path_passes_plain_paths_through() {
        let path = expand_user_path("/tmp/code.py").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/code.py"));
    }
}
