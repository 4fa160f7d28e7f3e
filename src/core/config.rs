// src/core/config.rs

use super::paths::{self, PathError};
use crate::constants::DEFAULT_NAMESPACE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("Could not read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not write config file '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Config file '{path}' is invalid: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Could not serialize the default config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Which cluster client handlers talk to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Shell out to `kubectl`.
    #[default]
    Kubectl,
    /// Keep everything in process memory (offline sessions and demos).
    Memory,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct JobSettings {
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
    pub python_image: String,
    pub pyspark_image: String,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            timeout_secs: 600,
            python_image: "python:3.9-slim".to_string(),
            pyspark_image: "apache/spark-py:latest".to_string(),
        }
    }
}

/// Contents of `config.toml`. Every field has a default.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub default_namespace: String,
    pub backend: Backend,
    pub kubectl_path: String,
    pub disabled_plugins: Vec<String>,
    pub log_level: String,
    pub confirm_destructive: bool,
    pub jobs: JobSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_namespace: DEFAULT_NAMESPACE.to_string(),
            backend: Backend::default(),
            kubectl_path: "kubectl".to_string(),
            disabled_plugins: Vec::new(),
            log_level: "warn".to_string(),
            confirm_destructive: true,
            jobs: JobSettings::default(),
        }
    }
}

/// Loads settings from `path`, or from the default location when `None`.
/// A missing file is created with the defaults.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => paths::get_config_file_path()?,
    };

    if !path.exists() {
        let defaults = Settings::default();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: path.clone(),
                source: e,
            })?;
        }
        let toml_string = toml::to_string_pretty(&defaults)?;
        fs::write(&path, toml_string).map_err(|e| ConfigError::Write {
            path: path.clone(),
            source: e,
        })?;
        log::debug!("Wrote default config to '{}'.", path.display());
        return Ok(defaults);
    }

    let content = fs::read_to_string(&path).map_err(|e| ConfigError::Read {
        path: path.clone(),
        source: e,
    })?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse { path, source: e })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        // --- Execute ---
        let settings = load_settings(Some(&path)).unwrap();

        // --- Assert ---
        assert_eq!(settings, Settings::default());
        assert!(path.exists());
        let reloaded = load_settings(Some(&path)).unwrap();
        assert_eq!(reloaded, settings);
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "backend = \"memory\"\ndisabled_plugins = [\"scripts\"]\n[jobs]\ntimeout_secs = 30\n",
        )
        .unwrap();

        let settings = load_settings(Some(&path)).unwrap();

        assert_eq!(settings.backend, Backend::Memory);
        assert_eq!(settings.disabled_plugins, vec!["scripts".to_string()]);
        assert_eq!(settings.jobs.timeout_secs, 30);
        assert_eq!(settings.jobs.poll_interval_secs, 10);
        assert_eq!(settings.default_namespace, "default");
    }

    #[test]
    fn test_invalid_file_reports_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "backend = 42").unwrap();

        let result = load_settings(Some(&path));

        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
