use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "notekeep";
const CONFIG_FILE: &str = "config.json";
const DEFAULT_LOG_FILTER: &str = "notekeep=info,notekeep_core=info";

/// Environment variable overriding the database location.
pub const DATABASE_ENV: &str = "NOTEKEEP_DATABASE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. Defaults to `notekeep.db` in the platform data directory.
    pub database_path: Option<PathBuf>,
    /// `tracing` filter used when `RUST_LOG` is not set.
    pub log_filter: Option<String>,
}

impl Config {
    /// Load configuration from the user's config directory.
    /// Returns default config if the file doesn't exist. A file that cannot be
    /// read or parsed also yields defaults, together with the error so the
    /// caller can log it once tracing is up.
    pub fn load() -> (Self, Option<anyhow::Error>) {
        match get_config_path() {
            Ok(path) => Self::load_or_default(&path),
            Err(e) => (Self::default(), Some(e)),
        }
    }

    fn load_or_default(path: &Path) -> (Self, Option<anyhow::Error>) {
        match Self::load_from(path) {
            Ok(config) => (config, None),
            Err(e) => (Self::default(), Some(e)),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;

        let config = serde_json::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Database location: `--database`, then `NOTEKEEP_DATABASE`, then the
    /// config file, then the platform default.
    pub fn database_path(&self, flag: Option<PathBuf>) -> Result<PathBuf> {
        let env = std::env::var_os(DATABASE_ENV).map(PathBuf::from);
        match pick_database_path(flag, env, self.database_path.clone()) {
            Some(path) => Ok(path),
            None => Ok(notekeep_core::db::default_database_path()?),
        }
    }

    pub fn log_filter(&self) -> String {
        std::env::var("RUST_LOG")
            .ok()
            .or_else(|| self.log_filter.clone())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
    }
}

fn pick_database_path(
    flag: Option<PathBuf>,
    env: Option<PathBuf>,
    file: Option<PathBuf>,
) -> Option<PathBuf> {
    [flag, env, file]
        .into_iter()
        .flatten()
        .find(|path| !path.as_os_str().is_empty())
}

fn get_config_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    Ok(dirs.config_dir().join(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "database_path": "/var/lib/notekeep/notes.db" }"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(
            config.database_path,
            Some(PathBuf::from("/var/lib/notekeep/notes.db"))
        );
        assert!(config.log_filter.is_none());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_malformed_file_falls_back_to_defaults_with_the_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "log_filter": 3 }"#).unwrap();

        let (config, error) = Config::load_or_default(&path);
        assert_eq!(config, Config::default());
        assert!(error.unwrap().to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_readable_file_loads_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "log_filter": "notekeep=debug" }"#).unwrap();

        let (config, error) = Config::load_or_default(&path);
        assert!(error.is_none());
        assert_eq!(config.log_filter.as_deref(), Some("notekeep=debug"));
    }

    #[test]
    fn test_flag_wins_over_env_and_file() {
        let picked = pick_database_path(
            Some(PathBuf::from("flag.db")),
            Some(PathBuf::from("env.db")),
            Some(PathBuf::from("file.db")),
        );
        assert_eq!(picked, Some(PathBuf::from("flag.db")));
    }

    #[test]
    fn test_env_wins_over_file() {
        let picked = pick_database_path(
            None,
            Some(PathBuf::from("env.db")),
            Some(PathBuf::from("file.db")),
        );
        assert_eq!(picked, Some(PathBuf::from("env.db")));
    }

    #[test]
    fn test_empty_values_are_skipped() {
        let picked = pick_database_path(None, Some(PathBuf::new()), Some(PathBuf::from("file.db")));
        assert_eq!(picked, Some(PathBuf::from("file.db")));
        assert_eq!(pick_database_path(None, None, None), None);
    }
}
