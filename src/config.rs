use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::scanner::DEFAULT_STALENESS_MINS;
use crate::schema::{SchemaError, TrackSchema};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Application configuration loaded from TOML config file.
/// All fields have defaults, so the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory of audio files to catalogue (flat, not recursed).
    pub library_dir: Option<PathBuf>,
    /// Where `report <timestamp>.jsonl` snapshots are written and read.
    pub report_dir: Option<PathBuf>,
    /// Directory for `music.log`. No file logging when unset.
    pub log_dir: Option<PathBuf>,
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// ID registry file. Defaults to `ids.json` in the report directory.
    pub registry_path: Option<PathBuf>,
    /// YAML track schema. Built-in schema when unset.
    pub schema_path: Option<PathBuf>,
    /// Files modified more recently than this many minutes are re-read
    /// even when cached.
    pub staleness_mins: u64,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            library_dir: None,
            report_dir: None,
            log_dir: None,
            db_path: None,
            registry_path: None,
            schema_path: None,
            staleness_mins: DEFAULT_STALENESS_MINS,
            workers: 0,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/tabulate/config.toml`.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load config from `path`. A missing file gives the defaults; a file
    /// that can't be read or parsed is an error, so the caller can report it
    /// once logging is up.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str::<AppConfig>(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Report directory: configured, else the XDG data directory.
    pub fn resolve_report_dir(&self) -> PathBuf {
        self.report_dir.clone().unwrap_or_else(default_report_dir)
    }

    pub fn resolve_db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(default_db_path)
    }

    pub fn resolve_registry_path(&self, report_dir: &Path) -> PathBuf {
        self.registry_path
            .clone()
            .unwrap_or_else(|| report_dir.join("ids.json"))
    }

    /// The track schema: from `schema_path` when set, else built in.
    pub fn load_schema(&self) -> Result<TrackSchema, SchemaError> {
        match &self.schema_path {
            Some(path) => {
                log::info!("Loading track schema from {}", path.display());
                TrackSchema::from_yaml_file(path)
            }
            None => Ok(TrackSchema::default()),
        }
    }

    /// Get the config file path.
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

fn data_dir() -> PathBuf {
    match ProjectDirs::from("", "", crate::APP_NAME) {
        Some(dirs) => dirs.data_dir().to_path_buf(),
        // Fallback: current directory
        None => PathBuf::from("."),
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    data_dir().join("tabulate.db")
}

pub fn default_report_dir() -> PathBuf {
    data_dir().join("reports")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(
            r#"
            library_dir = "/music"
            report_dir = "/music/reports"
            log_dir = "/var/log/tabulate"
            staleness_mins = 60
            workers = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.library_dir, Some(PathBuf::from("/music")));
        assert_eq!(config.staleness_mins, 60);
        assert_eq!(config.resolve_workers(), 4);
        assert_eq!(
            config.resolve_registry_path(Path::new("/music/reports")),
            PathBuf::from("/music/reports/ids.json")
        );
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let config: AppConfig = toml::from_str("library_dir = \"/music\"").unwrap();
        assert_eq!(config.staleness_mins, DEFAULT_STALENESS_MINS);
        assert_eq!(config.workers, 0);
        assert!(config.resolve_workers() >= 1);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_load_from_missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let missing = AppConfig::load_from(&tmp.path().join("nope.toml")).unwrap();
        assert_eq!(missing.staleness_mins, DEFAULT_STALENESS_MINS);
    }

    #[test]
    fn test_load_from_broken_file_is_reported() {
        let tmp = TempDir::new().unwrap();
        let broken = tmp.path().join("config.toml");
        std::fs::write(&broken, "workers = \"many\"").unwrap();
        let err = AppConfig::load_from(&broken).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_load_from_valid_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "staleness_mins = 30").unwrap();
        assert_eq!(AppConfig::load_from(&path).unwrap().staleness_mins, 30);
    }

    #[test]
    fn test_load_schema_from_yaml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("schema.yaml");
        std::fs::write(
            &path,
            "tracked:\n  - name: Rating\n    type: FLOAT\n",
        )
        .unwrap();
        let config = AppConfig {
            schema_path: Some(path),
            ..AppConfig::default()
        };
        let schema = config.load_schema().unwrap();
        assert_eq!(schema.tracked.len(), 1);
        assert_eq!(schema.columns, TrackSchema::default().columns);

        assert_eq!(AppConfig::default().load_schema().unwrap(), TrackSchema::default());
    }
}
