use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_DATA_DIR: &str = "VIDGEN_DATA_DIR";
pub const DEFAULT_RETENTION_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub jobs: JobsConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

/// Timing and retention knobs for generation jobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JobsConfig {
    /// Pause between two progress checkpoints.
    pub checkpoint_interval_ms: u64,
    /// How long a completed or failed job stays queryable.
    pub retention_secs: u64,
    /// How often the retention sweeper scans the registry.
    pub sweep_interval_secs: u64,
    /// Prefix for the simulated render output URLs.
    pub output_base_url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// SQLite file, resolved against the data directory when relative.
    pub database_file: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            jobs: JobsConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval_ms: 2000,
            retention_secs: DEFAULT_RETENTION_SECS,
            sweep_interval_secs: 300,
            output_base_url: "https://cdn.vidgen.local/videos".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            database_file: PathBuf::from("videos.db"),
        }
    }
}

impl JobsConfig {
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Zero would spin the sweeper, so it is raised to one second.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl AppConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config TOML: {}", path.display()))
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .context("config path does not have a parent directory")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory: {}", parent.display()))?;

        let encoded = toml::to_string_pretty(self).context("failed to serialize config TOML")?;
        fs::write(path, encoded)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;

        Ok(())
    }

    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        resolve_relative_to(data_dir, &self.storage.database_file)
    }
}

/// Resolve the data directory with 3-tier priority:
/// 1. CLI override if provided
/// 2. VIDGEN_DATA_DIR environment variable
/// 3. Default: ./data
pub fn data_dir(cli_override: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_override {
        return path.to_path_buf();
    }

    if let Some(env_dir) = env::var_os(ENV_DATA_DIR) {
        return PathBuf::from(env_dir);
    }

    PathBuf::from("data")
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE_NAME)
}

/// Creates the data directory and writes a default config.toml on first run.
pub fn initialize_data_dir(data_dir: &Path) -> Result<()> {
    if !data_dir.exists() {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
    }

    let cfg_path = config_path(data_dir);
    if !cfg_path.exists() {
        AppConfig::default().save_to_path(&cfg_path)?;
    }

    Ok(())
}

pub fn resolve_relative_to(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.jobs.checkpoint_interval(), Duration::from_secs(2));
        assert_eq!(cfg.jobs.retention(), Duration::from_secs(86_400));
        assert_eq!(cfg.jobs.sweep_interval(), Duration::from_secs(300));
        assert_eq!(cfg.storage.backend, StorageBackend::Sqlite);
        assert_eq!(cfg.storage.database_file, PathBuf::from("videos.db"));
    }

    #[test]
    fn partial_toml_keeps_defaults_for_missing_sections() {
        let raw = "[jobs]\ncheckpoint_interval_ms = 50\n\n[storage]\nbackend = \"memory\"\n";
        let cfg: AppConfig = toml::from_str(raw).expect("parse partial config");

        assert_eq!(cfg.jobs.checkpoint_interval_ms, 50);
        assert_eq!(cfg.jobs.retention_secs, DEFAULT_RETENTION_SECS);
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
        assert_eq!(cfg.server, ServerConfig::default());
    }

    #[test]
    fn zero_sweep_interval_is_raised_to_one_second() {
        let jobs = JobsConfig {
            sweep_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(jobs.sweep_interval(), Duration::from_secs(1));
    }

    #[test]
    fn load_from_missing_or_empty_file_returns_defaults() {
        let dir = tempdir().expect("tempdir");
        let missing = dir.path().join("absent.toml");
        assert_eq!(
            AppConfig::load_from_path(&missing).expect("load missing"),
            AppConfig::default()
        );

        let empty = dir.path().join("empty.toml");
        fs::write(&empty, "  \n").expect("write empty config");
        assert_eq!(
            AppConfig::load_from_path(&empty).expect("load empty"),
            AppConfig::default()
        );
    }

    #[test]
    fn load_reports_invalid_toml() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[server\nport = ").expect("write broken config");

        let err = AppConfig::load_from_path(&path).expect_err("broken TOML must fail");
        assert!(format!("{err:#}").contains("failed to parse config TOML"));
    }

    #[test]
    fn data_dir_uses_cli_override() {
        let result = data_dir(Some(Path::new("/custom")));
        assert_eq!(result, PathBuf::from("/custom"));
    }

    #[test]
    fn initialize_writes_default_config_once() {
        let dir = tempdir().expect("tempdir");
        let data = dir.path().join("data");

        initialize_data_dir(&data).expect("initialize data dir");
        let cfg_path = config_path(&data);
        assert!(cfg_path.exists());

        fs::write(&cfg_path, "[server]\nport = 9999\n").expect("write custom config");
        initialize_data_dir(&data).expect("initialize again");

        let reloaded = AppConfig::load_from_path(&cfg_path).expect("reload");
        assert_eq!(reloaded.server.port, 9999);
    }

    #[test]
    fn database_path_resolves_relative_to_data_dir() {
        let cfg = AppConfig::default();
        assert_eq!(
            cfg.database_path(Path::new("/srv/vidgen")),
            PathBuf::from("/srv/vidgen/videos.db")
        );

        let absolute = AppConfig {
            storage: StorageConfig {
                database_file: PathBuf::from("/var/lib/videos.db"),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            absolute.database_path(Path::new("/srv/vidgen")),
            PathBuf::from("/var/lib/videos.db")
        );
    }
}
