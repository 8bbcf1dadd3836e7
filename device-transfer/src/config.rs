//! Configuration management for the transfer engine.
//!
//! Loads configuration from built-in defaults, an optional TOML file and
//! `DEVICE_TRANSFER__*` environment variable overrides, in that order.

use crate::utils::errors::{Result, TransferError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix, e.g. `DEVICE_TRANSFER__TRANSFER__POLL_INTERVAL_MS`.
const ENV_PREFIX: &str = "DEVICE_TRANSFER";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub transfer: TransferConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device-control executable (looked up on PATH when relative)
    pub executable: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Progress sampling cadence in milliseconds
    pub poll_interval_ms: u64,

    /// Upper bound for metadata queries such as the remote size estimate
    pub command_timeout_secs: u64,

    /// Time between the termination signal and a forced kill on cancel
    pub kill_grace_ms: u64,

    /// Suffix appended to a destination while it is staged aside
    pub backup_suffix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from(if cfg!(windows) { "adb.exe" } else { "adb" }),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            command_timeout_secs: 30,
            kill_grace_ms: 2000,
            backup_suffix: ".tmp_old".to_string(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl TransferConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

impl LogConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl Config {
    /// Load configuration, layering an optional TOML file and the environment
    /// over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path.to_path_buf())
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TransferError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| TransferError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.transfer.poll_interval_ms == 0 {
            return Err(TransferError::Config(
                "transfer.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.transfer.backup_suffix.is_empty() {
            return Err(TransferError::Config(
                "transfer.backup_suffix must not be empty".to_string(),
            ));
        }
        if self.device.executable.as_os_str().is_empty() {
            return Err(TransferError::Config(
                "device.executable must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::{Mutex, MutexGuard};
    use tempfile::TempDir;

    // Tests that read the process environment through `Config::load`
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.transfer.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.transfer.command_timeout(), Duration::from_secs(30));
        assert_eq!(config.transfer.backup_suffix, ".tmp_old");
        assert_eq!(config.log.level, "info");
        assert!(!config.log.is_json());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() -> Result<()> {
        let _env = env_lock();
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("transfer.toml");
        fs::write(
            &path,
            "[transfer]\npoll_interval_ms = 250\n\n[device]\nexecutable = \"/opt/platform-tools/adb\"\n",
        )?;

        let config = Config::load(Some(&path))?;
        assert_eq!(config.transfer.poll_interval_ms, 250);
        assert_eq!(config.transfer.command_timeout_secs, 30);
        assert_eq!(config.device.executable, PathBuf::from("/opt/platform-tools/adb"));
        assert_eq!(config.log.format, "text");
        Ok(())
    }

    #[test]
    fn test_load_layers_file() -> Result<()> {
        let _env = env_lock();
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("transfer.toml");
        fs::write(&path, "[log]\nlevel = \"debug\"\nformat = \"json\"\n")?;

        let config = Config::load(Some(&path))?;
        assert_eq!(config.log.level, "debug");
        assert!(config.log.is_json());
        assert_eq!(config.transfer.kill_grace_ms, 2000);
        Ok(())
    }

    #[test]
    fn test_zero_poll_interval_rejected() -> Result<()> {
        let _env = env_lock();
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("transfer.toml");
        fs::write(&path, "[transfer]\npoll_interval_ms = 0\n")?;

        match Config::load(Some(&path)) {
            Err(TransferError::Config(msg)) => assert!(msg.contains("poll_interval_ms")),
            other => panic!("expected config error, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_environment_overrides_file() -> Result<()> {
        let _env = env_lock();
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("transfer.toml");
        fs::write(&path, "[transfer]\npoll_interval_ms = 1000\nkill_grace_ms = 300\n")?;

        std::env::set_var("DEVICE_TRANSFER__TRANSFER__POLL_INTERVAL_MS", "250");
        let from_env = Config::load(None);
        let layered = Config::load(Some(&path));
        std::env::remove_var("DEVICE_TRANSFER__TRANSFER__POLL_INTERVAL_MS");

        let from_env = from_env?;
        assert_eq!(from_env.transfer.poll_interval(), Duration::from_millis(250));
        assert_eq!(from_env.transfer.backup_suffix, ".tmp_old");

        let layered = layered?;
        assert_eq!(layered.transfer.poll_interval_ms, 250);
        assert_eq!(layered.transfer.kill_grace_ms, 300);
        Ok(())
    }

    #[test]
    fn test_toml_round_trip_of_defaults() -> Result<()> {
        let rendered = Config::default().to_toml()?;
        assert!(rendered.contains("backup_suffix = \".tmp_old\""));
        let parsed: Config =
            toml::from_str(&rendered).map_err(|e| TransferError::Config(e.to_string()))?;
        assert_eq!(parsed.transfer.poll_interval_ms, 500);
        Ok(())
    }
}
