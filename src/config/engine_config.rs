use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use log::{LevelFilter, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::bluetooth::clamp_mtu;
use crate::core::bluetooth::constants::GATT_MAX_MTU_SIZE;
use crate::error::ConfigError;
use crate::utils::ensure_directory_exists;

pub const CONFIG_FILE_NAME: &str = "engine_config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `error`, `warn`, `info`, `debug` or `trace`. `RUST_LOG` still wins.
    pub log_level: String,

    /// Queue an MTU request right after service discovery succeeds.
    pub request_max_mtu_on_connect: bool,

    /// MTU asked for after connecting, clamped to [23, 517].
    pub preferred_mtu: u16,

    /// Force-fail an operation whose completion never arrives.
    /// `None` waits forever.
    pub operation_timeout_ms: Option<u64>,

    /// How often the event pump checks the pending operation's age.
    pub watchdog_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            log_level: "info".to_string(),
            request_max_mtu_on_connect: true,
            preferred_mtu: GATT_MAX_MTU_SIZE,
            operation_timeout_ms: None,
            watchdog_interval_ms: 250,
        }
    }
}

impl EngineConfig {
    /// Loads the config from `path`, falling back to defaults when it does not exist.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file_path = path.as_ref();
        let file_path_str = file_path.to_string_lossy().into_owned();

        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path_str);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(file_path)
            .await
            .map_err(ConfigError::from)?;
        let config: Self = serde_json::from_str(&config_json).map_err(ConfigError::from)?;
        config.log_level_filter()?;

        info!("Config loaded from {:?}", file_path_str);
        Ok(config)
    }

    /// Saves the config to `path`, creating its directory if needed.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file_path = path.as_ref();
        if let Some(dir) = file_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            ensure_directory_exists(dir).await?;
        }
        let file_path_str = file_path.to_string_lossy().into_owned();

        let config_json = match serde_json::to_string_pretty(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize engine config to JSON: {}", e);
                return Err(ConfigError::from(e).into());
            }
        };

        fs::write(file_path, config_json)
            .await
            .map_err(ConfigError::from)?;

        info!("Engine config saved to {:?}.", file_path_str);
        Ok(())
    }

    pub fn log_level_filter(&self) -> Result<LevelFilter, ConfigError> {
        LevelFilter::from_str(&self.log_level)
            .map_err(|_| ConfigError::LogLevel(self.log_level.clone()))
    }

    pub fn clamped_mtu(&self) -> u16 {
        clamp_mtu(self.preferred_mtu)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("meeting-signal-central-{}-{}", name, std::process::id()))
            .join(CONFIG_FILE_NAME)
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let config = EngineConfig::load(scratch_path("missing")).await.unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn save_then_load_keeps_values() {
        let path = scratch_path("save");
        let config = EngineConfig {
            log_level: "debug".to_string(),
            operation_timeout_ms: Some(5_000),
            ..EngineConfig::default()
        };

        config.save(&path).await.unwrap();
        let loaded = EngineConfig::load(&path).await.unwrap();

        assert_eq!(loaded, config);
        assert_eq!(loaded.operation_timeout(), Some(Duration::from_secs(5)));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn partial_file_fills_in_defaults() {
        let path = scratch_path("partial");
        ensure_directory_exists(path.parent().unwrap()).await.unwrap();
        std::fs::write(&path, r#"{ "preferred_mtu": 9999 }"#).unwrap();

        let loaded = EngineConfig::load(&path).await.unwrap();

        assert_eq!(loaded.clamped_mtu(), 517);
        assert_eq!(loaded.log_level, "info");
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let config = EngineConfig {
            log_level: "chatty".to_string(),
            ..EngineConfig::default()
        };
        assert!(config.log_level_filter().is_err());
        assert_eq!(
            EngineConfig::default().log_level_filter().unwrap(),
            LevelFilter::Info
        );
    }
}
