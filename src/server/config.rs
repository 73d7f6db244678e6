use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::simulator::SimulatorSettings;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("Failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub api_key: String,
    pub listen_addr: SocketAddr,
    pub machine_count: usize,
    pub update_interval_secs: u64,
    pub simulation_speed: f64,
    pub broadcast_interval_ms: u64,
    /// Zero disables the periodic status report.
    pub status_report_interval_secs: u64,
    pub simulation_seed: Option<u64>,
    pub log_dir: String,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    api_key: Option<String>,
    listen_addr: Option<String>,
    machine_count: Option<usize>,
    update_interval_secs: Option<u64>,
    simulation_speed: Option<f64>,
    broadcast_interval_ms: Option<u64>,
    status_report_interval_secs: Option<u64>,
    simulation_seed: Option<u64>,
    log_dir: Option<String>,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_machine_count() -> usize {
    10
}

fn default_update_interval_secs() -> u64 {
    5
}

fn default_simulation_speed() -> f64 {
    1.0
}

fn default_broadcast_interval_ms() -> u64 {
    1000
}

fn default_log_dir() -> String {
    "logs".to_string()
}

const MAX_UPDATE_INTERVAL_SECS: u64 = 86_400;
const MAX_BROADCAST_INTERVAL_MS: u64 = 3_600_000;
const MAX_STATUS_REPORT_INTERVAL_SECS: u64 = 86_400;

fn check_range(key: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key,
            reason: format!("{value} is outside {min}..={max}"),
        })
    }
}

impl ServerConfig {
    /// Loads configuration from an optional TOML file, then the environment.
    ///
    /// Environment variables (including those from `.env`) override the file.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let file_config = match config_path {
            Some(path) => Self::read_file(path)?,
            None => PartialServerConfig::default(),
        };
        let env_config: PartialServerConfig = envy::from_env::<PartialServerConfig>()?;

        Self::merge(env_config, file_config)
    }

    /// Defaults for everything but the key; for embedding the API without a config source.
    pub fn with_api_key(api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let layer = PartialServerConfig {
            api_key: Some(api_key.into()),
            ..Default::default()
        };
        Self::merge(layer, PartialServerConfig::default())
    }

    fn read_file(path_str: &str) -> Result<PartialServerConfig, ConfigError> {
        let path = Path::new(path_str);
        if !path.exists() {
            return Ok(PartialServerConfig::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path_str.to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path_str.to_string(),
            source,
        })
    }

    fn merge(env: PartialServerConfig, file: PartialServerConfig) -> Result<Self, ConfigError> {
        let api_key = env
            .api_key
            .or(file.api_key)
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::Missing("API_KEY"))?;

        let listen_addr = match env.listen_addr.or(file.listen_addr) {
            Some(raw) => raw.parse().map_err(|e| ConfigError::Invalid {
                key: "listen_addr",
                reason: format!("{raw:?}: {e}"),
            })?,
            None => default_listen_addr(),
        };

        let config = ServerConfig {
            api_key,
            listen_addr,
            machine_count: env.machine_count.or(file.machine_count).unwrap_or_else(default_machine_count),
            update_interval_secs: env
                .update_interval_secs
                .or(file.update_interval_secs)
                .unwrap_or_else(default_update_interval_secs),
            simulation_speed: env
                .simulation_speed
                .or(file.simulation_speed)
                .unwrap_or_else(default_simulation_speed),
            broadcast_interval_ms: env
                .broadcast_interval_ms
                .or(file.broadcast_interval_ms)
                .unwrap_or_else(default_broadcast_interval_ms),
            status_report_interval_secs: env
                .status_report_interval_secs
                .or(file.status_report_interval_secs)
                .unwrap_or(0),
            simulation_seed: env.simulation_seed.or(file.simulation_seed),
            log_dir: env.log_dir.or(file.log_dir).unwrap_or_else(default_log_dir),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.machine_count == 0 {
            return Err(ConfigError::Invalid {
                key: "machine_count",
                reason: "must be at least 1".to_string(),
            });
        }
        check_range("update_interval_secs", self.update_interval_secs, 1, MAX_UPDATE_INTERVAL_SECS)?;
        check_range("broadcast_interval_ms", self.broadcast_interval_ms, 1, MAX_BROADCAST_INTERVAL_MS)?;
        check_range(
            "status_report_interval_secs",
            self.status_report_interval_secs,
            0,
            MAX_STATUS_REPORT_INTERVAL_SECS,
        )?;
        if !self.simulation_speed.is_finite() || self.simulation_speed <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "simulation_speed",
                reason: format!("{} is not a positive number", self.simulation_speed),
            });
        }
        Ok(())
    }

    pub fn simulator_settings(&self) -> SimulatorSettings {
        SimulatorSettings {
            machine_count: self.machine_count,
            update_interval: Duration::from_secs(self.update_interval_secs),
            simulation_speed: self.simulation_speed,
            seed: self.simulation_seed,
        }
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    pub fn status_report_interval(&self) -> Option<Duration> {
        (self.status_report_interval_secs > 0).then(|| Duration::from_secs(self.status_report_interval_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file_layer(toml_src: &str) -> PartialServerConfig {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(toml_src.as_bytes()).unwrap();
        ServerConfig::read_file(file.path().to_str().unwrap()).unwrap()
    }

    #[test]
    fn test_defaults_apply() {
        let env = PartialServerConfig {
            api_key: Some("secret".to_string()),
            ..Default::default()
        };
        let config = ServerConfig::merge(env, PartialServerConfig::default()).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.machine_count, 10);
        assert_eq!(config.update_interval_secs, 5);
        assert_eq!(config.simulation_speed, 1.0);
        assert_eq!(config.broadcast_interval(), Duration::from_secs(1));
        assert_eq!(config.status_report_interval(), None);
        assert_eq!(config.log_dir, "logs");
    }

    #[test]
    fn test_env_overrides_file() {
        let file = file_layer(
            r#"
            api_key = "from-file"
            machine_count = 4
            listen_addr = "127.0.0.1:9000"
            status_report_interval_secs = 60
            "#,
        );
        let env = PartialServerConfig {
            api_key: Some("from-env".to_string()),
            machine_count: Some(6),
            ..Default::default()
        };
        let config = ServerConfig::merge(env, file).unwrap();
        assert_eq!(config.api_key, "from-env");
        assert_eq!(config.machine_count, 6);
        assert_eq!(config.listen_addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.status_report_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_missing_api_key() {
        let err = ServerConfig::merge(PartialServerConfig::default(), PartialServerConfig::default()).unwrap_err();
        assert_eq!(err.to_string(), "API_KEY is required");
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad_addr = PartialServerConfig {
            api_key: Some("k".to_string()),
            listen_addr: Some("not-an-addr".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            ServerConfig::merge(bad_addr, PartialServerConfig::default()),
            Err(ConfigError::Invalid { key: "listen_addr", .. })
        ));

        let no_machines = PartialServerConfig {
            api_key: Some("k".to_string()),
            machine_count: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            ServerConfig::merge(no_machines, PartialServerConfig::default()),
            Err(ConfigError::Invalid { key: "machine_count", .. })
        ));
    }

    #[test]
    fn test_rejects_oversized_intervals() {
        let cases = [
            (
                "update_interval_secs",
                PartialServerConfig {
                    update_interval_secs: Some(10_000_000_000_000),
                    ..Default::default()
                },
            ),
            (
                "broadcast_interval_ms",
                PartialServerConfig {
                    broadcast_interval_ms: Some(u64::MAX),
                    ..Default::default()
                },
            ),
            (
                "status_report_interval_secs",
                PartialServerConfig {
                    status_report_interval_secs: Some(MAX_STATUS_REPORT_INTERVAL_SECS + 1),
                    ..Default::default()
                },
            ),
        ];
        for (expected_key, mut layer) in cases {
            layer.api_key = Some("k".to_string());
            match ServerConfig::merge(layer, PartialServerConfig::default()) {
                Err(ConfigError::Invalid { key, .. }) => assert_eq!(key, expected_key),
                other => panic!("{expected_key}: expected Invalid, got {other:?}"),
            }
        }

        let at_limit = PartialServerConfig {
            api_key: Some("k".to_string()),
            update_interval_secs: Some(MAX_UPDATE_INTERVAL_SECS),
            ..Default::default()
        };
        assert!(ServerConfig::merge(at_limit, PartialServerConfig::default()).is_ok());
    }

    #[test]
    fn test_missing_file_is_empty_layer() {
        let layer = ServerConfig::read_file("/nonexistent/sensor-api.toml").unwrap();
        assert!(layer.api_key.is_none());
    }

    #[test]
    fn test_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"machine_count = \"ten\"").unwrap();
        let err = ServerConfig::read_file(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
