use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("configuration file is not correct: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no monitored gpios specified")]
    NoMonitoredPins,

    #[error("qos must be 0, 1 or 2 (got {0})")]
    InvalidQos(u8),

    #[error("cannot open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "gpiomon", about = "GPIO edge to MQTT bridge for Raspberry Pi")]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, default_value = "./gpiomon.toml")]
    pub config: PathBuf,

    /// Verbosity: 0-fatal, 1-error, 2-warning, 3-info, 4-debug
    #[arg(short, long, default_value_t = 3)]
    pub verbose: u8,

    /// Log file name; logs to the console when omitted
    #[arg(short, long)]
    pub logfile: Option<PathBuf>,
}

/// Broker, identity and pin configuration loaded at startup. Missing or
/// malformed files are fatal; there is no runtime reload.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,
    pub password: String,

    /// Device id, also used as MQTT client id and base topic.
    #[serde(default = "default_id")]
    pub id: String,

    #[serde(default = "default_qos")]
    pub qos: u8,

    /// Monitored (edge-reporting) gpios.
    pub gpios_monitor: Vec<u8>,

    /// Settable (command-target) gpios.
    #[serde(default)]
    pub gpios_set: Vec<u8>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_id() -> String {
    "gpiomon".to_string()
}

fn default_qos() -> u8 {
    1
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        debug!(
            "loaded config: broker={}:{} id={} qos={} monitor={:?} set={:?}",
            config.host, config.port, config.id, config.qos, config.gpios_monitor, config.gpios_set,
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.gpios_monitor.is_empty() {
            return Err(ConfigError::NoMonitoredPins);
        }
        if self.qos > 2 {
            return Err(ConfigError::InvalidQos(self.qos));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<Config, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn full_config_parses() {
        let config = parse(
            r#"
            host = "broker.local"
            port = 8883
            username = "pi"
            password = "secret"
            id = "cellar"
            qos = 2
            gpios_monitor = [4, 17]
            gpios_set = [27]
            "#,
        )
        .unwrap();
        assert_eq!(config.host, "broker.local");
        assert_eq!(config.port, 8883);
        assert_eq!(config.id, "cellar");
        assert_eq!(config.qos, 2);
        assert_eq!(config.gpios_monitor, vec![4, 17]);
        assert_eq!(config.gpios_set, vec![27]);
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let config = parse(
            r#"
            username = "pi"
            password = "secret"
            gpios_monitor = [4]
            "#,
        )
        .unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1883);
        assert_eq!(config.id, "gpiomon");
        assert_eq!(config.qos, 1);
        assert!(config.gpios_set.is_empty());
    }

    #[test]
    fn empty_monitor_list_is_rejected() {
        let err = parse(
            r#"
            username = "pi"
            password = "secret"
            gpios_monitor = []
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::NoMonitoredPins));
    }

    #[test]
    fn out_of_range_qos_is_rejected() {
        let err = parse(
            r#"
            username = "pi"
            password = "secret"
            qos = 3
            gpios_monitor = [4]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidQos(3)));
    }

    #[test]
    fn malformed_toml_is_rejected() {
        assert!(matches!(
            parse("gpios_monitor = [4"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_fatal() {
        assert!(matches!(
            Config::load(Path::new("/nonexistent/gpiomon.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
