use std::path::{Path, PathBuf};

use asda_rs::cmds::DEFAULT_JOG_STEP;
use asda_rs::connection::ConnectionParameters;
use asda_rs::ConnectionError;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default configuration file, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "modbus_config.toml";
/// Prefix of environment overrides, e.g. `ASDA_MODBUS__PORT`
pub const ENV_PREFIX: &str = "ASDA_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file {} not found", .0.display())]
    NotFound(PathBuf),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] figment::Error),
    #[error(transparent)]
    Parameter(#[from] ConnectionError),
    #[error("jog.step must be greater than zero")]
    ZeroStep,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JogSettings {
    /// Speed change per `+` / `-` keypress, r/min
    pub step: u16,
}

impl Default for JogSettings {
    fn default() -> Self {
        Self {
            step: DEFAULT_JOG_STEP,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub modbus: ConnectionParameters,
    #[serde(default)]
    pub jog: JogSettings,
}

fn extract(figment: Figment) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = figment.extract()?;
    config.modbus.validate()?;
    if config.jog.step == 0 {
        return Err(ConfigError::ZeroStep);
    }
    Ok(config)
}

/// Load `path`, apply `ASDA_*` environment overrides and validate the result.
pub fn load(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    info!("Loading configuration from {}", path.display());
    let config = extract(
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__")),
    )?;
    debug!("Configuration: {:?}", config);
    Ok(config)
}

/// Starter configuration with factory settings
pub fn default_template() -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(&AppConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_complete_file() {
        let file = write_config(
            r#"
            [modbus]
            port = "/dev/ttyUSB1"
            slave_address = 3
            baudrate = 19200
            bytesize = 8
            parity = "E"
            stopbits = 1
            timeout = 0.5

            [modbus.retry]
            attempts = 2

            [jog]
            step = 50
            "#,
        );
        let config = load(file.path()).unwrap();
        assert_eq!(config.modbus.port, "/dev/ttyUSB1");
        assert_eq!(config.modbus.slave_address, 3);
        assert_eq!(config.modbus.baudrate, 19200);
        assert_eq!(config.modbus.retry.attempts, 2);
        assert_eq!(config.modbus.retry.backoff_ms, 50);
        assert_eq!(config.jog.step, 50);
    }

    #[test]
    fn optional_sections_fall_back_to_defaults() {
        let file = write_config(
            r#"
            [modbus]
            port = "COM3"
            slave_address = 1
            baudrate = 9600
            bytesize = 8
            parity = "E"
            stopbits = 1
            timeout = 1.0
            "#,
        );
        let config = load(file.path()).unwrap();
        assert_eq!(config.jog.step, DEFAULT_JOG_STEP);
        assert_eq!(config.modbus.retry.attempts, 0);
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(load(&missing), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn missing_key_is_invalid() {
        let file = write_config("[modbus]\nport = \"COM3\"\n");
        assert!(matches!(load(file.path()), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn out_of_range_value_is_rejected() {
        let file = write_config(
            r#"
            [modbus]
            port = "COM3"
            slave_address = 1
            baudrate = 9600
            bytesize = 8
            parity = "X"
            stopbits = 1
            timeout = 1.0
            "#,
        );
        assert!(matches!(load(file.path()), Err(ConfigError::Parameter(_))));
    }

    #[test]
    fn template_is_a_loadable_config() {
        let file = write_config(&default_template().unwrap());
        assert_eq!(load(file.path()).unwrap(), AppConfig::default());
    }
}
