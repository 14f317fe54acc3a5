// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration of a provisioning run.
//!
//! Settings come from an optional TOML file with command line flags layered
//! on top. The private key password is only ever taken from the command
//! line.

use camino::{Utf8Path, Utf8PathBuf};
use certmfg_host::InterpreterSettings;
use clap::ValueEnum;
use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SDA_PIN: u8 = 21;
pub const DEFAULT_SCL_PIN: u8 = 22;
pub const DEFAULT_VALID_FOR_YEARS: u32 = 40;
pub const DEFAULT_OUTPUT_DIR: &str = "output_files";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
pub enum TargetChip {
    #[serde(rename = "esp32")]
    #[value(name = "esp32")]
    Esp32,
    #[serde(rename = "esp32s2")]
    #[value(name = "esp32s2")]
    Esp32s2,
    #[serde(rename = "esp32s3")]
    #[value(name = "esp32s3")]
    Esp32s3,
    #[serde(rename = "esp32c3")]
    #[value(name = "esp32c3")]
    Esp32c3,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("failed to parse {path}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
}

/// Everything a provisioning run needs to know.
#[derive(Debug)]
pub struct ProvisionConfig {
    /// Serial port the ESP device is attached to
    pub port: String,
    pub target_chip: TargetChip,
    pub signer_cert: Utf8PathBuf,
    pub signer_key: Utf8PathBuf,
    pub password: Option<SecretString>,
    pub i2c_sda_pin: u8,
    pub i2c_scl_pin: u8,
    /// Report the chip type and serial number, then stop
    pub print_chip_type: bool,
    pub valid_for_years: u32,
    /// Assume the device CLI is already up and skip waiting for its banner
    pub no_wait: bool,
    /// Permanently lock the certificate slots. There is no undo.
    pub lock_slots: bool,
    pub output_dir: Utf8PathBuf,
    pub interpreter: InterpreterSettings,
}

/// Settings that may come from either the configuration file or the command
/// line. Absent values fall through to the next layer.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub port: Option<String>,
    pub target_chip: Option<TargetChip>,
    pub signer_cert: Option<Utf8PathBuf>,
    pub signer_key: Option<Utf8PathBuf>,
    pub i2c_sda_pin: Option<u8>,
    pub i2c_scl_pin: Option<u8>,
    pub valid_for_years: Option<u32>,
    pub lock_slots: Option<bool>,
    pub output_dir: Option<Utf8PathBuf>,
    pub command_deadline_secs: Option<u64>,
}

/// Per-run switches that only make sense on the command line.
#[derive(Debug, Default)]
pub struct RunFlags {
    pub password: Option<SecretString>,
    pub print_chip_type: bool,
    pub no_wait: bool,
}

impl Settings {
    pub fn load(path: &Utf8Path) -> Result<Settings, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
                path: path.to_owned(),
                err,
            })?;
        toml::from_str(&contents).map_err(|err| ConfigError::Parse {
            path: path.to_owned(),
            err,
        })
    }

    /// Fill in anything unset here from `base`.
    pub fn layered_over(self, base: Settings) -> Settings {
        Settings {
            port: self.port.or(base.port),
            target_chip: self.target_chip.or(base.target_chip),
            signer_cert: self.signer_cert.or(base.signer_cert),
            signer_key: self.signer_key.or(base.signer_key),
            i2c_sda_pin: self.i2c_sda_pin.or(base.i2c_sda_pin),
            i2c_scl_pin: self.i2c_scl_pin.or(base.i2c_scl_pin),
            valid_for_years: self.valid_for_years.or(base.valid_for_years),
            lock_slots: self.lock_slots.or(base.lock_slots),
            output_dir: self.output_dir.or(base.output_dir),
            command_deadline_secs: self
                .command_deadline_secs
                .or(base.command_deadline_secs),
        }
    }

    pub fn resolve(self, flags: RunFlags) -> Result<ProvisionConfig, ConfigError> {
        let interpreter = InterpreterSettings {
            command_deadline: self
                .command_deadline_secs
                .map(Duration::from_secs),
            ..InterpreterSettings::default()
        };
        Ok(ProvisionConfig {
            port: self.port.ok_or(ConfigError::Missing("port"))?,
            target_chip: self
                .target_chip
                .ok_or(ConfigError::Missing("target_chip"))?,
            signer_cert: self
                .signer_cert
                .ok_or(ConfigError::Missing("signer_cert"))?,
            signer_key: self
                .signer_key
                .ok_or(ConfigError::Missing("signer_key"))?,
            password: flags.password,
            i2c_sda_pin: self.i2c_sda_pin.unwrap_or(DEFAULT_SDA_PIN),
            i2c_scl_pin: self.i2c_scl_pin.unwrap_or(DEFAULT_SCL_PIN),
            print_chip_type: flags.print_chip_type,
            valid_for_years: self
                .valid_for_years
                .unwrap_or(DEFAULT_VALID_FOR_YEARS),
            no_wait: flags.no_wait,
            lock_slots: self.lock_slots.unwrap_or(false),
            output_dir: self
                .output_dir
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_OUTPUT_DIR)),
            interpreter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> Settings {
        Settings {
            port: Some("/dev/ttyUSB0".into()),
            target_chip: Some(TargetChip::Esp32),
            signer_cert: Some("signer_cert.pem".into()),
            signer_key: Some("signer_key.pem".into()),
            ..Settings::default()
        }
    }

    #[test]
    fn defaults_match_the_factory_setup() {
        let config = required().resolve(RunFlags::default()).unwrap();
        assert_eq!(config.i2c_sda_pin, 21);
        assert_eq!(config.i2c_scl_pin, 22);
        assert_eq!(config.valid_for_years, 40);
        assert_eq!(config.output_dir, "output_files");
        assert!(!config.lock_slots);
        assert_eq!(config.interpreter.command_deadline, None);
    }

    #[test]
    fn command_line_wins_over_file() {
        let file: Settings = toml::from_str(
            r#"
            port = "/dev/ttyACM0"
            target_chip = "esp32s3"
            signer_cert = "ca/cert.pem"
            signer_key = "ca/key.pem"
            i2c_sda_pin = 4
            valid_for_years = 10
            lock_slots = true
            command_deadline_secs = 30
            "#,
        )
        .unwrap();
        let cli = Settings {
            port: Some("/dev/ttyUSB1".into()),
            valid_for_years: Some(5),
            ..Settings::default()
        };

        let config =
            cli.layered_over(file).resolve(RunFlags::default()).unwrap();
        assert_eq!(config.port, "/dev/ttyUSB1");
        assert_eq!(config.target_chip, TargetChip::Esp32s3);
        assert_eq!(config.signer_key, "ca/key.pem");
        assert_eq!(config.i2c_sda_pin, 4);
        assert_eq!(config.i2c_scl_pin, 22);
        assert_eq!(config.valid_for_years, 5);
        assert!(config.lock_slots);
        assert_eq!(
            config.interpreter.command_deadline,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn missing_required_setting() {
        let settings = Settings {
            signer_key: None,
            ..required()
        };
        assert!(matches!(
            settings.resolve(RunFlags::default()),
            Err(ConfigError::Missing("signer_key"))
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Settings>("baud = 9600").is_err());
        assert!(
            toml::from_str::<Settings>("target_chip = \"esp8266\"").is_err()
        );
    }

    #[test]
    fn load_reports_path() {
        let err = Settings::load(Utf8Path::new("/nonexistent/certmfg.toml"))
            .unwrap_err();
        assert_eq!(err.to_string(), "failed to read /nonexistent/certmfg.toml");
    }
}
