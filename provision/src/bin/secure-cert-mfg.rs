// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use camino::Utf8PathBuf;
use certmfg_host::{Uart, UartSettings};
use certmfg_provision::{
    Outcome, ProvisioningWorkflow, RunFlags, Settings, TargetChip,
};
use clap::{Parser, ValueEnum};
use secrecy::SecretString;
use slog::{info, o, warn, Drain, Level, Logger};

/// Provision an ESP32's ATECC608 with the device and signer certificates
/// required for TLS authentication.
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    /// UART the ESP device is connected to
    #[clap(short, long)]
    port: Option<String>,

    /// Target ESP32 series chip
    #[clap(long, value_enum, alias = "target_chip")]
    target_chip: Option<TargetChip>,

    /// Signer certificate (PEM)
    #[clap(long, value_name = "PATH")]
    signer_cert: Option<Utf8PathBuf>,

    /// Signer certificate private key (PEM)
    #[clap(long = "signer-cert-private-key", value_name = "PATH")]
    signer_key: Option<Utf8PathBuf>,

    /// Password of the signer private key
    #[clap(long = "pwd", visible_alias = "password")]
    password: Option<String>,

    /// ESP32 pin wired to the ATECC608 I2C SDA line [default: 21]
    #[clap(long)]
    i2c_sda_pin: Option<u8>,

    /// ESP32 pin wired to the ATECC608 I2C SCL line [default: 22]
    #[clap(long)]
    i2c_scl_pin: Option<u8>,

    /// Print the type of ATECC608 connected and exit
    #[clap(long = "type", visible_alias = "print-atecc608-type")]
    print_chip_type: bool,

    /// Years from now the device certificate is valid for [default: 40]
    #[clap(long)]
    valid_for_years: Option<u32>,

    /// Assume the device is already initialized
    #[clap(long)]
    no_wait: bool,

    #[clap(short, long, value_enum, default_value_t = LogLevel::Info)]
    log: LogLevel,

    /// Permanently lock the device and signer certificate slots of a
    /// TrustCustom chip
    #[clap(long, alias = "lock_slots")]
    lock_slots: bool,

    /// Where generated certificates and manifests are saved
    /// [default: output_files]
    #[clap(long, value_name = "DIR")]
    output_dir: Option<Utf8PathBuf>,

    /// Give up on a command that has not completed in this many seconds.
    /// By default commands are waited on indefinitely.
    #[clap(long, value_name = "SECS")]
    command_deadline_secs: Option<u64>,

    /// TOML file with defaults for the options above
    #[clap(long, value_name = "PATH")]
    config: Option<Utf8PathBuf>,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => Level::Debug,
            LogLevel::Info => Level::Info,
            LogLevel::Warning => Level::Warning,
            LogLevel::Error => Level::Error,
            LogLevel::Critical => Level::Critical,
        }
    }
}

impl Args {
    fn settings(&self) -> Settings {
        Settings {
            port: self.port.clone(),
            target_chip: self.target_chip,
            signer_cert: self.signer_cert.clone(),
            signer_key: self.signer_key.clone(),
            i2c_sda_pin: self.i2c_sda_pin,
            i2c_scl_pin: self.i2c_scl_pin,
            valid_for_years: self.valid_for_years,
            lock_slots: self.lock_slots.then_some(true),
            output_dir: self.output_dir.clone(),
            command_deadline_secs: self.command_deadline_secs,
        }
    }
}

fn root_logger(level: Level) -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = drain.filter_level(level).fuse();
    Logger::root(drain, o!())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log = root_logger(args.log.into());

    let file = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let flags = RunFlags {
        password: args.password.clone().map(SecretString::new),
        print_chip_type: args.print_chip_type,
        no_wait: args.no_wait,
    };
    let config = args.settings().layered_over(file).resolve(flags)?;
    info!(log, "Target chip: {:?}", config.target_chip);
    if config.lock_slots {
        warn!(
            log,
            "Slot locking requested: certificate slots will be permanently \
             locked and cannot be reprogrammed"
        );
    }

    let uart = Uart::open_with_retry(&UartSettings::new(&config.port), &log);
    let outcome = ProvisioningWorkflow::new(uart, config, &log).run()?;

    match outcome {
        Outcome::ChipInfo { chip, serial } => {
            info!(log, "ATECC608 type {chip}, serial number {serial}");
        }
        Outcome::Provisioned {
            serial,
            device_cert,
        } => {
            info!(
                log,
                "Device {serial} provisioned, certificate saved to {device_cert}"
            );
        }
        Outcome::Manifest {
            chip,
            serial,
            manifest,
        } => {
            info!(log, "{chip} device {serial} recorded in {manifest}");
        }
    }
    Ok(())
}
