// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The provisioning sequence.
//!
//! Every step is a command followed by a status check, and any failure ends
//! the run on the spot. Nothing is rolled back: a key generated or a
//! certificate written before the failure stays on the chip.

use camino::{Utf8Path, Utf8PathBuf};
use certmfg_host::{
    CommandFailure, CommandInterpreter, InterpreterError, LineTransport,
};
use certmfg_signer::{
    load_private_key, parse_certificate, sign_csr, CertDefinition, CertKind,
    SignerError,
};
use slog::{error, info, o, warn, Logger};
use std::fmt::Display;
use thiserror::Error;

use crate::chip::{ChipType, UnknownChipType};
use crate::config::ProvisionConfig;
use crate::extract::{self, ExtractionError};
use crate::manifest::{self, ManifestEntry, ManifestError};

pub const DEVICE_CERT_FILE: &str = "device_cert.pem";

const DEVICE_CERT_SLOT: u8 = 0;
const SIGNER_CERT_SLOT: u8 = 1;
const DEVICE_KEY_SLOT: u8 = 0;

#[derive(Error, Debug)]
pub enum ProvisionError<T: Display> {
    #[error("device CLI did not start; is the manufacturing firmware flashed?")]
    DeviceNotReady,
    #[error("{0}")]
    Interpreter(InterpreterError<T>),
    #[error(transparent)]
    Command(#[from] CommandFailure),
    #[error(transparent)]
    UnknownChipType(#[from] UnknownChipType),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Signer(#[from] SignerError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("failed to access {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
}

impl<T: Display> From<InterpreterError<T>> for ProvisionError<T> {
    fn from(err: InterpreterError<T>) -> Self {
        ProvisionError::Interpreter(err)
    }
}

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Only the chip type and serial number were requested
    ChipInfo { chip: ChipType, serial: String },
    /// Device and signer certificates were written to a TrustCustom chip
    Provisioned { serial: String, device_cert: Utf8PathBuf },
    /// A pre-provisioned chip was recorded in a manifest
    Manifest {
        chip: ChipType,
        serial: String,
        manifest: Utf8PathBuf,
    },
}

/// Drives one device from power-on to provisioned.
pub struct ProvisioningWorkflow<T: LineTransport> {
    interpreter: CommandInterpreter<T>,
    config: ProvisionConfig,
    log: Logger,
}

impl<T: LineTransport> ProvisioningWorkflow<T> {
    pub fn new(
        transport: T,
        config: ProvisionConfig,
        log: &Logger,
    ) -> ProvisioningWorkflow<T> {
        let interpreter =
            CommandInterpreter::new(transport, config.interpreter.clone(), log);
        ProvisioningWorkflow {
            interpreter,
            config,
            log: log.new(o!("component" => "ProvisioningWorkflow")),
        }
    }

    /// Run the whole sequence. The transport is dropped, closing the
    /// session, however the run ends.
    pub fn run(mut self) -> Result<Outcome, ProvisionError<T::Error>> {
        if !self.config.no_wait && !self.interpreter.wait_for_ready()? {
            return Err(ProvisionError::DeviceNotReady);
        }

        let init = format!(
            "init {} {}",
            self.config.i2c_sda_pin, self.config.i2c_scl_pin
        );
        let output = self.exec_ok(&init, None)?;
        let chip = ChipType::classify(&output)?;
        info!(self.log, "ATECC608 chip is of type {chip}");

        match chip {
            ChipType::TrustCustom => self.provision_trust_custom(),
            ChipType::TrustAndGo | ChipType::TrustFlex => {
                self.generate_manifest(chip)
            }
        }
    }

    /// Execute `command` and insist that the device reports success.
    fn exec_ok(
        &mut self,
        command: &str,
        payload: Option<&[u8]>,
    ) -> Result<String, ProvisionError<T::Error>> {
        let result = self.interpreter.exec(command, payload)?;
        result.check_ok(command).map_err(|failure| {
            error!(
                self.log,
                "{failure}";
                "output" => failure.output.trim_end()
            );
            ProvisionError::Command(failure)
        })
    }

    fn read_serial_number(
        &mut self,
    ) -> Result<String, ProvisionError<T::Error>> {
        let output = self.exec_ok("print-chip-info", None)?;
        let serial = extract::serial_number(&output)
            .ok_or(ExtractionError::SerialNumber)?;
        info!(self.log, "Serial Number: {serial}");
        Ok(serial)
    }

    fn provision_trust_custom(
        mut self,
    ) -> Result<Outcome, ProvisionError<T::Error>> {
        let serial = self.read_serial_number()?;
        if self.config.print_chip_type {
            return Ok(Outcome::ChipInfo {
                chip: ChipType::TrustCustom,
                serial,
            });
        }

        // Load the signer before touching the chip so bad key material
        // cannot leave it with keys but no certificate.
        let signer_key = load_private_key(
            &self.config.signer_key,
            self.config.password.as_ref(),
        )?;
        let signer_cert_pem = read_file(&self.config.signer_cert)?;
        let signer_cert = parse_certificate(&signer_cert_pem)?;

        info!(self.log, "Provisioning the Device");
        self.exec_ok(&format!("generate-keys {DEVICE_KEY_SLOT}"), None)?;
        let output = self.exec_ok("generate-csr", None)?;
        let csr = extract::csr_block(&output).ok_or(ExtractionError::Csr)?;
        info!(self.log, "CSR obtained from device is:\n{csr}");

        let device_cert = sign_csr(
            &csr,
            &signer_cert,
            &signer_key,
            &serial,
            self.config.valid_for_years,
        )?;
        info!(self.log, "Device cert generated:\n{}", device_cert.trim());
        let device_cert_path = self.config.output_dir.join(DEVICE_CERT_FILE);
        write_file(&device_cert_path, device_cert.trim().as_bytes())?;
        info!(self.log, "Saved device cert to {device_cert_path}");

        let lock = u8::from(self.config.lock_slots);
        if self.config.lock_slots {
            warn!(
                self.log,
                "certificate slots will be permanently locked";
                "device_slot" => DEVICE_CERT_SLOT,
                "signer_slot" => SIGNER_CERT_SLOT
            );
        }

        info!(self.log, "program device cert");
        self.program_cert(
            device_cert.as_bytes(),
            CertKind::Device,
            DEVICE_CERT_SLOT,
            &format!("program-dev-cert {lock}"),
        )?;

        let signer_text = String::from_utf8_lossy(&signer_cert_pem);
        info!(self.log, "Signer cert is:\n{}", signer_text.trim());
        info!(self.log, "Programming signer certificate");
        self.program_cert(
            &signer_cert_pem,
            CertKind::Signer,
            SIGNER_CERT_SLOT,
            &format!("program-signer-cert {lock}"),
        )?;

        Ok(Outcome::Provisioned {
            serial,
            device_cert: device_cert_path,
        })
    }

    /// Send the certificate definition for `slot`, then the certificate
    /// itself.
    fn program_cert(
        &mut self,
        pem: &[u8],
        kind: CertKind,
        slot: u8,
        program_command: &str,
    ) -> Result<(), ProvisionError<T::Error>> {
        let cert_def = CertDefinition::from_pem(pem, kind)?.encode();
        self.exec_ok(
            &format!("provide-cert-def {slot} {}", cert_def.len()),
            Some(&cert_def),
        )?;

        let payload = trim_ascii(pem);
        self.exec_ok(
            &format!("{program_command} {}", payload.len()),
            Some(payload),
        )?;
        Ok(())
    }

    fn generate_manifest(
        mut self,
        chip: ChipType,
    ) -> Result<Outcome, ProvisionError<T::Error>> {
        let serial = self.read_serial_number()?;
        if self.config.print_chip_type {
            return Ok(Outcome::ChipInfo { chip, serial });
        }

        // The device certificate can only be read after the signer's.
        let root = self.read_tng_cert("get-tngtls-root-cert")?;
        let signer = self.read_tng_cert("get-tngtls-signer-cert")?;
        let device = self.read_tng_cert("get-tngtls-device-cert")?;

        let entry = ManifestEntry::new(chip, &serial, &device, &signer)?;
        let json = manifest::to_json(&[entry])?;

        let unique_id = serial.to_ascii_lowercase();
        let manifest_path = self
            .config
            .output_dir
            .join(format!("{unique_id}_manifest.json"));
        write_file(&manifest_path, json.as_bytes())?;

        let root_path =
            self.config.output_dir.join(format!("{unique_id}_root.pem"));
        let root_pem = pem_rfc7468::encode_string(
            "CERTIFICATE",
            pem_rfc7468::LineEnding::LF,
            &root,
        )
        .map_err(|e| ManifestError::Certificate(e.to_string()))?;
        write_file(&root_path, root_pem.as_bytes())?;
        info!(
            self.log,
            "Manifest written";
            "manifest" => %manifest_path,
            "root_cert" => %root_path
        );

        Ok(Outcome::Manifest {
            chip,
            serial,
            manifest: manifest_path,
        })
    }

    fn read_tng_cert(
        &mut self,
        command: &str,
    ) -> Result<Vec<u8>, ProvisionError<T::Error>> {
        let output = self.exec_ok(command, None)?;
        Ok(extract::certificate_der(command, &output)?)
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |pos| pos + 1);
    &bytes[start..end]
}

fn read_file<E: Display>(
    path: &Utf8Path,
) -> Result<Vec<u8>, ProvisionError<E>> {
    std::fs::read(path).map_err(|err| ProvisionError::Io {
        path: path.to_owned(),
        err,
    })
}

fn write_file<E: Display>(
    path: &Utf8Path,
    contents: &[u8],
) -> Result<(), ProvisionError<E>> {
    let io_err = |err: std::io::Error| ProvisionError::Io {
        path: path.to_owned(),
        err,
    };
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(io_err)?;
    }
    std::fs::write(path, contents).map_err(io_err)
}
