// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pulling values out of the free-form text that commands return.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Number of bytes in an ATECC608 serial number.
pub const SERIAL_LEN: usize = 9;

const CERTIFICATE_MARKER: &str = "Certificate:";

/// Nine hex byte pairs, optionally separated by whitespace.
static SERIAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"((?:[0-9a-fA-F]{2}\s*){9})").expect("valid serial regex")
});

// Greedy, so the block runs to the last end marker.
static CSR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"-+(?:BEGIN CERTIFICATE REQUEST)-+([\S\s]*)-+(?:END CERTIFICATE REQUEST)-+",
    )
    .expect("valid csr regex")
});

static CERT_LEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Cert Len:\s*([0-9]+)").expect("valid cert len regex")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("error parsing serial number")]
    SerialNumber,
    #[error("device returned invalid CSR")]
    Csr,
    #[error("no certificate in the response to `{command}`")]
    Certificate { command: String },
    #[error(
        "certificate from `{command}` is {actual} bytes, device reported {reported}"
    )]
    CertificateLength {
        command: String,
        reported: usize,
        actual: usize,
    },
}

/// Find the first run of nine hex byte pairs and return it as upper-case
/// hex.
pub fn serial_number(text: &str) -> Option<String> {
    let pairs = SERIAL_RE.captures(text)?.get(1)?.as_str();
    let digits: String =
        pairs.chars().filter(|c| !c.is_whitespace()).collect();
    let serial = hex::decode(digits).ok()?;
    (serial.len() == SERIAL_LEN).then(|| hex::encode_upper(serial))
}

/// Extract the PEM CSR, markers included, with surrounding whitespace
/// trimmed.
pub fn csr_block(text: &str) -> Option<String> {
    CSR_RE.find(text).map(|m| m.as_str().trim().to_string())
}

/// Decode the hex DER blob that follows `Certificate:` in the response to
/// one of the `get-tngtls-*-cert` commands.
pub fn certificate_der(
    command: &str,
    text: &str,
) -> Result<Vec<u8>, ExtractionError> {
    let missing = || ExtractionError::Certificate {
        command: command.to_string(),
    };
    let marker = text.find(CERTIFICATE_MARKER).ok_or_else(missing)?;
    let body = text[marker + CERTIFICATE_MARKER.len()..].trim_start();
    let end = body
        .find(|c: char| !c.is_ascii_hexdigit())
        .unwrap_or(body.len());
    if end == 0 {
        return Err(missing());
    }
    let der = hex::decode(&body[..end]).map_err(|_| missing())?;

    if let Some(reported) = reported_len(&text[..marker]) {
        if reported != der.len() {
            return Err(ExtractionError::CertificateLength {
                command: command.to_string(),
                reported,
                actual: der.len(),
            });
        }
    }
    Ok(der)
}

fn reported_len(text: &str) -> Option<usize> {
    CERT_LEN_RE.captures(text)?.get(1)?.as_str().parse().ok()
}
