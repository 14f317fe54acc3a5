// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Manifests for pre-provisioned chips.
//!
//! Trust&Go and TrustFlex parts leave the factory with their keys and
//! certificates in place. Instead of provisioning them we record what they
//! carry in a manifest that cloud services use to register the device.

use base64ct::{Base64, Base64UrlUnpadded, Encoding};
use serde::Serialize;
use thiserror::Error;
use x509_cert::der::Decode;
use x509_cert::Certificate;

use crate::chip::ChipType;

pub const MANIFEST_VERSION: u32 = 1;
pub const MODEL: &str = "ATECC608";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("malformed certificate from device: {0}")]
    Certificate(String),
    #[error("device public key is not an uncompressed P-256 point")]
    PublicKey,
    #[error("failed to serialize manifest")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manufacturer {
    pub organization_name: String,
    pub organizational_unit_name: String,
}

/// A public key in JSON Web Key form, with its certificate chain.
#[derive(Debug, Clone, Serialize)]
pub struct Jwk {
    pub kid: String,
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
    /// Base64 DER certificates, device first
    pub x5c: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicKeySet {
    pub keys: Vec<Jwk>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub version: u32,
    pub model: String,
    pub part_number: String,
    pub manufacturer: Manufacturer,
    pub unique_id: String,
    pub public_key_set: PublicKeySet,
}

impl ManifestEntry {
    /// Describe a pre-provisioned chip from the certificates it reported.
    pub fn new(
        chip: ChipType,
        serial_hex: &str,
        device_cert: &[u8],
        signer_cert: &[u8],
    ) -> Result<ManifestEntry, ManifestError> {
        let cert = Certificate::from_der(device_cert)
            .map_err(|e| ManifestError::Certificate(e.to_string()))?;
        Certificate::from_der(signer_cert)
            .map_err(|e| ManifestError::Certificate(e.to_string()))?;

        let point = cert
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .raw_bytes();
        if point.len() != 65 || point[0] != 0x04 {
            return Err(ManifestError::PublicKey);
        }

        Ok(ManifestEntry {
            version: MANIFEST_VERSION,
            model: MODEL.to_string(),
            part_number: chip.part_number().to_string(),
            manufacturer: Manufacturer {
                organization_name: "Microchip Technology Inc".to_string(),
                organizational_unit_name: "Secure Products Group".to_string(),
            },
            unique_id: serial_hex.to_ascii_lowercase(),
            public_key_set: PublicKeySet {
                keys: vec![Jwk {
                    kid: "0".to_string(),
                    kty: "EC".to_string(),
                    crv: "P-256".to_string(),
                    x: Base64UrlUnpadded::encode_string(&point[1..33]),
                    y: Base64UrlUnpadded::encode_string(&point[33..]),
                    x5c: vec![
                        Base64::encode_string(device_cert),
                        Base64::encode_string(signer_cert),
                    ],
                }],
            },
        })
    }
}

/// Render a manifest holding `entries` as pretty printed JSON.
pub fn to_json(entries: &[ManifestEntry]) -> Result<String, ManifestError> {
    Ok(serde_json::to_string_pretty(entries)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_certificate() {
        let err =
            ManifestEntry::new(ChipType::TrustAndGo, "01", b"\x30\x00", b"")
                .unwrap_err();
        assert!(matches!(err, ManifestError::Certificate(_)));
    }

    #[test]
    fn empty_manifest_is_an_empty_list() {
        assert_eq!(to_json(&[]).unwrap(), "[]");
    }
}
