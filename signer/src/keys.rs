// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Loading of the signer's key and certificate from PEM files.

use camino::Utf8Path;
use p256::ecdsa::SigningKey;
use p256::NistP256;
use pkcs8::{AssociatedOid, EncryptedPrivateKeyInfo, PrivateKeyInfo};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use x509_cert::der::Decode;
use x509_cert::Certificate;
use zeroize::Zeroizing;

use crate::SignerError;

const PKCS8_LABEL: &str = "PRIVATE KEY";
const ENCRYPTED_PKCS8_LABEL: &str = "ENCRYPTED PRIVATE KEY";
const SEC1_LABEL: &str = "EC PRIVATE KEY";
const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// The P-256 key of the certificate authority that signs device certs.
pub struct SignerKey {
    key: SigningKey,
}

impl SignerKey {
    pub fn signing_key(&self) -> &SigningKey {
        &self.key
    }

    /// The public half as an uncompressed SEC1 point.
    pub fn public_key_sec1(&self) -> Vec<u8> {
        self.key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }
}

impl From<SigningKey> for SignerKey {
    fn from(key: SigningKey) -> Self {
        SignerKey { key }
    }
}

impl fmt::Debug for SignerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerKey").finish_non_exhaustive()
    }
}

fn read(path: &Utf8Path) -> Result<Vec<u8>, SignerError> {
    std::fs::read(path).map_err(|err| SignerError::Io {
        path: path.to_owned(),
        err,
    })
}

/// Decode a PEM document, checking its type label.
pub fn decode_pem(
    pem: &[u8],
    expected_label: &str,
) -> Result<Vec<u8>, SignerError> {
    let (type_label, der) = pem_rfc7468::decode_vec(pem).map_err(|e| {
        SignerError::Format(format!("failed to decode pem: {e}"))
    })?;
    if type_label != expected_label {
        return Err(SignerError::Format(format!(
            "improper pem label. Expected: {expected_label}, Actual: {type_label}"
        )));
    }
    Ok(der)
}

/// Load a P-256 private key from a PEM file.
///
/// PKCS#8 (plain or password protected) and SEC1 encodings are accepted.
/// A password is required for, and only used by, encrypted PKCS#8 keys.
pub fn load_private_key(
    path: &Utf8Path,
    password: Option<&SecretString>,
) -> Result<SignerKey, SignerError> {
    let pem = Zeroizing::new(read(path)?);
    let (type_label, der) = pem_rfc7468::decode_vec(&pem).map_err(|e| {
        SignerError::KeyLoad(format!("{path} is not a pem file: {e}"))
    })?;
    let der = Zeroizing::new(der);

    let key = match type_label {
        PKCS8_LABEL => from_pkcs8(&der)?,
        ENCRYPTED_PKCS8_LABEL => {
            let Some(password) = password else {
                return Err(SignerError::KeyLoad(format!(
                    "{path} is encrypted and no password was given"
                )));
            };
            let info = EncryptedPrivateKeyInfo::try_from(der.as_slice())
                .map_err(|e| SignerError::KeyLoad(e.to_string()))?;
            let doc = info.decrypt(password.expose_secret()).map_err(|_| {
                SignerError::KeyLoad(format!("failed to decrypt {path}"))
            })?;
            from_pkcs8(doc.as_bytes())?
        }
        SEC1_LABEL => {
            let secret = p256::SecretKey::from_sec1_der(&der)
                .map_err(|e| SignerError::KeyLoad(e.to_string()))?;
            SigningKey::from(secret)
        }
        other => {
            return Err(SignerError::Format(format!(
                "{path}: unsupported private key encoding `{other}`"
            )))
        }
    };
    Ok(SignerKey { key })
}

fn from_pkcs8(der: &[u8]) -> Result<SigningKey, SignerError> {
    let info = PrivateKeyInfo::try_from(der)
        .map_err(|e| SignerError::KeyLoad(e.to_string()))?;
    let curve = info.algorithm.parameters_oid().ok();
    if info.algorithm.oid != p256::elliptic_curve::ALGORITHM_OID
        || curve != Some(NistP256::OID)
    {
        return Err(SignerError::Format(format!(
            "only P-256 keys are supported, found algorithm {}",
            info.algorithm.oid
        )));
    }
    SigningKey::try_from(info).map_err(|e| SignerError::KeyLoad(e.to_string()))
}

/// Parse a PEM encoded X.509 certificate.
pub fn parse_certificate(pem: &[u8]) -> Result<Certificate, SignerError> {
    let der = decode_pem(pem, CERTIFICATE_LABEL)?;
    Certificate::from_der(&der).map_err(SignerError::format)
}

/// Load a PEM encoded X.509 certificate from `path`.
pub fn load_certificate(path: &Utf8Path) -> Result<Certificate, SignerError> {
    parse_certificate(&read(path)?)
}
