// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use sha2::{Digest, Sha256};
use std::time::SystemTime;
use x509_cert::certificate::Version;
use x509_cert::der::asn1::{BitString, OctetString};
use x509_cert::der::oid::{AssociatedOid, ObjectIdentifier};
use x509_cert::der::pem::LineEnding;
use x509_cert::der::{Decode, Encode, EncodePem};
use x509_cert::ext::pkix::{
    AuthorityKeyIdentifier, BasicConstraints, SubjectKeyIdentifier,
};
use x509_cert::ext::Extension;
use x509_cert::request::CertReq;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::time::Validity;
use x509_cert::{Certificate, TbsCertificate};

use crate::keys::{decode_pem, SignerKey};
use crate::validity::{add_years, issuance_time, x509_time};
use crate::SignerError;

pub const ECDSA_WITH_SHA_256: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");

const CSR_LABEL: &str = "CERTIFICATE REQUEST";

/// Length of a key identifier: a SHA-256 digest of the public key,
/// truncated to the size of the traditional SHA-1 identifier.
const KEY_ID_LEN: usize = 20;

fn ecdsa_with_sha256() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: ECDSA_WITH_SHA_256,
        parameters: None,
    }
}

/// Sign a PEM CSR, issuing the certificate as of now.
///
/// See [`sign_csr_at`].
pub fn sign_csr(
    csr_pem: &str,
    issuer_cert: &Certificate,
    issuer_key: &SignerKey,
    serial_hex: &str,
    validity_years: u32,
) -> Result<String, SignerError> {
    sign_csr_at(
        csr_pem,
        issuer_cert,
        issuer_key,
        serial_hex,
        validity_years,
        SystemTime::now(),
    )
}

/// Sign a PEM CSR into a PEM device certificate.
///
/// The certificate takes its subject and public key from the CSR, its issuer
/// from `issuer_cert` and its serial number from `serial_hex`. It is valid
/// from `now`, truncated to the hour, for `validity_years` calendar years.
///
/// ECDSA signatures are derived per RFC 6979, so for a fixed `now` the output
/// depends only on the inputs.
pub fn sign_csr_at(
    csr_pem: &str,
    issuer_cert: &Certificate,
    issuer_key: &SignerKey,
    serial_hex: &str,
    validity_years: u32,
    now: SystemTime,
) -> Result<String, SignerError> {
    let csr = parse_csr(csr_pem)?;
    verify_csr(&csr)?;
    check_issuer_key(issuer_cert, issuer_key)?;

    let not_before = issuance_time(now)?;
    let not_after = add_years(not_before, validity_years)?;

    let subject_public_key_info = csr.info.public_key;
    let extensions = vec![
        extension(
            &BasicConstraints {
                ca: false,
                path_len_constraint: None,
            },
            true,
        )?,
        extension(&key_identifier(&subject_public_key_info)?, false)?,
        extension(&authority_key_identifier(issuer_cert)?, false)?,
    ];

    let tbs = TbsCertificate {
        version: Version::V3,
        serial_number: parse_serial(serial_hex)?,
        signature: ecdsa_with_sha256(),
        issuer: issuer_cert.tbs_certificate.subject.clone(),
        validity: Validity {
            not_before: x509_time(not_before)?,
            not_after: x509_time(not_after)?,
        },
        subject: csr.info.subject,
        subject_public_key_info,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: Some(extensions),
    };

    let tbs_der = tbs.to_der().map_err(SignerError::format)?;
    let signature: Signature = issuer_key.signing_key().sign(&tbs_der);
    let cert = Certificate {
        tbs_certificate: tbs,
        signature_algorithm: ecdsa_with_sha256(),
        signature: BitString::from_bytes(signature.to_der().as_bytes())
            .map_err(SignerError::format)?,
    };
    cert.to_pem(LineEnding::LF).map_err(SignerError::format)
}

fn parse_csr(csr_pem: &str) -> Result<CertReq, SignerError> {
    let der = decode_pem(csr_pem.trim().as_bytes(), CSR_LABEL)?;
    CertReq::from_der(&der)
        .map_err(|e| SignerError::Format(format!("malformed CSR: {e}")))
}

/// Check the CSR's self-signature.
fn verify_csr(csr: &CertReq) -> Result<(), SignerError> {
    if csr.algorithm.oid != ECDSA_WITH_SHA_256 {
        return Err(SignerError::Format(format!(
            "unsupported CSR signature algorithm {}",
            csr.algorithm.oid
        )));
    }
    let spki = csr.info.public_key.to_der().map_err(SignerError::format)?;
    let key = VerifyingKey::from_public_key_der(&spki).map_err(|e| {
        SignerError::Format(format!("unsupported CSR public key: {e}"))
    })?;
    let signature = Signature::from_der(csr.signature.raw_bytes())
        .map_err(|e| SignerError::Format(format!("bad CSR signature: {e}")))?;
    let info = csr.info.to_der().map_err(SignerError::format)?;
    key.verify(&info, &signature).map_err(|_| {
        SignerError::Format("CSR signature does not verify".to_string())
    })
}

fn check_issuer_key(
    issuer_cert: &Certificate,
    issuer_key: &SignerKey,
) -> Result<(), SignerError> {
    let cert_key = issuer_cert
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .raw_bytes();
    if cert_key != issuer_key.public_key_sec1().as_slice() {
        return Err(SignerError::Format(
            "signer key does not match the signer certificate".to_string(),
        ));
    }
    Ok(())
}

/// Parse a hex serial number into a positive DER integer.
fn parse_serial(serial_hex: &str) -> Result<SerialNumber, SignerError> {
    let bytes = hex::decode(serial_hex.trim()).map_err(|e| {
        SignerError::Format(format!("invalid serial number `{serial_hex}`: {e}"))
    })?;

    let Some(first) = bytes.iter().position(|b| *b != 0) else {
        return Err(SignerError::Format(
            "serial number must be positive".to_string(),
        ));
    };
    let mut magnitude = Vec::with_capacity(bytes.len() + 1);
    if bytes[first] & 0x80 != 0 {
        magnitude.push(0);
    }
    magnitude.extend_from_slice(&bytes[first..]);
    SerialNumber::new(&magnitude).map_err(SignerError::format)
}

/// Render a certificate serial number as upper-case hex without the sign
/// byte.
pub fn serial_to_hex(serial: &SerialNumber) -> String {
    let bytes = serial.as_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    hex::encode_upper(&bytes[first..])
}

fn extension<T: Encode + AssociatedOid>(
    value: &T,
    critical: bool,
) -> Result<Extension, SignerError> {
    let der = value.to_der().map_err(SignerError::format)?;
    Ok(Extension {
        extn_id: T::OID,
        critical,
        extn_value: OctetString::new(der).map_err(SignerError::format)?,
    })
}

fn key_identifier(
    spki: &SubjectPublicKeyInfoOwned,
) -> Result<SubjectKeyIdentifier, SignerError> {
    let digest = Sha256::digest(spki.subject_public_key.raw_bytes());
    let id = OctetString::new(&digest[..KEY_ID_LEN])
        .map_err(SignerError::format)?;
    Ok(SubjectKeyIdentifier(id))
}

// Prefer the issuer's own subject key identifier so chains built by other
// tools still link up.
fn authority_key_identifier(
    issuer_cert: &Certificate,
) -> Result<AuthorityKeyIdentifier, SignerError> {
    let tbs = &issuer_cert.tbs_certificate;
    let issuer_ski = tbs
        .extensions
        .iter()
        .flatten()
        .find(|ext| ext.extn_id == SubjectKeyIdentifier::OID)
        .map(|ext| SubjectKeyIdentifier::from_der(ext.extn_value.as_bytes()))
        .transpose()
        .map_err(SignerError::format)?;
    let key_id = match issuer_ski {
        Some(ski) => ski.0,
        None => key_identifier(&tbs.subject_public_key_info)?.0,
    };
    Ok(AuthorityKeyIdentifier {
        key_identifier: Some(key_id),
        authority_cert_issuer: None,
        authority_cert_serial_number: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_gets_sign_byte_when_needed() {
        let serial = parse_serial("0123456789ABCDEF01").unwrap();
        assert_eq!(serial.as_bytes()[0], 0x01);
        assert_eq!(serial_to_hex(&serial), "0123456789ABCDEF01");

        let serial = parse_serial("ee0123456789abcdef").unwrap();
        assert_eq!(serial.as_bytes()[0], 0x00);
        assert_eq!(serial_to_hex(&serial), "EE0123456789ABCDEF");
    }

    #[test]
    fn malformed_serials_are_rejected() {
        for bad in ["", "0", "zz", "0000", "é1"] {
            assert!(
                matches!(parse_serial(bad), Err(SignerError::Format(_))),
                "{bad}"
            );
        }
    }
}
