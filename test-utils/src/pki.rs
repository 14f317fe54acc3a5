// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A throwaway P-256 PKI: a signer CA, device keys and CSRs.

use camino::{Utf8Path, Utf8PathBuf};
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use p256::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use std::str::FromStr;
use x509_cert::certificate::Version;
use x509_cert::der::asn1::{BitString, OctetString, SetOfVec, UtcTime};
use x509_cert::der::oid::{AssociatedOid, ObjectIdentifier};
use x509_cert::der::{DateTime, Decode, Encode, EncodePem};
use x509_cert::ext::pkix::{BasicConstraints, SubjectKeyIdentifier};
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::request::{self, CertReq, CertReqInfo};
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::time::{Time, Validity};
use x509_cert::{Certificate, TbsCertificate};

pub const ECDSA_WITH_SHA_256: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");

pub const CA_SUBJECT: &str = "CN=Test Signer CA,O=Certmfg Test";

/// A deterministic P-256 key. `seed` must be in `1..=0xfe`.
pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed; 32]).expect("valid scalar")
}

pub fn spki(key: &SigningKey) -> SubjectPublicKeyInfoOwned {
    let doc = key
        .verifying_key()
        .to_public_key_der()
        .expect("encode public key");
    SubjectPublicKeyInfoOwned::from_der(doc.as_bytes()).expect("decode spki")
}

fn ecdsa_with_sha256() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: ECDSA_WITH_SHA_256,
        parameters: None,
    }
}

fn utc(year: u16, month: u8, day: u8) -> Time {
    let dt = DateTime::new(year, month, day, 0, 0, 0).expect("valid date");
    Time::UtcTime(UtcTime::from_date_time(dt).expect("utc range"))
}

fn extension<T: Encode + AssociatedOid>(value: &T, critical: bool) -> Extension {
    Extension {
        extn_id: T::OID,
        critical,
        extn_value: OctetString::new(value.to_der().expect("encode ext"))
            .expect("octet string"),
    }
}

fn sign(key: &SigningKey, msg: &[u8]) -> BitString {
    let sig: Signature = key.sign(msg);
    BitString::from_bytes(sig.to_der().as_bytes()).expect("bit string")
}

/// A CA used to sign device certificates in tests
pub struct TestPki {
    pub ca_key: SigningKey,
    pub ca_cert: Certificate,
}

impl Default for TestPki {
    fn default() -> Self {
        Self::new()
    }
}

impl TestPki {
    pub fn new() -> TestPki {
        let ca_key = signing_key(0x5a);
        let name = Name::from_str(CA_SUBJECT).expect("ca name");
        let ca_cert = build_cert(
            &ca_key,
            name.clone(),
            name,
            spki(&ca_key),
            &[0x01],
            true,
        );
        TestPki { ca_key, ca_cert }
    }

    /// Issue a certificate for `subject_key` signed by this CA.
    pub fn issue(
        &self,
        subject_key: &SigningKey,
        subject: &str,
        serial: &[u8],
    ) -> Certificate {
        build_cert(
            &self.ca_key,
            self.ca_cert.tbs_certificate.subject.clone(),
            Name::from_str(subject).expect("subject name"),
            spki(subject_key),
            serial,
            false,
        )
    }

    pub fn ca_cert_pem(&self) -> String {
        self.ca_cert.to_pem(LineEnding::LF).expect("encode ca cert")
    }

    pub fn ca_key_pem(&self) -> String {
        self.ca_key
            .to_pkcs8_pem(LineEnding::LF)
            .expect("encode ca key")
            .to_string()
    }

    /// Write `signer_cert.pem` and an unencrypted PKCS#8
    /// `signer_key.pem` into `dir`.
    pub fn write_signer_files(
        &self,
        dir: &Utf8Path,
    ) -> (Utf8PathBuf, Utf8PathBuf) {
        let cert = dir.join("signer_cert.pem");
        let key = dir.join("signer_key.pem");
        std::fs::write(&cert, self.ca_cert_pem()).expect("write cert");
        std::fs::write(&key, self.ca_key_pem()).expect("write key");
        (cert, key)
    }

    /// Write the CA key as a password protected PKCS#8 file.
    pub fn write_encrypted_key(
        &self,
        dir: &Utf8Path,
        password: &str,
    ) -> Utf8PathBuf {
        let path = dir.join("signer_key.enc.pem");
        let pem = self
            .ca_key
            .to_pkcs8_encrypted_pem(&mut OsRng, password, LineEnding::LF)
            .expect("encrypt key");
        std::fs::write(&path, pem.as_bytes()).expect("write key");
        path
    }

    /// Write the CA key as a SEC1 `EC PRIVATE KEY` file.
    pub fn write_sec1_key(&self, dir: &Utf8Path) -> Utf8PathBuf {
        let path = dir.join("signer_key.sec1.pem");
        let secret = p256::SecretKey::from_bytes(&self.ca_key.to_bytes())
            .expect("secret key");
        let pem = secret.to_sec1_pem(LineEnding::LF).expect("encode sec1");
        std::fs::write(&path, pem.as_bytes()).expect("write key");
        path
    }
}

fn build_cert(
    issuer_key: &SigningKey,
    issuer: Name,
    subject: Name,
    subject_public_key_info: SubjectPublicKeyInfoOwned,
    serial: &[u8],
    ca: bool,
) -> Certificate {
    let digest =
        Sha256::digest(subject_public_key_info.subject_public_key.raw_bytes());
    let ski = SubjectKeyIdentifier(
        OctetString::new(&digest[..20]).expect("octet string"),
    );
    let tbs = TbsCertificate {
        version: Version::V3,
        serial_number: SerialNumber::new(serial).expect("serial"),
        signature: ecdsa_with_sha256(),
        issuer,
        validity: Validity {
            not_before: utc(2024, 1, 1),
            not_after: utc(2049, 12, 31),
        },
        subject,
        subject_public_key_info,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: Some(vec![
            extension(
                &BasicConstraints {
                    ca,
                    path_len_constraint: None,
                },
                true,
            ),
            extension(&ski, false),
        ]),
    };
    let signature = sign(issuer_key, &tbs.to_der().expect("encode tbs"));
    Certificate {
        tbs_certificate: tbs,
        signature_algorithm: ecdsa_with_sha256(),
        signature,
    }
}

/// A PEM CSR for `key`, as the device would print it.
pub fn csr_pem(key: &SigningKey, subject: &str) -> String {
    let info = CertReqInfo {
        version: request::Version::V1,
        subject: Name::from_str(subject).expect("subject name"),
        public_key: spki(key),
        attributes: SetOfVec::new(),
    };
    let signature = sign(key, &info.to_der().expect("encode csr info"));
    let req = CertReq {
        info,
        algorithm: ecdsa_with_sha256(),
        signature,
    };
    pem_rfc7468::encode_string(
        "CERTIFICATE REQUEST",
        LineEnding::LF,
        &req.to_der().expect("encode csr"),
    )
    .expect("pem csr")
}
