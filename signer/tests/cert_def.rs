// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use certmfg_signer::{
    decode_pem, sign_csr_at, CertDefinition, CertKind, DateFormat, ElementLoc,
    SignerError, SignerKey,
};
use certmfg_test_utils::{csr_pem, signing_key, TestPki};
use std::time::{Duration, SystemTime};
use x509_cert::der::{Decode, Encode};
use x509_cert::Certificate;

fn device_cert_der(pki: &TestPki) -> Vec<u8> {
    let csr = csr_pem(&signing_key(0x21), "CN=Device");
    // 2024-06-01T00:00:00Z
    let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_717_200_000);
    let pem = sign_csr_at(
        &csr,
        &pki.ca_cert,
        &SignerKey::from(pki.ca_key.clone()),
        "0123456789ABCDEF01",
        40,
        now,
    )
    .unwrap();
    decode_pem(pem.as_bytes(), "CERTIFICATE").unwrap()
}

fn slice(der: &[u8], loc: ElementLoc) -> &[u8] {
    &der[loc.offset..loc.offset + loc.count]
}

#[test]
fn encoding_is_byte_identical_across_runs() {
    let pki = TestPki::new();
    let der = device_cert_der(&pki);
    let a = CertDefinition::from_der(&der, CertKind::Device).unwrap();
    let b = CertDefinition::from_der(&der, CertKind::Device).unwrap();
    assert_eq!(a.encode(), b.encode());
}

#[test]
fn locations_point_at_the_right_bytes() {
    let pki = TestPki::new();
    let der = device_cert_der(&pki);
    let def = CertDefinition::from_der(&der, CertKind::Device).unwrap();
    let cert = Certificate::from_der(&der).unwrap();
    let tbs = &cert.tbs_certificate;

    assert_eq!(def.template, der);
    assert_eq!(slice(&der, def.tbs_cert), tbs.to_der().unwrap());
    assert_eq!(
        slice(&der, def.serial_number),
        [0x01u8, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01]
    );
    assert_eq!(slice(&der, def.issue_date), b"240601000000Z");
    assert_eq!(def.issue_date_format, DateFormat::Utc);
    assert_eq!(slice(&der, def.expire_date), b"20640601000000Z");
    assert_eq!(def.expire_date_format, DateFormat::Generalized);
    assert_eq!(def.expire_years, 40);

    let point = tbs.subject_public_key_info.subject_public_key.raw_bytes();
    assert_eq!(slice(&der, def.public_key), &point[1..]);
    assert_eq!(slice(&der, def.signature), cert.signature.raw_bytes());

    assert_eq!(def.subject_key_id.count, 20);
    assert_eq!(def.auth_key_id.count, 20);
    // The device cert's authority key id is the signer's subject key id.
    let signer_der = pki.ca_cert.to_der().unwrap();
    let signer = CertDefinition::from_der(&signer_der, CertKind::Signer)
        .unwrap();
    assert_eq!(
        slice(&der, def.auth_key_id),
        slice(&signer_der, signer.subject_key_id)
    );
}

#[test]
fn signer_definition_has_no_authority_key_id() {
    let pki = TestPki::new();
    let def =
        CertDefinition::from_pem(pki.ca_cert_pem().as_bytes(), CertKind::Signer)
            .unwrap();
    assert_eq!(def.auth_key_id, ElementLoc::default());
    assert_eq!(def.subject_key_id.count, 20);

    let text = String::from_utf8(def.encode()).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("cert_def:SIGNER_CERT"));
    assert_eq!(
        lines.next(),
        Some(format!("template_size:{}", def.template.len()).as_str())
    );
    assert!(text.contains("\nauth_key_id:0 0\n"));
    assert!(text.contains("\nissue_date:"));
    assert!(text.ends_with(&format!("{:02X}", def.template.last().unwrap())));
    assert!(!text.ends_with("\r\n"));
}

#[test]
fn garbage_is_rejected() {
    let err = CertDefinition::from_der(b"\x30\x03\x02\x01\x00", CertKind::Device)
        .unwrap_err();
    assert!(matches!(err, SignerError::Format(_)));
    let err = CertDefinition::from_pem(b"nope", CertKind::Device).unwrap_err();
    assert!(matches!(err, SignerError::Format(_)));
}

#[test]
fn serial_two_is_not_confused_with_the_version() {
    // The serial INTEGER `02 01 02` also occurs inside the version field.
    let pki = TestPki::new();
    let der = pki
        .issue(&signing_key(0x31), "CN=Intermediate", &[0x02])
        .to_der()
        .unwrap();
    let def = CertDefinition::from_der(&der, CertKind::Signer).unwrap();

    let tbs_value = def.tbs_cert.offset + 4;
    assert_eq!(slice(&der, def.tbs_cert)[..2], [0x30u8, 0x82]);
    assert_eq!(der[tbs_value..tbs_value + 5], [0xa0u8, 0x03, 0x02, 0x01, 0x02]);
    assert_eq!(def.serial_number.offset, tbs_value + 5 + 2);
    assert_eq!(slice(&der, def.serial_number), [0x02u8]);
    assert_eq!(slice(&der, def.issue_date), b"240101000000Z");
    assert_eq!(slice(&der, def.expire_date), b"491231000000Z");
    assert_eq!(def.expire_years, 25);
}
