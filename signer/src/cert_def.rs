// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Certificate definitions.
//!
//! The secure element does not store whole certificates. It stores a
//! template certificate plus the location of every element that differs
//! between devices, and rebuilds the full certificate on demand. A
//! `CertDefinition` carries that description to the firmware, which turns it
//! into its native compressed certificate definition.
//!
//! The encoding is line oriented ASCII:
//!
//! ```text
//! cert_def:DEVICE_CERT
//! template_size:<bytes>
//! tbs_cert_loc:<offset> <count>
//! cert_sn:<offset> <count>
//! issue_date:<offset> <count> <rfc5280_utc|rfc5280_gen>
//! expire_date:<offset> <count> <rfc5280_utc|rfc5280_gen>
//! public_key:<offset> <count>
//! signature:<offset> <count>
//! subj_key_id:<offset> <count>
//! auth_key_id:<offset> <count>
//! expire_years:<years>
//! template:<upper-case hex DER>
//! ```
//!
//! Elements absent from the certificate are written as `0 0`.

use std::fmt;
use x509_cert::der::oid::AssociatedOid;
use x509_cert::der::{Decode, Header, Reader, SliceReader};
use x509_cert::ext::pkix::{AuthorityKeyIdentifier, SubjectKeyIdentifier};
use x509_cert::time::Time;
use x509_cert::Certificate;

use crate::keys::decode_pem;
use crate::SignerError;

/// Which slot a certificate definition describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertKind {
    Device,
    Signer,
}

impl CertKind {
    pub fn name(self) -> &'static str {
        match self {
            CertKind::Device => "DEVICE_CERT",
            CertKind::Signer => "SIGNER_CERT",
        }
    }
}

impl fmt::Display for CertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    Utc,
    Generalized,
}

impl DateFormat {
    fn name(self) -> &'static str {
        match self {
            DateFormat::Utc => "rfc5280_utc",
            DateFormat::Generalized => "rfc5280_gen",
        }
    }

    fn of(time: &Time) -> DateFormat {
        match time {
            Time::UtcTime(_) => DateFormat::Utc,
            Time::GeneralTime(_) => DateFormat::Generalized,
        }
    }
}

/// Location of an element within the template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElementLoc {
    pub offset: usize,
    pub count: usize,
}

impl ElementLoc {
    fn end(&self) -> usize {
        self.offset + self.count
    }
}

impl fmt::Display for ElementLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.offset, self.count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertDefinition {
    pub kind: CertKind,
    pub template: Vec<u8>,
    pub tbs_cert: ElementLoc,
    pub serial_number: ElementLoc,
    pub issue_date: ElementLoc,
    pub issue_date_format: DateFormat,
    pub expire_date: ElementLoc,
    pub expire_date_format: DateFormat,
    /// The X and Y coordinates of the subject's public key
    pub public_key: ElementLoc,
    pub signature: ElementLoc,
    pub subject_key_id: ElementLoc,
    pub auth_key_id: ElementLoc,
    pub expire_years: u32,
}

impl CertDefinition {
    /// Describe the certificate in a PEM document.
    pub fn from_pem(
        pem: &[u8],
        kind: CertKind,
    ) -> Result<CertDefinition, SignerError> {
        let der = decode_pem(pem, "CERTIFICATE")?;
        CertDefinition::from_der(&der, kind)
    }

    /// Describe a DER certificate, using it as its own template.
    pub fn from_der(
        der: &[u8],
        kind: CertKind,
    ) -> Result<CertDefinition, SignerError> {
        let cert = Certificate::from_der(der).map_err(SignerError::format)?;
        let tbs = &cert.tbs_certificate;

        let outer = Tlv::read(der, 0, der.len())?;
        let [tbs_tlv, _, signature_tlv] = outer.children(der)?[..] else {
            return Err(malformed("certificate"));
        };
        let fields = tbs_tlv.children(der)?;
        // Skip the optional explicitly tagged version.
        let has_version = fields.first().map(|f| f.tag(der)) == Some(0xa0);
        let first = usize::from(has_version);
        let field = |i: usize| {
            fields
                .get(first + i)
                .copied()
                .ok_or_else(|| malformed("tbs certificate"))
        };

        let serial_number = field(0)?.value();
        let [not_before, not_after] = field(3)?.children(der)?[..] else {
            return Err(malformed("validity"));
        };

        let point = tbs.subject_public_key_info.subject_public_key.raw_bytes();
        if point.len() != 65 || point[0] != 0x04 {
            return Err(SignerError::Format(
                "public key is not an uncompressed P-256 point".to_string(),
            ));
        }
        let [_, key_bits] = field(5)?.children(der)?[..] else {
            return Err(malformed("subject public key info"));
        };
        // Skip the unused-bits octet and the point format octet.
        let public_key = ElementLoc {
            offset: key_bits.value().offset + 2,
            count: 64,
        };

        let extensions = tbs.extensions.as_deref().unwrap_or_default();
        let ext_tlvs = match fields.iter().find(|f| f.tag(der) == 0xa3) {
            Some(wrapper) => match wrapper.children(der)?[..] {
                [list] => list.children(der)?,
                _ => return Err(malformed("extensions")),
            },
            None => Vec::new(),
        };
        if ext_tlvs.len() != extensions.len() {
            return Err(malformed("extensions"));
        }

        let mut subject_key_id = ElementLoc::default();
        let mut auth_key_id = ElementLoc::default();
        for (ext, ext_tlv) in extensions.iter().zip(&ext_tlvs) {
            let is_ski = ext.extn_id == SubjectKeyIdentifier::OID;
            if !is_ski && ext.extn_id != AuthorityKeyIdentifier::OID {
                continue;
            }
            let octets = *ext_tlv
                .children(der)?
                .last()
                .ok_or_else(|| malformed("extension"))?;
            let inner = octets.value();
            let inner = Tlv::read(der, inner.offset, inner.end())?;
            if is_ski {
                subject_key_id = inner.value();
            } else if let Some(id) = inner
                .children(der)?
                .into_iter()
                .find(|field| field.tag(der) == 0x80)
            {
                auth_key_id = id.value();
            }
        }

        let signature = {
            let bits = signature_tlv.value();
            if bits.count == 0 {
                return Err(malformed("signature"));
            }
            ElementLoc {
                offset: bits.offset + 1,
                count: bits.count - 1,
            }
        };

        let issued = tbs.validity.not_before.to_date_time();
        let expires = tbs.validity.not_after.to_date_time();
        let expire_years =
            u32::from(expires.year()).saturating_sub(u32::from(issued.year()));

        Ok(CertDefinition {
            kind,
            template: der.to_vec(),
            tbs_cert: tbs_tlv.whole(),
            serial_number,
            issue_date: not_before.value(),
            issue_date_format: DateFormat::of(&tbs.validity.not_before),
            expire_date: not_after.value(),
            expire_date_format: DateFormat::of(&tbs.validity.not_after),
            public_key,
            signature,
            subject_key_id,
            auth_key_id,
            expire_years,
        })
    }

    /// The wire form sent to the firmware with `provide-cert-def`.
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "cert_def:{}\n\
             template_size:{}\n\
             tbs_cert_loc:{}\n\
             cert_sn:{}\n\
             issue_date:{} {}\n\
             expire_date:{} {}\n\
             public_key:{}\n\
             signature:{}\n\
             subj_key_id:{}\n\
             auth_key_id:{}\n\
             expire_years:{}\n\
             template:{}",
            self.kind,
            self.template.len(),
            self.tbs_cert,
            self.serial_number,
            self.issue_date,
            self.issue_date_format.name(),
            self.expire_date,
            self.expire_date_format.name(),
            self.public_key,
            self.signature,
            self.subject_key_id,
            self.auth_key_id,
            self.expire_years,
            hex::encode_upper(&self.template),
        )
        .into_bytes()
    }
}

fn malformed(what: &str) -> SignerError {
    SignerError::Format(format!("malformed {what}"))
}

/// One DER element of the template, by absolute position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tlv {
    offset: usize,
    header_len: usize,
    len: usize,
}

impl Tlv {
    /// Read the element starting at `offset`, which must end by `end`.
    fn read(der: &[u8], offset: usize, end: usize) -> Result<Tlv, SignerError> {
        let bytes = der.get(offset..end).ok_or_else(|| malformed("element"))?;
        let mut reader = SliceReader::new(bytes).map_err(SignerError::format)?;
        let header = Header::decode(&mut reader).map_err(SignerError::format)?;
        let header_len =
            usize::try_from(reader.position()).map_err(SignerError::format)?;
        let len =
            usize::try_from(header.length).map_err(SignerError::format)?;
        if header_len + len > bytes.len() {
            return Err(malformed("element"));
        }
        Ok(Tlv {
            offset,
            header_len,
            len,
        })
    }

    /// The raw identifier octet.
    fn tag(&self, der: &[u8]) -> u8 {
        der[self.offset]
    }

    fn whole(&self) -> ElementLoc {
        ElementLoc {
            offset: self.offset,
            count: self.header_len + self.len,
        }
    }

    fn value(&self) -> ElementLoc {
        ElementLoc {
            offset: self.offset + self.header_len,
            count: self.len,
        }
    }

    /// The elements packed into this one's value, in order.
    fn children(&self, der: &[u8]) -> Result<Vec<Tlv>, SignerError> {
        let value = self.value();
        let mut children = Vec::new();
        let mut pos = value.offset;
        while pos < value.end() {
            let child = Tlv::read(der, pos, value.end())?;
            pos = child.whole().end();
            children.push(child);
        }
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_are_read_in_order() {
        // SEQUENCE { INTEGER 2, OCTET STRING 'ab' }
        let der = [0x30u8, 0x07, 0x02, 0x01, 0x02, 0x04, 0x02, 0xab, 0xcd];
        let outer = Tlv::read(&der, 0, der.len()).unwrap();
        assert_eq!(outer.whole(), ElementLoc { offset: 0, count: 9 });
        let children = outer.children(&der).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].value(), ElementLoc { offset: 4, count: 1 });
        assert_eq!(children[1].tag(&der), 0x04);
        assert_eq!(children[1].value(), ElementLoc { offset: 7, count: 2 });
    }

    #[test]
    fn long_form_lengths() {
        let mut der = vec![0x04u8, 0x81, 0x80];
        der.extend([0u8; 0x80]);
        let tlv = Tlv::read(&der, 0, der.len()).unwrap();
        assert_eq!(tlv.value(), ElementLoc { offset: 3, count: 0x80 });
    }

    #[test]
    fn truncated_elements_are_rejected() {
        assert!(Tlv::read(&[0x30], 0, 1).is_err());
        assert!(Tlv::read(&[0x30, 0x05, 0x02], 0, 3).is_err());
        // A child may not run past its parent.
        let der = [0x30u8, 0x02, 0x02, 0x05, 0x00];
        let outer = Tlv::read(&der, 0, 2 + 2).unwrap();
        assert!(outer.children(&der).is_err());
    }

    #[test]
    fn kind_names() {
        assert_eq!(CertKind::Device.to_string(), "DEVICE_CERT");
        assert_eq!(CertKind::Signer.to_string(), "SIGNER_CERT");
    }
}
