// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Offline signing of device certificates for ATECC608 secure elements.

mod cert_def;
mod error;
mod keys;
mod sign;
mod validity;

pub use cert_def::{CertDefinition, CertKind, DateFormat, ElementLoc};
pub use error::SignerError;
pub use keys::{
    decode_pem, load_certificate, load_private_key, parse_certificate,
    SignerKey,
};
pub use sign::{serial_to_hex, sign_csr, sign_csr_at, ECDSA_WITH_SHA_256};
pub use validity::{add_years, issuance_time, x509_time};
