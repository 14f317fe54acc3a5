// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("failed to read {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },

    /// The key material is malformed, or the password is missing or wrong.
    #[error("failed to load private key: {0}")]
    KeyLoad(String),

    /// A key, certificate or CSR that cannot be used for signing. Retrying
    /// with the same inputs will not help.
    #[error("unsupported input: {0}")]
    Format(String),
}

impl SignerError {
    pub(crate) fn format(msg: impl std::fmt::Display) -> SignerError {
        SignerError::Format(msg.to_string())
    }
}
