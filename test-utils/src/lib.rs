// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Convenience mechanisms for testing the provisioning tools without a board

mod device;
mod pki;

pub use device::{ScriptedDevice, ScriptedDeviceError};
pub use pki::{
    csr_pem, signing_key, spki, TestPki, CA_SUBJECT, ECDSA_WITH_SHA_256,
};

use slog::{o, Drain, Logger};

pub fn test_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, o!("ctx" => "test"))
}
