// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt::Display;
use std::time::Duration;

/// The mechanism for exchanging lines of text with the manufacturing CLI
/// running on the device.
pub trait LineTransport {
    type Error: Display;

    /// Read bytes up to and including the next `\n`.
    ///
    /// If the read timeout elapses first, whatever arrived so far is
    /// returned, which may be nothing at all. Only failures of the underlying
    /// channel, not timeouts, are reported as errors.
    fn read_line(&mut self) -> Result<Vec<u8>, Self::Error>;

    /// Write `bytes` to the device.
    ///
    /// Writes are fire-and-forget: a failed or timed out write is not
    /// reported, it only shows up later as a missing response.
    fn write(&mut self, bytes: &[u8]);

    /// Change the timeout used by subsequent calls to `read_line`.
    fn set_read_timeout(&mut self, timeout: Duration);
}

impl<T: LineTransport + ?Sized> LineTransport for &mut T {
    type Error = T::Error;

    fn read_line(&mut self) -> Result<Vec<u8>, Self::Error> {
        (**self).read_line()
    }

    fn write(&mut self, bytes: &[u8]) {
        (**self).write(bytes)
    }

    fn set_read_timeout(&mut self, timeout: Duration) {
        (**self).set_read_timeout(timeout)
    }
}
