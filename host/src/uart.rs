// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Communicate with the manufacturing CLI over a UART.
//!
//! All commands sent to the secure element go over this channel, one line at
//! a time.

use serialport::{self, SerialPort};
use slog::{debug, info, o, warn, Logger};
use std::fmt::Display;
use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::transport::LineTransport;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Fixed delay between attempts to open the port.
const OPEN_RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct UartSettings {
    /// Path to the UART, e.g. `/dev/ttyUSB0`
    pub path: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl UartSettings {
    pub fn new(path: impl Into<String>) -> Self {
        UartSettings {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Error, Debug)]
#[error("failed to open uart at {path}: {err}")]
pub struct UartOpenError {
    path: String,
    #[source]
    err: serialport::Error,
}

#[derive(Error, Debug)]
#[error("uart read failed: {0}")]
pub struct UartReadError(#[from] io::Error);

pub struct Uart {
    inner: Box<dyn SerialPort>,
    read_timeout: Duration,
    write_timeout: Duration,
    log: Logger,
}

impl Uart {
    // Attach to a uart device
    pub fn attach(
        settings: &UartSettings,
        log: &Logger,
    ) -> Result<Uart, UartOpenError> {
        let inner = serialport::new(&settings.path, settings.baud_rate)
            .timeout(settings.read_timeout)
            .open()
            .map_err(|err| UartOpenError {
                path: settings.path.clone(),
                err,
            })?;
        Ok(Uart {
            inner,
            read_timeout: settings.read_timeout,
            write_timeout: settings.write_timeout,
            log: log.new(o!("component" => "Uart", "path" => settings.path.clone())),
        })
    }

    /// Attach to a uart device, retrying until it appears.
    ///
    /// There is no attempt limit: a board that is still enumerating or held
    /// by another process is simply waited for.
    pub fn open_with_retry(settings: &UartSettings, log: &Logger) -> Uart {
        info!(log, "Connecting to {}", settings.path);
        let uart = retry_until_ok(
            || Uart::attach(settings, log),
            OPEN_RETRY_BACKOFF,
            log,
        );
        info!(log, "Connected to {}", settings.path);
        uart
    }
}

/// Call `attempt` until it succeeds, sleeping `backoff` after every failure.
pub(crate) fn retry_until_ok<T, E: Display>(
    mut attempt: impl FnMut() -> Result<T, E>,
    backoff: Duration,
    log: &Logger,
) -> T {
    loop {
        match attempt() {
            Ok(val) => return val,
            Err(err) => {
                debug!(log, "attempt failed, retrying"; "err" => %err);
                thread::sleep(backoff);
            }
        }
    }
}

impl LineTransport for Uart {
    type Error = UartReadError;

    fn read_line(&mut self) -> Result<Vec<u8>, Self::Error> {
        let deadline = Instant::now() + self.read_timeout;
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(0) => {}
                Ok(_) => {
                    line.push(byte[0]);
                    if byte[0] == b'\n' {
                        return Ok(line);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    return Ok(line)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(UartReadError(e)),
            }
            if Instant::now() >= deadline {
                return Ok(line);
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        if let Err(e) = self.inner.set_timeout(self.write_timeout) {
            warn!(self.log, "failed to set write timeout"; "err" => %e);
        }
        let res = self.inner.write_all(bytes).and_then(|()| self.inner.flush());
        if let Err(e) = res {
            warn!(
                self.log,
                "write to uart failed";
                "len" => bytes.len(),
                "err" => %e
            );
        }
        if let Err(e) = self.inner.set_timeout(self.read_timeout) {
            warn!(self.log, "failed to restore read timeout"; "err" => %e);
        }
    }

    fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
        if let Err(e) = self.inner.set_timeout(timeout) {
            warn!(self.log, "failed to set read timeout"; "err" => %e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discard_logger() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    #[test]
    fn retry_keeps_going_until_success() {
        let mut attempts = 0;
        let val = retry_until_ok(
            || {
                attempts += 1;
                if attempts < 4 {
                    Err("port busy")
                } else {
                    Ok(attempts)
                }
            },
            Duration::ZERO,
            &discard_logger(),
        );
        assert_eq!(val, 4);
    }

    #[test]
    fn default_settings() {
        let settings = UartSettings::new("/dev/ttyUSB0");
        assert_eq!(settings.baud_rate, 115_200);
        assert_eq!(settings.read_timeout, Duration::from_secs(2));
        assert_eq!(settings.write_timeout, Duration::from_secs(1));
    }
}
