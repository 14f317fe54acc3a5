// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use slog::{debug, info, o, warn, Logger};
use std::fmt::Display;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::response::{CommandResult, MissingStatus, ResponseParser};
use crate::transport::LineTransport;

pub const READY_MARKER: &str = "CLI started";

#[derive(Debug, Clone)]
pub struct InterpreterSettings {
    /// Read timeout applied while a command is in flight
    pub command_read_timeout: Duration,

    /// Pause between a command line and its payload, giving the device time
    /// to switch into receive mode
    pub payload_settle: Duration,

    /// How long `wait_for_ready` polls for the CLI banner
    pub ready_window: Duration,

    /// Upper bound on a whole command exchange.
    ///
    /// `None` waits for the terminator forever. Slow operations such as slot
    /// locking can take a while, and each individual read is still bounded
    /// by `command_read_timeout`.
    pub command_deadline: Option<Duration>,
}

impl Default for InterpreterSettings {
    fn default() -> Self {
        InterpreterSettings {
            command_read_timeout: Duration::from_secs(3),
            payload_settle: Duration::from_millis(100),
            ready_window: Duration::from_secs(20),
            command_deadline: None,
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum InterpreterError<T: Display> {
    #[error("transport error: {0}")]
    Transport(T),
    #[error("response to `{command}` ended before a status line was seen")]
    ProtocolViolation { command: String },
    #[error("no complete response to `{command}` within {deadline:?}")]
    DeadlineExceeded { command: String, deadline: Duration },
}

/// Drives the line-oriented command protocol of the manufacturing CLI.
///
/// The interpreter is stateless with respect to the device: it does not track
/// which commands have already run, it only turns one command into one
/// `CommandResult`.
pub struct CommandInterpreter<T: LineTransport> {
    transport: T,
    settings: InterpreterSettings,
    log: Logger,
}

impl<T: LineTransport> CommandInterpreter<T> {
    pub fn new(
        transport: T,
        settings: InterpreterSettings,
        log: &Logger,
    ) -> CommandInterpreter<T> {
        CommandInterpreter {
            transport,
            settings,
            log: log.new(o!("component" => "CommandInterpreter")),
        }
    }

    /// Poll the device output for the CLI banner.
    ///
    /// Returns `false` once `ready_window` has elapsed without seeing it. The
    /// window is only checked between reads, so the actual wait can overrun
    /// it by one read timeout.
    pub fn wait_for_ready(&mut self) -> Result<bool, InterpreterError<T::Error>> {
        info!(self.log, "Wait for init");
        let start = Instant::now();
        loop {
            let raw = self
                .transport
                .read_line()
                .map_err(InterpreterError::Transport)?;
            if !raw.is_empty() {
                match std::str::from_utf8(&raw) {
                    Ok(line) => info!(self.log, "{}", line.trim_end()),
                    Err(_) => info!(self.log, "{:02x?}", raw),
                }
            }
            if contains(&raw, READY_MARKER.as_bytes()) {
                info!(self.log, "Connected to CLI");
                return Ok(true);
            }
            if start.elapsed() >= self.settings.ready_window {
                info!(self.log, "connection timed out");
                return Ok(false);
            }
        }
    }

    /// Send `command`, optionally followed by `payload`, and collect the
    /// device's response.
    pub fn exec(
        &mut self,
        command: &str,
        payload: Option<&[u8]>,
    ) -> Result<CommandResult, InterpreterError<T::Error>> {
        debug!(self.log, "Sending command"; "command" => command);
        self.transport
            .set_read_timeout(self.settings.command_read_timeout);

        let mut line = Vec::with_capacity(command.len() + 2);
        line.extend_from_slice(command.as_bytes());
        line.extend_from_slice(b"\r\n");
        self.transport.write(&line);

        if let Some(payload) = payload {
            thread::sleep(self.settings.payload_settle);
            self.transport.write(payload);
            debug!(self.log, "Wrote {} bytes of payload", payload.len());
        }

        let start = Instant::now();
        let mut parser = ResponseParser::new();
        loop {
            if let Some(deadline) = self.settings.command_deadline {
                if start.elapsed() >= deadline {
                    return Err(InterpreterError::DeadlineExceeded {
                        command: command.to_string(),
                        deadline,
                    });
                }
            }

            let raw = self
                .transport
                .read_line()
                .map_err(InterpreterError::Transport)?;
            if raw.is_empty() {
                continue;
            }
            let Ok(line) = std::str::from_utf8(&raw) else {
                warn!(
                    self.log,
                    "ignoring undecodable line";
                    "command" => command,
                    "len" => raw.len()
                );
                continue;
            };
            debug!(self.log, "{}", line.trim_end());

            match parser.feed(line) {
                Ok(Some(result)) => return Ok(result),
                Ok(None) => {}
                Err(MissingStatus) => {
                    return Err(InterpreterError::ProtocolViolation {
                        command: command.to_string(),
                    })
                }
            }
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
