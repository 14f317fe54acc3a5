// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A stand-in for the manufacturing CLI running on a board.

use certmfg_host::{LineTransport, COMMAND_END, STATUS_FAILURE, STATUS_SUCCESS};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptedDeviceError {
    #[error("device unplugged")]
    Unplugged,
}

/// A device that answers commands from a script.
///
/// Responses are keyed by the first token of the command line, so
/// `init 21 22` is answered by the script registered for `init`. Scripts
/// registered for the same command are used in order. A command with no
/// script left is answered the way the firmware answers an unknown command.
///
/// Anything written that does not end in `\r\n` is a payload and is
/// attributed to the command written just before it.
#[derive(Debug, Default)]
pub struct ScriptedDevice {
    responses: BTreeMap<String, VecDeque<Vec<Vec<u8>>>>,
    pending: VecDeque<Vec<u8>>,
    writes: Vec<Vec<u8>>,
    commands: Vec<String>,
    payloads: Vec<(String, Vec<u8>)>,
    errors: VecDeque<ScriptedDeviceError>,
    read_timeout: Option<Duration>,
}

impl ScriptedDevice {
    pub fn new() -> ScriptedDevice {
        ScriptedDevice::default()
    }

    /// Queue the raw lines sent back for the next `command`.
    pub fn respond<L: Into<Vec<u8>>>(
        &mut self,
        command: &str,
        lines: impl IntoIterator<Item = L>,
    ) -> &mut Self {
        self.responses
            .entry(command.to_string())
            .or_default()
            .push_back(lines.into_iter().map(Into::into).collect());
        self
    }

    /// Queue a successful response carrying `body`.
    pub fn respond_ok(&mut self, command: &str, body: &str) -> &mut Self {
        let lines = framed(command, STATUS_SUCCESS, body);
        self.respond(command, lines)
    }

    /// Queue a `Status: Failure` response carrying `body`.
    pub fn respond_failure(&mut self, command: &str, body: &str) -> &mut Self {
        let lines = framed(command, STATUS_FAILURE, body);
        self.respond(command, lines)
    }

    /// Make unsolicited output, like the boot banner, available to read.
    pub fn push_output(&mut self, line: impl Into<Vec<u8>>) -> &mut Self {
        self.pending.push_back(line.into());
        self
    }

    // Each read pops the next error, in order, before any data is returned.
    pub fn inject_errors(&mut self, errors: VecDeque<ScriptedDeviceError>) {
        self.errors = errors;
    }

    /// Every command line received, without its line ending.
    pub fn commands(&self) -> Vec<&str> {
        self.commands.iter().map(String::as_str).collect()
    }

    /// Every write in the order it was made.
    pub fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    /// The payload that followed the first command named `name`.
    pub fn payload_after(&self, name: &str) -> Option<&[u8]> {
        self.payloads
            .iter()
            .find(|(command, _)| first_token(command) == name)
            .map(|(_, payload)| payload.as_slice())
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    fn receive_command(&mut self, command: String) {
        let script = self
            .responses
            .get_mut(first_token(&command))
            .and_then(VecDeque::pop_front);
        match script {
            Some(lines) => self.pending.extend(lines),
            None => {
                let unknown = format!("Unrecognized command: {command}");
                self.pending.extend(framed(&command, STATUS_FAILURE, &unknown))
            }
        }
        self.commands.push(command);
    }
}

fn first_token(command: &str) -> &str {
    command.split_whitespace().next().unwrap_or("")
}

fn framed(command: &str, status: &str, body: &str) -> Vec<Vec<u8>> {
    let mut lines = vec![
        format!("I (1042) cli: {command}\n").into_bytes(),
        format!("{status}\n").into_bytes(),
    ];
    for line in body.split_inclusive('\n') {
        let mut line = line.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        lines.push(line.into_bytes());
    }
    lines.push(format!("{COMMAND_END}\n").into_bytes());
    lines
}

impl LineTransport for ScriptedDevice {
    type Error = ScriptedDeviceError;

    fn read_line(&mut self) -> Result<Vec<u8>, Self::Error> {
        if let Some(err) = self.errors.pop_front() {
            return Err(err);
        }
        Ok(self.pending.pop_front().unwrap_or_default())
    }

    fn write(&mut self, bytes: &[u8]) {
        self.writes.push(bytes.to_vec());
        match bytes.strip_suffix(b"\r\n") {
            Some(line) => {
                let command = String::from_utf8_lossy(line).into_owned();
                self.receive_command(command);
            }
            None => {
                let command = self.commands.last().cloned().unwrap_or_default();
                self.payloads.push((command, bytes.to_vec()));
            }
        }
    }

    fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = Some(timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(device: &mut ScriptedDevice) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = device.read_line().unwrap();
            if line.is_empty() {
                return lines;
            }
            lines.push(String::from_utf8(line).unwrap());
        }
    }

    #[test]
    fn scripted_response_follows_command() {
        let mut device = ScriptedDevice::new();
        device.respond_ok("init", "ATECC608 Device Type: TrustCustom");
        assert!(drain(&mut device).is_empty());

        device.write(b"init 21 22\r\n");
        let lines = drain(&mut device);
        assert_eq!(
            lines[1..],
            [
                "Status: Success\n",
                "ATECC608 Device Type: TrustCustom\n",
                "COMMAND END\n"
            ]
        );
        assert_eq!(device.commands(), ["init 21 22"]);
    }

    #[test]
    fn payload_is_attributed_to_previous_command() {
        let mut device = ScriptedDevice::new();
        device.write(b"provide-cert-def 0 12\r\n");
        device.write(b"cert_def:abc");
        assert_eq!(
            device.payload_after("provide-cert-def"),
            Some(&b"cert_def:abc"[..])
        );
        assert_eq!(device.writes().len(), 2);
    }

    #[test]
    fn unscripted_command_fails() {
        let mut device = ScriptedDevice::new();
        device.write(b"bogus\r\n");
        let lines = drain(&mut device);
        assert!(lines.iter().any(|l| l.contains("Status: Failure")));
    }

    #[test]
    fn injected_errors_come_first() {
        let mut device = ScriptedDevice::new();
        device.push_output("CLI started\n");
        device.inject_errors(VecDeque::from([ScriptedDeviceError::Unplugged]));
        assert_eq!(device.read_line(), Err(ScriptedDeviceError::Unplugged));
        assert_eq!(device.read_line().unwrap(), b"CLI started\n");
    }
}
