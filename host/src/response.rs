// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Parsing of a single command response.
//!
//! Every command answers with some free-form progress output, exactly one
//! status line, a body and a terminator:
//!
//! ```text
//! I (1234) cli/commands_atecc: generating csr ..
//! Status: Success
//! -----BEGIN CERTIFICATE REQUEST-----
//! ...
//! -----END CERTIFICATE REQUEST-----
//! COMMAND END
//! ```

use thiserror::Error;

pub const STATUS_SUCCESS: &str = "Status: Success";
pub const STATUS_FAILURE: &str = "Status: Failure";
pub const COMMAND_END: &str = "COMMAND END";

/// The outcome of one command, as reported by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub status: bool,
    /// Every line between the status line and the terminator, line endings
    /// included.
    pub return_text: String,
}

/// The device reported `Status: Failure` for a command.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{command} failed to execute")]
pub struct CommandFailure {
    pub command: String,
    pub output: String,
}

impl CommandResult {
    /// Return the body of a successful response, or the failure otherwise.
    pub fn check_ok(self, command: &str) -> Result<String, CommandFailure> {
        if self.status {
            Ok(self.return_text)
        } else {
            Err(CommandFailure {
                command: command.to_string(),
                output: self.return_text,
            })
        }
    }
}

/// The terminator arrived before any status line.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("response ended before a status line was seen")]
pub struct MissingStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingStatus,
    AwaitingEnd { status: bool },
}

/// Incremental parser for one response, fed a line at a time.
#[derive(Debug)]
pub struct ResponseParser {
    phase: Phase,
    return_text: String,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseParser {
    pub fn new() -> ResponseParser {
        ResponseParser {
            phase: Phase::AwaitingStatus,
            return_text: String::new(),
        }
    }

    /// The status seen so far, `None` while it is still unknown.
    pub fn status(&self) -> Option<bool> {
        match self.phase {
            Phase::AwaitingStatus => None,
            Phase::AwaitingEnd { status } => Some(status),
        }
    }

    /// Feed the next line of output.
    ///
    /// Returns the finished result once the terminator is seen. The parser
    /// must not be fed again after that.
    pub fn feed(
        &mut self,
        line: &str,
    ) -> Result<Option<CommandResult>, MissingStatus> {
        match self.phase {
            Phase::AwaitingStatus => {
                if line.contains(STATUS_SUCCESS) {
                    self.phase = Phase::AwaitingEnd { status: true };
                } else if line.contains(STATUS_FAILURE) {
                    self.phase = Phase::AwaitingEnd { status: false };
                } else if line.contains(COMMAND_END) {
                    return Err(MissingStatus);
                }
                Ok(None)
            }
            Phase::AwaitingEnd { status } => {
                if line.contains(COMMAND_END) {
                    return Ok(Some(CommandResult {
                        status,
                        return_text: std::mem::take(&mut self.return_text),
                    }));
                }
                self.return_text.push_str(line);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(lines: &[&str]) -> Result<Option<CommandResult>, MissingStatus> {
        let mut parser = ResponseParser::new();
        for line in lines {
            if let Some(result) = parser.feed(line)? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    #[test]
    fn success_collects_body_without_terminator() {
        let result = parse(&[
            "I (120) cli: init\r\n",
            "Status: Success\n",
            "ATECC608 Device Type: TrustCustom\n",
            "COMMAND END\n",
        ])
        .unwrap()
        .unwrap();
        assert!(result.status);
        assert_eq!(result.return_text, "ATECC608 Device Type: TrustCustom\n");
    }

    #[test]
    fn failure_is_a_result_not_an_error() {
        let result = parse(&["Status: Failure\n", "COMMAND END\n"])
            .unwrap()
            .unwrap();
        assert!(!result.status);
        assert_eq!(result.return_text, "");
    }

    #[test]
    fn first_status_line_wins() {
        let result = parse(&[
            "Status: Success\n",
            "Status: Failure\n",
            "COMMAND END\n",
        ])
        .unwrap()
        .unwrap();
        assert!(result.status);
        assert_eq!(result.return_text, "Status: Failure\n");

        let result = parse(&[
            "Status: Failure\n",
            "Status: Success\n",
            "COMMAND END\n",
        ])
        .unwrap()
        .unwrap();
        assert!(!result.status);
    }

    #[test]
    fn progress_output_before_status_is_dropped() {
        let result = parse(&[
            "Serial Number: 00 11\n",
            "\n",
            "Status: Success\n",
            "body\n",
            "COMMAND END\n",
        ])
        .unwrap()
        .unwrap();
        assert_eq!(result.return_text, "body\n");
    }

    #[test]
    fn terminator_before_status_is_a_violation() {
        assert_eq!(
            parse(&["some log\n", "COMMAND END\n"]),
            Err(MissingStatus)
        );
    }

    #[test]
    fn status_stays_unknown_until_seen() {
        let mut parser = ResponseParser::new();
        assert_eq!(parser.status(), None);
        parser.feed("booting\n").unwrap();
        assert_eq!(parser.status(), None);
        parser.feed("Status: Failure\n").unwrap();
        assert_eq!(parser.status(), Some(false));
    }

    #[test]
    fn incomplete_response_yields_nothing() {
        assert_eq!(parse(&["Status: Success\n", "partial"]), Ok(None));
    }

    #[test]
    fn check_ok_returns_body_or_failure() {
        let ok = CommandResult {
            status: true,
            return_text: "body".into(),
        };
        assert_eq!(ok.check_ok("generate-csr").unwrap(), "body");

        let failed = CommandResult {
            status: false,
            return_text: "E (10) atecc: bad slot\n".into(),
        };
        let err = failed.check_ok("generate-keys 0").unwrap_err();
        assert_eq!(err.command, "generate-keys 0");
        assert_eq!(err.output, "E (10) atecc: bad slot\n");
        assert_eq!(err.to_string(), "generate-keys 0 failed to execute");
    }
}
