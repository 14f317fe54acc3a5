// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use certmfg_host::{CommandInterpreter, InterpreterError, InterpreterSettings};
use certmfg_test_utils::{test_logger, ScriptedDevice, ScriptedDeviceError};
use std::collections::VecDeque;
use std::time::Duration;

fn settings() -> InterpreterSettings {
    InterpreterSettings {
        payload_settle: Duration::ZERO,
        ..InterpreterSettings::default()
    }
}

fn interpreter(
    device: &mut ScriptedDevice,
) -> CommandInterpreter<&mut ScriptedDevice> {
    CommandInterpreter::new(device, settings(), &test_logger())
}

#[test]
fn exec_returns_body_of_successful_command() {
    let mut device = ScriptedDevice::new();
    device.respond_ok("init", "ATECC608 Device Type: TrustCustom");

    let result = interpreter(&mut device).exec("init 21 22", None).unwrap();
    assert!(result.status);
    assert_eq!(result.return_text, "ATECC608 Device Type: TrustCustom\n");
    assert_eq!(device.writes(), [b"init 21 22\r\n".to_vec()]);
    assert_eq!(device.read_timeout(), Some(Duration::from_secs(3)));
}

#[test]
fn exec_reports_failure_status() {
    let mut device = ScriptedDevice::new();
    device.respond_failure("generate-keys", "E (88) atecc: slot 0 locked");

    let result = interpreter(&mut device)
        .exec("generate-keys 0", None)
        .unwrap();
    assert!(!result.status);
    let err = result.check_ok("generate-keys 0").unwrap_err();
    assert_eq!(err.output, "E (88) atecc: slot 0 locked\n");
}

#[test]
fn payload_follows_command_line() {
    let mut device = ScriptedDevice::new();
    device.respond_ok("program-dev-cert", "");

    let payload = b"-----BEGIN CERTIFICATE-----\n";
    interpreter(&mut device)
        .exec("program-dev-cert 0 28", Some(payload))
        .unwrap();
    assert_eq!(
        device.writes(),
        [b"program-dev-cert 0 28\r\n".to_vec(), payload.to_vec()]
    );
    assert_eq!(device.payload_after("program-dev-cert"), Some(&payload[..]));
}

#[test]
fn undecodable_lines_are_skipped() {
    let mut device = ScriptedDevice::new();
    device.respond(
        "print-chip-info",
        [
            b"\xff\xfe garbage\n".to_vec(),
            b"Status: Success\n".to_vec(),
            b"\xc3\x28\n".to_vec(),
            b"Serial Number: 01 23\n".to_vec(),
            b"COMMAND END\n".to_vec(),
        ],
    );

    let result = interpreter(&mut device)
        .exec("print-chip-info", None)
        .unwrap();
    assert!(result.status);
    assert_eq!(result.return_text, "Serial Number: 01 23\n");
}

#[test]
fn timeouts_mid_response_are_tolerated() {
    let mut device = ScriptedDevice::new();
    device.respond(
        "generate-csr",
        ["Status: Success\n", "", "", "body\n", "", "COMMAND END\n"],
    );

    let result = interpreter(&mut device).exec("generate-csr", None).unwrap();
    assert_eq!(result.return_text, "body\n");
}

#[test]
fn terminator_without_status_is_protocol_violation() {
    let mut device = ScriptedDevice::new();
    device.respond("init", ["I (5) cli: init\n", "COMMAND END\n"]);

    let err = interpreter(&mut device).exec("init 21 22", None).unwrap_err();
    assert_eq!(
        err,
        InterpreterError::ProtocolViolation {
            command: "init 21 22".to_string()
        }
    );
}

#[test]
fn silent_device_exceeds_deadline() {
    let mut device = ScriptedDevice::new();
    device.respond("lock-slots", ["Status: Success\n"]);

    let mut settings = settings();
    settings.command_deadline = Some(Duration::from_millis(20));
    let mut interpreter =
        CommandInterpreter::new(&mut device, settings, &test_logger());
    let err = interpreter.exec("lock-slots", None).unwrap_err();
    assert_eq!(
        err,
        InterpreterError::DeadlineExceeded {
            command: "lock-slots".to_string(),
            deadline: Duration::from_millis(20),
        }
    );
}

#[test]
fn transport_errors_are_surfaced() {
    let mut device = ScriptedDevice::new();
    device.respond_ok("print-chip-info", "");
    device.inject_errors(VecDeque::from([ScriptedDeviceError::Unplugged]));

    let err = interpreter(&mut device)
        .exec("print-chip-info", None)
        .unwrap_err();
    assert_eq!(err, InterpreterError::Transport(ScriptedDeviceError::Unplugged));
}

#[test]
fn wait_for_ready_finds_banner() {
    let mut device = ScriptedDevice::new();
    device
        .push_output("ESP-ROM:esp32s3-20210327\r\n")
        .push_output("")
        .push_output("I (312) cli: CLI started\r\n");

    assert!(interpreter(&mut device).wait_for_ready().unwrap());
}

#[test]
fn wait_for_ready_gives_up_after_window() {
    let mut device = ScriptedDevice::new();
    device.push_output("rst:0x1 (POWERON_RESET)\n");

    let mut settings = settings();
    settings.ready_window = Duration::ZERO;
    let mut interpreter =
        CommandInterpreter::new(&mut device, settings, &test_logger());
    assert!(!interpreter.wait_for_ready().unwrap());
}

#[test]
fn wait_for_ready_skips_undecodable_boot_noise() {
    let mut device = ScriptedDevice::new();
    device
        .push_output(vec![0xffu8, 0xfe, 0x80, b'\n'])
        .push_output(vec![0xc3u8, 0x28, b'\r', b'\n'])
        .push_output("I (312) cli: CLI started\r\n");

    assert!(interpreter(&mut device).wait_for_ready().unwrap());
    assert!(device.writes().is_empty());
}
