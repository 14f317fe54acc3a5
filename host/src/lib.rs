// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host side of the secure element manufacturing CLI: the serial link and
//! the command/response protocol spoken over it.

mod interpreter;
mod response;
mod transport;
mod uart;

pub use self::interpreter::CommandInterpreter;
pub use self::interpreter::InterpreterError;
pub use self::interpreter::InterpreterSettings;
pub use self::interpreter::READY_MARKER;
pub use self::response::CommandFailure;
pub use self::response::CommandResult;
pub use self::response::ResponseParser;
pub use self::response::COMMAND_END;
pub use self::response::STATUS_FAILURE;
pub use self::response::STATUS_SUCCESS;
pub use self::transport::LineTransport;
pub use self::uart::Uart;
pub use self::uart::UartOpenError;
pub use self::uart::UartReadError;
pub use self::uart::UartSettings;
pub use self::uart::DEFAULT_BAUD_RATE;
