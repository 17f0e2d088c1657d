//! Closed catalog of device error codes and their human-readable messages.
//!
//! The numeric values follow the printer vendor's status codes so that codes
//! reported by a driver can be passed through to callers unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Code used in error records for a generic "printer not ready" condition.
/// It is not part of the device catalog.
pub const NOT_READY_CODE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", from = "i32")]
pub enum ErrorCode {
    Success,
    Param,
    Connect,
    Timeout,
    Memory,
    Illegal,
    Processing,
    NotFound,
    InUse,
    TypeInvalid,
    Disconnect,
    AlreadyOpened,
    AlreadyUsed,
    BoxCountOver,
    BoxClientOver,
    Unsupported,
    Failure,
    Unknown(i32),
}

/// How a class of fault is handled by the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Success,
    /// Caller error, never retried.
    Parameter,
    /// Retried during connect, then surfaced.
    Connection,
    /// Retried during connect; terminal during the completion race.
    Timeout,
    /// Memory / box / client limits.
    Resource,
    State,
    Configuration,
    Failure,
}

impl ErrorCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ErrorCode::Success,
            1 => ErrorCode::Param,
            2 => ErrorCode::Connect,
            3 => ErrorCode::Timeout,
            4 => ErrorCode::Memory,
            5 => ErrorCode::Illegal,
            6 => ErrorCode::Processing,
            7 => ErrorCode::NotFound,
            8 => ErrorCode::InUse,
            9 => ErrorCode::TypeInvalid,
            10 => ErrorCode::Disconnect,
            11 => ErrorCode::AlreadyOpened,
            12 => ErrorCode::AlreadyUsed,
            13 => ErrorCode::BoxCountOver,
            14 => ErrorCode::BoxClientOver,
            15 => ErrorCode::Unsupported,
            255 => ErrorCode::Failure,
            other => ErrorCode::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ErrorCode::Success => 0,
            ErrorCode::Param => 1,
            ErrorCode::Connect => 2,
            ErrorCode::Timeout => 3,
            ErrorCode::Memory => 4,
            ErrorCode::Illegal => 5,
            ErrorCode::Processing => 6,
            ErrorCode::NotFound => 7,
            ErrorCode::InUse => 8,
            ErrorCode::TypeInvalid => 9,
            ErrorCode::Disconnect => 10,
            ErrorCode::AlreadyOpened => 11,
            ErrorCode::AlreadyUsed => 12,
            ErrorCode::BoxCountOver => 13,
            ErrorCode::BoxClientOver => 14,
            ErrorCode::Unsupported => 15,
            ErrorCode::Failure => 255,
            ErrorCode::Unknown(code) => *code,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ErrorCode::Success => ErrorClass::Success,
            ErrorCode::Param => ErrorClass::Parameter,
            ErrorCode::Connect | ErrorCode::Disconnect => ErrorClass::Connection,
            ErrorCode::Timeout => ErrorClass::Timeout,
            ErrorCode::Memory | ErrorCode::BoxCountOver | ErrorCode::BoxClientOver => {
                ErrorClass::Resource
            }
            ErrorCode::Illegal
            | ErrorCode::Processing
            | ErrorCode::InUse
            | ErrorCode::AlreadyOpened
            | ErrorCode::AlreadyUsed => ErrorClass::State,
            ErrorCode::NotFound | ErrorCode::TypeInvalid | ErrorCode::Unsupported => {
                ErrorClass::Configuration
            }
            ErrorCode::Failure | ErrorCode::Unknown(_) => ErrorClass::Failure,
        }
    }

    /// Only connect-failure and timeout faults are worth another connect attempt.
    pub fn is_retryable_on_connect(&self) -> bool {
        matches!(self, ErrorCode::Connect | ErrorCode::Timeout)
    }

    pub fn describe(&self) -> String {
        describe(self.code())
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        ErrorCode::from_code(code)
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.describe(), self.code())
    }
}

/// Human message for a raw device code. Unknown codes echo the raw value.
pub fn describe(code: i32) -> String {
    let message = match code {
        0 => "Success",
        1 => "Invalid parameter",
        2 => "Failed to connect to the printer",
        3 => "Printer communication timed out",
        4 => "Not enough memory",
        5 => "Illegal printer state or operation order",
        6 => "Printer is busy processing another request",
        7 => "Printer not found",
        8 => "Printer is in use by another process",
        9 => "Invalid printer type",
        10 => "Failed to disconnect from the printer",
        11 => "Printer connection is already open",
        12 => "Printer is already in use",
        13 => "Too many device boxes",
        14 => "Too many clients connected to the device box",
        15 => "Operation not supported by this printer",
        255 => "Printer failure",
        NOT_READY_CODE => "Printer is not ready",
        other => return format!("Unknown error code: {}", other),
    };
    message.to_string()
}
