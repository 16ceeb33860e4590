//! # Status Values
//!
//! Purpose: Give callers of the store facade a uniform success/failure value
//! carrying a numeric code and a human-readable message.
//!
//! ## Design Principles
//! 1. **Plain Data**: `Status` is an owned value object with no behavior
//!    beyond construction and inspection.
//! 2. **Stable Codes**: `StatusCode` discriminants are part of the wire
//!    contract for anything that serializes a `Status`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome codes with their default messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
#[repr(u32)]
pub enum StatusCode {
    Success = 0,
    Failure = 1,
}

impl StatusCode {
    /// Numeric code as sent to callers.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Message used when the caller does not supply one.
    pub const fn default_message(self) -> &'static str {
        match self {
            StatusCode::Success => "success",
            StatusCode::Failure => "failure",
        }
    }
}

impl From<StatusCode> for u32 {
    fn from(code: StatusCode) -> Self {
        code.code()
    }
}

impl TryFrom<u32> for StatusCode {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StatusCode::Success),
            1 => Ok(StatusCode::Failure),
            other => Err(format!("unknown status code {}", other)),
        }
    }
}

/// Success/failure flag with a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn success() -> Self {
        Self::with_default_message(StatusCode::Success)
    }

    pub fn success_with(message: impl Into<String>) -> Self {
        Status {
            code: StatusCode::Success,
            message: message.into(),
        }
    }

    pub fn fail() -> Self {
        Self::with_default_message(StatusCode::Failure)
    }

    pub fn fail_with(message: impl Into<String>) -> Self {
        Status {
            code: StatusCode::Failure,
            message: message.into(),
        }
    }

    /// Builds a status from a boolean outcome using the default messages.
    pub fn from_flag(ok: bool) -> Self {
        if ok {
            Self::success()
        } else {
            Self::fail()
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == StatusCode::Success
    }

    fn with_default_message(code: StatusCode) -> Self {
        Status {
            code,
            message: code.default_message().to_string(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}
