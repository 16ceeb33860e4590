//! # Command Outcomes
//!
//! Every facade call returns a `CommandResult`: the typed outcome of one
//! store command. Failures are logged once, when the result is built, and
//! stay inspectable afterwards. Callers that only care whether the command
//! produced something use `value()`, which collapses failures into the
//! command's documented fallback (`false`, empty, `None`, `0`).

use std::collections::HashSet;

use tracing::error;

use crate::client::KeyTtl;
use crate::error::{ClientError, ClientResult};
use crate::pubsub::SubscriptionReport;
use crate::resp::RespValue;

/// Value returned by `CommandResult::value` when the command failed.
pub trait Sentinel {
    fn sentinel() -> Self;
}

impl Sentinel for () {
    fn sentinel() -> Self {}
}

impl Sentinel for bool {
    fn sentinel() -> Self {
        false
    }
}

impl Sentinel for i64 {
    fn sentinel() -> Self {
        0
    }
}

impl Sentinel for String {
    fn sentinel() -> Self {
        String::new()
    }
}

impl<T> Sentinel for Option<T> {
    fn sentinel() -> Self {
        None
    }
}

impl<T> Sentinel for Vec<T> {
    fn sentinel() -> Self {
        Vec::new()
    }
}

impl<T> Sentinel for HashSet<T> {
    fn sentinel() -> Self {
        HashSet::new()
    }
}

impl Sentinel for RespValue {
    fn sentinel() -> Self {
        RespValue::Bulk(None)
    }
}

impl Sentinel for SubscriptionReport {
    fn sentinel() -> Self {
        SubscriptionReport::default()
    }
}

/// Outcome of a single facade command.
#[must_use = "a command result carries the failure of the command"]
#[derive(Debug)]
pub struct CommandResult<T> {
    outcome: ClientResult<T>,
}

impl<T> CommandResult<T> {
    /// Wraps an outcome, logging the failure branch.
    pub(crate) fn settle(command: &'static str, key: &str, outcome: ClientResult<T>) -> Self {
        if let Err(err) = &outcome {
            error!(command, key, error = %err, "store command failed");
        }
        CommandResult { outcome }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn is_err(&self) -> bool {
        self.outcome.is_err()
    }

    pub fn error(&self) -> Option<&ClientError> {
        self.outcome.as_ref().err()
    }

    pub fn ok(self) -> Option<T> {
        self.outcome.ok()
    }

    pub fn into_result(self) -> ClientResult<T> {
        self.outcome
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CommandResult<U> {
        CommandResult {
            outcome: self.outcome.map(f),
        }
    }
}

impl<T: Sentinel> CommandResult<T> {
    /// Success value, or the command's fallback when it failed.
    pub fn value(self) -> T {
        self.outcome.unwrap_or_else(|_| T::sentinel())
    }
}

impl CommandResult<KeyTtl> {
    /// Remaining lifetime as a millisecond code: `>= 0` remaining, `-1` no
    /// expiry, `-2` missing key, `-3` the query itself failed.
    pub fn ttl_millis(self) -> i64 {
        match self.outcome {
            Ok(ttl) => ttl.as_millis_code(),
            Err(_) => KeyTtl::FAILED,
        }
    }
}

impl<T> From<CommandResult<T>> for ClientResult<T> {
    fn from(result: CommandResult<T>) -> Self {
        result.outcome
    }
}
