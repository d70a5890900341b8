//! # Request Validation
//!
//! A [`ChatRequest`] can only be obtained from [`Limits::validate`] (or the
//! [`validate`] shorthand), so holding one means every field rule held.
//!
//! Inbound wire shape:
//!
//! ```text
//! {"userMsgId": "<6..=50 chars>", "userMsg": "<1..=1000 chars>"}
//! ```
//!
//! Lengths count Unicode scalar values, not bytes.

use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::codec::RawRequest;

/// Shortest accepted `userMsgId`.
pub const MIN_ID_LENGTH: usize = 6;

/// Shortest accepted `userMsg`.
pub const MIN_MESSAGE_LENGTH: usize = 1;

/// Upper length bounds for inbound fields. The lower bounds are fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_id_length: usize,
    pub max_message_length: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_id_length: 50,
            max_message_length: 1000,
        }
    }
}

/// The inbound field a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    UserMsgId,
    UserMsg,
}

impl Field {
    pub fn wire_name(self) -> &'static str {
        match self {
            Field::UserMsgId => "userMsgId",
            Field::UserMsg => "userMsg",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Why a field was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Reason {
    #[error("missing")]
    Missing,
    #[error("not a string")]
    NotAString,
    #[error("shorter than {min} characters (got {actual})")]
    TooShort { min: usize, actual: usize },
    #[error("longer than {max} characters (got {actual})")]
    TooLong { max: usize, actual: usize },
}

/// The first rule an inbound request broke.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: Field,
    pub reason: Reason,
}

/// A validated chat request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    user_msg_id: String,
    user_msg: String,
}

impl ChatRequest {
    pub fn user_msg_id(&self) -> &str {
        &self.user_msg_id
    }

    pub fn user_msg(&self) -> &str {
        &self.user_msg
    }
}

impl Limits {
    /// Checks `userMsgId` then `userMsg`, stopping at the first failure.
    pub fn validate(&self, raw: RawRequest) -> Result<ChatRequest, ValidationError> {
        // A non-object document has neither field.
        let mut obj = raw.into_object().unwrap_or_default();

        let user_msg_id = take_string(
            &mut obj,
            Field::UserMsgId,
            MIN_ID_LENGTH,
            self.max_id_length,
        )?;
        let user_msg = take_string(
            &mut obj,
            Field::UserMsg,
            MIN_MESSAGE_LENGTH,
            self.max_message_length,
        )?;

        Ok(ChatRequest {
            user_msg_id,
            user_msg,
        })
    }
}

/// Validates with the default [`Limits`].
pub fn validate(raw: RawRequest) -> Result<ChatRequest, ValidationError> {
    Limits::default().validate(raw)
}

fn take_string(
    obj: &mut Map<String, Value>,
    field: Field,
    min: usize,
    max: usize,
) -> Result<String, ValidationError> {
    let fail = |reason| ValidationError { field, reason };

    let value = match obj.remove(field.wire_name()) {
        Some(Value::String(s)) => s,
        Some(_) => return Err(fail(Reason::NotAString)),
        None => return Err(fail(Reason::Missing)),
    };

    let actual = value.chars().count();
    if actual < min {
        return Err(fail(Reason::TooShort { min, actual }));
    }
    if actual > max {
        return Err(fail(Reason::TooLong { max, actual }));
    }
    Ok(value)
}
