//! # Message Codec
//!
//! Turns outbound [`ResponseFrame`]s into JSON text and inbound bytes into
//! a [`RawRequest`] envelope. Decoding only checks that the input is a
//! well-formed JSON document; field-level checks belong to
//! [`crate::request`].

use serde_json::{Map, Value};
use thiserror::Error;

use crate::frame::ResponseFrame;

/// Failure to parse an inbound frame as a JSON document.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed input: {0}")]
    MalformedInput(#[from] serde_json::Error),
}

/// A structurally valid but not yet validated inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRequest(Value);

impl RawRequest {
    /// The top-level object, or `None` when the document is not an object.
    pub(crate) fn into_object(self) -> Option<Map<String, Value>> {
        match self.0 {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }
}

impl From<Value> for RawRequest {
    fn from(value: Value) -> Self {
        RawRequest(value)
    }
}

/// Serializes a frame to compact JSON, omitting absent fields.
pub fn encode(frame: &ResponseFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

/// Parses one inbound frame. Either the whole input is a JSON document or
/// the decode fails; trailing garbage after a document is an error too.
pub fn decode(input: &[u8]) -> Result<RawRequest, DecodeError> {
    let value = serde_json::from_slice::<Value>(input)?;
    Ok(RawRequest(value))
}
