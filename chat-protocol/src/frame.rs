//! # Response Frames
//!
//! Every frame the gateway writes to a client is a [`ResponseFrame`],
//! serialized as a JSON object with a `"status"` field naming the variant.
//! Optional fields are omitted from the object when absent rather than
//! written as `null`, so a `msg-received` frame and an `end` frame stay
//! distinguishable by shape as well as by status.

use serde::{Deserialize, Serialize};

use crate::request::ChatRequest;

/// Who authored the text carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Assistant,
}

/// The `status` tag of a frame, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    MsgReceived,
    ResponseStream,
    End,
    Error,
}

/// All frames sent from the gateway to a client.
///
/// For one request the gateway emits exactly one `Received`, then any
/// number of `Stream` frames in generation order, then exactly one
/// terminal frame (`End` or `Error`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum ResponseFrame {
    // ── Request lifecycle ─────────────────────────────────────────

    /// Acknowledges a valid request. `assistant_msg` echoes the user's
    /// text so the client can render it against the new assistant ID.
    #[serde(rename = "msg-received", rename_all = "camelCase")]
    Received {
        role: Role,
        user_msg_id: String,
        assistant_msg_id: String,
        assistant_msg: String,
    },

    /// One generated fragment.
    #[serde(rename = "response-stream", rename_all = "camelCase")]
    Stream {
        role: Role,
        user_msg_id: String,
        assistant_msg_id: String,
        assistant_msg: String,
    },

    /// Generation finished normally.
    #[serde(rename = "end", rename_all = "camelCase")]
    End {
        role: Role,
        user_msg_id: String,
        assistant_msg_id: String,
    },

    // ── Errors ────────────────────────────────────────────────────

    /// Something went wrong. Connection-level errors (unparsable or
    /// invalid input) carry no IDs; request-level errors carry both.
    #[serde(rename = "error", rename_all = "camelCase")]
    Error {
        role: Role,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_msg_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assistant_msg_id: Option<String>,
        assistant_msg: String,
    },
}

impl ResponseFrame {
    pub fn received(request: &ChatRequest, assistant_msg_id: &str) -> Self {
        ResponseFrame::Received {
            role: Role::Assistant,
            user_msg_id: request.user_msg_id().to_owned(),
            assistant_msg_id: assistant_msg_id.to_owned(),
            assistant_msg: request.user_msg().to_owned(),
        }
    }

    pub fn stream(request: &ChatRequest, assistant_msg_id: &str, fragment: String) -> Self {
        ResponseFrame::Stream {
            role: Role::Assistant,
            user_msg_id: request.user_msg_id().to_owned(),
            assistant_msg_id: assistant_msg_id.to_owned(),
            assistant_msg: fragment,
        }
    }

    pub fn end(request: &ChatRequest, assistant_msg_id: &str) -> Self {
        ResponseFrame::End {
            role: Role::Assistant,
            user_msg_id: request.user_msg_id().to_owned(),
            assistant_msg_id: assistant_msg_id.to_owned(),
        }
    }

    /// An error tied to an in-flight request.
    pub fn request_error(
        request: &ChatRequest,
        assistant_msg_id: &str,
        message: impl Into<String>,
    ) -> Self {
        ResponseFrame::Error {
            role: Role::Assistant,
            user_msg_id: Some(request.user_msg_id().to_owned()),
            assistant_msg_id: Some(assistant_msg_id.to_owned()),
            assistant_msg: message.into(),
        }
    }

    /// An error about the connection's input rather than a specific request.
    pub fn error(message: impl Into<String>) -> Self {
        ResponseFrame::Error {
            role: Role::Assistant,
            user_msg_id: None,
            assistant_msg_id: None,
            assistant_msg: message.into(),
        }
    }

    pub fn status(&self) -> Status {
        match self {
            ResponseFrame::Received { .. } => Status::MsgReceived,
            ResponseFrame::Stream { .. } => Status::ResponseStream,
            ResponseFrame::End { .. } => Status::End,
            ResponseFrame::Error { .. } => Status::Error,
        }
    }

    /// Whether this frame closes a request cycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status(), Status::End | Status::Error)
    }

    /// The assistant message ID, if the frame carries one.
    pub fn assistant_msg_id(&self) -> Option<&str> {
        match self {
            ResponseFrame::Received { assistant_msg_id, .. }
            | ResponseFrame::Stream { assistant_msg_id, .. }
            | ResponseFrame::End { assistant_msg_id, .. } => Some(assistant_msg_id),
            ResponseFrame::Error { assistant_msg_id, .. } => assistant_msg_id.as_deref(),
        }
    }
}
