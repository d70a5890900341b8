//! # Chat Protocol
//!
//! Wire types shared by the gateway and its tests: outbound response
//! frames, the inbound request envelope, and the validator that turns an
//! envelope into a [`ChatRequest`].
//!
//! Nothing in this crate performs I/O.

pub mod codec;
pub mod frame;
pub mod request;

pub use codec::{decode, encode, DecodeError, RawRequest};
pub use frame::{ResponseFrame, Role, Status};
pub use request::{validate, ChatRequest, Field, Limits, Reason, ValidationError};
