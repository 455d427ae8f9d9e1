//! Response envelope codec.
//!
//! Requests travel as raw JSON payloads with no wrapper; responses are
//! wrapped in an envelope that carries a status, and either the handler's
//! result or an error message. The envelope is the whole wire contract
//! between services: two processes that agree on it can interoperate
//! without sharing any code.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Outcome classification for a dispatched request.
///
/// Serialized on the wire as `"OK"`, `"INVALID_REQUEST"` or
/// `"INTERNAL_ERROR"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Handler completed; `result` is valid.
    #[serde(rename = "OK")]
    Ok,
    /// Payload failed to decode as JSON; the handler was never invoked.
    #[serde(rename = "INVALID_REQUEST")]
    InvalidRequest,
    /// Handler invocation returned an error; `error` carries its message.
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

impl Status {
    /// True for the success status.
    pub fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Ok => "OK",
            Status::InvalidRequest => "INVALID_REQUEST",
            Status::InternalError => "INTERNAL_ERROR",
        };
        f.write_str(s)
    }
}

/// Wire envelope for the response direction.
///
/// Exactly one of `result` / `error` is populated, selected by `status`.
/// Every dispatched request produces exactly one envelope, because the
/// caller blocks on the bus's request-reply correlation until a reply or
/// a timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Outcome of the dispatch.
    pub status: Status,

    /// Handler result, present when `status == OK`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error text, present when `status != OK`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseEnvelope {
    /// Envelope for a completed handler.
    pub fn ok(result: Value) -> Self {
        Self {
            status: Status::Ok,
            result: Some(result),
            error: None,
        }
    }

    /// Envelope for a payload that failed to decode.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            status: Status::InvalidRequest,
            result: None,
            error: Some(message.into()),
        }
    }

    /// Envelope for a handler that returned an error.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            status: Status::InternalError,
            result: None,
            error: Some(message.into()),
        }
    }

    /// Encode the envelope for the wire.
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    /// Decode an envelope from reply bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
