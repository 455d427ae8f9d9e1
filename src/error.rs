//! Error types for the RPC layer.

use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by the client and service APIs.
#[derive(Debug, Error)]
pub enum Error {
    /// The remote service answered with a non-`OK` envelope.
    ///
    /// `message` is the remote error text verbatim and is also this
    /// variant's `Display` output. The envelope does not say whether the
    /// failure was a rejected payload (`INVALID_REQUEST`) or a handler
    /// error (`INTERNAL_ERROR`); callers can only tell the two apart by
    /// inspecting the text. Known limitation of the wire contract.
    #[error("{message}")]
    Remote {
        /// Error text reported by the remote service.
        message: String,
    },

    /// No reply arrived within the request deadline.
    #[error("request to {subject} timed out")]
    Timeout {
        /// Subject the request was published to.
        subject: String,
    },

    /// Failure at the bus boundary (connect, subscribe, publish).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A service or endpoint name that cannot form a valid subject.
    #[error("invalid subject segment {0:?}: segments must be non-empty and must not contain '.'")]
    InvalidSubject(String),

    /// An endpoint name was registered twice on the same service.
    #[error("endpoint {0:?} is already registered")]
    DuplicateEndpoint(String),

    /// The outgoing payload could not be encoded as JSON.
    #[error("failed to encode request payload: {0}")]
    EncodePayload(#[source] serde_json::Error),

    /// The reply was not a decodable response envelope.
    #[error("failed to decode response envelope: {0}")]
    DecodeEnvelope(#[source] serde_json::Error),

    /// Settings could not be loaded or deserialized.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// True when the error is a request deadline expiring with no reply.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// True when the error carries a remote service's failure text.
    pub fn is_remote(&self) -> bool {
        matches!(self, Error::Remote { .. })
    }
}

/// Result type alias for RPC operations.
pub type Result<T> = std::result::Result<T, Error>;
