//! Transport layer: the boundary to the publish/subscribe bus.
//!
//! This module provides:
//! - [`BusConnection`], the trait the RPC layer is written against
//! - [`InboundMessage`] / [`Headers`], the transport-neutral message shape
//! - [`BusConfig`] for unified bus endpoint configuration
//! - [`nats`], the NATS binding, and [`memory`], an in-process bus with the
//!   same request-reply semantics for tests and single-process wiring
//!
//! The bus is an external collaborator: it owns delivery, subscription
//! fan-out and request-reply correlation. Everything above this module
//! only assumes subject-addressed publish/subscribe where each request
//! gets at most one reply delivered back to the original caller.

pub mod memory;
pub mod nats;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryBus;
pub use nats::NatsConnection;

/// Message metadata headers, carried out-of-band from the payload.
pub type Headers = HashMap<String, String>;

/// Boxed error source for transport failures.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// A message delivered by a subscription.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Subject the message was published to.
    pub subject: String,
    /// Raw payload bytes.
    pub payload: Bytes,
    /// Optional metadata headers.
    pub headers: Option<Headers>,
    /// Reply subject for request-reply messages.
    pub reply: Option<String>,
}

/// Stream of messages for one subscription.
pub type MessageStream = BoxStream<'static, InboundMessage>;

/// Errors at the bus boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not establish the bus connection.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        /// Bus address that was dialed.
        address: String,
        #[source]
        source: BoxedError,
    },

    /// Subscription could not be established.
    #[error("subscribe to {subject} failed: {source}")]
    Subscribe {
        /// Subject of the failed subscription.
        subject: String,
        #[source]
        source: BoxedError,
    },

    /// Publish (including replies) failed.
    #[error("publish to {subject} failed: {source}")]
    Publish {
        /// Subject the publish targeted.
        subject: String,
        #[source]
        source: BoxedError,
    },

    /// Request-reply call failed for a reason other than the deadline.
    #[error("request to {subject} failed: {source}")]
    Request {
        /// Subject the request targeted.
        subject: String,
        #[source]
        source: BoxedError,
    },

    /// No reply arrived within the request deadline.
    #[error("request to {subject} timed out")]
    Timeout {
        /// Subject the request targeted.
        subject: String,
    },

    /// Pending buffers could not be flushed.
    #[error("flush failed: {0}")]
    Flush(#[source] BoxedError),

    /// The connection is closed.
    #[error("connection closed")]
    Closed,
}

/// An established connection to the bus.
///
/// One connection is shared by all subscriptions and all client calls
/// multiplexed on it. Implementations must deliver at most one reply to
/// each `request` call; correlation is the transport's job.
#[async_trait]
pub trait BusConnection: Send + Sync + 'static {
    /// Subscribe to a subject and return the stream of inbound messages.
    async fn subscribe(&self, subject: &str) -> Result<MessageStream, TransportError>;

    /// Publish a request and await the single reply, bounded by `timeout`.
    async fn request(
        &self,
        subject: &str,
        headers: Headers,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, TransportError>;

    /// Publish a message with no reply expected (used for replies themselves).
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Flush buffered outbound messages to the bus.
    async fn flush(&self) -> Result<(), TransportError>;

    /// Close the connection. Further operations fail with [`TransportError::Closed`]
    /// where the implementation can detect it.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Bus endpoint configuration.
///
/// Unifies the deployment shapes a service or client can be wired to:
/// a NATS server by URL, or an in-process bus instance.
#[derive(Clone)]
pub enum BusConfig {
    /// NATS server, e.g. `nats://127.0.0.1:4222`.
    Nats {
        /// Server URL.
        url: String,
    },
    /// Shared in-process bus (tests, single-process deployments).
    InProcess {
        /// The bus instance to attach to.
        bus: MemoryBus,
    },
}

impl BusConfig {
    /// NATS configuration for the given server URL.
    pub fn nats(url: impl Into<String>) -> Self {
        Self::Nats { url: url.into() }
    }

    /// In-process configuration attached to `bus`.
    pub fn in_process(bus: &MemoryBus) -> Self {
        Self::InProcess { bus: bus.clone() }
    }

    /// Open a connection for this configuration.
    pub async fn connect(&self) -> Result<Arc<dyn BusConnection>, TransportError> {
        match self {
            Self::Nats { url } => Ok(Arc::new(NatsConnection::connect(url).await?)),
            Self::InProcess { bus } => Ok(Arc::new(bus.connection())),
        }
    }
}

impl fmt::Debug for BusConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nats { url } => f.debug_struct("Nats").field("url", url).finish(),
            Self::InProcess { .. } => f.debug_struct("InProcess").finish_non_exhaustive(),
        }
    }
}
