//! Request/response RPC over a subject-addressed message bus.
//!
//! This crate provides:
//! - [`Service`]: endpoint registration, subject multiplexing, and a
//!   graceful lifecycle over a publish/subscribe bus
//! - [`Client`]: synchronous request/response calls with per-call timeouts
//! - A JSON response envelope with a uniform `OK` / `INVALID_REQUEST` /
//!   `INTERNAL_ERROR` status taxonomy
//! - Trace-context propagation through the `baggage` message header
//! - Transport bindings for NATS and for an in-process bus
//!
//! Requests travel as raw JSON payloads on `{service}.{endpoint}` subjects;
//! replies ride the bus's own request-reply correlation. Handler failures
//! are classified into the envelope taxonomy on the service side and
//! surfaced as typed errors on the client side, so a handler failure is
//! never a transport failure.
//!
//! # Example
//!
//! ```ignore
//! use microbus_core::prelude::*;
//! use serde_json::Value;
//!
//! async fn echo(_ctx: RequestContext, request: Value) -> anyhow::Result<Value> {
//!     Ok(request)
//! }
//!
//! # async fn example() -> microbus_core::Result<()> {
//! let service = Service::builder("example", BusConfig::nats("nats://localhost:4222"))
//!     .endpoint("echo", echo)?
//!     .instance_id("node-1")
//!     .build()?;
//! let handle = service.handle();
//! tokio::spawn(service.run());
//!
//! let connection = BusConfig::nats("nats://localhost:4222").connect().await?;
//! let client = Client::new("example", connection);
//! let reply = client.request("echo", Some(serde_json::json!({"foo": "bar"}))).await?;
//! assert_eq!(reply["foo"], "bar");
//!
//! handle.stop();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod health;
pub mod service;
pub mod subject;
pub mod trace;
pub mod transport;

/// Prelude for convenient imports.
///
/// Re-exports the most commonly used types for
/// `use microbus_core::prelude::*;`
pub mod prelude {
    pub use crate::client::{CallOptions, Client};
    pub use crate::config::Settings;
    pub use crate::envelope::{ResponseEnvelope, Status};
    pub use crate::error::{Error, Result};
    pub use crate::service::{
        Handler, Lifecycle, RequestContext, Service, ServiceBuilder, ServiceHandle,
    };
    pub use crate::trace::TraceContext;
    pub use crate::transport::{
        BusConfig, BusConnection, Headers, InboundMessage, MemoryBus, TransportError,
    };
}

// Re-export key types at the crate root.
pub use client::{CallOptions, Client};
pub use config::Settings;
pub use envelope::{ResponseEnvelope, Status};
pub use error::{Error, Result};
pub use service::{Handler, Lifecycle, RequestContext, Service, ServiceBuilder, ServiceHandle};
pub use trace::TraceContext;
pub use transport::{BusConfig, BusConnection, Headers, InboundMessage, MemoryBus, TransportError};
