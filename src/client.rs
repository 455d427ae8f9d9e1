//! Client-side RPC calls.
//!
//! A [`Client`] targets one service over a shared bus connection. It does
//! not own the connection's lifecycle: the connection is supplied at
//! construction and may be shared with other clients (and with a service)
//! multiplexed on it.

use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info_span, Instrument};

use crate::envelope::ResponseEnvelope;
use crate::error::{Error, Result};
use crate::subject;
use crate::trace::TraceContext;
use crate::transport::{BusConnection, Headers, TransportError};

/// Default per-call timeout when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(500);

/// Per-call options.
///
/// `Default::default()` is a plain call with the client's timeout and no
/// trace context; builder-style methods override per call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Explicit deadline for this call.
    pub timeout: Option<Duration>,
    /// Trace context to inject into the request headers.
    pub trace: Option<TraceContext>,
}

impl CallOptions {
    /// Bound this call by `timeout` instead of the client default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Propagate `trace` with this call.
    ///
    /// Handlers making nested calls pass their
    /// [`RequestContext::trace`](crate::service::RequestContext) here so the
    /// downstream hop is attributed to the same trace.
    pub fn trace(mut self, trace: TraceContext) -> Self {
        self.trace = Some(trace);
        self
    }
}

/// Client for one named service.
#[derive(Clone)]
pub struct Client {
    service: String,
    connection: Arc<dyn BusConnection>,
    timeout: Duration,
}

impl Client {
    /// Create a client for `service` over an existing connection.
    pub fn new(service: impl Into<String>, connection: Arc<dyn BusConnection>) -> Self {
        Self {
            service: service.into(),
            connection,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set the default per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Target service name.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Call `endpoint` with an optional payload and default options.
    ///
    /// `None` sends the empty object `{}`. Returns the handler's result
    /// value on an `OK` envelope; otherwise [`Error::Remote`] carrying the
    /// remote error text, or [`Error::Timeout`] when no reply arrived in
    /// time.
    pub async fn request(&self, endpoint: &str, payload: Option<Value>) -> Result<Value> {
        self.request_with(endpoint, payload, CallOptions::default()).await
    }

    /// Call `endpoint` with explicit [`CallOptions`].
    pub async fn request_with(
        &self,
        endpoint: &str,
        payload: Option<Value>,
        options: CallOptions,
    ) -> Result<Value> {
        let subject = subject::for_endpoint(&self.service, endpoint)?;
        let timeout = options.timeout.unwrap_or(self.timeout);
        let span = info_span!("request", subject = %subject);

        async move {
            let payload = payload.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
            debug!(%payload, "requesting endpoint");
            let body = serde_json::to_vec(&payload).map_err(Error::EncodePayload)?;

            let mut headers = Headers::new();
            if let Some(trace) = &options.trace {
                trace.inject(&mut headers);
            }

            let reply = self
                .connection
                .request(&subject, headers, Bytes::from(body), timeout)
                .await
                .map_err(|err| match err {
                    TransportError::Timeout { subject } => Error::Timeout { subject },
                    other => Error::Transport(other),
                })?;

            let envelope =
                ResponseEnvelope::from_slice(&reply).map_err(Error::DecodeEnvelope)?;
            if !envelope.status.is_ok() {
                let message = envelope.error.unwrap_or_default();
                error!(status = %envelope.status, %message, "request failed");
                return Err(Error::Remote { message });
            }
            debug!("response received");
            Ok(envelope.result.unwrap_or(Value::Null))
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("service", &self.service)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
