//! Per-message dispatch.
//!
//! Each inbound request is handled by one dispatch task: resolve the
//! endpoint from the subject, extract the trace context, decode the
//! payload, invoke the handler, and send exactly one response envelope.
//! Failures are classified into the envelope's status taxonomy and never
//! escape to the subscription loop: every code path below terminates in a
//! sent reply (or a logged drop when the transport gave us nowhere to
//! reply to).

use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info_span, warn, Instrument};

use crate::envelope::ResponseEnvelope;
use crate::service::{Handler, RequestContext};
use crate::subject;
use crate::trace::TraceContext;
use crate::transport::{BusConnection, InboundMessage};

/// Emergency reply used if envelope encoding itself fails.
const ENCODE_FAILURE_REPLY: &[u8] = br#"{"status":"INTERNAL_ERROR","error":"response encoding failed"}"#;

pub(crate) async fn dispatch(
    service: String,
    endpoints: Arc<HashMap<String, Arc<dyn Handler>>>,
    connection: Arc<dyn BusConnection>,
    message: InboundMessage,
) {
    let Some(reply) = message.reply.clone() else {
        warn!(subject = %message.subject, "request carries no reply subject, dropping");
        return;
    };

    let envelope = build_response(&service, &endpoints, &message).await;

    let bytes = envelope.to_bytes().unwrap_or_else(|err| {
        error!(subject = %message.subject, %err, "failed to encode response envelope");
        Bytes::from_static(ENCODE_FAILURE_REPLY)
    });
    if let Err(err) = connection.publish(&reply, bytes).await {
        warn!(subject = %message.subject, %err, "failed to send reply");
    }
}

/// Classify the request into exactly one response envelope.
async fn build_response(
    service: &str,
    endpoints: &HashMap<String, Arc<dyn Handler>>,
    message: &InboundMessage,
) -> ResponseEnvelope {
    // Subscriptions are created 1:1 with registrations, so a miss here
    // means the transport delivered a subject we never subscribed to.
    let handler = subject::endpoint_of(&message.subject, service)
        .and_then(|endpoint| endpoints.get(endpoint).map(|handler| (endpoint, handler)));
    let Some((endpoint, handler)) = handler else {
        error!(subject = %message.subject, "no handler registered for subject");
        return ResponseEnvelope::internal_error(format!(
            "unknown endpoint for subject {}",
            message.subject
        ));
    };

    let request: Value = match serde_json::from_slice(&message.payload) {
        Ok(request) => request,
        Err(err) => {
            error!(
                subject = %message.subject,
                payload = %String::from_utf8_lossy(&message.payload),
                %err,
                "invalid request payload"
            );
            return ResponseEnvelope::invalid_request(err.to_string());
        }
    };

    let ctx = RequestContext {
        subject: message.subject.clone(),
        endpoint: endpoint.to_string(),
        trace: TraceContext::from_headers(message.headers.as_ref()),
    };

    let span = info_span!("dispatch", subject = %message.subject);
    match handler.invoke(ctx, request).instrument(span).await {
        Ok(result) => ResponseEnvelope::ok(result),
        Err(err) => {
            // Full chain stays in the local log; only the top-level
            // message crosses the wire.
            error!(subject = %message.subject, error = ?err, "handler failed");
            ResponseEnvelope::internal_error(err.to_string())
        }
    }
}
