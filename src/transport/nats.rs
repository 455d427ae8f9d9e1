//! NATS binding of the transport boundary.
//!
//! Thin adapter from [`async_nats::Client`] to [`BusConnection`]: subjects
//! map 1:1, subscriptions become message streams, and request-reply rides
//! on NATS's own inbox correlation. Timeouts are applied per call rather
//! than from the client's global default, so each request carries its own
//! deadline.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tracing::debug;

use super::{BusConnection, Headers, InboundMessage, MessageStream, TransportError};

/// A connection to a NATS server.
pub struct NatsConnection {
    client: async_nats::Client,
}

impl NatsConnection {
    /// Connect to the server at `url`.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|err| TransportError::Connect {
                address: url.to_string(),
                source: Box::new(err),
            })?;
        debug!(%url, "connected to nats");
        Ok(Self { client })
    }

    /// Wrap an already-established client.
    ///
    /// Useful when the application shares one NATS client between this
    /// crate and other consumers.
    pub fn from_client(client: async_nats::Client) -> Self {
        Self { client }
    }

    /// The underlying NATS client.
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }
}

fn to_nats_headers(headers: &Headers) -> async_nats::HeaderMap {
    let mut map = async_nats::HeaderMap::new();
    for (name, value) in headers {
        map.insert(name.as_str(), value.as_str());
    }
    map
}

fn from_nats_headers(headers: &async_nats::HeaderMap) -> Headers {
    headers
        .iter()
        .map(|(name, values)| {
            let value = values.first().map(|v| v.as_str().to_owned()).unwrap_or_default();
            (name.to_string(), value)
        })
        .collect()
}

#[async_trait]
impl BusConnection for NatsConnection {
    async fn subscribe(&self, subject: &str) -> Result<MessageStream, TransportError> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|err| TransportError::Subscribe {
                subject: subject.to_string(),
                source: Box::new(err),
            })?;
        Ok(subscriber
            .map(|message| InboundMessage {
                subject: message.subject.to_string(),
                payload: message.payload,
                headers: message.headers.as_ref().map(from_nats_headers),
                reply: message.reply.map(|reply| reply.to_string()),
            })
            .boxed())
    }

    async fn request(
        &self,
        subject: &str,
        headers: Headers,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        let mut request = async_nats::Request::new()
            .payload(payload)
            .timeout(Some(timeout));
        if !headers.is_empty() {
            request = request.headers(to_nats_headers(&headers));
        }
        match self.client.send_request(subject.to_string(), request).await {
            Ok(message) => Ok(message.payload),
            Err(err) if err.kind() == async_nats::RequestErrorKind::TimedOut => {
                Err(TransportError::Timeout {
                    subject: subject.to_string(),
                })
            }
            Err(err) => Err(TransportError::Request {
                subject: subject.to_string(),
                source: Box::new(err),
            }),
        }
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|err| TransportError::Publish {
                subject: subject.to_string(),
                source: Box::new(err),
            })
    }

    async fn flush(&self) -> Result<(), TransportError> {
        self.client
            .flush()
            .await
            .map_err(|err| TransportError::Flush(Box::new(err)))
    }

    async fn close(&self) -> Result<(), TransportError> {
        // The connection itself closes when the last clone of the client
        // is dropped; flushing here guarantees buffered replies are on the
        // wire before that happens.
        self.flush().await
    }
}
