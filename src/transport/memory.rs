//! In-process bus.
//!
//! Implements [`BusConnection`] with the same subject-addressed
//! request-reply semantics as the NATS binding, entirely inside one
//! process: fan-out to every subscriber of a subject, `_INBOX.{n}` reply
//! subjects, and deadline-bounded request-reply. The integration tests run
//! against this bus, and single-process deployments can use it to wire a
//! service and its clients without a broker.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{BusConnection, Headers, InboundMessage, MessageStream, TransportError};

type SubscriberMap = HashMap<String, Vec<(u64, mpsc::UnboundedSender<InboundMessage>)>>;

#[derive(Default)]
struct Inner {
    subscribers: Mutex<SubscriberMap>,
    next_id: AtomicU64,
}

impl Inner {
    fn add(&self, subject: &str) -> (u64, mpsc::UnboundedReceiver<InboundMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .entry(subject.to_string())
            .or_default()
            .push((id, tx));
        (id, rx)
    }

    fn remove(&self, subject: &str, id: u64) {
        let mut subscribers = self.subscribers.lock();
        if let Some(list) = subscribers.get_mut(subject) {
            list.retain(|(entry_id, _)| *entry_id != id);
            if list.is_empty() {
                subscribers.remove(subject);
            }
        }
    }

    /// Deliver to every live subscriber of `subject`.
    fn deliver(&self, subject: &str, message: &InboundMessage) {
        let mut subscribers = self.subscribers.lock();
        if let Some(list) = subscribers.get_mut(subject) {
            list.retain(|(_, tx)| tx.send(message.clone()).is_ok());
            if list.is_empty() {
                subscribers.remove(subject);
            }
        }
    }
}

/// Shared in-process bus.
///
/// Clones refer to the same bus; connections created from any clone see
/// each other's subjects.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Inner>,
}

impl MemoryBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new connection to this bus.
    pub fn connection(&self) -> MemoryConnection {
        MemoryConnection {
            inner: Arc::clone(&self.inner),
            owned: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }
}

impl std::fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBus")
            .field("subjects", &self.inner.subscribers.lock().len())
            .finish()
    }
}

/// One connection to a [`MemoryBus`].
///
/// Closing drops the subscriptions this connection created; other
/// connections on the same bus are unaffected.
pub struct MemoryConnection {
    inner: Arc<Inner>,
    /// Subscriptions created by this connection, removed on close.
    owned: Mutex<Vec<(String, u64)>>,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl BusConnection for MemoryConnection {
    async fn subscribe(&self, subject: &str) -> Result<MessageStream, TransportError> {
        self.ensure_open()?;
        let (id, rx) = self.inner.add(subject);
        self.owned.lock().push((subject.to_string(), id));
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn request(
        &self,
        subject: &str,
        headers: Headers,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        self.ensure_open()?;
        let reply = format!("_INBOX.{}", self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (id, mut rx) = self.inner.add(&reply);

        let message = InboundMessage {
            subject: subject.to_string(),
            payload,
            headers: if headers.is_empty() { None } else { Some(headers) },
            reply: Some(reply.clone()),
        };
        self.inner.deliver(subject, &message);

        // An unserved subject simply leaves the inbox silent until the
        // deadline; the bus does not track responders.
        let outcome = tokio::time::timeout(timeout, rx.recv()).await;
        self.inner.remove(&reply, id);
        match outcome {
            Ok(Some(reply_message)) => Ok(reply_message.payload),
            Ok(None) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout {
                subject: subject.to_string(),
            }),
        }
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        self.ensure_open()?;
        let message = InboundMessage {
            subject: subject.to_string(),
            payload,
            headers: None,
            reply: None,
        };
        // Publishing to a subject nobody subscribes to is not an error.
        self.inner.deliver(subject, &message);
        Ok(())
    }

    async fn flush(&self) -> Result<(), TransportError> {
        self.ensure_open()
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            for (subject, id) in self.owned.lock().drain(..) {
                self.inner.remove(&subject, id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(bytes: &'static [u8]) -> Bytes {
        Bytes::from_static(bytes)
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = MemoryBus::new();
        let conn = bus.connection();
        let mut stream = conn.subscribe("events.test").await.unwrap();

        conn.publish("events.test", payload(b"hello")).await.unwrap();
        let message = stream.next().await.unwrap();
        assert_eq!(message.subject, "events.test");
        assert_eq!(&message.payload[..], b"hello");
        assert!(message.reply.is_none());
    }

    #[tokio::test]
    async fn test_request_reply_round_trip() {
        let bus = MemoryBus::new();
        let server = bus.connection();
        let mut stream = server.subscribe("svc.echo").await.unwrap();

        tokio::spawn(async move {
            let request = stream.next().await.unwrap();
            let reply = request.reply.expect("request carries a reply subject");
            server.publish(&reply, request.payload).await.unwrap();
        });

        let client = bus.connection();
        let reply = client
            .request(
                "svc.echo",
                Headers::new(),
                payload(b"ping"),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(&reply[..], b"ping");
    }

    #[tokio::test]
    async fn test_request_without_subscriber_times_out() {
        let bus = MemoryBus::new();
        let client = bus.connection();
        let err = client
            .request(
                "nobody.home",
                Headers::new(),
                payload(b"{}"),
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_headers_travel_with_request() {
        let bus = MemoryBus::new();
        let server = bus.connection();
        let mut stream = server.subscribe("svc.headers").await.unwrap();

        let client = bus.connection();
        let mut headers = Headers::new();
        headers.insert("baggage".to_string(), "{\"k\":\"v\"}".to_string());
        tokio::spawn(async move {
            let _ = client
                .request("svc.headers", headers, payload(b"{}"), Duration::from_secs(1))
                .await;
        });

        let message = stream.next().await.unwrap();
        let received = message.headers.expect("headers present");
        assert_eq!(received.get("baggage").map(String::as_str), Some("{\"k\":\"v\"}"));
    }

    #[tokio::test]
    async fn test_close_drops_own_subscriptions_only() {
        let bus = MemoryBus::new();
        let first = bus.connection();
        let second = bus.connection();
        let mut kept = second.subscribe("svc.kept").await.unwrap();
        let mut dropped = first.subscribe("svc.kept").await.unwrap();

        first.close().await.unwrap();
        assert!(matches!(
            first.publish("svc.kept", payload(b"x")).await,
            Err(TransportError::Closed)
        ));

        second.publish("svc.kept", payload(b"y")).await.unwrap();
        assert_eq!(&kept.next().await.unwrap().payload[..], b"y");
        // The closed connection's stream ended.
        assert!(dropped.next().await.is_none());
    }
}
