//! Trace-context propagation across the RPC boundary.
//!
//! A small key-value context rides in the `baggage` message header,
//! JSON-encoded, independent of the request payload. The client injects it
//! on the way out; the dispatcher extracts it and hands it to the handler
//! as part of [`RequestContext`](crate::service::RequestContext), so nested
//! calls can carry it forward explicitly. There is no hidden task-local:
//! the context is always a value in the call chain.
//!
//! Extraction never fails. An absent or malformed header yields the empty
//! context.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::transport::Headers;

/// Message header carrying the encoded trace context.
pub const BAGGAGE_HEADER: &str = "baggage";

/// Opaque key-value trace context propagated between services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceContext(BTreeMap<String, String>);

impl TraceContext {
    /// Empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert an entry, replacing any previous value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up an entry.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// True when the context carries no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Encode the context into outgoing headers.
    ///
    /// An empty context writes nothing; header absence is the wire encoding
    /// of "no context".
    pub fn inject(&self, headers: &mut Headers) {
        if self.is_empty() {
            return;
        }
        match serde_json::to_string(&self.0) {
            Ok(encoded) => {
                headers.insert(BAGGAGE_HEADER.to_string(), encoded);
            }
            Err(err) => debug!(%err, "failed to encode trace context, sending none"),
        }
    }

    /// Decode the context from inbound headers.
    ///
    /// Absent or malformed baggage degrades to the empty context; this path
    /// never reports an error to the dispatcher.
    pub fn from_headers(headers: Option<&Headers>) -> Self {
        let Some(raw) = headers.and_then(|headers| headers.get(BAGGAGE_HEADER)) else {
            return Self::default();
        };
        match serde_json::from_str(raw) {
            Ok(entries) => Self(entries),
            Err(err) => {
                debug!(%err, "malformed baggage header, using empty trace context");
                Self::default()
            }
        }
    }
}
