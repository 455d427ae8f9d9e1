//! Built-in health endpoint.
//!
//! A service configured with an instance id serves a per-instance health
//! endpoint alongside its own endpoints. Orchestration probes (and the
//! `microbus probe` command) call it to check that the instance is
//! connected and dispatching.

use serde_json::{json, Value};

use crate::service::RequestContext;

/// Endpoint name serving health checks for one service instance.
///
/// Per-instance naming lets a probe target a specific replica even though
/// all replicas subscribe under the same service name.
pub fn endpoint_name(instance_id: &str) -> String {
    format!("healthz-{instance_id}")
}

/// Handler backing the health endpoint.
///
/// Reaching it at all proves the instance is subscribed and dispatching,
/// so it only reports success.
pub(crate) async fn healthz(_ctx: RequestContext, _request: Value) -> anyhow::Result<Value> {
    Ok(json!({ "status": "ok" }))
}
