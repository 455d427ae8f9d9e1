//! Service-side RPC: endpoint registration, lifecycle, and subscriptions.
//!
//! A [`Service`] owns a per-instance map from endpoint name to handler and
//! a lifecycle state machine. [`Service::run`] connects to the bus,
//! subscribes one subscription per endpoint subject, and serves until
//! stopped by a termination signal or a [`ServiceHandle::stop`] call.
//!
//! Handlers run as independent tasks, so many dispatches interleave and a
//! handler may itself issue client calls (including to an endpoint of the
//! same service) without deadlocking the subscription loops.

pub mod dispatch;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::health;
use crate::subject;
use crate::trace::TraceContext;
use crate::transport::{BusConfig, BusConnection, MessageStream};

/// Grace period between the stop signal and connection teardown, leaving
/// in-flight dispatches time to send their replies.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

/// Context handed to a handler for one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Full subject the request arrived on.
    pub subject: String,
    /// Endpoint name resolved from the subject.
    pub endpoint: String,
    /// Trace context extracted from the request headers.
    ///
    /// Pass it on (see [`CallOptions::trace`](crate::client::CallOptions::trace))
    /// when making nested calls so the trace spans multiple hops.
    pub trace: TraceContext,
}

/// A request handler backing one endpoint.
///
/// Implemented by any `async fn(RequestContext, Value) -> anyhow::Result<Value>`
/// or closure of that shape; implement the trait directly when the handler
/// needs its own state. Returning `Err` produces an `INTERNAL_ERROR`
/// envelope carrying the error's message.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Process a decoded request and produce the result value.
    async fn invoke(&self, ctx: RequestContext, request: Value) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(RequestContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn invoke(&self, ctx: RequestContext, request: Value) -> anyhow::Result<Value> {
        (self)(ctx, request).await
    }
}

/// Service lifecycle states.
///
/// `Created -> Running -> Stopping -> Stopped`; the `Stopping` window
/// covers the shutdown grace period before the connection closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Built, not yet connected.
    Created,
    /// Connected and subscribed to all registered endpoints.
    Running,
    /// Stop requested; in-flight dispatches draining.
    Stopping,
    /// Connection closed.
    Stopped,
}

type EndpointMap = HashMap<String, Arc<dyn Handler>>;

fn insert_endpoint(endpoints: &mut EndpointMap, name: String, handler: Arc<dyn Handler>) -> Result<()> {
    subject::validate_segment(&name)?;
    match endpoints.entry(name) {
        Entry::Occupied(entry) => Err(Error::DuplicateEndpoint(entry.key().clone())),
        Entry::Vacant(entry) => {
            entry.insert(handler);
            Ok(())
        }
    }
}

/// Builder for a [`Service`].
pub struct ServiceBuilder {
    name: String,
    bus: BusConfig,
    endpoints: EndpointMap,
    grace: Duration,
    instance_id: Option<String>,
}

impl std::fmt::Debug for ServiceBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBuilder")
            .field("name", &self.name)
            .field("grace", &self.grace)
            .field("instance_id", &self.instance_id)
            .field("endpoints", &self.endpoints.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ServiceBuilder {
    /// Register an endpoint.
    ///
    /// Registering the same name twice is rejected with
    /// [`Error::DuplicateEndpoint`] rather than silently overwriting:
    /// ambiguous dispatch is a configuration error.
    pub fn endpoint(mut self, name: impl Into<String>, handler: impl Handler) -> Result<Self> {
        insert_endpoint(&mut self.endpoints, name.into(), Arc::new(handler))?;
        Ok(self)
    }

    /// Set the instance id; the service then also serves
    /// `healthz-{instance_id}` for probes.
    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// Override the shutdown grace period.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Validate the configuration and build the service.
    pub fn build(mut self) -> Result<Service> {
        subject::validate_segment(&self.name)?;
        if let Some(instance_id) = self.instance_id.take() {
            insert_endpoint(
                &mut self.endpoints,
                health::endpoint_name(&instance_id),
                Arc::new(health::healthz),
            )?;
        }
        let (shutdown, _) = watch::channel(false);
        let (lifecycle, lifecycle_rx) = watch::channel(Lifecycle::Created);
        Ok(Service {
            name: self.name,
            bus: self.bus,
            endpoints: self.endpoints,
            shutdown: Arc::new(shutdown),
            lifecycle,
            lifecycle_rx,
            grace: self.grace,
        })
    }
}

/// A named service exposing endpoints on the bus.
pub struct Service {
    name: String,
    bus: BusConfig,
    endpoints: EndpointMap,
    shutdown: Arc<watch::Sender<bool>>,
    lifecycle: watch::Sender<Lifecycle>,
    lifecycle_rx: watch::Receiver<Lifecycle>,
    grace: Duration,
}

impl Service {
    /// Start building a service with the given name and bus configuration.
    pub fn builder(name: impl Into<String>, bus: BusConfig) -> ServiceBuilder {
        ServiceBuilder {
            name: name.into(),
            bus,
            endpoints: EndpointMap::new(),
            grace: DEFAULT_SHUTDOWN_GRACE,
            instance_id: None,
        }
    }

    /// Imperative endpoint registration, same rules as
    /// [`ServiceBuilder::endpoint`].
    ///
    /// Only possible before [`run`](Self::run): `run` consumes the service,
    /// so an endpoint cannot be added after subscriptions exist.
    pub fn register(&mut self, name: impl Into<String>, handler: impl Handler) -> Result<()> {
        insert_endpoint(&mut self.endpoints, name.into(), Arc::new(handler))
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the registered endpoints.
    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    /// Handle for stopping the service and observing its lifecycle.
    pub fn handle(&self) -> ServiceHandle {
        ServiceHandle {
            shutdown: Arc::clone(&self.shutdown),
            lifecycle: self.lifecycle_rx.clone(),
        }
    }

    /// Connect, subscribe every endpoint, and serve until stopped.
    ///
    /// Termination signals (interrupt, and SIGTERM on unix) trigger the
    /// same stop path as [`ServiceHandle::stop`]. Connection and
    /// subscription failures are fatal and propagate to the caller;
    /// per-request failures never do.
    pub async fn run(self) -> Result<()> {
        let Service {
            name,
            bus,
            endpoints,
            shutdown,
            lifecycle,
            lifecycle_rx: _,
            grace,
        } = self;

        let result = run_loop(&name, bus, endpoints, &shutdown, &lifecycle, grace).await;
        if let Err(err) = &result {
            lifecycle.send_replace(Lifecycle::Stopped);
            error!(service = %name, %err, "service terminated with error");
        }
        result
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("bus", &self.bus)
            .field("endpoints", &self.endpoints.keys().collect::<Vec<_>>())
            .field("lifecycle", &*self.lifecycle_rx.borrow())
            .finish()
    }
}

async fn run_loop(
    name: &str,
    bus: BusConfig,
    endpoints: EndpointMap,
    shutdown: &Arc<watch::Sender<bool>>,
    lifecycle: &watch::Sender<Lifecycle>,
    grace: Duration,
) -> Result<()> {
    spawn_signal_listener(Arc::clone(shutdown));

    let connection = bus.connect().await?;
    info!(service = %name, "connected to bus");

    let endpoints = Arc::new(endpoints);
    for endpoint in endpoints.keys() {
        let subject = subject::for_endpoint(name, endpoint)?;
        info!(%subject, "subscribing to endpoint");
        let stream = connection.subscribe(&subject).await?;
        spawn_subscription(
            name.to_string(),
            Arc::clone(&endpoints),
            Arc::clone(&connection),
            Arc::clone(shutdown),
            stream,
            subject,
        );
    }

    lifecycle.send_replace(Lifecycle::Running);
    info!(service = %name, endpoints = endpoints.len(), "service running");

    let mut stop = shutdown.subscribe();
    let _ = stop.wait_for(|stop| *stop).await;

    lifecycle.send_replace(Lifecycle::Stopping);
    info!(service = %name, "service stopping");

    // Let in-flight dispatches send their replies before teardown.
    tokio::time::sleep(grace).await;
    if let Err(err) = connection.close().await {
        warn!(service = %name, %err, "error closing bus connection");
    }

    lifecycle.send_replace(Lifecycle::Stopped);
    info!(service = %name, "service stopped");
    Ok(())
}

/// One subscription loop: forward each inbound message to its own dispatch
/// task until the stream ends or the service stops.
fn spawn_subscription(
    service: String,
    endpoints: Arc<EndpointMap>,
    connection: Arc<dyn BusConnection>,
    shutdown: Arc<watch::Sender<bool>>,
    mut stream: MessageStream,
    subject: String,
) {
    tokio::spawn(async move {
        let mut stop = shutdown.subscribe();
        loop {
            tokio::select! {
                biased;

                _ = stop.wait_for(|stop| *stop) => break,

                next = stream.next() => match next {
                    Some(message) => {
                        tokio::spawn(dispatch::dispatch(
                            service.clone(),
                            Arc::clone(&endpoints),
                            Arc::clone(&connection),
                            message,
                        ));
                    }
                    None => {
                        debug!(%subject, "subscription stream ended");
                        break;
                    }
                },
            }
        }
        debug!(%subject, "subscription loop exited");
    });
}

/// Map termination signals onto the stop path. The task ends when either a
/// signal arrives or the service stops on its own.
fn spawn_signal_listener(shutdown: Arc<watch::Sender<bool>>) {
    tokio::spawn(async move {
        let mut stop = shutdown.subscribe();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut terminate = match signal(SignalKind::terminate()) {
                Ok(terminate) => terminate,
                Err(err) => {
                    warn!(%err, "failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("interrupt received, stopping service"),
                _ = terminate.recv() => info!("termination signal received, stopping service"),
                _ = stop.wait_for(|stop| *stop) => return,
            }
        }

        #[cfg(not(unix))]
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("interrupt received, stopping service"),
            _ = stop.wait_for(|stop| *stop) => return,
        }

        shutdown.send_replace(true);
    });
}

/// Handle for a running (or not-yet-run) service.
#[derive(Clone)]
pub struct ServiceHandle {
    shutdown: Arc<watch::Sender<bool>>,
    lifecycle: watch::Receiver<Lifecycle>,
}

impl ServiceHandle {
    /// Request a graceful stop.
    ///
    /// Idempotent: subsequent calls are no-ops. Does not cancel in-flight
    /// dispatches; the service's grace period lets them finish.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    /// True while the service is subscribed and serving.
    pub fn is_running(&self) -> bool {
        self.lifecycle() == Lifecycle::Running
    }

    /// Wait until the service has left [`Lifecycle::Created`], i.e. it is
    /// subscribed and serving (or already past that).
    pub async fn running(&mut self) {
        let _ = self
            .lifecycle
            .wait_for(|state| !matches!(state, Lifecycle::Created))
            .await;
    }

    /// Wait until the service reaches [`Lifecycle::Stopped`].
    ///
    /// Also resolves if the service task is dropped before reaching it.
    pub async fn stopped(&mut self) {
        let _ = self
            .lifecycle
            .wait_for(|state| matches!(state, Lifecycle::Stopped))
            .await;
    }
}
