//! Configuration for services, clients and the CLI.
//!
//! Settings are loaded in order of precedence, later sources overriding
//! earlier ones:
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `MICROBUS_` (nested keys use
//!    `__`, e.g. `MICROBUS_BUS__URL`)

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::transport::BusConfig;

/// Default bus server URL.
pub const DEFAULT_BUS_URL: &str = "nats://127.0.0.1:4222";
/// Default per-call request timeout in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 500;
/// Default shutdown grace period in milliseconds.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 250;

fn default_bus_url() -> String {
    DEFAULT_BUS_URL.to_string()
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_shutdown_grace_ms() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}

/// Bus connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSettings {
    /// Server URL, e.g. `nats://127.0.0.1:4222`.
    #[serde(default = "default_bus_url")]
    pub url: String,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            url: default_bus_url(),
        }
    }
}

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Bus connection settings.
    #[serde(default)]
    pub bus: BusSettings,

    /// Per-call request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Grace period between stop and connection close, in milliseconds.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Instance id for the per-instance health endpoint.
    #[serde(default)]
    pub instance_id: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bus: BusSettings::default(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            instance_id: None,
        }
    }
}

impl Settings {
    /// Load settings from defaults, an optional file, and the environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("bus.url", DEFAULT_BUS_URL)?
            .set_default("request_timeout_ms", DEFAULT_REQUEST_TIMEOUT_MS as i64)?
            .set_default("shutdown_grace_ms", DEFAULT_SHUTDOWN_GRACE_MS as i64)?;
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path));
        }
        let settings = builder
            .add_source(Environment::with_prefix("MICROBUS").separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Per-call request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Shutdown grace period as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Bus configuration for these settings.
    pub fn bus_config(&self) -> BusConfig {
        BusConfig::nats(self.bus.url.clone())
    }
}
