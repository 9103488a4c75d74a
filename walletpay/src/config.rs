//! Client configuration.
//!
//! Every field has a default except the client id, so a configuration can be
//! built in code or deserialized from a partial JSON/TOML document. Durations
//! are expressed in milliseconds on the wire.
//!
//! # Example Configuration
//!
//! ```json
//! {
//!   "client_id": "CAS-CI_MERCHANT",
//!   "environment": "sandbox",
//!   "strict_mode": true,
//!   "authorizing_poll_interval_ms": 2000,
//!   "analytics": { "interval_ms": 30000, "batch_size": 30 }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// SDK version recorded in analytics rows and request headers.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Backend the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Test backend. No money moves.
    Sandbox,
    /// Live backend.
    #[default]
    Production,
}

impl Environment {
    /// Returns the lower-case name of the environment.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Production => "production",
        }
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Merchant client identifier issued by the wallet provider.
    pub client_id: String,

    /// Backend environment (default: `production`).
    #[serde(default)]
    pub environment: Environment,

    /// When `true`, SDK misuse is returned as an error to the caller instead
    /// of moving the request into the exception state (default: `false`).
    #[serde(default)]
    pub strict_mode: bool,

    /// Poll interval while the request waits to be authorized (default: 20s).
    #[serde(
        default = "default_ready_poll_interval",
        rename = "ready_poll_interval_ms",
        with = "duration_ms"
    )]
    pub ready_poll_interval: Duration,

    /// Poll interval while the customer is authorizing in the wallet app (default: 2s).
    #[serde(
        default = "default_authorizing_poll_interval",
        rename = "authorizing_poll_interval_ms",
        with = "duration_ms"
    )]
    pub authorizing_poll_interval: Duration,

    /// Analytics delivery options. Used when the client builder is not given
    /// an existing queue.
    #[serde(default)]
    pub analytics: AnalyticsOptions,
}

impl ClientConfig {
    /// Creates a production configuration with defaults for everything but the client id.
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            environment: Environment::default(),
            strict_mode: false,
            ready_poll_interval: default_ready_poll_interval(),
            authorizing_poll_interval: default_authorizing_poll_interval(),
            analytics: AnalyticsOptions::default(),
        }
    }

    /// Creates a sandbox configuration with strict mode enabled.
    #[must_use]
    pub fn sandbox(client_id: impl Into<String>) -> Self {
        Self {
            environment: Environment::Sandbox,
            strict_mode: true,
            ..Self::new(client_id)
        }
    }

    /// Sets strict mode.
    #[must_use]
    pub const fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    /// Sets both poll intervals.
    #[must_use]
    pub const fn with_poll_intervals(mut self, ready: Duration, authorizing: Duration) -> Self {
        self.ready_poll_interval = ready;
        self.authorizing_poll_interval = authorizing;
        self
    }
}

/// Analytics queue and delivery options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsOptions {
    /// Record and upload checkout telemetry (default: `true`).
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Delay before the first scheduled delivery run (default: 10s).
    #[serde(
        default = "default_initial_delay",
        rename = "initial_delay_ms",
        with = "duration_ms"
    )]
    pub initial_delay: Duration,

    /// Interval between scheduled delivery runs (default: 30s).
    #[serde(default = "default_interval", rename = "interval_ms", with = "duration_ms")]
    pub interval: Duration,

    /// Maximum rows claimed per handler per run (default: 30).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Rows handed to a handler per `deliver` call (default: 10).
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// SQLite database file. `None` keeps the queue in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// Version tag written to each row (default: the SDK version).
    #[serde(default = "default_version")]
    pub version: String,
}

impl Default for AnalyticsOptions {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            initial_delay: default_initial_delay(),
            interval: default_interval(),
            batch_size: default_batch_size(),
            page_size: default_page_size(),
            database_path: None,
            version: default_version(),
        }
    }
}

const fn default_ready_poll_interval() -> Duration {
    Duration::from_secs(20)
}

const fn default_authorizing_poll_interval() -> Duration {
    Duration::from_secs(2)
}

const fn default_enabled() -> bool {
    true
}

const fn default_initial_delay() -> Duration {
    Duration::from_secs(10)
}

const fn default_interval() -> Duration {
    Duration::from_secs(30)
}

const fn default_batch_size() -> usize {
    30
}

const fn default_page_size() -> usize {
    10
}

fn default_version() -> String {
    SDK_VERSION.to_owned()
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
