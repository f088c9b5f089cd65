//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`DCC_*`)
//! - CLI arguments (for the `dcc` binary)

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DccError, Result};

/// Default Diameter port
pub const DEFAULT_PORT: u16 = 3868;

/// Default request queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Default event buffer capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Peer session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging configuration (used by the binary)
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| DccError::Config(format!("Failed to read config file: {e}")))?;

        Ok(toml::from_str(&content)?)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Overlay `DCC_*` environment variables onto this configuration
    pub fn with_env_overrides(mut self) -> Self {
        let session = &mut self.session;

        if let Ok(url) = std::env::var("DCC_URL") {
            session.url = url;
        }
        if let Ok(host) = std::env::var("DCC_ORIGIN_HOST") {
            session.origin_host = host;
        }
        if let Ok(realm) = std::env::var("DCC_ORIGIN_REALM") {
            session.origin_realm = realm;
        }
        if let Ok(host) = std::env::var("DCC_DESTINATION_HOST") {
            session.destination_host = Some(host);
        }
        if let Ok(realm) = std::env::var("DCC_DESTINATION_REALM") {
            session.destination_realm = Some(realm);
        }
        if let Ok(val) = std::env::var("DCC_WATCHDOG_INTERVAL_MS") {
            if let Ok(val) = val.parse() {
                session.watchdog_interval_ms = val;
            }
        }
        if let Ok(val) = std::env::var("DCC_ANSWER_TIMEOUT_MS") {
            if let Ok(val) = val.parse() {
                session.answer_timeout_ms = Some(val);
            }
        }
        if let Ok(filter) = std::env::var("DCC_LOG") {
            self.logging.filter = filter;
        }

        self
    }

    /// Serialize back to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| DccError::Config(e.to_string()))
    }

    /// Default config file location (`$XDG_CONFIG_HOME/dcc/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("dcc").join("config.toml"))
    }
}

/// What to do after a request could not be written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteFailurePolicy {
    /// Keep waiting for the answer anyway; only a configured timeout ends
    /// the wait.
    #[default]
    AwaitAnswer,
    /// Drop the waiter and hand the write error to the request owner.
    FailFast,
}

/// Identity and tuning for one peer session.
///
/// Immutable once the session starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Peer address (`host:port`)
    pub url: String,

    /// Origin-Host
    pub origin_host: String,

    /// Origin-Realm
    pub origin_realm: String,

    /// Destination-Host (absent for handshake-only flows)
    pub destination_host: Option<String>,

    /// Destination-Realm
    pub destination_realm: Option<String>,

    /// Vendor-Id
    pub vendor_id: u32,

    /// Product-Name
    pub product_name: String,

    /// Firmware-Revision
    pub firmware_revision: u32,

    /// Pause between watchdog round-trips
    pub watchdog_interval_ms: u64,

    /// Dial timeout
    pub connect_timeout_ms: Option<u64>,

    /// Deadline for the CEA; absent waits forever
    pub handshake_timeout_ms: Option<u64>,

    /// Deadline for each DWA; absent waits forever
    pub watchdog_timeout_ms: Option<u64>,

    /// Deadline for each CCA; absent waits forever
    pub answer_timeout_ms: Option<u64>,

    /// Pending request queue capacity
    pub queue_capacity: usize,

    /// Event buffer capacity per subscriber
    pub event_capacity: usize,

    /// Behavior after a failed write
    pub write_failure_policy: WriteFailurePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: format!("127.0.0.1:{DEFAULT_PORT}"),
            origin_host: "client".to_string(),
            origin_realm: "localhost".to_string(),
            destination_host: None,
            destination_realm: None,
            vendor_id: 0,
            product_name: "dcc".to_string(),
            firmware_revision: 1,
            watchdog_interval_ms: 30_000,
            connect_timeout_ms: Some(5_000),
            handshake_timeout_ms: None,
            watchdog_timeout_ms: None,
            answer_timeout_ms: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            write_failure_policy: WriteFailurePolicy::AwaitAnswer,
        }
    }
}

impl SessionConfig {
    /// Create with peer address and origin identity; everything else default.
    pub fn new(
        url: impl Into<String>,
        origin_host: impl Into<String>,
        origin_realm: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            origin_host: origin_host.into(),
            origin_realm: origin_realm.into(),
            ..Default::default()
        }
    }

    /// Set Destination-Host and Destination-Realm
    pub fn with_destination(mut self, host: impl Into<String>, realm: impl Into<String>) -> Self {
        self.destination_host = Some(host.into());
        self.destination_realm = Some(realm.into());
        self
    }

    /// Set Vendor-Id, Product-Name and Firmware-Revision
    pub fn with_product(mut self, vendor_id: u32, product_name: impl Into<String>, firmware_revision: u32) -> Self {
        self.vendor_id = vendor_id;
        self.product_name = product_name.into();
        self.firmware_revision = firmware_revision;
        self
    }

    /// Set the watchdog interval
    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the CEA deadline
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Set the DWA deadline
    pub fn with_watchdog_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Set the CCA deadline
    pub fn with_answer_timeout(mut self, timeout: Duration) -> Self {
        self.answer_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Set the request queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the write failure policy
    pub fn with_write_failure_policy(mut self, policy: WriteFailurePolicy) -> Self {
        self.write_failure_policy = policy;
        self
    }

    /// Watchdog interval
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    /// Dial timeout
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// CEA deadline
    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_ms.map(Duration::from_millis)
    }

    /// DWA deadline
    pub fn watchdog_timeout(&self) -> Option<Duration> {
        self.watchdog_timeout_ms.map(Duration::from_millis)
    }

    /// CCA deadline
    pub fn answer_timeout(&self) -> Option<Duration> {
        self.answer_timeout_ms.map(Duration::from_millis)
    }

    /// Reject configurations the session cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(DccError::Config("url must not be empty".to_string()));
        }
        if self.origin_host.is_empty() || self.origin_realm.is_empty() {
            return Err(DccError::Config(
                "origin_host and origin_realm are required".to_string(),
            ));
        }
        if self.watchdog_interval_ms == 0 {
            return Err(DccError::Config(
                "watchdog_interval_ms must be positive".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(DccError::Config("queue_capacity must be positive".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(DccError::Config("event_capacity must be positive".to_string()));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}
