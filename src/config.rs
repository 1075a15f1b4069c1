//! Configuration for a replication channel.
//!
//! Configuration is passed to [`ReplicationEngine::new()`](crate::ReplicationEngine::new)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//! The engine never reads process-wide state itself; the optional
//! [`ChannelConfig::from_env()`] helper exists for callers that want the
//! conventional environment-variable discovery, but it is outside the core.
//!
//! # Quick Start
//!
//! ```rust
//! use feed_replicator::config::ChannelConfig;
//!
//! let config = ChannelConfig {
//!     source: "http://127.0.0.1:5984/mydb".into(),
//!     target: "store://127.0.0.1:27017/mydb/docs".into(),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Invariants
//!
//! `validate()` rejects:
//! - an empty source or target endpoint
//! - a target whose path is not exactly `/database/collection`
//! - `timeout_sec <= heartbeat_sec` (the inactivity supervisor would fire
//!   spuriously between keepalives)

use crate::error::{ChannelError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variables checked by [`ChannelConfig::from_env()`], in
/// precedence order.
const SOURCE_ENV_VARS: &[&str] = &["REPLICATOR_SOURCE_URL", "SOURCE_URL"];
const TARGET_ENV_VARS: &[&str] = &["REPLICATOR_TARGET_URL", "TARGET_URL"];

/// Configuration for a single source → target replication channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Base URL of the source change-feed database.
    /// Example: `"http://127.0.0.1:5984/mydb"`.
    #[serde(default)]
    pub source: String,

    /// Target store locator: `scheme://host[:port]/database/collection`.
    /// Exactly two path segments are required.
    #[serde(default)]
    pub target: String,

    /// Keepalive interval requested from the source, in seconds.
    /// The source emits an empty line at this interval while idle.
    #[serde(default = "default_heartbeat_sec")]
    pub heartbeat_sec: u64,

    /// Inactivity window, in seconds. If the feed produces no bytes for
    /// this long the connection is aborted and reopened from the cursor.
    /// Must be strictly greater than `heartbeat_sec`.
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,

    /// Maximum number of in-flight target writes across distinct
    /// document ids. Writes for the same id are always serialized.
    #[serde(default = "default_max_in_flight_writes")]
    pub max_in_flight_writes: usize,
}

fn default_heartbeat_sec() -> u64 {
    30
}

fn default_timeout_sec() -> u64 {
    60
}

fn default_max_in_flight_writes() -> usize {
    32
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            source: String::new(),
            target: String::new(),
            heartbeat_sec: 30,
            timeout_sec: 60,
            max_in_flight_writes: 32,
        }
    }
}

impl ChannelConfig {
    /// Create a config for testing with short supervision windows.
    pub fn for_testing(source: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            heartbeat_sec: 1,
            timeout_sec: 2,
            max_in_flight_writes: 32,
        }
    }

    /// Discover endpoints from the environment.
    ///
    /// Checks `REPLICATOR_SOURCE_URL` then `SOURCE_URL` for the source,
    /// and `REPLICATOR_TARGET_URL` then `TARGET_URL` for the target.
    /// Unset variables leave the field empty; `validate()` reports the
    /// gap. This helper is a convenience for process wiring — the engine
    /// itself only ever sees the explicit config value.
    pub fn from_env() -> Self {
        let lookup = |vars: &[&str]| {
            vars.iter()
                .find_map(|v| std::env::var(v).ok().filter(|s| !s.is_empty()))
                .unwrap_or_default()
        };
        Self {
            source: lookup(SOURCE_ENV_VARS),
            target: lookup(TARGET_ENV_VARS),
            ..Default::default()
        }
    }

    /// Keepalive interval as a [`Duration`].
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_sec)
    }

    /// Inactivity window as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }

    /// Validate the configuration and parse the target locator.
    ///
    /// Any failure here is a fatal configuration error: the channel never
    /// starts and no connection attempt is made.
    pub fn validate(&self) -> Result<TargetLocator> {
        if self.source.trim().is_empty() {
            return Err(ChannelError::Config("Source URL is missing".to_string()));
        }
        if self.target.trim().is_empty() {
            return Err(ChannelError::Config("Target URL is missing".to_string()));
        }
        if self.timeout_sec <= self.heartbeat_sec {
            return Err(ChannelError::Config(format!(
                "timeout ({}s) must be greater than heartbeat ({}s)",
                self.timeout_sec, self.heartbeat_sec
            )));
        }
        TargetLocator::parse(&self.target)
    }
}

/// A parsed target store locator.
///
/// The target path must resolve to exactly two non-empty segments:
/// the database and the collection. `base_url` is the locator with the
/// path stripped, suitable for opening a store connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetLocator {
    pub base_url: String,
    pub database: String,
    pub collection: String,
}

impl TargetLocator {
    /// Parse and validate a target locator.
    ///
    /// Returns [`ChannelError::Config`] for anything that is not a URL
    /// with exactly two non-empty path segments.
    pub fn parse(target: &str) -> Result<Self> {
        let url = reqwest::Url::parse(target)
            .map_err(|e| ChannelError::Config(format!("Invalid Target URL: {}", e)))?;

        let segments: Vec<&str> = url
            .path()
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        if segments.len() != 2 {
            return Err(ChannelError::Config(format!(
                "Invalid Target URL: expected /database/collection, got {:?}",
                url.path()
            )));
        }

        let mut base = url.clone();
        base.set_path("");
        base.set_query(None);
        base.set_fragment(None);

        Ok(Self {
            base_url: base.to_string().trim_end_matches('/').to_string(),
            database: segments[0].to_string(),
            collection: segments[1].to_string(),
        })
    }
}
