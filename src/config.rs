// Tally - An asynchronous UDP Statsd client for Rust!
//
// Copyright 2024-2026 The Tally Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::types::{ErrorKind, MetricError, MetricResult};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Key for the host name or address of the Statsd server. Required.
pub const CONFIG_HOST: &str = "statsd.host";

/// Key for the UDP port of the Statsd server. Required.
pub const CONFIG_PORT: &str = "statsd.port";

/// Key for how long, in milliseconds, the dispatcher waits between checks
/// of the queue when it is idle or the connection is down. Optional.
pub const CONFIG_IDLE_INTERVAL_MS: &str = "statsd.idle_interval_ms";

/// Key for the socket write timeout in milliseconds. Optional.
pub const CONFIG_WRITE_TIMEOUT_MS: &str = "statsd.write_timeout_ms";

/// Key for the longest delay, in milliseconds, between attempts to recover
/// an exhausted connection. Optional, recovery is disabled when absent.
pub const CONFIG_RECOVERY_MAX_MS: &str = "statsd.recovery_max_ms";

const MANDATORY_KEYS: &[&str] = &[CONFIG_HOST, CONFIG_PORT];

pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(100);

// Shorter intervals turn the dispatcher's waits into a spin.
pub(crate) const MIN_IDLE_INTERVAL: Duration = Duration::from_millis(1);

/// Host and port of the remote Statsd server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Endpoint { host: host.into(), port }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Settings used to construct a `StatsdClient`.
///
/// A configuration is normally read from a flat mapping of string keys to
/// string values (as loaded from a properties file, environment, etc.) using
/// `Configuration::from_map`. The host and port of the Statsd server must be
/// present, everything else has a default.
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
/// use tally::{Configuration, CONFIG_HOST, CONFIG_PORT};
///
/// let mut settings = HashMap::new();
/// settings.insert(CONFIG_HOST, "metrics.example.com");
/// settings.insert(CONFIG_PORT, "8125");
///
/// let config = Configuration::from_map(settings).unwrap();
/// assert_eq!("metrics.example.com:8125", config.endpoint().to_string());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    endpoint: Endpoint,
    idle_interval: Duration,
    write_timeout: Option<Duration>,
    recovery_max: Option<Duration>,
}

impl Configuration {
    /// Create a configuration for the given server with defaults for
    /// every optional setting.
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Configuration {
            endpoint: Endpoint::new(host, port),
            idle_interval: DEFAULT_IDLE_INTERVAL,
            write_timeout: None,
            recovery_max: None,
        }
    }

    /// Build a configuration from string keys and values.
    ///
    /// # Failures
    ///
    /// Returns an error of kind `ErrorKind::Configuration` if:
    ///
    /// * `statsd.host` or `statsd.port` is missing.
    /// * Any of the numeric settings cannot be parsed.
    /// * `statsd.idle_interval_ms` is zero.
    pub fn from_map<I, K, V>(settings: I) -> MetricResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let settings: HashMap<String, String> = settings.into_iter().map(|(k, v)| (k.into(), v.into())).collect();

        for key in MANDATORY_KEYS {
            if !settings.contains_key(*key) {
                return Err(MetricError::from((
                    ErrorKind::Configuration,
                    format!("mandatory configuration value {} was not specified", key),
                )));
            }
        }

        let host = settings[CONFIG_HOST].trim();
        let port = parse_setting::<u16>(&settings, CONFIG_PORT)?.ok_or_else(|| {
            MetricError::from((
                ErrorKind::Configuration,
                format!("mandatory configuration value {} was not specified", CONFIG_PORT),
            ))
        })?;
        let mut config = Configuration::new(host, port);

        if let Some(ms) = parse_setting::<u64>(&settings, CONFIG_IDLE_INTERVAL_MS)? {
            if ms == 0 {
                return Err(MetricError::from((
                    ErrorKind::Configuration,
                    format!("configuration value {} must be greater than zero", CONFIG_IDLE_INTERVAL_MS),
                )));
            }
            config = config.with_idle_interval(Duration::from_millis(ms));
        }

        if let Some(ms) = parse_setting::<u64>(&settings, CONFIG_WRITE_TIMEOUT_MS)? {
            config = config.with_write_timeout(Duration::from_millis(ms));
        }

        if let Some(ms) = parse_setting::<u64>(&settings, CONFIG_RECOVERY_MAX_MS)? {
            config = config.with_recovery(Duration::from_millis(ms));
        }

        Ok(config)
    }

    /// Set how long the dispatcher waits between checks when it has
    /// nothing to send or cannot send. Intervals below one millisecond
    /// are raised to one millisecond.
    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval.max(MIN_IDLE_INTERVAL);
        self
    }

    /// Set a write timeout on the UDP socket.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Allow an exhausted connection to recover on its own, waiting an
    /// exponentially increasing delay between recoveries, never longer
    /// than `max_delay`.
    ///
    /// Without this, a connection that has run out of connect attempts
    /// stays unusable until it's explicitly reset or the client restarts.
    pub fn with_recovery(mut self, max_delay: Duration) -> Self {
        self.recovery_max = Some(max_delay);
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn idle_interval(&self) -> Duration {
        self.idle_interval
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    pub fn recovery_max(&self) -> Option<Duration> {
        self.recovery_max
    }
}

fn parse_setting<T>(settings: &HashMap<String, String>, key: &str) -> MetricResult<Option<T>>
where
    T: std::str::FromStr,
{
    match settings.get(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            MetricError::from((
                ErrorKind::Configuration,
                format!("configuration value {} has an invalid value '{}'", key, raw),
            ))
        }),
    }
}
