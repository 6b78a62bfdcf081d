// Tally - An asynchronous UDP Statsd client for Rust!
//
// Copyright 2024-2026 The Tally Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! An asynchronous UDP Statsd client for Rust!
//!
//! Tally turns counters, sampled counters, gauges, and timers into plain
//! text Statsd lines and ships them over UDP, one metric per datagram,
//! from a background thread. Emitting a metric never blocks your
//! application on the network and never fails because the Statsd server
//! can't be reached.
//!
//! ## Features
//!
//! * Counters, sampled counters, gauges, and timers with tags.
//! * Metric names and tags are sanitized before being sent.
//! * An unbounded in-memory queue so metrics survive a connection that
//!   comes and goes.
//! * A bounded number of connect attempts, with optional recovery using
//!   exponential backoff.
//! * Configuration from plain string keys and values.
//!
//! ## Install
//!
//! To make use of `tally` in your project, add it as a dependency in your `Cargo.toml` file.
//!
//! ```toml
//! [dependencies]
//! tally = "x.y.z"
//! ```
//!
//! ## Usage
//!
//! Create a client from a configuration, then emit metrics. The client
//! connects and starts its background dispatcher when it's built.
//!
//! ```rust,no_run
//! use tally::prelude::*;
//! use tally::{Configuration, StatsdClient, Tags, DEFAULT_PORT};
//!
//! let client = StatsdClient::from_config(Configuration::new("metrics.example.com", DEFAULT_PORT));
//!
//! let mut tags = Tags::new();
//! tags.insert("region".to_string(), "us-east".to_string());
//!
//! client.increment_counter("my.app", "logins", &tags, 1);
//! client.increment_sample_counter("my.app", "requests", &tags, 1, 0.1);
//! client.gauge_reading("my.app", "sessions", &tags, 42);
//! client.timed_event("my.app", "db.query", &tags, 12);
//! ```
//!
//! ### Configuration From Settings
//!
//! Applications that keep their settings as string keys and values (a
//! properties file, the environment, etc.) can build a client directly
//! from them. The Statsd host and port are required, anything missing or
//! malformed is reported before any socket or thread is created.
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use tally::{StatsdClient, CONFIG_HOST, CONFIG_PORT, CONFIG_RECOVERY_MAX_MS};
//!
//! let mut settings = HashMap::new();
//! settings.insert(CONFIG_HOST, "metrics.example.com");
//! settings.insert(CONFIG_PORT, "8125");
//! settings.insert(CONFIG_RECOVERY_MAX_MS, "60000");
//!
//! let client = StatsdClient::from_map(settings).unwrap();
//! ```
//!
//! ### Lifecycle
//!
//! Metrics that couldn't be sent yet are kept in the queue. Stopping the
//! client (by `.disconnect()` or by dropping it) makes one last attempt to
//! send all of them. A client whose connection has given up can be brought
//! back with `.restart()`.
//!
//! ```rust,no_run
//! use tally::{Configuration, StatsdClient};
//!
//! let client = StatsdClient::from_config(Configuration::new("localhost", 8125));
//! if !client.is_connected() {
//!     client.restart();
//! }
//!
//! client.disconnect();
//! ```
//!
//! ### Logging
//!
//! Problems sending metrics are never returned to callers. They're logged
//! using the [log](https://docs.rs/log) crate instead: install whichever
//! logger implementation your application prefers to see them.

#![forbid(unsafe_code)]

pub const DEFAULT_PORT: u16 = 8125;

pub use self::builder::Tags;

pub use self::client::{
    Counted, Gauged, MetricBackend, MetricClient, SampleCounted, StatsdClient, StatsdClientBuilder, Timed,
    UniqueCounted,
};

pub use self::config::{
    Configuration, Endpoint, CONFIG_HOST, CONFIG_IDLE_INTERVAL_MS, CONFIG_PORT, CONFIG_RECOVERY_MAX_MS,
    CONFIG_WRITE_TIMEOUT_MS, DEFAULT_IDLE_INTERVAL,
};

pub use self::connection::{
    Connection, ConnectionState, ConnectionStats, Connector, Transport, UdpConnector, MAX_CONNECT_ATTEMPTS,
};

pub use self::dispatcher::Dispatcher;

pub use self::queue::MetricQueue;

pub use self::types::{ErrorKind, MetricError, MetricLine, MetricResult};

pub mod builder;
mod client;
mod config;
mod connection;
mod dispatcher;
pub mod prelude;
mod queue;
mod types;

// Connectors and servers for testing Tally without a real network.
#[doc(hidden)]
pub mod test;
