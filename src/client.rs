// Tally - An asynchronous UDP Statsd client for Rust!
//
// Copyright 2024-2026 The Tally Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::builder::{self, Tags};
use crate::config::Configuration;
use crate::connection::{Connection, ConnectionStats, Connector, UdpConnector};
use crate::dispatcher::Dispatcher;
use crate::queue::MetricQueue;
use crate::types::{ErrorKind, MetricError, MetricLine, MetricResult};
use log::{info, warn};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Trait for incrementing and decrementing counters.
///
/// Counters are simple values incremented or decremented by a client. The
/// rates at which these events occur or average values will be determined
/// by the server receiving them. Examples of counter uses include number
/// of logins to a system or requests received.
pub trait Counted: MetricBackend {
    /// Increment or decrement the counter by the given amount
    fn increment_counter(&self, prefix: &str, bucket: &str, tags: &Tags, count: i64) {
        self.enqueue(builder::build_counter(prefix, bucket, tags, count));
    }
}

/// Trait for counters that the caller has already sampled.
///
/// The sample rate is sent along with the count so that the server can
/// scale it. No sampling is done by this library: every call results in
/// a metric being sent.
pub trait SampleCounted: MetricBackend {
    /// Increment or decrement the counter by the given amount, noting that
    /// it represents `sample_rate` of the actual events.
    fn increment_sample_counter(&self, prefix: &str, bucket: &str, tags: &Tags, count: i64, sample_rate: f64) {
        self.enqueue(builder::build_sample_counter(prefix, bucket, tags, count, sample_rate));
    }
}

/// Trait for recording gauge values.
///
/// Gauge values are an instantaneous measurement of a value determined
/// by the client. They do not change unless changed by the client. Examples
/// include things like load average or how many connections are active.
pub trait Gauged: MetricBackend {
    /// Record a gauge value with the given bucket
    fn gauge_reading(&self, prefix: &str, bucket: &str, tags: &Tags, reading: i64) {
        self.enqueue(builder::build_gauge(prefix, bucket, tags, reading));
    }
}

/// Trait for recording timings in milliseconds.
///
/// Timings are a positive number of milliseconds between a start and end
/// time. Examples include time taken to render a web page or time taken
/// for a database call to return.
pub trait Timed: MetricBackend {
    /// Record a timing in milliseconds with the given bucket
    fn timed_event(&self, prefix: &str, bucket: &str, tags: &Tags, duration_ms: u64) {
        self.enqueue(builder::build_timer(prefix, bucket, tags, duration_ms));
    }
}

/// Trait for counting unique occurrences of a value.
///
/// Unique counters are part of the client API but aren't supported by
/// this library: calling `increment_unique_counter` always fails with an
/// `ErrorKind::Unsupported` error and nothing is sent.
pub trait UniqueCounted: MetricBackend {
    fn increment_unique_counter(&self, _prefix: &str, _bucket: &str, _tags: &Tags, _value: i64) -> MetricResult<()> {
        Err(MetricError::from((
            ErrorKind::Unsupported,
            "Unique counters are not supported",
        )))
    }
}

/// Trait that encompasses all other traits for sending metrics.
///
/// If you wish to use `StatsdClient` with a generic type or place a
/// `StatsdClient` instance behind a pointer (such as a `Box`) this will allow
/// you to reference all the implemented methods for recording metrics, while
/// using a single trait. An example of this is shown below.
///
/// ```no_run
/// use std::sync::Arc;
/// use tally::prelude::*;
/// use tally::{Configuration, StatsdClient, Tags, DEFAULT_PORT};
///
/// let client: Arc<dyn MetricClient + Send + Sync> = Arc::new(
///     StatsdClient::from_config(Configuration::new("localhost", DEFAULT_PORT))
/// );
///
/// let tags = Tags::new();
/// client.increment_counter("my.app", "requests", &tags, 1);
/// client.timed_event("my.app", "request.time", &tags, 25);
/// client.gauge_reading("my.app", "connections", &tags, 12);
/// ```
pub trait MetricClient: Counted + SampleCounted + Gauged + Timed + UniqueCounted {}

/// Where built metrics go once they've been formatted.
///
/// This trait is sealed, it's only implemented by `StatsdClient`.
pub trait MetricBackend: private::Sealed {
    /// Add a fully formed metric to the pending queue without blocking.
    fn enqueue(&self, line: MetricLine);
}

mod private {
    pub trait Sealed {}
}

/// Builder for creating and customizing `StatsdClient` instances.
///
/// Instances of the builder should be created by calling the `::builder()`
/// method on the `StatsdClient` struct.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use tally::{Configuration, StatsdClient, UdpConnector};
///
/// let config = Configuration::new("metrics.example.com", 8125)
///     .with_idle_interval(Duration::from_millis(50));
///
/// let client = StatsdClient::builder(config)
///     .with_connector(UdpConnector::with_write_timeout(Some(Duration::from_millis(10))))
///     .build();
/// ```
pub struct StatsdClientBuilder {
    config: Configuration,
    connector: Option<Arc<dyn Connector>>,
}

impl StatsdClientBuilder {
    fn new(config: Configuration) -> Self {
        StatsdClientBuilder { config, connector: None }
    }

    /// Use a particular connector to open sockets to the Statsd server
    /// instead of a `UdpConnector` configured from the `Configuration`.
    pub fn with_connector<C>(mut self, connector: C) -> Self
    where
        C: Connector + 'static,
    {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Construct a new `StatsdClient`, connect it, and start sending metrics
    /// in the background.
    ///
    /// A failure to connect isn't an error: it's logged and the client is
    /// returned without a running dispatcher. Metrics emitted in the meantime
    /// are queued until `.restart()` or `.start_measurements()` is called.
    pub fn build(self) -> StatsdClient {
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(UdpConnector::with_write_timeout(self.config.write_timeout())) as Arc<dyn Connector>);

        let queue = Arc::new(MetricQueue::new());
        let runtime = Runtime::new(&self.config, &connector, &queue);
        runtime.start();

        StatsdClient {
            config: self.config,
            connector,
            queue,
            runtime: RwLock::new(runtime),
        }
    }
}

/// Connection and dispatcher that get replaced as a pair on restart.
struct Runtime {
    connection: Arc<Connection>,
    dispatcher: Dispatcher,
}

impl Runtime {
    fn new(config: &Configuration, connector: &Arc<dyn Connector>, queue: &Arc<MetricQueue>) -> Self {
        let mut connection = Connection::new(config.endpoint().clone(), Arc::clone(connector));
        if let Some(max_delay) = config.recovery_max() {
            connection = connection.with_recovery(max_delay);
        }

        let connection = Arc::new(connection);
        let dispatcher = Dispatcher::new(Arc::clone(queue), Arc::clone(&connection), config.idle_interval());

        Runtime { connection, dispatcher }
    }

    fn start(&self) {
        match self.connection.connect() {
            Ok(()) => {
                self.dispatcher.start();
            }
            Err(e) => warn!(
                "unable to connect to statsd server at {}, metrics will be queued: {}",
                self.connection.endpoint(),
                e
            ),
        }
    }

    fn stop(&self) {
        self.dispatcher.shutdown();
        self.connection.disconnect();
    }
}

/// Client for Statsd that implements various traits to record metrics.
///
/// # Traits
///
/// The client is the main entry point for users of this library. It supports
/// several traits for recording metrics of different types.
///
/// * `Counted` for emitting counters.
/// * `SampleCounted` for emitting counters sampled by the caller.
/// * `Timed` for emitting timings.
/// * `Gauged` for emitting gauge values.
/// * `UniqueCounted` for unique counters, which are not supported.
/// * `MetricClient` for a combination of all of the above.
///
/// # Delivery
///
/// Emitting a metric formats it and adds it to an in-memory queue. It never
/// blocks on the network and never fails because of the state of the
/// connection. A background dispatcher thread sends queued metrics, one per
/// UDP datagram, in the order they were emitted. While the server can't be
/// reached metrics stay queued (the queue has no upper bound).
///
/// # Lifecycle
///
/// A client is connected and started when it's built. It can be stopped with
/// `.finish_measurements()` or `.disconnect()`, started again with
/// `.start_measurements()`, and rebuilt from scratch with `.restart()`.
/// Dropping the client disconnects it, sending everything still queued first.
///
/// # Threading
///
/// The `StatsdClient` is designed to work in a multithreaded application. All
/// parts of the client can be shared between threads (i.e. it is `Send` and
/// `Sync`). Wrap it in an `Arc` to share it.
///
/// ```no_run
/// use std::sync::Arc;
/// use std::thread;
/// use tally::prelude::*;
/// use tally::{Configuration, StatsdClient, Tags};
///
/// let client = Arc::new(StatsdClient::from_config(Configuration::new("localhost", 8125)));
/// let client_ref = Arc::clone(&client);
///
/// let t = thread::spawn(move || {
///     let mut tags = Tags::new();
///     tags.insert("region".to_string(), "us-east".to_string());
///     client_ref.increment_counter("my.app", "worker.started", &tags, 1);
/// });
///
/// t.join().unwrap();
/// ```
pub struct StatsdClient {
    config: Configuration,
    connector: Arc<dyn Connector>,
    queue: Arc<MetricQueue>,
    runtime: RwLock<Runtime>,
}

impl StatsdClient {
    /// Create a new client, sending metrics over UDP to the server named
    /// by the configuration.
    pub fn from_config(config: Configuration) -> Self {
        Self::builder(config).build()
    }

    /// Create a new client from string keys and values.
    ///
    /// # Failures
    ///
    /// Returns an error of kind `ErrorKind::Configuration` when the mandatory
    /// `statsd.host` or `statsd.port` keys are missing or malformed. No socket
    /// or thread exists at that point.
    ///
    /// # Example
    ///
    /// ```
    /// use tally::{ErrorKind, StatsdClient, CONFIG_HOST};
    ///
    /// let res = StatsdClient::from_map(vec![(CONFIG_HOST, "localhost")]);
    /// assert_eq!(ErrorKind::Configuration, res.unwrap_err().kind());
    /// ```
    pub fn from_map<I, K, V>(settings: I) -> MetricResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Ok(Self::from_config(Configuration::from_map(settings)?))
    }

    /// Create a new builder for the given configuration.
    pub fn builder(config: Configuration) -> StatsdClientBuilder {
        StatsdClientBuilder::new(config)
    }

    /// Stop sending (after one last attempt to send everything queued), close
    /// the connection, and start over with a brand new connection. Connect
    /// attempts that were exhausted before are available again.
    ///
    /// If the dispatcher was running, metrics still queued get one last
    /// attempt on the old connection and are dropped if that fails. If it
    /// wasn't (because the client never connected, for example) they're kept
    /// and sent once the new connection is up.
    pub fn restart(&self) {
        let mut runtime = self.runtime.write();
        info!("restarting statsd client for {}", self.config.endpoint());

        runtime.stop();
        *runtime = Runtime::new(&self.config, &self.connector, &self.queue);
        runtime.start();
    }

    /// Stop sending metrics and close the connection. Everything queued is
    /// passed to the connection one last time before it's closed. Calling
    /// this on a disconnected client does nothing.
    pub fn disconnect(&self) {
        self.runtime.read().stop();
    }

    /// Start the background dispatcher if it isn't running.
    pub fn start_measurements(&self) {
        self.runtime.read().dispatcher.start();
    }

    /// Stop the background dispatcher if it's running, attempting to send
    /// everything queued before it stops.
    pub fn finish_measurements(&self) {
        self.runtime.read().dispatcher.shutdown();
    }

    pub fn is_connected(&self) -> bool {
        self.runtime.read().connection.is_connected()
    }

    pub fn is_running(&self) -> bool {
        self.runtime.read().dispatcher.is_running()
    }

    /// Number of metrics waiting to be sent.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// I/O statistics of the current connection.
    pub fn stats(&self) -> ConnectionStats {
        self.runtime.read().connection.stats()
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }
}

impl private::Sealed for StatsdClient {}

impl MetricBackend for StatsdClient {
    fn enqueue(&self, line: MetricLine) {
        self.queue.enqueue(line);
    }
}

impl Counted for StatsdClient {}

impl SampleCounted for StatsdClient {}

impl Gauged for StatsdClient {}

impl Timed for StatsdClient {}

impl UniqueCounted for StatsdClient {}

impl MetricClient for StatsdClient {}

impl Drop for StatsdClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for StatsdClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsdClient")
            .field("config", &self.config)
            .field("queued", &self.queued())
            .field("connected", &self.is_connected())
            .field("running", &self.is_running())
            .finish()
    }
}
