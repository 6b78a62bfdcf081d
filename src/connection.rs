// Tally - An asynchronous UDP Statsd client for Rust!
//
// Copyright 2024-2026 The Tally Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::config::Endpoint;
use crate::types::{ErrorKind, MetricError, MetricResult};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Number of consecutive failed connect attempts after which a connection
/// refuses to try again.
pub const MAX_CONNECT_ATTEMPTS: u32 = 3;

// Never wait longer than this before the first recovery of an exhausted
// connection, even when the configured ceiling is larger.
const RECOVERY_INITIAL_INTERVAL: Duration = Duration::from_secs(1);

/// Something that metric payloads can be written to, typically a connected
/// UDP socket.
pub trait Transport: Send {
    /// Write a single datagram, returning the number of bytes written.
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// Factory for `Transport` instances bound to a particular endpoint.
///
/// `UdpConnector` is the only implementation most users need. Other
/// implementations exist to observe or simulate network failures.
pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &Endpoint) -> MetricResult<Box<dyn Transport>>;
}

impl<C> Connector for Arc<C>
where
    C: Connector + ?Sized,
{
    fn connect(&self, endpoint: &Endpoint) -> MetricResult<Box<dyn Transport>> {
        (**self).connect(endpoint)
    }
}

/// Attempt to convert anything implementing the `ToSocketAddrs` trait
/// into a concrete `SocketAddr` instance, returning an `InvalidInput`
/// error if the address could not be parsed.
#[allow(clippy::needless_pass_by_value)]
fn get_addr<A: ToSocketAddrs>(addr: A) -> MetricResult<SocketAddr> {
    match addr.to_socket_addrs()?.next() {
        Some(addr) => Ok(addr),
        None => Err(MetricError::from((ErrorKind::InvalidInput, "No socket addresses yielded"))),
    }
}

/// `Connector` that creates UDP sockets bound to an ephemeral local port and
/// connected to the resolved address of the Statsd server.
#[derive(Debug, Clone, Default)]
pub struct UdpConnector {
    write_timeout: Option<Duration>,
}

impl UdpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a write timeout on every socket created by this connector.
    pub fn with_write_timeout(timeout: Option<Duration>) -> Self {
        UdpConnector { write_timeout: timeout }
    }
}

impl Connector for UdpConnector {
    fn connect(&self, endpoint: &Endpoint) -> MetricResult<Box<dyn Transport>> {
        let addr = get_addr((endpoint.host(), endpoint.port()))?;
        let local: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local)?;
        socket.connect(addr)?;
        if self.write_timeout.is_some() {
            socket.set_write_timeout(self.write_timeout)?;
        }

        Ok(Box::new(UdpTransport { socket }))
    }
}

#[derive(Debug)]
struct UdpTransport {
    socket: UdpSocket,
}

impl Transport for UdpTransport {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf)
    }
}

/// Externally visible state of a `Connection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket is open. The next send or reconnect poll will try to open one.
    Disconnected,
    /// A connect attempt is in progress.
    Connecting,
    /// A socket is open and metrics can be sent.
    Connected,
    /// Too many consecutive connect attempts failed. Further attempts are
    /// refused until the connection is reset (or recovers, if configured).
    Exhausted,
}

/// I/O telemetry for a `Connection`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub bytes_dropped: u64,
    pub packets_dropped: u64,
}

#[derive(Debug, Default)]
struct SocketStats {
    bytes_sent: AtomicU64,
    packets_sent: AtomicU64,
    bytes_dropped: AtomicU64,
    packets_dropped: AtomicU64,
}

impl SocketStats {
    fn incr_sent(&self, n: usize) {
        self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn incr_dropped(&self, n: usize) {
        self.bytes_dropped.fetch_add(n as u64, Ordering::Relaxed);
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }
}

impl From<&SocketStats> for ConnectionStats {
    fn from(stats: &SocketStats) -> Self {
        ConnectionStats {
            bytes_sent: stats.bytes_sent.load(Ordering::Relaxed),
            packets_sent: stats.packets_sent.load(Ordering::Relaxed),
            bytes_dropped: stats.bytes_dropped.load(Ordering::Relaxed),
            packets_dropped: stats.packets_dropped.load(Ordering::Relaxed),
        }
    }
}

enum State {
    Disconnected,
    // Intermediate state while the connector runs. Only left behind if
    // the connector panicked, in which case it behaves like `Disconnected`.
    Connecting,
    Connected(Box<dyn Transport>),
    Exhausted,
}

impl State {
    fn public(&self) -> ConnectionState {
        match self {
            State::Disconnected => ConnectionState::Disconnected,
            State::Connecting => ConnectionState::Connecting,
            State::Connected(_) => ConnectionState::Connected,
            State::Exhausted => ConnectionState::Exhausted,
        }
    }
}

/// Schedule for bringing an exhausted connection back to `Disconnected`
/// without outside help.
struct Recovery {
    backoff: ExponentialBackoff,
    next_at: Option<Instant>,
}

impl Recovery {
    fn new(max_delay: Duration) -> Self {
        let mut backoff = ExponentialBackoff {
            initial_interval: RECOVERY_INITIAL_INTERVAL.min(max_delay),
            max_interval: max_delay,
            max_elapsed_time: None,
            ..Default::default()
        };

        backoff.reset();
        Recovery { backoff, next_at: None }
    }

    fn schedule(&mut self, now: Instant) -> Duration {
        // Jitter can push the backoff past its ceiling
        let max_delay = self.backoff.max_interval;
        let delay = self.backoff.next_backoff().map_or(max_delay, |d| d.min(max_delay));
        self.next_at = Some(now + delay);
        delay
    }

    fn is_due(&self, now: Instant) -> bool {
        self.next_at.map_or(false, |at| now >= at)
    }

    fn reset(&mut self) {
        self.backoff.reset();
        self.next_at = None;
    }
}

struct Inner {
    state: State,
    failures: u32,
    recovery: Option<Recovery>,
}

/// A single outbound UDP socket to a Statsd server with a bounded number
/// of connect attempts.
///
/// A connection starts `Disconnected`. Sending a metric while disconnected
/// first tries to connect. Every failed attempt is counted and once
/// `MAX_CONNECT_ATTEMPTS` consecutive attempts have failed the connection
/// becomes `Exhausted`: any further attempt fails immediately with an
/// `ErrorKind::ConnectionExhausted` error, without touching the network,
/// until `.reset()` is called. A successful connect sets the count of
/// failures back to zero.
///
/// When created with `.with_recovery()` an exhausted connection resets
/// itself after an exponentially increasing delay instead of staying
/// exhausted forever.
///
/// All operations on a connection (`connect`, `disconnect`, `send`, etc.)
/// are mutually exclusive and it's safe to share between threads.
pub struct Connection {
    endpoint: Endpoint,
    connector: Box<dyn Connector>,
    inner: Mutex<Inner>,
    stats: SocketStats,
}

impl Connection {
    /// Create a new, disconnected, connection that will use the given
    /// connector to open sockets to the endpoint.
    pub fn new<C>(endpoint: Endpoint, connector: C) -> Self
    where
        C: Connector + 'static,
    {
        Connection {
            endpoint,
            connector: Box::new(connector),
            inner: Mutex::new(Inner {
                state: State::Disconnected,
                failures: 0,
                recovery: None,
            }),
            stats: SocketStats::default(),
        }
    }

    /// Let an exhausted connection reset itself, waiting at most `max_delay`
    /// between recoveries.
    pub fn with_recovery(self, max_delay: Duration) -> Self {
        self.inner.lock().recovery = Some(Recovery::new(max_delay));
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Close any open socket and attempt to open a new one.
    ///
    /// # Failures
    ///
    /// * `ErrorKind::ConnectionExhausted` if too many attempts have already failed.
    /// * `ErrorKind::InvalidInput` if the endpoint can't be resolved.
    /// * `ErrorKind::Connection` if the socket couldn't be created or connected.
    pub fn connect(&self) -> MetricResult<()> {
        let mut inner = self.inner.lock();
        if let State::Connected(_) | State::Connecting = inner.state {
            inner.state = State::Disconnected;
        }

        self.attempt(&mut inner)
    }

    /// Close the socket if one is open. Calling this on a closed connection
    /// does nothing.
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        if let State::Connected(_) | State::Connecting = inner.state {
            info!("disconnecting from statsd server at {}", self.endpoint);
            inner.state = State::Disconnected;
        }
    }

    /// Close any open socket and forget all previous connect failures,
    /// making an exhausted connection usable again.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if let State::Exhausted = inner.state {
            info!("resetting exhausted connection to {}", self.endpoint);
        }

        inner.state = State::Disconnected;
        inner.failures = 0;
        if let Some(recovery) = inner.recovery.as_mut() {
            recovery.reset();
        }
    }

    /// Try to connect if not already connected, returning `true` if the
    /// connection is usable afterwards.
    ///
    /// This counts as a connect attempt against the limit.
    pub fn poll_reconnect(&self) -> bool {
        let mut inner = self.inner.lock();
        if let State::Connected(_) = inner.state {
            return true;
        }

        match self.attempt(&mut inner) {
            Ok(()) => true,
            Err(e) => {
                debug!("reconnect to {} not possible: {}", self.endpoint, e);
                false
            }
        }
    }

    /// Send a single metric, connecting first if needed.
    ///
    /// The metric is encoded as ISO-8859-1. Errors are never returned to the
    /// caller: metrics that can't be encoded, connect failures, and socket
    /// errors are all logged and reported as `false`. A socket error leaves
    /// the connection `Disconnected`.
    pub fn send(&self, metric: &str) -> bool {
        let payload = match encode_latin1(metric) {
            Ok(p) => p,
            Err(e) => {
                error!("unable to encode metric '{}': {}", metric, e);
                self.stats.incr_dropped(metric.len());
                return false;
            }
        };

        let mut inner = self.inner.lock();
        if !matches!(inner.state, State::Connected(_)) {
            if let Err(e) = self.attempt(&mut inner) {
                debug!("dropping metric, no connection to {}: {}", self.endpoint, e);
                self.stats.incr_dropped(payload.len());
                return false;
            }
        }

        let res = match inner.state {
            State::Connected(ref mut transport) => transport.send(&payload),
            _ => return false,
        };

        match res {
            Ok(written) => {
                self.stats.incr_sent(written);
                true
            }
            Err(e) => {
                error!("unable to send packet to {}: {}", self.endpoint, e);
                self.stats.incr_dropped(payload.len());
                inner.state = State::Disconnected;
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.inner.lock().state, State::Connected(_))
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state.public()
    }

    /// Number of consecutive failed connect attempts.
    pub fn failures(&self) -> u32 {
        self.inner.lock().failures
    }

    pub fn stats(&self) -> ConnectionStats {
        (&self.stats).into()
    }

    fn attempt(&self, inner: &mut Inner) -> MetricResult<()> {
        if let State::Exhausted = inner.state {
            let now = Instant::now();
            match inner.recovery.as_ref() {
                Some(recovery) if recovery.is_due(now) => {
                    info!("retrying exhausted connection to {}", self.endpoint);
                    inner.failures = 0;
                    inner.state = State::Disconnected;
                }
                _ => {
                    return Err(MetricError::from((
                        ErrorKind::ConnectionExhausted,
                        "Connect attempts exhausted",
                    )))
                }
            }
        }

        inner.state = State::Connecting;
        match self.connector.connect(&self.endpoint) {
            Ok(transport) => {
                info!("connected to statsd server at {}", self.endpoint);
                inner.failures = 0;
                inner.state = State::Connected(transport);
                if let Some(recovery) = inner.recovery.as_mut() {
                    recovery.reset();
                }

                Ok(())
            }
            Err(e) => {
                inner.failures += 1;
                warn!(
                    "unable to connect to {} (attempt {} of {}): {}",
                    self.endpoint, inner.failures, MAX_CONNECT_ATTEMPTS, e
                );

                if inner.failures >= MAX_CONNECT_ATTEMPTS {
                    inner.state = State::Exhausted;
                    match inner.recovery.as_mut() {
                        Some(recovery) => {
                            let delay = recovery.schedule(Instant::now());
                            warn!("connection to {} exhausted, retrying in {:?}", self.endpoint, delay);
                        }
                        None => warn!("connection to {} exhausted, no further attempts", self.endpoint),
                    }
                } else {
                    inner.state = State::Disconnected;
                }

                Err(e)
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .field("failures", &self.failures())
            .finish()
    }
}

/// Encode a metric using one byte per character (ISO-8859-1).
pub(crate) fn encode_latin1(metric: &str) -> MetricResult<Vec<u8>> {
    metric
        .chars()
        .map(|c| {
            u8::try_from(u32::from(c))
                .map_err(|_| MetricError::from((ErrorKind::Encoding, format!("'{}' is not valid ISO-8859-1", c))))
        })
        .collect()
}
