// Tally - An asynchronous UDP Statsd client for Rust!
//
// Copyright 2024-2026 The Tally Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Utilities for testing Tally itself.
//!
//! Functionality exported to be used by integration tests. This module
//! is NOT part of the Tally API and is subject to change at any time.

use crate::config::Endpoint;
use crate::connection::{Connector, Transport};
use crate::types::{ErrorKind, MetricError, MetricResult};
use crossbeam_channel::{self, Receiver, Sender};
use std::io;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Shared counter that can be inspected after the thing incrementing it
/// has been moved elsewhere.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    fn incr(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }
}

/// Shared flag used to change the behavior of a connector or transport from
/// within a test.
#[derive(Debug, Clone, Default)]
pub struct Switch(Arc<AtomicBool>);

impl Switch {
    fn on() -> Self {
        Switch(Arc::new(AtomicBool::new(true)))
    }

    pub fn set(&self, val: bool) {
        self.0.store(val, Ordering::Release);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// `Connector` that doesn't touch the network. Every payload written to a
/// transport it creates is sent to a channel instead.
///
/// Connect attempts can be made to fail with `.reachable()` and writes can
/// be made to fail with `.failing_sends()`.
#[derive(Debug)]
pub struct SpyConnector {
    sender: Sender<Vec<u8>>,
    connects: Counter,
    reachable: Switch,
    failing_sends: Switch,
}

impl SpyConnector {
    pub fn new() -> (Receiver<Vec<u8>>, Self) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let connector = SpyConnector {
            sender,
            connects: Counter::default(),
            reachable: Switch::on(),
            failing_sends: Switch::default(),
        };

        (receiver, connector)
    }

    /// Number of times `.connect()` has been called, successful or not.
    pub fn connects(&self) -> Counter {
        self.connects.clone()
    }

    /// When off, every connect attempt fails with a connection error.
    pub fn reachable(&self) -> Switch {
        self.reachable.clone()
    }

    /// When on, every write to a transport fails with a broken pipe.
    pub fn failing_sends(&self) -> Switch {
        self.failing_sends.clone()
    }
}

impl Connector for SpyConnector {
    fn connect(&self, _endpoint: &Endpoint) -> MetricResult<Box<dyn Transport>> {
        self.connects.incr();
        if !self.reachable.get() {
            return Err(MetricError::from(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "spy connector unreachable",
            )));
        }

        Ok(Box::new(SpyTransport {
            sender: self.sender.clone(),
            failing: self.failing_sends.clone(),
        }))
    }
}

struct SpyTransport {
    sender: Sender<Vec<u8>>,
    failing: Switch,
}

impl Transport for SpyTransport {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.failing.get() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "spy transport failing"));
        }

        // If the receiving end has been dropped, the test doesn't care anymore.
        let _ = self.sender.send(buf.to_vec());
        Ok(buf.len())
    }
}

/// `Connector` where every connect attempt fails.
#[derive(Debug, Default)]
pub struct FailingConnector {
    connects: Counter,
}

impl FailingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connects(&self) -> Counter {
        self.connects.clone()
    }
}

impl Connector for FailingConnector {
    fn connect(&self, _endpoint: &Endpoint) -> MetricResult<Box<dyn Transport>> {
        self.connects.incr();
        Err(MetricError::from((ErrorKind::Connection, "failing connector")))
    }
}

/// `Connector` whose transports panic when asked to write a payload that
/// starts with `panic`. Everything else goes to a channel.
#[derive(Debug)]
pub struct PanickingConnector {
    sender: Sender<Vec<u8>>,
}

impl PanickingConnector {
    pub fn new() -> (Receiver<Vec<u8>>, Self) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (receiver, PanickingConnector { sender })
    }
}

impl Connector for PanickingConnector {
    fn connect(&self, _endpoint: &Endpoint) -> MetricResult<Box<dyn Transport>> {
        Ok(Box::new(PanickingTransport {
            sender: self.sender.clone(),
        }))
    }
}

struct PanickingTransport {
    sender: Sender<Vec<u8>>,
}

impl Transport for PanickingTransport {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.starts_with(b"panic") {
            panic!("panicking transport asked to send {:?}", String::from_utf8_lossy(buf));
        }

        let _ = self.sender.send(buf.to_vec());
        Ok(buf.len())
    }
}

/// Basic server for listening for UDP datagrams on a local port.
///
/// This server reads datagrams in a loop, decodes them as ISO-8859-1, and
/// hands each to a consumer. It's only meant for testing UDP related
/// functionality in Tally itself.
pub struct UdpSocketServer {
    socket: UdpSocket,
    shutdown: AtomicBool,
    interval: Duration,
}

impl UdpSocketServer {
    /// Bind to an ephemeral port on the loopback interface, using the provided
    /// interval as the read timeout of the main loop.
    pub fn bind(interval: Duration) -> io::Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0")?;
        socket.set_read_timeout(Some(interval))?;

        Ok(UdpSocketServer {
            socket,
            shutdown: AtomicBool::new(false),
            interval,
        })
    }

    pub fn port(&self) -> io::Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Run until the `.shutdown()` method is called, passing each datagram
    /// to the consumer.
    pub fn run<F>(&self, consumer: F)
    where
        F: Fn(String),
    {
        let mut buf = [0u8; 1024];

        loop {
            match self.socket.recv(&mut buf) {
                Ok(n) => consumer(buf[..n].iter().map(|&b| char::from(b)).collect()),
                Err(e) => {
                    // Hitting the read timeout is expected, it's the chance to
                    // notice a shutdown. Anything else is worth mentioning.
                    if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut {
                        if self.shutdown.load(Ordering::Acquire) {
                            break;
                        }
                    } else {
                        eprintln!("Error: {} - {:?}", e, e.kind());
                    }
                }
            }
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Indicate that the server should stop its main run loop.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

/// Wrapper around a `UdpSocketServer` to start and stop it in the course of
/// running a single test.
///
/// Every datagram received is forwarded to the returned channel. The server
/// is stopped and the thread it was running in is joined when the harness
/// is dropped.
pub struct UdpServerHarness {
    port: u16,
    server: Arc<UdpSocketServer>,
    thread: Option<JoinHandle<()>>,
}

impl UdpServerHarness {
    pub fn start() -> io::Result<(Receiver<String>, Self)> {
        let server = Arc::new(UdpSocketServer::bind(Duration::from_millis(50))?);
        let port = server.port()?;
        let (tx, rx) = crossbeam_channel::unbounded();

        let server_local = Arc::clone(&server);
        let thread = thread::spawn(move || {
            server_local.run(move |datagram| {
                let _ = tx.send(datagram);
            });
        });

        let harness = UdpServerHarness {
            port,
            server,
            thread: Some(thread),
        };

        Ok((rx, harness))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", self.port)
    }
}

impl Drop for UdpServerHarness {
    fn drop(&mut self) {
        self.server.shutdown();
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FailingConnector, SpyConnector, UdpServerHarness};
    use crate::config::Endpoint;
    use crate::connection::Connector;
    use std::net::UdpSocket;
    use std::time::Duration;

    #[test]
    fn test_spy_connector_forwards_payloads() {
        let (rx, connector) = SpyConnector::new();
        let mut transport = connector.connect(&Endpoint::new("localhost", 8125)).unwrap();

        assert_eq!(7, transport.send(b"foo:1|c").unwrap());
        assert_eq!(b"foo:1|c".to_vec(), rx.recv().unwrap());
        assert_eq!(1, connector.connects().get());
    }

    #[test]
    fn test_spy_connector_switches() {
        let (_rx, connector) = SpyConnector::new();
        connector.reachable().set(false);
        assert!(connector.connect(&Endpoint::new("localhost", 8125)).is_err());

        connector.reachable().set(true);
        connector.failing_sends().set(true);
        let mut transport = connector.connect(&Endpoint::new("localhost", 8125)).unwrap();
        assert!(transport.send(b"foo:1|c").is_err());
        assert_eq!(2, connector.connects().get());
    }

    #[test]
    fn test_failing_connector() {
        let connector = FailingConnector::new();
        assert!(connector.connect(&Endpoint::new("localhost", 8125)).is_err());
        assert!(connector.connect(&Endpoint::new("localhost", 8125)).is_err());
        assert_eq!(2, connector.connects().get());
    }

    #[test]
    fn test_udp_server_harness_receives() {
        let (rx, harness) = UdpServerHarness::start().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.send_to(b"foo:1|c", ("127.0.0.1", harness.port())).unwrap();

        assert_eq!("foo:1|c", rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }
}
