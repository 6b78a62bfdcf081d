// Tally - An asynchronous UDP Statsd client for Rust!
//
// Copyright 2024-2026 The Tally Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::config::MIN_IDLE_INTERVAL;
use crate::connection::Connection;
use crate::queue::MetricQueue;
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Background sender that moves metrics from a `MetricQueue` to a
/// `Connection`.
///
/// While running, the dispatcher repeatedly:
///
/// 1. Waits (up to the idle interval) for the queue to be non-empty.
/// 2. If the connection is usable (or can be reconnected), sends every
///    metric that was queued when the burst started, in order.
/// 3. Otherwise waits the idle interval and checks again. Nothing is
///    removed from the queue while the connection is down.
///
/// Calling `.shutdown()` stops the loop, forces one last drain of the queue
/// whether the connection is usable or not, and waits for the background
/// thread to exit. Each metric is passed to the connection at most once:
/// failed sends are logged and the metric is discarded.
///
/// If sending panics, the background thread is replaced by a new one and
/// processing continues. The number of times this has happened is available
/// from `.panics()`.
pub struct Dispatcher {
    worker: Arc<Worker>,
    lifecycle: Mutex<()>,
}

impl Dispatcher {
    /// Create a new, stopped, dispatcher. An idle interval below one
    /// millisecond is raised to one millisecond.
    pub fn new(queue: Arc<MetricQueue>, connection: Arc<Connection>, idle_interval: Duration) -> Self {
        Dispatcher {
            worker: Arc::new(Worker::new(queue, connection, idle_interval)),
            lifecycle: Mutex::new(()),
        }
    }

    /// Start processing the queue in a background thread. Returns `false`,
    /// without doing anything, if the dispatcher is already running.
    pub fn start(&self) -> bool {
        let _guard = self.lifecycle.lock();
        if self.worker.running.swap(true, Ordering::AcqRel) {
            return false;
        }

        info!("starting dispatcher for {}", self.worker.connection.endpoint());
        // Holding the slot while spawning means a thread that panics right
        // away can't have its replacement overwritten by this handle.
        let mut slot = self.worker.thread.lock();
        *slot = Some(spawn_worker_in_thread(Arc::clone(&self.worker)));
        true
    }

    /// Stop processing, send everything still queued, and wait for the
    /// background thread to exit. Returns the number of metrics passed to
    /// the connection by the final drain, zero if the dispatcher wasn't
    /// running.
    ///
    /// This blocks for as long as the final drain takes.
    pub fn shutdown(&self) -> usize {
        let _guard = self.lifecycle.lock();
        if !self.worker.running.load(Ordering::Acquire) {
            return 0;
        }

        self.worker.stats.final_drain.store(0, Ordering::Release);
        self.worker.running.store(false, Ordering::Release);

        info!("stopping dispatcher for {}", self.worker.connection.endpoint());
        self.worker.queue.wake();

        // A panic during the final drain replaces the thread being joined,
        // keep going until the last one exits normally.
        loop {
            let handle = self.worker.thread.lock().take();
            match handle {
                Some(h) => {
                    let _ = h.join();
                }
                None => break,
            }
        }

        self.worker.stats.final_drain.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.worker.running.load(Ordering::Acquire)
    }

    /// Number of times the background thread panicked and was restarted.
    pub fn panics(&self) -> u64 {
        self.worker.stats.panics()
    }

    /// Number of metrics handed to the connection, successfully sent or not.
    pub fn dispatched(&self) -> u64 {
        self.worker.stats.dispatched()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("running", &self.is_running())
            .field("panics", &self.panics())
            .field("dispatched", &self.dispatched())
            .finish()
    }
}

#[derive(Debug, Default)]
struct WorkerStats {
    panics: AtomicU64,
    dispatched: AtomicU64,
    final_drain: AtomicUsize,
}

impl WorkerStats {
    fn incr_panic(&self) {
        self.panics.fetch_add(1, Ordering::Release);
    }

    fn panics(&self) -> u64 {
        self.panics.load(Ordering::Acquire)
    }

    fn incr_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Release);
    }

    fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Acquire)
    }
}

/// Create a thread and run the worker in it to completion
///
/// This function uses a `Sentinel` struct to make sure that any panics from
/// running the worker result in another thread being spawned to start running
/// the worker again.
fn spawn_worker_in_thread(worker: Arc<Worker>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut sentinel = Sentinel::new(&worker);
        worker.run();
        sentinel.cancel();
    })
}

/// Struct for ensuring a worker runs to completion correctly, without
/// panicking.
///
/// The sentinel will spawn a new thread to continue running the worker
/// in its destructor unless the `.cancel()` method is called after the
/// worker completes (which won't happen if the worker panics).
struct Sentinel<'a> {
    worker: &'a Arc<Worker>,
    active: bool,
}

impl<'a> Sentinel<'a> {
    fn new(worker: &'a Arc<Worker>) -> Sentinel<'a> {
        Sentinel { worker, active: true }
    }

    fn cancel(&mut self) {
        self.active = false;
    }
}

impl<'a> Drop for Sentinel<'a> {
    fn drop(&mut self) {
        if self.active {
            error!("dispatcher thread panicked, starting a new one");
            self.worker.stats.incr_panic();
            let mut slot = self.worker.thread.lock();
            *slot = Some(spawn_worker_in_thread(Arc::clone(self.worker)));
        }
    }
}

/// State shared between a `Dispatcher` and the thread doing the sending.
struct Worker {
    queue: Arc<MetricQueue>,
    connection: Arc<Connection>,
    idle_interval: Duration,
    running: AtomicBool,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
    stats: WorkerStats,
}

impl Worker {
    fn new(queue: Arc<MetricQueue>, connection: Arc<Connection>, idle_interval: Duration) -> Self {
        Worker {
            queue,
            connection,
            idle_interval: idle_interval.max(MIN_IDLE_INTERVAL),
            running: AtomicBool::new(false),
            thread: Mutex::new(None),
            stats: WorkerStats::default(),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn run(&self) {
        while self.is_running() {
            if !self.queue.wait_for_entries(self.idle_interval) || !self.is_running() {
                continue;
            }

            if self.connection.is_connected() || self.connection.poll_reconnect() {
                self.burst(false);
            } else {
                trace!("{} metrics waiting for a connection", self.queue.len());
                self.queue.park(self.idle_interval);
            }
        }

        let (drained, failed) = self.burst(true);
        if failed > 0 {
            warn!(
                "final drain could not send {} of {} metrics to {}",
                failed,
                drained,
                self.connection.endpoint()
            );
        } else {
            debug!("final drain sent {} metrics to {}", drained, self.connection.endpoint());
        }
    }

    // Returns the number of metrics removed from the queue and how many of
    // those could not be sent.
    fn burst(&self, last: bool) -> (usize, usize) {
        let mut failed = 0;
        let drained = self.queue.drain_burst(|line| {
            self.stats.incr_dispatched();
            if last {
                self.stats.final_drain.fetch_add(1, Ordering::AcqRel);
            }

            if !self.connection.send(line.as_str()) {
                failed += 1;
            }
        });

        trace!("burst of {} metrics to {}, {} failed", drained, self.connection.endpoint(), failed);
        (drained, failed)
    }
}
