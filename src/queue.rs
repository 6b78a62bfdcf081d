// Tally - An asynchronous UDP Statsd client for Rust!
//
// Copyright 2024-2026 The Tally Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::types::MetricLine;
use crossbeam_channel::{self, Receiver, Select, Sender};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Statistics about entries moving through the queue.
#[derive(Debug, Default)]
struct QueueStats {
    submitted: AtomicU64,
    drained: AtomicU64,
}

impl QueueStats {
    fn incr_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Release);
    }

    fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Acquire)
    }

    fn incr_drained(&self) {
        self.drained.fetch_add(1, Ordering::Release);
    }

    fn drained(&self) -> u64 {
        self.drained.load(Ordering::Acquire)
    }
}

/// Unbounded FIFO of metrics waiting to be sent.
///
/// Any number of threads may enqueue metrics at the same time. Metrics are
/// removed by a single consumer (the dispatcher) in exactly the order they
/// were enqueued. There is no limit on the number of queued metrics: if
/// they can't be sent for some reason, the queue will grow without bound.
///
/// Besides the metrics themselves, the queue carries a wake-up signal so
/// that a consumer waiting for entries can be interrupted (for example, when
/// it's being shut down).
pub struct MetricQueue {
    sender: Sender<MetricLine>,
    receiver: Receiver<MetricLine>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    stats: QueueStats,
}

impl MetricQueue {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        // Wake-ups are coalesced, one pending signal is enough
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);

        MetricQueue {
            sender,
            receiver,
            wake_tx,
            wake_rx,
            stats: QueueStats::default(),
        }
    }

    /// Add a metric to the back of the queue. Never blocks.
    pub fn enqueue(&self, line: MetricLine) {
        // The receiving half lives as long as the queue does so this can't
        // fail with a disconnected channel.
        if self.sender.send(line).is_ok() {
            self.stats.incr_submitted();
        }
    }

    /// Number of metrics currently queued.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Total number of metrics ever added to the queue.
    pub fn submitted(&self) -> u64 {
        self.stats.submitted()
    }

    /// Total number of metrics ever removed from the queue.
    pub fn drained(&self) -> u64 {
        self.stats.drained()
    }

    /// Remove every metric present when this method is called and pass each,
    /// in order, to `consume`. Metrics enqueued while the burst is running are
    /// left for the next one. Returns the number of metrics removed.
    ///
    /// Only one thread should drain the queue at a time.
    pub fn drain_burst<F>(&self, mut consume: F) -> usize
    where
        F: FnMut(MetricLine),
    {
        let present = self.receiver.len();
        let mut removed = 0;

        for line in self.receiver.try_iter().take(present) {
            self.stats.incr_drained();
            removed += 1;
            consume(line);
        }

        removed
    }

    /// Block until the queue has at least one metric, `.wake()` is called,
    /// or the timeout expires. Returns `true` if there are metrics queued.
    pub fn wait_for_entries(&self, timeout: Duration) -> bool {
        if !self.receiver.is_empty() {
            return true;
        }

        let mut sel = Select::new();
        sel.recv(&self.receiver);
        sel.recv(&self.wake_rx);
        // Readiness only, nothing is received from the metric channel here.
        let _ = sel.ready_timeout(timeout);
        self.clear_wake();

        !self.receiver.is_empty()
    }

    /// Block until `.wake()` is called or the timeout expires, regardless
    /// of the contents of the queue.
    pub fn park(&self, timeout: Duration) {
        let _ = self.wake_rx.recv_timeout(timeout);
    }

    /// Interrupt a consumer blocked in `.wait_for_entries()` or `.park()`.
    pub fn wake(&self) {
        let _ = self.wake_tx.try_send(());
    }

    fn clear_wake(&self) {
        while self.wake_rx.try_recv().is_ok() {}
    }
}

impl Default for MetricQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MetricQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricQueue")
            .field("len", &self.len())
            .field("submitted", &self.submitted())
            .field("drained", &self.drained())
            .finish()
    }
}
